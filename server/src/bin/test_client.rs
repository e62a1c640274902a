use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use shared::{Message, MessageBody};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as Frame;

#[derive(Parser, Debug)]
#[command(author, version, about = "Joins the live game and relays stdin lines as chat")]
struct Args {
    /// Player name to join as
    #[arg(short, long)]
    name: String,

    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,
}

fn describe(message: &Message) -> String {
    let sender = message.player_name.as_deref().unwrap_or("?");
    match &message.body {
        MessageBody::Chat(content) => format!("<{}> {}", sender, content.text),
        MessageBody::Join(content) | MessageBody::Leave(content) => {
            format!("* {} {}", sender, content.text)
        }
        MessageBody::GameUpdate(content) => format!("[update from {}] {}", sender, content.text),
        MessageBody::Error(content) => format!("! {}", content.text),
        MessageBody::PlayerList(content) => format!("Players: {}", content.names.join(", ")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let url = format!(
        "ws://{}/liveGame/player/{}",
        args.server,
        utf8_percent_encode(&args.name, NON_ALPHANUMERIC)
    );

    info!("Connecting to {}", url);
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Frame::Text(text))) => match Message::decode(text.as_str()) {
                        Ok(message) => println!("{}", describe(&message)),
                        Err(e) => warn!("Undecodable frame: {}", e),
                    },
                    Some(Ok(Frame::Close(_))) | None => {
                        println!("Disconnected");
                        break;
                    }
                    Some(Ok(other)) => debug!("Ignoring frame {:?}", other),
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    sink.send(Frame::Close(None)).await?;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let json = Message::chat(&args.name, line).encode()?;
                sink.send(Frame::text(json)).await?;
            }
        }
    }

    Ok(())
}
