use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const PLAYER_NAME_MAX_LENGTH: usize = 20;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const SYSTEM_SENDER: &str = "System";

/// Discriminant of a [`MessageBody`], as it appears in the `type` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Chat,
    Join,
    Leave,
    GameUpdate,
    Error,
    PlayerList,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::GameUpdate => "game_update",
            MessageKind::Error => "error",
            MessageKind::PlayerList => "player_list",
        }
    }

    /// Whether an inbound frame of this kind is fanned out to every player.
    pub fn is_broadcastable(&self) -> bool {
        matches!(self, MessageKind::Chat | MessageKind::GameUpdate)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(MessageKind::Chat),
            "join" => Ok(MessageKind::Join),
            "leave" => Ok(MessageKind::Leave),
            "game_update" => Ok(MessageKind::GameUpdate),
            "error" => Ok(MessageKind::Error),
            "player_list" => Ok(MessageKind::PlayerList),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "Text")]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerListContent {
    #[serde(rename = "Names")]
    pub names: Vec<String>,
}

/// Payload of a live-game message, one variant per recognized `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Chat(TextContent),
    Join(TextContent),
    Leave(TextContent),
    GameUpdate(TextContent),
    Error(TextContent),
    PlayerList(PlayerListContent),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Chat(_) => MessageKind::Chat,
            MessageBody::Join(_) => MessageKind::Join,
            MessageBody::Leave(_) => MessageKind::Leave,
            MessageBody::GameUpdate(_) => MessageKind::GameUpdate,
            MessageBody::Error(_) => MessageKind::Error,
            MessageBody::PlayerList(_) => MessageKind::PlayerList,
        }
    }

    fn content(&self) -> Value {
        match self {
            MessageBody::Chat(c)
            | MessageBody::Join(c)
            | MessageBody::Leave(c)
            | MessageBody::GameUpdate(c)
            | MessageBody::Error(c) => json!({ "Text": c.text }),
            MessageBody::PlayerList(c) => json!({ "Names": c.names }),
        }
    }

    fn from_content(kind: MessageKind, content: Value) -> Result<Self, MessageError> {
        let text = |content: Value| {
            serde_json::from_value::<TextContent>(content)
                .map_err(|e| MessageError::Malformed(e.to_string()))
        };

        Ok(match kind {
            MessageKind::Chat => MessageBody::Chat(text(content)?),
            MessageKind::Join => MessageBody::Join(text(content)?),
            MessageKind::Leave => MessageBody::Leave(text(content)?),
            MessageKind::GameUpdate => MessageBody::GameUpdate(text(content)?),
            MessageKind::Error => MessageBody::Error(text(content)?),
            MessageKind::PlayerList => MessageBody::PlayerList(
                serde_json::from_value(content)
                    .map_err(|e| MessageError::Malformed(e.to_string()))?,
            ),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Untyped envelope exactly as it travels over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "playerName", default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// A live-game message. Serializes to
/// `{"type": ..., "timestamp": ..., "playerName": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    pub player_name: Option<String>,
}

impl Message {
    pub fn new(body: MessageBody, player_name: Option<String>) -> Self {
        Self {
            body,
            timestamp: Utc::now(),
            player_name,
        }
    }

    pub fn chat(sender: &str, text: impl Into<String>) -> Self {
        Self::new(
            MessageBody::Chat(TextContent { text: text.into() }),
            Some(sender.to_string()),
        )
    }

    pub fn join(player_name: &str) -> Self {
        Self::new(
            MessageBody::Join(TextContent {
                text: "has joined the game".to_string(),
            }),
            Some(player_name.to_string()),
        )
    }

    pub fn leave(player_name: &str) -> Self {
        Self::new(
            MessageBody::Leave(TextContent {
                text: "has left the game".to_string(),
            }),
            Some(player_name.to_string()),
        )
    }

    /// Error frame. `sender` is `None` for frames sent before a player is known.
    pub fn error(sender: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(
            MessageBody::Error(TextContent { text: text.into() }),
            sender.map(str::to_string),
        )
    }

    pub fn player_list(names: Vec<String>) -> Self {
        Self::new(
            MessageBody::PlayerList(PlayerListContent { names }),
            Some(SYSTEM_SENDER.to_string()),
        )
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Parses one text frame. Broken JSON and bad payloads are `Malformed`;
    /// well-formed envelopes with an unrecognized `type` are `UnknownType`.
    pub fn decode(frame: &str) -> Result<Self, MessageError> {
        let wire: WireMessage =
            serde_json::from_str(frame).map_err(|e| MessageError::Malformed(e.to_string()))?;
        Message::try_from(wire)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = MessageError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind: MessageKind = wire.kind.parse()?;
        let content = wire
            .content
            .ok_or_else(|| MessageError::Malformed("missing content".to_string()))?;

        Ok(Message {
            body: MessageBody::from_content(kind, content)?,
            timestamp: wire.timestamp.unwrap_or_else(Utc::now),
            player_name: wire.player_name,
        })
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        WireMessage {
            kind: message.kind().as_str().to_string(),
            timestamp: Some(message.timestamp),
            player_name: message.player_name,
            content: Some(message.body.content()),
        }
    }
}

/// Checks a display name: non-empty, ASCII letters, digits and internal
/// spaces only, at most `max_length` characters.
pub fn is_player_name_valid(name: &str, max_length: usize) -> bool {
    if name.is_empty() || name.trim() != name || name.chars().count() > max_length {
        return false;
    }
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    #[default]
    Text,
    Choice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Problem {
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub r#type: ProblemType,
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
    pub answer: String,
}

impl Problem {
    pub fn new(question: &str, answer: &str) -> Self {
        Self {
            id: Uuid::nil(),
            r#type: ProblemType::Text,
            question: question.to_string(),
            choices: Vec::new(),
            answer: answer.to_string(),
        }
    }

    /// The problem as shown to a quiz taker, without its answer.
    pub fn to_question(&self) -> Question {
        Question {
            id: self.id,
            r#type: self.r#type,
            question: self.question.clone(),
            choices: self.choices.clone(),
        }
    }

    /// Case-insensitive, whitespace-trimmed comparison against the stored answer.
    pub fn is_correct(&self, submitted: &str) -> bool {
        submitted.trim().to_lowercase() == self.answer.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Question {
    pub id: Uuid,
    pub r#type: ProblemType,
    pub question: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QuestionSubmission {
    pub question_id: Uuid,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EvaluateQuizRequest {
    pub session_id: Uuid,
    pub question_submissions: Vec<QuestionSubmission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QuestionResult {
    pub id: Uuid,
    pub answer: String,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EvaluateQuizResponse {
    pub score: usize,
    pub answers: Vec<QuestionResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartQuizResponse {
    pub session_id: Uuid,
    pub timeout: DateTime<Utc>,
    pub questions: Vec<Question>,
}
