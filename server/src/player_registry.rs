//! Names and ids of the players currently in the live game
//!
//! Names are unique among live players and compared case-sensitively, so
//! "Alex" and "alex" may play at the same time. Ids are random and never
//! reused while the registry holds them.

use crate::error::RegistryError;
use crate::utils::unique_id;
use parking_lot::RwLock;
use uuid::Uuid;

pub type PlayerId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
}

/// Live player roster, kept in join order
///
/// Writers are exclusive; lookups share a read lock.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: RwLock<Vec<Player>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a player under `name`
    ///
    /// The duplicate check and the insert happen under one write lock, so two
    /// concurrent joins with the same name cannot both succeed.
    pub fn add_player(&self, name: &str) -> Result<PlayerId, RegistryError> {
        let mut players = self.players.write();
        if players.iter().any(|p| p.name == name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }

        let id = unique_id(|id| players.iter().any(|p| p.id == *id));
        players.push(Player {
            id,
            name: name.to_string(),
        });
        Ok(id)
    }

    pub fn remove_player_by_name(&self, name: &str) -> Result<(), RegistryError> {
        let mut players = self.players.write();
        let before = players.len();
        players.retain(|p| p.name != name);
        if players.len() == before {
            return Err(RegistryError::PlayerNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn player_name_list(&self) -> Vec<String> {
        self.players.read().iter().map(|p| p.name.clone()).collect()
    }

    pub fn player_by_name(&self, name: &str) -> Result<Player, RegistryError> {
        self.players
            .read()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| RegistryError::PlayerNotFound(name.to_string()))
    }

    pub fn player_by_id(&self, id: &PlayerId) -> Result<Player, RegistryError> {
        self.players
            .read()
            .iter()
            .find(|p| p.id == *id)
            .cloned()
            .ok_or_else(|| RegistryError::PlayerNotFound(id.to_string()))
    }

    pub fn player_exists_by_name(&self, name: &str) -> bool {
        self.player_by_name(name).is_ok()
    }

    pub fn player_exists_by_id(&self, id: &PlayerId) -> bool {
        self.player_by_id(id).is_ok()
    }

    /// An id not held by any live player.
    pub fn create_unique_id(&self) -> PlayerId {
        let players = self.players.read();
        unique_id(|id| players.iter().any(|p| p.id == *id))
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }
}
