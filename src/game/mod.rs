//! Game simulation modules

pub mod bot;
pub mod engine;
pub mod r#match;
pub mod physics;
pub mod snapshot;

pub use engine::SimulationEngine;
pub use physics::GameParams;
pub use r#match::{ClientSession, MatchOutcome, MatchRegistry, MatchReport, RegistrySettings};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity seated in the second slot of bot-driven and local matches
pub const BOT_ID: Uuid = Uuid::nil();

/// One of the two player positions in a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum PlayerSlot {
    /// Left paddle
    One,
    /// Right paddle
    Two,
}

impl PlayerSlot {
    pub const ALL: [PlayerSlot; 2] = [PlayerSlot::One, PlayerSlot::Two];

    pub fn index(self) -> usize {
        match self {
            PlayerSlot::One => 0,
            PlayerSlot::Two => 1,
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            PlayerSlot::One => PlayerSlot::Two,
            PlayerSlot::Two => PlayerSlot::One,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayerSlot::One => "player1",
            PlayerSlot::Two => "player2",
        }
    }
}

impl TryFrom<String> for PlayerSlot {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "player1" | "1" => Ok(PlayerSlot::One),
            "player2" | "2" => Ok(PlayerSlot::Two),
            other => Err(EngineError::Validation(format!("unknown slot '{other}'"))),
        }
    }
}

impl From<PlayerSlot> for &'static str {
    fn from(slot: PlayerSlot) -> Self {
        slot.as_str()
    }
}

impl std::fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paddle movement requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// Match mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    #[serde(rename = "singleplayer")]
    SinglePlayer,
    #[serde(rename = "1v1")]
    OneVsOne,
}

/// Match difficulty. For 1v1 matches this selects local or online play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Normal,
    Brutal,
    Local,
    Online,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Brutal => "brutal",
            Difficulty::Local => "local",
            Difficulty::Online => "online",
        }
    }
}

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Required slots not yet occupied
    Loading,
    /// Waiting for players to ready up
    Waiting,
    /// Fixed delay before the serve
    Countdown,
    /// Ball in play
    Playing,
    /// Tick effects suppressed
    Paused,
    /// Terminal
    Finished,
}

/// Errors raised by the simulation engine and match registry
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Match already has two players")]
    Capacity,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Cannot {action} while match is {status:?}")]
    InvalidState {
        action: &'static str,
        status: MatchStatus,
    },
}
