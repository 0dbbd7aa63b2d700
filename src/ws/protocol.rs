//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Direction, MatchStatus, PlayerSlot};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Paddle input; `null` direction releases the paddle
    Move {
        slot: PlayerSlot,
        direction: Option<Direction>,
    },

    /// Readiness for the next round
    Ready { slot: PlayerSlot, ready: bool },

    /// Pause a running match
    Pause,

    /// Resume a paused match
    Resume,

    /// Keepalive, answered on the same socket
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full match state
    GameState(GameSnapshot),

    /// Keepalive reply
    Pong,

    /// Error message
    Error { code: String, message: String },
}

/// Broadcast representation of a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub players: PlayersSnapshot,
    pub ball: BallSnapshot,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayersSnapshot {
    pub player1: PlayerSnapshot,
    pub player2: PlayerSnapshot,
}

/// Player state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    /// Seated identity, `null` while the slot is empty
    pub id: Option<Uuid>,
    /// Paddle top edge
    pub y: f64,
    /// Paddle velocity from the last move
    pub dy: f64,
    pub paddle_height: f64,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
    pub spin: f64,
}
