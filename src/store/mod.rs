//! Persistence for the matchmaking queue and game records

pub mod games;
pub mod memory;
pub mod queue;

pub use games::{GameResult, GameRow, GameStatus};
pub use memory::{Store, StoreError, Tables};
pub use queue::QueueRow;
