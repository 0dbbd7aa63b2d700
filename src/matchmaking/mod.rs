//! Matchmaking: queue pairing, single-player setup and result recording

pub mod queue;
pub mod service;

pub use queue::{MatchDescriptor, QueuePage, QueueStatus};
pub use service::{MatchmakingError, MatchmakingService, ResultReport};
