//! Application state shared across routes

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::game::{MatchRegistry, MatchReport};
use crate::matchmaking::MatchmakingService;
use crate::store::Store;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaking: Arc<MatchmakingService>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    /// Build the state. Match reports arrive on the returned receiver and
    /// should be handed to the matchmaking forwarder.
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<MatchReport>) {
        let config = Arc::new(config);

        let store = Store::new();
        let matchmaking = Arc::new(MatchmakingService::new(store, config.queue_page_size_max));

        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let match_registry = Arc::new(MatchRegistry::new(config.registry_settings(), Some(report_tx)));

        let state = Self {
            config,
            matchmaking,
            match_registry,
        };
        (state, report_rx)
    }
}
