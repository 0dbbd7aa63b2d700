//! Matchmaking service - pairs queued players and records results

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{Difficulty, GameMode, MatchOutcome, MatchReport, BOT_ID};
use crate::store::{GameResult, GameRow, GameStatus, QueueRow, Store, StoreError, Tables};

use super::queue::{MatchDescriptor, QueuePage, QueueStatus};

#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("persistence failure: {0}")]
    Persistence(StoreError),
}

impl From<StoreError> for MatchmakingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation { .. } => Self::Conflict(e.to_string()),
            StoreError::NotFound { .. } => Self::NotFound(e.to_string()),
            StoreError::Unavailable(_) => Self::Persistence(e),
        }
    }
}

/// Final score submitted for a match
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultReport {
    pub match_id: Uuid,
    pub winner_id: Uuid,
    pub loser_id: Uuid,
    pub winner_score: u32,
    pub loser_score: u32,
}

impl From<MatchOutcome> for ResultReport {
    fn from(outcome: MatchOutcome) -> Self {
        Self {
            match_id: outcome.match_id,
            winner_id: outcome.winner_id,
            loser_id: outcome.loser_id,
            winner_score: outcome.winner_score,
            loser_score: outcome.loser_score,
        }
    }
}

/// Matchmaking service
pub struct MatchmakingService {
    store: Store,
    page_size_max: u32,
}

impl MatchmakingService {
    pub fn new(store: Store, page_size_max: u32) -> Self {
        Self {
            store,
            page_size_max: page_size_max.max(1),
        }
    }

    /// Join the queue, pairing with the longest-waiting peer if there is one.
    ///
    /// Calling again while waiting or matched returns the current state.
    pub fn enter_queue(&self, user_id: Uuid) -> Result<QueueStatus, MatchmakingError> {
        let status = self.store.transaction(|tx| -> Result<QueueStatus, MatchmakingError> {
            if let Some(row) = tx.queue_row(user_id) {
                return match row.match_id {
                    Some(match_id) => Ok(QueueStatus::Matched(descriptor(tx, match_id)?)),
                    None => Ok(QueueStatus::Waiting),
                };
            }

            let Some(peer) = tx.oldest_waiting(user_id).map(|row| row.user_id) else {
                tx.insert_queue_row(QueueRow::waiting(user_id))?;
                return Ok(QueueStatus::Waiting);
            };

            let game = GameRow::new(peer, user_id, GameMode::OneVsOne, Difficulty::Online);
            let match_id = game.match_id;
            tx.mark_matched(peer, user_id, match_id)?;
            tx.insert_queue_row(QueueRow::matched(user_id, peer, match_id))?;
            let game = tx.insert_game(game)?;
            Ok(QueueStatus::Matched(MatchDescriptor::from(game)))
        })?;

        match &status {
            QueueStatus::Waiting => info!(user_id = %user_id, "Player waiting in queue"),
            QueueStatus::Matched(m) => info!(
                user_id = %user_id,
                match_id = %m.match_id,
                player1 = %m.player1_id,
                player2 = %m.player2_id,
                "Player matched"
            ),
        }
        Ok(status)
    }

    /// Leave the queue. Leaving a pairing abandons its game and puts the
    /// peer back to waiting.
    pub fn cancel_queue(&self, user_id: Uuid) -> Result<(), MatchmakingError> {
        let left_match = self.store.transaction(|tx| -> Result<Option<Uuid>, MatchmakingError> {
            let row = tx
                .queue_row(user_id)
                .ok_or_else(|| MatchmakingError::NotFound("user not found in queue".to_string()))?;

            let Some(match_id) = row.match_id else {
                if tx.delete_waiting_row(user_id) == 0 {
                    return Err(MatchmakingError::Conflict("queue entry already consumed".to_string()));
                }
                return Ok(None);
            };

            if tx.leave_pairing(user_id, match_id) == 0 {
                return Err(MatchmakingError::Conflict("queue entry already consumed".to_string()));
            }
            if tx.game(match_id).is_some_and(|game| game.status == GameStatus::Ongoing) {
                tx.close_game(match_id, GameStatus::Abandoned, None)?;
            }
            Ok(Some(match_id))
        })?;

        match left_match {
            Some(match_id) => info!(user_id = %user_id, match_id = %match_id, "Player left pairing"),
            None => info!(user_id = %user_id, "Player left queue"),
        }
        Ok(())
    }

    /// Create a match against the computer, skipping the queue
    pub fn single_player(&self, user_id: Uuid, difficulty: Difficulty) -> Result<MatchDescriptor, MatchmakingError> {
        if !matches!(difficulty, Difficulty::Easy | Difficulty::Normal | Difficulty::Brutal) {
            return Err(MatchmakingError::Validation(format!(
                "difficulty {} is not a single-player difficulty",
                difficulty.as_str()
            )));
        }

        let descriptor = self.store.transaction(|tx| {
            if tx.ongoing_game(user_id, difficulty).is_some() {
                return Err(MatchmakingError::Conflict("game already exists".to_string()));
            }
            let game = tx.insert_game(GameRow::new(user_id, BOT_ID, GameMode::SinglePlayer, difficulty))?;
            Ok(MatchDescriptor::from(game))
        })?;

        info!(
            user_id = %user_id,
            match_id = %descriptor.match_id,
            difficulty = difficulty.as_str(),
            "Single-player match created"
        );
        Ok(descriptor)
    }

    /// Record a match result. A game accepts exactly one result.
    pub fn report_result(&self, report: ResultReport) -> Result<GameRow, MatchmakingError> {
        let game = self.store.transaction(|tx| -> Result<GameRow, MatchmakingError> {
            let game = tx
                .game(report.match_id)
                .ok_or_else(|| MatchmakingError::NotFound("game not found".to_string()))?;
            if game.status != GameStatus::Ongoing {
                return Err(MatchmakingError::Conflict("game already closed".to_string()));
            }
            if report.winner_id == report.loser_id || !game.involves(report.winner_id) || !game.involves(report.loser_id)
            {
                return Err(MatchmakingError::Validation(
                    "winner and loser must be the game's two players".to_string(),
                ));
            }
            if report.winner_score < report.loser_score {
                return Err(MatchmakingError::Validation("winner score below loser score".to_string()));
            }

            let result = GameResult {
                winner_id: report.winner_id,
                loser_id: report.loser_id,
                winner_score: report.winner_score,
                loser_score: report.loser_score,
                recorded_at: Utc::now(),
            };
            tx.delete_rows_for_match(report.match_id);
            Ok(tx.close_game(report.match_id, GameStatus::Finished, Some(result))?.clone())
        })?;

        info!(
            match_id = %game.match_id,
            winner_id = %report.winner_id,
            winner_score = report.winner_score,
            loser_score = report.loser_score,
            "Match result recorded"
        );
        Ok(game)
    }

    /// Close a game whose match was torn down without a result
    pub fn close_abandoned(&self, match_id: Uuid) -> Result<(), MatchmakingError> {
        self.store.transaction(|tx| -> Result<(), MatchmakingError> {
            let game = tx
                .game(match_id)
                .ok_or_else(|| MatchmakingError::NotFound("game not found".to_string()))?;
            if game.status != GameStatus::Ongoing {
                return Err(MatchmakingError::Conflict("game already closed".to_string()));
            }
            tx.delete_rows_for_match(match_id);
            tx.close_game(match_id, GameStatus::Abandoned, None)?;
            Ok(())
        })?;

        info!(match_id = %match_id, "Abandoned match closed");
        Ok(())
    }

    pub fn queue_status(&self, user_id: Uuid) -> Result<QueueStatus, MatchmakingError> {
        self.store.read(|tx| {
            let row = tx
                .queue_row(user_id)
                .ok_or_else(|| MatchmakingError::NotFound("user not found in queue".to_string()))?;
            match row.match_id {
                Some(match_id) => Ok(QueueStatus::Matched(descriptor(tx, match_id)?)),
                None => Ok(QueueStatus::Waiting),
            }
        })
    }

    /// The game a paired user should connect to
    pub fn current_match(&self, user_id: Uuid) -> Result<MatchDescriptor, MatchmakingError> {
        self.store.read(|tx| {
            let match_id = tx
                .queue_row(user_id)
                .and_then(|row| row.match_id)
                .ok_or_else(|| MatchmakingError::NotFound("user not found in games".to_string()))?;
            descriptor(tx, match_id)
        })
    }

    pub fn list_queue(&self, page: u32, page_size: u32) -> Result<QueuePage, MatchmakingError> {
        if page == 0 {
            return Err(MatchmakingError::Validation("page starts at 1".to_string()));
        }
        if page_size == 0 || page_size > self.page_size_max {
            return Err(MatchmakingError::Validation(format!(
                "page size must be between 1 and {}",
                self.page_size_max
            )));
        }
        Ok(self
            .store
            .read(|tx| QueuePage::paginate(&tx.queue_rows(), page, page_size)))
    }

    pub fn queue_size(&self) -> usize {
        self.store.read(|tx| tx.queue_len())
    }

    /// Persist what match tasks report until the registry goes away
    pub async fn run_report_forwarder(self: Arc<Self>, mut reports: mpsc::UnboundedReceiver<MatchReport>) {
        while let Some(report) = reports.recv().await {
            let (match_id, result) = match report {
                MatchReport::Finished(outcome) => (outcome.match_id, self.report_result(outcome.into()).map(|_| ())),
                MatchReport::Abandoned { match_id } => (match_id, self.close_abandoned(match_id)),
            };
            match result {
                Ok(()) => {}
                // Ad-hoc matches have no game record
                Err(MatchmakingError::NotFound(_)) => debug!(match_id = %match_id, "No game record for match"),
                // A player left the pairing before the match ended
                Err(MatchmakingError::Conflict(_)) => debug!(match_id = %match_id, "Game already closed"),
                Err(e) => warn!(match_id = %match_id, error = %e, "Failed to persist match report"),
            }
        }
        debug!("Match report forwarder stopped");
    }
}

fn descriptor(tx: &Tables, match_id: Uuid) -> Result<MatchDescriptor, MatchmakingError> {
    tx.game(match_id)
        .map(MatchDescriptor::from)
        .ok_or_else(|| MatchmakingError::NotFound("game not found".to_string()))
}
