//! Games table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Difficulty, GameMode, BOT_ID};

use super::memory::{StoreError, Tables, Transaction};

const TABLE: &str = "games";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Ongoing,
    Finished,
    /// Closed without a result after everyone left
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub winner_id: Uuid,
    pub loser_id: Uuid,
    pub winner_score: u32,
    pub loser_score: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Persistent record of a match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRow {
    pub match_id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
    pub status: GameStatus,
    pub result: Option<GameResult>,
}

impl GameRow {
    pub fn new(player1_id: Uuid, player2_id: Uuid, mode: GameMode, difficulty: Difficulty) -> Self {
        Self {
            match_id: Uuid::new_v4(),
            player1_id,
            player2_id,
            mode,
            difficulty,
            created_at: Utc::now(),
            status: GameStatus::Ongoing,
            result: None,
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.player1_id == user_id || self.player2_id == user_id
    }

    fn humans(&self) -> impl Iterator<Item = Uuid> + '_ {
        [self.player1_id, self.player2_id].into_iter().filter(|id| *id != BOT_ID)
    }
}

impl Tables {
    pub fn game(&self, match_id: Uuid) -> Option<&GameRow> {
        self.games.get(&match_id)
    }

    /// The user's unfinished game at `difficulty`, if any
    pub fn ongoing_game(&self, user_id: Uuid, difficulty: Difficulty) -> Option<&GameRow> {
        self.games
            .values()
            .find(|g| g.status == GameStatus::Ongoing && g.difficulty == difficulty && g.involves(user_id))
    }

    #[cfg(test)]
    pub fn games_len(&self) -> usize {
        self.games.len()
    }
}

impl Transaction {
    /// Insert a game. A human may hold one ongoing game per difficulty.
    pub fn insert_game(&mut self, game: GameRow) -> Result<&GameRow, StoreError> {
        if self.tables.games.contains_key(&game.match_id) {
            return Err(StoreError::UniqueViolation {
                table: TABLE,
                key: game.match_id,
            });
        }
        if let Some(user_id) = game.humans().find(|id| self.ongoing_game(*id, game.difficulty).is_some()) {
            return Err(StoreError::UniqueViolation {
                table: TABLE,
                key: user_id,
            });
        }
        let match_id = game.match_id;
        Ok(self.tables.games.entry(match_id).or_insert(game))
    }

    /// Close a game, storing its result when there is one
    pub fn close_game(
        &mut self,
        match_id: Uuid,
        status: GameStatus,
        result: Option<GameResult>,
    ) -> Result<&GameRow, StoreError> {
        let game = self.tables.games.get_mut(&match_id).ok_or(StoreError::NotFound {
            table: TABLE,
            key: match_id,
        })?;
        game.status = status;
        game.result = result;
        Ok(game)
    }
}
