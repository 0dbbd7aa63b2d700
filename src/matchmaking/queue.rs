//! Queue and match views returned by matchmaking

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::game::{Difficulty, GameMode};
use crate::store::{GameRow, QueueRow};

/// Where a created match lives and who plays in it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDescriptor {
    pub match_id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Uuid,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
}

impl From<&GameRow> for MatchDescriptor {
    fn from(game: &GameRow) -> Self {
        Self {
            match_id: game.match_id,
            player1_id: game.player1_id,
            player2_id: game.player2_id,
            mode: game.mode,
            difficulty: game.difficulty,
            created_at: game.created_at,
        }
    }
}

/// Result of joining or polling the queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Matched(MatchDescriptor),
}

/// Player in the matchmaking queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub user_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub matched_with: Option<Uuid>,
}

impl From<&QueueRow> for QueueEntry {
    fn from(row: &QueueRow) -> Self {
        Self {
            user_id: row.user_id,
            enqueued_at: row.enqueued_at,
            matched_with: row.matched_with,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
    pub total_pages: usize,
}

/// One page of the queue in arrival order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuePage {
    pub queues: Vec<QueueEntry>,
    pub pagination: Pagination,
}

impl QueuePage {
    /// Slice `rows` to 1-based `page`
    pub fn paginate(rows: &[&QueueRow], page: u32, page_size: u32) -> Self {
        let total = rows.len();
        let size = page_size as usize;
        let start = (page.saturating_sub(1) as usize).saturating_mul(size);

        Self {
            queues: rows.iter().skip(start).take(size).map(|row| QueueEntry::from(*row)).collect(),
            pagination: Pagination {
                page,
                page_size,
                total,
                total_pages: total.div_ceil(size),
            },
        }
    }
}
