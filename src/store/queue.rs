//! Queue table

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::memory::{StoreError, Tables, Transaction};

const TABLE: &str = "queue";

/// A user's place in the matchmaking queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRow {
    pub user_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    /// Peer this user was paired with
    pub matched_with: Option<Uuid>,
    /// Game created by the pairing
    pub match_id: Option<Uuid>,
    #[serde(skip)]
    seq: u64,
}

impl QueueRow {
    pub fn waiting(user_id: Uuid) -> Self {
        Self {
            user_id,
            enqueued_at: Utc::now(),
            matched_with: None,
            match_id: None,
            seq: 0,
        }
    }

    pub fn matched(user_id: Uuid, peer: Uuid, match_id: Uuid) -> Self {
        Self {
            matched_with: Some(peer),
            match_id: Some(match_id),
            ..Self::waiting(user_id)
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.matched_with.is_none()
    }
}

impl Tables {
    pub fn queue_row(&self, user_id: Uuid) -> Option<&QueueRow> {
        self.queue.get(&user_id)
    }

    /// Longest-waiting unmatched entry that isn't `excluding`
    pub fn oldest_waiting(&self, excluding: Uuid) -> Option<&QueueRow> {
        self.queue
            .values()
            .filter(|row| row.is_waiting() && row.user_id != excluding)
            .min_by_key(|row| row.seq)
    }

    /// Rows in arrival order
    pub fn queue_rows(&self) -> Vec<&QueueRow> {
        let mut rows: Vec<&QueueRow> = self.queue.values().collect();
        rows.sort_by_key(|row| row.seq);
        rows
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Transaction {
    pub fn insert_queue_row(&mut self, mut row: QueueRow) -> Result<&QueueRow, StoreError> {
        if self.tables.queue.contains_key(&row.user_id) {
            return Err(StoreError::UniqueViolation {
                table: TABLE,
                key: row.user_id,
            });
        }
        self.tables.queue_seq += 1;
        row.seq = self.tables.queue_seq;
        let user_id = row.user_id;
        Ok(self.tables.queue.entry(user_id).or_insert(row))
    }

    /// Pair a waiting row. Fails if the row is gone or already paired.
    pub fn mark_matched(&mut self, user_id: Uuid, peer: Uuid, match_id: Uuid) -> Result<(), StoreError> {
        match self.tables.queue.get_mut(&user_id) {
            Some(row) if row.is_waiting() => {
                row.matched_with = Some(peer);
                row.match_id = Some(match_id);
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                table: TABLE,
                key: user_id,
            }),
        }
    }

    /// Delete the user's row if it is still waiting. Returns rows affected.
    pub fn delete_waiting_row(&mut self, user_id: Uuid) -> usize {
        match self.tables.queue.get(&user_id) {
            Some(row) if row.is_waiting() => {
                self.tables.queue.remove(&user_id);
                1
            }
            _ => 0,
        }
    }

    /// Delete the user's row from the pairing `match_id` and put the peer
    /// back to waiting at its original place. Returns rows deleted.
    pub fn leave_pairing(&mut self, user_id: Uuid, match_id: Uuid) -> usize {
        match self.tables.queue.get(&user_id) {
            Some(row) if row.match_id == Some(match_id) => {
                self.tables.queue.remove(&user_id);
            }
            _ => return 0,
        }
        for peer in self
            .tables
            .queue
            .values_mut()
            .filter(|row| row.match_id == Some(match_id))
        {
            peer.matched_with = None;
            peer.match_id = None;
        }
        1
    }

    /// Delete both rows of a finished pairing. Returns rows affected.
    pub fn delete_rows_for_match(&mut self, match_id: Uuid) -> usize {
        let before = self.tables.queue.len();
        self.tables.queue.retain(|_, row| row.match_id != Some(match_id));
        before - self.tables.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn oldest_waiting_follows_arrival_order() {
        let store = Store::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store
            .transaction(|tx| {
                for user in [a, b, c] {
                    tx.insert_queue_row(QueueRow::waiting(user))?;
                }
                Ok::<_, StoreError>(())
            })
            .unwrap();

        store.read(|tx| {
            assert_eq!(tx.oldest_waiting(c).unwrap().user_id, a);
            assert_eq!(tx.oldest_waiting(a).unwrap().user_id, b);
            let order: Vec<Uuid> = tx.queue_rows().iter().map(|r| r.user_id).collect();
            assert_eq!(order, vec![a, b, c]);
        });
    }

    #[test]
    fn one_row_per_user() {
        let store = Store::new();
        let user = Uuid::new_v4();
        let result = store.transaction(|tx| {
            tx.insert_queue_row(QueueRow::waiting(user))?;
            tx.insert_queue_row(QueueRow::waiting(user)).map(|_| ())
        });
        assert_eq!(
            result,
            Err(StoreError::UniqueViolation {
                table: TABLE,
                key: user
            })
        );
    }

    #[test]
    fn matched_rows_are_not_waiting() {
        let store = Store::new();
        let (a, b, match_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store
            .transaction(|tx| {
                tx.insert_queue_row(QueueRow::waiting(a))?;
                tx.mark_matched(a, b, match_id)?;
                tx.insert_queue_row(QueueRow::matched(b, a, match_id)).map(|_| ())
            })
            .unwrap();

        store.read(|tx| assert!(tx.oldest_waiting(Uuid::new_v4()).is_none()));
        let deleted = store.transaction(|tx| Ok::<_, StoreError>(tx.delete_waiting_row(a))).unwrap();
        assert_eq!(deleted, 0);
        let deleted = store
            .transaction(|tx| Ok::<_, StoreError>(tx.delete_rows_for_match(match_id)))
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[test]
    fn leaving_a_pairing_requeues_the_peer() {
        let store = Store::new();
        let (a, b, match_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store
            .transaction(|tx| {
                tx.insert_queue_row(QueueRow::waiting(a))?;
                tx.mark_matched(a, b, match_id)?;
                tx.insert_queue_row(QueueRow::matched(b, a, match_id)).map(|_| ())
            })
            .unwrap();

        let other_match = Uuid::new_v4();
        let deleted = store
            .transaction(|tx| Ok::<_, StoreError>(tx.leave_pairing(b, other_match)))
            .unwrap();
        assert_eq!(deleted, 0);

        let deleted = store
            .transaction(|tx| Ok::<_, StoreError>(tx.leave_pairing(b, match_id)))
            .unwrap();
        assert_eq!(deleted, 1);
        store.read(|tables| {
            assert!(tables.queue_row(b).is_none());
            let peer = tables.queue_row(a).unwrap();
            assert!(peer.is_waiting());
            assert_eq!(peer.match_id, None);
            assert_eq!(tables.oldest_waiting(b).unwrap().user_id, a);
        });
    }
}
