//! Snapshot building and broadcast pacing

use crate::ws::protocol::{BallSnapshot, GameSnapshot, PlayerSnapshot, PlayersSnapshot, ServerMsg};

use super::{MatchStatus, PlayerSlot, SimulationEngine};

/// Decides when a match broadcasts and builds the message
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks while the match is live
    snapshot_interval: u32,
    /// A state-changing event is waiting to be published
    forced: bool,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            forced: false,
        }
    }

    /// Check if it's time to send a snapshot.
    ///
    /// Live phases publish on the interval; idle phases only after an event.
    pub fn should_send(&mut self, status: MatchStatus) -> bool {
        self.ticks_since_snapshot += 1;
        let live = matches!(status, MatchStatus::Countdown | MatchStatus::Playing);
        if self.forced || (live && self.ticks_since_snapshot >= self.snapshot_interval) {
            self.ticks_since_snapshot = 0;
            self.forced = false;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.forced = true;
    }

    /// Build a snapshot message
    pub fn build(engine: &SimulationEngine) -> ServerMsg {
        let player = |slot: PlayerSlot| {
            let p = engine.player(slot);
            PlayerSnapshot {
                id: p.identity,
                y: p.paddle_y,
                dy: p.paddle_velocity,
                paddle_height: p.paddle_height,
                score: p.score,
            }
        };
        let ball = engine.ball();

        ServerMsg::GameState(GameSnapshot {
            players: PlayersSnapshot {
                player1: player(PlayerSlot::One),
                player2: player(PlayerSlot::Two),
            },
            ball: BallSnapshot {
                x: ball.x,
                y: ball.y,
                dx: ball.dx,
                dy: ball.dy,
                spin: ball.spin,
            },
            status: engine.status(),
        })
    }
}
