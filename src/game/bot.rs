//! Computer opponent for single-player matches

use super::engine::SimulationEngine;
use super::{Difficulty, Direction, PlayerSlot};

/// Reaction profile per difficulty
#[derive(Debug, Clone, Copy)]
pub struct BotProfile {
    /// Distance from target the paddle tolerates before moving
    pub dead_zone: f64,
    /// Ticks between decisions
    pub reaction_interval: u32,
    /// Follow the projected intercept instead of the ball's current height
    pub predicts: bool,
    /// Return to center while the ball travels away
    pub recenters: bool,
}

impl BotProfile {
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self {
                dead_zone: 24.0,
                reaction_interval: 6,
                predicts: false,
                recenters: false,
            },
            Difficulty::Brutal => Self {
                dead_zone: 4.0,
                reaction_interval: 1,
                predicts: true,
                recenters: true,
            },
            _ => Self {
                dead_zone: 12.0,
                reaction_interval: 3,
                predicts: false,
                recenters: true,
            },
        }
    }
}

/// Drives the right-hand paddle
pub struct BotController {
    slot: PlayerSlot,
    profile: BotProfile,
    ticks: u32,
    current: Option<Direction>,
}

impl BotController {
    pub fn new(difficulty: Difficulty) -> Self {
        Self {
            slot: PlayerSlot::Two,
            profile: BotProfile::for_difficulty(difficulty),
            ticks: 0,
            current: None,
        }
    }

    pub fn slot(&self) -> PlayerSlot {
        self.slot
    }

    /// Choose this tick's move. Between decisions the previous choice is held.
    pub fn decide(&mut self, engine: &SimulationEngine) -> Option<Direction> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.profile.reaction_interval != 0 {
            return self.current;
        }

        let params = engine.params();
        let ball = engine.ball();
        let paddle = engine.player(self.slot);
        let approaching = match self.slot {
            PlayerSlot::One => ball.dx < 0.0,
            PlayerSlot::Two => ball.dx > 0.0,
        };

        let target = if approaching {
            if self.profile.predicts {
                self.predict_intercept(engine) + params.ball_size / 2.0
            } else {
                ball.y + params.ball_size / 2.0
            }
        } else if self.profile.recenters {
            params.game_height / 2.0
        } else {
            self.current = None;
            return None;
        };

        let offset = target - paddle.paddle_center();
        self.current = if offset.abs() <= self.profile.dead_zone {
            None
        } else if offset < 0.0 {
            Some(Direction::Up)
        } else {
            Some(Direction::Down)
        };
        self.current
    }

    /// Ball top edge when it reaches this paddle's face, folding wall reflections
    fn predict_intercept(&self, engine: &SimulationEngine) -> f64 {
        let params = engine.params();
        let ball = engine.ball();
        if ball.dx == 0.0 {
            return ball.y;
        }

        let face_x = match self.slot {
            PlayerSlot::One => params.paddle_width,
            PlayerSlot::Two => params.game_width - params.paddle_width - params.ball_size,
        };
        let ticks = ((face_x - ball.x) / ball.dx).max(0.0);
        let span = params.game_height - params.ball_size;
        let raw = ball.y + ball.dy * ticks;

        // Reflect into [0, span]
        let period = 2.0 * span;
        let folded = raw.rem_euclid(period);
        if folded > span {
            period - folded
        } else {
            folded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::{Ball, COUNTDOWN};
    use crate::game::{GameMode, GameParams};
    use uuid::Uuid;

    fn playing(difficulty: Difficulty) -> SimulationEngine {
        let mut engine = SimulationEngine::new(GameMode::SinglePlayer, difficulty, GameParams::default(), 11);
        let user = Uuid::new_v4();
        engine.add_player(user).unwrap();
        engine.set_ready_state(user, true);
        engine.advance(COUNTDOWN);
        engine
    }

    #[test]
    fn tracks_approaching_ball() {
        let mut engine = playing(Difficulty::Normal);
        engine.set_ball(Ball { x: 500.0, y: 20.0, dx: 7.0, dy: 0.0, spin: 0.0 });
        let mut bot = BotController::new(Difficulty::Normal);
        let decisions: Vec<_> = (0..3).map(|_| bot.decide(&engine)).collect();
        assert_eq!(decisions[2], Some(Direction::Up));
    }

    #[test]
    fn easy_bot_idles_while_ball_recedes() {
        let mut engine = playing(Difficulty::Easy);
        engine.set_ball(Ball { x: 500.0, y: 20.0, dx: -7.0, dy: 0.0, spin: 0.0 });
        let mut bot = BotController::new(Difficulty::Easy);
        assert!((0..12).all(|_| bot.decide(&engine).is_none()));
    }

    #[test]
    fn brutal_bot_reads_wall_reflection() {
        let mut engine = playing(Difficulty::Brutal);
        // Heading down steeply: it will bounce off the floor before arriving
        engine.set_ball(Ball { x: 400.0, y: 300.0, dx: 5.0, dy: 5.0, spin: 0.0 });
        let mut bot = BotController::new(Difficulty::Brutal);
        let intercept = bot.predict_intercept(&engine);
        let span = engine.params().game_height - engine.params().ball_size;
        assert!(intercept >= 0.0 && intercept <= span);
        // 76 ticks to the face: 300 + 380 = 680 -> reflected to 100
        assert!((intercept - 100.0).abs() < 1e-9);

        assert_eq!(bot.decide(&engine), Some(Direction::Up));
    }
}
