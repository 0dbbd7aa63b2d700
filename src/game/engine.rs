//! Authoritative per-match simulation and phase state machine.
//!
//! The engine is pure compute: it never sleeps, spawns, or performs I/O.
//! Time only enters through [`SimulationEngine::advance`], which the match
//! task calls once per fixed step.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use uuid::Uuid;

use super::physics::{GameParams, PhysicsSystem, MAX_BOUNCE_ANGLE};
use super::{Difficulty, Direction, EngineError, GameMode, MatchStatus, PlayerSlot, BOT_ID};

/// Delay between entering countdown and the serve
pub const COUNTDOWN: Duration = Duration::from_millis(3000);

/// Largest serve angle either side of horizontal (30 degrees)
const MAX_SERVE_ANGLE: f64 = std::f64::consts::FRAC_PI_6;

/// Ball position, velocity and spin
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
    pub spin: f64,
}

/// One player slot
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub identity: Option<Uuid>,
    /// Top edge of the paddle
    pub paddle_y: f64,
    /// Signed travel applied by the last move; zero when idle or clamped
    pub paddle_velocity: f64,
    pub paddle_height: f64,
    pub score: u32,
    pub ready: bool,
}

impl PlayerState {
    fn new(params: &GameParams) -> Self {
        Self {
            identity: None,
            paddle_y: (params.game_height - params.paddle_height) / 2.0,
            paddle_velocity: 0.0,
            paddle_height: params.paddle_height,
            score: 0,
            ready: false,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.identity.is_some()
    }

    pub fn paddle_center(&self) -> f64 {
        self.paddle_y + self.paddle_height / 2.0
    }
}

/// A point scored during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreEvent {
    pub scorer: PlayerSlot,
    pub score: u32,
    /// The point ended the match
    pub finished: bool,
}

/// Simulation state for one match
pub struct SimulationEngine {
    params: GameParams,
    mode: GameMode,
    difficulty: Difficulty,
    status: MatchStatus,
    slots: [PlayerState; 2],
    ball: Ball,
    speed_multiplier: f64,
    countdown_remaining: Duration,
    rng: ChaCha8Rng,
}

impl SimulationEngine {
    pub fn new(mode: GameMode, difficulty: Difficulty, params: GameParams, seed: u64) -> Self {
        let mut engine = Self {
            params,
            mode,
            difficulty,
            status: MatchStatus::Loading,
            slots: [PlayerState::new(&params), PlayerState::new(&params)],
            ball: Ball::default(),
            speed_multiplier: 1.0,
            countdown_remaining: Duration::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };

        // Bot and local matches drive the right paddle without a second human
        if engine.seats_bot() {
            engine.slots[PlayerSlot::Two.index()].identity = Some(BOT_ID);
        }
        engine.reset_ball();
        engine
    }

    /// Whether slot2 is filled by the server rather than a second human
    pub fn seats_bot(&self) -> bool {
        match self.mode {
            GameMode::SinglePlayer => true,
            GameMode::OneVsOne => self.difficulty == Difficulty::Local,
        }
    }

    /// Whether the current mode starts a round on slot1's readiness alone
    fn solo_readiness(&self) -> bool {
        self.seats_bot()
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn params(&self) -> &GameParams {
        &self.params
    }

    pub fn ball(&self) -> &Ball {
        &self.ball
    }

    #[cfg(test)]
    pub fn speed_multiplier(&self) -> f64 {
        self.speed_multiplier
    }

    pub fn player(&self, slot: PlayerSlot) -> &PlayerState {
        &self.slots[slot.index()]
    }

    pub fn slot_identity(&self, slot: PlayerSlot) -> Option<Uuid> {
        self.slots[slot.index()].identity
    }

    /// Slot held by `identity`, if seated
    pub fn slot_of(&self, identity: Uuid) -> Option<PlayerSlot> {
        PlayerSlot::ALL
            .into_iter()
            .find(|slot| self.slots[slot.index()].identity == Some(identity))
    }

    /// Seat a player in the first free slot.
    ///
    /// Re-adding an identity that is already seated returns its slot.
    pub fn add_player(&mut self, identity: Uuid) -> Result<PlayerSlot, EngineError> {
        if identity == BOT_ID {
            return Err(EngineError::Validation("reserved identity".to_string()));
        }
        if let Some(slot) = self.slot_of(identity) {
            return Ok(slot);
        }

        let slot = PlayerSlot::ALL
            .into_iter()
            .find(|slot| !self.slots[slot.index()].is_occupied())
            .ok_or(EngineError::Capacity)?;
        self.slots[slot.index()].identity = Some(identity);

        if self.status == MatchStatus::Loading && self.slots.iter().all(PlayerState::is_occupied) {
            self.status = MatchStatus::Waiting;
            // Readiness may have been announced while the opponent was still joining
            self.try_start_countdown();
        }

        Ok(slot)
    }

    /// Record readiness for the slot owned by `identity`.
    ///
    /// Unknown identities are ignored. Returns true when this call started
    /// the countdown.
    pub fn set_ready_state(&mut self, identity: Uuid, ready: bool) -> bool {
        let Some(slot) = self.slot_of(identity) else {
            return false;
        };
        self.slots[slot.index()].ready = ready;
        self.try_start_countdown()
    }

    fn readiness_satisfied(&self) -> bool {
        let one = self.slots[PlayerSlot::One.index()].ready;
        let two = self.slots[PlayerSlot::Two.index()].ready;
        if self.solo_readiness() {
            one
        } else {
            one && two
        }
    }

    fn try_start_countdown(&mut self) -> bool {
        if self.status != MatchStatus::Waiting || !self.readiness_satisfied() {
            return false;
        }
        self.status = MatchStatus::Countdown;
        self.countdown_remaining = COUNTDOWN;
        self.reset_ball();
        self.reset_paddles();
        true
    }

    /// Advance wall-clock driven phases by `dt`.
    ///
    /// Returns true when the countdown elapsed and play began.
    pub fn advance(&mut self, dt: Duration) -> bool {
        if self.status != MatchStatus::Countdown {
            return false;
        }
        self.countdown_remaining = self.countdown_remaining.saturating_sub(dt);
        if self.countdown_remaining.is_zero() {
            self.status = MatchStatus::Playing;
            return true;
        }
        false
    }

    /// Move a paddle one step. Ignored unless playing.
    pub fn apply_move(&mut self, slot: PlayerSlot, direction: Option<Direction>) {
        if self.status != MatchStatus::Playing {
            return;
        }

        let max_y = self.params.game_height - self.slots[slot.index()].paddle_height;
        let speed = self.params.paddle_speed;
        let paddle = &mut self.slots[slot.index()];

        let step = match direction {
            Some(Direction::Up) => -speed,
            Some(Direction::Down) => speed,
            None => 0.0,
        };
        let target = paddle.paddle_y + step;
        paddle.paddle_y = target.clamp(0.0, max_y);
        paddle.paddle_velocity = if target == paddle.paddle_y { step } else { 0.0 };
    }

    /// Resize a paddle around its current midpoint
    pub fn set_paddle_height(&mut self, slot: PlayerSlot, height: f64) -> Result<(), EngineError> {
        if !(height > 0.0 && height <= self.params.game_height) {
            return Err(EngineError::Validation(format!("paddle height {height} out of range")));
        }
        let game_height = self.params.game_height;
        let paddle = &mut self.slots[slot.index()];
        let center = paddle.paddle_center();
        paddle.paddle_height = height;
        paddle.paddle_y = (center - height / 2.0).clamp(0.0, game_height - height);
        Ok(())
    }

    pub fn pause(&mut self) -> bool {
        if self.status != MatchStatus::Playing {
            return false;
        }
        self.status = MatchStatus::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.status != MatchStatus::Paused {
            return false;
        }
        self.status = MatchStatus::Playing;
        true
    }

    /// Terminal; no later call leaves `Finished`
    pub fn stop(&mut self) {
        self.status = MatchStatus::Finished;
    }

    /// Winning slot once the match has finished on score
    pub fn winner(&self) -> Option<PlayerSlot> {
        if self.status != MatchStatus::Finished {
            return None;
        }
        PlayerSlot::ALL
            .into_iter()
            .find(|slot| self.slots[slot.index()].score >= self.params.max_score)
    }

    /// Advance the ball one simulation step. No-op unless playing.
    pub fn tick(&mut self) -> Option<ScoreEvent> {
        if self.status != MatchStatus::Playing {
            return None;
        }

        let params = self.params;
        let ball = &mut self.ball;

        PhysicsSystem::curve_for_spin(ball, &params);
        ball.x += ball.dx;
        ball.y += ball.dy;
        PhysicsSystem::resolve_wall_collision(ball, &params);

        for slot in PlayerSlot::ALL {
            let paddle = &self.slots[slot.index()];
            if PhysicsSystem::touches_paddle(ball, slot, paddle.paddle_y, paddle.paddle_height, &params) {
                let bounce = PhysicsSystem::resolve_paddle_bounce(
                    ball,
                    slot,
                    paddle.paddle_y,
                    paddle.paddle_height,
                    paddle.paddle_velocity,
                    self.speed_multiplier,
                    &params,
                );
                debug_assert!(bounce.bounce_angle.abs() <= MAX_BOUNCE_ANGLE);
                self.speed_multiplier = bounce.speed_multiplier;
                break;
            }
        }

        let scorer = if ball.x <= 0.0 {
            PlayerSlot::Two
        } else if ball.x + params.ball_size >= params.game_width {
            PlayerSlot::One
        } else {
            return None;
        };

        Some(self.award_point(scorer))
    }

    fn award_point(&mut self, scorer: PlayerSlot) -> ScoreEvent {
        let player = &mut self.slots[scorer.index()];
        player.score += 1;
        let score = player.score;

        let finished = score >= self.params.max_score;
        if finished {
            self.stop();
        } else {
            self.status = MatchStatus::Waiting;
            // Next round is gated on fresh readiness
            for slot in self.slots.iter_mut() {
                slot.ready = false;
            }
        }

        ScoreEvent {
            scorer,
            score,
            finished,
        }
    }

    fn reset_ball(&mut self) {
        self.speed_multiplier = 1.0;

        let angle = self.rng.gen_range(-MAX_SERVE_ANGLE..=MAX_SERVE_ANGLE);
        let direction = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };

        self.ball = Ball {
            x: self.params.game_width / 2.0,
            y: self.params.game_height / 2.0,
            dx: direction * self.params.ball_speed * angle.cos(),
            dy: self.params.ball_speed * angle.sin(),
            spin: 0.0,
        };
    }

    fn reset_paddles(&mut self) {
        let game_height = self.params.game_height;
        for paddle in self.slots.iter_mut() {
            paddle.paddle_y = (game_height - paddle.paddle_height) / 2.0;
            paddle.paddle_velocity = 0.0;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_ball(&mut self, ball: Ball) {
        self.ball = ball;
    }

    #[cfg(test)]
    pub(crate) fn set_paddle_y(&mut self, slot: PlayerSlot, y: f64) {
        self.slots[slot.index()].paddle_y = y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn online_engine() -> (SimulationEngine, Uuid, Uuid) {
        let mut engine = SimulationEngine::new(GameMode::OneVsOne, Difficulty::Online, GameParams::default(), 7);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        engine.add_player(a).unwrap();
        engine.add_player(b).unwrap();
        (engine, a, b)
    }

    fn playing_engine() -> (SimulationEngine, Uuid, Uuid) {
        let (mut engine, a, b) = online_engine();
        engine.set_ready_state(a, true);
        engine.set_ready_state(b, true);
        assert!(engine.advance(COUNTDOWN));
        (engine, a, b)
    }

    #[test]
    fn third_identity_is_rejected() {
        let (mut engine, a, _) = online_engine();
        assert_eq!(engine.add_player(Uuid::new_v4()), Err(EngineError::Capacity));
        // Same identity again keeps its seat
        assert_eq!(engine.add_player(a), Ok(PlayerSlot::One));
    }

    #[test]
    fn online_needs_both_players_before_waiting() {
        let mut engine = SimulationEngine::new(GameMode::OneVsOne, Difficulty::Online, GameParams::default(), 1);
        let a = Uuid::new_v4();
        engine.add_player(a).unwrap();
        assert_eq!(engine.status(), MatchStatus::Loading);

        // Early readiness is remembered
        assert!(!engine.set_ready_state(a, true));
        let b = Uuid::new_v4();
        engine.add_player(b).unwrap();
        assert_eq!(engine.status(), MatchStatus::Waiting);
        assert!(engine.set_ready_state(b, true));
        assert_eq!(engine.status(), MatchStatus::Countdown);
    }

    #[test]
    fn singleplayer_starts_on_slot1_ready() {
        let mut engine = SimulationEngine::new(GameMode::SinglePlayer, Difficulty::Easy, GameParams::default(), 1);
        assert_eq!(engine.slot_identity(PlayerSlot::Two), Some(BOT_ID));
        let a = Uuid::new_v4();
        assert_eq!(engine.add_player(a), Ok(PlayerSlot::One));
        assert_eq!(engine.status(), MatchStatus::Waiting);
        assert!(engine.set_ready_state(a, true));
        assert_eq!(engine.status(), MatchStatus::Countdown);
        assert_eq!(engine.add_player(Uuid::new_v4()), Err(EngineError::Capacity));
    }

    #[test]
    fn unknown_identity_ready_is_ignored() {
        let (mut engine, _, _) = online_engine();
        assert!(!engine.set_ready_state(Uuid::new_v4(), true));
        assert_eq!(engine.status(), MatchStatus::Waiting);
    }

    #[test]
    fn countdown_takes_three_seconds_and_resets_positions() {
        let (mut engine, a, b) = online_engine();
        engine.set_ready_state(a, true);
        engine.set_ready_state(b, true);
        assert_eq!(engine.ball().x, 400.0);
        assert_eq!(engine.ball().y, 200.0);
        assert_eq!(engine.player(PlayerSlot::One).paddle_y, 160.0);

        assert!(!engine.advance(Duration::from_millis(2999)));
        assert_eq!(engine.status(), MatchStatus::Countdown);
        assert!(engine.advance(Duration::from_millis(1)));
        assert_eq!(engine.status(), MatchStatus::Playing);
    }

    #[test]
    fn moves_ignored_outside_play() {
        let (mut engine, _, _) = online_engine();
        engine.apply_move(PlayerSlot::One, Some(Direction::Up));
        assert_eq!(engine.player(PlayerSlot::One).paddle_y, 160.0);
        assert_eq!(engine.tick(), None);
    }

    #[test]
    fn move_clamps_and_zeroes_velocity() {
        let (mut engine, _, _) = playing_engine();
        for _ in 0..16 {
            engine.apply_move(PlayerSlot::One, Some(Direction::Up));
        }
        assert_eq!(engine.player(PlayerSlot::One).paddle_y, 0.0);
        assert_eq!(engine.player(PlayerSlot::One).paddle_velocity, 0.0);

        engine.apply_move(PlayerSlot::One, Some(Direction::Down));
        assert_eq!(engine.player(PlayerSlot::One).paddle_velocity, 10.0);
        engine.apply_move(PlayerSlot::One, None);
        assert_eq!(engine.player(PlayerSlot::One).paddle_velocity, 0.0);
    }

    #[test]
    fn dead_center_serve_returns_flat() {
        let (mut engine, _, _) = playing_engine();
        // Paddle at 160 with height 80 is centered on 200; a 10px ball at y=195 is too
        engine.set_ball(Ball { x: 400.0, y: 195.0, dx: -7.0, dy: 0.0, spin: 0.0 });
        let mut hit = false;
        for _ in 0..60 {
            engine.tick();
            if engine.ball().dx > 0.0 {
                hit = true;
                break;
            }
        }
        assert!(hit);
        let speed = engine.params().ball_speed * engine.speed_multiplier();
        assert!((engine.ball().dx - speed).abs() < 1e-9);
        assert_eq!(engine.ball().dy, 0.0);
        assert!((engine.speed_multiplier() - 1.03).abs() < 1e-12);
    }

    #[test]
    fn score_returns_to_waiting_and_clears_readiness() {
        let (mut engine, _, _) = playing_engine();
        engine.set_paddle_y(PlayerSlot::One, 0.0);
        engine.set_ball(Ball { x: 20.0, y: 300.0, dx: -7.0, dy: 0.0, spin: 0.0 });
        let event = (0..10).find_map(|_| engine.tick()).unwrap();
        assert_eq!(event, ScoreEvent { scorer: PlayerSlot::Two, score: 1, finished: false });
        assert_eq!(engine.status(), MatchStatus::Waiting);
        assert!(!engine.player(PlayerSlot::One).ready);
        assert_eq!(engine.player(PlayerSlot::One).score, 0);
    }

    #[test]
    fn reaching_max_score_finishes_for_good() {
        let params = GameParams { max_score: 1, ..GameParams::default() };
        let mut engine = SimulationEngine::new(GameMode::SinglePlayer, Difficulty::Easy, params, 3);
        let a = Uuid::new_v4();
        engine.add_player(a).unwrap();
        engine.set_ready_state(a, true);
        engine.advance(COUNTDOWN);
        engine.set_paddle_y(PlayerSlot::Two, 0.0);
        engine.set_ball(Ball { x: 770.0, y: 300.0, dx: 7.0, dy: 0.0, spin: 0.0 });

        let event = (0..10).find_map(|_| engine.tick()).unwrap();
        assert!(event.finished);
        assert_eq!(engine.status(), MatchStatus::Finished);
        assert_eq!(engine.winner(), Some(PlayerSlot::One));

        assert!(!engine.resume());
        assert!(!engine.set_ready_state(a, true));
        assert_eq!(engine.status(), MatchStatus::Finished);
    }

    #[test]
    fn pause_suppresses_ticks() {
        let (mut engine, _, _) = playing_engine();
        assert!(engine.pause());
        let before = *engine.ball();
        assert_eq!(engine.tick(), None);
        assert_eq!(*engine.ball(), before);
        assert!(engine.resume());
        assert_eq!(engine.status(), MatchStatus::Playing);
        assert!(!engine.resume());
    }

    #[test]
    fn resize_keeps_midpoint_and_bounds() {
        let (mut engine, _, _) = playing_engine();
        engine.set_paddle_height(PlayerSlot::Two, 120.0).unwrap();
        let p = engine.player(PlayerSlot::Two);
        assert_eq!(p.paddle_y, 140.0);
        assert_eq!(p.paddle_center(), 200.0);

        engine.set_paddle_y(PlayerSlot::Two, 0.0);
        engine.set_paddle_height(PlayerSlot::Two, 200.0).unwrap();
        assert_eq!(engine.player(PlayerSlot::Two).paddle_y, 0.0);

        assert!(matches!(
            engine.set_paddle_height(PlayerSlot::Two, 0.0),
            Err(EngineError::Validation(_))
        ));
    }

    fn direction_strategy() -> impl Strategy<Value = Option<Direction>> {
        prop_oneof![Just(Some(Direction::Up)), Just(Some(Direction::Down)), Just(None)]
    }

    proptest! {
        #[test]
        fn paddle_stays_in_bounds(moves in proptest::collection::vec(direction_strategy(), 1..200)) {
            let (mut engine, _, _) = playing_engine();
            for direction in moves {
                engine.apply_move(PlayerSlot::One, direction);
                let p = engine.player(PlayerSlot::One);
                prop_assert!(p.paddle_y >= 0.0);
                prop_assert!(p.paddle_y <= engine.params().game_height - p.paddle_height);
            }
        }

        #[test]
        fn ball_stays_between_walls(
            seed in any::<u64>(),
            moves in proptest::collection::vec((direction_strategy(), direction_strategy()), 1..600),
        ) {
            let mut engine = SimulationEngine::new(GameMode::OneVsOne, Difficulty::Local, GameParams::default(), seed);
            let a = Uuid::new_v4();
            engine.add_player(a).unwrap();
            engine.set_ready_state(a, true);
            engine.advance(COUNTDOWN);

            let mut last_multiplier = engine.speed_multiplier();
            for (one, two) in moves {
                if engine.status() == MatchStatus::Waiting {
                    engine.set_ready_state(a, true);
                    engine.advance(COUNTDOWN);
                    last_multiplier = engine.speed_multiplier();
                }
                engine.apply_move(PlayerSlot::One, one);
                engine.apply_move(PlayerSlot::Two, two);
                engine.tick();

                let ball = engine.ball();
                let max_y = engine.params().game_height - engine.params().ball_size;
                prop_assert!(ball.y >= 0.0 && ball.y <= max_y);
                prop_assert!(ball.spin.abs() <= engine.params().max_spin);
                prop_assert!(engine.speed_multiplier() >= last_multiplier);
                prop_assert!(engine.speed_multiplier() <= engine.params().max_speed_multiplier);
                last_multiplier = engine.speed_multiplier();
            }
        }
    }
}
