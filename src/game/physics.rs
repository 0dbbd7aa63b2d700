//! Ball physics: spin curve, wall and paddle bounces

use super::engine::Ball;
use super::PlayerSlot;

/// Tunable physics constants for one match
#[derive(Debug, Clone, Copy)]
pub struct GameParams {
    pub game_width: f64,
    pub game_height: f64,

    pub paddle_width: f64,
    pub paddle_height: f64,
    /// Paddle travel per tick while a direction is held
    pub paddle_speed: f64,

    pub ball_size: f64,
    /// Serve speed; also the base speed scaled by the multiplier on paddle hits
    pub ball_speed: f64,
    /// Floor for |dx| after a spin-adjusted wall bounce
    pub min_ball_dx: f64,
    pub max_speed_multiplier: f64,
    pub speed_increase_factor: f64,

    pub max_spin: f64,
    /// Trajectory curve per tick
    pub spin_curve_factor: f64,
    /// Effect of spin on dx at a wall bounce
    pub spin_bounce_factor: f64,
    /// Paddle velocity to spin transfer on a hit
    pub spin_intensity_factor: f64,
    /// Spin decay on static surfaces
    pub spin_reduction_factor: f64,

    pub max_score: u32,
}

impl Default for GameParams {
    fn default() -> Self {
        Self {
            game_width: 800.0,
            game_height: 400.0,
            paddle_width: 10.0,
            paddle_height: 80.0,
            paddle_speed: 10.0,
            ball_size: 10.0,
            ball_speed: 7.0,
            min_ball_dx: 5.0,
            max_speed_multiplier: 4.0,
            speed_increase_factor: 1.03,
            max_spin: 15.0,
            spin_curve_factor: 0.0015,
            spin_bounce_factor: 0.3,
            spin_intensity_factor: 0.8,
            spin_reduction_factor: 0.7,
            max_score: 10,
        }
    }
}

/// Spin magnitudes below this snap to zero after decay
pub const SPIN_SNAP_THRESHOLD: f64 = 0.1;

/// Largest departure angle off a paddle (45 degrees)
pub const MAX_BOUNCE_ANGLE: f64 = std::f64::consts::FRAC_PI_4;

/// Horizontal wall the ball bounced off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wall {
    Top,
    Bottom,
}

/// Result of resolving a paddle hit
#[derive(Debug, Clone, Copy)]
pub struct PaddleBounce {
    pub bounce_angle: f64,
    pub speed_multiplier: f64,
}

/// Stateless ball physics
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Bend the trajectory according to the current spin
    pub fn curve_for_spin(ball: &mut Ball, params: &GameParams) {
        if ball.spin == 0.0 {
            return;
        }
        ball.dy += ball.dx.signum() * ball.spin * params.spin_curve_factor * ball.dx.abs();
    }

    /// Clamp the ball inside the vertical bounds and reflect it.
    /// Returns the wall that was hit, if any.
    pub fn resolve_wall_collision(ball: &mut Ball, params: &GameParams) -> Option<Wall> {
        let floor = params.game_height - params.ball_size;

        let wall = if ball.y <= 0.0 {
            ball.y = 0.0;
            Wall::Top
        } else if ball.y >= floor {
            ball.y = floor;
            Wall::Bottom
        } else {
            return None;
        };

        ball.dy = -ball.dy;
        Self::adjust_bounce_for_spin(ball, wall, params);
        Some(wall)
    }

    /// Spin trades against horizontal speed when the ball meets a wall
    fn adjust_bounce_for_spin(ball: &mut Ball, wall: Wall, params: &GameParams) {
        if ball.spin == 0.0 {
            return;
        }

        let moving_right = ball.dx > 0.0;
        let delta = ball.spin * params.spin_bounce_factor;
        match wall {
            Wall::Top => ball.dx -= delta,
            Wall::Bottom => ball.dx += delta,
        }

        // Never let the bounce stall or reverse horizontal travel
        if moving_right {
            ball.dx = ball.dx.max(params.min_ball_dx);
        } else {
            ball.dx = ball.dx.min(-params.min_ball_dx);
        }

        Self::decay_spin(ball, params);
    }

    /// Reduce spin after contact with a static surface
    pub fn decay_spin(ball: &mut Ball, params: &GameParams) {
        ball.spin *= params.spin_reduction_factor;
        if ball.spin.abs() < SPIN_SNAP_THRESHOLD {
            ball.spin = 0.0;
        }
    }

    /// Whether the ball overlaps the paddle of `slot`, whose top edge is at `paddle_y`
    pub fn touches_paddle(
        ball: &Ball,
        slot: PlayerSlot,
        paddle_y: f64,
        paddle_height: f64,
        params: &GameParams,
    ) -> bool {
        let crosses_face = match slot {
            PlayerSlot::One => ball.x <= params.paddle_width,
            PlayerSlot::Two => ball.x + params.ball_size >= params.game_width - params.paddle_width,
        };
        crosses_face
            && ball.y + params.ball_size >= paddle_y
            && ball.y <= paddle_y + paddle_height
    }

    /// Send the ball back off a paddle.
    ///
    /// The departure angle is proportional to how far from the paddle's
    /// center the ball struck, capped at 45 degrees. Every hit raises the
    /// speed multiplier up to its cap. A moving paddle adds spin; a still
    /// one bleeds it off.
    pub fn resolve_paddle_bounce(
        ball: &mut Ball,
        slot: PlayerSlot,
        paddle_y: f64,
        paddle_height: f64,
        paddle_velocity: f64,
        speed_multiplier: f64,
        params: &GameParams,
    ) -> PaddleBounce {
        // Sit the ball on the paddle face so it cannot tunnel through
        ball.x = match slot {
            PlayerSlot::One => params.paddle_width,
            PlayerSlot::Two => params.game_width - params.paddle_width - params.ball_size,
        };

        let half = paddle_height / 2.0;
        let ball_center = ball.y + params.ball_size / 2.0;
        let paddle_center = paddle_y + half;
        let relative_intersect = ((ball_center - paddle_center) / half).clamp(-1.0, 1.0);
        let bounce_angle = relative_intersect * MAX_BOUNCE_ANGLE;

        let speed_multiplier = (speed_multiplier * params.speed_increase_factor)
            .min(params.max_speed_multiplier);
        let new_speed = params.ball_speed * speed_multiplier;

        if paddle_velocity != 0.0 {
            let spin_sign = match slot {
                PlayerSlot::One => -1.0,
                PlayerSlot::Two => 1.0,
            };
            ball.spin = (ball.spin + paddle_velocity * spin_sign * params.spin_intensity_factor)
                .clamp(-params.max_spin, params.max_spin);
        } else {
            Self::decay_spin(ball, params);
        }

        let direction = match slot {
            PlayerSlot::One => 1.0,
            PlayerSlot::Two => -1.0,
        };
        ball.dx = direction * new_speed * bounce_angle.cos();
        ball.dy = new_speed * bounce_angle.sin();

        PaddleBounce {
            bounce_angle,
            speed_multiplier,
        }
    }
}
