//! build intent validation.
//!
//! the boundary contract of the build pipeline: anything that reaches the
//! draw code has passed these checks, so drawing itself is total. each check
//! maps to one typed rejection code on the wire.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use nalgebra::Point3;

use carve_common::{
    net::{BuildIntent, BuildResult},
    sdf::BuildShape,
};

use crate::config::ServerConfig;

/// sliding-window rate limiter per player. an explicit handle owned by the
/// server, not a global.
pub struct RateLimiter {
    limit: u32,
    window_secs: f64,
    history: HashMap<u16, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window_secs: f64) -> Self {
        Self {
            limit,
            window_secs,
            history: HashMap::new(),
        }
    }

    pub fn check(&mut self, player: u16, now: Instant) -> bool {
        let history = self.history.entry(player).or_default();
        while let Some(&front) = history.front() {
            if now.duration_since(front).as_secs_f64() > self.window_secs {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() >= self.limit as usize {
            return false;
        }
        history.push_back(now);
        true
    }

    pub fn forget(&mut self, player: u16) {
        self.history.remove(&player);
    }
}

/// size sanity: every relevant axis must be positive and nothing may exceed
/// the cap. spheres and cylinders don't extrude in Z, so `size.z` is free.
fn size_is_valid(intent: &BuildIntent, max_size: f32) -> bool {
    let size = intent.size;
    if size.x > max_size || size.y > max_size || size.z > max_size {
        return false;
    }

    match intent.shape {
        BuildShape::Sphere => size.x > 0.0,
        BuildShape::Cylinder => size.x > 0.0 && size.y > 0.0,
        BuildShape::Cube | BuildShape::Prism => size.x > 0.0 && size.y > 0.0 && size.z > 0.0,
    }
}

pub struct Validator {
    config: ServerConfig,
    rate: RateLimiter,
}

impl Validator {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            rate: RateLimiter::new(config.rate_limit, config.rate_window),
            config: config.clone(),
        }
    }

    /// distance first, then shape sanity, then the rate limit (checked last
    /// so rejected intents don't consume budget).
    pub fn validate(
        &mut self,
        player: u16,
        player_pos: Point3<f32>,
        intent: &BuildIntent,
        now: Instant,
    ) -> BuildResult {
        if (intent.center - player_pos).norm() > self.config.build_distance_cap {
            return BuildResult::TooFar;
        }

        if !size_is_valid(intent, self.config.max_build_size) {
            return BuildResult::InvalidConfig;
        }
        if let Some(thickness) = intent.thickness {
            if thickness <= 0.0 {
                return BuildResult::InvalidConfig;
            }
        }

        if !self.rate.check(player, now) {
            return BuildResult::RateLimited;
        }

        BuildResult::Success
    }

    pub fn drop_player(&mut self, player: u16) {
        self.rate.forget(player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_common::edit::BuildMode;
    use nalgebra::{point, vector, UnitQuaternion};
    use std::time::Duration;

    fn intent(center: Point3<f32>, shape: BuildShape, size: nalgebra::Vector3<f32>) -> BuildIntent {
        BuildIntent {
            center,
            rotation: UnitQuaternion::identity(),
            shape,
            mode: BuildMode::Add,
            size,
            material: 1,
            thickness: None,
            closed: true,
            arc_sweep: None,
        }
    }

    fn validator() -> Validator {
        Validator::new(&ServerConfig::default())
    }

    #[test]
    fn accepts_a_reasonable_intent() {
        let mut validator = validator();
        let result = validator.validate(
            0,
            point![0.0, 0.0, 0.0],
            &intent(point![2.0, 0.0, 0.0], BuildShape::Sphere, vector![1.0, 1.0, 1.0]),
            Instant::now(),
        );
        assert_eq!(result, BuildResult::Success);
    }

    #[test]
    fn rejects_distant_builds() {
        let mut validator = validator();
        let result = validator.validate(
            0,
            point![0.0, 0.0, 0.0],
            &intent(point![50.0, 0.0, 0.0], BuildShape::Sphere, vector![1.0, 1.0, 1.0]),
            Instant::now(),
        );
        assert_eq!(result, BuildResult::TooFar);
    }

    #[test]
    fn rejects_degenerate_and_oversized_shapes() {
        let mut validator = validator();
        let now = Instant::now();
        let origin = point![0.0, 0.0, 0.0];

        let flat_cube = intent(origin, BuildShape::Cube, vector![1.0, 0.0, 1.0]);
        assert_eq!(validator.validate(0, origin, &flat_cube, now), BuildResult::InvalidConfig);

        let huge = intent(origin, BuildShape::Sphere, vector![25.0, 1.0, 1.0]);
        assert_eq!(validator.validate(0, origin, &huge, now), BuildResult::InvalidConfig);

        // spheres and cylinders don't need a positive Z
        let sphere = intent(origin, BuildShape::Sphere, vector![1.0, 1.0, 0.0]);
        assert_eq!(validator.validate(0, origin, &sphere, now), BuildResult::Success);
        let cylinder = intent(origin, BuildShape::Cylinder, vector![1.0, 2.0, 0.0]);
        assert_eq!(validator.validate(0, origin, &cylinder, now), BuildResult::Success);
    }

    #[test]
    fn rate_limit_is_a_sliding_window() {
        let mut limiter = RateLimiter::new(3, 1.0);
        let start = Instant::now();

        assert!(limiter.check(0, start));
        assert!(limiter.check(0, start + Duration::from_millis(100)));
        assert!(limiter.check(0, start + Duration::from_millis(200)));
        assert!(!limiter.check(0, start + Duration::from_millis(300)));

        // other players have their own budget
        assert!(limiter.check(1, start + Duration::from_millis(300)));

        // the window slides: the first intent ages out
        assert!(limiter.check(0, start + Duration::from_millis(1200)));
    }
}
