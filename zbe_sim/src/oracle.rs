//! Ground truth oracle for simulation.
//!
//! The Oracle knows where the vehicle really is:
//! - Route kinematics (constant speed along a polyline of waypoints)
//! - GPS fix generation (Gaussian noise in meters, optional dropouts)

use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use zbe_core::zbe_geometry::{haversine_meters, Point};
use zbe_env::Position;

/// Meters per degree of latitude (spherical approximation)
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// The Oracle - drives a vehicle along a route and reports noisy fixes.
pub struct RouteOracle {
    /// RNG for fix noise and dropouts
    physics_rng: ChaCha8Rng,

    waypoints: Vec<Point>,

    /// Cumulative route length at each waypoint (meters)
    cumulative_m: Vec<f64>,

    speed_mps: f64,

    /// Distance covered so far (meters)
    travelled_m: f64,

    /// Current simulation time (seconds)
    current_time: f64,

    /// Fix noise (1 sigma, meters); `None` means exact fixes
    noise: Option<Normal<f64>>,
    noise_std_m: f64,

    /// Probability that a fix is lost
    dropout: f64,
}

impl RouteOracle {
    /// Creates an oracle driving `waypoints` at `speed_mps`.
    ///
    /// A single waypoint models a parked vehicle.
    pub fn new(physics_seed: u64, waypoints: Vec<Point>, speed_mps: f64) -> Self {
        let mut cumulative_m = Vec::with_capacity(waypoints.len());
        let mut total = 0.0;
        for (i, p) in waypoints.iter().enumerate() {
            if i > 0 {
                total += haversine_meters(waypoints[i - 1], *p);
            }
            cumulative_m.push(total);
        }

        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            waypoints,
            cumulative_m,
            speed_mps,
            travelled_m: 0.0,
            current_time: 0.0,
            noise: None,
            noise_std_m: 0.0,
            dropout: 0.0,
        }
    }

    /// Sets the fix noise standard deviation (meters).
    pub fn set_position_noise(&mut self, std_dev_m: f64) {
        self.noise = Normal::new(0.0, std_dev_m).ok().filter(|_| std_dev_m > 0.0);
        self.noise_std_m = std_dev_m.max(0.0);
    }

    /// Sets the probability of losing a fix.
    pub fn set_dropout(&mut self, probability: f64) {
        self.dropout = probability.clamp(0.0, 1.0);
    }

    /// Advances the vehicle by dt seconds; it stops at the last waypoint.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        self.travelled_m = (self.travelled_m + self.speed_mps * dt).min(self.route_length_m());
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn route_length_m(&self) -> f64 {
        self.cumulative_m.last().copied().unwrap_or(0.0)
    }

    pub fn travelled_m(&self) -> f64 {
        self.travelled_m
    }

    pub fn finished(&self) -> bool {
        self.travelled_m >= self.route_length_m()
    }

    /// Exact position of the vehicle.
    pub fn true_position(&self) -> Point {
        let Some(&first) = self.waypoints.first() else {
            return Point::new(0.0, 0.0);
        };

        let segment = self
            .cumulative_m
            .windows(2)
            .position(|w| self.travelled_m <= w[1]);

        match segment {
            Some(i) => {
                let (start, end) = (self.waypoints[i], self.waypoints[i + 1]);
                let len = self.cumulative_m[i + 1] - self.cumulative_m[i];
                let t = if len > 0.0 {
                    (self.travelled_m - self.cumulative_m[i]) / len
                } else {
                    0.0
                };
                let a = Vector2::new(start.lat, start.lng);
                let b = Vector2::new(end.lat, end.lng);
                let p = a.lerp(&b, t);
                Point::new(p.x, p.y)
            }
            None => self.waypoints.last().copied().unwrap_or(first),
        }
    }

    /// A GPS fix stamped `timestamp_ms`, or `None` when the fix is lost.
    pub fn fix(&mut self, timestamp_ms: u64) -> Option<Position> {
        if self.dropout > 0.0 && self.physics_rng.gen_bool(self.dropout) {
            return None;
        }

        let truth = self.true_position();
        let (north_m, east_m) = match &self.noise {
            Some(normal) => (
                normal.sample(&mut self.physics_rng),
                normal.sample(&mut self.physics_rng),
            ),
            None => (0.0, 0.0),
        };

        let lat = truth.lat + north_m / METERS_PER_DEG_LAT;
        let lng = truth.lng + east_m / (METERS_PER_DEG_LAT * truth.lat.to_radians().cos());
        Some(Position::new(lat, lng, self.noise_std_m, timestamp_ms))
    }
}
