//! Kinematic move timing
//!
//! A move is treated as one-dimensional along its displacement vector, with
//! a symmetric acceleration/deceleration ramp at a fixed maximum
//! acceleration. Short moves never reach cruise speed and get a triangular
//! profile; longer ones a trapezoidal profile with a constant-speed coast.

use crate::config::KinematicsConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Zero-length move
    Stationary,
    Triangular,
    Trapezoidal,
}

/// Timing of a single move
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovePlan {
    /// mm
    pub distance: f64,
    /// Feedrate the move was planned with (mm/min)
    pub feedrate: f64,
    /// mm/s
    pub cruise_speed: f64,
    /// Duration of one ramp (s)
    pub accel_time: f64,
    /// Length of one ramp (mm)
    pub accel_distance: f64,
    pub coast_distance: f64,
    pub coast_time: f64,
    /// Total duration (s)
    pub move_time: f64,
    pub profile: Profile,
}

impl MovePlan {
    /// False when the numbers overflowed and the move cannot be timed
    pub fn is_finite(&self) -> bool {
        self.distance.is_finite() && self.move_time.is_finite()
    }
}

/// Euclidean distance between two points
pub fn distance(from: [f64; 3], to: [f64; 3]) -> f64 {
    from.iter()
        .zip(to.iter())
        .map(|(a, b)| (b - a) * (b - a))
        .sum::<f64>()
        .sqrt()
}

/// Time a move of `distance` mm at `feedrate` mm/min
pub fn plan_motion(distance: f64, feedrate: f64, max_acceleration: f64) -> MovePlan {
    let cruise_speed = feedrate / 60.0;
    if distance <= 0.0 {
        return MovePlan {
            distance: 0.0,
            feedrate,
            cruise_speed,
            accel_time: 0.0,
            accel_distance: 0.0,
            coast_distance: 0.0,
            coast_time: 0.0,
            move_time: 0.0,
            profile: Profile::Stationary,
        };
    }

    let accel_time = cruise_speed / max_acceleration;
    let accel_distance = 0.5 * max_acceleration * accel_time * accel_time;

    if 2.0 * accel_distance >= distance {
        // Peak speed stays below cruise; ramp up to the midpoint and back down
        let ramp_time = (distance / max_acceleration).sqrt();
        MovePlan {
            distance,
            feedrate,
            cruise_speed,
            accel_time: ramp_time,
            accel_distance: distance / 2.0,
            coast_distance: 0.0,
            coast_time: 0.0,
            move_time: 2.0 * ramp_time,
            profile: Profile::Triangular,
        }
    } else {
        let coast_distance = distance - 2.0 * accel_distance;
        let coast_time = coast_distance / cruise_speed;
        MovePlan {
            distance,
            feedrate,
            cruise_speed,
            accel_time,
            accel_distance,
            coast_distance,
            coast_time,
            move_time: 2.0 * accel_time + coast_time,
            profile: Profile::Trapezoidal,
        }
    }
}

/// Planner with feedrate memory
#[derive(Debug, Clone)]
pub struct KinematicPlanner {
    max_acceleration: f64,
    default_feedrate: f64,
    last_feedrate: Option<f64>,
}

impl KinematicPlanner {
    pub fn new(config: &KinematicsConfig) -> Self {
        Self {
            max_acceleration: config.max_acceleration,
            default_feedrate: config.default_feedrate,
            last_feedrate: None,
        }
    }

    /// Feedrate the next move without an F word will use (mm/min)
    pub fn feedrate(&self) -> f64 {
        self.last_feedrate.unwrap_or(self.default_feedrate)
    }

    /// Remember a feedrate; zero and negative values are ignored
    pub fn set_feedrate(&mut self, feedrate: f64) {
        if feedrate.is_finite() && feedrate > 0.0 {
            self.last_feedrate = Some(feedrate);
        }
    }

    pub fn max_acceleration(&self) -> f64 {
        self.max_acceleration
    }

    /// Time a move. A feedrate that makes the plan overflow is not remembered.
    pub fn plan(&mut self, from: [f64; 3], to: [f64; 3], feedrate: Option<f64>) -> MovePlan {
        let previous = self.last_feedrate;
        if let Some(feedrate) = feedrate {
            self.set_feedrate(feedrate);
        }
        let plan = plan_motion(distance(from, to), self.feedrate(), self.max_acceleration);
        if !plan.is_finite() {
            self.last_feedrate = previous;
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_trapezoidal_reference_move() {
        let plan = plan_motion(100.0, 6000.0, 1000.0);
        assert_eq!(plan.profile, Profile::Trapezoidal);
        assert!(close(plan.cruise_speed, 100.0));
        assert!(close(plan.accel_time, 0.1));
        assert!(close(plan.accel_distance, 5.0));
        assert!(close(plan.coast_distance, 90.0));
        assert!(close(plan.coast_time, 0.9));
        assert!(close(plan.move_time, 1.1));
    }

    #[test]
    fn test_triangular_short_move() {
        // 100 mm/s needs 10 mm of ramps; 4 mm never reaches cruise
        let plan = plan_motion(4.0, 6000.0, 1000.0);
        assert_eq!(plan.profile, Profile::Triangular);
        assert!(close(plan.move_time, 2.0 * (4.0f64 / 1000.0).sqrt()));
        assert_eq!(plan.coast_time, 0.0);
    }

    #[test]
    fn test_zero_distance_takes_no_time() {
        let plan = plan_motion(0.0, 1500.0, 1000.0);
        assert_eq!(plan.move_time, 0.0);
        assert_eq!(plan.profile, Profile::Stationary);

        let mut planner = KinematicPlanner::new(&KinematicsConfig::default());
        let plan = planner.plan([1.0, 2.0, 3.0], [1.0, 2.0, 3.0], Some(9000.0));
        assert_eq!(plan.move_time, 0.0);
    }

    #[test]
    fn test_feedrate_memory() {
        let mut planner = KinematicPlanner::new(&KinematicsConfig::default());
        assert_eq!(planner.feedrate(), 1000.0);

        let plan = planner.plan([0.0; 3], [10.0, 0.0, 0.0], Some(3000.0));
        assert_eq!(plan.feedrate, 3000.0);
        let plan = planner.plan([0.0; 3], [10.0, 0.0, 0.0], None);
        assert_eq!(plan.feedrate, 3000.0);
        let plan = planner.plan([0.0; 3], [10.0, 0.0, 0.0], Some(0.0));
        assert_eq!(plan.feedrate, 3000.0);
    }

    #[test]
    fn test_overflowing_plans_are_flagged() {
        let huge = "9".repeat(200).parse::<f64>().unwrap();
        assert!(huge.is_finite());
        assert!(!distance([0.0; 3], [huge, 0.0, 0.0]).is_finite());

        let mut planner = KinematicPlanner::new(&KinematicsConfig::default());
        planner.set_feedrate(3000.0);
        let plan = planner.plan([0.0; 3], [10.0, 0.0, 0.0], Some(1e-320));
        assert!(!plan.is_finite());
        assert_eq!(planner.feedrate(), 3000.0);
        assert!(planner.plan([0.0; 3], [10.0, 0.0, 0.0], None).is_finite());
    }

    #[test]
    fn test_distance_is_euclidean() {
        assert!(close(distance([0.0, 0.0, 0.0], [3.0, 4.0, 12.0]), 13.0));
    }
}
