//! # Drive Mixer
//!
//! Converts driver stick input into left and right motor demands for a differential (skid steer)
//! drive.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::packet::MovementData;

use crate::params::DriveParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest magnitude of a motor demand produced by the mixer.
pub const MAX_DEMAND: i32 = 127;

/// Full scale of a normalised stick axis, used by the squared response curve.
const AXIS_SCALE: f64 = 128.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demands for both sides of the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveDems {
    pub left: i32,
    pub right: i32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveParams {

    /// Calculate the motor demands for one frame of driver input.
    ///
    /// The sticks are normalised, the forward and turn modifiers and any squared response curves
    /// are applied, and the result is mixed.
    pub fn demands(&self, movement: &MovementData) -> DriveDems {
        let sticks = movement.scale(self.raw_stick_max);

        let forward = shape(sticks.y, self.forward_mod, self.square_forward);
        let turn = shape(sticks.x, self.turn_mod, self.square_turn);

        mix(forward, turn, self.deadzone)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Mix a forward and turn demand into left and right demands.
///
/// If both inputs are inside the deadzone the output is zero. Outputs are clamped to
/// `[-MAX_DEMAND, MAX_DEMAND]`.
pub fn mix(forward: i32, turn: i32, deadzone: i32) -> DriveDems {
    if forward.abs() < deadzone && turn.abs() < deadzone {
        return DriveDems { left: 0, right: 0 };
    }

    let (left, right) = match (forward >= 0, turn >= 0) {
        (true, true) => (forward - turn, forward.max(turn)),
        (true, false) => (forward.max(-turn), forward + turn),
        (false, true) => (-(-forward).max(turn), forward + turn),
        (false, false) => (forward - turn, -(-forward).max(-turn)),
    };

    DriveDems {
        left: left.max(-MAX_DEMAND).min(MAX_DEMAND),
        right: right.max(-MAX_DEMAND).min(MAX_DEMAND),
    }
}

/// Squared response curve, keeps full scale at the extremes but gives finer control near centre.
pub fn square_scale(x: i32) -> i32 {
    let mag = ((x as f64 / AXIS_SCALE).powi(2) * AXIS_SCALE).round() as i32;
    mag * x.signum()
}

fn shape(axis: i32, modifier: f64, squared: bool) -> i32 {
    let modified = (axis as f64 * modifier).round() as i32;

    if squared {
        square_scale(modified)
    }
    else {
        modified
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dems(left: i32, right: i32) -> DriveDems {
        DriveDems { left, right }
    }

    #[test]
    fn test_mix_table() {
        assert_eq!(mix(0, 0, 10), dems(0, 0));
        assert_eq!(mix(100, 0, 10), dems(100, 100));
        assert_eq!(mix(100, 50, 10), dems(50, 100));
        assert_eq!(mix(-100, 0, 10), dems(-100, -100));
        assert_eq!(mix(100, -50, 10), dems(100, 50));
        assert_eq!(mix(-100, 50, 10), dems(-100, -50));
        assert_eq!(mix(-100, -50, 10), dems(-50, -100));
    }

    #[test]
    fn test_mix_deadzone() {
        for &(f, t) in &[(9, 9), (-9, 9), (0, -9), (-9, -9)] {
            assert_eq!(mix(f, t, 10), dems(0, 0));
        }

        // One axis outside the deadzone is enough
        assert_eq!(mix(10, 0, 10), dems(10, 10));
        assert_eq!(mix(5, 20, 10), dems(-15, 20));
    }

    #[test]
    fn test_mix_clamps_both_bounds() {
        assert_eq!(mix(127, -127, 0), dems(127, 0));
        assert_eq!(mix(100, 100, 0), dems(0, 100));
        assert_eq!(mix(127, 127, 0).right, 127);

        // forward - turn overflows on the negative side
        assert_eq!(mix(-128, 127, 0), dems(-127, -1));
        assert_eq!(mix(-100, -128, 0), dems(28, -127));
        assert_eq!(mix(-128, -1, 0), dems(-127, -127));

        // Past full scale on the positive side
        assert_eq!(mix(100, -100, 0).left, 100);
        assert_eq!(mix(200, -100, 0), dems(127, 100));
    }

    #[test]
    fn test_square_scale() {
        assert_eq!(square_scale(0), 0);
        assert_eq!(square_scale(128), 128);
        assert_eq!(square_scale(-128), -128);
        assert_eq!(square_scale(64), 32);
        assert_eq!(square_scale(-64), -32);
        assert_eq!(square_scale(10), 1);
    }

    #[test]
    fn test_demands() {
        let params = DriveParams {
            forward_mod: 1.0,
            turn_mod: 0.5,
            square_forward: false,
            square_turn: false,
            deadzone: 10,
            raw_stick_max: 1000,
        };

        let movement = MovementData {
            stick_x: 500,
            stick_y: 1000,
            buttons: vec![],
            axes: vec![],
        };

        // forward = 127, turn = round(64 * 0.5) = 32
        assert_eq!(params.demands(&movement), dems(95, 127));

        let squared = DriveParams { square_forward: true, ..params };
        let movement = MovementData { stick_x: 0, stick_y: 500, ..movement };

        // forward = 64 squared to 32
        assert_eq!(squared.demands(&movement), dems(32, 32));
    }
}
