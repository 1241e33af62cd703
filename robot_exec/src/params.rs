//! # Robot Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use thiserror::Error;

use comms_if::net::NetParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RobotExecParams {

    /// Name of this robot, used in logs
    pub robot_name: String,

    /// Control link parameters
    pub net: NetParams,

    pub watchdog: WatchdogParams,

    pub drive: DriveParams,

    /// The accessory fitted to this robot, if any
    #[serde(default)]
    pub accessory: AccessoryParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogParams {
    /// Period between watchdog ticks.
    ///
    /// Units: seconds
    pub tick_period_s: f64,

    /// Number of ticks without a decoded packet after which the motors are cut.
    pub timeout_ticks: u32,
}

/// Driver input shaping.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveParams {
    /// Multiplier applied to the forward axis before mixing
    pub forward_mod: f64,

    /// Multiplier applied to the turn axis before mixing
    pub turn_mod: f64,

    /// Apply the squared response curve to the forward axis
    pub square_forward: bool,

    /// Apply the squared response curve to the turn axis
    pub square_turn: bool,

    /// Inputs with both axes inside the deadzone stop the motors
    pub deadzone: i32,

    /// Raw stick value reported by the controller at full deflection
    pub raw_stick_max: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShooterParams {
    /// Output channel driving the shooter motor
    pub motor_channel: u8,

    /// PWM value applied while firing
    pub motor_speed: i32,

    /// Index of the button which fires
    pub fire_button: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GripperParams {
    /// Output channel of the grip servo
    pub grip_servo: u8,

    /// Open position of the grip servo
    pub grip_min: i32,

    /// Closed position of the grip servo
    pub grip_max: i32,

    /// Output channel of the lift servo
    pub lift_servo: u8,

    /// Lowest position of the lift servo
    pub lift_min: i32,

    /// Travel of the lift servo above `lift_min`
    pub lift_range: i32,

    /// Divisor applied to the lift axis each frame, larger is slower
    pub lift_mod: i32,

    /// Index of the button which toggles the grip
    pub toggle_button: usize,

    /// Index of the additional axis which drives the lift
    pub lift_axis: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Optional accessory fitted to the robot.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessoryParams {
    None,
    Shooter(ShooterParams),
    Gripper(GripperParams),
}

/// Parameter values which parse but can't be used.
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("watchdog.timeout_ticks must be at least 1")]
    ZeroWatchdogTimeout,

    #[error("watchdog.tick_period_s must be positive, found {0}")]
    InvalidTickPeriod(f64),

    #[error("drive.raw_stick_max must be positive, found {0}")]
    InvalidRawStickMax(i32),

    #[error("drive.{0} must be a finite value in -1.0..=1.0, found {1}")]
    InvalidDriveMod(&'static str, f64),

    #[error("accessory.lift_mod must be positive, found {0}")]
    InvalidLiftMod(i32),

    #[error("accessory.lift_range must not be negative, found {0}")]
    InvalidLiftRange(i32),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotExecParams {
    /// Check values the type system can't, so that nothing received later can push them into
    /// overflow or division by zero.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.watchdog.timeout_ticks == 0 {
            return Err(ParamsError::ZeroWatchdogTimeout)
        }
        if !(self.watchdog.tick_period_s > 0.0) {
            return Err(ParamsError::InvalidTickPeriod(self.watchdog.tick_period_s))
        }

        if self.drive.raw_stick_max <= 0 {
            return Err(ParamsError::InvalidRawStickMax(self.drive.raw_stick_max))
        }
        for &(name, value) in &[
            ("forward_mod", self.drive.forward_mod),
            ("turn_mod", self.drive.turn_mod),
        ] {
            if !value.is_finite() || value.abs() > 1.0 {
                return Err(ParamsError::InvalidDriveMod(name, value))
            }
        }

        if let AccessoryParams::Gripper(ref g) = self.accessory {
            if g.lift_mod <= 0 {
                return Err(ParamsError::InvalidLiftMod(g.lift_mod))
            }
            if g.lift_range < 0 {
                return Err(ParamsError::InvalidLiftRange(g.lift_range))
            }
        }

        Ok(())
    }
}

impl GripperParams {
    /// Highest position of the lift servo
    pub fn lift_max(&self) -> i32 {
        self.lift_min.saturating_add(self.lift_range)
    }
}

impl Default for AccessoryParams {
    fn default() -> Self {
        AccessoryParams::None
    }
}

impl Default for WatchdogParams {
    fn default() -> Self {
        Self {
            tick_period_s: 1.0,
            timeout_ticks: 3,
        }
    }
}

impl Default for DriveParams {
    fn default() -> Self {
        Self {
            forward_mod: 1.0,
            turn_mod: 1.0,
            square_forward: false,
            square_turn: false,
            deadzone: 10,
            raw_stick_max: 128,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_params_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../params/robot_exec.default.toml");
        let params_str = std::fs::read_to_string(path).unwrap();
        let params: RobotExecParams = toml::from_str(&params_str).unwrap();

        assert_eq!(params.validate(), Ok(()));
    }

    #[test]
    fn test_validate() {
        let base: RobotExecParams = toml::from_str(concat!(
            "robot_name = \"test\"\n",
            "[net]\n",
            "[watchdog]\ntick_period_s = 1.0\ntimeout_ticks = 3\n",
            "[drive]\nforward_mod = 1.0\nturn_mod = 0.8\nsquare_forward = false\n",
            "square_turn = false\ndeadzone = 10\nraw_stick_max = 128\n",
            "[accessory]\ntype = \"gripper\"\ngrip_servo = 0\ngrip_min = 0\ngrip_max = 90\n",
            "lift_servo = 1\nlift_min = 0\nlift_range = 90\nlift_mod = 4096\n",
            "toggle_button = 2\nlift_axis = 0\n",
        )).unwrap();
        assert_eq!(base.validate(), Ok(()));

        fn gripper(p: &mut RobotExecParams) -> &mut GripperParams {
            match p.accessory {
                AccessoryParams::Gripper(ref mut g) => g,
                _ => panic!("Expected a gripper"),
            }
        }

        let mut p = base.clone();
        gripper(&mut p).lift_mod = 0;
        assert_eq!(p.validate(), Err(ParamsError::InvalidLiftMod(0)));

        let mut p = base.clone();
        gripper(&mut p).lift_mod = -4;
        assert_eq!(p.validate(), Err(ParamsError::InvalidLiftMod(-4)));

        let mut p = base.clone();
        gripper(&mut p).lift_range = -1;
        assert_eq!(p.validate(), Err(ParamsError::InvalidLiftRange(-1)));

        let mut p = base.clone();
        p.watchdog.timeout_ticks = 0;
        assert_eq!(p.validate(), Err(ParamsError::ZeroWatchdogTimeout));

        let mut p = base.clone();
        p.drive.raw_stick_max = 0;
        assert_eq!(p.validate(), Err(ParamsError::InvalidRawStickMax(0)));

        let mut p = base.clone();
        p.drive.turn_mod = 1.0e12;
        assert!(matches!(p.validate(), Err(ParamsError::InvalidDriveMod("turn_mod", _))));
    }

    #[test]
    fn test_lift_max_saturates() {
        let g = GripperParams {
            grip_servo: 0,
            grip_min: 0,
            grip_max: 0,
            lift_servo: 1,
            lift_min: i32::MAX - 1,
            lift_range: 90,
            lift_mod: 1,
            toggle_button: 0,
            lift_axis: 0,
        };
        assert_eq!(g.lift_max(), i32::MAX);
    }

    #[test]
    fn test_accessory_variants() {
        let shooter: AccessoryParams = toml::from_str(
            "type = \"shooter\"\nmotor_channel = 0\nmotor_speed = 100\nfire_button = 2\n"
        ).unwrap();
        assert!(matches!(shooter, AccessoryParams::Shooter(ShooterParams { fire_button: 2, .. })));

        let none: AccessoryParams = toml::from_str("type = \"none\"\n").unwrap();
        assert!(matches!(none, AccessoryParams::None));

        assert!(toml::from_str::<AccessoryParams>("type = \"cannon\"\n").is_err());
    }
}
