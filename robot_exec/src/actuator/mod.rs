//! # Actuator Module
//!
//! This module provides a unified interface to the board which drives the robot's motors and
//! servos, so that the controller and watchdog can be used with the real hardware or a simulated
//! board.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`Actuator`] implementation for the 4tronix Picon Zero.
pub mod picon_zero;

/// In-memory [`Actuator`] used off the robot and in tests.
pub mod sim;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use picon_zero::PiconZero;
pub use sim::SimBoard;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing motor driver boards.
///
/// Implementors must serialise their own bus access, the watchdog calls [`Actuator::cleanup`]
/// from its own thread while the controller is commanding the board.
pub trait Actuator: Send + Sync {

    /// Reset the board to its default configuration, stopping all outputs.
    fn init(&self) -> Result<(), ActuatorError>;

    /// Set the demand of one motor, in the range `-128..=127`.
    fn set_motor(&self, motor: Motor, value: i32) -> Result<(), ActuatorError>;

    /// Set the value of an output channel, interpreted according to the channel's [`OutputMode`].
    fn set_output(&self, channel: u8, value: i32) -> Result<(), ActuatorError>;

    /// Configure an output channel.
    fn set_output_config(&self, channel: u8, mode: OutputMode) -> Result<(), ActuatorError>;

    /// Zero all motors and outputs. This is the safety cutoff.
    fn cleanup(&self) -> Result<(), ActuatorError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("Bus transaction failed after {0} attempts")]
    ExceededRetries(usize),

    #[error("{0} is out of range")]
    InvalidRange(String),

    #[error("Unsupported board or firmware: {0}")]
    Unsupported(String),
}

/// The two motor channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Motor {
    /// Left side
    A = 0,

    /// Right side
    B = 1,
}

/// Configuration of an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// On/off
    Digital = 0,

    /// Percentage of on time
    Pwm = 1,

    /// Position in degrees
    Servo = 2,

    /// WS2812B pixel chain
    Neopixel = 3,
}
