//! # Robot library
//!
//! Everything the robot executable needs to turn packets from the field controller into motor
//! commands: the safety state machine, the drive mixer, the watchdog and the actuator drivers.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Motor board drivers
pub mod actuator;

/// Packet dispatch and the operating state machine
pub mod controller;

/// Differential drive mixing
pub mod drive;

/// Parameters for the robot executable
pub mod params;

/// Loss of command watchdog
pub mod watchdog;
