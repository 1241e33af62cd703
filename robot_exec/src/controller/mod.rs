//! # Controller Module
//!
//! The robot controller consumes decoded packets from the control link, runs the robot's safety
//! state machine and commands the actuators.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Operating state machine and packet dispatch
pub mod state;

/// Optional shooter or gripper fitted to the robot
pub mod accessory;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use accessory::Accessory;
pub use state::{OperatingState, RobotController};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::TransportLink,
    packet::{DecodeError, EncodeError},
};

use crate::actuator::ActuatorError;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The controller's view of the control link.
pub trait PacketLink {
    /// Pop the oldest received frame, never blocks.
    fn next_frame(&self) -> Option<String>;

    /// Send an encoded packet, best effort.
    fn send(&self, bytes: Vec<u8>);

    /// Returns true once after the link has dropped a connection.
    fn take_rerun_setup(&self) -> bool;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("Could not decode the packet: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("Could not encode the reply: {0}")]
    EncodeError(#[from] EncodeError),

    #[error("Actuator error: {0}")]
    ActuatorError(#[from] ActuatorError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PacketLink for TransportLink {
    fn next_frame(&self) -> Option<String> {
        TransportLink::next_frame(self)
    }

    fn send(&self, bytes: Vec<u8>) {
        TransportLink::send(self, bytes)
    }

    fn take_rerun_setup(&self) -> bool {
        TransportLink::take_rerun_setup(self)
    }
}
