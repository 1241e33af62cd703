//! Simulated motor board

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, MutexGuard, PoisonError};
use log::trace;

use super::{Actuator, ActuatorError, Motor, OutputMode};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const NUM_OUTPUTS: usize = 6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A board which keeps its outputs in memory.
///
/// Used when the executable runs somewhere other than the robot, and to observe what the
/// controller commands in tests.
#[derive(Default)]
pub struct SimBoard {
    state: Mutex<SimState>,
}

/// Snapshot of a [`SimBoard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimState {
    pub motors: [i32; 2],
    pub outputs: [i32; NUM_OUTPUTS],
    pub modes: [OutputMode; NUM_OUTPUTS],

    /// Number of `init` calls
    pub num_inits: usize,

    /// Number of `cleanup` calls
    pub num_cleanups: usize,

    /// Number of `set_motor` calls
    pub num_motor_sets: usize,

    /// When set every call fails as if the bus were down
    pub failing: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SimState {
    fn default() -> Self {
        Self {
            motors: [0; 2],
            outputs: [0; NUM_OUTPUTS],
            modes: [OutputMode::Digital; NUM_OUTPUTS],
            num_inits: 0,
            num_cleanups: 0,
            num_motor_sets: 0,
            failing: false,
        }
    }
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the current board state.
    pub fn state(&self) -> SimState {
        self.lock().clone()
    }

    /// Make every following call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_checked(&self) -> Result<MutexGuard<'_, SimState>, ActuatorError> {
        let state = self.lock();
        if state.failing {
            Err(ActuatorError::ExceededRetries(1))
        }
        else {
            Ok(state)
        }
    }

    fn output_index(channel: u8) -> Result<usize, ActuatorError> {
        let index = channel as usize;
        if index < NUM_OUTPUTS {
            Ok(index)
        }
        else {
            Err(ActuatorError::InvalidRange(format!("Output channel {}", channel)))
        }
    }
}

impl SimState {
    fn zero(&mut self) {
        self.motors = [0; 2];
        self.outputs = [0; NUM_OUTPUTS];
        self.modes = [OutputMode::Digital; NUM_OUTPUTS];
    }
}

impl Actuator for SimBoard {
    fn init(&self) -> Result<(), ActuatorError> {
        let mut state = self.lock_checked()?;
        state.zero();
        state.num_inits += 1;
        Ok(())
    }

    fn set_motor(&self, motor: Motor, value: i32) -> Result<(), ActuatorError> {
        if value < -128 || value > 127 {
            return Err(ActuatorError::InvalidRange(format!("Motor value {}", value)))
        }

        let mut state = self.lock_checked()?;
        trace!("Sim motor {:?} <- {}", motor, value);
        state.motors[motor as usize] = value;
        state.num_motor_sets += 1;
        Ok(())
    }

    fn set_output(&self, channel: u8, value: i32) -> Result<(), ActuatorError> {
        let index = Self::output_index(channel)?;
        let mut state = self.lock_checked()?;
        trace!("Sim output {} <- {}", channel, value);
        state.outputs[index] = value;
        Ok(())
    }

    fn set_output_config(&self, channel: u8, mode: OutputMode) -> Result<(), ActuatorError> {
        let index = Self::output_index(channel)?;
        let mut state = self.lock_checked()?;
        state.modes[index] = mode;
        Ok(())
    }

    fn cleanup(&self) -> Result<(), ActuatorError> {
        let mut state = self.lock_checked()?;
        state.zero();
        state.num_cleanups += 1;
        Ok(())
    }
}
