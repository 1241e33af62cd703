//! Accessory control
//!
//! Some robots carry a shooter (a motor run while a button is held) or a gripper (a grip servo
//! toggled by a button and a lift servo driven by an axis). Accessories are driven from the same
//! movement frames as the drive, independently of it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::packet::MovementData;
use log::debug;

use crate::{
    actuator::{Actuator, ActuatorError, OutputMode},
    params::{AccessoryParams, GripperParams, ShooterParams},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Shooter {
    params: ShooterParams,
}

pub struct Gripper {
    params: GripperParams,

    /// Whether the grip is currently closed (at `grip_max`)
    closed: bool,

    /// State of the toggle button in the previous frame
    toggle_prev: bool,

    /// Current lift servo position
    lift_pos: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

pub enum Accessory {
    None,
    Shooter(Shooter),
    Gripper(Gripper),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Accessory {
    pub fn from_params(params: &AccessoryParams) -> Self {
        match params {
            AccessoryParams::None => Accessory::None,
            AccessoryParams::Shooter(p) => Accessory::Shooter(Shooter {
                params: p.clone(),
            }),
            AccessoryParams::Gripper(p) => Accessory::Gripper(Gripper {
                params: p.clone(),
                closed: false,
                toggle_prev: false,
                lift_pos: p.lift_min,
            }),
        }
    }

    /// Configure the accessory's output channels and move it to its rest position.
    pub fn setup(&mut self, actuator: &dyn Actuator) -> Result<(), ActuatorError> {
        match self {
            Accessory::None => Ok(()),
            Accessory::Shooter(s) => {
                actuator.set_output_config(s.params.motor_channel, OutputMode::Pwm)
            },
            Accessory::Gripper(g) => {
                g.closed = false;
                g.toggle_prev = false;
                g.lift_pos = g.params.lift_min;

                actuator.set_output_config(g.params.lift_servo, OutputMode::Servo)?;
                actuator.set_output(g.params.lift_servo, g.params.lift_min)?;
                actuator.set_output_config(g.params.grip_servo, OutputMode::Servo)?;
                actuator.set_output(g.params.grip_servo, g.params.grip_min)
            }
        }
    }

    /// Drive the accessory from one movement frame.
    pub fn update(
        &mut self,
        movement: &MovementData,
        actuator: &dyn Actuator
    ) -> Result<(), ActuatorError> {
        match self {
            Accessory::None => Ok(()),
            Accessory::Shooter(s) => s.update(movement, actuator),
            Accessory::Gripper(g) => g.update(movement, actuator),
        }
    }
}

impl Shooter {
    fn update(&self, movement: &MovementData, actuator: &dyn Actuator) -> Result<(), ActuatorError> {
        let speed = if movement.button(self.params.fire_button) {
            self.params.motor_speed
        }
        else {
            0
        };

        actuator.set_output(self.params.motor_channel, speed)
    }
}

impl Gripper {
    fn update(&mut self, movement: &MovementData, actuator: &dyn Actuator) -> Result<(), ActuatorError> {
        // Grip toggles on the rising edge of the button
        let toggle = movement.button(self.params.toggle_button);
        let rising = toggle && !self.toggle_prev;
        self.toggle_prev = toggle;

        if rising {
            self.closed = !self.closed;
            debug!("Gripper {}", if self.closed { "closing" } else { "opening" });
            actuator.set_output(self.params.grip_servo, self.grip_pos())?;
        }

        // Lift integrates the axis. Axis values come off the wire so every step saturates.
        let step = movement.axis(self.params.lift_axis)
            .checked_div(self.params.lift_mod)
            .unwrap_or(0);
        self.lift_pos = self.lift_pos
            .saturating_add(step)
            .max(self.params.lift_min)
            .min(self.params.lift_max());

        actuator.set_output(self.params.lift_servo, self.lift_pos)
    }

    fn grip_pos(&self) -> i32 {
        if self.closed {
            self.params.grip_max
        }
        else {
            self.params.grip_min
        }
    }
}
