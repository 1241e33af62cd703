//! [`Actuator`] implementation for the 4tronix Picon Zero motor and output board.
//!
//! The board sits on an I2C bus and is driven through single byte register writes. Bus
//! transactions on the Pi are unreliable so every transaction is retried a bounded number of
//! times.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fmt::Debug,
    sync::{Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};
use embedded_hal::blocking::i2c::{Write, WriteRead};
use log::{debug, info, trace};

use super::{Actuator, ActuatorError, Motor, OutputMode};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// I2C address of the board
pub const DEFAULT_ADDRESS: u8 = 0x22;

/// Maximum number of attempts at each bus transaction
pub const RETRIES: usize = 10;

/// Board type reported in the revision word by a Picon Zero
const PICON_ZERO_BOARD_TYPE: u8 = 2;

/// Time the board needs to complete a reset
const RESET_DELAY: Duration = Duration::from_millis(10);

// Registers
const REG_REVISION: u8 = 0;
const REG_MOTOR_A: u8 = 0;
const REG_OUTCFG0: u8 = 2;
const REG_OUTPUT0: u8 = 8;
const REG_RESET: u8 = 20;

const NUM_OUTPUTS: u8 = 6;
const NEOPIXEL_CHANNEL: u8 = 5;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct PiconZero<I2C> {
    bus: Mutex<Bus<I2C>>,

    address: u8,
}

struct Bus<I2C> {
    i2c: I2C,

    /// Firmware revision read during init
    firmware: Option<u8>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> PiconZero<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E> + Send,
    E: Debug
{
    /// Create a new driver on the given bus at the default address.
    ///
    /// The board is not touched until [`Actuator::init`] is called.
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self {
            bus: Mutex::new(Bus {
                i2c,
                firmware: None,
            }),
            address,
        }
    }

    /// Firmware revision of the board, known once it has been initialised.
    pub fn firmware_revision(&self) -> Option<u8> {
        self.lock().firmware
    }

    /// Consume the driver, returning the underlying bus.
    pub fn release(self) -> I2C {
        self.bus.into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .i2c
    }

    fn lock(&self) -> MutexGuard<'_, Bus<I2C>> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a register, retrying on failure.
    fn write_reg(bus: &mut Bus<I2C>, address: u8, reg: u8, value: u8) -> Result<(), ActuatorError> {
        for attempt in 1..=RETRIES {
            match bus.i2c.write(address, &[reg, value]) {
                Ok(_) => {
                    trace!("Picon Zero reg {} <- {}", reg, value);
                    return Ok(())
                },
                Err(e) => debug!(
                    "Write of register {} failed (attempt {}/{}): {:?}",
                    reg, attempt, RETRIES, e
                )
            }
        }

        Err(ActuatorError::ExceededRetries(RETRIES))
    }

    /// Read the revision word, returning `(firmware, board_type)`.
    fn read_revision(bus: &mut Bus<I2C>, address: u8) -> Result<(u8, u8), ActuatorError> {
        let mut word = [0u8; 2];

        for attempt in 1..=RETRIES {
            match bus.i2c.write_read(address, &[REG_REVISION], &mut word) {
                // SMBus words are little endian, firmware is the high byte
                Ok(_) => return Ok((word[1], word[0])),
                Err(e) => debug!(
                    "Read of revision failed (attempt {}/{}): {:?}",
                    attempt, RETRIES, e
                )
            }
        }

        Err(ActuatorError::ExceededRetries(RETRIES))
    }

    fn reset(bus: &mut Bus<I2C>, address: u8) -> Result<(), ActuatorError> {
        Self::write_reg(bus, address, REG_RESET, 0)?;
        thread::sleep(RESET_DELAY);
        Ok(())
    }
}

impl<I2C, E> Actuator for PiconZero<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E> + Send,
    E: Debug
{
    fn init(&self) -> Result<(), ActuatorError> {
        let mut bus = self.lock();

        Self::reset(&mut bus, self.address)?;

        let (firmware, board_type) = Self::read_revision(&mut bus, self.address)?;

        if board_type != PICON_ZERO_BOARD_TYPE {
            return Err(ActuatorError::Unsupported(format!(
                "board type {} at address {:#04x} is not a Picon Zero",
                board_type, self.address
            )))
        }

        if bus.firmware != Some(firmware) {
            info!("Picon Zero firmware revision {}", firmware);
        }
        bus.firmware = Some(firmware);

        Ok(())
    }

    fn set_motor(&self, motor: Motor, value: i32) -> Result<(), ActuatorError> {
        if value < -128 || value > 127 {
            return Err(ActuatorError::InvalidRange(format!("Motor value {}", value)))
        }

        let mut bus = self.lock();
        Self::write_reg(&mut bus, self.address, REG_MOTOR_A + motor as u8, value as i8 as u8)
    }

    fn set_output(&self, channel: u8, value: i32) -> Result<(), ActuatorError> {
        if channel >= NUM_OUTPUTS {
            return Err(ActuatorError::InvalidRange(format!("Output channel {}", channel)))
        }

        // Servo positions are signed, everything else is an unsigned byte
        if value < -128 || value > 255 {
            return Err(ActuatorError::InvalidRange(format!("Output value {}", value)))
        }

        let mut bus = self.lock();
        Self::write_reg(&mut bus, self.address, REG_OUTPUT0 + channel, value as u8)
    }

    fn set_output_config(&self, channel: u8, mode: OutputMode) -> Result<(), ActuatorError> {
        if channel >= NUM_OUTPUTS {
            return Err(ActuatorError::InvalidRange(format!("Output channel {}", channel)))
        }

        if mode == OutputMode::Neopixel && channel != NEOPIXEL_CHANNEL {
            return Err(ActuatorError::InvalidRange(format!(
                "Neopixel mode on output channel {}", channel
            )))
        }

        let mut bus = self.lock();
        Self::write_reg(&mut bus, self.address, REG_OUTCFG0 + channel, mode as u8)
    }

    fn cleanup(&self) -> Result<(), ActuatorError> {
        let mut bus = self.lock();
        Self::reset(&mut bus, self.address)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct BusError;

    /// I2C bus which fails a number of transactions before succeeding.
    struct FlakyBus {
        failures_left: usize,
        writes: Vec<(u8, Vec<u8>)>,
        revision: [u8; 2],
    }

    impl FlakyBus {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: failures,
                writes: Vec::new(),
                // Firmware 8, Picon Zero
                revision: [PICON_ZERO_BOARD_TYPE, 8],
            }
        }

        fn fail(&mut self) -> bool {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                true
            }
            else {
                false
            }
        }
    }

    impl Write for FlakyBus {
        type Error = BusError;

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
            if self.fail() {
                return Err(BusError)
            }
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }
    }

    impl WriteRead for FlakyBus {
        type Error = BusError;

        fn write_read(&mut self, _: u8, _: &[u8], buffer: &mut [u8]) -> Result<(), BusError> {
            if self.fail() {
                return Err(BusError)
            }
            buffer.copy_from_slice(&self.revision);
            Ok(())
        }
    }

    #[test]
    fn test_init_reads_revision() {
        let pz = PiconZero::new(FlakyBus::new(0));
        assert_eq!(pz.firmware_revision(), None);
        pz.init().unwrap();
        assert_eq!(pz.firmware_revision(), Some(8));

        let bus = pz.release();
        assert_eq!(bus.writes, vec![(DEFAULT_ADDRESS, vec![REG_RESET, 0])]);
    }

    #[test]
    fn test_init_unsupported_board() {
        let mut bus = FlakyBus::new(0);
        bus.revision = [1, 8];
        let pz = PiconZero::new(bus);

        assert!(matches!(pz.init(), Err(ActuatorError::Unsupported(_))));
    }

    #[test]
    fn test_retries() {
        // Fails fewer times than the retry limit, so the write gets through
        let pz = PiconZero::new(FlakyBus::new(RETRIES - 1));
        pz.set_motor(Motor::B, -5).unwrap();
        assert_eq!(pz.release().writes, vec![(DEFAULT_ADDRESS, vec![1, 251])]);

        let pz = PiconZero::new(FlakyBus::new(RETRIES));
        assert_eq!(
            pz.set_motor(Motor::A, 10),
            Err(ActuatorError::ExceededRetries(RETRIES))
        );
        assert!(pz.release().writes.is_empty());
    }

    #[test]
    fn test_range_checks() {
        let pz = PiconZero::new(FlakyBus::new(0));

        assert!(matches!(pz.set_motor(Motor::A, 128), Err(ActuatorError::InvalidRange(_))));
        assert!(matches!(pz.set_motor(Motor::A, -129), Err(ActuatorError::InvalidRange(_))));
        assert!(matches!(pz.set_output(6, 0), Err(ActuatorError::InvalidRange(_))));
        assert!(matches!(pz.set_output(0, 256), Err(ActuatorError::InvalidRange(_))));
        assert!(matches!(
            pz.set_output_config(0, OutputMode::Neopixel),
            Err(ActuatorError::InvalidRange(_))
        ));

        pz.set_motor(Motor::A, -128).unwrap();
        pz.set_output(2, -100).unwrap();
        pz.set_output_config(5, OutputMode::Neopixel).unwrap();
        pz.set_output_config(1, OutputMode::Servo).unwrap();

        assert_eq!(pz.release().writes, vec![
            (DEFAULT_ADDRESS, vec![REG_MOTOR_A, 128]),
            (DEFAULT_ADDRESS, vec![REG_OUTPUT0 + 2, 156]),
            (DEFAULT_ADDRESS, vec![REG_OUTCFG0 + 5, 3]),
            (DEFAULT_ADDRESS, vec![REG_OUTCFG0 + 1, 2]),
        ]);
    }
}
