//! # Watchdog
//!
//! Cuts the motors if no packet has been decoded for a number of ticks, whatever the reason (the
//! FMS disconnecting, the network going quiet, or the controller stalling).
//!
//! The watchdog only makes the actuators safe. It doesn't change the robot's operating state, so
//! a robot which was enabled will drive again as soon as packets start arriving.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};
use log::{error, info, warn};

use comms_if::net::StopSignal;

use crate::actuator::Actuator;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Watchdog {
    actuator: Arc<dyn Actuator>,

    /// Ticks after which the watchdog expires
    timeout_ticks: u32,

    state: Mutex<WatchdogState>,
}

#[derive(Default)]
struct WatchdogState {
    /// Ticks since the last reset
    counter: u32,

    /// True once the cutoff for the current expiry has been issued
    tripped: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Watchdog {
    pub fn new(actuator: Arc<dyn Actuator>, timeout_ticks: u32) -> Self {
        Self {
            actuator,
            timeout_ticks,
            state: Mutex::new(WatchdogState::default()),
        }
    }

    /// Reset the counter. Called every time a packet is decoded.
    pub fn reset(&self) {
        let mut state = self.lock();

        if state.tripped {
            info!("Packets recieved again, watchdog cleared");
        }

        state.counter = 0;
        state.tripped = false;
    }

    /// Advance the watchdog by one tick.
    ///
    /// Returns `true` if this tick expired the watchdog and the cutoff was issued. The cutoff is
    /// issued once per expiry, further ticks do nothing until the watchdog is reset.
    pub fn tick(&self) -> bool {
        {
            let mut state = self.lock();
            state.counter = state.counter.saturating_add(1);

            if state.tripped || state.counter <= self.timeout_ticks {
                return false
            }

            state.tripped = true;
        }

        error!("Watchdog timed out, no packets for {} ticks, stopping motors", self.timeout_ticks);

        if let Err(e) = self.actuator.cleanup() {
            warn!("Watchdog could not stop the motors: {}", e);
        }

        true
    }

    /// Whether the watchdog has expired since the last reset
    pub fn is_tripped(&self) -> bool {
        self.lock().tripped
    }

    /// Start ticking the watchdog on its own thread until the stop signal is raised.
    ///
    /// Ticks are scheduled against a fixed deadline so that the period doesn't drift.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        stop: StopSignal
    ) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(String::from("watchdog"))
            .spawn(move || {
                let mut next_tick = Instant::now() + period;

                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    if stop.sleep(wait) {
                        break
                    }

                    self.tick();

                    next_tick += period;
                    let now = Instant::now();
                    if next_tick < now {
                        next_tick = now + period;
                    }
                }

                info!("Watchdog stopped");
            })
    }

    fn lock(&self) -> MutexGuard<'_, WatchdogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
