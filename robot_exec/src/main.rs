//! # Robot Executable
//!
//! Runs on the robot. Listens for the field controller (FMS), and drives the robot from the packets
//! it sends.
//!
//! Three threads are run:
//!     - The transport, which owns the socket and reassembles packets
//!     - The watchdog, which stops the motors if packets stop arriving
//!     - The controller (this thread), which runs the state machine and commands the board

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::{sync::Arc, thread};
use color_eyre::{Result, eyre::WrapErr};
use log::{error, info, warn};
use structopt::StructOpt;

// Internal
use comms_if::net::{PacketTransport, StopSignal};
use robot_lib::{
    actuator::Actuator,
    controller::RobotController,
    params::RobotExecParams,
    watchdog::Watchdog,
};
use util::{
    logger::{logger_init, parse_level},
    session::Session,
    time::secs_to_duration,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Stops the other threads and cuts the outputs if the controller unwinds out of its loop.
struct CutoffOnUnwind {
    stop: StopSignal,
    actuator: Arc<dyn Actuator>,
}

#[derive(Debug, StructOpt)]
#[structopt(name = "robot_exec", about = "Robot control link executable")]
struct Opts {
    /// Parameter file to load, relative to the params directory
    #[structopt(long, default_value = "robot_exec.toml")]
    params: String,

    /// Minimum log level (info, debug or trace)
    #[structopt(long, default_value = "debug")]
    log_level: String,

    /// Log level of the transport, which is very verbose at trace
    #[structopt(long, default_value = "debug")]
    net_log_level: String,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let opts = Opts::from_args();

    // Initialise session
    let session = Session::new(
        "robot_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    let log_level = parse_level(&opts.log_level)
        .wrap_err("Invalid log level")?;
    let net_log_level = parse_level(&opts.net_log_level)
        .wrap_err("Invalid transport log level")?;
    logger_init(log_level, &[("comms_if::net", net_log_level)], &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Robot Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: RobotExecParams = util::params::load_or_default(&opts.params)
        .wrap_err("Could not load the parameters")?;
    params.validate()
        .wrap_err("Invalid parameters")?;

    info!("Parameters loaded for {}", params.robot_name);

    // ---- SHUTDOWN HANDLING ----

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("Interrupt recieved, shutting down");
            stop.stop();
        }).wrap_err("Could not install the interrupt handler")?;
    }

    // ---- HARDWARE INITIALISATION ----

    let actuator = open_actuator()
        .wrap_err("Could not open the motor board")?;

    let watchdog = Arc::new(Watchdog::new(actuator.clone(), params.watchdog.timeout_ticks));

    // ---- NETWORK INITIALISATION ----

    let transport = PacketTransport::listen(&params.net, stop.clone())
        .wrap_err("Could not start the control link")?
        .start()
        .wrap_err("Could not start the control link")?;

    let mut controller = RobotController::new(
        transport.link(),
        actuator.clone(),
        watchdog.clone(),
        &params
    );

    if let Err(e) = controller.setup_hardware() {
        warn!("Initial hardware setup failed: {}", e);
    }

    let watchdog_jh = watchdog.spawn(
        secs_to_duration(params.watchdog.tick_period_s),
        stop.clone()
    ).wrap_err("Could not start the watchdog")?;

    info!("Initialisation complete, robot disabled until enabled by the FMS");

    // ---- MAIN LOOP ----

    {
        let _guard = CutoffOnUnwind {
            stop: stop.clone(),
            actuator: actuator.clone(),
        };
        controller.run(&stop);
    }

    // ---- SHUTDOWN ----

    stop.stop();
    transport.join();
    if watchdog_jh.join().is_err() {
        warn!("Watchdog thread panicked");
    }

    if let Err(e) = actuator.cleanup() {
        warn!("Final cleanup failed: {}", e);
    }

    info!("End of session");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Drop for CutoffOnUnwind {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Controller panicked, stopping the outputs");
            self.stop.stop();
            if let Err(e) = self.actuator.cleanup() {
                error!("Could not stop the outputs: {}", e);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the Picon Zero on the Pi's I2C bus.
#[cfg(all(target_arch = "arm", target_os = "linux"))]
fn open_actuator() -> Result<Arc<dyn Actuator>> {
    use robot_lib::actuator::PiconZero;

    let i2c = rppal::i2c::I2c::with_bus(1)
        .wrap_err("Could not open I2C bus 1")?;

    info!("Using the Picon Zero on I2C bus 1");

    Ok(Arc::new(PiconZero::new(i2c)))
}

/// Off the Pi there's no board, so use the simulated one.
#[cfg(not(all(target_arch = "arm", target_os = "linux")))]
fn open_actuator() -> Result<Arc<dyn Actuator>> {
    use robot_lib::actuator::SimBoard;

    warn!("Not running on the robot, using a simulated motor board");

    Ok(Arc::new(SimBoard::new()))
}
