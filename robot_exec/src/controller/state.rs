//! Robot operating state machine
//!
//! The robot starts disabled. The FMS enables and disables it with `STATUS` packets, and can
//! emergency stop it, after which the robot only keeps its outputs off and answers requests with
//! `E_STOP` until the executable is restarted.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use log::{debug, error, info, trace, warn};

use comms_if::{
    net::StopSignal,
    packet::{MovementData, MovementPayload, Packet, Request, RobotState},
};

use super::{Accessory, ControllerError, PacketLink};
use crate::{
    actuator::{Actuator, ActuatorError, Motor},
    params::{DriveParams, RobotExecParams},
    watchdog::Watchdog,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sleep between polls of the link when no frames are waiting
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Period of the cutoff issued while emergency stopped
const ESTOP_CLEANUP_PERIOD: Duration = Duration::from_millis(250);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RobotController<L> {
    link: L,

    actuator: Arc<dyn Actuator>,

    watchdog: Arc<Watchdog>,

    drive: DriveParams,

    accessory: Accessory,

    state: OperatingState,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingState {
    Disabled,
    Enabled,
    EStopped,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl OperatingState {
    /// The state reached by applying a commanded robot state. An emergency stop is final.
    pub fn apply(self, command: RobotState) -> Self {
        match (self, command) {
            (OperatingState::EStopped, _) => OperatingState::EStopped,
            (_, RobotState::EStop) => OperatingState::EStopped,
            (_, RobotState::Disable) => OperatingState::Disabled,
            (_, RobotState::Enable) => OperatingState::Enabled,
        }
    }

    /// The state reported to the FMS
    pub fn as_robot_state(self) -> RobotState {
        match self {
            OperatingState::Disabled => RobotState::Disable,
            OperatingState::Enabled => RobotState::Enable,
            OperatingState::EStopped => RobotState::EStop,
        }
    }
}

impl Default for OperatingState {
    fn default() -> Self {
        OperatingState::Disabled
    }
}

impl<L: PacketLink> RobotController<L> {
    pub fn new(
        link: L,
        actuator: Arc<dyn Actuator>,
        watchdog: Arc<Watchdog>,
        params: &RobotExecParams
    ) -> Self {
        Self {
            link,
            actuator,
            watchdog,
            drive: params.drive.clone(),
            accessory: Accessory::from_params(&params.accessory),
            state: OperatingState::default(),
        }
    }

    pub fn state(&self) -> OperatingState {
        self.state
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Reset the board and configure the accessory outputs.
    pub fn setup_hardware(&mut self) -> Result<(), ActuatorError> {
        info!("Setting up hardware");
        self.actuator.init()?;
        self.accessory.setup(self.actuator.as_ref())
    }

    /// Run the controller until the stop signal is raised.
    ///
    /// If the robot is emergency stopped the controller stays in the emergency stop loop until
    /// the stop signal is raised, it never returns to normal operation.
    pub fn run(&mut self, stop: &StopSignal) {
        info!("Controller running, robot {:?}", self.state);

        while !stop.is_stopped() {
            if self.state == OperatingState::EStopped {
                self.run_estopped(stop);
                break
            }

            if !self.poll() {
                thread::sleep(IDLE_SLEEP);
            }
        }

        info!("Controller stopped");
    }

    /// Process at most one pending frame, returning whether there was one.
    ///
    /// Errors and faults while processing are logged and don't stop the controller.
    pub fn poll(&mut self) -> bool {
        if self.link.take_rerun_setup() && self.state != OperatingState::EStopped {
            info!("FMS connection was reset, re-running hardware setup");
            if let Err(e) = self.setup_hardware() {
                warn!("Hardware setup failed: {}", e);
            }
        }

        let frame = match self.link.next_frame() {
            Some(f) => f,
            None => return false
        };

        self.dispatch(&frame);

        true
    }

    /// Process one frame, containing any fault raised while doing so.
    ///
    /// A fault leaves the outputs in an unknown state so they are cut.
    fn dispatch(&mut self, frame: &str) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_frame(frame)));

        match result {
            Ok(Ok(_)) => (),
            Ok(Err(ControllerError::DecodeError(e))) => {
                warn!("Dropping undecodable packet {}: {}", frame, e)
            },
            Ok(Err(e)) => warn!("Error processing packet: {}", e),
            Err(cause) => {
                error!(
                    "Fault while processing packet {}: {}, stopping the outputs",
                    frame,
                    panic_message(cause.as_ref())
                );
                if let Err(e) = self.actuator.cleanup() {
                    error!("Could not stop the outputs: {}", e);
                }
            }
        }
    }

    /// Decode and dispatch a single frame.
    ///
    /// Any packet which decodes resets the watchdog, whether or not it is acted on.
    pub fn process_frame(&mut self, frame: &str) -> Result<(), ControllerError> {
        let packet = Packet::decode(frame.as_bytes())?;
        trace!("Recieved {:?}", packet);

        self.watchdog.reset();

        self.handle_packet(packet)
    }

    pub fn handle_packet(&mut self, packet: Packet) -> Result<(), ControllerError> {
        // While stopped the only thing done is answering requests
        if self.state == OperatingState::EStopped {
            if let Packet::Request(_) = packet {
                self.send(Packet::Response(RobotState::EStop))?;
            }
            return Ok(())
        }

        match packet {
            Packet::Status(command) => self.handle_status(command),
            Packet::Request(Request::Status) => {
                self.send(Packet::Response(self.state.as_robot_state()))
            },
            Packet::Response(r) => {
                debug!("Ignoring response {:?}", r);
                Ok(())
            },
            Packet::Data(payload) => {
                if self.state == OperatingState::Enabled {
                    self.handle_movement(&payload);
                }
                else {
                    trace!("Robot disabled, ignoring movement data");
                }
                Ok(())
            }
        }
    }

    fn handle_status(&mut self, command: RobotState) -> Result<(), ControllerError> {
        let prev = self.state;
        self.state = prev.apply(command);

        if self.state != prev {
            info!("Robot state {:?} -> {:?}", prev, self.state);
        }

        match self.state {
            OperatingState::Enabled if prev == OperatingState::Disabled => {
                self.setup_hardware()?;
            },
            OperatingState::Enabled => debug!("Robot already enabled"),
            OperatingState::Disabled => self.actuator.cleanup()?,
            OperatingState::EStopped => {
                error!("Emergency stop recieved");
                self.actuator.cleanup()?;
            }
        }

        Ok(())
    }

    /// Drive from each movement frame in order. A failed frame doesn't stop the rest.
    fn handle_movement(&mut self, payload: &MovementPayload) {
        for movement in payload.frames() {
            if let Err(e) = self.drive_frame(movement) {
                warn!("Could not apply movement frame: {}", e);
            }
        }
    }

    fn drive_frame(&mut self, movement: &MovementData) -> Result<(), ActuatorError> {
        let dems = self.drive.demands(movement);
        trace!("Drive demands {:?}", dems);

        self.actuator.set_motor(Motor::A, dems.left)?;
        self.actuator.set_motor(Motor::B, dems.right)?;

        self.accessory.update(movement, self.actuator.as_ref())
    }

    /// Keep the outputs off and answer requests until the stop signal is raised.
    fn run_estopped(&mut self, stop: &StopSignal) {
        error!("Robot is emergency stopped, restart the executable to recover");

        let mut next_cleanup = Instant::now();

        while !stop.is_stopped() {
            let now = Instant::now();
            if now >= next_cleanup {
                if let Err(e) = self.actuator.cleanup() {
                    warn!("Could not stop the outputs: {}", e);
                }
                next_cleanup = now + ESTOP_CLEANUP_PERIOD;
            }

            // Connection resets no longer re-run setup
            self.link.take_rerun_setup();

            while let Some(frame) = self.link.next_frame() {
                self.dispatch(&frame);
            }

            thread::sleep(IDLE_SLEEP);
        }
    }

    fn send(&self, packet: Packet) -> Result<(), ControllerError> {
        let bytes = packet.encode()?;
        self.link.send(bytes);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(s) = cause.downcast_ref::<&str>() {
        *s
    }
    else if let Some(s) = cause.downcast_ref::<String>() {
        s.as_str()
    }
    else {
        "unknown fault"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        sync::atomic::{AtomicBool, Ordering},
    };
    use crate::{
        actuator::{OutputMode, SimBoard},
        params::{AccessoryParams, GripperParams, ShooterParams, WatchdogParams},
    };

    #[derive(Default)]
    struct MockLink {
        inbound: RefCell<VecDeque<String>>,
        sent: RefCell<Vec<Packet>>,
        rerun: Cell<bool>,
    }

    impl PacketLink for MockLink {
        fn next_frame(&self) -> Option<String> {
            self.inbound.borrow_mut().pop_front()
        }

        fn send(&self, bytes: Vec<u8>) {
            self.sent.borrow_mut().push(Packet::decode(&bytes).unwrap());
        }

        fn take_rerun_setup(&self) -> bool {
            self.rerun.replace(false)
        }
    }

    /// A board whose motor driver panics while `faulty` is set
    struct FaultyBoard {
        board: Arc<SimBoard>,
        faulty: AtomicBool,
    }

    impl Actuator for FaultyBoard {
        fn init(&self) -> Result<(), ActuatorError> {
            self.board.init()
        }

        fn set_motor(&self, motor: Motor, value: i32) -> Result<(), ActuatorError> {
            if self.faulty.load(Ordering::Relaxed) {
                panic!("motor driver fault");
            }
            self.board.set_motor(motor, value)
        }

        fn set_output(&self, channel: u8, value: i32) -> Result<(), ActuatorError> {
            self.board.set_output(channel, value)
        }

        fn set_output_config(&self, channel: u8, mode: OutputMode) -> Result<(), ActuatorError> {
            self.board.set_output_config(channel, mode)
        }

        fn cleanup(&self) -> Result<(), ActuatorError> {
            self.board.cleanup()
        }
    }

    fn params(accessory: AccessoryParams) -> RobotExecParams {
        RobotExecParams {
            robot_name: String::from("test"),
            net: Default::default(),
            watchdog: WatchdogParams::default(),
            drive: DriveParams {
                raw_stick_max: 128,
                deadzone: 10,
                ..Default::default()
            },
            accessory,
        }
    }

    fn controller(accessory: AccessoryParams) -> (Arc<SimBoard>, RobotController<MockLink>) {
        let board = Arc::new(SimBoard::new());
        let watchdog = Arc::new(Watchdog::new(board.clone(), 3));
        let ctrl = RobotController::new(
            MockLink::default(),
            board.clone(),
            watchdog,
            &params(accessory)
        );
        (board, ctrl)
    }

    fn status(s: RobotState) -> Packet {
        Packet::Status(s)
    }

    fn drive(x: i32, y: i32) -> MovementData {
        MovementData {
            stick_x: x,
            stick_y: y,
            buttons: vec![false; 4],
            axes: vec![],
        }
    }

    fn last_sent(ctrl: &RobotController<MockLink>) -> Option<Packet> {
        ctrl.link().sent.borrow().last().cloned()
    }

    #[test]
    fn test_apply() {
        use OperatingState::*;

        assert_eq!(Disabled.apply(RobotState::Enable), Enabled);
        assert_eq!(Enabled.apply(RobotState::Disable), Disabled);
        assert_eq!(Enabled.apply(RobotState::EStop), EStopped);
        assert_eq!(Disabled.apply(RobotState::EStop), EStopped);
        assert_eq!(EStopped.apply(RobotState::Enable), EStopped);
        assert_eq!(EStopped.apply(RobotState::Disable), EStopped);
    }

    #[test]
    fn test_disabled_ignores_data() {
        let (board, mut ctrl) = controller(AccessoryParams::None);
        assert_eq!(ctrl.state(), OperatingState::Disabled);

        ctrl.handle_packet(Packet::Data(MovementPayload::Single(drive(0, 100)))).unwrap();
        assert_eq!(board.state().num_motor_sets, 0);
    }

    #[test]
    fn test_enable_drives_and_disable_cuts() {
        let (board, mut ctrl) = controller(AccessoryParams::None);

        ctrl.handle_packet(status(RobotState::Enable)).unwrap();
        assert_eq!(ctrl.state(), OperatingState::Enabled);
        assert_eq!(board.state().num_inits, 1);

        ctrl.handle_packet(Packet::Data(MovementPayload::Single(drive(0, 100)))).unwrap();
        assert_eq!(board.state().motors, [100, 100]);

        ctrl.handle_packet(status(RobotState::Disable)).unwrap();
        assert_eq!(ctrl.state(), OperatingState::Disabled);
        assert_eq!(board.state().motors, [0, 0]);
        assert_eq!(board.state().num_cleanups, 1);

        // Disabling again re-issues the cutoff
        ctrl.handle_packet(status(RobotState::Disable)).unwrap();
        assert_eq!(board.state().num_cleanups, 2);

        // Enabling while enabled doesn't re-run setup
        ctrl.handle_packet(status(RobotState::Enable)).unwrap();
        ctrl.handle_packet(status(RobotState::Enable)).unwrap();
        assert_eq!(board.state().num_inits, 2);
    }

    #[test]
    fn test_batch_processed_in_order() {
        let (board, mut ctrl) = controller(AccessoryParams::None);
        ctrl.handle_packet(status(RobotState::Enable)).unwrap();

        ctrl.handle_packet(Packet::Data(MovementPayload::Batch(vec![
            drive(0, 100),
            drive(0, -50),
            drive(50, 100),
        ]))).unwrap();

        let state = board.state();
        assert_eq!(state.num_motor_sets, 6);
        assert_eq!(state.motors, [50, 100]);
    }

    #[test]
    fn test_status_request() {
        let (_, mut ctrl) = controller(AccessoryParams::None);

        ctrl.handle_packet(Packet::Request(Request::Status)).unwrap();
        assert_eq!(last_sent(&ctrl), Some(Packet::Response(RobotState::Disable)));

        ctrl.handle_packet(status(RobotState::Enable)).unwrap();
        ctrl.handle_packet(Packet::Request(Request::Status)).unwrap();
        assert_eq!(last_sent(&ctrl), Some(Packet::Response(RobotState::Enable)));

        // Responses are not acted on
        ctrl.handle_packet(Packet::Response(RobotState::EStop)).unwrap();
        assert_eq!(ctrl.state(), OperatingState::Enabled);
    }

    #[test]
    fn test_estop_is_final() {
        let (board, mut ctrl) = controller(AccessoryParams::None);
        ctrl.handle_packet(status(RobotState::Enable)).unwrap();
        ctrl.handle_packet(Packet::Data(MovementPayload::Single(drive(0, 100)))).unwrap();

        ctrl.handle_packet(status(RobotState::EStop)).unwrap();
        assert_eq!(ctrl.state(), OperatingState::EStopped);
        assert_eq!(board.state().motors, [0, 0]);

        ctrl.handle_packet(status(RobotState::Enable)).unwrap();
        ctrl.handle_packet(Packet::Data(MovementPayload::Single(drive(0, 100)))).unwrap();
        assert_eq!(ctrl.state(), OperatingState::EStopped);
        assert_eq!(board.state().motors, [0, 0]);

        ctrl.handle_packet(Packet::Request(Request::Status)).unwrap();
        assert_eq!(last_sent(&ctrl), Some(Packet::Response(RobotState::EStop)));

        // A repeated emergency stop changes nothing
        let cleanups = board.state().num_cleanups;
        let num_sent = ctrl.link().sent.borrow().len();
        ctrl.handle_packet(status(RobotState::EStop)).unwrap();
        ctrl.handle_packet(status(RobotState::EStop)).unwrap();
        assert_eq!(ctrl.state(), OperatingState::EStopped);
        assert_eq!(board.state().motors, [0, 0]);
        assert_eq!(board.state().num_cleanups, cleanups);
        assert_eq!(ctrl.link().sent.borrow().len(), num_sent);
    }

    #[test]
    fn test_extreme_lift_axis_is_contained() {
        let (board, mut ctrl) = controller(AccessoryParams::Gripper(GripperParams {
            grip_servo: 0,
            grip_min: 0,
            grip_max: 90,
            lift_servo: 1,
            lift_min: 0,
            lift_range: 90,
            lift_mod: 1,
            toggle_button: 2,
            lift_axis: 0,
        }));
        ctrl.process_frame(r#"{"type":"STATUS","data":"ENABLE"}"#).unwrap();

        let frame = r#"{"type":"DATA","data":{"stick_x":0,"stick_y":0,"buttons":[],"axes":[2147483647]}}"#;
        ctrl.process_frame(frame).unwrap();
        ctrl.process_frame(frame).unwrap();

        assert_eq!(ctrl.state(), OperatingState::Enabled);
        assert_eq!(board.state().outputs[1], 90);
    }

    #[test]
    fn test_fault_while_driving_cuts_outputs() {
        let board = Arc::new(SimBoard::new());
        let faulty = Arc::new(FaultyBoard {
            board: board.clone(),
            faulty: AtomicBool::new(false),
        });
        let watchdog = Arc::new(Watchdog::new(faulty.clone(), 3));
        let mut ctrl = RobotController::new(
            MockLink::default(),
            faulty.clone(),
            watchdog,
            &params(AccessoryParams::None)
        );

        let forward = r#"{"type":"DATA","data":{"stick_x":0,"stick_y":100,"buttons":[]}}"#;
        {
            let mut inbound = ctrl.link().inbound.borrow_mut();
            inbound.push_back(String::from(r#"{"type":"STATUS","data":"ENABLE"}"#));
            inbound.push_back(String::from(forward));
            inbound.push_back(String::from(forward));
            inbound.push_back(String::from(forward));
        }

        assert!(ctrl.poll());
        assert!(ctrl.poll());
        assert_eq!(board.state().motors, [100, 100]);
        assert_eq!(board.state().num_cleanups, 0);

        // The fault is contained and the outputs are cut
        faulty.faulty.store(true, Ordering::Relaxed);
        assert!(ctrl.poll());
        assert_eq!(board.state().motors, [0, 0]);
        assert_eq!(board.state().num_cleanups, 1);
        assert_eq!(ctrl.state(), OperatingState::Enabled);

        // and the controller carries on with the next frame
        faulty.faulty.store(false, Ordering::Relaxed);
        assert!(ctrl.poll());
        assert_eq!(board.state().motors, [100, 100]);
        assert!(!ctrl.poll());
    }

    #[test]
    fn test_process_frame_resets_watchdog() {
        let (board, mut ctrl) = controller(AccessoryParams::None);
        let watchdog = ctrl.watchdog.clone();

        for _ in 0..4 {
            watchdog.tick();
        }
        assert!(watchdog.is_tripped());
        assert_eq!(board.state().num_cleanups, 1);

        // A packet which is ignored still counts as liveness
        ctrl.process_frame(r#"{"type":"RESPONSE","data":"ENABLE"}"#).unwrap();
        assert!(!watchdog.is_tripped());

        // Undecodable frames don't
        for _ in 0..4 {
            watchdog.tick();
        }
        assert!(matches!(
            ctrl.process_frame(r#"{"type":"RESPONSE","#),
            Err(ControllerError::DecodeError(_))
        ));
        assert!(watchdog.is_tripped());
    }

    #[test]
    fn test_poll_survives_errors() {
        let (board, mut ctrl) = controller(AccessoryParams::None);
        {
            let mut inbound = ctrl.link().inbound.borrow_mut();
            inbound.push_back(String::from("{\"type\":\"BOGUS\"}"));
            inbound.push_back(String::from(r#"{"type":"STATUS","data":"ENABLE"}"#));
            inbound.push_back(String::from(
                r#"{"type":"DATA","data":{"stick_x":0,"stick_y":60,"buttons":[]}}"#
            ));
        }

        assert!(ctrl.poll());
        assert_eq!(ctrl.state(), OperatingState::Disabled);
        assert!(ctrl.poll());
        assert_eq!(ctrl.state(), OperatingState::Enabled);

        board.set_failing(true);
        assert!(ctrl.poll());
        assert_eq!(ctrl.state(), OperatingState::Enabled);
        assert!(!ctrl.poll());
    }

    #[test]
    fn test_rerun_setup() {
        let (board, mut ctrl) = controller(AccessoryParams::Shooter(ShooterParams {
            motor_channel: 2,
            motor_speed: 50,
            fire_button: 0,
        }));

        ctrl.link().rerun.set(true);
        assert!(!ctrl.poll());
        assert_eq!(board.state().num_inits, 1);
        assert_eq!(board.state().modes[2], OutputMode::Pwm);

        // Only once per reset
        assert!(!ctrl.poll());
        assert_eq!(board.state().num_inits, 1);
    }

    #[test]
    fn test_run_until_stopped() {
        let (board, mut ctrl) = controller(AccessoryParams::None);
        ctrl.link().inbound.borrow_mut().push_back(
            String::from(r#"{"type":"STATUS","data":"E_STOP"}"#)
        );

        let stop = StopSignal::new();
        let stopper = stop.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stopper.stop();
        });

        ctrl.run(&stop);
        t.join().unwrap();

        assert_eq!(ctrl.state(), OperatingState::EStopped);
        // Once from the packet and at least once from the stopped loop
        assert!(board.state().num_cleanups >= 2);
    }
}
