//! End to end test of the control link, from an FMS socket to the motor board

use std::{
    io::{Read, Write},
    net::TcpStream,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use comms_if::{
    net::{framing::Framer, NetParams, PacketTransport, StopSignal},
    packet::{MovementData, MovementPayload, Packet, Request, RobotState},
};
use robot_lib::{
    actuator::SimBoard,
    controller::{OperatingState, RobotController},
    params::{AccessoryParams, DriveParams, RobotExecParams, WatchdogParams},
    watchdog::Watchdog,
};

struct Fms {
    stream: TcpStream,
    framer: Framer,
    pending: Vec<Packet>,
}

impl Fms {
    fn send(&mut self, packet: Packet) {
        self.stream.write_all(&packet.encode().unwrap()).unwrap();
    }

    fn recv(&mut self) -> Packet {
        let mut buf = [0u8; 256];
        while self.pending.is_empty() {
            let n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "Robot closed the connection");
            for frame in self.framer.push(&buf[..n]).frames {
                self.pending.push(Packet::decode(frame.as_bytes()).unwrap());
            }
        }
        self.pending.remove(0)
    }

    fn request_status(&mut self) -> Packet {
        self.send(Packet::Request(Request::Status));
        self.recv()
    }
}

fn wait_for<F: Fn() -> bool>(cond: F) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "Timed out waiting for condition");
        thread::sleep(Duration::from_millis(5));
    }
}

fn movement(x: i32, y: i32) -> MovementData {
    MovementData {
        stick_x: x,
        stick_y: y,
        buttons: vec![false; 4],
        axes: vec![],
    }
}

#[test]
fn test_control_link() {
    let params = RobotExecParams {
        robot_name: String::from("test_robot"),
        net: NetParams {
            bind_address: String::from("127.0.0.1"),
            port: 0,
            poll_interval_ms: 10,
            ..Default::default()
        },
        watchdog: WatchdogParams::default(),
        drive: DriveParams {
            raw_stick_max: 128,
            ..Default::default()
        },
        accessory: AccessoryParams::None,
    };

    let stop = StopSignal::new();
    let board = Arc::new(SimBoard::new());
    let watchdog = Arc::new(Watchdog::new(board.clone(), params.watchdog.timeout_ticks));

    let transport = PacketTransport::listen(&params.net, stop.clone()).unwrap();
    let addr = transport.local_addr().unwrap();
    let transport = transport.start().unwrap();

    let mut controller = RobotController::new(
        transport.link(),
        board.clone(),
        watchdog,
        &params
    );

    let controller_stop = stop.clone();
    let controller_jh = thread::spawn(move || {
        controller.run(&controller_stop);
        controller.state()
    });

    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let mut fms = Fms {
        stream,
        framer: Framer::default(),
        pending: Vec::new(),
    };

    // ---- DISABLED ----

    assert_eq!(fms.request_status(), Packet::Response(RobotState::Disable));

    fms.send(Packet::Data(MovementPayload::Single(movement(0, 100))));
    assert_eq!(fms.request_status(), Packet::Response(RobotState::Disable));
    assert_eq!(board.state().num_motor_sets, 0);

    // ---- ENABLED ----

    // Enable and drive in one write
    let mut bytes = Packet::Status(RobotState::Enable).encode().unwrap();
    bytes.extend(Packet::Data(MovementPayload::Batch(vec![
        movement(0, 100),
        movement(50, 100),
    ])).encode().unwrap());
    fms.stream.write_all(&bytes).unwrap();

    assert_eq!(fms.request_status(), Packet::Response(RobotState::Enable));
    assert_eq!(board.state().motors, [50, 100]);

    // ---- DISABLED AGAIN ----

    fms.send(Packet::Status(RobotState::Disable));
    assert_eq!(fms.request_status(), Packet::Response(RobotState::Disable));
    assert_eq!(board.state().motors, [0, 0]);

    // ---- EMERGENCY STOP ----

    fms.send(Packet::Status(RobotState::Enable));
    fms.send(Packet::Status(RobotState::EStop));
    assert_eq!(fms.request_status(), Packet::Response(RobotState::EStop));

    fms.send(Packet::Status(RobotState::Enable));
    fms.send(Packet::Data(MovementPayload::Single(movement(0, 100))));
    assert_eq!(fms.request_status(), Packet::Response(RobotState::EStop));
    assert_eq!(board.state().motors, [0, 0]);

    // Outputs keep being cut while stopped
    let cleanups = board.state().num_cleanups;
    wait_for(|| board.state().num_cleanups > cleanups);

    // ---- SHUTDOWN ----

    transport.stop();
    let final_state = controller_jh.join().unwrap();
    transport.join();

    assert_eq!(final_state, OperatingState::EStopped);
    assert!(stop.is_stopped());
}
