//! # FMS Console
//!
//! A minimal field controller for bench testing a robot. Connects to the robot's control link,
//! sends commands typed at a prompt and prints what the robot replies.
//!
//! A status request is sent periodically so that the robot doesn't drop the connection while the
//! prompt is idle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::{Read, Write},
    net::{Shutdown, TcpStream},
    sync::{Arc, Mutex, atomic::{AtomicBool, Ordering}},
    thread,
    time::Duration,
};
use color_eyre::{Result, eyre::{WrapErr, eyre}};
use rustyline::{DefaultEditor, error::ReadlineError};
use structopt::StructOpt;

use comms_if::{
    net::{framing::Framer, StopSignal},
    packet::{MovementData, MovementPayload, Packet, Request, RobotState},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "FMS $ ";

/// Number of buttons sent in each movement frame
const NUM_BUTTONS: usize = 12;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "fms_console", about = "Bench field controller for a robot")]
struct Opts {
    /// Address of the robot, for example 192.168.0.10:5000
    addr: String,

    /// Period of the keep-alive status request in milliseconds, 0 to disable
    #[structopt(long, default_value = "1000")]
    heartbeat_ms: u64,
}

/// Shared between the prompt and the background threads
struct Console {
    stream: Mutex<TcpStream>,

    /// Print the next response even if the state hasn't changed
    show_next_response: AtomicBool,

    stop: StopSignal,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command typed at the prompt.
#[derive(Debug, StructOpt)]
#[structopt(no_version)]
enum ConsoleCmd {
    /// Enable the robot
    #[structopt(name = "enable")]
    Enable,

    /// Disable the robot
    #[structopt(name = "disable")]
    Disable,

    /// Emergency stop the robot, it must be restarted afterwards
    #[structopt(name = "estop")]
    EStop,

    /// Ask the robot for its state
    #[structopt(name = "status")]
    Status,

    /// Send one movement frame
    #[structopt(name = "drive")]
    Drive {
        /// Raw turn stick value
        #[structopt(allow_hyphen_values = true)]
        x: i32,

        /// Raw forward stick value
        #[structopt(allow_hyphen_values = true)]
        y: i32,

        /// Indexes of the buttons held
        buttons: Vec<usize>,
    },

    /// Stop the robot's motors and exit
    #[structopt(name = "quit")]
    Quit,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    let stream = TcpStream::connect(&opts.addr)
        .wrap_err_with(|| format!("Could not connect to {}", opts.addr))?;
    let reader = stream.try_clone()
        .wrap_err("Could not clone the connection")?;

    println!("Connected to {}", opts.addr);

    let console = Arc::new(Console {
        stream: Mutex::new(stream),
        show_next_response: AtomicBool::new(false),
        stop: StopSignal::new(),
    });

    let reader_jh = {
        let console = console.clone();
        thread::spawn(move || console.read_loop(reader))
    };

    if opts.heartbeat_ms > 0 {
        let console = console.clone();
        let period = Duration::from_millis(opts.heartbeat_ms);
        thread::spawn(move || {
            while !console.stop.sleep(period) {
                if console.send(Packet::Request(Request::Status)).is_err() {
                    break
                }
            }
        });
    }

    let mut rl = DefaultEditor::new()
        .wrap_err("Could not start the prompt")?;

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Prompt error: {}", e);
                break
            }
        };

        if line.trim().is_empty() {
            continue
        }
        rl.add_history_entry(line.as_str()).ok();

        let cmd = match ConsoleCmd::from_iter_safe(
            std::iter::once("fms").chain(line.split_whitespace())
        ) {
            Ok(c) => c,
            Err(e) => {
                println!("{}", e.message);
                continue
            }
        };

        if let ConsoleCmd::Quit = cmd {
            break
        }

        if let Err(e) = console.execute(cmd) {
            println!("{}", e);
            if console.stop.is_stopped() {
                break
            }
        }
    }

    // Leave the robot safe
    console.send(Packet::Status(RobotState::Disable)).ok();

    console.stop.stop();
    console.shutdown();
    reader_jh.join().ok();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Console {
    fn execute(&self, cmd: ConsoleCmd) -> Result<()> {
        let packet = match cmd {
            ConsoleCmd::Enable => Packet::Status(RobotState::Enable),
            ConsoleCmd::Disable => Packet::Status(RobotState::Disable),
            ConsoleCmd::EStop => Packet::Status(RobotState::EStop),
            ConsoleCmd::Status => {
                self.show_next_response.store(true, Ordering::Relaxed);
                Packet::Request(Request::Status)
            },
            ConsoleCmd::Drive { x, y, buttons } => {
                let mut pressed = vec![false; NUM_BUTTONS];
                for b in buttons {
                    match pressed.get_mut(b) {
                        Some(p) => *p = true,
                        None => return Err(eyre!("Button {} doesn't exist", b))
                    }
                }

                Packet::Data(MovementPayload::Single(MovementData {
                    stick_x: x,
                    stick_y: y,
                    buttons: pressed,
                    axes: vec![],
                }))
            },
            ConsoleCmd::Quit => return Ok(()),
        };

        self.send(packet)
    }

    fn send(&self, packet: Packet) -> Result<()> {
        let bytes = packet.encode()?;

        let mut stream = self.stream.lock()
            .map_err(|_| eyre!("Connection lock poisoned"))?;

        stream.write_all(&bytes)
            .wrap_err("Could not send to the robot")
    }

    fn shutdown(&self) {
        if let Ok(stream) = self.stream.lock() {
            stream.shutdown(Shutdown::Both).ok();
        }
    }

    /// Print packets from the robot until the connection closes.
    fn read_loop(&self, mut reader: TcpStream) {
        let mut framer = Framer::default();
        let mut buf = [0u8; 1024];
        let mut last_state: Option<RobotState> = None;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => {
                    if !self.stop.is_stopped() {
                        println!("\nRobot closed the connection");
                    }
                    break
                },
                Ok(n) => n,
                Err(e) => {
                    if !self.stop.is_stopped() {
                        println!("\nConnection error: {}", e);
                    }
                    break
                }
            };

            let batch = framer.push(&buf[..n]);

            for broken in batch.broken {
                println!("\nBroken packet: {}", String::from_utf8_lossy(&broken));
            }

            for frame in batch.frames {
                match Packet::decode(frame.as_bytes()) {
                    Ok(Packet::Response(state)) => {
                        let forced = self.show_next_response.swap(false, Ordering::Relaxed);
                        if forced || last_state != Some(state) {
                            println!("\nRobot state: {:?}", state);
                        }
                        last_state = Some(state);
                    },
                    Ok(p) => println!("\nRecieved {:?}", p),
                    Err(e) => println!("\nUndecodable packet {}: {}", frame, e)
                }
            }
        }

        self.stop.stop();
    }
}
