//! # Network Module
//!
//! This module provides the robot's side of the control link: a TCP server which accepts a single
//! field controller (FMS) connection at a time and turns its byte stream into complete packet
//! frames.
//!
//! The transport runs on its own thread. It is the only thing which touches the sockets, the rest
//! of the software talks to it through a [`TransportLink`], which provides a FIFO of received
//! frames and a fire-and-forget send.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Recovery of frames from the undelimited byte stream
pub mod framing;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Mutex, MutexGuard, PoisonError, atomic::{AtomicBool, Ordering}},
    thread,
    time::{Duration, Instant},
};
use log::{debug, info, trace, warn};
use serde::Deserialize;

use framing::{Framer, DEFAULT_MAX_PENDING_BYTES};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters for the control link.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetParams {
    /// Address of the interface to listen on
    pub bind_address: String,

    /// Port to listen on
    pub port: u16,

    /// Time without receiving any bytes after which the connection is considered dead, the
    /// connection is dropped and a new one accepted.
    ///
    /// Units: seconds
    pub accept_timeout_s: f64,

    /// Interval at which the socket is polled for data and for the stop signal.
    ///
    /// Units: milliseconds
    pub poll_interval_ms: u64,

    /// Size of a single socket read
    pub recv_buffer_size: usize,

    /// Maximum size of an incomplete frame before it is discarded
    pub max_pending_bytes: usize,
}

/// A stop signal shared between all the threads of the executable.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

/// The control link server, before it has been started.
pub struct PacketTransport {
    listener: TcpListener,

    params: NetParams,

    shared: Arc<Shared>,
}

/// A running transport thread.
pub struct TransportHandle {
    link: TransportLink,

    join_handle: Option<thread::JoinHandle<()>>,
}

/// Cloneable access to a running transport, used to receive frames and send packets.
#[derive(Clone)]
pub struct TransportLink {
    shared: Arc<Shared>,
}

/// State shared between the transport thread and its links
struct Shared {
    /// Complete frames waiting to be processed
    inbound: Mutex<VecDeque<String>>,

    /// Encoded packets waiting to be written to the peer
    outbound: Mutex<VecDeque<Vec<u8>>>,

    /// Whether a peer is currently connected, only changed while `outbound` is locked
    connected: AtomicBool,

    /// Raised whenever a connection is retired, the next peer may be a fresh session
    rerun_setup: AtomicBool,

    stop: StopSignal,
}

/// The currently connected peer
struct Connection {
    stream: TcpStream,

    peer_addr: SocketAddr,

    framer: Framer,

    last_activity: Instant,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`PacketTransport`]
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Could not bind to {0}:{1}: {2}")]
    BindError(String, u16, io::Error),

    #[error("Could not configure the listening socket: {0}")]
    ConfigError(io::Error),

    #[error("Could not start the transport thread: {0}")]
    SpawnError(io::Error),
}

/// Why a connection was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetireReason {
    Silent,
    PeerClosed,
    ReadError,
    Stopping,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NetParams {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 5000,
            accept_timeout_s: 5.0,
            poll_interval_ms: 50,
            recv_buffer_size: 4096,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl NetParams {
    fn poll_interval(&self) -> Duration {
        // A zero read timeout is rejected by the OS
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    fn accept_timeout(&self) -> Duration {
        if self.accept_timeout_s.is_finite() && self.accept_timeout_s > 0.0 {
            Duration::from_secs_f64(self.accept_timeout_s)
        }
        else {
            self.poll_interval()
        }
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that every thread holding this signal stops.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleep for the given duration, waking early if the stop signal is raised.
    ///
    /// Returns `true` if the signal was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(20);

        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

impl PacketTransport {

    /// Bind the listening socket.
    ///
    /// This function will not wait for a connection from the FMS before returning. Failing to
    /// bind is fatal for the executable, there is no way to receive commands.
    pub fn listen(params: &NetParams, stop: StopSignal) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((params.bind_address.as_str(), params.port))
            .map_err(|e| TransportError::BindError(params.bind_address.clone(), params.port, e))?;

        // Accept is polled so that the stop signal can be observed while waiting for a peer
        listener.set_nonblocking(true)
            .map_err(TransportError::ConfigError)?;

        match listener.local_addr() {
            Ok(a) => info!("Listening for the FMS on {}", a),
            Err(_) => info!("Listening for the FMS on {}:{}", params.bind_address, params.port)
        }

        Ok(Self {
            listener,
            params: params.clone(),
            shared: Arc::new(Shared {
                inbound: Mutex::new(VecDeque::new()),
                outbound: Mutex::new(VecDeque::new()),
                connected: AtomicBool::new(false),
                rerun_setup: AtomicBool::new(false),
                stop,
            }),
        })
    }

    /// Address the listening socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get a link to this transport.
    pub fn link(&self) -> TransportLink {
        TransportLink {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the transport thread.
    pub fn start(self) -> Result<TransportHandle, TransportError> {
        let link = self.link();

        let join_handle = thread::Builder::new()
            .name(String::from("transport"))
            .spawn(move || self.run())
            .map_err(TransportError::SpawnError)?;

        Ok(TransportHandle {
            link,
            join_handle: Some(join_handle),
        })
    }

    /// Run the transport until the stop signal is raised.
    ///
    /// Accepts a connection, then alternates between flushing outbound packets and polling the
    /// socket for data. If the peer closes the connection, or sends nothing for longer than the
    /// accept timeout, the connection is dropped and a new one accepted.
    pub fn run(self) {
        let mut connection: Option<Connection> = None;
        let mut recv_buffer = vec![0u8; self.params.recv_buffer_size.max(1)];

        while !self.shared.stop.is_stopped() {
            if connection.is_none() {
                connection = self.accept();
                continue
            }

            let retire_reason = match connection.as_mut() {
                Some(conn) => {
                    self.flush_outbound(conn);
                    self.service(conn, &mut recv_buffer)
                },
                None => None
            };

            if let Some(reason) = retire_reason {
                if let Some(conn) = connection.take() {
                    self.retire(conn, reason);
                }
            }
        }

        if let Some(conn) = connection.take() {
            self.retire(conn, RetireReason::Stopping);
        }

        info!("Transport stopped");
    }

    /// Poll the listener for a new peer.
    fn accept(&self) -> Option<Connection> {
        match self.listener.accept() {
            Ok((stream, peer_addr)) => {
                match self.configure_stream(&stream) {
                    Ok(_) => (),
                    Err(e) => {
                        warn!("Could not configure connection from {}, dropping it: {}", peer_addr, e);
                        return None
                    }
                }

                info!("FMS connected from {}", peer_addr);
                {
                    let _outbound = lock(&self.shared.outbound);
                    self.shared.connected.store(true, Ordering::Relaxed);
                }

                Some(Connection {
                    stream,
                    peer_addr,
                    framer: Framer::new(self.params.max_pending_bytes),
                    last_activity: Instant::now(),
                })
            },
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(self.params.poll_interval());
                None
            },
            Err(e) => {
                warn!("Error accepting a connection: {}", e);
                thread::sleep(self.params.poll_interval());
                None
            }
        }
    }

    fn configure_stream(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.params.poll_interval()))?;
        stream.set_write_timeout(Some(self.params.accept_timeout()))?;
        stream.set_nodelay(true)
    }

    /// Poll the connection once for data, returning a reason if it should be dropped.
    fn service(&self, conn: &mut Connection, recv_buffer: &mut [u8]) -> Option<RetireReason> {
        match conn.stream.read(recv_buffer) {
            Ok(0) => return Some(RetireReason::PeerClosed),
            Ok(n) => {
                trace!("Recieved {} bytes from {}", n, conn.peer_addr);
                conn.last_activity = Instant::now();

                let batch = conn.framer.push(&recv_buffer[..n]);

                for broken in batch.broken.iter() {
                    warn!(
                        "Broken packet dropped ({} bytes): {}",
                        broken.len(),
                        String::from_utf8_lossy(broken)
                    );
                }

                if !batch.frames.is_empty() {
                    lock(&self.shared.inbound).extend(batch.frames);
                }
            },
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => {
                warn!("Error reading from {}: {}", conn.peer_addr, e);
                return Some(RetireReason::ReadError)
            }
        }

        if conn.last_activity.elapsed() > self.params.accept_timeout() {
            return Some(RetireReason::Silent)
        }

        None
    }

    /// Write any queued outbound packets to the peer.
    fn flush_outbound(&self, conn: &mut Connection) {
        let pending: Vec<Vec<u8>> = lock(&self.shared.outbound).drain(..).collect();

        for bytes in pending {
            // Send failures are not reported to the sender, a dead peer will be picked up by the
            // read side
            match conn.stream.write_all(&bytes) {
                Ok(_) => trace!("Sent {} bytes to {}", bytes.len(), conn.peer_addr),
                Err(e) => {
                    debug!("Could not send to {}: {}", conn.peer_addr, e);
                    break
                }
            }
        }
    }

    /// Close a connection and request that the hardware setup is re-applied.
    fn retire(&self, conn: Connection, reason: RetireReason) {
        let Connection { stream, peer_addr, mut framer, last_activity } = conn;

        match reason {
            RetireReason::Silent => warn!(
                "Nothing recieved from {} for {:.2} s, dropping the connection",
                peer_addr,
                last_activity.elapsed().as_secs_f64()
            ),
            RetireReason::PeerClosed => info!("FMS at {} closed the connection", peer_addr),
            RetireReason::ReadError => warn!("Dropping the connection to {}", peer_addr),
            RetireReason::Stopping => info!("Closing the connection to {}", peer_addr),
        }

        let discarded = framer.clear();
        if discarded > 0 {
            debug!("Discarded {} bytes of an incomplete packet", discarded);
        }

        stream.shutdown(Shutdown::Both).ok();

        // Replies queued for this peer must never reach the next one
        {
            let mut outbound = lock(&self.shared.outbound);
            outbound.clear();
            self.shared.connected.store(false, Ordering::Relaxed);
        }

        if reason != RetireReason::Stopping {
            self.shared.rerun_setup.store(true, Ordering::Relaxed);
        }
    }
}

impl TransportHandle {
    /// Get a link to the running transport.
    pub fn link(&self) -> TransportLink {
        self.link.clone()
    }

    /// Request the transport stops after its current poll.
    ///
    /// This raises the shared stop signal the transport was created with.
    pub fn stop(&self) {
        self.link.shared.stop.stop();
    }

    /// Wait for the transport thread to exit.
    pub fn join(mut self) {
        if let Some(jh) = self.join_handle.take() {
            if jh.join().is_err() {
                warn!("Transport thread panicked");
            }
        }
    }
}

impl TransportLink {
    /// Pop the oldest received frame, if there is one. Never blocks.
    pub fn next_frame(&self) -> Option<String> {
        lock(&self.shared.inbound).pop_front()
    }

    /// Queue an encoded packet to be sent to the peer.
    ///
    /// This is best effort, if no peer is connected the packet is dropped, and write failures
    /// are not reported back.
    pub fn send(&self, bytes: Vec<u8>) {
        let mut outbound = lock(&self.shared.outbound);

        if !self.is_connected() {
            debug!("No FMS connected, dropping {} byte packet", bytes.len());
            return
        }

        outbound.push_back(bytes);
    }

    /// Whether a peer is currently connected
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Returns true once after each dropped connection, meaning the hardware setup should be
    /// re-applied before the next session.
    pub fn take_rerun_setup(&self) -> bool {
        self.shared.rerun_setup.swap(false, Ordering::Relaxed)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Lock a mutex, recovering the data if another thread panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
