//! UDP link to an ESP-based quadrotor on the local Wi-Fi network.
//!
//! The vehicle listens on a fixed endpoint and never acknowledges anything,
//! so "connected" here only means the device network is reachable from this
//! host: a route to the device exists. The link binds a local port for the
//! vehicle's occasional replies, polls reachability while a session is open,
//! and fires frames at the device with `try_send_to`.
//!
//! The session's monitor task owns the socket. When it gives up on the route
//! the port is released with it, and a reconnect while the old task is still
//! winding down picks the same socket back up instead of binding again.

use std::fmt;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use messages::Frame;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::transport::{Completion, ConnectError, StateUpdates, Transport, TransportState};

pub const DEVICE_PORT: u16 = 2390;
pub const APP_PORT: u16 = 2399;
pub const DEVICE_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(Ipv4Addr::new(192, 168, 43, 42)), DEVICE_PORT);

const RECV_BUFFER_SIZE: usize = 256;

/// Decides whether the device network can be reached right now.
pub trait Reachability: Send + Sync + fmt::Debug {
    fn reachable(&self, device: SocketAddr) -> bool;
}

/// Asks the OS for a route to the device. Connecting a UDP socket sends
/// nothing, it only performs the route lookup.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteLookup;

impl Reachability for RouteLookup {
    fn reachable(&self, device: SocketAddr) -> bool {
        let unspecified: SocketAddr = match device {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        std::net::UdpSocket::bind(unspecified)
            .and_then(|lookup| lookup.connect(device))
            .is_ok()
    }
}

#[derive(Clone, Debug)]
pub struct UdpLinkConfig {
    /// Where frames are sent unless `connect` is given a target.
    pub device: SocketAddr,
    /// Local port to bind. Zero picks an ephemeral port.
    pub local_port: u16,
    pub broadcast: bool,
    pub reachability_poll: Duration,
    pub reachability: Arc<dyn Reachability>,
}

impl Default for UdpLinkConfig {
    fn default() -> Self {
        Self {
            device: DEVICE_ADDR,
            local_port: APP_PORT,
            broadcast: true,
            reachability_poll: Duration::from_secs(1),
            reachability: Arc::new(RouteLookup),
        }
    }
}

type SharedUpdates = Arc<Mutex<Option<StateUpdates>>>;

struct Session {
    device: SocketAddr,
    monitor: JoinHandle<()>,
}

pub struct UdpLink {
    config: UdpLinkConfig,
    updates: SharedUpdates,
    session: Option<Session>,
    /// Socket of the latest session. Only its monitor holds it strongly.
    socket: Weak<UdpSocket>,
    skipped_frames: u64,
}

impl UdpLink {
    pub fn new(config: UdpLinkConfig) -> Self {
        Self {
            config,
            updates: Arc::new(Mutex::new(None)),
            session: None,
            socket: Weak::new(),
            skipped_frames: 0,
        }
    }

    /// Frames dropped because the socket buffer was full.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// Local address of the open session, if its socket is still bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref()?;
        self.socket.upgrade()?.local_addr().ok()
    }

    fn bind(&self) -> std::io::Result<UdpSocket> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.local_port))?;
        socket.set_broadcast(self.config.broadcast)?;
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket)
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.monitor.abort();
            log::info!("Released UDP link to {}", session.device);
        }
    }
}

impl Default for UdpLink {
    fn default() -> Self {
        Self::new(UdpLinkConfig::default())
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        self.end_session();
    }
}

impl Transport for UdpLink {
    fn supported_states(&self) -> &'static [TransportState] {
        &[TransportState::Idle, TransportState::Connected]
    }

    fn subscribe(&mut self, updates: StateUpdates) {
        match self.updates.lock() {
            Ok(mut current) => *current = Some(updates),
            Err(poisoned) => *poisoned.into_inner() = Some(updates),
        }
    }

    fn connect(&mut self, target: Option<SocketAddr>, completion: Completion) {
        self.end_session();

        let device = target.unwrap_or(self.config.device);
        // an aborted monitor may not have been dropped yet, and its socket
        // still holds the port
        let socket = match self.socket.upgrade() {
            Some(socket) => {
                log::debug!("Reusing UDP socket {:?}", socket.local_addr().ok());
                socket
            }
            None => match self.bind() {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    log::error!("Failed to bind UDP port {}: {}", self.config.local_port, e);
                    completion.fail(ConnectError::Bind { port: self.config.local_port, source: e });
                    return
                }
            },
        };
        log::info!("UDP link bound to {:?}, watching for a route to {}",
            socket.local_addr().ok(), device);

        self.socket = Arc::downgrade(&socket);
        let monitor = tokio::spawn(monitor(
            socket,
            device,
            Arc::clone(&self.updates),
            Arc::clone(&self.config.reachability),
            completion,
            self.config.reachability_poll,
        ));
        self.session = Some(Session { device, monitor });
    }

    fn disconnect(&mut self) {
        self.end_session();
        notify(&self.updates, TransportState::Idle);
    }

    fn send(&mut self, frame: &Frame) {
        let Some(session) = &self.session else {
            log::trace!("No UDP session, dropping frame");
            return
        };
        let Some(socket) = self.socket.upgrade() else {
            log::trace!("UDP session to {} has ended, dropping frame", session.device);
            return
        };

        match socket.try_send_to(frame.as_ref(), session.device) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.skipped_frames += 1;
                log::trace!("Socket busy, skipped frame ({} so far)", self.skipped_frames);
            }
            Err(e) => log::debug!("Frame to {} dropped: {}", session.device, e),
        }
    }
}

fn notify(updates: &SharedUpdates, state: TransportState) {
    match updates.lock() {
        Ok(current) => {
            if let Some(updates) = current.as_ref() {
                updates.notify(state);
            }
        }
        Err(e) => log::warn!("Failed to acquire transport state observer: {}", e),
    }
}

/// Runs one session. Returning drops `socket` and with it the local port.
async fn monitor(
    socket: Arc<UdpSocket>,
    device: SocketAddr,
    updates: SharedUpdates,
    route: Arc<dyn Reachability>,
    completion: Completion,
    poll: Duration,
) {
    let mut completion = Some(completion);
    let mut was_reachable = false;
    let mut checks = tokio::time::interval(poll);
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = checks.tick() => {
                let is_reachable = route.reachable(device);
                match (was_reachable, is_reachable) {
                    (false, true) => {
                        log::info!("Route to {} is up", device);
                        notify(&updates, TransportState::Connected);
                        if let Some(completion) = completion.take() {
                            completion.succeed();
                        }
                    }
                    (false, false) => {
                        log::warn!("No route to {}", device);
                        if let Some(completion) = completion.take() {
                            completion.fail(ConnectError::Unreachable);
                        }
                        return
                    }
                    (true, false) => {
                        log::warn!("Lost route to {}", device);
                        notify(&updates, TransportState::Idle);
                        return
                    }
                    (true, true) => {}
                }
                was_reachable = is_reachable;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    log::debug!("Received {} bytes from {}: {}",
                        len, from, String::from_utf8_lossy(&buf[..len]));
                }
                Err(e) => log::debug!("UDP receive failed: {}", e),
            },
        }
    }
}
