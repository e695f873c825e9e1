use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use messages::ControlSample;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::transport::{Completion, ConnectError, StateEvent, StateUpdates, Transport, TransportState};

/// Period of the command dispatch loop (20 Hz).
pub const DISPATCH_PERIOD: Duration = Duration::from_millis(50);

const FAILURE_TITLE: &str = "Network Error";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
}

impl From<TransportState> for LinkState {
    fn from(state: TransportState) -> Self {
        match state {
            TransportState::Idle => LinkState::Idle,
            TransportState::Connected => LinkState::Connected,
            TransportState::Scanning
            | TransportState::Connecting
            | TransportState::Services
            | TransportState::Characteristics => LinkState::Connecting,
        }
    }
}

/// Supplies pilot input to the dispatch loop. `None` means there is nothing
/// fresh to send and the tick is skipped.
pub trait InputSource: Send + Sync {
    fn sample(&self) -> Option<ControlSample>;
}

/// Read-only view of the pilot's persisted preferences. Consulted on every
/// tick.
pub trait Settings: Send + Sync {
    fn yaw_enabled(&self) -> bool;
}

impl Settings for AtomicBool {
    fn yaw_enabled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

pub trait LinkDelegate: Send {
    fn did_update(&mut self, state: LinkState);
    fn did_fail(&mut self, title: &str, message: Option<&str>);
    fn did_send(&mut self) {}
}

/// Reports link events through the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDelegate;

impl LinkDelegate for LogDelegate {
    fn did_update(&mut self, state: LinkState) {
        log::info!("Link state is now {:?}", state);
    }

    fn did_fail(&mut self, title: &str, message: Option<&str>) {
        match message {
            Some(message) => log::error!("{}: {}", title, message),
            None => log::error!("{}", title),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Failed,
    /// The link was not idle, so the request tore the session down instead.
    TornDown,
    /// A newer connect request replaced this one before it resolved.
    Superseded,
    /// `disconnect` was called before the attempt resolved.
    Cancelled,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("link controller has shut down")]
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub dispatching: bool,
    pub epoch: u64,
    pub frames_sent: u64,
}

enum Command {
    Connect {
        target: Option<SocketAddr>,
        reply: oneshot::Sender<ConnectOutcome>,
    },
    Disconnect(oneshot::Sender<()>),
    SetInputSource(Option<Arc<dyn InputSource>>),
    Status(oneshot::Sender<LinkStatus>),
    Shutdown(oneshot::Sender<()>),
}

struct Attempt {
    epoch: u64,
    completion: oneshot::Receiver<Result<(), ConnectError>>,
    reply: oneshot::Sender<ConnectOutcome>,
}

impl Attempt {
    fn finish(self, outcome: ConnectOutcome) {
        // the caller may have stopped waiting
        let _ = self.reply.send(outcome);
    }
}

/// Cheap, cloneable front end to a running [`LinkController`].
#[derive(Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LinkState>,
}

impl LinkHandle {
    /// Starts a connection attempt and waits for it to resolve.
    ///
    /// Calling this while the link is not idle disconnects instead and
    /// returns [`ConnectOutcome::TornDown`].
    pub async fn connect(&self, target: Option<SocketAddr>) -> Result<ConnectOutcome, LinkError> {
        let (reply, outcome) = oneshot::channel();
        self.request(Command::Connect { target, reply })?;
        outcome.await.map_err(|_| LinkError::Closed)
    }

    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let (reply, done) = oneshot::channel();
        self.request(Command::Disconnect(reply))?;
        done.await.map_err(|_| LinkError::Closed)
    }

    pub fn set_input_source(&self, source: Option<Arc<dyn InputSource>>) -> Result<(), LinkError> {
        self.request(Command::SetInputSource(source))
    }

    pub async fn status(&self) -> Result<LinkStatus, LinkError> {
        let (reply, status) = oneshot::channel();
        self.request(Command::Status(reply))?;
        status.await.map_err(|_| LinkError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), LinkError> {
        let (reply, done) = oneshot::channel();
        self.request(Command::Shutdown(reply))?;
        done.await.map_err(|_| LinkError::Closed)
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    fn request(&self, command: Command) -> Result<(), LinkError> {
        self.commands.send(command).map_err(|_| LinkError::Closed)
    }
}

/// Owns the active transport and the dispatch timer.
///
/// All state lives on a single task: commands from [`LinkHandle`]s,
/// transport notifications, connect completions and timer ticks are handled
/// one at a time by [`LinkController::run`].
pub struct LinkController<T: Transport> {
    transport: T,
    settings: Arc<dyn Settings>,
    delegate: Box<dyn LinkDelegate>,
    input: Option<Arc<dyn InputSource>>,
    state: watch::Sender<LinkState>,
    epoch: u64,
    attempt: Option<Attempt>,
    dispatch: Option<Interval>,
    frames_sent: u64,
    events_tx: mpsc::UnboundedSender<StateEvent>,
    events: mpsc::UnboundedReceiver<StateEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<T: Transport> LinkController<T> {
    pub fn new<D>(transport: T, settings: Arc<dyn Settings>, delegate: D) -> (Self, LinkHandle)
    where
        D: LinkDelegate + 'static,
    {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(LinkState::Idle);

        let controller = Self {
            transport,
            settings,
            delegate: Box::new(delegate),
            input: None,
            state,
            epoch: 0,
            attempt: None,
            dispatch: None,
            frames_sent: 0,
            events_tx,
            events,
            commands,
        };
        let handle = LinkHandle {
            commands: commands_tx,
            state: state_rx,
        };
        (controller, handle)
    }

    /// Builds a controller and runs it on the current tokio runtime.
    pub fn spawn<D>(transport: T, settings: Arc<dyn Settings>, delegate: D) -> LinkHandle
    where
        D: LinkDelegate + 'static,
    {
        let (controller, handle) = Self::new(transport, settings, delegate);
        tokio::spawn(controller.run());
        handle
    }

    pub async fn run(mut self) {
        log::debug!("Link controller started, transport emits {:?}",
            self.transport.supported_states());

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.disconnect();
                        break
                    };
                    if let ControlFlow::Break(()) = self.handle(command) {
                        break
                    }
                }
                Some(event) = self.events.recv() => self.on_transport_state(event),
                result = completion(&mut self.attempt) => self.on_connect_completed(result),
                _ = tick(&mut self.dispatch) => self.on_tick(),
            }
        }

        log::debug!("Link controller stopped after {} frames", self.frames_sent);
    }

    fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect { target, reply } => self.connect(target, reply),
            Command::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::SetInputSource(source) => {
                log::debug!("Input source {}", if source.is_some() { "set" } else { "cleared" });
                self.input = source;
            }
            Command::Status(reply) => {
                let _ = reply.send(LinkStatus {
                    state: *self.state.borrow(),
                    dispatching: self.dispatch.is_some(),
                    epoch: self.epoch,
                    frames_sent: self.frames_sent,
                });
            }
            Command::Shutdown(reply) => {
                self.disconnect();
                let _ = reply.send(());
                return ControlFlow::Break(())
            }
        }
        ControlFlow::Continue(())
    }

    fn connect(&mut self, target: Option<SocketAddr>, reply: oneshot::Sender<ConnectOutcome>) {
        let state = *self.state.borrow();
        if state != LinkState::Idle {
            log::info!("Connect requested while {:?}, tearing the link down instead", state);
            self.disconnect();
            let _ = reply.send(ConnectOutcome::TornDown);
            return
        }

        if let Some(prior) = self.attempt.take() {
            log::debug!("Connect attempt {} superseded", prior.epoch);
            prior.finish(ConnectOutcome::Superseded);
        }

        self.epoch += 1;
        log::info!("Connect attempt {} to {}", self.epoch,
            target.map_or_else(|| "the default endpoint".to_string(), |t| t.to_string()));

        let (done, completion) = Completion::channel();
        self.transport.subscribe(StateUpdates::new(self.epoch, self.events_tx.clone()));
        self.attempt = Some(Attempt {
            epoch: self.epoch,
            completion,
            reply,
        });
        self.transport.connect(target, done);
    }

    fn disconnect(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            log::debug!("Connect attempt {} cancelled", attempt.epoch);
            attempt.finish(ConnectOutcome::Cancelled);
        }

        self.epoch += 1;
        self.transport.subscribe(StateUpdates::new(self.epoch, self.events_tx.clone()));
        self.transport.disconnect();
        self.stop_dispatch();
    }

    fn on_transport_state(&mut self, event: StateEvent) {
        if event.epoch != self.epoch {
            log::debug!("Discarding {:?} from stale epoch {} (current {})",
                event.state, event.epoch, self.epoch);
            return
        }
        if !self.transport.supported_states().contains(&event.state) {
            log::warn!("Transport reported undeclared state {:?}", event.state);
        }

        let state = LinkState::from(event.state);
        if state == LinkState::Idle {
            self.stop_dispatch();
        }
        self.set_state(state);
    }

    fn on_connect_completed(&mut self, result: Result<(), ConnectError>) {
        let Some(attempt) = self.attempt.take() else {
            return
        };

        match result {
            Ok(()) => {
                log::info!("Connect attempt {} succeeded", attempt.epoch);
                self.start_dispatch();
                attempt.finish(ConnectOutcome::Connected);
            }
            Err(e) => {
                log::warn!("Connect attempt {} failed: {}", attempt.epoch, e);
                // release whatever the attempt left behind; the Idle it
                // reports matches the state set below
                self.transport.disconnect();
                self.stop_dispatch();
                self.set_state(LinkState::Idle);
                self.delegate.did_fail(FAILURE_TITLE, Some(&e.to_string()));
                attempt.finish(ConnectOutcome::Failed);
            }
        }
    }

    fn on_tick(&mut self) {
        let Some(input) = &self.input else {
            return
        };
        let Some(sample) = input.sample() else {
            return
        };

        let frame = messages::encode(&sample, self.settings.yaw_enabled());
        self.transport.send(&frame);
        self.frames_sent += 1;
        log::trace!("Sent {:?}", sample);
        self.delegate.did_send();
    }

    fn start_dispatch(&mut self) {
        if self.dispatch.is_some() {
            log::debug!("Restarting dispatch loop");
        }
        let mut timer = tokio::time::interval_at(Instant::now() + DISPATCH_PERIOD, DISPATCH_PERIOD);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.dispatch = Some(timer);
    }

    fn stop_dispatch(&mut self) {
        if self.dispatch.take().is_some() {
            log::debug!("Dispatch loop stopped");
        }
    }

    fn set_state(&mut self, state: LinkState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false
            }
            *current = state;
            true
        });
        if changed {
            self.delegate.did_update(state);
        }
    }
}

async fn completion(attempt: &mut Option<Attempt>) -> Result<(), ConnectError> {
    match attempt {
        Some(attempt) => (&mut attempt.completion).await.unwrap_or(Err(ConnectError::Cancelled)),
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
