use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use link::{
    Completion, ConnectError, ConnectOutcome, InputSource, LinkController, LinkDelegate, LinkHandle,
    LinkState, StateUpdates, Transport, TransportState, DISPATCH_PERIOD,
};
use messages::{ControlSample, Frame};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Shared {
    subscriber: Option<StateUpdates>,
    completions: Vec<Option<Completion>>,
    targets: Vec<Option<SocketAddr>>,
    sent: Vec<Frame>,
    disconnects: usize,
}

/// Transport double. Tests resolve connects and emit states by hand.
#[derive(Clone, Default)]
struct MockTransport(Arc<Mutex<Shared>>);

impl MockTransport {
    fn emit(&self, state: TransportState) {
        let shared = self.0.lock().unwrap();
        shared.subscriber.as_ref().expect("nobody subscribed").notify(state);
    }

    fn resolve(&self, attempt: usize, result: Result<(), ConnectError>) {
        let completion = self.0.lock().unwrap().completions[attempt].take()
            .expect("attempt already resolved");
        completion.resolve(result);
    }

    fn connects(&self) -> usize {
        self.0.lock().unwrap().completions.len()
    }

    fn sent(&self) -> Vec<Frame> {
        self.0.lock().unwrap().sent.clone()
    }

    fn disconnects(&self) -> usize {
        self.0.lock().unwrap().disconnects
    }
}

impl Transport for MockTransport {
    fn supported_states(&self) -> &'static [TransportState] {
        &[TransportState::Idle, TransportState::Scanning, TransportState::Connected]
    }

    fn subscribe(&mut self, updates: StateUpdates) {
        self.0.lock().unwrap().subscriber = Some(updates);
    }

    fn connect(&mut self, target: Option<SocketAddr>, completion: Completion) {
        let mut shared = self.0.lock().unwrap();
        shared.targets.push(target);
        shared.completions.push(Some(completion));
    }

    fn disconnect(&mut self) {
        let mut shared = self.0.lock().unwrap();
        shared.disconnects += 1;
        if let Some(updates) = &shared.subscriber {
            updates.notify(TransportState::Idle);
        }
    }

    fn send(&mut self, frame: &Frame) {
        self.0.lock().unwrap().sent.push(*frame);
    }
}

#[derive(Default)]
struct Recorded {
    states: Vec<LinkState>,
    failures: Vec<(String, Option<String>)>,
    sends: usize,
}

#[derive(Clone, Default)]
struct RecordingDelegate(Arc<Mutex<Recorded>>);

impl LinkDelegate for RecordingDelegate {
    fn did_update(&mut self, state: LinkState) {
        self.0.lock().unwrap().states.push(state);
    }

    fn did_fail(&mut self, title: &str, message: Option<&str>) {
        self.0.lock().unwrap().failures.push((title.to_string(), message.map(str::to_string)));
    }

    fn did_send(&mut self) {
        self.0.lock().unwrap().sends += 1;
    }
}

struct FixedInput(Mutex<Option<ControlSample>>);

impl FixedInput {
    fn new(sample: Option<ControlSample>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(sample)))
    }
}

impl InputSource for FixedInput {
    fn sample(&self) -> Option<ControlSample> {
        *self.0.lock().unwrap()
    }
}

struct Rig {
    transport: MockTransport,
    delegate: RecordingDelegate,
    yaw: Arc<AtomicBool>,
    handle: LinkHandle,
}

fn rig() -> Rig {
    let transport = MockTransport::default();
    let delegate = RecordingDelegate::default();
    let yaw = Arc::new(AtomicBool::new(true));
    let handle = LinkController::spawn(transport.clone(), yaw.clone(), delegate.clone());
    Rig { transport, delegate, yaw, handle }
}

/// Lets the controller task drain whatever is ready.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Steps the paused clock one dispatch period at a time.
async fn run_ticks(count: u32) {
    for _ in 0..count {
        tokio::time::advance(DISPATCH_PERIOD).await;
        settle().await;
    }
}

fn start_connect(handle: &LinkHandle) -> JoinHandle<ConnectOutcome> {
    let handle = handle.clone();
    tokio::spawn(async move { handle.connect(None).await.unwrap() })
}

fn sample() -> ControlSample {
    ControlSample { roll: 1.0, pitch: -1.0, yaw: 0.5, thrust: 32768.0 }
}

async fn connected_rig() -> Rig {
    let rig = rig();
    rig.handle.set_input_source(Some(FixedInput::new(Some(sample())))).unwrap();

    let pending = start_connect(&rig.handle);
    settle().await;
    rig.transport.emit(TransportState::Connected);
    rig.transport.resolve(0, Ok(()));
    assert_eq!(pending.await.unwrap(), ConnectOutcome::Connected);
    rig
}

#[tokio::test(start_paused = true)]
async fn connect_then_connected_starts_dispatch() {
    let rig = connected_rig().await;

    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.state, LinkState::Connected);
    assert!(status.dispatching);
    assert_eq!(rig.handle.state(), LinkState::Connected);
    assert_eq!(rig.delegate.0.lock().unwrap().states, vec![LinkState::Connected]);

    // nothing goes out before the first period elapses
    assert!(rig.transport.sent().is_empty());

    run_ticks(1).await;
    assert_eq!(rig.transport.sent().len(), 1);

    run_ticks(3).await;
    let sent = rig.transport.sent();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0], messages::encode(&sample(), true));
    assert_eq!(rig.delegate.0.lock().unwrap().sends, 4);
}

#[tokio::test(start_paused = true)]
async fn idle_notification_stops_dispatch() {
    let rig = connected_rig().await;

    tokio::time::advance(DISPATCH_PERIOD).await;
    settle().await;
    assert_eq!(rig.transport.sent().len(), 1);

    rig.transport.emit(TransportState::Idle);
    settle().await;

    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.state, LinkState::Idle);
    assert!(!status.dispatching);

    run_ticks(4).await;
    assert_eq!(rig.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_reports_once_and_stays_idle() {
    let rig = rig();
    let pending = start_connect(&rig.handle);
    settle().await;
    rig.transport.resolve(0, Err(ConnectError::Unreachable));

    assert_eq!(pending.await.unwrap(), ConnectOutcome::Failed);
    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.state, LinkState::Idle);
    assert!(!status.dispatching);
    // the transport is told to let go of the failed attempt
    assert_eq!(rig.transport.disconnects(), 1);

    let recorded = rig.delegate.0.lock().unwrap();
    assert_eq!(recorded.failures, vec![(
        "Network Error".to_string(),
        Some("The network is not connected".to_string()),
    )]);
}

#[tokio::test(start_paused = true)]
async fn failure_after_connecting_returns_to_idle() {
    let rig = rig();
    let pending = start_connect(&rig.handle);
    settle().await;
    rig.transport.emit(TransportState::Scanning);
    settle().await;
    assert_eq!(rig.handle.state(), LinkState::Connecting);

    rig.transport.resolve(0, Err(ConnectError::Unreachable));
    assert_eq!(pending.await.unwrap(), ConnectOutcome::Failed);
    assert_eq!(rig.handle.state(), LinkState::Idle);
    assert_eq!(rig.delegate.0.lock().unwrap().states,
        vec![LinkState::Connecting, LinkState::Idle]);
}

#[tokio::test(start_paused = true)]
async fn dropped_completion_counts_as_failure() {
    let rig = rig();
    let pending = start_connect(&rig.handle);
    settle().await;
    let completion = rig.transport.0.lock().unwrap().completions[0].take().unwrap();
    drop(completion);

    assert_eq!(pending.await.unwrap(), ConnectOutcome::Failed);
    assert_eq!(rig.delegate.0.lock().unwrap().failures.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn back_to_back_connects_yield_one_dispatch_loop() {
    let rig = rig();
    rig.handle.set_input_source(Some(FixedInput::new(Some(sample())))).unwrap();

    let first = start_connect(&rig.handle);
    let second = start_connect(&rig.handle);
    settle().await;
    assert_eq!(rig.transport.connects(), 2);
    assert_eq!(first.await.unwrap(), ConnectOutcome::Superseded);

    rig.transport.emit(TransportState::Connected);
    rig.transport.resolve(1, Ok(()));
    assert_eq!(second.await.unwrap(), ConnectOutcome::Connected);

    // the first attempt resolving late changes nothing
    rig.transport.resolve(0, Ok(()));
    settle().await;

    tokio::time::advance(DISPATCH_PERIOD).await;
    settle().await;
    assert_eq!(rig.transport.sent().len(), 1);
    assert!(rig.handle.status().await.unwrap().dispatching);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_tears_down() {
    let rig = connected_rig().await;

    let outcome = rig.handle.connect(None).await.unwrap();
    assert_eq!(outcome, ConnectOutcome::TornDown);
    settle().await;

    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.state, LinkState::Idle);
    assert!(!status.dispatching);
    assert_eq!(rig.transport.disconnects(), 1);
    assert_eq!(rig.transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let rig = connected_rig().await;

    rig.handle.disconnect().await.unwrap();
    rig.handle.disconnect().await.unwrap();
    settle().await;

    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.state, LinkState::Idle);
    assert!(!status.dispatching);
    assert_eq!(rig.transport.disconnects(), 2);

    // fresh controller, never connected
    let idle = rig_idle_disconnect().await;
    assert_eq!(idle, LinkState::Idle);
}

async fn rig_idle_disconnect() -> LinkState {
    let rig = rig();
    rig.handle.disconnect().await.unwrap();
    rig.handle.disconnect().await.unwrap();
    rig.handle.status().await.unwrap().state
}

#[tokio::test(start_paused = true)]
async fn late_completion_after_disconnect_is_ignored() {
    let rig = rig();
    let pending = start_connect(&rig.handle);
    settle().await;

    rig.handle.disconnect().await.unwrap();
    assert_eq!(pending.await.unwrap(), ConnectOutcome::Cancelled);

    // the transport only now finishes the old attempt
    rig.transport.resolve(0, Ok(()));
    settle().await;

    let status = rig.handle.status().await.unwrap();
    assert_eq!(status.state, LinkState::Idle);
    assert!(!status.dispatching);
    assert!(rig.delegate.0.lock().unwrap().failures.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_state_updates_are_discarded() {
    let rig = rig();
    let pending = start_connect(&rig.handle);
    settle().await;
    let stale = rig.transport.0.lock().unwrap().subscriber.clone().unwrap();

    rig.handle.disconnect().await.unwrap();
    assert_eq!(pending.await.unwrap(), ConnectOutcome::Cancelled);

    stale.notify(TransportState::Connected);
    settle().await;
    assert_eq!(rig.handle.state(), LinkState::Idle);
}

#[tokio::test(start_paused = true)]
async fn connected_wins_over_earlier_idle() {
    let rig = rig();
    let _pending = start_connect(&rig.handle);
    settle().await;

    rig.transport.emit(TransportState::Idle);
    rig.transport.emit(TransportState::Connected);
    settle().await;
    assert_eq!(rig.handle.state(), LinkState::Connected);
}

#[tokio::test(start_paused = true)]
async fn ticks_without_input_send_nothing() {
    let rig = connected_rig().await;
    rig.handle.set_input_source(None).unwrap();

    run_ticks(3).await;
    assert!(rig.transport.sent().is_empty());

    let input = FixedInput::new(None);
    rig.handle.set_input_source(Some(input.clone())).unwrap();
    run_ticks(2).await;
    assert!(rig.transport.sent().is_empty());

    *input.0.lock().unwrap() = Some(sample());
    tokio::time::advance(DISPATCH_PERIOD).await;
    settle().await;
    assert_eq!(rig.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn yaw_preference_is_read_every_tick() {
    let rig = connected_rig().await;

    tokio::time::advance(DISPATCH_PERIOD).await;
    settle().await;
    rig.yaw.store(false, std::sync::atomic::Ordering::Relaxed);
    tokio::time::advance(DISPATCH_PERIOD).await;
    settle().await;

    let sent = rig.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(Frame::decode(sent[0].as_bytes()).unwrap().yaw, 0.5);
    assert_eq!(Frame::decode(sent[1].as_bytes()).unwrap().yaw, 0.0);
}

#[tokio::test(start_paused = true)]
async fn connect_passes_target_through() {
    let rig = rig();
    let target: SocketAddr = "10.0.0.7:2390".parse().unwrap();
    let handle = rig.handle.clone();
    let _pending = tokio::spawn(async move { handle.connect(Some(target)).await });
    settle().await;

    assert_eq!(rig.transport.0.lock().unwrap().targets, vec![Some(target)]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_disconnects_and_closes_handle() {
    let rig = connected_rig().await;
    rig.handle.shutdown().await.unwrap();
    settle().await;

    assert_eq!(rig.transport.disconnects(), 1);
    assert!(rig.handle.status().await.is_err());

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert!(rig.transport.sent().is_empty());
}
