use std::net::SocketAddr;

use messages::Frame;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Every connectivity state a transport may report. Most transports only
/// produce a subset, see [`Transport::supported_states`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportState {
    Idle,
    Scanning,
    Connecting,
    Services,
    Characteristics,
    Connected,
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Unable to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("The network is not connected")]
    Unreachable,
    #[error("The connection attempt was abandoned")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateEvent {
    pub epoch: u64,
    pub state: TransportState,
}

/// Observer handed to a transport by [`Transport::subscribe`].
///
/// Every notification is stamped with the epoch of the subscription so the
/// receiver can tell which connect/disconnect request it belongs to.
#[derive(Clone, Debug)]
pub struct StateUpdates {
    epoch: u64,
    tx: mpsc::UnboundedSender<StateEvent>,
}

impl StateUpdates {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<StateEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn notify(&self, state: TransportState) {
        let event = StateEvent { epoch: self.epoch, state };
        if self.tx.send(event).is_err() {
            log::trace!("Dropping {:?}, nobody is listening for transport state", state);
        }
    }
}

/// Resolves a single connect request. Consumed on use, so a transport can
/// only report the outcome once. Dropping it unresolved counts as
/// [`ConnectError::Cancelled`].
#[derive(Debug)]
pub struct Completion(oneshot::Sender<Result<(), ConnectError>>);

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<Result<(), ConnectError>>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn succeed(self) {
        self.resolve(Ok(()))
    }

    pub fn fail(self, error: ConnectError) {
        self.resolve(Err(error))
    }

    pub fn resolve(self, result: Result<(), ConnectError>) {
        if self.0.send(result).is_err() {
            log::debug!("Connect completion arrived after the request was abandoned");
        }
    }
}

/// An unreliable datagram channel to the vehicle.
///
/// All methods are called from inside a tokio runtime and must not block.
/// Outcomes are reported through the [`Completion`] and the subscribed
/// [`StateUpdates`], never through return values.
pub trait Transport: Send + 'static {
    /// States this transport is able to emit.
    fn supported_states(&self) -> &'static [TransportState];

    /// Replaces the current state observer.
    fn subscribe(&mut self, updates: StateUpdates);

    /// Starts whatever discovery the transport needs. `completion` must be
    /// resolved exactly once, from the transport's own execution context.
    fn connect(&mut self, target: Option<SocketAddr>, completion: Completion);

    /// Releases everything acquired by `connect` and reports `Idle`.
    /// Calling it while already disconnected is fine.
    fn disconnect(&mut self);

    /// Best-effort send. Failures are swallowed.
    fn send(&mut self, frame: &Frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn updates_are_stamped_with_their_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let updates = StateUpdates::new(7, tx);
        updates.notify(TransportState::Connected);

        let event = rx.recv().await.unwrap();
        assert_eq!(event, StateEvent { epoch: 7, state: TransportState::Connected });
    }

    #[tokio::test]
    async fn dropped_completion_reads_as_closed() {
        let (completion, rx) = Completion::channel();
        drop(completion);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn completion_after_receiver_gone_is_harmless() {
        let (completion, rx) = Completion::channel();
        drop(rx);
        completion.fail(ConnectError::Unreachable);
    }
}
