//! Control link to a remote quadrotor: a transport contract, a UDP reference
//! transport, and the controller that ships command frames at a fixed rate.

mod controller;
mod transport;
pub mod udp;

pub use controller::{
    ConnectOutcome, InputSource, LinkController, LinkDelegate, LinkError, LinkHandle, LinkState,
    LinkStatus, LogDelegate, Settings, DISPATCH_PERIOD,
};
pub use transport::{Completion, ConnectError, StateEvent, StateUpdates, Transport, TransportState};
pub use udp::{Reachability, RouteLookup, UdpLink, UdpLinkConfig};
