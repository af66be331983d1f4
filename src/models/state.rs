use serde::Serialize;
use strum::Display;

/// The connection state held by the
/// [`ConnectionStateMachine`](crate::state_machine::ConnectionStateMachine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
pub enum ConnectionState {
    /// Doing nothing.
    #[default]
    None,

    /// An inbound-accept collaborator is waiting for a peer to dial in.
    Listening,

    /// An outbound connection attempt is in flight.
    Connecting,

    /// A data pump is running over an established connection.
    Connected,
}

impl ConnectionState {
    /// Returns true iff this state is compatible with the given set of live
    /// workers.
    ///
    ///  - `None`, `Listening`: no workers
    ///  - `Connecting`: a connect worker, no pump
    ///  - `Connected`: a pump, no connect worker
    pub fn admits(self, connect_worker: bool, pump_worker: bool) -> bool {
        match self {
            ConnectionState::None | ConnectionState::Listening => !connect_worker && !pump_worker,
            ConnectionState::Connecting => connect_worker && !pump_worker,
            ConnectionState::Connected => !connect_worker && pump_worker,
        }
    }
}

/// A single state change, as broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl std::fmt::Display for StateTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
