use crate::models::state::ConnectionState;

/// Errors returned by [`StateMachineHandle`](crate::state_machine::StateMachineHandle).
///
/// Transport failures are never reported here; they surface only as state
/// transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StateMachineError {
    #[error("peer identifier is empty")]
    InvalidPeer,

    #[error(
        "state {requested} contradicts live workers (connect: {connect_worker}, pump: {pump_worker})"
    )]
    InconsistentState {
        requested: ConnectionState,
        connect_worker: bool,
        pump_worker: bool,
    },

    #[error("the connection state machine has shut down")]
    ActorGone,
}

/// a worker-handle error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorkerError {
    #[error("join error while waiting for worker to exit.  error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl WorkerError {
    /// Returns true if the error was caused by the worker task panicking.
    pub fn is_panic(&self) -> bool {
        match self {
            Self::JoinError(e) => e.is_panic(),
        }
    }
}
