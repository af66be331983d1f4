use bytes::Bytes;
use tokio::sync::oneshot;

use super::connection::Connection;
use super::peer::PeerId;
use super::state::ConnectionState;
use crate::errors::StateMachineError;
use crate::worker::WorkerId;

/// Requests from a [`StateMachineHandle`](crate::state_machine::StateMachineHandle)
/// to the state-machine actor. Each is processed as one atomic step.
#[derive(Debug, strum::Display)]
pub(crate) enum StateMachineCommand {
    Connect {
        peer: PeerId,
        done: oneshot::Sender<Result<(), StateMachineError>>,
    },

    Adopt {
        connection: Connection,
        done: oneshot::Sender<()>,
    },

    Stop {
        done: oneshot::Sender<()>,
    },

    GetState(oneshot::Sender<ConnectionState>),

    SetState {
        state: ConnectionState,
        done: oneshot::Sender<Result<(), StateMachineError>>,
    },

    /// Bytes for the live pump's outbound queue. Fire-and-forget.
    Write(Bytes),

    /// Stop everything, then end the actor.
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// How a connect attempt ended, when it was not cancelled.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected(Connection),
    Failed(String),
}

/// How a pump ended, when it was not cancelled.
///
/// The state machine treats both alike; the distinction is kept for logs.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum PumpOutcome {
    /// The peer closed the stream (zero-length read).
    Closed,

    /// A read failed.
    Error(String),
}

/// Completion reports from worker tasks to the state-machine actor.
///
/// A worker sends at most one report and only if it was not cancelled.
#[derive(Debug, strum::Display)]
pub(crate) enum WorkerReport {
    Connect {
        worker_id: WorkerId,
        outcome: ConnectOutcome,
    },

    Pump {
        worker_id: WorkerId,
        outcome: PumpOutcome,
    },
}
