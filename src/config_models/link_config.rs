use std::time::Duration;

use crate::models::peer::ServiceId;

/// Bytes requested per read on the inbound stream.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;
const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 64;

/// What the state machine does when a connect attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, clap::ValueEnum)]
pub enum ConnectFailurePolicy {
    /// Return to `None`, so callers can tell the attempt is over.
    #[default]
    ResetToNone,

    /// Leave the state at `Connecting` until the next connect, adopt or stop.
    StayConnecting,
}

/// Tunables of a [`ConnectionStateMachine`](crate::state_machine::ConnectionStateMachine).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Service the connect worker opens its stream to.
    pub service_id: ServiceId,

    /// Upper bound on the bytes returned by one read, and so on the size of
    /// one [`Record`](crate::models::record::Record). Zero is treated as one.
    pub read_chunk_size: usize,

    /// Deadline for a connect attempt. `None` waits as long as the transport
    /// does.
    pub connect_timeout: Option<Duration>,

    pub on_connect_failure: ConnectFailurePolicy,

    /// Capacity of the channel carrying handle commands to the actor.
    pub command_channel_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_id: ServiceId::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            connect_timeout: None,
            on_connect_failure: ConnectFailurePolicy::default(),
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
        }
    }
}
