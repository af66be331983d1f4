//! Inbound side: wait for one peer to dial in, then hand the stream over.

use std::io;
use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing::warn;

use crate::models::connection::Connection;
use crate::models::peer::PeerId;
use crate::models::state::ConnectionState;
use crate::state_machine::StateMachineHandle;

/// Accept a single inbound connection on `listener` and adopt it.
///
/// The state is `Listening` while waiting. If accepting fails the state goes
/// back to `None` and the error is returned.
pub async fn accept_one(listener: TcpListener, handle: &StateMachineHandle) -> Result<()> {
    let local = listener.local_addr()?;
    handle.set_state(ConnectionState::Listening).await?;
    info!("listening for a peer on {local}");

    let (stream, address) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => return Err(stop_listening(handle, local, e).await),
    };
    stream.set_nodelay(true)?;
    drop(listener);

    info!("accepted connection from {address}");
    handle
        .adopt(Connection::new(PeerId::from(address), stream))
        .await?;
    Ok(())
}

/// Leave `Listening` after a failed accept. The accept error is what the
/// caller gets, even when the state has moved on in the meantime.
async fn stop_listening(
    handle: &StateMachineHandle,
    local: SocketAddr,
    error: io::Error,
) -> anyhow::Error {
    warn!("failed to accept on {local}: {error}");
    if let Err(e) = handle.set_state(ConnectionState::None).await {
        warn!("could not leave Listening after failed accept: {e}");
    }
    anyhow::Error::new(error).context(format!("failed to accept on {local}"))
}
