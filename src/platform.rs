//! The platform services the link needs from its transport.

use std::net::SocketAddr;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::models::connection::ByteStream;
use crate::models::peer::PeerId;
use crate::models::peer::ServiceId;

/// Capabilities supplied by the transport (Bluetooth adapter, TCP stack, ...).
///
/// Dropping the future returned by [`open_stream`](Self::open_stream) must
/// abandon the attempt and release whatever half-open resource it holds; this
/// is how a connect attempt is cancelled.
#[async_trait]
pub trait PlatformAdapter: Send + Sync + std::fmt::Debug {
    /// Halt any ongoing peer discovery. Discovery and an active connection
    /// attempt are mutually exclusive on the transport.
    async fn cancel_discovery(&self) -> Result<()>;

    /// Open a stream to `peer` for `service`. Blocks until the transport
    /// accepts or refuses.
    async fn open_stream(&self, peer: &PeerId, service: &ServiceId) -> Result<Box<dyn ByteStream>>;
}

/// A [`PlatformAdapter`] over TCP. The peer identifier is a socket address and
/// there is no discovery to cancel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpAdapter;

#[async_trait]
impl PlatformAdapter for TcpAdapter {
    async fn cancel_discovery(&self) -> Result<()> {
        Ok(())
    }

    async fn open_stream(&self, peer: &PeerId, service: &ServiceId) -> Result<Box<dyn ByteStream>> {
        let address: SocketAddr = peer
            .as_str()
            .parse()
            .with_context(|| format!("peer `{peer}` is not a socket address"))?;

        debug!("dialing {address} (service {service} is implied by the port)");
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("failed to connect to {address}"))?;
        stream.set_nodelay(true)?;

        Ok(Box::new(stream))
    }
}
