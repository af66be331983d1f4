use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

use super::peer::PeerId;

/// An ordered, reliable duplex byte stream.
///
/// Blanket-implemented for every tokio stream type, so TCP streams, in-memory
/// duplex pipes and platform sockets can all back a [`Connection`].
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug {}

/// An open stream plus the peer it belongs to.
///
/// Whoever holds the `Connection` owns the stream; dropping it closes the
/// stream.
#[derive(Debug)]
pub struct Connection {
    peer: PeerId,
    stream: Box<dyn ByteStream>,
}

impl Connection {
    /// Wrap an already-open stream. The stream must not have been shut down.
    pub fn new(peer: PeerId, stream: impl ByteStream + 'static) -> Self {
        Self::from_boxed(peer, Box::new(stream))
    }

    pub fn from_boxed(peer: PeerId, stream: Box<dyn ByteStream>) -> Self {
        Self { peer, stream }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub(crate) fn into_parts(self) -> (PeerId, Box<dyn ByteStream>) {
        (self.peer, self.stream)
    }
}
