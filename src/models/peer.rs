use std::net::SocketAddr;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Service record for the Serial Port Profile; what a sensor exposes its byte
/// stream on.
pub const SERIAL_PORT_SERVICE: &str = "00001101-0000-1000-8000-00805f9b34fb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} identifier must not be empty")]
pub struct EmptyIdentifier {
    kind: &'static str,
}

/// Opaque handle naming a remote endpoint, as produced by discovery.
///
/// For Bluetooth this is the device address; for the TCP adapter it is a
/// socket address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A peer identifier is usable iff it names something.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = EmptyIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let peer = Self::new(s.trim());
        if peer.is_valid() {
            Ok(peer)
        } else {
            Err(EmptyIdentifier { kind: "peer" })
        }
    }
}

impl From<SocketAddr> for PeerId {
    fn from(address: SocketAddr) -> Self {
        Self(address.to_string())
    }
}

/// Well-known identifier of the service a stream is opened to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self(SERIAL_PORT_SERVICE.to_owned())
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServiceId {
    type Err = EmptyIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Err(EmptyIdentifier { kind: "service" })
        } else {
            Ok(Self(s.to_ascii_lowercase()))
        }
    }
}
