use serde::Serialize;

use super::peer::PeerId;

/// Text decoded from the bytes returned by one read on the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub peer: PeerId,
    pub text: String,
}

impl Record {
    /// Decode `bytes` as UTF-8. Invalid sequences become U+FFFD; a multi-byte
    /// character split across two reads decodes as replacement characters in
    /// both records.
    pub fn decode(peer: PeerId, bytes: &[u8]) -> Self {
        Self {
            peer,
            text: String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}
