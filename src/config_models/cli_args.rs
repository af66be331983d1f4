use std::net::SocketAddr;
use std::time::Duration;

use clap::builder::RangedI64ValueParser;
use clap::Parser;

use super::link_config::ConnectFailurePolicy;
use super::link_config::LinkConfig;
use crate::models::peer::PeerId;
use crate::models::peer::ServiceId;
use crate::models::peer::SERIAL_PORT_SERVICE;

/// How received records are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// The decoded text, as received.
    #[default]
    Text,

    /// One JSON object per record.
    Json,
}

/// Command-line arguments of `sensor-link`
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// Peer to connect to, e.g.: --peer 127.0.0.1:9000.
    #[clap(long, required_unless_present = "listen", conflicts_with = "listen")]
    pub peer: Option<PeerId>,

    /// Wait for one inbound connection on this address instead of dialing a
    /// peer, e.g.: --listen 0.0.0.0:9000.
    #[clap(long)]
    pub listen: Option<SocketAddr>,

    /// Service identifier to open the stream to.
    #[clap(long, default_value = SERIAL_PORT_SERVICE)]
    pub service_id: ServiceId,

    /// Max number of bytes per read, and thus per record.
    #[clap(long, default_value = "1024", value_parser(RangedI64ValueParser::<usize>::new().range(1..=65536)))]
    pub read_chunk_size: usize,

    /// Give up a connect attempt after this long, e.g.: --connect-timeout 10s.
    /// Without it, an attempt lasts as long as the transport lets it.
    #[clap(long, value_parser = humantime::parse_duration)]
    pub connect_timeout: Option<Duration>,

    /// What to do with the connection state when a connect attempt fails.
    ///
    /// The default returns to None so the attempt is visibly over;
    /// `stay-connecting` keeps the legacy behaviour of remaining in Connecting.
    #[clap(long, value_enum, default_value_t = ConnectFailurePolicy::ResetToNone)]
    pub on_connect_failure: ConnectFailurePolicy,

    /// Format of records printed to stdout.
    #[clap(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl Args {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            service_id: self.service_id.clone(),
            read_chunk_size: self.read_chunk_size,
            connect_timeout: self.connect_timeout,
            on_connect_failure: self.on_connect_failure,
            ..LinkConfig::default()
        }
    }
}
