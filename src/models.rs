pub mod channel;
pub mod connection;
pub mod peer;
pub mod record;
pub mod state;
