pub mod logging;
pub mod tcp_link;
