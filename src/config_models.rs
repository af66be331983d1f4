pub mod cli_args;
pub mod link_config;
