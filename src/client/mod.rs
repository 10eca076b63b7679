//! socketlog client implementation

pub mod echo_client;

pub use crate::config::ClientConfig;
pub use echo_client::EchoClient;
