//! # socketlog - Shared-Log TCP Echo Server
//!
//! socketlog accepts any number of TCP clients, appends every byte they send to a
//! single shared log file and, whenever a client completes a record with `\n`,
//! streams the entire log back to that client.
//!
//! ## Features
//!
//! - **Shared Log Store**: one append-only file behind one lock, never torn
//! - **Concurrent Clients**: one Tokio task per connection, reaped on completion
//! - **Timestamps**: a background task appends a wall-clock record every 10 seconds
//! - **Graceful Shutdown**: SIGINT/SIGTERM drain all handlers and remove the log
//! - **Daemon Mode**: optional double-fork detach before the listener binds
//!
//! ## Quick Start
//!
//! ### Server
//! ```no_run
//! use socketlog::config::ServerConfig;
//! use socketlog::server::{spawn_signal_listener, LogServer, ShutdownCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::from_file("config/server.toml")?;
//!     let coordinator = ShutdownCoordinator::new();
//!     spawn_signal_listener(coordinator.handle())?;
//!
//!     let server = LogServer::with_coordinator(config, coordinator).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Client
//! ```no_run
//! use socketlog::client::EchoClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = EchoClient::connect("127.0.0.1:9000").await?;
//!     let log = client.send_record("hello").await?;
//!     assert!(log.ends_with(b"hello\n"));
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod server;
pub mod types;

/// Common error types used throughout socketlog
pub mod error {
    use std::fmt;

    /// socketlog error types
    #[derive(Debug)]
    pub enum SocketLogError {
        /// I/O operation failed
        Io(std::io::Error),
        /// Configuration error
        Config(String),
        /// Server startup or dispatch error
        Server(String),
        /// Log store error
        Storage(String),
        /// Client connection error
        Connection(String),
        /// Daemonization error
        Daemon(String),
        /// Shutdown sequence error
        Shutdown(String),
    }

    impl fmt::Display for SocketLogError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                SocketLogError::Io(e) => write!(f, "I/O error: {}", e),
                SocketLogError::Config(e) => write!(f, "Configuration error: {}", e),
                SocketLogError::Server(e) => write!(f, "Server error: {}", e),
                SocketLogError::Storage(e) => write!(f, "Storage error: {}", e),
                SocketLogError::Connection(e) => write!(f, "Connection error: {}", e),
                SocketLogError::Daemon(e) => write!(f, "Daemon error: {}", e),
                SocketLogError::Shutdown(e) => write!(f, "Shutdown error: {}", e),
            }
        }
    }

    impl std::error::Error for SocketLogError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                SocketLogError::Io(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<std::io::Error> for SocketLogError {
        fn from(err: std::io::Error) -> Self {
            SocketLogError::Io(err)
        }
    }

    impl From<::config::ConfigError> for SocketLogError {
        fn from(err: ::config::ConfigError) -> Self {
            SocketLogError::Config(err.to_string())
        }
    }

    impl From<nix::Error> for SocketLogError {
        fn from(err: nix::Error) -> Self {
            SocketLogError::Daemon(err.to_string())
        }
    }

    /// Result type alias for socketlog operations
    pub type Result<T> = std::result::Result<T, SocketLogError>;
}

pub use error::{Result, SocketLogError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::EchoClient;
    pub use crate::config::ServerConfig;
    pub use crate::server::{LogServer, LogStore, ShutdownHandle};
    pub use crate::types::{ConnectionId, DrainReport};
    pub use crate::{Result, SocketLogError};
}
