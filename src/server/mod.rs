//! socketlog server implementation

pub mod registry;
pub mod shutdown;
pub mod storage;
pub mod tcp_socket;
pub mod timestamp;

use crate::config::ServerConfig;
use crate::types::DrainReport;
use crate::{Result, SocketLogError};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

pub use registry::{CompletionFlag, ConnectionRecord, ConnectionRegistry};
pub use shutdown::{
    spawn_signal_listener, ServerState, ShutdownCoordinator, ShutdownHandle, ShutdownListener,
};
pub use storage::{LogStore, StoreStats};
pub use tcp_socket::{handle_connection, ConnectionSummary, TcpSocketServer, DELIMITER};
pub use timestamp::{format_timestamp, TimestampEmitter};

/// Main socketlog server that owns every shared resource and coordinates
/// startup, dispatch and teardown
pub struct LogServer {
    config: ServerConfig,
    store: Arc<LogStore>,
    tcp_server: TcpSocketServer,
    coordinator: ShutdownCoordinator,
}

impl LogServer {
    /// Open the log store and bind the listener. Failures here are startup
    /// errors; nothing has been spawned yet.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        Self::with_coordinator(config, ShutdownCoordinator::new()).await
    }

    /// Like [`LogServer::new`], but shutdown is driven by an existing
    /// coordinator. A shutdown requested before this returns is honoured as
    /// soon as [`LogServer::run`] starts.
    pub async fn with_coordinator(
        config: ServerConfig,
        coordinator: ShutdownCoordinator,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(LogStore::open(&config.storage).await?);
        let tcp_server =
            TcpSocketServer::bind(&config, Arc::clone(&store), coordinator.subscribe()).await?;

        Ok(Self {
            config,
            store,
            tcp_server,
            coordinator,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tcp_server.local_addr()
    }

    /// Handle that requests a graceful shutdown
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.coordinator.handle()
    }

    /// The shared log store
    pub fn log_store(&self) -> Arc<LogStore> {
        Arc::clone(&self.store)
    }

    /// Serve until shutdown is requested, then drain handlers, stop the
    /// timestamp emitter, close the listener and remove the log.
    pub async fn run(self) -> Result<DrainReport> {
        let LogServer {
            config,
            store,
            mut tcp_server,
            coordinator,
        } = self;

        let emitter = if config.timestamp.enabled {
            let emitter = TimestampEmitter::new(Arc::clone(&store), config.timestamp.interval());
            Some(tokio::spawn(emitter.run(coordinator.subscribe())))
        } else {
            None
        };

        let served = tcp_server.start().await;
        if let Err(e) = &served {
            error!(error = %e, "Dispatch loop failed");
        }
        // Whatever ended the loop, make sure every task sees the shutdown
        coordinator.handle().trigger();
        info!(state = %coordinator.state(), "Draining connections");

        let report = tcp_server.drain(config.shutdown.drain_timeout()).await;
        info!(
            joined = report.joined,
            aborted = report.aborted,
            failed = report.failed,
            "Connection handlers drained"
        );

        if let Some(emitter) = emitter {
            match emitter.await {
                Ok(records) => info!(records, "Timestamp emitter joined"),
                Err(e) => warn!(error = %e, "Failed to join timestamp emitter"),
            }
        }

        drop(tcp_server);

        let closed = store.close(config.storage.remove_on_shutdown).await;
        coordinator.mark_stopped();

        served?;
        closed.map_err(|e| SocketLogError::Shutdown(e.to_string()))?;
        Ok(report)
    }
}
