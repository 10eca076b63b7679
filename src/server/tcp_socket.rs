//! TCP listener, dispatch loop and per-connection handler

use crate::config::ServerConfig;
use crate::server::registry::{CompletionFlag, ConnectionRecord, ConnectionRegistry};
use crate::server::shutdown::ShutdownListener;
use crate::server::LogStore;
use crate::types::{ConnectionId, DrainReport};
use crate::{Result, SocketLogError};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn, Level};

/// Byte that terminates a record and triggers an echo of the log
pub const DELIMITER: u8 = b'\n';

/// Pause after a failed accept so descriptor exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// What a handler did before its client went away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Bytes received and appended to the log
    pub bytes_received: u64,
    /// Times the full log was sent back
    pub echoes: u64,
}

/// TCP server accepting clients into the shared log
pub struct TcpSocketServer {
    config: ServerConfig,
    listener: TcpListener,
    store: Arc<LogStore>,
    registry: ConnectionRegistry,
    shutdown: ShutdownListener,
}

impl TcpSocketServer {
    /// Bind the listening socket
    pub async fn bind(
        config: &ServerConfig,
        store: Arc<LogStore>,
        shutdown: ShutdownListener,
    ) -> Result<Self> {
        let addr = config.server.socket_addr();

        let socket = TcpSocket::new_v4()
            .map_err(|e| SocketLogError::Server(format!("Failed to create socket: {}", e)))?;
        socket.set_reuseaddr(true)?;
        socket
            .bind(addr)
            .map_err(|e| SocketLogError::Server(format!("Failed to bind {}: {}", addr, e)))?;
        let listener = socket
            .listen(config.server.backlog)
            .map_err(|e| SocketLogError::Server(format!("Failed to listen: {}", e)))?;

        info!(
            address = %listener.local_addr()?,
            backlog = config.server.backlog,
            "Listening for connections"
        );

        Ok(Self {
            config: config.clone(),
            listener,
            store,
            registry: ConnectionRegistry::new(),
            shutdown,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handlers not yet reaped
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Accept and dispatch connections until shutdown is requested
    pub async fn start(&mut self) -> Result<()> {
        let mut reap_ticker = interval(self.config.server.reap_interval());
        reap_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => break,
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_handler(stream, peer),
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                    self.registry.reap_completed().await;
                }
                _ = reap_ticker.tick() => {
                    self.registry.reap_completed().await;
                }
            }
        }

        info!(
            active = self.registry.len(),
            "Stopped accepting connections"
        );
        Ok(())
    }

    /// Join every remaining handler
    pub async fn drain(&mut self, deadline: Option<Duration>) -> DrainReport {
        self.registry.drain(deadline).await
    }

    fn spawn_handler(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId::new();
        let completed = CompletionFlag::new();
        let guard = completed.guard();
        let store = Arc::clone(&self.store);
        let buffer_size = self.config.server.buffer_size;

        info!(connection = %id, "Accepted connection from {}", peer.ip());

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match handle_connection(stream, &store, buffer_size).await {
                Ok(summary) => debug!(
                    connection = %id,
                    bytes = summary.bytes_received,
                    echoes = summary.echoes,
                    "Client disconnected"
                ),
                Err(e) if failure_level(&e) == Level::ERROR => {
                    error!(connection = %id, peer = %peer, error = %e, "Connection ended by storage failure")
                }
                Err(e) => warn!(connection = %id, peer = %peer, error = %e, "Connection ended with error"),
            }
            info!(connection = %id, "Closed connection from {}", peer.ip());
        });

        self.registry
            .insert(ConnectionRecord::new(id, peer, completed, handle));
    }
}

/// Severity of a handler failure. A broken log store is an error; a client
/// going away mid-stream is only a warning.
pub fn failure_level(e: &SocketLogError) -> Level {
    match e {
        SocketLogError::Storage(_) => Level::ERROR,
        _ => Level::WARN,
    }
}

/// Drain one client into the log, echoing the whole log after every chunk
/// that contains [`DELIMITER`].
///
/// Each chunk is appended as soon as it is read, so concurrent clients
/// interleave at chunk granularity. Returns when the peer closes; read,
/// write and storage failures end the connection with an error.
pub async fn handle_connection<S>(
    mut stream: S,
    store: &LogStore,
    buffer_size: usize,
) -> Result<ConnectionSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut summary = ConnectionSummary::default();

    loop {
        let received = match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => continue,
            Err(e) => return Err(e.into()),
        };

        let chunk = &buffer[..received];
        store.append(chunk).await?;
        summary.bytes_received += received as u64;

        if chunk.contains(&DELIMITER) {
            let contents = store.read_all().await?;
            stream.write_all(&contents).await?;
            stream.flush().await?;
            summary.echoes += 1;
        }
    }

    // Peer already closed its side; a failed shutdown changes nothing
    let _ = stream.shutdown().await;
    Ok(summary)
}
