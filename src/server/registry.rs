//! Registry of live connection handlers

use crate::types::{ConnectionId, DrainReport};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// One-way flag a handler raises when it has finished with its connection
#[derive(Debug, Clone, Default)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the owning handler has finished
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Guard that raises the flag when dropped, including during unwinding
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard(Arc::clone(&self.0))
    }
}

/// Raises its [`CompletionFlag`] on drop
#[derive(Debug)]
pub struct CompletionGuard(Arc<AtomicBool>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Bookkeeping for one accepted client
#[derive(Debug)]
pub struct ConnectionRecord {
    id: ConnectionId,
    peer: SocketAddr,
    accepted_at: Instant,
    completed: CompletionFlag,
    handle: JoinHandle<()>,
}

impl ConnectionRecord {
    /// Create a record for a handler task that owns the connection
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        completed: CompletionFlag,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            peer,
            accepted_at: Instant::now(),
            completed,
            handle,
        }
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the client
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the handler has finished
    pub fn is_complete(&self) -> bool {
        self.completed.is_set()
    }
}

/// Live handlers keyed by connection id. Owned by the dispatch loop.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: HashMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly spawned handler
    pub fn insert(&mut self, record: ConnectionRecord) {
        self.records.insert(record.id(), record);
    }

    /// Number of tracked handlers
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no handlers are tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `id` is still tracked
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.records.contains_key(id)
    }

    /// Join and remove every handler that has raised its completion flag.
    /// Returns how many were reaped.
    pub async fn reap_completed(&mut self) -> usize {
        let finished: Vec<ConnectionId> = self
            .records
            .values()
            .filter(|record| record.is_complete())
            .map(ConnectionRecord::id)
            .collect();

        for id in &finished {
            if let Some(record) = self.records.remove(id) {
                let peer = record.peer();
                let ConnectionRecord {
                    accepted_at,
                    handle,
                    ..
                } = record;

                match handle.await {
                    Ok(()) => debug!(
                        connection = %id,
                        peer = %peer,
                        lifetime_ms = accepted_at.elapsed().as_millis() as u64,
                        "Reaped connection handler"
                    ),
                    Err(e) => log_join_failure(*id, peer, &e),
                }
            }
        }

        finished.len()
    }

    /// Join every tracked handler, emptying the registry.
    ///
    /// With a `deadline`, handlers still running once it elapses are aborted,
    /// which drops and closes their sockets.
    pub async fn drain(&mut self, deadline: Option<Duration>) -> DrainReport {
        let deadline = deadline.map(|d| tokio::time::Instant::now() + d);
        let records: Vec<ConnectionRecord> = self.records.drain().map(|(_, r)| r).collect();
        let mut report = DrainReport::default();

        if !records.is_empty() {
            info!(handlers = records.len(), "Joining connection handlers");
        }

        for record in records {
            let ConnectionRecord {
                id,
                peer,
                mut handle,
                ..
            } = record;

            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(connection = %id, peer = %peer, "Drain deadline passed, closing connection");
                        handle.abort();
                        handle.await
                    }
                },
                None => handle.await,
            };

            match outcome {
                Ok(()) => {
                    debug!(connection = %id, peer = %peer, "Joined connection handler");
                    report.joined += 1;
                }
                Err(e) if e.is_cancelled() => report.aborted += 1,
                Err(e) => {
                    log_join_failure(id, peer, &e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

fn log_join_failure(id: ConnectionId, peer: SocketAddr, err: &JoinError) {
    error!(connection = %id, peer = %peer, error = %err, "Failed to join connection handler");
}
