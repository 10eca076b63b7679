//! Shutdown coordination
//!
//! The server moves through `Running -> Draining -> Stopped` exactly once.
//! Signal delivery only flips the state and wakes listeners; all joining and
//! teardown runs on the server task that owns the resources.

use crate::Result;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle phase of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// Accepting connections
    Running = 0,
    /// No new connections; waiting for handlers to finish
    Draining = 1,
    /// Teardown complete
    Stopped = 2,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Running,
            1 => ServerState::Draining,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Running => write!(f, "RUNNING"),
            ServerState::Draining => write!(f, "DRAINING"),
            ServerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

struct Inner {
    state: AtomicU8,
    notify: broadcast::Sender<()>,
}

/// Cloneable handle used to request shutdown and observe the server state
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<Inner>,
}

impl ShutdownHandle {
    /// Request shutdown. Returns `false` if shutdown was already underway.
    pub fn trigger(&self) -> bool {
        let transitioned = self
            .inner
            .state
            .compare_exchange(
                ServerState::Running as u8,
                ServerState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if transitioned {
            // No receivers just means nobody is waiting yet; they check the state first
            let _ = self.inner.notify.send(());
            info!("Shutdown requested");
        } else {
            debug!(state = %self.state(), "Shutdown already in progress");
        }
        transitioned
    }

    /// Current lifecycle phase
    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.state() != ServerState::Running
    }

    /// Create a listener that resolves once shutdown is requested
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.inner.notify.subscribe(),
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Waits for the shutdown request
pub struct ShutdownListener {
    rx: broadcast::Receiver<()>,
    inner: Arc<Inner>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been requested. Cancel safe; returns
    /// immediately on every call after the request.
    pub async fn recv(&mut self) {
        if self.is_shutdown() {
            return;
        }
        let _ = self.rx.recv().await;
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) != ServerState::Running as u8
    }
}

/// Owner of the shutdown state machine
pub struct ShutdownCoordinator {
    handle: ShutdownHandle,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the `Running` state
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self {
            handle: ShutdownHandle {
                inner: Arc::new(Inner {
                    state: AtomicU8::new(ServerState::Running as u8),
                    notify,
                }),
            },
        }
    }

    /// Handle for requesting shutdown
    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Listener for tasks that must stop on shutdown
    pub fn subscribe(&self) -> ShutdownListener {
        self.handle.subscribe()
    }

    /// Current lifecycle phase
    pub fn state(&self) -> ServerState {
        self.handle.state()
    }

    /// Record that teardown finished
    pub fn mark_stopped(&self) {
        // A run that ends without a request still passes through Draining
        self.handle.trigger();
        self.handle
            .inner
            .state
            .store(ServerState::Stopped as u8, Ordering::SeqCst);
        info!("Server stopped");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Install SIGTERM/SIGINT handlers that trigger `handle`.
///
/// Handlers are registered before this returns, so registration errors are
/// startup errors. Signals after the first are logged and ignored.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                received = sigterm.recv() => match received {
                    Some(()) => "SIGTERM",
                    None => break,
                },
                received = sigint.recv() => match received {
                    Some(()) => "SIGINT",
                    None => break,
                },
            };

            if handle.trigger() {
                info!(signal = name, "Caught signal, exiting");
            } else {
                warn!(signal = name, state = %handle.state(), "Signal ignored, already shutting down");
            }
        }
    }))
}
