//! Shared value types

use std::fmt;
use uuid::Uuid;

/// Identifier assigned to each accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate accept/close lines
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// Outcome of draining the connection registry at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Handlers that finished on their own and were joined
    pub joined: usize,
    /// Handlers aborted because the drain deadline passed
    pub aborted: usize,
    /// Handlers whose join reported a panic
    pub failed: usize,
}

impl DrainReport {
    /// Total number of handlers that were registered when the drain started
    pub fn total(&self) -> usize {
        self.joined + self.aborted + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 8);
    }

    #[test]
    fn test_drain_report_total() {
        let report = DrainReport {
            joined: 3,
            aborted: 1,
            failed: 1,
        };
        assert_eq!(report.total(), 5);
        assert_eq!(DrainReport::default().total(), 0);
    }
}
