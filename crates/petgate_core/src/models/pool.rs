//! Connection pool status model.

use serde::Serialize;

/// Connection pool status.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStatus {
    /// Maximum pool capacity
    pub max_size: usize,
    /// Current connections (idle + active)
    pub size: usize,
    /// Idle connections
    pub available: usize,
    /// Tasks waiting for connections
    pub waiting: usize,
    /// Whether the pool has been closed
    pub closed: bool,
}

impl PoolStatus {
    /// Check if the pool is healthy.
    pub fn is_healthy(&self) -> bool {
        !self.closed && self.waiting == 0
    }

    /// Get the number of active (in-use) connections.
    pub fn active(&self) -> usize {
        self.size.saturating_sub(self.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_health() {
        let status = PoolStatus { max_size: 4, size: 3, available: 1, waiting: 0, closed: false };
        assert_eq!(status.active(), 2);
        assert!(status.is_healthy());

        let starved = PoolStatus { waiting: 2, ..status };
        assert!(!starved.is_healthy());

        let closed = PoolStatus { closed: true, ..status };
        assert!(!closed.is_healthy());
    }
}
