//! Point-in-time pool counters

use serde::Serialize;

/// What `ConnectionPool::stats` saw. The counters are read one after another
/// without a common lock, so under load they may disagree by one or two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections waiting in the idle queue
    pub idle: usize,
    /// Connections borrowed by executions or open streams
    pub active: usize,
    /// Callers blocked in `get`
    pub waiting: usize,
    /// Slots left before `get` has to wait
    pub available: usize,
}

impl PoolStats {
    /// Open connections, idle or borrowed
    pub fn total(&self) -> usize {
        self.idle + self.active
    }

    /// Borrowed share of open connections, 0.0 when none are open
    pub fn utilization(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            open => self.active as f64 / open as f64,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.available == 0
    }
}
