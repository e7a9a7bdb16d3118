//! Latest-result store shared between the poller and request handlers.

use std::sync::RwLock;

use super::models::LatestResult;

/// Thread-safe holder of the currently published snapshot.
///
/// A snapshot is replaced as a whole under the write lock and readers get a
/// clone taken under the read lock, so no reader can see fields from two
/// different cycles.
#[derive(Debug, Default)]
pub struct LatestResultStore {
    current: RwLock<LatestResult>,
}

impl LatestResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible snapshot.
    pub fn publish(&self, snapshot: LatestResult) {
        // A poisoned lock still holds a whole snapshot since writes are a
        // single assignment.
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = snapshot;
    }

    /// Return a copy of the visible snapshot.
    pub fn read(&self) -> LatestResult {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
