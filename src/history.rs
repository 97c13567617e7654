use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::types::EmergencyHistoryEntry;

/// In-memory log of published emergencies, newest first.
///
/// Grows without bound; callers that need a cap must trim externally.
#[derive(Clone, Default)]
pub struct EmergencyHistory {
    entries: Arc<RwLock<VecDeque<EmergencyHistoryEntry>>>,
}

impl EmergencyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: EmergencyHistoryEntry) {
        self.entries.write().push_front(entry);
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<EmergencyHistoryEntry> {
        self.entries.read().iter().take(limit).cloned().collect()
    }

    pub fn all(&self) -> Vec<EmergencyHistoryEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
