use shipwright_core::deployment::ActionHistoryEntry;
use std::sync::{Mutex, MutexGuard};

/// Append-only audit log of cluster mutations, shared by every caller of
/// one engine.
#[derive(Debug, Default)]
pub struct ActionHistory {
    entries: Mutex<Vec<ActionHistoryEntry>>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ActionHistoryEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, entry: ActionHistoryEntry) {
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<ActionHistoryEntry> {
        self.lock().clone()
    }

    pub fn for_deployment(&self, namespace: &str, name: &str) -> Vec<ActionHistoryEntry> {
        self.lock()
            .iter()
            .filter(|e| e.namespace == namespace && e.deployment == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shipwright_core::deployment::{ActionKind, ActionResult};
    use uuid::Uuid;

    fn entry(name: &str, ns: &str) -> ActionHistoryEntry {
        ActionHistoryEntry {
            action: ActionKind::Restart,
            deployment: name.into(),
            namespace: ns.into(),
            timestamp: Utc::now(),
            result: ActionResult::DryRun,
            correlation_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn filters_by_deployment() {
        let h = ActionHistory::new();
        assert!(h.is_empty());
        h.record(entry("api", "default"));
        h.record(entry("web", "default"));
        h.record(entry("api", "staging"));
        assert_eq!(h.len(), 3);
        assert_eq!(h.for_deployment("default", "api").len(), 1);
        assert_eq!(h.entries()[1].deployment, "web");
    }
}
