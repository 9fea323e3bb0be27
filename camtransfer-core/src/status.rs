//! Live, in-memory view of every file the current process has touched.
//!
//! Not durable: rebuilt from scratch on each start. Recovery never reads it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub stage: Stage,
    /// Percentage 0–100, only meaningful while uploading.
    pub progress: Option<u8>,
}

/// One row of a display snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub name: String,
    pub stage: Stage,
    pub progress: Option<u8>,
}

/// Shared map of file name to its latest stage and progress.
///
/// Clones share the same map. Every read and write goes through one mutex so
/// a snapshot never observes a half-updated entry.
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<Mutex<BTreeMap<String, StatusEntry>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StatusEntry>> {
        // A panic while holding the guard cannot leave an entry half written,
        // so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite the entry for `name`.
    pub fn set(&self, name: &str, stage: Stage, progress: Option<u8>) {
        let progress = progress.map(|p| p.min(100));
        self.lock()
            .insert(name.to_string(), StatusEntry { stage, progress });
    }

    /// Raise the progress of `name` to `percent` without ever lowering it.
    ///
    /// Stage is left untouched. Reports for unknown names are ignored.
    pub fn advance_progress(&self, name: &str, percent: u8) {
        let mut map = self.lock();
        if let Some(entry) = map.get_mut(name) {
            let current = entry.progress.unwrap_or(0);
            entry.progress = Some(current.max(percent.min(100)));
        }
    }

    pub fn get(&self, name: &str) -> Option<StatusEntry> {
        self.lock().get(name).copied()
    }

    /// Non-terminal entries ordered by name.
    pub fn snapshot(&self) -> Vec<StatusRow> {
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.stage.is_terminal())
            .map(|(name, entry)| StatusRow {
                name: name.clone(),
                stage: entry.stage,
                progress: entry.progress,
            })
            .collect()
    }

    /// Count of entries per terminal outcome: `(done, failed)`.
    pub fn outcome_counts(&self) -> (usize, usize) {
        let map = self.lock();
        let done = map.values().filter(|e| e.stage == Stage::Done).count();
        let failed = map.values().filter(|e| e.stage == Stage::Failed).count();
        (done, failed)
    }
}

/// Whole-number percentage of `transferred` over `total`. An empty total counts as complete.
pub fn percent(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = u128::from(transferred) * 100 / u128::from(total);
    pct.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_latest_entry() {
        let registry = StatusRegistry::new();
        registry.set("a.jpg", Stage::Saving, None);
        registry.set("a.jpg", Stage::Uploading, Some(10));
        assert_eq!(
            registry.get("a.jpg"),
            Some(StatusEntry {
                stage: Stage::Uploading,
                progress: Some(10)
            })
        );
    }

    #[test]
    fn progress_never_moves_backwards() {
        let registry = StatusRegistry::new();
        registry.set("a.jpg", Stage::Uploading, None);
        let mut observed = Vec::new();
        for reported in [10, 50, 30, 50, 100, 90] {
            registry.advance_progress("a.jpg", reported);
            observed.push(registry.get("a.jpg").unwrap().progress.unwrap());
        }
        assert_eq!(observed, vec![10, 50, 50, 50, 100, 100]);
    }

    #[test]
    fn snapshot_hides_terminal_entries_and_is_sorted() {
        let registry = StatusRegistry::new();
        registry.set("c.jpg", Stage::Waiting, None);
        registry.set("a.jpg", Stage::Done, Some(100));
        registry.set("b.jpg", Stage::Uploading, Some(42));
        registry.set("d.jpg", Stage::Failed, None);

        let names: Vec<_> = registry.snapshot().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["b.jpg", "c.jpg"]);
        assert_eq!(registry.outcome_counts(), (1, 1));
    }

    #[test]
    fn percent_handles_edges() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(5, 4), 100);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }
}
