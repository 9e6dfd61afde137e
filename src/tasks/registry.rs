//! Artifact registry — task id → set of declared output paths.
//!
//! Pure bookkeeping: no filesystem access happens here. The lifecycle
//! manager owns an instance behind its lock; deletion goes through
//! [`crate::tasks::cleanup`] after `take_and_clear`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    paths: HashMap<String, HashSet<PathBuf>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path to the task's set. Idempotent; creates the entry if absent.
    pub fn register(&mut self, task_id: &str, path: &Path) {
        self.paths
            .entry(task_id.to_string())
            .or_default()
            .insert(path.to_path_buf());
    }

    /// Atomically remove and return the task's registered set.
    ///
    /// An unknown task yields an empty set — callers cannot distinguish
    /// "never registered" from "already taken", and both are safe.
    pub fn take_and_clear(&mut self, task_id: &str) -> HashSet<PathBuf> {
        self.paths.remove(task_id).unwrap_or_default()
    }

    /// Drop the task's entry without touching the paths (success path —
    /// the files are intentionally kept).
    pub fn discard(&mut self, task_id: &str) {
        self.paths.remove(task_id);
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.paths.contains_key(task_id)
    }

    /// Copy of the task's registered set (empty for unknown tasks).
    pub fn snapshot(&self, task_id: &str) -> Vec<PathBuf> {
        self.paths
            .get(task_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Task ids with at least one registered path.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    /// Number of tasks with at least one registered path.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let mut reg = ArtifactRegistry::new();
        reg.register("t1", Path::new("/tmp/a.pdf"));
        reg.register("t1", Path::new("/tmp/a.pdf"));
        assert_eq!(reg.take_and_clear("t1").len(), 1);
    }

    #[test]
    fn take_and_clear_empties_the_entry() {
        let mut reg = ArtifactRegistry::new();
        reg.register("t1", Path::new("/tmp/a.pdf"));
        reg.register("t1", Path::new("/tmp/b.pdf"));
        let taken = reg.take_and_clear("t1");
        assert_eq!(taken.len(), 2);
        assert!(!reg.contains("t1"));
        assert!(reg.take_and_clear("t1").is_empty());
    }

    #[test]
    fn unknown_task_yields_empty_set() {
        let mut reg = ArtifactRegistry::new();
        assert!(reg.take_and_clear("never-seen").is_empty());
    }

    #[test]
    fn discard_keeps_nothing_and_deletes_nothing() {
        let mut reg = ArtifactRegistry::new();
        reg.register("t1", Path::new("/tmp/a.pdf"));
        reg.discard("t1");
        assert!(!reg.contains("t1"));
    }

    #[test]
    fn tasks_are_isolated() {
        let mut reg = ArtifactRegistry::new();
        reg.register("t1", Path::new("/tmp/a.pdf"));
        reg.register("t2", Path::new("/tmp/b.pdf"));
        reg.take_and_clear("t1");
        assert!(reg.contains("t2"));
        assert_eq!(reg.take_and_clear("t2").len(), 1);
    }
}
