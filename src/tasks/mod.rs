//! Task lifecycle management.
//!
//! One [`TaskTracker`] instance, owned by the RPC dispatcher, tracks every
//! in-flight request that may produce filesystem output: its cancellation
//! flag and the set of output paths it has declared. The contract:
//!
//! - a path is registered *before* the handler can have written partial
//!   content there, so any later failure is cleanable;
//! - on success (`complete`) the files are kept and the entry dropped;
//! - on failure or cancellation every registered path is deleted exactly
//!   once, best-effort, before the terminal response is sent.
//!
//! Cancellation is cooperative: `request_cancel` sets a flag that the
//! running handler observes at its next progress report. A single mutex
//! guards the flags, the admitted-task set, and the path map, so a cancel
//! arriving from the reader loop while a handler is mid-flight is always
//! seen by the handler's next `is_cancelled` check.
//!
//! The dispatcher admits (`begin`) every task it queues. A cancellation
//! flag for an admitted task lives until that task's terminal disposition;
//! a flag nobody can ever consume (the task already finished, or never
//! existed) is swept at the next terminal disposition of any task, so the
//! flag set stays bounded by the work actually in flight.

pub mod cleanup;
pub mod registry;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use registry::ArtifactRegistry;

#[derive(Debug, Default)]
struct TrackerState {
    /// Tasks whose cancellation flag is set. Absence means "not cancelled".
    cancelled: HashSet<String>,
    /// Tasks admitted to the worker queue and not yet terminal.
    live: HashSet<String>,
    artifacts: ArtifactRegistry,
}

impl TrackerState {
    /// Drop all tracking for a terminal task, then sweep cancellation flags
    /// that no admitted task is left to consume.
    fn finish(&mut self, task_id: &str) {
        self.live.remove(task_id);
        self.cancelled.remove(task_id);
        let live = &self.live;
        self.cancelled.retain(|t| live.contains(t));
    }
}

/// The task lifecycle manager. A task moves from active to exactly one
/// terminal disposition: completed (files kept), failed-cleaned, or
/// cancelled-cleaned. Thread-safe; shared between the dispatcher's reader
/// loop and the handler worker.
#[derive(Debug, Default)]
pub struct TaskTracker {
    state: Mutex<TrackerState>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a task to the worker queue. A cancellation flag set while the
    /// task is admitted survives until its terminal disposition, however
    /// long the task waits behind the serial worker.
    pub fn begin(&self, task_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.live.insert(task_id.to_string());
    }

    /// Declare an output path for a task. Keeps the task active; idempotent.
    pub fn register_output(&self, task_id: &str, path: &Path) {
        let mut state = self.state.lock().unwrap();
        state.artifacts.register(task_id, path);
        debug!(task_id = %task_id, path = %path.display(), "registered output");
    }

    /// O(1) cancellation check. An unknown task is not cancelled.
    pub fn is_cancelled(&self, task_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.cancelled.contains(task_id)
    }

    /// Set the cancellation flag and synchronously delete everything the
    /// task has registered so far. Always succeeds: cancelling an unknown
    /// task is indistinguishable from cancelling a finished one, and both
    /// are safe no-ops.
    pub fn request_cancel(&self, task_id: &str) -> bool {
        let paths = {
            let mut state = self.state.lock().unwrap();
            state.cancelled.insert(task_id.to_string());
            state.artifacts.take_and_clear(task_id)
        };
        for path in &paths {
            cleanup::remove_path(path);
        }
        debug!(task_id = %task_id, cleaned = paths.len(), "cancel requested");
        true
    }

    /// Success path: keep the files, drop all tracking state. Must run
    /// before the success response is emitted so a late cancel cannot
    /// delete files the handler just finished writing.
    pub fn complete(&self, task_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.artifacts.discard(task_id);
        state.finish(task_id);
        debug!(task_id = %task_id, "task completed, files kept");
    }

    /// Failure path (including cancellation surfacing as an error): delete
    /// every registered path and drop all tracking state.
    pub fn fail_and_clean(&self, task_id: &str) {
        let paths = {
            let mut state = self.state.lock().unwrap();
            let paths = state.artifacts.take_and_clear(task_id);
            state.finish(task_id);
            paths
        };
        for path in &paths {
            cleanup::remove_path(path);
        }
        debug!(task_id = %task_id, cleaned = paths.len(), "task failed, outputs cleaned");
    }

    /// Copy of the task's registered paths (diagnostics and tests).
    pub fn registered_paths(&self, task_id: &str) -> Vec<PathBuf> {
        let state = self.state.lock().unwrap();
        state.artifacts.snapshot(task_id)
    }

    /// Number of tasks with live tracking state: admitted and not yet
    /// terminal, or still holding registered artifacts. A lingering
    /// cancellation flag alone does not count — the task is already gone.
    pub fn active_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        let unadmitted = state
            .artifacts
            .tasks()
            .filter(|t| !state.live.contains(*t))
            .count();
        state.live.len() + unadmitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_keeps_files_and_forgets_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.pdf");
        std::fs::write(&out, b"done").unwrap();

        let tracker = TaskTracker::new();
        tracker.register_output("t1", &out);
        tracker.complete("t1");

        assert!(out.exists());
        assert!(tracker.registered_paths("t1").is_empty());
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn fail_and_clean_deletes_registered_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        std::fs::write(&out, b"partial").unwrap();

        let tracker = TaskTracker::new();
        tracker.register_output("t2", &out);
        tracker.fail_and_clean("t2");

        assert!(!out.exists());
        assert!(tracker.registered_paths("t2").is_empty());
    }

    #[test]
    fn cancel_deletes_every_registered_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();

        let tracker = TaskTracker::new();
        tracker.register_output("t3", &a);
        tracker.register_output("t3", &b);
        assert!(tracker.request_cancel("t3"));

        assert!(!a.exists());
        assert!(!b.exists());
        assert!(tracker.is_cancelled("t3"));
    }

    #[test]
    fn cancelling_an_unknown_task_is_a_safe_success() {
        let tracker = TaskTracker::new();
        assert!(tracker.request_cancel("unknown-task"));
        // The flag stays observable until a terminal disposition sweeps it.
        assert!(tracker.is_cancelled("unknown-task"));
    }

    #[test]
    fn cancelling_a_finished_task_does_not_inflate_active_count() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.bin");
        std::fs::write(&out, b"data").unwrap();

        let tracker = TaskTracker::new();
        tracker.register_output("t6", &out);
        assert!(tracker.request_cancel("t6"));

        assert!(!out.exists());
        assert_eq!(tracker.active_count(), 0, "only tracked work counts");
    }

    #[test]
    fn stale_cancel_flags_are_swept_at_the_next_terminal() {
        let tracker = TaskTracker::new();
        tracker.request_cancel("ghost");
        assert!(tracker.is_cancelled("ghost"));

        // Any later terminal disposition sweeps flags no admitted task
        // is left to consume.
        tracker.begin("real");
        tracker.complete("real");

        assert!(!tracker.is_cancelled("ghost"));
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn admitted_task_cancel_flag_survives_other_terminals() {
        let tracker = TaskTracker::new();
        tracker.begin("queued");
        tracker.request_cancel("queued");

        tracker.begin("running");
        tracker.complete("running");

        // The queued job still observes the flag at its short-circuit check.
        assert!(tracker.is_cancelled("queued"));
        tracker.fail_and_clean("queued");
        assert!(!tracker.is_cancelled("queued"));
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn complete_before_cancel_wins_the_race() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("kept.pdf");
        std::fs::write(&out, b"final").unwrap();

        let tracker = TaskTracker::new();
        tracker.register_output("t4", &out);
        tracker.complete("t4");
        tracker.request_cancel("t4");

        assert!(out.exists());
    }

    #[test]
    fn tasks_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();

        let tracker = TaskTracker::new();
        tracker.register_output("t1", &a);
        tracker.register_output("t2", &b);
        tracker.fail_and_clean("t1");

        assert!(!a.exists());
        assert!(b.exists());
        assert!(!tracker.is_cancelled("t2"));
        assert_eq!(tracker.registered_paths("t2").len(), 1);
    }

    #[test]
    fn cancellation_flag_is_cleared_at_terminal_disposition() {
        let tracker = TaskTracker::new();
        tracker.request_cancel("t5");
        assert!(tracker.is_cancelled("t5"));
        tracker.fail_and_clean("t5");
        assert!(!tracker.is_cancelled("t5"));
    }
}
