//! Progress-reporting capability injected into every handler.
//!
//! A `ProgressSender` is bound at dispatch time to one task id and the
//! shared output stream. It is the only cancellation-observation point for
//! a running handler: every `emit` checks the task's cancellation flag
//! first and returns the dedicated cancellation error instead of
//! forwarding progress when the flag is set.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::error::HandlerError;
use crate::tasks::TaskTracker;

#[derive(Clone)]
pub struct ProgressSender {
    task_id: String,
    tracker: Arc<TaskTracker>,
    out: UnboundedSender<String>,
}

impl ProgressSender {
    pub fn new(task_id: String, tracker: Arc<TaskTracker>, out: UnboundedSender<String>) -> Self {
        Self {
            task_id,
            tracker,
            out,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Forward a progress update (0–100) to the client, unless the task has
    /// been cancelled — in that case the cancellation signal is raised and
    /// the handler is expected to unwind.
    pub fn emit(&self, progress: f64, message: &str) -> Result<(), HandlerError> {
        if self.tracker.is_cancelled(&self.task_id) {
            return Err(HandlerError::Cancelled);
        }
        let line = json!({
            "type": "progress",
            "taskId": self.task_id,
            "progress": progress.clamp(0.0, 100.0),
            "message": message,
        })
        .to_string();
        if self.out.send(line).is_err() {
            warn!(task_id = %self.task_id, "progress dropped — output channel closed");
        }
        Ok(())
    }

    /// Declare an additional output path mid-run (multi-file operations).
    /// The path becomes cleanable from this moment on.
    pub fn add_output(&self, path: &Path) {
        self.tracker.register_output(&self.task_id, path);
    }
}
