pub mod config;
pub mod download;
pub mod error;
pub mod imaging;
pub mod media;
pub mod pdf;
pub mod rpc;
pub mod tasks;

use std::sync::Arc;
use std::time::Instant;

use config::BackendConfig;
use rpc::methods::MethodRegistry;
use tasks::TaskTracker;

/// Shared application state passed to every RPC handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<BackendConfig>,
    pub tracker: Arc<TaskTracker>,
    pub registry: Arc<MethodRegistry>,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(config: BackendConfig) -> Self {
        Self::with_registry(config, MethodRegistry::standard())
    }

    /// Context with a caller-supplied method table (tests register stub
    /// handlers here).
    pub fn with_registry(config: BackendConfig, registry: MethodRegistry) -> Self {
        Self {
            config: Arc::new(config),
            tracker: Arc::new(TaskTracker::new()),
            registry: Arc::new(registry),
            started_at: Instant::now(),
        }
    }
}
