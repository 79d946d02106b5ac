use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::pipeline::Stage;
use crate::queue::FjallQueue;
use crate::registry::FjallRegistry;
use crate::storage::ArtifactStore;

/// Shared handles every worker task needs. Cheap to clone — everything
/// inside is itself `Arc`-backed.
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: Arc<FjallRegistry>,
    pub storage: Arc<ArtifactStore>,
    pub queue: Arc<FjallQueue>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
    pub stages: Arc<Vec<Box<dyn Stage>>>,
}
