use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::queue::FjallQueue;
use crate::registry::FjallRegistry;
use crate::storage::ArtifactStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<FjallRegistry>,
    pub storage: Arc<ArtifactStore>,
    pub queue: Arc<FjallQueue>,
    pub metrics: Arc<Metrics>,
}
