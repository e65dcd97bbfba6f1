use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::capture::SourceFactory;
use crate::config::Config;
use crate::nats::CatalogPublisher;
use crate::pipeline::RecordingPipeline;
use crate::upload::{CredentialsProvider, RemoteStore};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Known pipelines (recording_id → pipeline). Stopped recordings stay
    /// listed so their uploads can be watched and retried.
    pub pipelines: Arc<RwLock<HashMap<String, Arc<RecordingPipeline>>>>,
    pub config: Arc<Config>,
    pub sources: Arc<dyn SourceFactory>,
    pub remote: Arc<dyn RemoteStore>,
    pub credentials: Arc<dyn CredentialsProvider>,
    pub catalog: Option<Arc<CatalogPublisher>>,
}

impl AppState {
    pub fn new(
        config: Config,
        sources: Arc<dyn SourceFactory>,
        remote: Arc<dyn RemoteStore>,
        credentials: Arc<dyn CredentialsProvider>,
        catalog: Option<Arc<CatalogPublisher>>,
    ) -> Self {
        Self {
            pipelines: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            sources,
            remote,
            credentials,
            catalog,
        }
    }
}
