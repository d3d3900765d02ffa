//! Application state shared across handlers.

use crate::resolve::ManifestResolver;
use crate::stream::ContentStreamer;
use crate::upload::UploadCoordinator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trove_core::TagRegistry;
use trove_core::config::AppConfig;
use trove_storage::{
    AdmissionGate, BatchGate, BatchStore, ChunkStore, FeedPublisher, LookupFactory, PinStore,
    Pusher, StorageResult, StoreLookupFactory,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ChunkStore>,
    pub tags: Arc<TagRegistry>,
    pub batches: Arc<BatchStore>,
    pub admission: Arc<dyn AdmissionGate>,
    pub feeds: Arc<dyn LookupFactory>,
    pub publisher: Arc<FeedPublisher>,
    pub pins: Arc<PinStore>,
    /// Cancelled when the server shuts down. Requests derive child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create application state. Batches listed in the configuration are preloaded.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ChunkStore>,
        pusher: Arc<dyn Pusher>,
    ) -> StorageResult<Self> {
        let batches = Arc::new(BatchStore::from_config(&config.postage)?);
        let admission: Arc<dyn AdmissionGate> = Arc::new(BatchGate::new(
            storage.clone(),
            batches.clone(),
            pusher,
            config.postage.require_batch,
            config.server.sync_timeout(),
        ));

        Ok(Self {
            feeds: Arc::new(StoreLookupFactory::new(storage.clone())),
            publisher: Arc::new(FeedPublisher::new(storage.clone())),
            pins: Arc::new(PinStore::new(storage.clone())),
            tags: Arc::new(TagRegistry::new()),
            config: Arc::new(config),
            storage,
            batches,
            admission,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn uploads(&self) -> UploadCoordinator {
        UploadCoordinator::new(
            self.storage.clone(),
            self.tags.clone(),
            self.admission.clone(),
            self.pins.clone(),
        )
    }

    pub fn resolver(&self) -> ManifestResolver {
        ManifestResolver::new(self.storage.clone(), self.feeds.clone())
    }

    pub fn streamer(&self) -> ContentStreamer {
        ContentStreamer::new(self.storage.clone())
    }
}
