//! Upload coordination.
//!
//! An upload runs through admission, tag resolution, content splitting,
//! manifest construction, optional pinning and finally the sync wait. The
//! coordinator only reports a reference once every chunk it wrote has been
//! acknowledged by the pusher.

use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};
use trove_core::manifest::{self, Metadata};
use trove_core::{
    ManifestEntry, Reference, Tag, TagCounter, TagError, TagId, TagRegistry, WebsiteConfig,
    estimate_chunk_count,
};
use trove_storage::{
    AdmissionError, AdmissionGate, ChunkStore, ManifestWriter, PinStore, StampedPutter,
    StorageError, StoreSizeFn, SyncError, SyncWaiter, file,
};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("tag resolution failed: {0}")]
    TagResolution(TagError),

    #[error("tag increment failed: {0}")]
    TagIncrement(TagError),

    #[error("postage quota exhausted: {0}")]
    QuotaExceeded(StorageError),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("storing content failed: {0}")]
    Store(StorageError),

    #[error("storing manifest failed: {0}")]
    Manifest(StorageError),

    #[error("finalizing tag failed: {0}")]
    DoneSplit(TagError),

    #[error("pinning failed: {0}")]
    Pin(StorageError),

    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),
}

impl UploadError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Admission(_) => "admission",
            Self::TagResolution(_) => "tag_resolution",
            Self::TagIncrement(_) => "tag_increment",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::InvalidName(_) => "invalid_name",
            Self::Store(_) => "store",
            Self::Manifest(_) => "manifest",
            Self::DoneSplit(_) => "done_split",
            Self::Pin(_) => "pin",
            Self::Sync(_) => "sync",
        }
    }

    /// Split a pipeline failure into quota exhaustion or the given kind.
    fn from_pipeline(error: StorageError, other: fn(StorageError) -> Self) -> Self {
        match error {
            StorageError::QuotaExceeded(_) => Self::QuotaExceeded(error),
            StorageError::Tag(tag) => Self::TagIncrement(tag),
            error => other(error),
        }
    }
}

/// Request-level parameters of an upload.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    /// Raw postage batch id header.
    pub batch: Option<String>,
    /// Raw tag id header. Absent means a new tag is created.
    pub tag: Option<String>,
    pub pin: bool,
    /// Body length when known. Only used to grow the total of a pre-existing tag.
    pub size_hint: Option<u64>,
}

/// Result of a completed upload.
#[derive(Clone, Copy, Debug)]
pub struct UploadOutcome {
    pub reference: Reference,
    pub tag: TagId,
    /// Chunks newly written by this upload.
    pub stored: u64,
}

/// Orchestrates the content pipeline, the manifest store, tags, admission and pins.
#[derive(Clone)]
pub struct UploadCoordinator {
    storage: Arc<dyn ChunkStore>,
    tags: Arc<TagRegistry>,
    admission: Arc<dyn AdmissionGate>,
    pins: Arc<PinStore>,
}

impl UploadCoordinator {
    pub fn new(
        storage: Arc<dyn ChunkStore>,
        tags: Arc<TagRegistry>,
        admission: Arc<dyn AdmissionGate>,
        pins: Arc<PinStore>,
    ) -> Self {
        Self {
            storage,
            tags,
            admission,
            pins,
        }
    }

    /// Admit the upload and resolve its tag.
    ///
    /// Fails before any content is written when admission or tag resolution fails.
    pub fn begin(&self, options: UploadOptions) -> Result<UploadSession, UploadError> {
        let (putter, waiter) = self.admission.new_putter(options.batch.as_deref())?;

        let (tag, created) = self
            .tags
            .get_or_create(options.tag.as_deref())
            .map_err(UploadError::TagResolution)?;

        if !created && let Some(size) = options.size_hint {
            let estimate = estimate_chunk_count(size);
            tag.inc_n(TagCounter::Total, estimate)
                .map_err(UploadError::TagIncrement)?;
            debug!(tag = %tag.id(), estimate, "grew existing tag by request estimate");
        }

        let stored_before = tag.get(TagCounter::Stored);
        Ok(UploadSession {
            putter: putter.with_tag(tag.clone()),
            waiter,
            tag,
            created,
            pin: options.pin,
            stored_before,
            pins: self.pins.clone(),
        })
    }

    /// Upload a single file and wrap it in a one-entry manifest.
    ///
    /// Without a name the entry is named after the hex content reference.
    #[instrument(skip(self, options, reader))]
    pub async fn upload_file<R>(
        &self,
        options: UploadOptions,
        name: Option<String>,
        content_type: &str,
        reader: R,
    ) -> Result<UploadOutcome, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let name = name.filter(|name| !name.is_empty());
        if let Some(name) = &name {
            validate_name(name)?;
        }

        let session = self.begin(options)?;
        let reference = session.store(reader).await?;

        let name = match name {
            Some(name) => name,
            None => {
                let name = reference.to_hex();
                validate_name(&name)?;
                name
            }
        };

        let website = WebsiteConfig {
            index_document: Some(name.clone()),
            error_document: None,
        };
        let mut writer = ManifestWriter::new();
        writer
            .add(ManifestEntry::root(website.to_metadata()))
            .map_err(UploadError::Manifest)?;
        writer
            .add(ManifestEntry::file(name, reference, content_type))
            .map_err(UploadError::Manifest)?;

        session.finish(writer).await
    }

    /// Store a manifest whose root entry carries `metadata`, such as a feed identity.
    pub async fn upload_root_manifest(
        &self,
        options: UploadOptions,
        metadata: Metadata,
    ) -> Result<UploadOutcome, UploadError> {
        let session = self.begin(options)?;
        let mut writer = ManifestWriter::new();
        writer
            .add(ManifestEntry::root(metadata))
            .map_err(UploadError::Manifest)?;
        session.finish(writer).await
    }

    pub fn storage(&self) -> &Arc<dyn ChunkStore> {
        &self.storage
    }
}

fn validate_name(name: &str) -> Result<(), UploadError> {
    manifest::validate_entry_path(name).map_err(|e| UploadError::InvalidName(e.to_string()))
}

/// One admitted upload: a bound putter, its sync waiter and the resolved tag.
pub struct UploadSession {
    putter: StampedPutter,
    waiter: SyncWaiter,
    tag: Arc<Tag>,
    created: bool,
    pin: bool,
    stored_before: u64,
    pins: Arc<PinStore>,
}

impl UploadSession {
    pub fn tag(&self) -> &Arc<Tag> {
        &self.tag
    }

    /// Whether the tag was created for this upload.
    pub fn tag_created(&self) -> bool {
        self.created
    }

    /// Split `reader` into chunks through the bound putter.
    pub async fn store<R>(&self, reader: R) -> Result<Reference, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        file::store(&self.putter, Some(self.tag.as_ref()), reader)
            .await
            .map_err(|e| UploadError::from_pipeline(e, UploadError::Store))
    }

    /// Persist the manifest, finalize the tag, pin, then wait for sync.
    pub async fn finish(self, writer: ManifestWriter) -> Result<UploadOutcome, UploadError> {
        let mut size_fns: Vec<StoreSizeFn<'_>> = Vec::new();
        if !self.created {
            let tag = self.tag.clone();
            size_fns.push(Box::new(move |size: u64| {
                tag.inc_n(TagCounter::Total, estimate_chunk_count(size))
                    .map(|_| ())
                    .map_err(StorageError::from)
            }));
        }

        let reference = writer
            .store(&self.putter, Some(self.tag.as_ref()), &mut size_fns)
            .await
            .map_err(|e| UploadError::from_pipeline(e, UploadError::Manifest))?;

        if self.created {
            self.tag
                .done_split(reference)
                .map_err(UploadError::DoneSplit)?;
        }

        if self.pin {
            self.pins
                .create_pin(reference)
                .await
                .map_err(UploadError::Pin)?;
        }

        self.waiter.wait().await?;

        let stored = self
            .tag
            .get(TagCounter::Stored)
            .saturating_sub(self.stored_before);
        debug!(reference = %reference, tag = %self.tag.id(), stored, "upload synced");

        Ok(UploadOutcome {
            reference,
            tag: self.tag.id(),
            stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use trove_core::config::PostageConfig;
    use trove_core::manifest::FILENAME_KEY;
    use trove_storage::{
        BatchGate, BatchStore, LocalPusher, ManifestReader, MemoryStore, Pusher, StorageResult,
        StorePutter,
    };

    struct FailingPusher;

    #[async_trait]
    impl Pusher for FailingPusher {
        async fn push(&self, address: Reference) -> Result<(), SyncError> {
            Err(SyncError::Push {
                address,
                reason: "no peers".to_string(),
            })
        }
    }

    fn coordinator_with(pusher: Arc<dyn Pusher>) -> (UploadCoordinator, Arc<BatchStore>) {
        let storage: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let batches = Arc::new(BatchStore::from_config(&PostageConfig::default()).unwrap());
        let gate = BatchGate::new(
            storage.clone(),
            batches.clone(),
            pusher,
            false,
            Duration::from_secs(5),
        );
        let coordinator = UploadCoordinator::new(
            storage.clone(),
            Arc::new(TagRegistry::new()),
            Arc::new(gate),
            Arc::new(PinStore::new(storage)),
        );
        (coordinator, batches)
    }

    fn coordinator() -> UploadCoordinator {
        coordinator_with(Arc::new(LocalPusher)).0
    }

    #[tokio::test]
    async fn test_name_defaults_to_content_reference() {
        let coordinator = coordinator();
        let data = b"hello trove";
        let outcome = coordinator
            .upload_file(UploadOptions::default(), None, "text/plain", &data[..])
            .await
            .unwrap();

        let mut leaf = (data.len() as u64).to_le_bytes().to_vec();
        leaf.extend_from_slice(data);
        let content = Reference::compute(&leaf);
        let reader = ManifestReader::open(coordinator.storage().clone(), outcome.reference)
            .await
            .unwrap();
        let entry = reader.lookup(&content.to_hex()).await.unwrap();
        assert_eq!(entry.target, content);
        assert_eq!(
            entry.metadata.get(FILENAME_KEY).map(String::as_str),
            Some(content.to_hex().as_str())
        );
        let website = WebsiteConfig::from_metadata(&reader.root_metadata());
        assert_eq!(website.index_document, Some(content.to_hex()));
    }

    #[tokio::test]
    async fn test_created_tag_is_finalized_against_manifest() {
        let coordinator = coordinator();
        let outcome = coordinator
            .upload_file(
                UploadOptions::default(),
                Some("a.txt".to_string()),
                "text/plain",
                &b"abc"[..],
            )
            .await
            .unwrap();

        let tag = coordinator.tags.get(outcome.tag).unwrap();
        assert_eq!(tag.address(), Some(outcome.reference));
        assert_eq!(tag.get(TagCounter::Total), tag.get(TagCounter::Split));
        assert!(tag.done_split(outcome.reference).is_err());
    }

    #[tokio::test]
    async fn test_existing_tag_total_includes_manifest_overhead() {
        let coordinator = coordinator();
        let tag = coordinator.tags.create();
        let data = vec![7u8; 10_000];
        let options = UploadOptions {
            tag: Some(tag.id().to_string()),
            size_hint: Some(data.len() as u64),
            ..UploadOptions::default()
        };

        let outcome = coordinator
            .upload_file(options, Some("blob".to_string()), "application/octet-stream", &data[..])
            .await
            .unwrap();

        // Rebuild the same manifest elsewhere to learn the encoded node sizes.
        let reader = ManifestReader::open(coordinator.storage().clone(), outcome.reference)
            .await
            .unwrap();
        let content = reader.lookup("blob").await.unwrap().target;
        let mut writer = ManifestWriter::new();
        writer
            .add(ManifestEntry::root(reader.root_metadata()))
            .unwrap();
        writer
            .add(ManifestEntry::file("blob", content, "application/octet-stream"))
            .unwrap();
        let mut node_sizes = Vec::new();
        {
            let record = |size: u64| -> StorageResult<()> {
                node_sizes.push(size);
                Ok(())
            };
            let mut size_fns: Vec<StoreSizeFn<'_>> = vec![Box::new(record)];
            let scratch: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
            let reference = writer
                .store(&StorePutter::new(scratch), None, &mut size_fns)
                .await
                .unwrap();
            assert_eq!(reference, outcome.reference);
        }

        let manifest_estimate: u64 = node_sizes.iter().map(|&size| estimate_chunk_count(size)).sum();
        assert_eq!(
            tag.get(TagCounter::Total),
            estimate_chunk_count(data.len() as u64) + manifest_estimate
        );
        assert!(!tag.is_done());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_before_any_side_effect() {
        let (coordinator, batches) = coordinator_with(Arc::new(LocalPusher));
        let batch = batches.create(100);
        let tag = coordinator.tags.create();
        let data = vec![3u8; 9_000];
        let options = UploadOptions {
            batch: Some(batch.id().to_hex()),
            tag: Some(tag.id().to_string()),
            size_hint: Some(data.len() as u64),
            ..UploadOptions::default()
        };

        let err = coordinator
            .upload_file(options, Some("/bad".to_string()), "text/plain", &data[..])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidName(_)));
        assert_eq!(batch.info().used, 0);
        assert_eq!(tag.get(TagCounter::Total), 0);
        assert_eq!(tag.get(TagCounter::Split), 0);
    }

    #[tokio::test]
    async fn test_synced_counts_every_written_chunk() {
        let coordinator = coordinator();
        let data = vec![5u8; 9_000];
        let outcome = coordinator
            .upload_file(UploadOptions::default(), Some("f".to_string()), "text/plain", &data[..])
            .await
            .unwrap();

        let tag = coordinator.tags.get(outcome.tag).unwrap();
        let split = tag.get(TagCounter::Split);
        assert!(split > 0);
        assert_eq!(tag.get(TagCounter::Synced), split);
    }

    #[tokio::test]
    async fn test_leading_separator_name_rejected() {
        let coordinator = coordinator();
        let err = coordinator
            .upload_file(
                UploadOptions::default(),
                Some("/etc/passwd".to_string()),
                "text/plain",
                &b"x"[..],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_unknown_tag_aborts_before_store() {
        let coordinator = coordinator();
        let options = UploadOptions {
            tag: Some("424242".to_string()),
            ..UploadOptions::default()
        };
        let err = coordinator
            .upload_file(options, None, "text/plain", &b"x"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::TagResolution(TagError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_quota_exhaustion_is_distinct() {
        let (coordinator, batches) = coordinator_with(Arc::new(LocalPusher));
        let batch = batches.create(1);
        let options = UploadOptions {
            batch: Some(batch.id().to_hex()),
            ..UploadOptions::default()
        };
        let data = vec![1u8; 3 * 4096];
        let err = coordinator
            .upload_file(options, None, "application/octet-stream", &data[..])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_sync_failure_is_surfaced() {
        let (coordinator, _) = coordinator_with(Arc::new(FailingPusher));
        let err = coordinator
            .upload_file(UploadOptions::default(), None, "text/plain", &b"x"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Sync(SyncError::Push { .. })));
    }

    #[tokio::test]
    async fn test_pin_requested() {
        let coordinator = coordinator();
        let options = UploadOptions {
            pin: true,
            ..UploadOptions::default()
        };
        let outcome = coordinator
            .upload_file(options, None, "text/plain", &b"pinned"[..])
            .await
            .unwrap();
        assert!(coordinator.pins.has_pin(&outcome.reference));
    }
}
