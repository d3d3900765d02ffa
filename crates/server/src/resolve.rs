//! Manifest and path resolution for downloads.
//!
//! [`ManifestResolver`] turns a root reference into a navigable manifest,
//! following at most one feed indirection. [`PathResolver`] then walks the
//! manifest with the website fallback chain: direct match, directory
//! redirect, index document, error document.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use trove_core::manifest::{PATH_SEPARATOR, join_path};
use trove_core::{Feed, FeedIndex, FeedUpdate, ManifestEntry, Reference, WebsiteConfig};
use trove_storage::{ChunkStore, LookupFactory, ManifestReader, StorageError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("not a manifest: {address}")]
    NotAManifest {
        address: Reference,
        #[source]
        source: StorageError,
    },

    #[error("feed not found: owner {owner} topic {topic}")]
    FeedNotFound { owner: String, topic: String },

    #[error("feed lookup failed: {0}")]
    FeedLookup(StorageError),

    #[error("feed update malformed: {0}")]
    FeedUpdateMalformed(String),

    #[error("address not found or incorrect")]
    AddressNotFound,

    #[error("path address not found: {0}")]
    PathNotFound(String),

    /// The path names a directory. The caller re-issues the request with a trailing slash.
    #[error("redirect to directory: {0}")]
    RedirectToDirectory(String),

    #[error("request cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAManifest { .. } => "not_a_manifest",
            Self::FeedNotFound { .. } => "feed_not_found",
            Self::FeedLookup(_) => "feed_lookup",
            Self::FeedUpdateMalformed(_) => "feed_update_malformed",
            Self::AddressNotFound => "address_not_found",
            Self::PathNotFound(_) => "path_not_found",
            Self::RedirectToDirectory(_) => "redirect",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A manifest ready for path lookups.
#[derive(Clone)]
pub struct ResolvedManifest {
    pub manifest: ManifestReader,
    /// Website keys of the root entry, parsed once.
    pub website: WebsiteConfig,
    /// Set when the root reference was a feed and `manifest` is its current target.
    pub feed_index: Option<FeedIndex>,
}

impl ResolvedManifest {
    fn new(manifest: ManifestReader, feed_index: Option<FeedIndex>) -> Self {
        let website = WebsiteConfig::from_metadata(&manifest.root_metadata());
        Self {
            manifest,
            website,
            feed_index,
        }
    }

    pub fn feed_dereferenced(&self) -> bool {
        self.feed_index.is_some()
    }
}

/// How the address being fetched was reached.
#[derive(Clone, Copy, Debug)]
enum Hop {
    /// The root reference given by the client.
    Direct,
    /// The target of a feed update. Never dereferenced again.
    Feed(FeedIndex),
}

enum State {
    Fetching { address: Reference, hop: Hop },
    Resolved(ResolvedManifest),
}

/// Resolves root references to manifests, dereferencing at most one feed.
#[derive(Clone)]
pub struct ManifestResolver {
    storage: Arc<dyn ChunkStore>,
    feeds: Arc<dyn LookupFactory>,
}

impl ManifestResolver {
    pub fn new(storage: Arc<dyn ChunkStore>, feeds: Arc<dyn LookupFactory>) -> Self {
        Self { storage, feeds }
    }

    pub async fn resolve(
        &self,
        root: Reference,
        cancel: &CancellationToken,
    ) -> Result<ResolvedManifest, ResolveError> {
        let mut state = State::Fetching {
            address: root,
            hop: Hop::Direct,
        };
        // A fetch reached through `Hop::Feed` always yields `Resolved`, so this
        // runs at most twice.
        loop {
            state = match state {
                State::Resolved(resolved) => return Ok(resolved),
                State::Fetching { address, hop } => self.fetch(address, hop, cancel).await?,
            };
        }
    }

    async fn fetch(
        &self,
        address: Reference,
        hop: Hop,
        cancel: &CancellationToken,
    ) -> Result<State, ResolveError> {
        let manifest = cancellable(cancel, ManifestReader::open(self.storage.clone(), address))
            .await?
            .map_err(|source| ResolveError::NotAManifest { address, source })?;

        if let Hop::Feed(index) = hop {
            return Ok(State::Resolved(ResolvedManifest::new(manifest, Some(index))));
        }

        let feed = match Feed::from_metadata(&manifest.root_metadata()) {
            Ok(Some(feed)) => feed,
            Ok(None) => return Ok(State::Resolved(ResolvedManifest::new(manifest, None))),
            Err(e) => {
                debug!(address = %address, error = %e, "feed metadata undecodable, serving as manifest");
                return Ok(State::Resolved(ResolvedManifest::new(manifest, None)));
            }
        };

        let lookup = match self.feeds.new_lookup(&feed) {
            Ok(lookup) => lookup,
            Err(StorageError::Unsupported(reason)) => {
                debug!(address = %address, %reason, "feed type unsupported, serving as manifest");
                return Ok(State::Resolved(ResolvedManifest::new(manifest, None)));
            }
            Err(e) => return Err(ResolveError::FeedLookup(e)),
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let found = cancellable(cancel, lookup.at(now, 0))
            .await?
            .map_err(ResolveError::FeedLookup)?;
        let Some((chunk, index)) = found else {
            return Err(ResolveError::FeedNotFound {
                owner: feed.owner_hex(),
                topic: feed.topic_hex(),
            });
        };

        let update = FeedUpdate::from_chunk(&chunk)
            .map_err(|e| ResolveError::FeedUpdateMalformed(e.to_string()))?;
        debug!(
            feed = %address,
            index = %index,
            target = %update.target,
            "dereferenced feed"
        );
        Ok(State::Fetching {
            address: update.target,
            hop: Hop::Feed(index),
        })
    }
}

/// Where a path lookup found its entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Exact,
    IndexDocument,
    ErrorDocument,
}

#[derive(Clone, Debug)]
pub struct ResolvedEntry {
    pub entry: ManifestEntry,
    pub kind: EntryKind,
}

/// Navigates a resolved manifest with the website fallback chain.
pub struct PathResolver<'a> {
    resolved: &'a ResolvedManifest,
    cancel: &'a CancellationToken,
}

impl<'a> PathResolver<'a> {
    pub fn new(resolved: &'a ResolvedManifest, cancel: &'a CancellationToken) -> Self {
        Self { resolved, cancel }
    }

    pub async fn lookup(&self, path: &str) -> Result<ResolvedEntry, ResolveError> {
        let website = &self.resolved.website;

        if path.is_empty() {
            let Some(index) = &website.index_document else {
                return Err(ResolveError::AddressNotFound);
            };
            return match self.find(&join_path(path, index)).await? {
                Some(entry) => Ok(found(entry, EntryKind::IndexDocument)),
                None => Err(ResolveError::AddressNotFound),
            };
        }

        if let Some(entry) = self.find(path).await? {
            return Ok(found(entry, EntryKind::Exact));
        }

        if !path.starts_with(PATH_SEPARATOR) {
            let directory = format!("{path}{PATH_SEPARATOR}");
            if self.has_prefix(&directory).await? {
                return Err(ResolveError::RedirectToDirectory(path.to_string()));
            }
        }

        if let Some(index) = &website.index_document
            && !path.ends_with(index.as_str())
            && let Some(entry) = self.find(&join_path(path, index)).await?
        {
            return Ok(found(entry, EntryKind::IndexDocument));
        }

        if let Some(error_document) = &website.error_document
            && error_document != path
            && let Some(entry) = self.find(error_document).await?
        {
            return Ok(found(entry, EntryKind::ErrorDocument));
        }

        Err(ResolveError::PathNotFound(path.to_string()))
    }

    /// Exact lookup. Absence and manifest failures both read as `None`.
    async fn find(&self, path: &str) -> Result<Option<ManifestEntry>, ResolveError> {
        match cancellable(self.cancel, self.resolved.manifest.lookup(path)).await? {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => {
                warn!(path, error = %e, "manifest lookup failed");
                Ok(None)
            }
        }
    }

    async fn has_prefix(&self, prefix: &str) -> Result<bool, ResolveError> {
        match cancellable(self.cancel, self.resolved.manifest.has_prefix(prefix)).await? {
            Ok(exists) => Ok(exists),
            Err(e) => {
                warn!(prefix, error = %e, "manifest prefix query failed");
                Ok(false)
            }
        }
    }
}

fn found(entry: ManifestEntry, kind: EntryKind) -> ResolvedEntry {
    ResolvedEntry { entry, kind }
}

/// Race `fut` against cancellation of the request.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, ResolveError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolveError::Cancelled),
        output = fut => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_core::manifest::{ERROR_DOCUMENT_KEY, INDEX_DOCUMENT_KEY, Metadata};
    use trove_core::{FeedType, Feed};
    use trove_storage::{FeedPublisher, ManifestWriter, MemoryStore, StoreLookupFactory, StorePutter, file};

    struct Fixture {
        storage: Arc<dyn ChunkStore>,
        resolver: ManifestResolver,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let storage: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
            let resolver = ManifestResolver::new(
                storage.clone(),
                Arc::new(StoreLookupFactory::new(storage.clone())),
            );
            Self {
                storage,
                resolver,
                cancel: CancellationToken::new(),
            }
        }

        fn putter(&self) -> StorePutter {
            StorePutter::new(self.storage.clone())
        }

        async fn content(&self, data: &[u8]) -> Reference {
            file::store(&self.putter(), None, data).await.unwrap()
        }

        /// Store a manifest with root metadata and the given file paths.
        async fn manifest(&self, root: Metadata, paths: &[&str]) -> Reference {
            let mut writer = ManifestWriter::new();
            if !root.is_empty() {
                writer.add(ManifestEntry::root(root)).unwrap();
            }
            for path in paths {
                let target = self.content(path.as_bytes()).await;
                writer
                    .add(ManifestEntry::file(*path, target, "text/html"))
                    .unwrap();
            }
            writer.store(&self.putter(), None, &mut []).await.unwrap()
        }

        async fn lookup(&self, root: Reference, path: &str) -> Result<ResolvedEntry, ResolveError> {
            let resolved = self.resolver.resolve(root, &self.cancel).await?;
            PathResolver::new(&resolved, &self.cancel).lookup(path).await
        }
    }

    fn website(index: Option<&str>, error: Option<&str>) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(index) = index {
            metadata.insert(INDEX_DOCUMENT_KEY.to_string(), index.to_string());
        }
        if let Some(error) = error {
            metadata.insert(ERROR_DOCUMENT_KEY.to_string(), error.to_string());
        }
        metadata
    }

    fn test_feed(seed: u8) -> Feed {
        Feed::new([seed; 20], [seed.wrapping_add(1); 32], FeedType::Sequence)
    }

    async fn publish(fixture: &Fixture, feed: &Feed, target: Reference) -> FeedIndex {
        let update = FeedUpdate::new(OffsetDateTime::now_utc().unix_timestamp() - 1, target);
        FeedPublisher::new(fixture.storage.clone())
            .publish(&fixture.putter(), feed, update)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_path_serves_index_document() {
        let fixture = Fixture::new();
        let root = fixture
            .manifest(website(Some("index.html"), None), &["index.html"])
            .await;

        let found = fixture.lookup(root, "").await.unwrap();
        assert_eq!(found.entry.path, "index.html");
        assert_eq!(found.kind, EntryKind::IndexDocument);
    }

    #[tokio::test]
    async fn test_empty_path_without_index_is_address_not_found() {
        let fixture = Fixture::new();
        let root = fixture.manifest(Metadata::new(), &["a.txt"]).await;
        assert!(matches!(
            fixture.lookup(root, "").await,
            Err(ResolveError::AddressNotFound)
        ));

        let dangling = fixture
            .manifest(website(Some("missing.html"), None), &["a.txt"])
            .await;
        assert!(matches!(
            fixture.lookup(dangling, "").await,
            Err(ResolveError::AddressNotFound)
        ));
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found_until_directory_exists() {
        let fixture = Fixture::new();
        let flat = fixture
            .manifest(website(Some("index.html"), None), &["index.html"])
            .await;
        assert!(matches!(
            fixture.lookup(flat, "foo").await,
            Err(ResolveError::PathNotFound(_))
        ));

        let with_dir = fixture
            .manifest(
                website(Some("index.html"), None),
                &["index.html", "foo/index.html"],
            )
            .await;
        assert!(matches!(
            fixture.lookup(with_dir, "foo").await,
            Err(ResolveError::RedirectToDirectory(_))
        ));

        let found = fixture.lookup(with_dir, "foo/").await.unwrap();
        assert_eq!(found.entry.path, "foo/index.html");
        assert_eq!(found.kind, EntryKind::IndexDocument);
    }

    #[tokio::test]
    async fn test_direct_match_wins_over_fallbacks() {
        let fixture = Fixture::new();
        let root = fixture
            .manifest(
                website(Some("index.html"), Some("404.html")),
                &["index.html", "404.html", "docs/guide.html"],
            )
            .await;

        let found = fixture.lookup(root, "docs/guide.html").await.unwrap();
        assert_eq!(found.kind, EntryKind::Exact);
        assert_eq!(found.entry.path, "docs/guide.html");
    }

    #[tokio::test]
    async fn test_error_document_fallback() {
        let fixture = Fixture::new();
        let root = fixture
            .manifest(
                website(Some("index.html"), Some("404.html")),
                &["index.html", "404.html"],
            )
            .await;

        let found = fixture.lookup(root, "nope.html").await.unwrap();
        assert_eq!(found.kind, EntryKind::ErrorDocument);
        assert_eq!(found.entry.path, "404.html");
    }

    #[tokio::test]
    async fn test_leading_separator_skips_redirect() {
        let fixture = Fixture::new();
        let root = fixture.manifest(Metadata::new(), &["foo/a.txt"]).await;
        assert!(matches!(
            fixture.lookup(root, "/foo").await,
            Err(ResolveError::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_plain_content_is_not_a_manifest() {
        let fixture = Fixture::new();
        let content = fixture.content(b"just bytes").await;
        assert!(matches!(
            fixture.resolver.resolve(content, &fixture.cancel).await,
            Err(ResolveError::NotAManifest { .. })
        ));
    }

    #[tokio::test]
    async fn test_feed_is_dereferenced_once() {
        let fixture = Fixture::new();

        // B is feed-shaped: its root names another feed with a live update.
        let inner = test_feed(9);
        let decoy = fixture
            .manifest(website(Some("decoy.html"), None), &["decoy.html"])
            .await;
        publish(&fixture, &inner, decoy).await;
        let mut b_root = inner.to_metadata();
        b_root.extend(website(Some("b.html"), None));
        let b = fixture.manifest(b_root, &["b.html"]).await;

        let outer = test_feed(1);
        let index = publish(&fixture, &outer, b).await;
        let a = fixture.manifest(outer.to_metadata(), &[]).await;

        let resolved = fixture.resolver.resolve(a, &fixture.cancel).await.unwrap();
        assert_eq!(resolved.manifest.reference(), b);
        assert_eq!(resolved.feed_index, Some(index));
        assert!(resolved.feed_dereferenced());

        let found = PathResolver::new(&resolved, &fixture.cancel)
            .lookup("")
            .await
            .unwrap();
        assert_eq!(found.entry.path, "b.html");
    }

    #[tokio::test]
    async fn test_direct_manifest_is_not_feed_dereferenced() {
        let fixture = Fixture::new();
        let root = fixture.manifest(website(Some("a"), None), &["a"]).await;
        let resolved = fixture.resolver.resolve(root, &fixture.cancel).await.unwrap();
        assert!(!resolved.feed_dereferenced());
        assert_eq!(resolved.feed_index, None);
    }

    #[tokio::test]
    async fn test_feed_without_updates_is_feed_not_found() {
        let fixture = Fixture::new();
        let root = fixture.manifest(test_feed(3).to_metadata(), &[]).await;
        assert!(matches!(
            fixture.resolver.resolve(root, &fixture.cancel).await,
            Err(ResolveError::FeedNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_feed_update() {
        let fixture = Fixture::new();
        let feed = test_feed(4);
        let chunk = trove_core::Chunk::single_owner(
            feed.update_address(FeedIndex(0)),
            3,
            b"bad",
        );
        fixture.storage.put(&chunk).await.unwrap();
        let root = fixture.manifest(feed.to_metadata(), &[]).await;

        assert!(matches!(
            fixture.resolver.resolve(root, &fixture.cancel).await,
            Err(ResolveError::FeedUpdateMalformed(_))
        ));
    }

    #[tokio::test]
    async fn test_epoch_feed_served_as_manifest() {
        let fixture = Fixture::new();
        let feed = Feed::new([5; 20], [6; 32], FeedType::Epoch);
        let mut root = feed.to_metadata();
        root.extend(website(Some("a.txt"), None));
        let reference = fixture.manifest(root, &["a.txt"]).await;

        let resolved = fixture
            .resolver
            .resolve(reference, &fixture.cancel)
            .await
            .unwrap();
        assert!(!resolved.feed_dereferenced());
    }

    #[tokio::test]
    async fn test_cancelled_resolution() {
        let fixture = Fixture::new();
        let root = fixture.manifest(website(Some("a"), None), &["a"]).await;
        fixture.cancel.cancel();
        assert!(matches!(
            fixture.resolver.resolve(root, &fixture.cancel).await,
            Err(ResolveError::Cancelled)
        ));
    }
}
