//! Manifest persistence.
//!
//! A manifest is stored as a trie of directory nodes. Each node is a JSON
//! document written through the content pipeline; path segments map to a
//! file target, a child node (`fork`), or both. The root node additionally
//! carries the root entry (`"/"`) with manifest-wide metadata.

use crate::error::{StorageError, StorageResult};
use crate::file::{self, Joiner};
use crate::traits::{ChunkStore, Putter};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use trove_core::manifest::{PATH_SEPARATOR, ROOT_PATH};
use trove_core::{ManifestEntry, Metadata, Reference, Tag};

/// Node type marker.
pub const MANIFEST_NODE_TYPE: &str = "trove-manifest/v1";

/// Upper bound on the encoded size of a single node.
const MAX_NODE_SIZE: u64 = 16 * 1024 * 1024;

/// Callback invoked with the encoded size of every node before it is stored.
pub type StoreSizeFn<'a> = Box<dyn FnMut(u64) -> StorageResult<()> + Send + 'a>;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Node {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<FileTarget>,
    #[serde(default)]
    entries: BTreeMap<String, NodeEntry>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct NodeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<FileTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fork: Option<Reference>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct FileTarget {
    reference: Reference,
    #[serde(default)]
    metadata: Metadata,
}

impl FileTarget {
    fn from_entry(entry: &ManifestEntry) -> Self {
        Self {
            reference: entry.target,
            metadata: entry.metadata.clone(),
        }
    }

    fn into_entry(self, path: String) -> ManifestEntry {
        ManifestEntry::new(path, self.reference, self.metadata)
    }
}

/// Directory tree assembled in memory before persisting.
#[derive(Default)]
struct DirBuilder {
    files: BTreeMap<String, FileTarget>,
    dirs: BTreeMap<String, DirBuilder>,
}

impl DirBuilder {
    fn insert(&mut self, path: &str, target: FileTarget) {
        match path.split_once(PATH_SEPARATOR) {
            Some((dir, rest)) => self.dirs.entry(dir.to_string()).or_default().insert(rest, target),
            None => {
                self.files.insert(path.to_string(), target);
            }
        }
    }
}

/// A manifest being built for upload.
#[derive(Debug, Default)]
pub struct ManifestWriter {
    root: Option<ManifestEntry>,
    entries: BTreeMap<String, ManifestEntry>,
}

impl ManifestWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry. The `"/"` path sets the root entry.
    pub fn add(&mut self, entry: ManifestEntry) -> StorageResult<()> {
        if entry.is_root() {
            self.root = Some(entry);
            return Ok(());
        }
        if entry.path.is_empty() || entry.path.starts_with(PATH_SEPARATOR) {
            return Err(StorageError::Core(trove_core::Error::InvalidPath(format!(
                "invalid manifest path: {:?}",
                entry.path
            ))));
        }
        self.entries.insert(entry.path.clone(), entry);
        Ok(())
    }

    pub fn lookup(&self, path: &str) -> Option<&ManifestEntry> {
        if path == ROOT_PATH {
            return self.root.as_ref();
        }
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.root.is_none()
    }

    /// Persist the manifest and return its reference.
    ///
    /// Nodes are stored bottom-up; every size callback is called once per node.
    pub async fn store(
        &self,
        putter: &dyn Putter,
        tag: Option<&Tag>,
        size_fns: &mut [StoreSizeFn<'_>],
    ) -> StorageResult<Reference> {
        let mut tree = DirBuilder::default();
        for (path, entry) in &self.entries {
            tree.insert(path, FileTarget::from_entry(entry));
        }
        let root = self.root.as_ref().map(FileTarget::from_entry);
        let mut writer = NodeWriter {
            putter,
            tag,
            size_fns,
        };
        writer.persist(tree, root).await
    }
}

struct NodeWriter<'a, 'b, 'c> {
    putter: &'a dyn Putter,
    tag: Option<&'a Tag>,
    size_fns: &'b mut [StoreSizeFn<'c>],
}

impl<'a, 'b, 'c> NodeWriter<'a, 'b, 'c> {
    fn persist<'s>(
        &'s mut self,
        dir: DirBuilder,
        root: Option<FileTarget>,
    ) -> BoxFuture<'s, StorageResult<Reference>> {
        async move {
            let mut entries: BTreeMap<String, NodeEntry> = dir
                .files
                .into_iter()
                .map(|(name, target)| {
                    (
                        name,
                        NodeEntry {
                            file: Some(target),
                            fork: None,
                        },
                    )
                })
                .collect();
            for (name, child) in dir.dirs {
                let fork = self.persist(child, None).await?;
                entries.entry(name).or_default().fork = Some(fork);
            }

            let node = Node {
                kind: MANIFEST_NODE_TYPE.to_string(),
                root,
                entries,
            };
            let encoded =
                serde_json::to_vec(&node).map_err(|e| StorageError::Serialization(e.to_string()))?;
            for size_fn in self.size_fns.iter_mut() {
                size_fn(encoded.len() as u64)?;
            }
            file::store(self.putter, self.tag, encoded.as_slice()).await
        }
        .boxed()
    }
}

/// Read-only view of a stored manifest.
#[derive(Clone)]
pub struct ManifestReader {
    store: Arc<dyn ChunkStore>,
    reference: Reference,
    root: Node,
}

impl ManifestReader {
    /// Load the root node. Data that is not a manifest node is `NotAManifest`.
    pub async fn open(store: Arc<dyn ChunkStore>, reference: Reference) -> StorageResult<Self> {
        let root = load_node(&store, reference).await?;
        Ok(Self {
            store,
            reference,
            root,
        })
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn root_entry(&self) -> Option<ManifestEntry> {
        self.root
            .root
            .clone()
            .map(|target| target.into_entry(ROOT_PATH.to_string()))
    }

    /// Root entry metadata, empty when there is no root entry.
    pub fn root_metadata(&self) -> Metadata {
        self.root
            .root
            .as_ref()
            .map(|target| target.metadata.clone())
            .unwrap_or_default()
    }

    /// Exact lookup. Absent paths are `StorageError::NotFound`.
    pub async fn lookup(&self, path: &str) -> StorageResult<ManifestEntry> {
        if path == ROOT_PATH {
            return self
                .root_entry()
                .ok_or_else(|| StorageError::NotFound(path.to_string()));
        }
        if path.is_empty() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        let (dirs, name) = split_path(path);
        let node = self
            .walk(&dirs)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        node.entries
            .get(name)
            .and_then(|entry| entry.file.clone())
            .map(|target| target.into_entry(path.to_string()))
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    /// Whether any entry path starts with `prefix`.
    pub async fn has_prefix(&self, prefix: &str) -> StorageResult<bool> {
        let (dirs, name) = split_path(prefix);
        let Some(node) = self.walk(&dirs).await? else {
            return Ok(false);
        };
        if name.is_empty() {
            return Ok(!node.entries.is_empty());
        }
        Ok(node.entries.keys().any(|key| key.starts_with(name)))
    }

    /// Follow directory segments from the root. `None` if a segment is missing.
    async fn walk(&self, dirs: &[&str]) -> StorageResult<Option<Node>> {
        let mut node = self.root.clone();
        for segment in dirs {
            let Some(fork) = node.entries.get(*segment).and_then(|entry| entry.fork) else {
                return Ok(None);
            };
            node = load_node(&self.store, fork).await?;
        }
        Ok(Some(node))
    }
}

fn split_path(path: &str) -> (Vec<&str>, &str) {
    let mut segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    let name = segments.pop().unwrap_or_default();
    (segments, name)
}

async fn load_node(store: &Arc<dyn ChunkStore>, reference: Reference) -> StorageResult<Node> {
    let joiner = Joiner::new(store.clone(), reference).await?;
    if joiner.size() > MAX_NODE_SIZE {
        return Err(StorageError::NotAManifest(format!(
            "{reference}: {} bytes exceeds node limit",
            joiner.size()
        )));
    }
    let data = joiner.read_all().await?;
    let node: Node = serde_json::from_slice(&data)
        .map_err(|e| StorageError::NotAManifest(format!("{reference}: {e}")))?;
    if node.kind != MANIFEST_NODE_TYPE {
        return Err(StorageError::NotAManifest(format!(
            "{reference}: unexpected node type {:?}",
            node.kind
        )));
    }
    Ok(node)
}
