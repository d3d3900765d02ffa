//! Manifest entries and the website configuration carried by a manifest root.

use crate::reference::Reference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Path of the root entry holding manifest-wide metadata.
pub const ROOT_PATH: &str = "/";

/// Path separator used by manifest paths.
pub const PATH_SEPARATOR: char = '/';

pub const CONTENT_TYPE_KEY: &str = "content-type";
pub const FILENAME_KEY: &str = "filename";
pub const INDEX_DOCUMENT_KEY: &str = "website-index-document-suffix";
pub const ERROR_DOCUMENT_KEY: &str = "website-error-document-path";
pub const FEED_OWNER_KEY: &str = "feed-owner";
pub const FEED_TOPIC_KEY: &str = "feed-topic";
pub const FEED_TYPE_KEY: &str = "feed-type";

/// Entry metadata. Ordered so that encodings are deterministic.
pub type Metadata = BTreeMap<String, String>;

/// A single path in a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub target: Reference,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>, target: Reference, metadata: Metadata) -> Self {
        Self {
            path: path.into(),
            target,
            metadata,
        }
    }

    /// Root entry carrying manifest-wide metadata and no content.
    pub fn root(metadata: Metadata) -> Self {
        Self::new(ROOT_PATH, Reference::ZERO, metadata)
    }

    /// Entry for a stored file with its content type and file name.
    pub fn file(path: impl Into<String>, target: Reference, content_type: &str) -> Self {
        let path = path.into();
        let mut metadata = Metadata::new();
        metadata.insert(CONTENT_TYPE_KEY.to_string(), content_type.to_string());
        metadata.insert(FILENAME_KEY.to_string(), base_name(&path).to_string());
        Self::new(path, target, metadata)
    }

    pub fn is_root(&self) -> bool {
        self.path == ROOT_PATH
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get(CONTENT_TYPE_KEY).map(String::as_str)
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.get(FILENAME_KEY).map(String::as_str)
    }
}

/// Website behaviour configured on a manifest's root entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WebsiteConfig {
    /// Suffix joined to directory paths, e.g. `index.html`.
    pub index_document: Option<String>,
    /// Entry served when nothing else matches.
    pub error_document: Option<String>,
}

impl WebsiteConfig {
    /// Read the website keys from root metadata. Empty values count as unset.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let value = |key: &str| {
            metadata
                .get(key)
                .filter(|v| !v.is_empty())
                .map(String::to_string)
        };
        Self {
            index_document: value(INDEX_DOCUMENT_KEY),
            error_document: value(ERROR_DOCUMENT_KEY),
        }
    }

    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(index) = &self.index_document {
            metadata.insert(INDEX_DOCUMENT_KEY.to_string(), index.clone());
        }
        if let Some(error) = &self.error_document {
            metadata.insert(ERROR_DOCUMENT_KEY.to_string(), error.clone());
        }
        metadata
    }

    pub fn is_empty(&self) -> bool {
        self.index_document.is_none() && self.error_document.is_none()
    }
}

/// Join a directory-like path and a relative name with exactly one separator.
pub fn join_path(base: &str, name: &str) -> String {
    let name = name.trim_start_matches(PATH_SEPARATOR);
    if base.is_empty() {
        return name.to_string();
    }
    if base.ends_with(PATH_SEPARATOR) {
        format!("{base}{name}")
    } else {
        format!("{base}{PATH_SEPARATOR}{name}")
    }
}

/// Final component of a path. Directory components are dropped.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(PATH_SEPARATOR);
    match trimmed.rfind(PATH_SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Validate a path used as an entry name.
pub fn validate_entry_path(path: &str) -> crate::Result<()> {
    if path.is_empty() {
        return Err(crate::Error::InvalidPath("path is empty".to_string()));
    }
    if path.starts_with(PATH_SEPARATOR) {
        return Err(crate::Error::InvalidPath(format!(
            "path must not start with '{PATH_SEPARATOR}': {path}"
        )));
    }
    if path.split(PATH_SEPARATOR).any(|segment| segment == "..") {
        return Err(crate::Error::InvalidPath(format!(
            "path must not contain '..': {path}"
        )));
    }
    Ok(())
}
