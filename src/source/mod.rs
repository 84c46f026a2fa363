//! Input resolution: turning a reference string into raw file bytes.
//!
//! A [`SourceRegistry`] maps URL-scheme prefixes to pluggable handlers and
//! falls back to local filesystem resolution. Every resolved record passes
//! through archive expansion, so a zip fetched over HTTP and a zip sitting in
//! a directory flatten identically.

mod archive;
mod github;
mod http;

pub use archive::{MAX_ARCHIVE_DEPTH, is_raw_archive_name, sanitize_member_name};
pub use github::GithubHandler;
pub use http::HttpHandler;

use crate::config::Config;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// An intermediate `(filename, bytes)` pair produced by a source handler.
///
/// Consumed immediately by the processing step; never exposed to callers of
/// the router directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Relative path or virtual archive-member path for the entry.
    pub filename: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

impl SourceRecord {
    /// Convenience constructor.
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Errors raised while resolving an input reference into bytes.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The handler needs an optional dependency that is not present.
    ///
    /// Distinguishable from other failures so the router can decide, per
    /// preference mode, whether a service fallback applies.
    #[error("{feature} support requires {requirement}. {hint}")]
    MissingDependency {
        /// Dependency group the handler belongs to.
        feature: &'static str,
        /// The missing requirement.
        requirement: String,
        /// Instruction for installing the requirement.
        hint: String,
    },
    /// No handler matched and the input is not a readable local path.
    #[error("unsupported or non-existent input: {0}")]
    Unsupported(String),
    /// Local filesystem access failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path being read when the failure occurred.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// HTTP transport failed before a response arrived.
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The remote endpoint answered with a non-success status.
    #[error("download of {url} failed with status {status}")]
    Status {
        /// URL being fetched.
        url: String,
        /// HTTP status returned.
        status: reqwest::StatusCode,
    },
    /// A remote file exceeded the configured size cap.
    #[error("remote file exceeds max size ({limit} bytes): {url}")]
    TooLarge {
        /// Configured byte limit.
        limit: u64,
        /// URL being fetched.
        url: String,
    },
    /// An archive container could not be read.
    #[error("archive expansion failed for {name}: {reason}")]
    Archive {
        /// Name of the failing container.
        name: String,
        /// Parser error description.
        reason: String,
    },
    /// `git clone` failed.
    #[error("git clone failed: {0}")]
    Clone(String),
    /// A repository reference failed validation.
    #[error("invalid repository spec: {0}")]
    InvalidSpec(String),
}

/// A pluggable resolver for one URL scheme or path-pattern prefix.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    /// Resolve the full input string into ordered `(filename, bytes)` pairs.
    ///
    /// Results may include archives; the registry expands those afterwards.
    async fn fetch(&self, input: &str) -> Result<Vec<SourceRecord>, SourceError>;
}

/// Prefix-dispatched registry of source handlers.
pub struct SourceRegistry {
    handlers: HashMap<String, Arc<dyn SourceHandler>>,
    max_archive_depth: usize,
}

impl SourceRegistry {
    /// Create an empty registry with the default archive depth guard.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            max_archive_depth: MAX_ARCHIVE_DEPTH,
        }
    }

    /// Create a registry with the built-in HTTP and GitHub handlers.
    pub fn with_defaults(config: &Config) -> Self {
        let mut registry = Self::new();
        let http = Arc::new(HttpHandler::new(config));
        let github = Arc::new(GithubHandler::new(config));
        registry.register("http://", http.clone());
        registry.register("https://", http);
        registry.register("github://", github.clone());
        // Longer than "https://", so repo URLs route here first.
        registry.register("https://github.com/", github);
        registry
    }

    /// Register a handler for a prefix.
    ///
    /// Registering the same prefix twice shadows the prior handler; this is
    /// the documented override point for replacing built-ins.
    pub fn register(&mut self, prefix: &str, handler: Arc<dyn SourceHandler>) {
        self.handlers.insert(prefix.to_string(), handler);
    }

    /// Cap archive nesting expansion at `depth` levels.
    pub fn set_max_archive_depth(&mut self, depth: usize) {
        self.max_archive_depth = depth;
    }

    /// Registered prefixes, sorted for display.
    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.handlers.keys().cloned().collect();
        prefixes.sort();
        prefixes
    }

    fn matching_handler(&self, input: &str) -> Option<Arc<dyn SourceHandler>> {
        // Longest-prefix-wins so "https://github.com/" shadows "https://".
        self.handlers
            .iter()
            .filter(|(prefix, _)| input.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, handler)| handler.clone())
    }

    /// Resolve an input reference into a flat, ordered record list.
    ///
    /// Scheme handlers run first; otherwise the input is treated as a local
    /// path (directories walked lexicographically, single files read whole).
    /// Any record recognized as a raw archive is expanded in place,
    /// depth-first, bounded by the depth guard.
    pub async fn resolve(&self, input: &str) -> Result<Vec<SourceRecord>, SourceError> {
        if let Some(handler) = self.matching_handler(input) {
            let records = handler.fetch(input).await?;
            return archive::expand_records(records, self.max_archive_depth);
        }

        let path = Path::new(input);
        if path.is_dir() {
            let records = walk_directory(path)?;
            return archive::expand_records(records, self.max_archive_depth);
        }

        if path.is_file() {
            let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
                path: input.to_string(),
                source,
            })?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.to_string());
            return archive::expand_records(
                vec![SourceRecord::new(name, bytes)],
                self.max_archive_depth,
            );
        }

        Err(SourceError::Unsupported(input.to_string()))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Directories never descended into during a walk.
const PRUNED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Read every file under `root`, ordered lexicographically by relative path.
pub(crate) fn walk_directory(root: &Path) -> Result<Vec<SourceRecord>, SourceError> {
    let mut records = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && PRUNED_DIRS
                    .iter()
                    .any(|pruned| entry.file_name() == *pruned))
        });

    for entry in walker {
        let entry = entry.map_err(|err| SourceError::Io {
            path: root.display().to_string(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        match std::fs::read(entry.path()) {
            Ok(bytes) => records.push(SourceRecord::new(relative, bytes)),
            Err(err) => {
                // Unreadable entries (sockets, permission holes) are skipped
                // so one bad file does not sink the whole directory.
                tracing::warn!(path = %entry.path().display(), error = %err, "Skipping unreadable file");
            }
        }
    }

    Ok(records)
}
