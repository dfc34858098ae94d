//! Namespace index: a background-refreshed flat snapshot of every metric
//! identifier the archive tree currently holds.
//!
//! An identifier is the archive file's path relative to the base, separators
//! replaced with `:`, with one trailing component per datasource:
//! `host1/cpu.rrd` holding `used` and `idle` contributes `host1:cpu:used`
//! and `host1:cpu:idle`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::archive::ArchiveBackend;

// ============================================================================
// Snapshot
// ============================================================================

/// One level of the namespace hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

/// Immutable result of one refresh cycle. Readers clone the `Arc` out of the
/// index and use it for as long as they like; a concurrent refresh swaps in
/// a new snapshot without disturbing them.
#[derive(Debug, Default)]
pub struct NamespaceSnapshot {
    names: Vec<String>,
}

impl NamespaceSnapshot {
    pub fn new(names: Vec<String>) -> Self {
        NamespaceSnapshot { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Substring match over full identifiers; the empty pattern matches
    /// everything.
    pub fn search(&self, pattern: &str) -> Vec<String> {
        self.names
            .iter()
            .filter(|name| name.contains(pattern))
            .cloned()
            .collect()
    }

    /// Directory view of the level below `prefix` (empty string = root).
    ///
    /// For every identifier under the prefix, the next component becomes a
    /// directory when further components follow, and a leaf file when it is
    /// terminal. Leaves are therefore datasources, so recursing through the
    /// directories reaches every identifier in the snapshot.
    pub fn list(&self, prefix: &str) -> Listing {
        let want = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}:", prefix)
        };

        let mut directories = std::collections::BTreeSet::new();
        let mut files = std::collections::BTreeSet::new();
        for name in &self.names {
            let Some(rest) = name.strip_prefix(want.as_str()) else {
                continue;
            };
            match rest.split_once(':') {
                Some((first, _)) if !first.is_empty() => {
                    directories.insert(first.to_string());
                }
                Some(_) => {}
                None if !rest.is_empty() => {
                    files.insert(rest.to_string());
                }
                None => {}
            }
        }

        Listing {
            directories: directories.into_iter().collect(),
            files: files.into_iter().collect(),
        }
    }
}

// ============================================================================
// Index
// ============================================================================

/// Shared handle: a current snapshot plus the machinery to rebuild it.
pub struct NamespaceIndex {
    base: PathBuf,
    backend: Arc<dyn ArchiveBackend>,
    current: Mutex<Arc<NamespaceSnapshot>>,
    /// Held for the duration of a refresh; overlapping refreshes would race
    /// each other's snapshot swaps.
    refresh_gate: Mutex<()>,
}

impl NamespaceIndex {
    /// Starts empty; the first `refresh()` populates it.
    pub fn new(base: impl Into<PathBuf>, backend: Arc<dyn ArchiveBackend>) -> Self {
        NamespaceIndex {
            base: base.into(),
            backend,
            current: Mutex::new(Arc::new(NamespaceSnapshot::default())),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The current snapshot. Never blocks on a running refresh.
    pub fn snapshot(&self) -> Arc<NamespaceSnapshot> {
        self.current.lock().unwrap().clone()
    }

    /// Walks the archive tree and swaps in a freshly built snapshot,
    /// returning how many identifiers it holds.
    ///
    /// A file whose metadata cannot be read is logged and skipped. A walk
    /// error aborts the whole cycle and leaves the previous snapshot in
    /// place.
    pub fn refresh(&self) -> Result<usize, walkdir::Error> {
        let _gate = self.refresh_gate.lock().unwrap();

        let mut names = Vec::new();
        for entry in WalkDir::new(&self.base) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rrd") {
                continue;
            }

            let rel = path.strip_prefix(&self.base).unwrap_or(path);
            let metric_path = rel
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(":");

            match self.backend.info(path) {
                Ok(info) => {
                    for datasource in info.datasources.keys() {
                        names.push(format!("{}:{}", metric_path, datasource));
                    }
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping archive: info failed");
                }
            }
        }

        let count = names.len();
        *self.current.lock().unwrap() = Arc::new(NamespaceSnapshot::new(names));
        Ok(count)
    }
}
