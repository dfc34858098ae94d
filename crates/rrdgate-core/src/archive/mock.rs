//! In-memory mock backend for testing index and query code without real
//! archive files or a daemon.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{ArchiveBackend, ArchiveInfo, BackendError, ConsolidationFn, FetchResult};

/// One recorded `fetch()` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub file: PathBuf,
    pub cf: ConsolidationFn,
    pub start: i64,
    pub end: i64,
    pub step: u64,
}

#[derive(Debug, Clone)]
struct MockArchive {
    names: Vec<String>,
    last_update: i64,
    series: FetchResult,
}

/// Scripted backend: canned archives, injectable failures, and a call log
/// so tests can assert the exact ranges requested.
#[derive(Debug, Default)]
pub struct MockBackend {
    archives: HashMap<PathBuf, MockArchive>,
    info_failures: HashSet<PathBuf>,
    fetch_failures: HashSet<PathBuf>,
    hidden_info: HashMap<PathBuf, HashSet<String>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an archive with the given datasources and last-update;
    /// fetches return no rows until `set_series` is called.
    pub fn add_archive(&mut self, path: impl AsRef<Path>, ds_names: &[&str], last_update: i64) {
        self.archives.insert(
            path.as_ref().to_path_buf(),
            MockArchive {
                names: ds_names.iter().map(|s| s.to_string()).collect(),
                last_update,
                series: FetchResult {
                    start: 0,
                    step: 10,
                    names: ds_names.iter().map(|s| s.to_string()).collect(),
                    rows: Vec::new(),
                },
            },
        );
    }

    /// Sets the rows every fetch of this archive returns.
    pub fn set_series(&mut self, path: impl AsRef<Path>, start: i64, step: u64, rows: Vec<Vec<f64>>) {
        let archive = self
            .archives
            .get_mut(path.as_ref())
            .expect("set_series on unregistered archive");
        archive.series = FetchResult {
            start,
            step,
            names: archive.names.clone(),
            rows,
        };
    }

    pub fn fail_info(&mut self, path: impl AsRef<Path>) {
        self.info_failures.insert(path.as_ref().to_path_buf());
    }

    /// Drops one datasource from `info()` responses while `fetch()` still
    /// names it, like a daemon whose INFO omits `ds[...].index` keys.
    pub fn omit_from_info(&mut self, path: impl AsRef<Path>, name: &str) {
        self.hidden_info
            .entry(path.as_ref().to_path_buf())
            .or_default()
            .insert(name.to_string());
    }

    pub fn fail_fetch(&mut self, path: impl AsRef<Path>) {
        self.fetch_failures.insert(path.as_ref().to_path_buf());
    }

    /// All fetches seen so far, in call order.
    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArchiveBackend for MockBackend {
    fn info(&self, file: &Path) -> Result<ArchiveInfo, BackendError> {
        if self.info_failures.contains(file) {
            return Err(BackendError::Unavailable(format!(
                "injected info failure: {}",
                file.display()
            )));
        }
        let archive = self
            .archives
            .get(file)
            .ok_or_else(|| BackendError::NotFound(file.to_path_buf()))?;
        let hidden = self.hidden_info.get(file);
        Ok(ArchiveInfo {
            datasources: archive
                .names
                .iter()
                .enumerate()
                .filter(|(_, n)| hidden.is_none_or(|h| !h.contains(*n)))
                .map(|(i, n)| (n.clone(), i))
                .collect(),
            last_update: archive.last_update,
        })
    }

    fn fetch(
        &self,
        file: &Path,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
        step: u64,
    ) -> Result<FetchResult, BackendError> {
        self.calls.lock().unwrap().push(FetchCall {
            file: file.to_path_buf(),
            cf,
            start,
            end,
            step,
        });
        if self.fetch_failures.contains(file) {
            return Err(BackendError::Unavailable(format!(
                "injected fetch failure: {}",
                file.display()
            )));
        }
        let archive = self
            .archives
            .get(file)
            .ok_or_else(|| BackendError::NotFound(file.to_path_buf()))?;
        Ok(archive.series.clone())
    }
}
