//! Archive access layer.
//!
//! One contract over two ways of reading round-robin archives:
//! - `LocalBackend` opens the files directly (`rrd` module does the parsing)
//! - `DaemonBackend` (in `crate::daemon`) talks to a running rrdcached
//!
//! Callers hold an `Arc<dyn ArchiveBackend>` and never know which variant is
//! behind it. The variant is chosen once at startup and kept for the process
//! lifetime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod local;
pub mod mock;
pub mod rrd;

pub use local::LocalBackend;

/// Consolidation function applied when samples are read back at a coarser
/// resolution than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationFn {
    Average,
    Min,
    Max,
    Last,
}

impl ConsolidationFn {
    /// Name as stored in archive headers and used on the daemon wire.
    pub fn name(self) -> &'static str {
        match self {
            ConsolidationFn::Average => "AVERAGE",
            ConsolidationFn::Min => "MIN",
            ConsolidationFn::Max => "MAX",
            ConsolidationFn::Last => "LAST",
        }
    }
}

/// Per-file metadata, produced fresh on every `info()` call.
#[derive(Debug, Clone, Default)]
pub struct ArchiveInfo {
    /// Datasource name → column index in fetched rows.
    pub datasources: HashMap<String, usize>,
    /// Timestamp of the most recent update, epoch seconds.
    pub last_update: i64,
}

/// Consolidated samples for one archive file.
///
/// `rows` is time-ascending; row `i` covers the consolidation window ending
/// at `start + i * step`. `start` is therefore the timestamp of row 0, for
/// both backend variants. Unknown samples are NaN.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// Timestamp of the first row, epoch seconds.
    pub start: i64,
    /// Seconds between consecutive rows; the backend's choice, which may be
    /// coarser than requested.
    pub step: u64,
    /// Datasource names in column order.
    pub names: Vec<String>,
    /// One value per datasource per row.
    pub rows: Vec<Vec<f64>>,
}

/// Error type for backend operations.
#[derive(Debug)]
pub enum BackendError {
    /// The archive file does not exist.
    NotFound(PathBuf),
    /// The file names no such datasource.
    NoSuchDatasource { file: PathBuf, name: String },
    /// The file is unreadable or the daemon could not serve the call
    /// (including after the retry budget is spent).
    Unavailable(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotFound(path) => write!(f, "archive not found: {}", path.display()),
            BackendError::NoSuchDatasource { file, name } => {
                write!(f, "no datasource {:?} in {}", name, file.display())
            }
            BackendError::Unavailable(msg) => write!(f, "backend unavailable: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Uniform Info/Fetch capability over an individual archive file.
///
/// Implementations may block on I/O; callers on an async runtime go through
/// `spawn_blocking`. Per-file failures are the caller's to log and skip: one
/// bad file never fails a whole operation.
pub trait ArchiveBackend: Send + Sync {
    /// Reads datasource layout and the last-update timestamp.
    fn info(&self, file: &Path) -> Result<ArchiveInfo, BackendError>;

    /// Reads consolidated samples covering `[start, end]` at roughly `step`
    /// second resolution. The returned step and row count are whatever the
    /// backend actually used.
    fn fetch(
        &self,
        file: &Path,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
        step: u64,
    ) -> Result<FetchResult, BackendError>;
}
