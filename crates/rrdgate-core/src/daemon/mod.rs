//! Daemon-backed archive access with a resilient fetch path.
//!
//! The daemon connection is a single shared resource behind one mutex. A
//! checkout connects lazily when the slot is empty; a transient failure
//! empties the slot so the next checkout reconnects. Holding the lock across
//! the whole request/response exchange keeps concurrent callers from
//! interleaving their lines on the wire.

use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::archive::{ArchiveBackend, ArchiveInfo, BackendError, ConsolidationFn, FetchResult};

pub mod protocol;

pub use protocol::{DaemonAddr, DaemonClient, DaemonError};

/// Retry schedule for daemon fetches: bounded attempts with quadratic
/// backoff (unit × retry²) before the second and later attempts. The
/// default unit of one second gives 1s then 4s of waiting.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_unit: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            backoff_unit,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause before retry number `retry` (1 = the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_unit * (retry * retry)
    }
}

/// The Daemon variant of archive access.
pub struct DaemonBackend {
    addr: DaemonAddr,
    retry: RetryPolicy,
    conn: Mutex<Option<DaemonClient>>,
}

impl DaemonBackend {
    pub fn new(addr: DaemonAddr) -> Self {
        Self::with_retry(addr, RetryPolicy::default())
    }

    pub fn with_retry(addr: DaemonAddr, retry: RetryPolicy) -> Self {
        DaemonBackend {
            addr,
            retry,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &DaemonAddr {
        &self.addr
    }

    /// Startup connectivity check. Failure is informational; the connection
    /// slot reconnects on demand once the daemon is reachable.
    pub fn probe(&self) -> Result<(), DaemonError> {
        self.with_conn(|_| Ok(()))
    }

    /// Best-effort flush of buffered daemon writes for one file.
    pub fn flush(&self, file: &Path) -> Result<(), DaemonError> {
        self.with_conn(|client| client.flush(file))
    }

    /// Runs one exchange against the checked-out connection, connecting
    /// first if the slot is empty. A transient failure drops the connection
    /// so the next checkout starts fresh.
    fn with_conn<T>(
        &self,
        op: impl FnOnce(&mut DaemonClient) -> Result<T, DaemonError>,
    ) -> Result<T, DaemonError> {
        let mut slot = self.conn.lock().unwrap();
        if slot.is_none() {
            debug!(addr = %self.addr, "connecting to daemon");
            *slot = Some(DaemonClient::connect(&self.addr)?);
        }
        let result = op(slot.as_mut().unwrap());
        if let Err(e) = &result {
            if e.is_transient() {
                *slot = None;
            }
        }
        result
    }
}

fn to_backend_error(file: &Path, err: DaemonError) -> BackendError {
    match err {
        DaemonError::Server { ref message, .. } if message.starts_with("No such file") => {
            BackendError::NotFound(file.to_path_buf())
        }
        other => BackendError::Unavailable(other.to_string()),
    }
}

impl ArchiveBackend for DaemonBackend {
    fn info(&self, file: &Path) -> Result<ArchiveInfo, BackendError> {
        self.with_conn(|client| client.info(file))
            .map_err(|e| to_backend_error(file, e))
    }

    /// Flush, then fetch with retries. The daemon picks its own resolution,
    /// so the step hint stays local.
    fn fetch(
        &self,
        file: &Path,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
        _step: u64,
    ) -> Result<FetchResult, BackendError> {
        if let Err(e) = self.flush(file) {
            warn!(file = %file.display(), error = %e, "flush before fetch failed");
        }

        let mut last_err = None;
        for attempt in 1..=self.retry.attempts() {
            if attempt > 1 {
                let pause = self.retry.backoff(attempt - 1);
                warn!(
                    file = %file.display(),
                    attempt,
                    pause_ms = pause.as_millis() as u64,
                    "retrying daemon fetch"
                );
                thread::sleep(pause);
            }
            match self.with_conn(|client| client.fetch(file, cf, start, end)) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    error!(file = %file.display(), attempt, error = %e, "daemon fetch failed");
                    last_err = Some(e);
                }
            }
        }

        let last = last_err.expect("at least one attempt");
        Err(match last {
            DaemonError::Server { .. } => to_backend_error(file, last),
            other => BackendError::Unavailable(format!(
                "fetch failed after {} attempts: {}",
                self.retry.attempts(),
                other
            )),
        })
    }
}
