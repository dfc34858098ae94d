//! Query planning: wildcard target resolution, range clamping, and
//! projection of fetched rows into dashboard points.
//!
//! A target looks like `host*:cpu:used`: everything before the final `:` is
//! a path pattern resolved against the archive tree, the final component
//! names a datasource column. Each matched file yields its own series,
//! labeled with the resolved path rather than the pattern.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::archive::{ArchiveBackend, BackendError, ConsolidationFn};

/// Rows trimmed from the tail of every successful fetch before projection,
/// valid or not. The newest consolidation window may still be filling, so
/// its value cannot be trusted yet.
pub const UNSETTLED_TAIL_ROWS: usize = 1;

/// One series of a query response: resolved identifier plus
/// `[value, timestamp_millis]` points, time ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub target: String,
    pub datapoints: Vec<[f64; 2]>,
}

/// Resolves query targets to archive files and fetches their samples.
pub struct QueryPlanner {
    backend: Arc<dyn ArchiveBackend>,
    base: PathBuf,
    step: u64,
    multiplier: f64,
    cf: ConsolidationFn,
}

impl QueryPlanner {
    pub fn new(
        backend: Arc<dyn ArchiveBackend>,
        base: impl Into<PathBuf>,
        step: u64,
        multiplier: f64,
    ) -> Self {
        Self {
            backend,
            base: base.into(),
            step,
            multiplier,
            cf: ConsolidationFn::Average,
        }
    }

    /// Runs every target over `[from, to)`. Per-file and per-target
    /// failures are logged and skipped; the response carries whatever
    /// succeeded.
    pub fn query(&self, targets: &[String], from: i64, to: i64) -> Vec<TimeSeries> {
        let mut result = Vec::new();
        for target in targets {
            self.query_target(target, from, to, &mut result);
        }
        result
    }

    fn query_target(&self, target: &str, from: i64, to: i64, out: &mut Vec<TimeSeries>) {
        let Some((pattern, datasource)) = target.rsplit_once(':') else {
            debug!(target, "target has no datasource component, skipping");
            return;
        };

        for file in self.resolve_pattern(pattern) {
            match self.query_file(&file, datasource, from, to) {
                Ok(series) => out.push(series),
                Err(err) => {
                    warn!(file = %file.display(), error = %err, "skipping file")
                }
            }
        }
    }

    /// Expands a `:`-joined path pattern against the archive tree. A bad
    /// pattern or an unreadable match yields nothing, never an error.
    fn resolve_pattern(&self, pattern: &str) -> Vec<PathBuf> {
        let fs_pattern = format!("{}/{}.rrd", self.base.display(), pattern.replace(':', "/"));
        match glob::glob(&fs_pattern) {
            Ok(paths) => paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(err) => {
                        warn!(error = %err, "unreadable glob match");
                        None
                    }
                })
                .collect(),
            Err(err) => {
                warn!(pattern = fs_pattern.as_str(), error = %err, "bad target pattern");
                Vec::new()
            }
        }
    }

    fn query_file(
        &self,
        file: &Path,
        datasource: &str,
        from: i64,
        to: i64,
    ) -> Result<TimeSeries, BackendError> {
        let info = self.backend.info(file)?;

        // Never ask for samples newer than the archive has seen.
        let end = if to > info.last_update && from < info.last_update {
            info.last_update
        } else {
            to
        };

        let fetched = self.backend.fetch(file, self.cf, from, end, self.step)?;

        // Some daemons leave `ds[...].index` out of INFO; the fetch reply
        // names its columns either way.
        let column = match info.datasources.get(datasource) {
            Some(&column) => column,
            None => fetched
                .names
                .iter()
                .position(|n| n.as_str() == datasource)
                .ok_or_else(|| BackendError::NoSuchDatasource {
                    file: file.to_path_buf(),
                    name: datasource.to_string(),
                })?,
        };

        let settled = fetched.rows.len().saturating_sub(UNSETTLED_TAIL_ROWS);
        let mut datapoints = Vec::with_capacity(settled);
        for (i, row) in fetched.rows[..settled].iter().enumerate() {
            let ts_millis = (fetched.start + i as i64 * fetched.step as i64) as f64 * 1000.0;
            match row.get(column) {
                Some(&value) if !value.is_nan() => {
                    datapoints.push([value * self.multiplier, ts_millis]);
                }
                _ => {}
            }
        }

        Ok(TimeSeries {
            target: format!("{}:{}", self.identifier_path(file), datasource),
            datapoints,
        })
    }

    /// Namespace path of a resolved file: relative to the base, extension
    /// dropped, separators rejoined with `:`.
    fn identifier_path(&self, file: &Path) -> String {
        let rel = file.strip_prefix(&self.base).unwrap_or(file);
        rel.with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }
}
