//! Direct-file backend: every call opens and parses the archive on local
//! storage.

use std::io;
use std::path::Path;

use super::rrd::RrdFile;
use super::{ArchiveBackend, ArchiveInfo, BackendError, ConsolidationFn, FetchResult};

/// The Local variant. Stateless; all state lives in the files.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        LocalBackend
    }
}

fn classify(file: &Path, err: io::Error) -> BackendError {
    if err.kind() == io::ErrorKind::NotFound {
        BackendError::NotFound(file.to_path_buf())
    } else {
        BackendError::Unavailable(format!("{}: {}", file.display(), err))
    }
}

impl ArchiveBackend for LocalBackend {
    fn info(&self, file: &Path) -> Result<ArchiveInfo, BackendError> {
        let rrd = RrdFile::open(file).map_err(|e| classify(file, e))?;
        Ok(rrd.info())
    }

    fn fetch(
        &self,
        file: &Path,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
        step: u64,
    ) -> Result<FetchResult, BackendError> {
        let rrd = RrdFile::open(file).map_err(|e| classify(file, e))?;
        rrd.fetch(cf, start, end, step)
            .map_err(|e| classify(file, e))
    }
}

#[cfg(test)]
mod tests {
    use super::super::rrd::testfile;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_info_and_fetch_through_the_trait() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("net.rrd");
        testfile::write_simple(
            &path,
            10,
            2000,
            vec!["rx", "tx"],
            vec![vec![1.0, 10.0], vec![2.0, 20.0]],
        );

        let backend: &dyn ArchiveBackend = &LocalBackend::new();
        let info = backend.info(&path).unwrap();
        assert_eq!(info.datasources["tx"], 1);
        assert_eq!(info.last_update, 2000);

        let res = backend
            .fetch(&path, ConsolidationFn::Average, 1990, 2000, 10)
            .unwrap();
        assert_eq!(res.rows, vec![vec![2.0, 20.0]]);
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.rrd");
        let err = LocalBackend::new().info(&missing).unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[test]
    fn test_unreadable_file_maps_to_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.rrd");
        std::fs::write(&path, b"not an archive at all").unwrap();
        let err = LocalBackend::new().info(&path).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
