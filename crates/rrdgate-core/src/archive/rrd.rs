//! Read-only parser for on-disk round-robin database files.
//!
//! The format is a raw memory dump of the writing host's structs, so field
//! widths and byte order are host-native. This reader targets the 64-bit
//! aligned layout; the float cookie check below rejects files written with
//! any other width, alignment, or byte order before a single field is
//! misread.
//!
//! File layout (64-bit build):
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ STAT HEAD (128 bytes)                                      │
//! │   cookie: [u8; 4]          = b"RRD\0"                      │
//! │   version: [u8; 5]         = "0001".."0005", NUL padded    │
//! │   (pad to 16)                                              │
//! │   float_cookie: f64        = 8.642135e130                  │
//! │   ds_cnt: u64                                              │
//! │   rra_cnt: u64                                             │
//! │   pdp_step: u64            (seconds per primary point)     │
//! │   par: [u64; 10]           (unused)                        │
//! ├────────────────────────────────────────────────────────────┤
//! │ DS DEFS (ds_cnt × 120 bytes)                               │
//! │   name: [u8; 20]           NUL terminated                  │
//! │   type: [u8; 20]           ("GAUGE", "COUNTER", ...)       │
//! │   par: [u64; 10]                                           │
//! ├────────────────────────────────────────────────────────────┤
//! │ RRA DEFS (rra_cnt × 120 bytes)                             │
//! │   cf: [u8; 20]             ("AVERAGE", "MIN", ...)         │
//! │   (pad to 24)                                              │
//! │   row_cnt: u64                                             │
//! │   pdp_cnt: u64             (primary points per row)        │
//! │   par: [u64; 10]                                           │
//! ├────────────────────────────────────────────────────────────┤
//! │ LIVE HEAD (8 bytes before version 0003, 16 after)          │
//! │   last_up: i64             (epoch seconds)                 │
//! │   last_up_usec: i64        (version >= 0003 only)          │
//! ├────────────────────────────────────────────────────────────┤
//! │ PDP PREP (ds_cnt × 112 bytes, scratch, skipped)            │
//! │ CDP PREP (rra_cnt × ds_cnt × 80 bytes, scratch, skipped)   │
//! │ RRA PTRS (rra_cnt × 8 bytes)                               │
//! │   cur_row: u64             (most recently written row)     │
//! ├────────────────────────────────────────────────────────────┤
//! │ VALUES (f64 each)                                          │
//! │   per RRA: row_cnt rows × ds_cnt columns, circular;        │
//! │   row cur_row holds the newest consolidated point          │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::fs;
use std::io;
use std::path::Path;

use super::{ArchiveInfo, ConsolidationFn, FetchResult};

const COOKIE: [u8; 4] = *b"RRD\0";
const FLOAT_COOKIE: f64 = 8.642135e130;
const STAT_HEAD_SIZE: usize = 128;
const DS_DEF_SIZE: usize = 120;
const RRA_DEF_SIZE: usize = 120;
const PDP_PREP_SIZE: usize = 112;
const CDP_PREP_SIZE: usize = 80;
const RRA_PTR_SIZE: usize = 8;

#[derive(Debug)]
struct RraDef {
    cf: String,
    row_cnt: usize,
    /// Seconds per row: pdp_cnt × pdp_step.
    step: u64,
    cur_row: usize,
    /// Byte offset of this RRA's value area.
    data_offset: usize,
}

/// One parsed archive file, fully loaded.
#[derive(Debug)]
pub struct RrdFile {
    pdp_step: u64,
    last_update: i64,
    ds_names: Vec<String>,
    rras: Vec<RraDef>,
    data: Vec<u8>,
}

fn cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap())
}

fn read_f64(data: &[u8], offset: usize) -> f64 {
    f64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap())
}

impl RrdFile {
    /// Opens and fully parses an archive file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;

        if data.len() < STAT_HEAD_SIZE {
            return Err(io::Error::other("file too small for header"));
        }
        if data[0..4] != COOKIE {
            return Err(io::Error::other(format!(
                "invalid magic: expected RRD, got {:?}",
                &data[0..4]
            )));
        }
        let version_str = cstr(&data[4..9]);
        let version: u32 = version_str
            .parse()
            .map_err(|_| io::Error::other(format!("unparseable version {:?}", version_str)))?;
        if !(1..=5).contains(&version) {
            return Err(io::Error::other(format!(
                "unsupported version: {}",
                version_str
            )));
        }
        let float_cookie = read_f64(&data, 16);
        if float_cookie != FLOAT_COOKIE {
            return Err(io::Error::other(
                "float cookie mismatch: file written with an incompatible architecture layout",
            ));
        }

        let ds_cnt = read_u64(&data, 24) as usize;
        let rra_cnt = read_u64(&data, 32) as usize;
        let pdp_step = read_u64(&data, 40);
        // Counts larger than the file itself could hold defs for cannot be
        // real and would overflow the offset math below.
        if ds_cnt == 0
            || rra_cnt == 0
            || pdp_step == 0
            || ds_cnt > data.len() / DS_DEF_SIZE
            || rra_cnt > data.len() / RRA_DEF_SIZE
        {
            return Err(io::Error::other(format!(
                "implausible header: ds_cnt={} rra_cnt={} pdp_step={}",
                ds_cnt, rra_cnt, pdp_step
            )));
        }

        let live_head_size = if version >= 3 { 16 } else { 8 };
        let ds_defs_at = STAT_HEAD_SIZE;
        let rra_defs_at = ds_defs_at + ds_cnt * DS_DEF_SIZE;
        let live_head_at = rra_defs_at + rra_cnt * RRA_DEF_SIZE;
        let pdp_prep_at = live_head_at + live_head_size;
        let cdp_prep_at = pdp_prep_at + ds_cnt * PDP_PREP_SIZE;
        let rra_ptrs_at = cdp_prep_at + rra_cnt * ds_cnt * CDP_PREP_SIZE;
        let values_at = rra_ptrs_at + rra_cnt * RRA_PTR_SIZE;
        if data.len() < values_at {
            return Err(io::Error::other("file truncated before value area"));
        }

        let ds_names: Vec<String> = (0..ds_cnt)
            .map(|i| cstr(&data[ds_defs_at + i * DS_DEF_SIZE..][..20]))
            .collect();

        let last_update = read_u64(&data, live_head_at) as i64;

        let mut rras = Vec::with_capacity(rra_cnt);
        let mut data_offset = values_at;
        for i in 0..rra_cnt {
            let at = rra_defs_at + i * RRA_DEF_SIZE;
            let cf = cstr(&data[at..at + 20]);
            let row_cnt = read_u64(&data, at + 24) as usize;
            let pdp_cnt = read_u64(&data, at + 32);
            let cur_row = read_u64(&data, rra_ptrs_at + i * RRA_PTR_SIZE) as usize;

            let step = pdp_cnt.checked_mul(pdp_step).ok_or_else(|| {
                io::Error::other(format!("implausible pdp_cnt {} in rra {}", pdp_cnt, i))
            })?;
            let span_ok = row_cnt > 0
                && cur_row < row_cnt
                && step > 0
                && (row_cnt as u64)
                    .checked_mul(step)
                    .is_some_and(|s| s < i64::MAX as u64 / 2);
            if !span_ok {
                return Err(io::Error::other(format!(
                    "implausible rra {}: row_cnt={} pdp_cnt={} cur_row={}",
                    i, row_cnt, pdp_cnt, cur_row
                )));
            }

            let area_end = row_cnt
                .checked_mul(ds_cnt)
                .and_then(|n| n.checked_mul(8))
                .and_then(|n| n.checked_add(data_offset))
                .filter(|&n| n <= data.len())
                .ok_or_else(|| {
                    io::Error::other(format!(
                        "value area of rra {} ({} rows) exceeds file size",
                        i, row_cnt
                    ))
                })?;

            rras.push(RraDef {
                cf,
                row_cnt,
                step,
                cur_row,
                data_offset,
            });
            data_offset = area_end;
        }

        if data.len() != data_offset {
            return Err(io::Error::other(format!(
                "file size mismatch: expected {} bytes, got {}",
                data_offset,
                data.len()
            )));
        }

        Ok(RrdFile {
            pdp_step,
            last_update,
            ds_names,
            rras,
            data,
        })
    }

    pub fn ds_names(&self) -> &[String] {
        &self.ds_names
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    /// Datasource layout and last-update, in the shape backends hand out.
    pub fn info(&self) -> ArchiveInfo {
        let datasources = self
            .ds_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        ArchiveInfo {
            datasources,
            last_update: self.last_update,
        }
    }

    /// Timestamps of the oldest and newest stored rows of an RRA.
    fn retention(&self, rra: &RraDef) -> (i64, i64) {
        let rs = rra.step as i64;
        let newest = self.last_update - self.last_update.rem_euclid(rs);
        let oldest = newest - rs * (rra.row_cnt as i64 - 1);
        (oldest, newest)
    }

    /// Picks the RRA for a fetch: matching consolidation function, retention
    /// reaching back to `start`, resolution closest to the hint (preferring
    /// at-or-above). When no RRA reaches back far enough, the one reaching
    /// furthest back wins.
    fn choose_rra(&self, cf: ConsolidationFn, start: i64, step_hint: u64) -> Option<&RraDef> {
        let hint = step_hint.max(self.pdp_step);
        let matching = || self.rras.iter().filter(|r| r.cf == cf.name());

        let covering = |r: &&RraDef| self.retention(r).0 <= start;
        matching()
            .filter(covering)
            .filter(|r| r.step >= hint)
            .min_by_key(|r| r.step)
            .or_else(|| matching().filter(covering).max_by_key(|r| r.step))
            .or_else(|| matching().min_by_key(|r| (self.retention(r).0, r.step)))
    }

    fn read_row(&self, rra: &RraDef, row: usize) -> Vec<f64> {
        let base = rra.data_offset + row * self.ds_names.len() * 8;
        (0..self.ds_names.len())
            .map(|col| read_f64(&self.data, base + col * 8))
            .collect()
    }

    /// Materializes consolidated rows covering `[start, end]`.
    ///
    /// The window is aligned outward to the chosen RRA's step and intersected
    /// with its stored retention; timestamps outside the retention hold no
    /// data and produce no rows. Row 0 carries the returned `start`
    /// timestamp, row `i` the timestamp `start + i * step`.
    pub fn fetch(
        &self,
        cf: ConsolidationFn,
        start: i64,
        end: i64,
        step: u64,
    ) -> io::Result<FetchResult> {
        let rra = self.choose_rra(cf, start, step).ok_or_else(|| {
            io::Error::other(format!("no {} archive in file", cf.name()))
        })?;
        let rs = rra.step as i64;
        let (oldest, newest) = self.retention(rra);

        // First step boundary strictly after start, last boundary at or
        // after end, both clamped to what is actually stored.
        let mut t0 = start - start.rem_euclid(rs) + rs;
        let rem = end.rem_euclid(rs);
        let mut t1 = if rem == 0 { end } else { end - rem + rs };
        t0 = t0.max(oldest);
        t1 = t1.min(newest);

        let mut rows = Vec::new();
        let mut t = t0;
        while t <= t1 {
            let steps_back = ((newest - t) / rs) as usize;
            let row = (rra.cur_row + rra.row_cnt - steps_back) % rra.row_cnt;
            rows.push(self.read_row(rra, row));
            t += rs;
        }

        Ok(FetchResult {
            start: t0,
            step: rra.step,
            names: self.ds_names.clone(),
            rows,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testfile::{RraSpec, RrdSpec};
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_reads_header_and_ds_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cpu.rrd");
        testfile::write_simple(
            &path,
            10,
            1_000_000,
            vec!["used", "idle"],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        );

        let rrd = RrdFile::open(&path).unwrap();
        assert_eq!(rrd.ds_names(), &["used", "idle"]);
        assert_eq!(rrd.last_update(), 1_000_000);

        let info = rrd.info();
        assert_eq!(info.datasources["used"], 0);
        assert_eq!(info.datasources["idle"], 1);
        assert_eq!(info.last_update, 1_000_000);
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.rrd");
        fs::write(&path, b"NOTRRD\0\0\0\0\0\0\0\0\0\0").unwrap();
        assert!(RrdFile::open(&path).is_err());
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.rrd");
        testfile::write_simple(&path, 10, 1_000_000, vec!["v"], vec![vec![1.0], vec![2.0]]);
        let full = fs::read(&path).unwrap();
        fs::write(&path, &full[..full.len() - 8]).unwrap();
        assert!(RrdFile::open(&path).is_err());
    }

    #[test]
    fn test_fetch_returns_rows_in_time_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mem.rrd");
        // Rows at t = 970, 980, 990, 1000 (newest).
        testfile::write_simple(
            &path,
            10,
            1000,
            vec!["v"],
            vec![vec![7.0], vec![8.0], vec![9.0], vec![10.0]],
        );

        let rrd = RrdFile::open(&path).unwrap();
        let res = rrd.fetch(ConsolidationFn::Average, 970, 1000, 10).unwrap();
        assert_eq!(res.step, 10);
        assert_eq!(res.start, 980);
        assert_eq!(res.names, vec!["v".to_string()]);
        assert_eq!(res.rows, vec![vec![8.0], vec![9.0], vec![10.0]]);
    }

    #[test]
    fn test_fetch_window_clamped_to_retention() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mem.rrd");
        testfile::write_simple(
            &path,
            10,
            1000,
            vec!["v"],
            vec![vec![1.0], vec![2.0], vec![3.0]],
        );

        let rrd = RrdFile::open(&path).unwrap();
        // Stored rows cover 980..=1000; ask for far more on both sides.
        let res = rrd.fetch(ConsolidationFn::Average, 0, 5000, 10).unwrap();
        assert_eq!(res.start, 980);
        assert_eq!(res.rows, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_fetch_reads_through_circular_wrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wrap.rrd");
        // cur_row in the middle of the buffer: slots are rearranged on disk
        // but fetch must still return chronological order.
        testfile::write(
            &path,
            &RrdSpec {
                pdp_step: 10,
                last_update: 1000,
                ds_names: vec!["v"],
                rras: vec![RraSpec {
                    cf: "AVERAGE",
                    pdp_cnt: 1,
                    cur_row: 2,
                    rows: vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]],
                }],
            },
        );

        let rrd = RrdFile::open(&path).unwrap();
        let res = rrd.fetch(ConsolidationFn::Average, 950, 1000, 10).unwrap();
        assert_eq!(res.start, 960);
        assert_eq!(
            res.rows,
            vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]]
        );
    }

    #[test]
    fn test_fetch_prefers_resolution_near_hint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("two.rrd");
        // Fine RRA: 10s × 4 rows (covers 970..=1000). Coarse RRA: 60s × 10
        // rows (covers 420..=960).
        testfile::write(
            &path,
            &RrdSpec {
                pdp_step: 10,
                last_update: 1000,
                ds_names: vec!["v"],
                rras: vec![
                    RraSpec {
                        cf: "AVERAGE",
                        pdp_cnt: 1,
                        cur_row: 0,
                        rows: vec![vec![1.0]; 4],
                    },
                    RraSpec {
                        cf: "AVERAGE",
                        pdp_cnt: 6,
                        cur_row: 0,
                        rows: vec![vec![2.0]; 10],
                    },
                ],
            },
        );

        let rrd = RrdFile::open(&path).unwrap();
        // Recent window: the fine RRA covers it.
        let recent = rrd.fetch(ConsolidationFn::Average, 980, 1000, 10).unwrap();
        assert_eq!(recent.step, 10);
        // Window older than the fine RRA's retention: falls to the coarse one.
        let old = rrd.fetch(ConsolidationFn::Average, 500, 700, 10).unwrap();
        assert_eq!(old.step, 60);
    }

    #[test]
    fn test_fetch_without_matching_cf_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("avg.rrd");
        testfile::write_simple(&path, 10, 1000, vec!["v"], vec![vec![1.0], vec![2.0]]);

        let rrd = RrdFile::open(&path).unwrap();
        assert!(rrd.fetch(ConsolidationFn::Max, 980, 1000, 10).is_err());
    }

    #[test]
    fn test_fetch_preserves_nan_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gap.rrd");
        testfile::write_simple(
            &path,
            10,
            1000,
            vec!["v"],
            vec![vec![1.0], vec![f64::NAN], vec![3.0]],
        );

        let rrd = RrdFile::open(&path).unwrap();
        let res = rrd.fetch(ConsolidationFn::Average, 970, 1000, 10).unwrap();
        assert_eq!(res.rows.len(), 3);
        assert!(res.rows[1][0].is_nan());
    }
}
