//! Archive access and query logic for rrdgate.
//!
//! Provides:
//! - `archive`: the `ArchiveBackend` contract, the local RRD file reader,
//!   and a scripted mock for tests
//! - `daemon`: rrdcached wire client and the retrying `DaemonBackend`
//! - `index`: background-refreshed namespace of metric identifiers,
//!   with search and directory listing over immutable snapshots
//! - `query`: wildcard target resolution and sample projection
//! - `api`: inbound JSON request shapes and time parsing
//! - `annotations`: CSV-backed event annotations

pub mod annotations;
pub mod api;
pub mod archive;
pub mod daemon;
pub mod index;
pub mod query;
