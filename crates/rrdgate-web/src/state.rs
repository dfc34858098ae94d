//! Shared application state and the global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::sync::Arc;

use rrdgate_core::index::NamespaceIndex;
use rrdgate_core::query::QueryPlanner;

/// Everything the handlers need. The index guards its own snapshot and the
/// planner is immutable, so handlers share this through a plain `Arc`.
pub(crate) struct App {
    pub(crate) index: NamespaceIndex,
    pub(crate) planner: QueryPlanner,
    /// Annotation CSV path; `None` leaves the endpoint unconfigured.
    pub(crate) annotations: Option<PathBuf>,
}

pub(crate) type SharedApp = Arc<App>;
