//! Background refresh of the namespace index.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::state::SharedApp;

/// Rebuilds the namespace index every `interval` until `stop` flips.
///
/// The first tick fires immediately, so the index is populated right after
/// startup. Refreshes never overlap: each one is awaited before the next
/// tick, and a tick that comes due mid-refresh is skipped.
pub(crate) async fn refresh_loop(
    app: SharedApp,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = stop.changed() => {
                info!("index refresh loop stopping");
                return;
            }
        }

        // Walking the tree and reading every header blocks on I/O.
        let app_clone = app.clone();
        let t0 = Instant::now();
        let result = tokio::task::spawn_blocking(move || app_clone.index.refresh()).await;
        let elapsed = t0.elapsed();

        match result {
            Ok(Ok(count)) => {
                info!(
                    metrics = count,
                    duration_ms = elapsed.as_millis() as u64,
                    "namespace index refreshed"
                );
            }
            Ok(Err(err)) => {
                warn!(
                    error = %err,
                    duration_ms = elapsed.as_millis() as u64,
                    "index refresh failed, keeping previous snapshot"
                );
            }
            Err(err) => {
                error!(error = %err, "index refresh panicked");
            }
        }
    }
}
