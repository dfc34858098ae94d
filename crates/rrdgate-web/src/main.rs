mod background;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use tokio::sync::watch;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use rrdgate_core::archive::{ArchiveBackend, LocalBackend};
use rrdgate_core::daemon::{DaemonAddr, DaemonBackend};
use rrdgate_core::index::NamespaceIndex;
use rrdgate_core::query::QueryPlanner;

use state::{App, SharedApp};

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "rrdgate-web",
    about = "Dashboard JSON API over round-robin archives",
    version
)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:9000", env = "RRDGATE_LISTEN")]
    listen: String,

    /// Directory that keeps the RRD files.
    #[arg(long, default_value = "./sample", env = "RRDGATE_RRD_PATH")]
    rrd_path: PathBuf,

    /// Fetch resolution in seconds.
    #[arg(long, default_value = "10", env = "RRDGATE_STEP")]
    step: u64,

    /// Namespace index refresh period in seconds.
    #[arg(long, default_value = "600", env = "RRDGATE_REFRESH")]
    refresh: u64,

    /// Scale factor applied to every returned value.
    #[arg(long, default_value = "1.0", env = "RRDGATE_MULTIPLIER")]
    multiplier: f64,

    /// CSV file with annotations.
    #[arg(long, env = "RRDGATE_ANNOTATIONS")]
    annotations: Option<PathBuf>,

    /// rrdcached address (e.g. unix:/var/run/rrdcached.sock or
    /// localhost:42217). Without it archives are read directly from disk.
    #[arg(long, env = "RRDGATE_DAEMON")]
    daemon: Option<String>,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rrdgate_web=info,rrdgate_core=info".parse().unwrap()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    let backend: Arc<dyn ArchiveBackend> = match &args.daemon {
        Some(raw) => {
            let daemon = DaemonBackend::new(DaemonAddr::parse(raw));
            match daemon.probe() {
                Ok(()) => info!(daemon = %daemon.addr(), "rrdcached reachable"),
                Err(err) => warn!(
                    daemon = %daemon.addr(),
                    error = %err,
                    "rrdcached not reachable yet, fetches will retry"
                ),
            }
            Arc::new(daemon)
        }
        None => Arc::new(LocalBackend),
    };

    if !args.rrd_path.is_dir() {
        warn!(path = %args.rrd_path.display(), "RRD directory does not exist yet");
    }

    let app: SharedApp = Arc::new(App {
        index: NamespaceIndex::new(&args.rrd_path, backend.clone()),
        planner: QueryPlanner::new(backend, &args.rrd_path, args.step, args.multiplier),
        annotations: args.annotations.clone(),
    });

    // The background loop owns the only periodic work; a watch channel lets
    // shutdown stop it alongside the listener.
    let (stop_tx, stop_rx) = watch::channel(false);
    {
        let app = app.clone();
        let interval = Duration::from_secs(args.refresh.max(1));
        tokio::spawn(async move {
            background::refresh_loop(app, interval, stop_rx).await;
        });
    }

    let router = Router::new()
        .route("/", get(handlers::handle_root))
        .route("/search", post(handlers::handle_search))
        .route("/query", post(handlers::handle_query))
        .route("/ls", post(handlers::handle_ls))
        .route("/annotations", post(handlers::handle_annotations))
        .with_state(app)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(60)));

    let addr: SocketAddr = args.listen.parse().expect("invalid listen address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    info!(
        %addr,
        rrd_path = %args.rrd_path.display(),
        step = args.step,
        multiplier = args.multiplier,
        "listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(stop_tx))
        .await
        .expect("server error");
}

async fn shutdown_signal(stop_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    let _ = stop_tx.send(true);
}
