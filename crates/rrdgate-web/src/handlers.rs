//! HTTP request handlers for the dashboard JSON endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use rrdgate_core::annotations::{self, Annotation};
use rrdgate_core::api::{self, AnnotationRequest, QueryRequest, SearchRequest, TimeRange};
use rrdgate_core::index::Listing;
use rrdgate_core::query::TimeSeries;

use crate::state::SharedApp;

#[derive(Serialize)]
pub(crate) struct Message {
    message: &'static str,
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, StatusCode> {
    serde_json::from_slice(body).map_err(|err| {
        warn!(error = %err, "cannot decode request body");
        StatusCode::BAD_REQUEST
    })
}

fn parse_range(range: &TimeRange) -> Result<(i64, i64), StatusCode> {
    match (api::parse_time(&range.from), api::parse_time(&range.to)) {
        (Ok(from), Ok(to)) => Ok((from, to)),
        _ => {
            warn!(
                from = range.from.as_str(),
                to = range.to.as_str(),
                "unparseable time range"
            );
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

// ============================================================
// Root: the datasource's connection test
// ============================================================

pub(crate) async fn handle_root() -> Json<Message> {
    Json(Message { message: "hello" })
}

// ============================================================
// Search
// ============================================================

pub(crate) async fn handle_search(
    State(app): State<SharedApp>,
    body: Bytes,
) -> Result<Json<Vec<String>>, StatusCode> {
    let req: SearchRequest = decode(&body)?;
    Ok(Json(app.index.snapshot().search(&req.target)))
}

// ============================================================
// Directory listing
// ============================================================

/// Some dashboard clients probe `/ls` with an empty body; that means the
/// root level, not a malformed request.
pub(crate) async fn handle_ls(
    State(app): State<SharedApp>,
    body: Bytes,
) -> Result<Json<Listing>, StatusCode> {
    let req: SearchRequest = if body.is_empty() {
        SearchRequest::default()
    } else {
        decode(&body)?
    };
    Ok(Json(app.index.snapshot().list(&req.target)))
}

// ============================================================
// Query
// ============================================================

pub(crate) async fn handle_query(
    State(app): State<SharedApp>,
    body: Bytes,
) -> Result<Json<Vec<TimeSeries>>, StatusCode> {
    let req: QueryRequest = decode(&body)?;
    let (from, to) = parse_range(&req.range)?;
    let targets = req.target_strings();

    // Wildcard expansion and fetches block on disk or daemon I/O.
    let series = tokio::task::spawn_blocking(move || app.planner.query(&targets, from, to))
        .await
        .map_err(|err| {
            error!(error = %err, "query task panicked");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(series))
}

// ============================================================
// Annotations
// ============================================================

pub(crate) async fn handle_annotations(
    State(app): State<SharedApp>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let Some(path) = app.annotations.clone() else {
        return Ok(Json(Message {
            message: "Not configured",
        })
        .into_response());
    };

    let req: AnnotationRequest = decode(&body)?;
    let (from, to) = parse_range(&req.range)?;

    let rows: Vec<Annotation> =
        tokio::task::spawn_blocking(move || annotations::load_between(&path, from * 1000, to * 1000))
            .await
            .map_err(|err| {
                error!(error = %err, "annotations task panicked");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
    Ok(Json(rows).into_response())
}
