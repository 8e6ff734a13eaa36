//! This module defines the HTTP API endpoints of the telemetry collector.
use crate::storage::EventStore;
use crate::types::SinkRow;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Shared handle to the event store behind the collector.
pub type SharedStore = Arc<dyn EventStore + Send + Sync>;

/// Largest batch accepted in one request.
pub const MAX_INGEST_ROWS: usize = 1000;

/// Largest `limit` honoured by the recent-events endpoint.
pub const MAX_RECENT_LIMIT: usize = 500;

/// Response structure for an accepted batch.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct IngestResponse {
    /// Number of rows written.
    pub accepted: usize,
}

/// Query parameters for fetching recent events.
#[derive(Deserialize)]
pub struct RecentQuery {
    /// The maximum number of events to retrieve.
    #[serde(default = "default_limit")]
    limit: usize,
}

/// Default limit for recent-event queries.
fn default_limit() -> usize {
    50
}

/// Stores a batch of rows posted by a sink.
#[axum::debug_handler]
pub async fn ingest_batch(
    State(store): State<SharedStore>,
    Json(rows): Json<Vec<SinkRow>>,
) -> impl IntoResponse {
    if rows.len() > MAX_INGEST_ROWS {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Batch of {} rows exceeds {}", rows.len(), MAX_INGEST_ROWS),
        )
            .into_response();
    }

    match store.append_batch(&rows).await {
        Ok(()) => {
            debug!("Accepted {} telemetry rows", rows.len());
            (
                StatusCode::ACCEPTED,
                Json(IngestResponse {
                    accepted: rows.len(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to store telemetry batch: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to store batch: {}", e),
            )
                .into_response()
        }
    }
}

/// Lists the most recent events, newest first.
#[axum::debug_handler]
pub async fn recent_events(
    State(store): State<SharedStore>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let limit = query.limit.min(MAX_RECENT_LIMIT);
    match store.recent(limit).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read events: {}", e),
        )
            .into_response(),
    }
}

/// Counts stored events by severity and category.
#[axum::debug_handler]
pub async fn summary(State(store): State<SharedStore>) -> impl IntoResponse {
    match store.summary().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to summarise events: {}", e),
        )
            .into_response(),
    }
}

pub async fn health() -> &'static str {
    "ok"
}
