//! The telemetry collector: an HTTP endpoint that `HttpSink` posts batches
//! to, backed by an `EventStore`.
mod api;

pub use api::{IngestResponse, SharedStore, MAX_INGEST_ROWS, MAX_RECENT_LIMIT};

use crate::sink::http::INGEST_PATH;
use anyhow::Result;
use axum::{routing::get, Router};
use std::future::Future;
use tower_http::cors::CorsLayer;
use tracing::info;

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route(INGEST_PATH, axum::routing::post(api::ingest_batch))
        .route("/api/telemetry/recent", get(api::recent_events))
        .route("/api/telemetry/summary", get(api::summary))
        .route("/api/health", get(api::health))
        .with_state(store)
        .layer(CorsLayer::permissive())
}

/// Serves the collector on `127.0.0.1:port` until `shutdown` resolves.
pub async fn start_server<F>(store: SharedStore, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Telemetry collector listening on http://{}", addr);

    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EventStore, SledEventStore};
    use crate::types::{Record, RecordContext, RecordKind, Severity, SinkRow};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn store() -> Arc<SledEventStore> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Arc::new(SledEventStore::new(db).unwrap())
    }

    fn rows(n: usize) -> Vec<SinkRow> {
        (0..n)
            .map(|i| {
                let context = RecordContext {
                    session_id: "web".to_string(),
                    ..RecordContext::default()
                };
                SinkRow::from(&Record::new(
                    RecordKind::Log,
                    Severity::Warn,
                    format!("event {}", i),
                    context,
                ))
            })
            .collect()
    }

    fn post(rows: &[SinkRow]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(INGEST_PATH)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(rows).unwrap()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ingest_accepts_a_batch() {
        let store = store();
        let app = router(store.clone());

        let response = app.oneshot(post(&rows(3))).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["accepted"], 3);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let store = store();
        let app = router(store.clone());

        let response = app.oneshot(post(&rows(MAX_INGEST_ROWS + 1))).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_and_summary_read_back_stored_rows() {
        let store = store();
        store.append_batch(&rows(4)).await.unwrap();
        let app = router(store);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/telemetry/recent?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let recent = body_json(response).await;
        assert_eq!(recent.as_array().unwrap().len(), 2);
        assert_eq!(recent[0]["action"], "event 3");

        let response = app
            .oneshot(
                Request::get("/api/telemetry/summary")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let summary = body_json(response).await;
        assert_eq!(summary["total"], 4);
        assert_eq!(summary["by_severity"]["warn"], 4);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = router(store())
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ok");
    }
}
