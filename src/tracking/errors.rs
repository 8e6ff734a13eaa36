//! Error tracking with deduplication.
//!
//! Repeats of the same error (same name, message, first stack lines and
//! caller context) are counted instead of being buffered again.
use crate::telemetry::Telemetry;
use crate::types::{ErrorInfo, Metadata, RecordKind, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Stack lines that take part in the dedup key.
const KEY_STACK_LINES: usize = 3;

/// Distinct keys kept by `ErrorTracker::new`.
pub const DEFAULT_MAX_TRACKED_ERRORS: usize = 1000;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedError {
    pub key: String,
    pub name: String,
    pub message: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total_occurrences: u64,
    pub distinct_errors: usize,
    pub last_hour: usize,
    pub top: Vec<TrackedError>,
}

pub struct ErrorTracker {
    telemetry: Telemetry,
    errors: Mutex<HashMap<String, TrackedError>>,
    max_tracked: usize,
}

impl ErrorTracker {
    pub fn new(telemetry: Telemetry) -> Self {
        Self::with_limit(telemetry, DEFAULT_MAX_TRACKED_ERRORS)
    }

    /// Keeps at most `max_tracked` distinct keys. A new key arriving at the
    /// limit evicts the key that was seen least recently.
    pub fn with_limit(telemetry: Telemetry, max_tracked: usize) -> Self {
        Self {
            telemetry,
            errors: Mutex::new(HashMap::new()),
            max_tracked: max_tracked.max(1),
        }
    }

    /// Derives the dedup key of an error in a given caller context.
    pub fn dedupe_key(error: &ErrorInfo, metadata: Option<&Metadata>) -> String {
        let context = serde_json::to_string(&metadata).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(error.name.as_bytes());
        hasher.update(b"\n");
        hasher.update(error.message.as_bytes());
        hasher.update(b"\n");
        for line in error.stack_head(KEY_STACK_LINES) {
            hasher.update(line.trim().as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(context.as_bytes());

        hex::encode(&hasher.finalize()[..12])
    }

    /// Tracks an error at `error` severity.
    pub fn track_error(&self, error: ErrorInfo, metadata: Option<Metadata>) -> TrackedError {
        self.track_error_with_severity(error, metadata, Severity::Error)
    }

    /// Tracks an error. The first occurrence of a key is recorded; repeats
    /// only bump the count and are mirrored to the console in development.
    ///
    /// Severities below `error` are raised to `error`.
    pub fn track_error_with_severity(
        &self,
        error: ErrorInfo,
        metadata: Option<Metadata>,
        severity: Severity,
    ) -> TrackedError {
        let severity = severity.max(Severity::Error);
        let key = Self::dedupe_key(&error, metadata.as_ref());
        let now = Utc::now();

        let (snapshot, first) = {
            let mut errors = self.lock();
            if errors.len() >= self.max_tracked && !errors.contains_key(&key) {
                evict_stalest(&mut errors);
            }
            match errors.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    let tracked = entry.get_mut();
                    tracked.count += 1;
                    tracked.last_occurrence = now;
                    (tracked.clone(), false)
                }
                Entry::Vacant(entry) => {
                    let tracked = entry.insert(TrackedError {
                        key: key.clone(),
                        name: error.name.clone(),
                        message: error.message.clone(),
                        count: 1,
                        first_seen: now,
                        last_occurrence: now,
                    });
                    (tracked.clone(), true)
                }
            }
        };

        let message = error.message.clone();
        let metadata = metadata.unwrap_or_default().with("dedupe_key", key);

        if first {
            self.telemetry.record(
                RecordKind::Error,
                severity,
                message,
                Some(metadata),
                Some(error),
            );
        } else {
            let mut record =
                self.telemetry
                    .build_record(RecordKind::Error, severity, message, Some(metadata));
            record.error = Some(error);
            self.telemetry.mirror(&record);
        }

        snapshot
    }

    /// Sum of counts across every key.
    pub fn total_occurrences(&self) -> u64 {
        self.lock().values().map(|e| e.count).sum()
    }

    pub fn distinct_errors(&self) -> usize {
        self.lock().len()
    }

    /// Keys whose last occurrence falls within `window` of now.
    pub fn recent_errors(&self, window: Duration) -> usize {
        let cutoff = Utc::now() - window;
        self.lock()
            .values()
            .filter(|e| e.last_occurrence >= cutoff)
            .count()
    }

    pub fn errors_last_hour(&self) -> usize {
        self.recent_errors(Duration::hours(1))
    }

    /// The `n` most frequent errors, highest count first.
    pub fn top_errors(&self, n: usize) -> Vec<TrackedError> {
        let mut errors: Vec<TrackedError> = self.lock().values().cloned().collect();
        errors.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_occurrence.cmp(&a.last_occurrence))
        });
        errors.truncate(n);
        errors
    }

    pub fn get(&self, key: &str) -> Option<TrackedError> {
        self.lock().get(key).cloned()
    }

    pub fn summary(&self, top: usize) -> ErrorSummary {
        ErrorSummary {
            total_occurrences: self.total_occurrences(),
            distinct_errors: self.distinct_errors(),
            last_hour: self.errors_last_hour(),
            top: self.top_errors(top),
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TrackedError>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the key seen least recently, the least frequent one on a tie.
fn evict_stalest(errors: &mut HashMap<String, TrackedError>) {
    let stalest = errors
        .values()
        .min_by_key(|e| (e.last_occurrence, e.count))
        .map(|e| e.key.clone());
    if let Some(key) = stalest {
        errors.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::context::{AmbientContext, SessionId};
    use crate::sink::MemorySink;
    use crate::types::RuntimeMode;
    use std::sync::Arc;

    fn tracker(max_buffer_size: usize) -> (ErrorTracker, Telemetry, Arc<MemorySink>) {
        tracker_in(RuntimeMode::Production, max_buffer_size)
    }

    fn tracker_in(
        mode: RuntimeMode,
        max_buffer_size: usize,
    ) -> (ErrorTracker, Telemetry, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = TelemetryConfig {
            mode,
            max_buffer_size,
            flush_interval_ms: 3_600_000,
            ..TelemetryConfig::default()
        };
        let ambient = AmbientContext::new(SessionId::from("errors".to_string()), None);
        let telemetry = Telemetry::start(&config, ambient, sink.clone());
        (ErrorTracker::new(telemetry.clone()), telemetry, sink)
    }

    fn fetch_failed() -> ErrorInfo {
        ErrorInfo::new("FetchError", "failed to load casino reviews")
            .with_stack("at loadReviews\nat ReviewList\nat render\nat commit")
    }

    #[tokio::test]
    async fn repeated_error_is_buffered_once_and_counted() {
        let (tracker, telemetry, sink) = tracker(100);

        let mut last = None;
        for _ in 0..5 {
            last = Some(tracker.track_error(fetch_failed(), None));
        }
        let last = last.unwrap();

        assert_eq!(telemetry.buffered_len(), 1);
        let tracked = tracker.get(&last.key).unwrap();
        assert_eq!(tracked.count, 5);
        assert_eq!(tracked.last_occurrence, last.last_occurrence);
        assert!(tracked.first_seen <= tracked.last_occurrence);

        telemetry.flush().await;
        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, RecordKind::Error);
        assert_eq!(rows[0].details["context"]["extra"]["dedupe_key"], last.key.as_str());
    }

    #[test]
    fn key_ignores_stack_lines_past_the_third() {
        let a = fetch_failed();
        let b = ErrorInfo::new("FetchError", "failed to load casino reviews")
            .with_stack("at loadReviews\nat ReviewList\nat render\nat somewhere else");
        assert_eq!(
            ErrorTracker::dedupe_key(&a, None),
            ErrorTracker::dedupe_key(&b, None)
        );
    }

    #[test]
    fn key_depends_on_context() {
        let error = fetch_failed();
        let on_reviews = Metadata::new().component("ReviewList");
        let on_blog = Metadata::new().component("BlogList");
        assert_ne!(
            ErrorTracker::dedupe_key(&error, Some(&on_reviews)),
            ErrorTracker::dedupe_key(&error, Some(&on_blog))
        );
    }

    #[tokio::test]
    async fn queries_report_counts_and_ranking() {
        let (tracker, _telemetry, _sink) = tracker(100);

        for _ in 0..3 {
            tracker.track_error(fetch_failed(), None);
        }
        tracker.track_error(ErrorInfo::new("UploadError", "logo too large"), None);
        for _ in 0..2 {
            tracker.track_error(ErrorInfo::new("AuthError", "session expired"), None);
        }

        assert_eq!(tracker.total_occurrences(), 6);
        assert_eq!(tracker.distinct_errors(), 3);
        assert_eq!(tracker.errors_last_hour(), 3);
        assert_eq!(tracker.recent_errors(-Duration::hours(1)), 0);

        let top: Vec<String> = tracker.top_errors(2).into_iter().map(|e| e.name).collect();
        assert_eq!(top, vec!["FetchError", "AuthError"]);

        let summary = tracker.summary(1);
        assert_eq!(summary.top.len(), 1);

        tracker.clear();
        assert_eq!(tracker.distinct_errors(), 0);
    }

    #[tokio::test]
    async fn low_severity_is_raised_to_error() {
        let (tracker, telemetry, sink) = tracker(100);
        tracker.track_error_with_severity(fetch_failed(), None, Severity::Info);
        telemetry.flush().await;
        assert_eq!(sink.rows()[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn repeats_are_mirrored_in_development() {
        use crate::logging::console::capture::ConsoleCapture;
        use tracing_subscriber::layer::SubscriberExt;

        let (tracker, telemetry, _sink) = tracker_in(RuntimeMode::Development, 100);
        let capture = ConsoleCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracker.track_error(fetch_failed(), None);
            tracker.track_error(fetch_failed(), None);
        });

        assert_eq!(
            capture.messages(),
            vec!["failed to load casino reviews", "failed to load casino reviews"]
        );
        assert_eq!(telemetry.buffered_len(), 1);
    }

    #[tokio::test]
    async fn oldest_key_is_evicted_at_the_limit() {
        let (_, telemetry, _sink) = tracker(100);
        let tracker = ErrorTracker::with_limit(telemetry, 2);

        let fetch = tracker.track_error(fetch_failed(), None);
        let upload = tracker.track_error(ErrorInfo::new("UploadError", "logo too large"), None);
        tracker.track_error(fetch_failed(), None);
        let auth = tracker.track_error(ErrorInfo::new("AuthError", "session expired"), None);

        assert_eq!(tracker.distinct_errors(), 2);
        assert!(tracker.get(&upload.key).is_none());
        assert_eq!(tracker.get(&fetch.key).map(|e| e.count), Some(2));
        assert!(tracker.get(&auth.key).is_some());
    }
}
