use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use threadmark_common::{OriginRecord, ThreadRef, TimeWindow};

use crate::AppState;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// --- Query structs ---

#[derive(Deserialize)]
pub struct RangeQuery {
    start_date: Option<String>,
    end_date: Option<String>,
}

impl RangeQuery {
    /// Missing or unparsable bounds open the range: start at the epoch, end now.
    fn window(&self) -> TimeWindow {
        let start = parse_date(self.start_date.as_deref())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH.naive_utc());
        let end = parse_date(self.end_date.as_deref()).unwrap_or_else(|| Local::now().naive_local());
        TimeWindow::new(start, end)
    }
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw?.trim(), DATE_FORMAT).ok()
}

// --- Response structs ---

#[derive(Serialize)]
pub struct ThreadView {
    #[serde(flatten)]
    record: OriginRecord,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_activity: Option<NaiveDateTime>,
}

impl ThreadView {
    fn new(state: &AppState, record: OriginRecord) -> Self {
        let url = state.archive.message_url(record.message_id.as_str());
        Self {
            record,
            url,
            last_activity: None,
        }
    }
}

// --- Handlers ---

pub async fn api_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_ref): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&ThreadRef::new(thread_ref)) {
        Some(record) => Json(ThreadView::new(&state, record)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn api_new_subjects(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> impl IntoResponse {
    let window = params.window();
    let threads: Vec<ThreadView> = state
        .registry
        .list_resolved(&window)
        .into_iter()
        .map(|record| ThreadView::new(&state, record))
        .collect();
    debug!(threads = threads.len(), start = %window.start, end = %window.end, "New subjects");
    Json(threads)
}

pub async fn api_active_subjects(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> impl IntoResponse {
    let window = params.window();
    let threads: Vec<ThreadView> = state
        .registry
        .list_active(&window)
        .into_iter()
        .map(|(record, seen_at)| ThreadView {
            last_activity: Some(seen_at),
            ..ThreadView::new(&state, record)
        })
        .collect();
    debug!(threads = threads.len(), start = %window.start, end = %window.end, "Active subjects");
    Json(threads)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use pgarchive_client::ArchiveClient;
    use threadmark_common::MessageId;
    use threadmark_resolver::testing::{entry, ts};
    use threadmark_resolver::OriginRegistry;

    use super::*;
    use crate::router;

    fn state() -> Arc<AppState> {
        let registry = OriginRegistry::new();
        for (id, subject, at) in [
            ("m1", "Feature X", "2025-01-02 10:00:00"),
            ("m10", "Bug Y", "2025-01-03 09:00:00"),
            ("m20", "Old news", "2024-12-30 08:00:00"),
        ] {
            let row = entry(id, subject, at);
            registry
                .put(OriginRecord::from_listing(&row, MessageId::new(id)))
                .unwrap();
            registry.touch(&row.thread_ref, row.timestamp);
        }
        registry
            .put_cross_reference(ThreadRef::new("m3"), ThreadRef::new("m1"), MessageId::new("m1"))
            .unwrap();
        registry.touch(&ThreadRef::new("m3"), ts("2025-01-04 12:00:00"));

        Arc::new(AppState {
            registry,
            archive: ArchiveClient::new(
                "https://www.postgresql.org",
                "pgsql-hackers",
                Duration::from_secs(5),
            )
            .unwrap(),
        })
    }

    async fn get(uri: &str) -> (StatusCode, Value) {
        let response = router(state())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn ids(json: &Value) -> Vec<&str> {
        json.as_array()
            .unwrap()
            .iter()
            .map(|t| t["message_id"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn health_check_answers_ok() {
        let response = router(state())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn thread_lookup_follows_cross_references() {
        let (status, json) = get("/api/threads/m3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["subject"], "Feature X");
        assert_eq!(json["url"], "https://www.postgresql.org/message-id/m1");
    }

    #[tokio::test]
    async fn unknown_thread_is_not_found() {
        let (status, _) = get("/api/threads/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn new_subjects_are_bounded_by_origin_time() {
        let (status, json) =
            get("/api/new-subjects?start_date=2025-01-01%2000:00:00&end_date=2025-01-31%2023:59:59")
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&json), vec!["m1", "m10"]);
    }

    #[tokio::test]
    async fn missing_or_invalid_dates_open_the_range() {
        let (_, json) = get("/api/new-subjects").await;
        assert_eq!(ids(&json), vec!["m20", "m1", "m10"]);

        let (_, json) = get("/api/new-subjects?start_date=yesterday&end_date=2025-01-02%2023:00:00").await;
        assert_eq!(ids(&json), vec!["m20", "m1"]);
    }

    #[tokio::test]
    async fn active_subjects_count_replies_toward_their_origin() {
        let (_, json) =
            get("/api/active-subjects?start_date=2025-01-03%2000:00:00&end_date=2025-01-05%2000:00:00")
                .await;
        assert_eq!(ids(&json), vec!["m1", "m10"]);
        assert_eq!(json[0]["last_activity"], "2025-01-04T12:00:00");
    }
}
