//! REST API source: client-credentials token exchange followed by a
//! paginated course content listing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use shared::{SourceKind, SourceRecord};
use std::time::Duration;
use url::Url;

use super::{build_http_client, FetchBatch, SourceAdapter};
use crate::config::ApiSourceConfig;
use crate::error::{IngestError, IngestResult};

/// Upper bound on listing pages followed in one fetch.
const MAX_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentListing {
    results: Vec<ApiContent>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paging {
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiContent {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    modified: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    course_id: Option<String>,
}

impl ApiContent {
    fn into_record(self, fallback_course: &str) -> SourceRecord {
        SourceRecord {
            kind: SourceKind::Api,
            native_id: self.id,
            title: self.title.unwrap_or_default(),
            description: self.description,
            modified: self.modified,
            created: self.created,
            source_context: Some(
                self.course_id
                    .unwrap_or_else(|| fallback_course.to_string()),
            ),
        }
    }
}

fn parse_listing(body: &str) -> IngestResult<ContentListing> {
    serde_json::from_str(body)
        .map_err(|e| IngestError::fetch(format!("malformed content listing: {}", e)))
}

pub struct ApiAdapter {
    client: Client,
    config: ApiSourceConfig,
    base: Url,
}

impl ApiAdapter {
    pub fn new(config: ApiSourceConfig, timeout: Duration) -> IngestResult<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            IngestError::Config(format!("invalid API base URL '{}': {}", config.base_url, e))
        })?;

        Ok(Self {
            client: build_http_client(timeout, false)?,
            config,
            base,
        })
    }

    fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.config.base_url)
    }

    fn listing_url(&self) -> IngestResult<Url> {
        let raw = format!(
            "{}/courses/{}/contents",
            self.config.base_url, self.config.course_id
        );
        Url::parse(&raw).map_err(|e| IngestError::Config(format!("invalid listing URL: {}", e)))
    }

    /// Exchange client credentials for a bearer token. Never cached.
    async fn request_token(&self) -> IngestResult<String> {
        let response = self
            .client
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IngestError::auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::auth(format!("token endpoint returned {}", status)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IngestError::auth(format!("unreadable token response: {}", e)))?;

        token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IngestError::auth("token response has no access_token"))
    }

    async fn fetch_page(&self, url: Url, token: &str) -> IngestResult<ContentListing> {
        tracing::debug!(%url, "Requesting content listing page");

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IngestError::fetch(format!("listing request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::fetch(format!(
                "listing endpoint returned {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::fetch(format!("failed to read listing body: {}", e)))?;

        parse_listing(&body)
    }

    async fn list_contents(&self, token: &str) -> IngestResult<Vec<SourceRecord>> {
        let mut url = self.listing_url()?;
        let mut records = Vec::new();

        for _ in 0..MAX_PAGES {
            let listing = self.fetch_page(url, token).await?;
            records.extend(
                listing
                    .results
                    .into_iter()
                    .map(|c| c.into_record(&self.config.course_id)),
            );

            match listing.paging.and_then(|p| p.next_page) {
                Some(next) => {
                    url = self.base.join(&next).map_err(|e| {
                        IngestError::fetch(format!("invalid nextPage link '{}': {}", next, e))
                    })?;
                }
                None => return Ok(records),
            }
        }

        tracing::warn!(
            pages = MAX_PAGES,
            records = records.len(),
            "Listing page cap reached, remaining pages left for a later cycle"
        );
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for ApiAdapter {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn fetch(&self) -> IngestResult<FetchBatch> {
        let token = self.request_token().await?;
        let records = self.list_contents(&token).await?;

        tracing::debug!(
            course_id = %self.config.course_id,
            count = records.len(),
            "Fetched course content listing"
        );
        Ok(FetchBatch::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_server::serve;
    use axum::{
        extract::{Form, Path, Query, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const API_ROOT: &str = "/learn/api/public/v1";

    #[derive(Default)]
    struct Calls {
        token: AtomicUsize,
        listing: AtomicUsize,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum TokenReply {
        Granted,
        Rejected,
        /// 200 with a body that carries no `access_token`
        Empty,
    }

    #[derive(Clone)]
    struct MockLms {
        calls: Arc<Calls>,
        reply: TokenReply,
    }

    async fn token(
        State(lms): State<MockLms>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Response {
        lms.calls.token.fetch_add(1, Ordering::SeqCst);
        let valid = form.get("grant_type").map(String::as_str) == Some("client_credentials")
            && form.get("client_id").map(String::as_str) == Some("id")
            && form.get("client_secret").map(String::as_str) == Some("secret");

        if lms.reply == TokenReply::Rejected || !valid {
            return (StatusCode::UNAUTHORIZED, "bad client").into_response();
        }
        if lms.reply == TokenReply::Empty {
            return Json(json!({ "token_type": "bearer" })).into_response();
        }
        Json(json!({ "access_token": "tok-1", "token_type": "bearer", "expires_in": 3599 }))
            .into_response()
    }

    async fn listing(
        State(lms): State<MockLms>,
        Path(course_id): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Response {
        lms.calls.listing.fetch_add(1, Ordering::SeqCst);
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some("Bearer tok-1");
        if !authorized {
            return StatusCode::UNAUTHORIZED.into_response();
        }

        if query.contains_key("offset") {
            return Json(json!({
                "results": [
                    { "id": "_3_1", "title": "Quiz 1", "modified": "2024-11-03T10:00:00.000Z" }
                ]
            }))
            .into_response();
        }

        Json(json!({
            "results": [
                {
                    "id": "_1_1",
                    "title": "Syllabus",
                    "description": "Course overview",
                    "created": "2024-09-01T08:00:00.000Z",
                    "modified": "2024-09-02T08:00:00.000Z",
                    "courseId": course_id
                },
                { "id": "_2_1", "title": "Week 1", "courseId": course_id }
            ],
            "paging": { "nextPage": format!("{}/courses/{}/contents?offset=2", API_ROOT, course_id) }
        }))
        .into_response()
    }

    async fn adapter_against(reply: TokenReply) -> (ApiAdapter, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let lms = MockLms {
            calls: calls.clone(),
            reply,
        };
        let app = Router::new()
            .route(&format!("{}/oauth2/token", API_ROOT), post(token))
            .route(
                &format!("{}/courses/:course_id/contents", API_ROOT),
                get(listing),
            )
            .with_state(lms);
        let base = serve(app).await;

        let config = ApiSourceConfig {
            base_url: format!("{}{}", base, API_ROOT),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            course_id: "_42_1".to_string(),
        };
        (ApiAdapter::new(config, Duration::from_secs(5)).unwrap(), calls)
    }

    #[test]
    fn listing_maps_fields_and_falls_back_to_configured_course() {
        let body = r#"{
            "results": [
                { "id": "_7_1", "title": "Notes", "modified": "2024-11-23T09:00:00Z", "courseId": "_9_1" },
                { "id": "_8_1", "title": "Slides" }
            ]
        }"#;
        let listing = parse_listing(body).unwrap();
        let records: Vec<SourceRecord> = listing
            .results
            .into_iter()
            .map(|c| c.into_record("_42_1"))
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].native_id.as_deref(), Some("_7_1"));
        assert_eq!(records[0].source_context.as_deref(), Some("_9_1"));
        assert!(records[0].modified.is_some());
        assert_eq!(records[1].source_context.as_deref(), Some("_42_1"));
        assert_eq!(records[1].kind, SourceKind::Api);
    }

    #[test]
    fn empty_results_is_not_an_error() {
        let listing = parse_listing(r#"{ "results": [] }"#).unwrap();
        assert!(listing.results.is_empty());
    }

    #[test]
    fn malformed_listing_is_a_fetch_error() {
        assert!(matches!(parse_listing("<html>"), Err(IngestError::Fetch(_))));
        assert!(matches!(
            parse_listing(r#"{ "items": [] }"#),
            Err(IngestError::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn fetch_exchanges_token_and_follows_pages() {
        let (adapter, calls) = adapter_against(TokenReply::Granted).await;

        let batch = adapter.fetch().await.unwrap();
        let ids: Vec<_> = batch
            .records
            .iter()
            .map(|r| r.native_id.clone().unwrap())
            .collect();

        assert_eq!(ids, vec!["_1_1", "_2_1", "_3_1"]);
        assert_eq!(batch.records[0].description.as_deref(), Some("Course overview"));
        assert_eq!(batch.records[2].source_context.as_deref(), Some("_42_1"));
        assert!(batch.parse_gaps.is_empty());
        assert_eq!(calls.token.load(Ordering::SeqCst), 1);
        assert_eq!(calls.listing.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn token_is_requested_every_fetch() {
        let (adapter, calls) = adapter_against(TokenReply::Granted).await;
        adapter.fetch().await.unwrap();
        adapter.fetch().await.unwrap();
        assert_eq!(calls.token.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_token_aborts_before_listing() {
        let (adapter, calls) = adapter_against(TokenReply::Rejected).await;

        let err = adapter.fetch().await.unwrap_err();
        assert!(matches!(err, IngestError::Auth(_)));
        assert!(err.aborts_cycle());
        assert_eq!(calls.listing.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_response_without_access_token_is_auth_error() {
        let (adapter, calls) = adapter_against(TokenReply::Empty).await;

        let err = adapter.fetch().await.unwrap_err();
        assert!(matches!(err, IngestError::Auth(ref msg) if msg.contains("access_token")));
        assert_eq!(calls.token.load(Ordering::SeqCst), 1);
        assert_eq!(calls.listing.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_listing_is_a_fetch_error() {
        let (adapter, _calls) = adapter_against(TokenReply::Granted).await;
        let mut config = adapter.config.clone();
        config.course_id = "missing/extra".to_string();
        let adapter = ApiAdapter::new(config, Duration::from_secs(5)).unwrap();

        // unknown route answers 404
        let err = adapter.fetch().await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(_)));
    }
}
