use crate::errors::ApiError;
use crate::models::{ChannelItem, HasId, ListResponse, PlaylistEntry, PlaylistItem, VideoItem};
use crate::services::retry::RetryPolicy;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;

/// The API accepts at most 50 ids per `channels`/`videos` call and 50 items per page.
pub const MAX_BATCH_SIZE: usize = 50;

const RATE_LIMIT_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

const CREDENTIAL_REASONS: &[&str] = &[
    "keyInvalid",
    "keyExpired",
    "accessNotConfigured",
    "ipRefererBlocked",
];

/// 403 reasons that concern one resource rather than the credential.
const INACCESSIBLE_REASONS: &[&str] = &[
    "playlistItemsNotAccessible",
    "channelClosed",
    "channelSuspended",
];

/// A single GET against the YouTube Data API, with failures already classified.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError>;
}

pub struct HttpTransport {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::fatal("YOUTUBE_API_KEY is not set"))?;

        let mut url = self
            .base_url
            .join(endpoint)
            .map_err(|e| ApiError::fatal(format!("invalid endpoint '{endpoint}': {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .append_pair("key", api_key);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_transport_error)?;

        if (200..300).contains(&status) {
            serde_json::from_str(&body).map_err(|e| {
                ApiError::transient(format!("undecodable {endpoint} response: {e}"))
            })
        } else {
            Err(classify_status(status, &body))
        }
    }
}

fn classify_transport_error(e: reqwest::Error) -> ApiError {
    // The request URL carries the API key.
    let e = e.without_url();
    if e.is_builder() {
        ApiError::fatal(format!("could not build request: {e}"))
    } else {
        ApiError::transient(e.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Map a non-2xx response onto the error taxonomy.
pub fn classify_status(status: u16, body: &str) -> ApiError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let reasons: Vec<&str> = envelope
        .error
        .errors
        .iter()
        .map(|d| d.reason.as_str())
        .filter(|r| !r.is_empty())
        .collect();
    let has_reason = |set: &[&str]| reasons.iter().any(|r| set.contains(r));

    let detail = if envelope.error.message.is_empty() {
        body.chars().take(300).collect::<String>()
    } else {
        envelope.error.message.clone()
    };
    let message = if reasons.is_empty() {
        format!("HTTP {status}: {detail}")
    } else {
        format!("HTTP {status} ({}): {detail}", reasons.join(","))
    };

    match status {
        429 => ApiError::rate_limited(message),
        403 if has_reason(RATE_LIMIT_REASONS) => ApiError::rate_limited(message),
        403 if has_reason(INACCESSIBLE_REASONS) => ApiError::not_found(message),
        401 | 403 => ApiError::fatal(message),
        400 if has_reason(CREDENTIAL_REASONS) || detail.contains("API key not valid") => {
            ApiError::fatal(message)
        }
        400 => ApiError::invalid_request(message),
        404 => ApiError::not_found(message),
        408 | 500..=599 => ApiError::transient(message),
        _ => ApiError::fatal(message),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Channels,
    Videos,
}

impl ResourceKind {
    pub fn endpoint(self) -> &'static str {
        match self {
            ResourceKind::Channels => "channels",
            ResourceKind::Videos => "videos",
        }
    }

    fn parts(self) -> &'static str {
        match self {
            ResourceKind::Channels => "snippet,statistics,contentDetails",
            ResourceKind::Videos => "snippet,contentDetails,statistics",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            ResourceKind::Channels => "channel",
            ResourceKind::Videos => "video",
        }
    }
}

/// Result of a batched lookup: what was found, and why each other id was not.
#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub found: HashMap<String, T>,
    /// In request order.
    pub failed: Vec<(String, ApiError)>,
}

impl<T> Default for FetchOutcome<T> {
    fn default() -> Self {
        Self {
            found: HashMap::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> FetchOutcome<T> {
    pub fn error_for(&self, id: &str) -> Option<&ApiError> {
        self.failed
            .iter()
            .find(|(failed_id, _)| failed_id == id)
            .map(|(_, e)| e)
    }
}

/// What the pipelines need from the remote side.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_channels(&self, ids: &[String]) -> Result<FetchOutcome<ChannelItem>, ApiError>;

    async fn fetch_videos(&self, ids: &[String]) -> Result<FetchOutcome<VideoItem>, ApiError>;

    /// Newest-first entries of a playlist, at most `max`.
    async fn playlist_entries(
        &self,
        playlist_id: &str,
        max: usize,
    ) -> Result<Vec<PlaylistEntry>, ApiError>;
}

pub struct YouTubeClient<T: ApiTransport = HttpTransport> {
    transport: T,
    retry: RetryPolicy,
    batch_size: usize,
    concurrency: usize,
}

impl<T: ApiTransport> YouTubeClient<T> {
    pub fn new(transport: T, retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            transport,
            retry,
            batch_size: MAX_BATCH_SIZE,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Look up `ids` in batches. Only a fatal failure is returned as `Err`;
    /// everything else is reported per id in [`FetchOutcome::failed`].
    pub async fn fetch<I>(&self, kind: ResourceKind, ids: &[String]) -> Result<FetchOutcome<I>, ApiError>
    where
        I: DeserializeOwned + HasId + Send,
    {
        let mut seen = HashSet::new();
        let unique: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let batches: Vec<Vec<String>> = unique
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total = batches.len();
        let requests: Vec<_> = batches
            .into_iter()
            .enumerate()
            .map(|(n, batch)| self.fetch_batch(kind, batch, n + 1, total))
            .collect();

        // Consumed in order; returning early drops the batches not yet started.
        let mut results = stream::iter(requests).buffered(self.concurrency);
        let mut outcome = FetchOutcome::default();
        while let Some((batch, result)) = results.next().await {
            match result {
                Ok(value) => {
                    let page: ListResponse<I> = serde_json::from_value(value).map_err(|e| {
                        ApiError::fatal(format!("unexpected {} payload: {e}", kind.endpoint()))
                    })?;
                    for item in page.items {
                        outcome.found.insert(item.id().to_string(), item);
                    }
                    for id in batch {
                        if !outcome.found.contains_key(&id) {
                            let error = ApiError::not_found(format!(
                                "{} {id} was not returned by the API",
                                kind.noun()
                            ));
                            outcome.failed.push((id, error));
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "{} batch of {} ids failed: {e}",
                        kind.endpoint(),
                        batch.len()
                    );
                    outcome
                        .failed
                        .extend(batch.into_iter().map(|id| (id, e.clone())));
                }
            }
        }

        debug!(
            "{}: {} found, {} failed",
            kind.endpoint(),
            outcome.found.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn fetch_batch(
        &self,
        kind: ResourceKind,
        batch: Vec<String>,
        number: usize,
        total: usize,
    ) -> (Vec<String>, Result<Value, ApiError>) {
        info!(
            "Fetching {} batch {}/{} ({} ids)",
            kind.endpoint(),
            number,
            total,
            batch.len()
        );
        let params = vec![
            ("part", kind.parts().to_string()),
            ("id", batch.join(",")),
            ("maxResults", batch.len().to_string()),
        ];
        let label = format!("{} batch {}/{}", kind.endpoint(), number, total);
        let result = self
            .retry
            .run(&label, || self.transport.get(kind.endpoint(), &params))
            .await;
        (batch, result)
    }

    pub async fn playlist_items(&self, playlist_id: &str, max: usize) -> Result<Vec<PlaylistEntry>, ApiError> {
        let mut entries: Vec<PlaylistEntry> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page_no = 0;

        while entries.len() < max {
            page_no += 1;
            let mut params = vec![
                ("part", "snippet,contentDetails".to_string()),
                ("playlistId", playlist_id.to_string()),
                ("maxResults", (max - entries.len()).min(MAX_BATCH_SIZE).to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let label = format!("playlistItems {playlist_id} page {page_no}");
            let value = self
                .retry
                .run(&label, || self.transport.get("playlistItems", &params))
                .await?;
            let page: ListResponse<PlaylistItem> = serde_json::from_value(value)
                .map_err(|e| ApiError::fatal(format!("unexpected playlistItems payload: {e}")))?;

            if page.items.is_empty() {
                break;
            }
            entries.extend(page.items.into_iter().filter_map(PlaylistItem::into_entry));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        entries.truncate(max);
        Ok(entries)
    }
}

#[async_trait]
impl<T: ApiTransport> MetadataSource for YouTubeClient<T> {
    async fn fetch_channels(&self, ids: &[String]) -> Result<FetchOutcome<ChannelItem>, ApiError> {
        self.fetch(ResourceKind::Channels, ids).await
    }

    async fn fetch_videos(&self, ids: &[String]) -> Result<FetchOutcome<VideoItem>, ApiError> {
        self.fetch(ResourceKind::Videos, ids).await
    }

    async fn playlist_entries(
        &self,
        playlist_id: &str,
        max: usize,
    ) -> Result<Vec<PlaylistEntry>, ApiError> {
        self.playlist_items(playlist_id, max).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    type Handler = dyn Fn(&str, &HashMap<String, String>) -> Result<Value, ApiError> + Send + Sync;

    struct FakeTransport {
        handler: Box<Handler>,
        calls: AtomicU32,
        requests: Mutex<Vec<HashMap<String, String>>>,
    }

    impl FakeTransport {
        fn new(
            handler: impl Fn(&str, &HashMap<String, String>) -> Result<Value, ApiError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                calls: AtomicU32::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ApiTransport for FakeTransport {
        async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let params: HashMap<String, String> = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            self.requests.lock().unwrap().push(params.clone());
            (self.handler)(endpoint, &params)
        }
    }

    fn instant_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(60),
            jitter_percent: 0,
        }
    }

    fn echo_channels(params: &HashMap<String, String>) -> Value {
        let items: Vec<Value> = params["id"]
            .split(',')
            .map(|id| json!({"id": id, "snippet": {"title": format!("title {id}")}}))
            .collect();
        json!({ "items": items })
    }

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i:03}")).collect()
    }

    #[tokio::test]
    async fn fetch_splits_ids_into_batches_of_fifty() {
        let client = YouTubeClient::new(
            FakeTransport::new(|_, params| Ok(echo_channels(params))),
            instant_retry(3),
            2,
        );

        let outcome: FetchOutcome<ChannelItem> =
            client.fetch(ResourceKind::Channels, &ids("UC", 120)).await.unwrap();

        assert_eq!(outcome.found.len(), 120);
        assert!(outcome.failed.is_empty());
        let mut sizes: Vec<usize> = client
            .transport
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|p| p["id"].split(',').count())
            .collect();
        sizes.sort();
        assert_eq!(sizes, vec![20, 50, 50]);
    }

    #[tokio::test]
    async fn ids_missing_from_response_are_not_found() {
        let client = YouTubeClient::new(
            FakeTransport::new(|_, _| Ok(json!({"items": [{"id": "UCa"}]}))),
            instant_retry(3),
            1,
        );

        let outcome: FetchOutcome<ChannelItem> = client
            .fetch(ResourceKind::Channels, &["UCa".to_string(), "UCb".to_string()])
            .await
            .unwrap();

        assert!(outcome.found.contains_key("UCa"));
        assert_eq!(outcome.error_for("UCb").unwrap().kind, ApiErrorKind::NotFound);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let attempts = AtomicU32::new(0);
        let client = YouTubeClient::new(
            FakeTransport::new(move |_, params| {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::transient("HTTP 503"))
                } else {
                    Ok(echo_channels(params))
                }
            }),
            instant_retry(5),
            1,
        );

        let outcome: FetchOutcome<ChannelItem> = client
            .fetch(ResourceKind::Channels, &["UCa".to_string()])
            .await
            .unwrap();

        assert!(outcome.found.contains_key("UCa"));
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_batch_fails_per_id_without_aborting_others() {
        let client = YouTubeClient::new(
            FakeTransport::new(|_, params| {
                if params["id"].contains("UCbad") {
                    Err(ApiError::rate_limited("HTTP 429"))
                } else {
                    Ok(echo_channels(params))
                }
            }),
            instant_retry(3),
            1,
        )
        .with_batch_size(2);

        let request: Vec<String> = ["UCok1", "UCok2", "UCbad", "UCok3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let outcome: FetchOutcome<ChannelItem> =
            client.fetch(ResourceKind::Channels, &request).await.unwrap();

        assert_eq!(outcome.found.len(), 2);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(outcome.error_for("UCbad").unwrap().kind, ApiErrorKind::RateLimited);
        assert_eq!(outcome.error_for("UCok3").unwrap().kind, ApiErrorKind::RateLimited);
        // 1 call for the good batch, 3 attempts for the bad one
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_error_aborts_fetch() {
        let client = YouTubeClient::new(
            FakeTransport::new(|_, _| Err(ApiError::fatal("HTTP 400 (keyInvalid)"))),
            instant_retry(3),
            1,
        );

        let err = client
            .fetch::<ChannelItem>(ResourceKind::Channels, &["UCa".to_string()])
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Fatal);
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_batch_stops_remaining_batches() {
        let client = YouTubeClient::new(
            FakeTransport::new(|_, _| Err(ApiError::fatal("HTTP 403 (forbidden)"))),
            instant_retry(3),
            1,
        )
        .with_batch_size(1);

        let err = client
            .fetch::<ChannelItem>(ResourceKind::Channels, &ids("UC", 4))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Fatal);
        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_future_is_send() {
        fn assert_send<F: std::future::Future + Send>(future: F) -> F {
            future
        }
        let client = YouTubeClient::new(
            FakeTransport::new(|_, params| Ok(echo_channels(params))),
            instant_retry(1),
            2,
        );

        let request = ids("UC", 3);
        let outcome = assert_send(client.fetch_channels(&request)).await.unwrap();

        assert_eq!(outcome.found.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_ids_are_requested_once() {
        let client = YouTubeClient::new(
            FakeTransport::new(|_, params| Ok(echo_channels(params))),
            instant_retry(3),
            1,
        );

        let request = vec!["UCa".to_string(), "UCa".to_string(), "UCb".to_string()];
        let outcome: FetchOutcome<ChannelItem> =
            client.fetch(ResourceKind::Channels, &request).await.unwrap();

        assert_eq!(outcome.found.len(), 2);
        assert_eq!(client.transport.requests.lock().unwrap()[0]["id"], "UCa,UCb");
    }

    #[tokio::test]
    async fn playlist_items_follow_page_tokens_up_to_max() {
        let client = YouTubeClient::new(
            FakeTransport::new(|endpoint, params| {
                assert_eq!(endpoint, "playlistItems");
                let start: usize = params
                    .get("pageToken")
                    .map(|t| t.parse().unwrap())
                    .unwrap_or(0);
                let count: usize = params["maxResults"].parse().unwrap();
                let items: Vec<Value> = (start..start + count)
                    .map(|i| json!({"contentDetails": {"videoId": format!("v{i}")}}))
                    .collect();
                Ok(json!({"items": items, "nextPageToken": (start + count).to_string()}))
            }),
            instant_retry(3),
            1,
        );

        let entries = client.playlist_items("UUabc", 120).await.unwrap();

        assert_eq!(entries.len(), 120);
        assert_eq!(entries[0].video_id, "v0");
        assert_eq!(entries[119].video_id, "v119");
        let max_results: Vec<String> = client
            .transport
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|p| p["maxResults"].clone())
            .collect();
        assert_eq!(max_results, vec!["50", "50", "20"]);
    }

    #[tokio::test]
    async fn playlist_items_stop_on_last_page() {
        let client = YouTubeClient::new(
            FakeTransport::new(|_, _| {
                Ok(json!({"items": [
                    {"snippet": {"title": "a", "resourceId": {"videoId": "v1"}}},
                    {"snippet": {"title": "deleted"}},
                    {"contentDetails": {"videoId": "v2", "videoPublishedAt": "2025-01-01T00:00:00Z"}}
                ]}))
            }),
            instant_retry(3),
            1,
        );

        let entries = client.playlist_items("UUabc", 120).await.unwrap();

        assert_eq!(client.transport.calls.load(Ordering::SeqCst), 1);
        let ids: Vec<&str> = entries.iter().map(|e| e.video_id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2"]);
        assert_eq!(entries[1].published_at.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn missing_api_key_is_fatal_before_any_request() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9/youtube/v3", None, Duration::from_secs(1)).unwrap();

        let err = transport
            .get("channels", &[("id", "UCa".to_string())])
            .await
            .unwrap_err();

        assert_eq!(err.kind, ApiErrorKind::Fatal);
    }

    fn youtube_error(code: u16, reason: &str) -> String {
        json!({"error": {"code": code, "message": "boom", "errors": [{"reason": reason}]}}).to_string()
    }

    #[test]
    fn classifies_http_failures() {
        let kind = |status, body: &str| classify_status(status, body).kind;

        assert_eq!(kind(429, ""), ApiErrorKind::RateLimited);
        assert_eq!(kind(403, &youtube_error(403, "quotaExceeded")), ApiErrorKind::RateLimited);
        assert_eq!(kind(403, &youtube_error(403, "rateLimitExceeded")), ApiErrorKind::RateLimited);
        assert_eq!(
            kind(403, &youtube_error(403, "playlistItemsNotAccessible")),
            ApiErrorKind::NotFound
        );
        assert_eq!(kind(403, &youtube_error(403, "channelClosed")), ApiErrorKind::NotFound);
        assert_eq!(kind(403, &youtube_error(403, "channelSuspended")), ApiErrorKind::NotFound);
        assert_eq!(kind(403, &youtube_error(403, "forbidden")), ApiErrorKind::Fatal);
        assert_eq!(kind(403, &youtube_error(403, "somethingNew")), ApiErrorKind::Fatal);
        assert_eq!(kind(401, ""), ApiErrorKind::Fatal);
        assert_eq!(kind(400, &youtube_error(400, "keyInvalid")), ApiErrorKind::Fatal);
        assert_eq!(kind(400, &youtube_error(400, "invalidPart")), ApiErrorKind::InvalidRequest);
        assert_eq!(kind(404, &youtube_error(404, "playlistNotFound")), ApiErrorKind::NotFound);
        assert_eq!(kind(500, "oops"), ApiErrorKind::Transient);
        assert_eq!(kind(503, ""), ApiErrorKind::Transient);
        assert_eq!(kind(408, ""), ApiErrorKind::Transient);
        assert_eq!(kind(302, ""), ApiErrorKind::Fatal);
    }

    #[test]
    fn classified_message_keeps_reason() {
        let err = classify_status(403, &youtube_error(403, "quotaExceeded"));
        assert_eq!(err.message, "HTTP 403 (quotaExceeded): boom");
    }
}
