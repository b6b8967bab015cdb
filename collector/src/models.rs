use crate::errors::ErrorKind;
use crate::utils::deserialize_opt_u64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// YouTube Data API v3 payloads
// Documentation: https://developers.google.com/youtube/v3/docs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// Anything the API returns keyed by an `id` field.
pub trait HasId {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelItem {
    pub id: String,
    #[serde(default)]
    pub snippet: ChannelSnippet,
    #[serde(default)]
    pub statistics: ChannelStatistics,
    #[serde(default)]
    pub content_details: ChannelContentDetails,
}

impl HasId for ChannelItem {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ChannelItem {
    pub fn uploads_playlist_id(&self) -> Option<&str> {
        self.content_details
            .related_playlists
            .uploads
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    pub title: Option<String>,
    pub custom_url: Option<String>,
    pub country: Option<String>,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub view_count: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub subscriber_count: Option<u64>,
    #[serde(default)]
    pub hidden_subscriber_count: bool,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub video_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    #[serde(default)]
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelatedPlaylists {
    pub uploads: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub id: String,
    #[serde(default)]
    pub snippet: VideoSnippet,
    #[serde(default)]
    pub content_details: VideoContentDetails,
    pub statistics: Option<VideoStatistics>,
}

impl HasId for VideoItem {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoContentDetails {
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub view_count: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub like_count: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub comment_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    #[serde(default)]
    pub snippet: PlaylistItemSnippet,
    #[serde(default)]
    pub content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemSnippet {
    pub title: Option<String>,
    pub published_at: Option<String>,
    #[serde(default)]
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemContentDetails {
    pub video_id: Option<String>,
    pub video_published_at: Option<String>,
}

/// One upload as listed by a playlist, without statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub video_id: String,
    pub title: Option<String>,
    pub published_at: Option<String>,
}

impl PlaylistItem {
    pub fn into_entry(self) -> Option<PlaylistEntry> {
        let video_id = self
            .content_details
            .video_id
            .or(self.snippet.resource_id.video_id)
            .filter(|id| !id.is_empty())?;

        Some(PlaylistEntry {
            video_id,
            title: self.snippet.title,
            published_at: self
                .content_details
                .video_published_at
                .or(self.snippet.published_at),
        })
    }
}

// ---------------------------------------------------------------------------
// Persisted rows
// ---------------------------------------------------------------------------

pub const REFERENCE_HEADER: [&str; 8] = [
    "channel_id",
    "channel_title",
    "channel_url",
    "custom_url",
    "country",
    "uploads_playlist_id",
    "created_at",
    "last_seen_utc",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelReference {
    pub channel_id: String,
    pub channel_title: Option<String>,
    pub channel_url: Option<String>,
    pub custom_url: Option<String>,
    pub country: Option<String>,
    pub uploads_playlist_id: Option<String>,
    pub created_at: Option<String>,
    pub last_seen_utc: Option<String>,
}

pub const DAILY_SNAPSHOT_HEADER: [&str; 6] = [
    "date_utc",
    "channel_id",
    "channel_title",
    "subscribers",
    "total_views",
    "video_count",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySnapshotRow {
    pub date_utc: String,
    pub channel_id: String,
    pub channel_title: String,
    pub subscribers: Option<u64>,
    pub total_views: Option<u64>,
    pub video_count: Option<u64>,
}

/// Identity columns of a daily snapshot row, used for the duplicate check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct DailySnapshotKey {
    pub date_utc: String,
    pub channel_id: String,
}

pub const VIDEO_SNAPSHOT_HEADER: [&str; 12] = [
    "snapshot_month",
    "snapshot_timestamp",
    "channel_id",
    "channel_title",
    "video_id",
    "publish_date",
    "title",
    "duration",
    "category_id",
    "view_count",
    "like_count",
    "comment_count",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSnapshotRow {
    pub snapshot_month: String,
    pub snapshot_timestamp: String,
    pub channel_id: String,
    pub channel_title: String,
    pub video_id: String,
    pub publish_date: Option<String>,
    pub title: Option<String>,
    pub duration: Option<String>,
    pub category_id: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
}

pub const ERROR_HEADER: [&str; 4] = ["timestamp", "channel_id", "kind", "message"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: String,
    pub channel_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    Missing,
    Invalid,
}

pub const CACHE_HEADER: [&str; 3] = ["channel_id", "status", "last_checked"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub channel_id: String,
    pub status: ValidationStatus,
    pub last_checked: DateTime<Utc>,
}
