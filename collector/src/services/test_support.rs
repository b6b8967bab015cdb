//! In-memory `MetadataSource` for pipeline tests.

use crate::errors::ApiError;
use crate::models::{
    ChannelItem, ChannelSnippet, ChannelStatistics, PlaylistEntry, RelatedPlaylists, VideoItem,
    VideoSnippet, VideoStatistics,
};
use crate::services::youtube_client::{FetchOutcome, MetadataSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A well-formed channel id built from a short tag.
pub fn cid(tag: &str) -> String {
    format!("UC{tag:_<22}")
}

pub fn uploads_of(channel_id: &str) -> String {
    format!("UU{}", &channel_id[2..])
}

pub fn channel_item(id: &str, title: &str, subscribers: u64, views: u64, videos: u64) -> ChannelItem {
    ChannelItem {
        id: id.to_string(),
        snippet: ChannelSnippet {
            title: Some(title.to_string()),
            custom_url: Some(format!("@{}", title.to_lowercase())),
            country: Some("US".to_string()),
            published_at: Some("2012-01-01T00:00:00Z".to_string()),
        },
        statistics: ChannelStatistics {
            view_count: Some(views),
            subscriber_count: Some(subscribers),
            hidden_subscriber_count: false,
            video_count: Some(videos),
        },
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeSource {
    channels: HashMap<String, ChannelItem>,
    videos: HashMap<String, VideoItem>,
    playlists: HashMap<String, Vec<PlaylistEntry>>,
    channel_errors: HashMap<String, ApiError>,
    playlist_errors: HashMap<String, ApiError>,
    fatal_channels: Option<ApiError>,
    fatal_videos: Option<ApiError>,
    channel_calls: AtomicUsize,
    video_calls: AtomicUsize,
    channel_requests: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_channel(self, id: &str, title: &str, subscribers: u64, views: u64, videos: u64) -> Self {
        self.with_channel_item(channel_item(id, title, subscribers, views, videos))
    }

    pub fn with_channel_item(mut self, mut item: ChannelItem) -> Self {
        if item.content_details.related_playlists.uploads.is_none() {
            item.content_details.related_playlists = RelatedPlaylists {
                uploads: Some(uploads_of(&item.id)),
            };
        }
        self.channels.insert(item.id.clone(), item);
        self
    }

    pub fn with_channel_error(mut self, id: &str, error: ApiError) -> Self {
        self.channel_errors.insert(id.to_string(), error);
        self
    }

    pub fn with_uploads(mut self, channel_id: &str, entries: Vec<PlaylistEntry>) -> Self {
        self.playlists.insert(uploads_of(channel_id), entries);
        self
    }

    pub fn with_playlist_error(mut self, channel_id: &str, error: ApiError) -> Self {
        self.playlist_errors.insert(uploads_of(channel_id), error);
        self
    }

    pub fn with_video(mut self, id: &str, published_at: &str, views: u64) -> Self {
        self.videos.insert(
            id.to_string(),
            VideoItem {
                id: id.to_string(),
                snippet: VideoSnippet {
                    title: Some(format!("Video {id}")),
                    published_at: Some(published_at.to_string()),
                    category_id: Some("22".to_string()),
                },
                content_details: Default::default(),
                statistics: Some(VideoStatistics {
                    view_count: Some(views),
                    like_count: Some(views / 10),
                    comment_count: Some(views / 100),
                }),
            },
        );
        self
    }

    pub fn with_fatal_channels(mut self, error: ApiError) -> Self {
        self.fatal_channels = Some(error);
        self
    }

    pub fn with_fatal_videos(mut self, error: ApiError) -> Self {
        self.fatal_videos = Some(error);
        self
    }

    pub fn channel_calls(&self) -> usize {
        self.channel_calls.load(Ordering::SeqCst)
    }

    pub fn video_calls(&self) -> usize {
        self.video_calls.load(Ordering::SeqCst)
    }

    /// Every channel id requested so far, in request order.
    pub fn channel_requests(&self) -> Vec<String> {
        self.channel_requests.lock().unwrap().clone()
    }
}

fn lookup<T: Clone>(
    ids: &[String],
    items: &HashMap<String, T>,
    errors: &HashMap<String, ApiError>,
    noun: &str,
) -> FetchOutcome<T> {
    let mut outcome = FetchOutcome::default();
    for id in ids {
        if let Some(error) = errors.get(id) {
            outcome.failed.push((id.clone(), error.clone()));
        } else if let Some(item) = items.get(id) {
            outcome.found.insert(id.clone(), item.clone());
        } else {
            outcome.failed.push((
                id.clone(),
                ApiError::not_found(format!("{noun} {id} was not returned by the API")),
            ));
        }
    }
    outcome
}

#[async_trait]
impl MetadataSource for FakeSource {
    async fn fetch_channels(&self, ids: &[String]) -> Result<FetchOutcome<ChannelItem>, ApiError> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        self.channel_requests
            .lock()
            .unwrap()
            .extend(ids.iter().cloned());
        if let Some(error) = &self.fatal_channels {
            return Err(error.clone());
        }
        Ok(lookup(ids, &self.channels, &self.channel_errors, "channel"))
    }

    async fn fetch_videos(&self, ids: &[String]) -> Result<FetchOutcome<VideoItem>, ApiError> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.fatal_videos {
            return Err(error.clone());
        }
        Ok(lookup(ids, &self.videos, &HashMap::new(), "video"))
    }

    async fn playlist_entries(
        &self,
        playlist_id: &str,
        max: usize,
    ) -> Result<Vec<PlaylistEntry>, ApiError> {
        if let Some(error) = self.playlist_errors.get(playlist_id) {
            return Err(error.clone());
        }
        match self.playlists.get(playlist_id) {
            Some(entries) => Ok(entries.iter().take(max).cloned().collect()),
            None => Err(ApiError::not_found(format!(
                "playlist {playlist_id} not found"
            ))),
        }
    }
}
