use crate::config::DataPaths;
use crate::errors::{ApiError, ApiErrorKind, ErrorKind};
use crate::models::{ChannelItem, PlaylistEntry, VideoItem, VideoSnapshotRow, VIDEO_SNAPSHOT_HEADER};
use crate::services::atomic_writer;
use crate::services::error_reporter::ErrorReporter;
use crate::services::reference_store::ReferenceTable;
use crate::services::validation_cache::ValidationCache;
use crate::services::validator::ChannelValidator;
use crate::services::youtube_client::MetadataSource;
use crate::utils::{format_timestamp, month_key, parse_timestamp};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Months, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Newest uploads always kept.
    pub recent_n: usize,
    /// Most viewed uploads kept from inside the window.
    pub top_n: usize,
    pub window_months: u32,
    /// How many newest uploads are considered at all.
    pub pool_size: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            recent_n: 20,
            top_n: 20,
            window_months: 12,
            pool_size: 120,
        }
    }
}

#[derive(Debug)]
pub struct MonthlySummary {
    pub month: String,
    pub channels: usize,
    pub rows: usize,
    pub output: PathBuf,
    pub errors: usize,
    pub error_file: PathBuf,
}

/// A selected upload, with statistics when the `videos` lookup returned it.
#[derive(Debug, Clone, Copy)]
pub enum VideoRecord<'a> {
    Full(&'a VideoItem),
    PlaylistOnly(&'a PlaylistEntry),
}

impl VideoRecord<'_> {
    pub fn video_id(&self) -> &str {
        match self {
            VideoRecord::Full(video) => &video.id,
            VideoRecord::PlaylistOnly(entry) => &entry.video_id,
        }
    }
}

enum ChannelOutcome {
    Rows(Vec<VideoSnapshotRow>),
    Failed(ErrorKind, String),
}

/// Recent uploads first, then the most viewed uploads published on or after
/// `cutoff`, each video once.
pub fn select_videos<'a>(
    entries: &'a [PlaylistEntry],
    stats: &'a HashMap<String, VideoItem>,
    selection: &SelectionConfig,
    cutoff: DateTime<Utc>,
) -> Vec<VideoRecord<'a>> {
    let published = |video: &VideoItem, entry: &PlaylistEntry| {
        video
            .snippet
            .published_at
            .as_deref()
            .or(entry.published_at.as_deref())
            .and_then(parse_timestamp)
    };

    let mut ranked: Vec<(&VideoItem, u64, DateTime<Utc>)> = entries
        .iter()
        .filter_map(|entry| {
            let video = stats.get(&entry.video_id)?;
            let published_at = published(video, entry)?;
            if published_at < cutoff {
                return None;
            }
            let views = video.statistics.as_ref().and_then(|s| s.view_count)?;
            Some((video, views, published_at))
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });

    let recent = entries.iter().take(selection.recent_n).map(|e| e.video_id.as_str());
    let top = ranked.iter().take(selection.top_n).map(|(v, _, _)| v.id.as_str());

    let by_id: HashMap<&str, &PlaylistEntry> =
        entries.iter().map(|e| (e.video_id.as_str(), e)).collect();
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for id in recent.chain(top) {
        if !seen.insert(id) {
            continue;
        }
        if let Some(video) = stats.get(id) {
            selected.push(VideoRecord::Full(video));
        } else if let Some(entry) = by_id.get(id).copied() {
            selected.push(VideoRecord::PlaylistOnly(entry));
        }
    }
    selected
}

/// Build this month's video snapshot for every accepted channel and replace
/// the month file in one atomic write.
pub async fn run_monthly<S: MetadataSource + ?Sized>(
    source: &S,
    paths: &DataPaths,
    selection: &SelectionConfig,
    concurrency: usize,
    now: DateTime<Utc>,
) -> Result<MonthlySummary> {
    let month = month_key(now);
    info!("Monthly video snapshot run for {month}");

    let mut reporter = ErrorReporter::new(&paths.monthly_errors(&month), now);
    let outcome = build(source, paths, selection, concurrency, &month, now, &mut reporter).await;
    let (mut summary, errors, error_file) = reporter.finish(outcome)?;
    summary.errors = errors;
    summary.error_file = error_file;

    info!(
        "Monthly run {} done: {} rows for {} channels, {} errors",
        summary.month, summary.rows, summary.channels, summary.errors
    );
    Ok(summary)
}

async fn build<S: MetadataSource + ?Sized>(
    source: &S,
    paths: &DataPaths,
    selection: &SelectionConfig,
    concurrency: usize,
    month: &str,
    now: DateTime<Utc>,
    reporter: &mut ErrorReporter,
) -> Result<MonthlySummary> {
    let references = ReferenceTable::load(&paths.channels_file)?;
    let mut cache = ValidationCache::load(&paths.validation_cache());

    let mut report = ChannelValidator::new(source, &mut cache, now)
        .validate_all(&references.channel_ids())
        .await?;
    report.record_errors(reporter);

    let to_fetch: Vec<String> = report
        .accepted
        .iter()
        .filter(|id| !report.fetched.contains_key(*id))
        .cloned()
        .collect();
    let mut fetched = if to_fetch.is_empty() {
        Default::default()
    } else {
        source.fetch_channels(&to_fetch).await?
    };

    let mut channels: Vec<ChannelItem> = Vec::with_capacity(report.accepted.len());
    for id in &report.accepted {
        if let Some(item) = report.fetched.remove(id).or_else(|| fetched.found.remove(id)) {
            channels.push(item);
            continue;
        }
        let error = fetched.error_for(id).cloned().unwrap_or_else(|| {
            ApiError::not_found(format!("channel {id} was not returned by the API"))
        });
        if error.kind == ApiErrorKind::NotFound {
            cache.invalidate(id);
        }
        reporter.record(error.kind.into(), Some(id), error.message);
    }

    let cutoff = now
        .checked_sub_months(Months::new(selection.window_months))
        .ok_or_else(|| anyhow!("cannot compute a {} month window", selection.window_months))?;
    let snapshot_timestamp = format_timestamp(now);

    // A fatal failure ends the stream before any further channel is started.
    let outcomes: Vec<ChannelOutcome> = stream::iter(channels.iter().map(|channel| {
        snapshot_channel(source, channel, selection, cutoff, month, &snapshot_timestamp)
    }))
    .buffered(concurrency.max(1))
    .try_collect()
    .await?;

    let mut rows = Vec::new();
    for (channel, outcome) in channels.iter().zip(outcomes) {
        match outcome {
            ChannelOutcome::Rows(channel_rows) => rows.extend(channel_rows),
            ChannelOutcome::Failed(kind, message) => {
                reporter.record(kind, Some(&channel.id), message)
            }
        }
    }

    let output = paths.monthly_videos(month);
    atomic_writer::write_csv(&output, &VIDEO_SNAPSHOT_HEADER, &rows)?;
    info!("Wrote {} video rows to {}", rows.len(), output.display());

    if let Err(e) = cache.save() {
        warn!("Failed to save validation cache: {e:#}");
    }

    Ok(MonthlySummary {
        month: month.to_string(),
        channels: channels.len(),
        rows: rows.len(),
        output,
        errors: 0,
        error_file: PathBuf::new(),
    })
}

async fn snapshot_channel<S: MetadataSource + ?Sized>(
    source: &S,
    channel: &ChannelItem,
    selection: &SelectionConfig,
    cutoff: DateTime<Utc>,
    month: &str,
    snapshot_timestamp: &str,
) -> Result<ChannelOutcome, ApiError> {
    let Some(uploads) = channel.uploads_playlist_id() else {
        return Ok(ChannelOutcome::Failed(
            ErrorKind::Data,
            "channel has no uploads playlist".to_string(),
        ));
    };

    let entries = match source.playlist_entries(uploads, selection.pool_size).await {
        Ok(entries) => entries,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            return Ok(ChannelOutcome::Failed(
                e.kind.into(),
                format!("uploads playlist {uploads}: {}", e.message),
            ))
        }
    };
    if entries.is_empty() {
        info!("{} has no uploads", channel.id);
        return Ok(ChannelOutcome::Rows(Vec::new()));
    }

    let ids: Vec<String> = entries.iter().map(|e| e.video_id.clone()).collect();
    let videos = source.fetch_videos(&ids).await?;
    if let Some((id, e)) = videos
        .failed
        .iter()
        .find(|(_, e)| e.kind != ApiErrorKind::NotFound)
    {
        return Ok(ChannelOutcome::Failed(
            e.kind.into(),
            format!("video statistics for {id}: {}", e.message),
        ));
    }
    if !videos.failed.is_empty() {
        debug!(
            "{}: {} uploads without statistics",
            channel.id,
            videos.failed.len()
        );
    }

    let channel_title = channel.snippet.title.clone().unwrap_or_default();
    let rows = select_videos(&entries, &videos.found, selection, cutoff)
        .into_iter()
        .map(|record| {
            let mut row = VideoSnapshotRow {
                snapshot_month: month.to_string(),
                snapshot_timestamp: snapshot_timestamp.to_string(),
                channel_id: channel.id.clone(),
                channel_title: channel_title.clone(),
                video_id: record.video_id().to_string(),
                publish_date: None,
                title: None,
                duration: None,
                category_id: None,
                view_count: None,
                like_count: None,
                comment_count: None,
            };
            match record {
                VideoRecord::Full(video) => {
                    row.publish_date = video.snippet.published_at.clone();
                    row.title = video.snippet.title.clone();
                    row.duration = video.content_details.duration.clone();
                    row.category_id = video.snippet.category_id.clone();
                    if let Some(stats) = &video.statistics {
                        row.view_count = stats.view_count;
                        row.like_count = stats.like_count;
                        row.comment_count = stats.comment_count;
                    }
                }
                VideoRecord::PlaylistOnly(entry) => {
                    row.publish_date = entry.published_at.clone();
                    row.title = entry.title.clone();
                }
            }
            row
        })
        .collect::<Vec<_>>();

    debug!("{}: {} videos selected", channel.id, rows.len());
    Ok(ChannelOutcome::Rows(rows))
}
