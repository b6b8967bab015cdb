use crate::config::DataPaths;
use crate::errors::{ApiError, ApiErrorKind};
use crate::models::{ChannelItem, DailySnapshotKey, DailySnapshotRow, DAILY_SNAPSHOT_HEADER};
use crate::services::atomic_writer;
use crate::services::error_reporter::ErrorReporter;
use crate::services::reference_store::ReferenceTable;
use crate::services::validation_cache::ValidationCache;
use crate::services::validator::ChannelValidator;
use crate::services::youtube_client::{FetchOutcome, MetadataSource};
use crate::utils::date_key;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct DailySummary {
    pub date: String,
    pub accepted: usize,
    pub appended: usize,
    /// Accepted channels that already had a row for the date.
    pub already_present: usize,
    pub errors: usize,
    pub error_file: PathBuf,
}

/// Validate, snapshot the counters of every accepted channel for today's UTC
/// date, and upsert the reference table.
pub async fn run_daily<S: MetadataSource + ?Sized>(
    source: &S,
    paths: &DataPaths,
    now: DateTime<Utc>,
) -> Result<DailySummary> {
    let date = date_key(now);
    info!("Daily snapshot run for {date}");

    let mut reporter = ErrorReporter::new(&paths.daily_errors(&date), now);
    let outcome = collect(source, paths, &date, now, &mut reporter).await;
    let (mut summary, errors, error_file) = reporter.finish(outcome)?;
    summary.errors = errors;
    summary.error_file = error_file;

    info!(
        "Daily run {} done: {} rows appended, {} already present, {} errors",
        summary.date, summary.appended, summary.already_present, summary.errors
    );
    Ok(summary)
}

async fn collect<S: MetadataSource + ?Sized>(
    source: &S,
    paths: &DataPaths,
    date: &str,
    now: DateTime<Utc>,
    reporter: &mut ErrorReporter,
) -> Result<DailySummary> {
    let mut references = ReferenceTable::load(&paths.channels_file)?;
    let mut cache = ValidationCache::load(&paths.validation_cache());

    let report = ChannelValidator::new(source, &mut cache, now)
        .validate_all(&references.channel_ids())
        .await?;
    report.record_errors(reporter);

    let snapshot_path = paths.daily_snapshots();
    let existing = load_daily_keys(&snapshot_path)?;
    let (present, pending): (Vec<String>, Vec<String>) =
        report.accepted.iter().cloned().partition(|id| {
            existing.contains(&DailySnapshotKey {
                date_utc: date.to_string(),
                channel_id: id.clone(),
            })
        });
    if !present.is_empty() {
        info!("{} channels already have a snapshot for {date}", present.len());
    }

    let to_fetch: Vec<String> = pending
        .iter()
        .filter(|id| !report.fetched.contains_key(*id))
        .cloned()
        .collect();
    let fetched = if to_fetch.is_empty() {
        FetchOutcome::default()
    } else {
        source.fetch_channels(&to_fetch).await?
    };

    let mut rows = Vec::with_capacity(pending.len());
    for id in &pending {
        match report.fetched.get(id).or_else(|| fetched.found.get(id)) {
            Some(item) => {
                rows.push(snapshot_row(date, item));
                references.upsert_from_channel(item, now);
            }
            None => {
                let error = fetched.error_for(id).cloned().unwrap_or_else(|| {
                    ApiError::not_found(format!("channel {id} was not returned by the API"))
                });
                if error.kind == ApiErrorKind::NotFound {
                    cache.invalidate(id);
                }
                reporter.record(error.kind.into(), Some(id), error.message);
            }
        }
    }

    let appended = atomic_writer::append_csv(&snapshot_path, &DAILY_SNAPSHOT_HEADER, &rows)?;
    if appended > 0 {
        references.save()?;
    }
    if let Err(e) = cache.save() {
        warn!("Failed to save validation cache: {e:#}");
    }

    Ok(DailySummary {
        date: date.to_string(),
        accepted: report.accepted.len(),
        appended,
        already_present: present.len(),
        errors: 0,
        error_file: PathBuf::new(),
    })
}

fn snapshot_row(date: &str, item: &ChannelItem) -> DailySnapshotRow {
    let stats = &item.statistics;
    DailySnapshotRow {
        date_utc: date.to_string(),
        channel_id: item.id.clone(),
        channel_title: item.snippet.title.clone().unwrap_or_default(),
        subscribers: if stats.hidden_subscriber_count {
            None
        } else {
            stats.subscriber_count
        },
        total_views: stats.view_count,
        video_count: stats.video_count,
    }
}

/// Identity keys of every row already in the snapshot file. A file that
/// cannot be read or parsed is an error: appending blind could duplicate rows.
pub fn load_daily_keys(path: &Path) -> Result<HashSet<DailySnapshotKey>> {
    let mut keys = HashSet::new();
    let is_empty = match fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to stat {}", path.display()));
        }
    };
    if is_empty {
        return Ok(keys);
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open snapshot file {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?;
    for column in ["date_utc", "channel_id"] {
        if !headers.iter().any(|h| h == column) {
            bail!("{} has no {column} column", path.display());
        }
    }

    for (line, key) in reader.deserialize::<DailySnapshotKey>().enumerate() {
        let key = key.with_context(|| format!("malformed row {} in {}", line + 2, path.display()))?;
        keys.insert(key);
    }
    Ok(keys)
}
