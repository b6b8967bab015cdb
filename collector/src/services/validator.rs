use crate::config::DataPaths;
use crate::errors::{ApiError, ApiErrorKind, ErrorKind};
use crate::models::{ChannelItem, ValidationStatus};
use crate::services::error_reporter::ErrorReporter;
use crate::services::reference_store::ReferenceTable;
use crate::services::validation_cache::ValidationCache;
use crate::services::youtube_client::MetadataSource;
use anyhow::Result;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref CHANNEL_ID_PATTERN: Regex =
        Regex::new(r"^UC[A-Za-z0-9_-]{22}$").expect("channel id pattern is valid");
}

/// Structural check only: `UC` followed by 22 URL-safe base64 characters.
pub fn is_well_formed(channel_id: &str) -> bool {
    CHANNEL_ID_PATTERN.is_match(channel_id)
}

/// Outcome of validating a channel list. Every list keeps input order.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub accepted: Vec<String>,
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
    /// Non-fatal remote failures; neither accepted nor cached this run.
    pub unresolved: Vec<(String, ApiError)>,
    /// Channels fetched while validating, reusable by the pipelines.
    pub fetched: HashMap<String, ChannelItem>,
    /// Number of ids sent to the remote existence check.
    pub remote_lookups: usize,
}

impl ValidationReport {
    pub fn record_errors(&self, reporter: &mut ErrorReporter) {
        for id in &self.invalid {
            reporter.record(
                ErrorKind::Invalid,
                Some(id),
                format!("'{id}' is not a well-formed channel id"),
            );
        }
        for id in &self.missing {
            reporter.record(
                ErrorKind::Missing,
                Some(id),
                "channel does not exist or is no longer available",
            );
        }
        for (id, error) in &self.unresolved {
            reporter.record(
                error.kind.into(),
                Some(id),
                format!("validation unresolved: {}", error.message),
            );
        }
    }
}

enum Verdict {
    Status(ValidationStatus),
    Unresolved(ApiError),
}

pub struct ChannelValidator<'a, S: MetadataSource + ?Sized> {
    source: &'a S,
    cache: &'a mut ValidationCache,
    now: DateTime<Utc>,
}

impl<'a, S: MetadataSource + ?Sized> ChannelValidator<'a, S> {
    pub fn new(source: &'a S, cache: &'a mut ValidationCache, now: DateTime<Utc>) -> Self {
        Self { source, cache, now }
    }

    pub async fn validate(&mut self, channel_id: &str) -> Result<ValidationStatus, ApiError> {
        let report = self.validate_all(&[channel_id.to_string()]).await?;
        if let Some((_, error)) = report.unresolved.into_iter().next() {
            return Err(error);
        }
        Ok(if !report.accepted.is_empty() {
            ValidationStatus::Ok
        } else if !report.missing.is_empty() {
            ValidationStatus::Missing
        } else {
            ValidationStatus::Invalid
        })
    }

    /// Validate `ids` with at most one batched remote lookup. Only a fatal
    /// remote failure is returned as `Err`.
    pub async fn validate_all(&mut self, ids: &[String]) -> Result<ValidationReport, ApiError> {
        let mut seen = HashSet::new();
        let ordered: Vec<String> = ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .map(str::to_string)
            .collect();

        let mut verdicts: HashMap<&str, Verdict> = HashMap::new();
        let mut remote: Vec<String> = Vec::new();

        for id in &ordered {
            if !is_well_formed(id) {
                self.cache.record(id, ValidationStatus::Invalid, self.now);
                verdicts.insert(id, Verdict::Status(ValidationStatus::Invalid));
            } else if self.cache.is_known_ok(id) {
                verdicts.insert(id, Verdict::Status(ValidationStatus::Ok));
            } else {
                remote.push(id.clone());
            }
        }

        let mut report = ValidationReport {
            remote_lookups: remote.len(),
            ..Default::default()
        };

        if !remote.is_empty() {
            info!("Validating {} channels remotely", remote.len());
            let mut outcome = self.source.fetch_channels(&remote).await?;

            for id in &remote {
                let verdict = if let Some(item) = outcome.found.remove(id) {
                    report.fetched.insert(id.clone(), item);
                    self.cache.record(id, ValidationStatus::Ok, self.now);
                    Verdict::Status(ValidationStatus::Ok)
                } else {
                    match outcome.error_for(id) {
                        Some(e) if e.kind == ApiErrorKind::NotFound => {
                            self.cache.record(id, ValidationStatus::Missing, self.now);
                            Verdict::Status(ValidationStatus::Missing)
                        }
                        Some(e) => Verdict::Unresolved(e.clone()),
                        None => Verdict::Unresolved(ApiError::transient(format!(
                            "no result reported for channel {id}"
                        ))),
                    }
                };
                verdicts.insert(id, verdict);
            }
        }

        for id in &ordered {
            match verdicts.remove(id.as_str()) {
                Some(Verdict::Status(ValidationStatus::Ok)) => report.accepted.push(id.clone()),
                Some(Verdict::Status(ValidationStatus::Missing)) => report.missing.push(id.clone()),
                Some(Verdict::Status(ValidationStatus::Invalid)) => report.invalid.push(id.clone()),
                Some(Verdict::Unresolved(e)) => report.unresolved.push((id.clone(), e)),
                None => {}
            }
        }

        info!(
            "Validation: {} accepted, {} missing, {} invalid, {} unresolved ({} remote lookups)",
            report.accepted.len(),
            report.missing.len(),
            report.invalid.len(),
            report.unresolved.len(),
            report.remote_lookups
        );
        Ok(report)
    }
}

/// Validate the curated channel list and persist the cache, without collecting anything.
pub async fn run_validation<S: MetadataSource + ?Sized>(
    source: &S,
    paths: &DataPaths,
    now: DateTime<Utc>,
) -> Result<ValidationReport> {
    let references = ReferenceTable::load(&paths.channels_file)?;
    let mut cache = ValidationCache::load(&paths.validation_cache());

    let report = ChannelValidator::new(source, &mut cache, now)
        .validate_all(&references.channel_ids())
        .await?;

    if let Err(e) = cache.save() {
        warn!("Failed to save validation cache: {e:#}");
    }
    info!(
        "Validated {} channels; {} entries in validation cache",
        references.len(),
        cache.len()
    );

    for id in &report.invalid {
        warn!("Invalid channel id: {id}");
    }
    for id in &report.missing {
        warn!("Missing channel: {id}");
    }
    for (id, error) in &report.unresolved {
        warn!("Unresolved channel {id}: {error}");
    }
    Ok(report)
}
