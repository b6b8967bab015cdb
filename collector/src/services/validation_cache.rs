use crate::models::{CacheEntry, ValidationStatus, CACHE_HEADER};
use crate::services::atomic_writer;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Durable `channel_id -> status` map that spares remote validation calls.
///
/// Advisory only: losing or corrupting the file costs API quota, never correctness.
pub struct ValidationCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl ValidationCache {
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: HashMap::new(),
        }
    }

    /// Load the cache at `path`. A missing or unreadable file yields an empty cache.
    pub fn load(path: &Path) -> Self {
        let mut cache = Self::empty(path);

        if !path.exists() {
            debug!("No validation cache at {}", path.display());
            return cache;
        }

        let mut reader = match csv::Reader::from_path(path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(
                    "Ignoring unreadable validation cache {}: {e}",
                    path.display()
                );
                return cache;
            }
        };

        let mut skipped = 0;
        for entry in reader.deserialize::<CacheEntry>() {
            match entry {
                Ok(entry) => {
                    cache.entries.insert(entry.channel_id.clone(), entry);
                }
                Err(e) => {
                    skipped += 1;
                    debug!("Skipping validation cache row: {e}");
                }
            }
        }
        if skipped > 0 {
            warn!(
                "Skipped {skipped} malformed rows in validation cache {}",
                path.display()
            );
        }

        info!(
            "Loaded {} validation cache entries from {}",
            cache.entries.len(),
            path.display()
        );
        cache
    }

    pub fn get(&self, channel_id: &str) -> Option<&CacheEntry> {
        self.entries.get(channel_id)
    }

    pub fn is_known_ok(&self, channel_id: &str) -> bool {
        matches!(
            self.get(channel_id),
            Some(CacheEntry {
                status: ValidationStatus::Ok,
                ..
            })
        )
    }

    pub fn record(&mut self, channel_id: &str, status: ValidationStatus, checked_at: DateTime<Utc>) {
        self.entries.insert(
            channel_id.to_string(),
            CacheEntry {
                channel_id: channel_id.to_string(),
                status,
                last_checked: checked_at,
            },
        );
    }

    /// Drop an entry so the next validation goes remote. Returns whether it existed.
    pub fn invalidate(&mut self, channel_id: &str) -> bool {
        let removed = self.entries.remove(channel_id).is_some();
        if removed {
            info!("Invalidated validation cache entry for {channel_id}");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let mut rows: Vec<&CacheEntry> = self.entries.values().collect();
        rows.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        atomic_writer::write_csv(&self.path, &CACHE_HEADER, &rows)?;
        debug!("Saved {} validation cache entries", rows.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn missing_file_gives_empty_cache() {
        let dir = TempDir::new().unwrap();
        let cache = ValidationCache::load(&dir.path().join("validation_cache.csv"));
        assert!(cache.is_empty());
    }

    #[test]
    fn saved_entries_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("validation_cache.csv");

        let mut cache = ValidationCache::load(&path);
        cache.record("UCbbbbbbbbbbbbbbbbbbbbbb", ValidationStatus::Missing, ts());
        cache.record("UCaaaaaaaaaaaaaaaaaaaaaa", ValidationStatus::Ok, ts());
        cache.save().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "channel_id,status,last_checked\n\
             UCaaaaaaaaaaaaaaaaaaaaaa,ok,2025-06-01T12:00:00Z\n\
             UCbbbbbbbbbbbbbbbbbbbbbb,missing,2025-06-01T12:00:00Z\n"
        );

        let reloaded = ValidationCache::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.is_known_ok("UCaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(!reloaded.is_known_ok("UCbbbbbbbbbbbbbbbbbbbbbb"));
        assert_eq!(reloaded.get("UCaaaaaaaaaaaaaaaaaaaaaa").unwrap().last_checked, ts());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("validation_cache.csv");
        fs::write(
            &path,
            "channel_id,status,last_checked\n\
             UCaaaaaaaaaaaaaaaaaaaaaa,ok,2025-06-01T12:00:00Z\n\
             UCbbbbbbbbbbbbbbbbbbbbbb,maybe,2025-06-01T12:00:00Z\n\
             garbage\n",
        )
        .unwrap();

        let cache = ValidationCache::load(&path);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_known_ok("UCaaaaaaaaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn invalidate_forgets_entry() {
        let dir = TempDir::new().unwrap();
        let mut cache = ValidationCache::empty(&dir.path().join("c.csv"));
        cache.record("UCaaaaaaaaaaaaaaaaaaaaaa", ValidationStatus::Ok, ts());

        assert!(cache.invalidate("UCaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(!cache.is_known_ok("UCaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(!cache.invalidate("UCaaaaaaaaaaaaaaaaaaaaaa"));
    }
}
