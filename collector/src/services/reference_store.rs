use crate::models::{ChannelItem, ChannelReference, REFERENCE_HEADER};
use crate::services::atomic_writer;
use crate::utils::{channel_url, format_timestamp, parse_timestamp};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The curated channel list, enriched in place: one row per `channel_id`, in
/// order of first mention.
pub struct ReferenceTable {
    path: PathBuf,
    rows: Vec<ChannelReference>,
    index: HashMap<String, usize>,
}

impl ReferenceTable {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("failed to open channel list {}", path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header of {}", path.display()))?;
        if !headers.iter().any(|h| h == "channel_id") {
            bail!("{} has no channel_id column", path.display());
        }

        let mut table = Self {
            path: path.to_path_buf(),
            rows: Vec::new(),
            index: HashMap::new(),
        };

        for (line, row) in reader.deserialize::<ChannelReference>().enumerate() {
            let row = row.with_context(|| {
                format!("malformed row {} in {}", line + 2, path.display())
            })?;
            if row.channel_id.is_empty() {
                continue;
            }
            if table.index.contains_key(&row.channel_id) {
                warn!(
                    "Duplicate channel_id {} in {}; keeping the first row",
                    row.channel_id,
                    path.display()
                );
                continue;
            }
            table.insert(row);
        }

        info!(
            "Loaded {} channels from {}",
            table.rows.len(),
            path.display()
        );
        Ok(table)
    }

    fn insert(&mut self, row: ChannelReference) -> usize {
        let position = self.rows.len();
        self.index.insert(row.channel_id.clone(), position);
        self.rows.push(row);
        position
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.channel_id.clone()).collect()
    }

    pub fn get(&self, channel_id: &str) -> Option<&ChannelReference> {
        self.index.get(channel_id).map(|&i| &self.rows[i])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Overwrite the enrichment columns from a fetched channel. `last_seen_utc`
    /// only ever moves forward.
    pub fn upsert_from_channel(&mut self, item: &ChannelItem, seen_at: DateTime<Utc>) {
        let position = match self.index.get(&item.id) {
            Some(&i) => i,
            None => self.insert(ChannelReference {
                channel_id: item.id.clone(),
                ..Default::default()
            }),
        };
        let row = &mut self.rows[position];

        row.channel_title = item.snippet.title.clone();
        row.channel_url = Some(channel_url(&item.id));
        row.custom_url = item.snippet.custom_url.clone();
        row.country = item.snippet.country.clone();
        row.uploads_playlist_id = item.uploads_playlist_id().map(str::to_string);
        row.created_at = item.snippet.published_at.clone();

        let previous = row.last_seen_utc.as_deref().and_then(parse_timestamp);
        let last_seen = match previous {
            Some(prev) if prev > seen_at => prev,
            _ => seen_at,
        };
        row.last_seen_utc = Some(format_timestamp(last_seen));
    }

    pub fn save(&self) -> Result<()> {
        atomic_writer::write_csv(&self.path, &REFERENCE_HEADER, &self.rows)?;
        info!(
            "Reference table updated: {} channels in {}",
            self.rows.len(),
            self.path.display()
        );
        Ok(())
    }
}
