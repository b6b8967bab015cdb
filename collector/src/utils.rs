use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};

const CHANNEL_URL_PREFIX: &str = "https://www.youtube.com/channel/";

/// Canonical channel URL, independent of custom handles.
pub fn channel_url(channel_id: &str) -> String {
    format!("{CHANNEL_URL_PREFIX}{channel_id}")
}

/// `YYYY-MM-DD` key of the UTC calendar day.
pub fn date_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` key of the UTC calendar month.
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp, falling back to the legacy `%Y-%m-%d %H:%M:%S` form
/// older reference files were written with.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Number(u64),
    Text(String),
}

/// The API reports counters as decimal strings; accept strings, numbers and null.
pub fn deserialize_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(match value {
        Some(StringOrNumber::Number(n)) => Some(n),
        Some(StringOrNumber::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
