use crate::services::retry::RetryPolicy;
use crate::services::video_snapshot::SelectionConfig;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Locations of every file a run reads or writes.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub channels_file: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: &Path, channels_file: Option<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            channels_file: channels_file
                .unwrap_or_else(|| data_dir.join("channels_reference.csv")),
        }
    }

    pub fn daily_snapshots(&self) -> PathBuf {
        self.data_dir.join("youtube_daily_snapshots.csv")
    }

    pub fn daily_errors(&self, date: &str) -> PathBuf {
        self.data_dir
            .join("errors")
            .join(format!("daily_errors_{date}.csv"))
    }

    pub fn monthly_videos(&self, month: &str) -> PathBuf {
        self.data_dir
            .join(format!("youtube_monthly_videos_{month}.csv"))
    }

    pub fn monthly_errors(&self, month: &str) -> PathBuf {
        self.data_dir
            .join("errors")
            .join(format!("monthly_errors_{month}.csv"))
    }

    pub fn validation_cache(&self) -> PathBuf {
        self.data_dir.join("validation_cache.csv")
    }
}

#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub data_dir: PathBuf,
    /// Defaults to `channels_reference.csv` inside `data_dir`.
    pub channels_file: Option<PathBuf>,
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub selection: SelectionConfig,
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = lookup("YOUTUBE_API_KEY").filter(|k| !k.trim().is_empty());
        let api_base = lookup("YOUTUBE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let channels_file = lookup("CHANNELS_FILE").map(PathBuf::from);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(lookup("RETRY_MAX_ATTEMPTS"), defaults.max_attempts).max(1),
            initial_backoff: Duration::from_millis(parse_or(
                lookup("RETRY_INITIAL_BACKOFF_MS"),
                defaults.initial_backoff.as_millis() as u64,
            )),
            max_backoff: Duration::from_millis(parse_or(
                lookup("RETRY_MAX_BACKOFF_MS"),
                defaults.max_backoff.as_millis() as u64,
            )),
            max_elapsed: Duration::from_secs(parse_or(
                lookup("RETRY_MAX_ELAPSED_SECS"),
                defaults.max_elapsed.as_secs(),
            )),
            jitter_percent: parse_or(lookup("RETRY_JITTER_PERCENT"), defaults.jitter_percent),
            ..defaults
        };

        let selection_defaults = SelectionConfig::default();
        let selection = SelectionConfig {
            recent_n: parse_or(lookup("VIDEO_RECENT_COUNT"), selection_defaults.recent_n),
            top_n: parse_or(lookup("VIDEO_TOP_COUNT"), selection_defaults.top_n),
            window_months: parse_or(
                lookup("VIDEO_TOP_WINDOW_MONTHS"),
                selection_defaults.window_months,
            ),
            pool_size: parse_or(lookup("VIDEO_POOL_SIZE"), selection_defaults.pool_size),
        };

        Self {
            api_key,
            api_base,
            data_dir,
            channels_file,
            concurrency: parse_or(lookup("FETCH_CONCURRENCY"), 4usize).max(1),
            request_timeout: Duration::from_secs(parse_or(lookup("REQUEST_TIMEOUT_SECS"), 30)),
            retry,
            selection,
        }
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.data_dir, self.channels_file.clone())
    }
}

/// `RUST_LOG` wins over `level` when set.
pub fn init_logger(level: LevelFilter) {
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
    info!("Starting channel collector v{}", env!("CARGO_PKG_VERSION"));
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}
