pub mod atomic_writer;
pub mod daily_collector;
pub mod error_reporter;
pub mod reference_store;
pub mod retry;
pub mod validation_cache;
pub mod validator;
pub mod video_snapshot;
pub mod youtube_client;

#[cfg(test)]
mod test_support;

pub use daily_collector::run_daily;
pub use validator::run_validation;
pub use video_snapshot::run_monthly;
pub use youtube_client::{HttpTransport, YouTubeClient};
