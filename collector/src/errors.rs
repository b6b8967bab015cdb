use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed exchange with the YouTube Data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    Transient,
    RateLimited,
    NotFound,
    InvalidRequest,
    Fatal,
}

impl ApiErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ApiErrorKind::Transient | ApiErrorKind::RateLimited)
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ErrorKind::from(*self).as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transient, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::RateLimited, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidRequest, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Fatal, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ApiErrorKind::Fatal
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Kind column of an error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Invalid,
    Missing,
    Transient,
    RateLimited,
    NotFound,
    InvalidRequest,
    Fatal,
    /// Upstream payload lacks a field the pipeline needs.
    Data,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Invalid => "invalid",
            ErrorKind::Missing => "missing",
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Data => "data",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ApiErrorKind> for ErrorKind {
    fn from(kind: ApiErrorKind) -> Self {
        match kind {
            ApiErrorKind::Transient => ErrorKind::Transient,
            ApiErrorKind::RateLimited => ErrorKind::RateLimited,
            ApiErrorKind::NotFound => ErrorKind::NotFound,
            ApiErrorKind::InvalidRequest => ErrorKind::InvalidRequest,
            ApiErrorKind::Fatal => ErrorKind::Fatal,
        }
    }
}
