#![warn(clippy::nursery, clippy::pedantic)]

//! Contains common functions and structures used by the server and the CLI

use chrono::{DateTime, Duration, TimeZone, Utc};
use headers::{Header, HeaderName, HeaderValue};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use url::Url;

pub const API_ENDPOINT: &str = "/api";
pub const VIEW_ENDPOINT: &str = "/p";

/// Body of `POST /api/pastes`.
///
/// Values are kept as signed integers so that negative or zero inputs reach
/// [`CreatePaste::validate`] and get a readable message instead of a
/// deserialization failure.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreatePaste {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_views: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("Content is required and must be non-empty")]
    EmptyContent,
    #[error("TTL must be at least 1 second")]
    TtlTooSmall,
    #[error("TTL is too large")]
    TtlTooLarge,
    #[error("Max views must be at least 1")]
    MaxViewsTooSmall,
    #[error("Max views is too large")]
    MaxViewsTooLarge,
    #[error("Invalid input: {0}")]
    Malformed(String),
}

/// A creation request that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidPaste {
    pub content: String,
    pub ttl: Option<Duration>,
    pub max_views: Option<u32>,
}

impl CreatePaste {
    /// Checks the request before anything touches the store.
    ///
    /// # Errors
    ///
    /// Returns the first constraint the request violates.
    pub fn validate(self) -> Result<ValidPaste, InvalidInput> {
        if self.content.is_empty() {
            return Err(InvalidInput::EmptyContent);
        }

        let ttl = match self.ttl_seconds {
            None => None,
            Some(secs) if secs < 1 => return Err(InvalidInput::TtlTooSmall),
            Some(secs) => Some(Duration::try_seconds(secs).ok_or(InvalidInput::TtlTooLarge)?),
        };

        let max_views = match self.max_views {
            None => None,
            Some(views) if views < 1 => return Err(InvalidInput::MaxViewsTooSmall),
            Some(views) => Some(u32::try_from(views).map_err(|_| InvalidInput::MaxViewsTooLarge)?),
        };

        Ok(ValidPaste {
            content: self.content,
            ttl,
            max_views,
        })
    }
}

impl ValidPaste {
    /// Absolute expiry for a paste created at `now`, if it has a TTL.
    ///
    /// # Errors
    ///
    /// Fails if the TTL pushes the timestamp out of the representable range.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, InvalidInput> {
        self.ttl
            .map(|ttl| now.checked_add_signed(ttl).ok_or(InvalidInput::TtlTooLarge))
            .transpose()
    }
}

/// Response of a successful `POST /api/pastes`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatedPaste {
    pub id: String,
    pub url: String,
}

/// What a successful read hands back to the client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteView {
    pub content: String,
    pub remaining_views: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Health {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builds the shareable link for a paste. An empty base yields a relative
/// link.
#[must_use]
pub fn paste_url(base: &str, id: &str) -> String {
    format!("{}{}/{}", base.trim_end_matches('/'), VIEW_ENDPOINT, id)
}

/// Human-readable time left until `expires_at`, e.g. `3h 12m`.
#[must_use]
pub fn format_time_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = expires_at - now;
    if diff <= Duration::zero() {
        return "Expired".to_string();
    }

    let seconds = diff.num_seconds();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

lazy_static! {
    pub static ref TEST_NOW_HEADER_NAME: HeaderName = HeaderName::from_static("x-test-now-ms");
}

/// Clock override carried by a request, in milliseconds since the Unix epoch.
/// Only honoured by servers running in test mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestNow(pub DateTime<Utc>);

impl Header for TestNow {
    fn name() -> &'static HeaderName {
        &*TEST_NOW_HEADER_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        values
            .next()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(Self)
            .ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, container: &mut E) {
        container.extend(std::iter::once(HeaderValue::from(self.0.timestamp_millis())));
    }
}
