//! Response classification for the write endpoint.
//!
//! [`classify`] is a pure decision table. Logging and retry-state changes
//! belong to the caller that receives the [`Outcome`].

use super::error::ApiError;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use std::fmt;

/// Substring the server puts in the error description when a bucket is missing.
const BUCKET_NOT_FOUND_SIGNATURE: &str = "not found: bucket";

/// Non-standard header some server versions use instead of an error body.
pub const INFLUX_ERROR_HEADER: &str = "x-influx-error";

/// Generic JSON error body returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub line: Option<i32>,
    #[serde(default, rename = "maxLength")]
    pub max_length: Option<i32>,
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(line) = self.line {
            write!(f, " - line[{line}]")
        } else if let Some(max_length) = self.max_length {
            write!(f, " - maxlen[{max_length}]")
        } else {
            Ok(())
        }
    }
}

/// What the write path should do with a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Delivery acknowledged.
    Success,
    /// Payload can never succeed; log and discard.
    DropSilently { description: String },
    /// Credentials rejected.
    Unauthorized { description: String },
    /// Server overloaded. `retry_after` is the parsed `Retry-After` hint in seconds.
    Throttle { retry_after: Option<f64> },
    /// The description names a missing bucket.
    BucketMissing { description: String },
    /// Any other 4xx; retrying cannot fix it.
    ClientError { description: String },
    /// Everything else.
    ServerError { description: String },
}

/// HTTP status line as the server would print it, e.g. `"404 Not Found"`.
pub fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_str(), reason),
        None => status.as_str().to_string(),
    }
}

/// Render an error description from a response body, falling back to the
/// status line when the body is empty or not a JSON error object.
pub fn describe_error(status: StatusCode, body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(decoded) => decoded.to_string(),
        Err(_) => status_line(status),
    }
}

/// Parse a `Retry-After` header as fractional seconds.
///
/// A header that is present but unparseable counts as ten seconds; an absent
/// or empty header yields `None`.
pub fn retry_after_seconds(headers: &HeaderMap) -> Option<f64> {
    let raw = headers.get(RETRY_AFTER).filter(|v| !v.is_empty())?;
    let seconds = raw
        .to_str()
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .unwrap_or(10.0);
    Some(seconds)
}

/// Best-effort match: the API has no dedicated error code for a missing bucket.
pub fn is_bucket_not_found(description: &str) -> bool {
    description.contains(BUCKET_NOT_FOUND_SIGNATURE)
}

pub fn classify(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Outcome {
    match status.as_u16() {
        204 | 200 | 201 | 202 | 206 | 207 | 208 => return Outcome::Success,
        429 | 502 | 503 | 504 => {
            return Outcome::Throttle {
                retry_after: retry_after_seconds(headers),
            };
        }
        _ => {}
    }

    let description = describe_error(status, body);

    match status.as_u16() {
        400 | 406 | 413 | 422 => Outcome::DropSilently { description },
        401 | 403 => Outcome::Unauthorized { description },
        _ if is_bucket_not_found(&description) => Outcome::BucketMissing { description },
        _ if status.is_client_error() => Outcome::ClientError { description },
        _ => {
            let description = match headers
                .get(INFLUX_ERROR_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
            {
                Some(extra) => format!("{description}; {extra}"),
                None => description,
            };
            Outcome::ServerError { description }
        }
    }
}

/// Build the [`ApiError`] carried by non-success outcomes.
pub fn api_error(status: StatusCode, description: String) -> ApiError {
    ApiError {
        status_code: status.as_u16(),
        title: status_line(status),
        description: Some(description),
    }
}
