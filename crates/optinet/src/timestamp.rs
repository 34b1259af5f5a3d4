// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device timestamp normalization.
//!
//! Devices report event time in several shapes: epoch seconds, epoch
//! milliseconds, or ISO-8601 strings with or without an offset. Everything
//! is normalized to epoch milliseconds, which is the score used by the
//! history series.
//!
//! # Rules
//!
//! - Numbers greater than `1e12` are already milliseconds; anything else is
//!   seconds (fractions allowed).
//! - Strings holding a number follow the numeric rule.
//! - ISO-8601 strings without an offset are taken as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Threshold above which a numeric timestamp is read as milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Timestamp normalization failure.
#[derive(Debug, Error, PartialEq)]
pub enum TimestampError {
    #[error("Unrecognized timestamp format: {0:?}")]
    Unrecognized(String),

    #[error("Timestamp out of range: {0}")]
    OutOfRange(String),
}

/// A timestamp as reported by a device or supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Epoch seconds or milliseconds.
    Integer(i64),
    /// Epoch seconds or milliseconds with a fractional part.
    Float(f64),
    /// ISO-8601 text (or any non-numeric text reported by the device).
    Text(String),
}

impl Timestamp {
    /// Server time as an RFC 3339 string, used when a reply carries no time.
    pub fn now() -> Self {
        Timestamp::Text(Utc::now().to_rfc3339())
    }

    /// Normalize to epoch milliseconds.
    pub fn to_epoch_millis(&self) -> Result<i64, TimestampError> {
        match self {
            Timestamp::Integer(n) => Ok(integer_to_millis(*n)),
            Timestamp::Float(f) => float_to_millis(*f),
            Timestamp::Text(s) => text_to_millis(s),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Integer(n) => write!(f, "{}", n),
            Timestamp::Float(v) => write!(f, "{}", v),
            Timestamp::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Timestamp::Integer(value)
    }
}

impl From<&str> for Timestamp {
    fn from(value: &str) -> Self {
        Timestamp::Text(value.to_string())
    }
}

fn integer_to_millis(n: i64) -> i64 {
    if n > MILLIS_THRESHOLD {
        n
    } else {
        n.saturating_mul(1000)
    }
}

fn float_to_millis(f: f64) -> Result<i64, TimestampError> {
    if !f.is_finite() {
        return Err(TimestampError::OutOfRange(f.to_string()));
    }
    if f > MILLIS_THRESHOLD as f64 {
        Ok(f as i64)
    } else {
        Ok((f * 1000.0) as i64)
    }
}

fn text_to_millis(raw: &str) -> Result<i64, TimestampError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(TimestampError::Unrecognized(raw.to_string()));
    }

    if let Ok(n) = s.parse::<i64>() {
        return Ok(integer_to_millis(n));
    }
    if let Ok(f) = s.parse::<f64>() {
        return float_to_millis(f);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.timestamp_millis());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }

    Err(TimestampError::Unrecognized(raw.to_string()))
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render epoch milliseconds in the configured display offset with
/// millisecond precision (`2023-11-14T22:13:20.000`).
pub fn format_local(epoch_ms: i64, offset: FixedOffset) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => dt
            .with_timezone(&offset)
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string(),
        None => String::new(),
    }
}
