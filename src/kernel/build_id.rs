//! Build identifiers.
//!
//! An id is the local wall-clock time at construction formatted as
//! `YYYYMMDDHHMMSS`. Lexical order equals creation order at one-second
//! resolution only: two jobs created within the same second get the same id.

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

const ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Time-ordered, human-readable build identifier. Used as a path component
/// and as the log key of a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    /// Id for the current wall-clock second.
    pub fn new() -> Self {
        Self::at(&Local::now())
    }

    /// Id for an arbitrary instant.
    pub fn at<Tz: TimeZone>(time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        BuildId(time.format(ID_FORMAT).to_string())
    }

    /// Accepts exactly fourteen ASCII digits.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()) {
            Some(BuildId(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id (`YYYYMMDDHHMMSS` read as an integer).
    pub fn as_number(&self) -> u64 {
        self.0.parse().unwrap_or(0)
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BuildId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fresh build id as a plain string.
pub fn new_build_id() -> String {
    BuildId::new().0
}
