//! Backend configuration
//!
//! Passed through `provision`/`open` to the backend. Durations are expressed
//! in seconds so the struct deserializes directly from the JSON objects that
//! callers already keep in their own config files:
//!
//! ```json
//! {"max_connections": 4, "connect_timeout": 2.5, "max_sessions": 16}
//! ```
//!
//! Keys this struct does not know are kept in [`BackendConfig::extra`] and
//! handed to the backend untouched.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Longest duration a config key accepts: one year.
pub const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_connections: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    /// Seconds to wait for a pooled connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<f64>,
    /// Seconds an idle pooled connection is kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle: Option<f64>,
    /// Seconds after which a pooled connection is retired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lifetime: Option<f64>,
    /// Upper bound on concurrently open sessions for one store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON config object.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::input(format!("Invalid backend config: {e}")).with_source(e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = Some(min);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_max_idle(mut self, idle: Duration) -> Self {
        self.max_idle = Some(idle.as_secs_f64());
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime.as_secs_f64());
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == Some(0) {
            return Err(Error::input("max_connections must be at least 1"));
        }
        if let (Some(min), Some(max)) = (self.min_connections, self.max_connections) {
            if min > max {
                return Err(Error::input(format!(
                    "min_connections ({min}) exceeds max_connections ({max})"
                )));
            }
        }
        if self.max_sessions == Some(0) {
            return Err(Error::input("max_sessions must be at least 1"));
        }
        for (name, secs) in [
            ("connect_timeout", self.connect_timeout),
            ("max_idle", self.max_idle),
            ("max_lifetime", self.max_lifetime),
        ] {
            if let Some(secs) = secs {
                if !(0.0..=MAX_DURATION_SECS).contains(&secs) {
                    return Err(Error::input(format!(
                        "{name} must be between 0 and {MAX_DURATION_SECS} seconds, got {secs}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// `None` when unset or out of range; [`validate`](Self::validate)
    /// reports the latter.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.and_then(seconds)
    }

    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle.and_then(seconds)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime.and_then(seconds)
    }
}

fn seconds(secs: f64) -> Option<Duration> {
    if secs > MAX_DURATION_SECS {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

/// How a backend lays out tag data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaConfig {
    /// One shared tag table for every category
    #[default]
    Generic,
    /// Per-category tables
    Normalize,
}

impl SchemaConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaConfig::Generic => "generic",
            SchemaConfig::Normalize => "normalize",
        }
    }
}

impl fmt::Display for SchemaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "generic" => Ok(SchemaConfig::Generic),
            "normalize" => Ok(SchemaConfig::Normalize),
            other => Err(Error::input(format!("Unknown schema config: {other}"))),
        }
    }
}
