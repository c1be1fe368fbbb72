// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoded syslog records and their wire envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SerializationError;

const FACILITY_NAMES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "ntp", "security", "console", "solaris-cron", "local0", "local1", "local2", "local3",
    "local4", "local5", "local6", "local7",
];

const SEVERITY_NAMES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

/// One decoded syslog message.
///
/// Serializes to a flat JSON object keyed by field name, which is the payload published to
/// Kafka.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub priority: u8,
    pub facility: u8,
    pub severity: u8,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub tag: String,
    pub content: String,
    /// Address of the peer that sent the frame.
    pub client: String,
}

impl LogRecord {
    /// Splits a PRI value into its facility and severity parts.
    #[must_use]
    pub fn split_priority(priority: u8) -> (u8, u8) {
        (priority / 8, priority % 8)
    }

    #[must_use]
    pub fn facility_name(&self) -> &'static str {
        FACILITY_NAMES
            .get(usize::from(self.facility))
            .copied()
            .unwrap_or("unknown")
    }

    #[must_use]
    pub fn severity_name(&self) -> &'static str {
        SEVERITY_NAMES
            .get(usize::from(self.severity))
            .copied()
            .unwrap_or("unknown")
    }
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}.{} {} {}: {}",
            self.timestamp.to_rfc3339(),
            self.facility_name(),
            self.severity_name(),
            self.hostname,
            self.tag,
            self.content
        )
    }
}

/// JSON encoding of a [`LogRecord`], consumed once by a publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope(Vec<u8>);

impl Envelope {
    pub fn encode(record: &LogRecord) -> Result<Self, SerializationError> {
        Ok(Self(serde_json::to_vec(record)?))
    }

    pub fn decode(&self) -> Result<LogRecord, SerializationError> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The envelope as text. Always valid UTF-8 since it is produced by `serde_json`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
