//! Job records and their wire encoding
//!
//! A job is stored as a flat field map. Scalars are UTF-8 text, structured
//! fields are JSON; this is the only encoding used across the process
//! boundary.

use crate::config::{Config, QueueConfig};
use crate::crawler::{CrawlTarget, FetchOutcome};
use crate::QueueError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a job; `Succeeded` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Parses raw status bytes, replacing invalid UTF-8 sequences first
    pub fn from_bytes_lossy(bytes: &[u8]) -> Option<Self> {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue-level retry policy: how many times a failed job is re-run, and
/// how long after each failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    pub interval_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max: config.max_task_retries,
            interval_secs: config.task_retry_interval_secs,
        }
    }
}

/// Everything a worker process needs without reading shared state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    pub config: Config,
    pub config_hash: String,
}

/// Caller-side reference to a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub target: CrawlTarget,
}

/// The queue's record of one job
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub target: CrawlTarget,
    pub retry: RetryPolicy,
    pub meta: JobMeta,
    pub status: JobStatus,
    /// Executions started so far
    pub attempts: u32,
    /// Execution budget enforced inside the job process
    pub timeout_secs: u64,
    pub submitted_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<FetchOutcome>,
    pub error: Option<String>,
}

impl JobRecord {
    /// Creates a queued job with a fresh UUID v4 id
    pub fn new(
        target: CrawlTarget,
        retry: RetryPolicy,
        meta: JobMeta,
        timeout_secs: u64,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target,
            retry,
            meta,
            status: JobStatus::Queued,
            attempts: 0,
            timeout_secs,
            submitted_at,
            ended_at: None,
            result: None,
            error: None,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id.clone(),
            target: self.target.clone(),
        }
    }

    /// True while another execution is allowed after a failed one
    pub fn can_retry(&self) -> bool {
        self.attempts <= self.retry.max
    }

    /// Encodes the record as store fields
    pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>, QueueError> {
        Ok(vec![
            ("id", self.id.clone()),
            ("status", self.status.as_str().to_string()),
            ("target", encode_json(&self.id, &self.target)?),
            ("retry", encode_json(&self.id, &self.retry)?),
            ("meta", encode_json(&self.id, &self.meta)?),
            ("attempts", self.attempts.to_string()),
            ("timeout", self.timeout_secs.to_string()),
            ("submitted_at", self.submitted_at.to_rfc3339()),
            (
                "ended_at",
                self.ended_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            ),
            (
                "result",
                match &self.result {
                    Some(outcome) => encode_json(&self.id, outcome)?,
                    None => String::new(),
                },
            ),
            ("error", self.error.clone().unwrap_or_default()),
        ])
    }

    /// Decodes a record from raw store fields
    ///
    /// Any field that is not valid UTF-8 or does not parse is a
    /// [`QueueError::Decode`]; an empty map is [`QueueError::JobNotFound`].
    pub fn from_fields(id: &str, fields: &HashMap<String, Vec<u8>>) -> Result<Self, QueueError> {
        if fields.is_empty() {
            return Err(QueueError::JobNotFound(id.to_string()));
        }

        let decode = |message: String| QueueError::Decode {
            id: id.to_string(),
            message,
        };
        let text = |name: &str| field_text(id, fields, name);
        let optional = |name: &str| optional_text(id, fields, name);

        let raw_status = text("status")?;
        let status = JobStatus::parse(raw_status)
            .ok_or_else(|| decode(format!("unknown status '{}'", raw_status)))?;

        let parse_time = |name: &str, raw: &str| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| decode(format!("field '{}': {}", name, e)))
        };

        Ok(Self {
            id: text("id")?.to_string(),
            target: decode_json(id, "target", text("target")?)?,
            retry: decode_json(id, "retry", text("retry")?)?,
            meta: decode_json(id, "meta", text("meta")?)?,
            status,
            attempts: parse_field(id, "attempts", text("attempts")?)?,
            timeout_secs: parse_field(id, "timeout", text("timeout")?)?,
            submitted_at: parse_time("submitted_at", text("submitted_at")?)?,
            ended_at: optional("ended_at")?
                .map(|raw| parse_time("ended_at", raw))
                .transpose()?,
            result: optional("result")?
                .map(|raw| decode_json(id, "result", raw))
                .transpose()?,
            error: optional("error")?.map(String::from),
        })
    }
}

fn parse_field<T>(id: &str, name: &str, raw: &str) -> Result<T, QueueError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>().map_err(|e| QueueError::Decode {
        id: id.to_string(),
        message: format!("field '{}': {}", name, e),
    })
}

fn field_text<'a>(
    id: &str,
    fields: &'a HashMap<String, Vec<u8>>,
    name: &str,
) -> Result<&'a str, QueueError> {
    let bytes = fields.get(name).ok_or_else(|| QueueError::Decode {
        id: id.to_string(),
        message: format!("missing field '{}'", name),
    })?;
    std::str::from_utf8(bytes).map_err(|e| QueueError::Decode {
        id: id.to_string(),
        message: format!("field '{}': {}", name, e),
    })
}

/// An absent or empty field decodes as `None`
fn optional_text<'a>(
    id: &str,
    fields: &'a HashMap<String, Vec<u8>>,
    name: &str,
) -> Result<Option<&'a str>, QueueError> {
    if !fields.contains_key(name) {
        return Ok(None);
    }
    field_text(id, fields, name).map(|s| Some(s).filter(|s| !s.is_empty()))
}

fn encode_json<T: Serialize>(id: &str, value: &T) -> Result<String, QueueError> {
    serde_json::to_string(value).map_err(|e| QueueError::Decode {
        id: id.to_string(),
        message: e.to_string(),
    })
}

fn decode_json<T: DeserializeOwned>(id: &str, name: &str, raw: &str) -> Result<T, QueueError> {
    serde_json::from_str(raw).map_err(|e| QueueError::Decode {
        id: id.to_string(),
        message: format!("field '{}': {}", name, e),
    })
}

/// Raw field map as a store returns it
pub fn fields_to_raw(fields: &[(&'static str, String)]) -> HashMap<String, Vec<u8>> {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
        .collect()
}
