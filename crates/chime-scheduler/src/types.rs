use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SchedulerError};

/// Separates the tag from the generated unique suffix in a wire identity.
pub const DELIMITER_TAG_UUID: char = '+';
/// Separates `tag+suffix` from the trigger timestamp in a wire identity.
pub const DELIMITER_UNIQUE_ID: char = '@';

/// Lifecycle state of a task.
///
/// `pending → running → {successful, failed}`, or `pending → skipped` when
/// the task was picked up after its max-delay window closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Successful,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Successful => "successful",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "running" => Ok(TaskState::Running),
            "successful" => Ok(TaskState::Successful),
            "failed" => Ok(TaskState::Failed),
            "skipped" => Ok(TaskState::Skipped),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// HTTP method used for the callback request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(SchedulerError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Storage identity of a task: `(trigger_at, tag, unique_id)`.
///
/// Kept structured everywhere inside the crate; the delimited form
/// `<tag>+<unique_id>@<trigger_at>` only exists on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub trigger_at: i64,
    pub tag: String,
    pub unique_id: String,
}

impl TaskKey {
    pub fn new(trigger_at: i64, tag: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            trigger_at,
            tag: tag.into(),
            unique_id: unique_id.into(),
        }
    }

    /// Return the canonical wire-format string.
    ///
    /// Format: `<tag>+<unique_id>@<trigger_at>`
    pub fn format(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.tag, DELIMITER_TAG_UUID, self.unique_id, DELIMITER_UNIQUE_ID, self.trigger_at
        )
    }

    /// Parse a fully qualified wire identity. All three components are required.
    pub fn parse(s: &str) -> Result<Self> {
        let r = TaskRef::parse(s)?;
        r.as_key().ok_or_else(|| SchedulerError::InvalidTaskId {
            id: s.to_string(),
            reason: "expected <tag>+<suffix>@<trigger_at>".to_string(),
        })
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

impl Serialize for TaskKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TaskKey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A possibly partial reference to stored tasks, as supplied by API callers.
///
/// Accepted forms:
/// - `<tag>`: every occurrence of the tag
/// - `<tag>@<trigger_at>`: every occurrence of the tag at that minute
/// - `<tag>+<suffix>@<trigger_at>`: exactly one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub tag: String,
    pub unique_id: Option<String>,
    pub trigger_at: Option<i64>,
}

impl TaskRef {
    /// Reference every occurrence of `tag`.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            unique_id: None,
            trigger_at: None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: &str| SchedulerError::InvalidTaskId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split(DELIMITER_UNIQUE_ID);
        let name = parts.next().unwrap_or_default();
        let trigger = parts.next();
        if parts.next().is_some() {
            return Err(invalid("more than one '@'"));
        }

        let trigger_at = match trigger {
            Some(t) => Some(
                t.parse::<i64>()
                    .map_err(|_| invalid("trigger_at is not a Unix timestamp"))?,
            ),
            None => None,
        };

        let (tag, unique_id) = match name.split_once(DELIMITER_TAG_UUID) {
            Some((tag, suffix)) => (tag, Some(suffix)),
            None => (name, None),
        };

        if tag.is_empty() {
            return Err(invalid("tag is empty"));
        }
        if !crate::task::is_valid_tag(tag) {
            return Err(SchedulerError::InvalidTag(tag.to_string()));
        }
        if let Some(suffix) = unique_id {
            if suffix.is_empty() || !crate::task::is_valid_tag(suffix) {
                return Err(invalid("unique suffix must be non-empty [A-Za-z0-9]"));
            }
            if trigger_at.is_none() {
                return Err(invalid("a unique suffix needs a trigger_at"));
            }
        }

        Ok(Self {
            tag: tag.to_string(),
            unique_id: unique_id.map(str::to_string),
            trigger_at,
        })
    }

    /// The full storage key, if this reference names exactly one task.
    pub fn as_key(&self) -> Option<TaskKey> {
        match (&self.unique_id, self.trigger_at) {
            (Some(unique_id), Some(trigger_at)) => {
                Some(TaskKey::new(trigger_at, self.tag.clone(), unique_id.clone()))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tag)?;
        if let Some(ref unique_id) = self.unique_id {
            write!(f, "{DELIMITER_TAG_UUID}{unique_id}")?;
        }
        if let Some(trigger_at) = self.trigger_at {
            write!(f, "{DELIMITER_UNIQUE_ID}{trigger_at}")?;
        }
        Ok(())
    }
}

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Minute-aligned Unix timestamp; primary partition key.
    pub trigger_at: i64,
    /// User-chosen name, `[A-Za-z0-9]+`. Not unique on its own.
    pub tag: String,
    /// Generated suffix (UUID v4, no hyphens).
    pub unique_id: String,
    /// Absolute http(s) URL called when the task fires.
    pub callback: String,
    pub callback_method: HttpMethod,
    /// Request body sent verbatim.
    pub payload: String,
    /// Maximum number of callback attempts.
    pub retry: u32,
    pub expected_http_status: u16,
    /// Minutes after `trigger_at` during which the task may still start.
    pub max_delay: u32,
    pub task_state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Unix seconds at which the final attempt finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<i64>,
}

impl Task {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.trigger_at, self.tag.clone(), self.unique_id.clone())
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.key(), self.callback)
    }
}

/// Body of a create request. Optional fields fall back to the documented
/// defaults in [`CreateTaskRequest::set_defaults`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateTaskRequest {
    /// Absolute Unix timestamp or `+<N>{m|h|d}`. JSON numbers are accepted too.
    #[serde(deserialize_with = "string_or_int")]
    pub trigger_at: String,
    pub tag: String,
    pub payload: String,
    pub callback: String,
    pub callback_method: Option<String>,
    pub retry: Option<i64>,
    pub expected_http_status: Option<u16>,
    pub max_delay: Option<i64>,
}

fn string_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
