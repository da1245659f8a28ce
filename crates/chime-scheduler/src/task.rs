use chime_core::clock::SECONDS_PER_MINUTE;
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    schedule::normalize_trigger_at,
    types::{CreateTaskRequest, HttpMethod, Task, TaskState},
};

pub const DEFAULT_RETRY: u32 = 1;
pub const DEFAULT_EXPECTED_HTTP_STATUS: u16 = 200;
pub const DEFAULT_MAX_DELAY_MINS: u32 = 10;
/// Stored response bodies are cut to this many bytes.
pub const MAX_RESPONSE_BYTES: usize = 256;

/// True when `s` only contains `[A-Za-z0-9]`. The empty string qualifies;
/// callers that need a non-empty tag check that separately.
pub fn is_valid_tag(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub fn validate_tag(tag: &str) -> Result<()> {
    if is_valid_tag(tag) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidTag(tag.to_string()))
    }
}

fn validate_callback(url: &str) -> Result<()> {
    let invalid = |reason: &str| SchedulerError::InvalidCallbackUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = reqwest::Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme {other}"))),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

fn non_negative(value: Option<i64>, field: &'static str) -> Result<Option<u32>> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(SchedulerError::NegativeField { field }),
        Some(v) => u32::try_from(v)
            .map(Some)
            .map_err(|_| SchedulerError::NegativeField { field }),
    }
}

impl CreateTaskRequest {
    /// Fill unset optional fields: GET, one attempt, expect 200, ten minutes
    /// of grace.
    ///
    /// A zero retry or expected status counts as unset, since no request can
    /// be sent zero times and no response carries status 0. A zero max delay
    /// is a usable window (fire within the trigger minute or not at all), so
    /// it is kept; only an absent `max_delay` gets the default.
    pub fn set_defaults(&mut self) {
        if self.callback_method.as_deref().map_or(true, str::is_empty) {
            self.callback_method = Some(HttpMethod::Get.to_string());
        }
        if self.retry.map_or(true, |r| r == 0) {
            self.retry = Some(DEFAULT_RETRY as i64);
        }
        if self.expected_http_status.map_or(true, |s| s == 0) {
            self.expected_http_status = Some(DEFAULT_EXPECTED_HTTP_STATUS);
        }
        if self.max_delay.is_none() {
            self.max_delay = Some(DEFAULT_MAX_DELAY_MINS as i64);
        }
    }

    /// Check the request without touching the trigger spec.
    pub fn validate(&self) -> Result<()> {
        if self.tag.is_empty() {
            return Err(SchedulerError::IncompleteTask { field: "tag" });
        }
        if self.trigger_at.is_empty() {
            return Err(SchedulerError::IncompleteTask { field: "trigger_at" });
        }
        if self.callback.is_empty() {
            return Err(SchedulerError::IncompleteTask { field: "callback" });
        }
        if let Some(ref method) = self.callback_method {
            if !method.is_empty() {
                method.parse::<HttpMethod>()?;
            }
        }
        validate_tag(&self.tag)?;
        validate_callback(&self.callback)?;
        non_negative(self.retry, "retry")?;
        non_negative(self.max_delay, "max_delay")?;
        Ok(())
    }
}

impl Task {
    /// Validate `req`, apply defaults, resolve the trigger spec against `now`
    /// and mint a fresh unique suffix. The result is `pending`.
    pub fn from_request(mut req: CreateTaskRequest, now: i64) -> Result<Self> {
        req.validate()?;
        let trigger_at = normalize_trigger_at(&req.trigger_at, now)?;
        req.set_defaults();

        let callback_method = match req.callback_method.as_deref() {
            Some(m) => m.parse()?,
            None => HttpMethod::default(),
        };
        let retry = non_negative(req.retry, "retry")?.unwrap_or(DEFAULT_RETRY);
        let max_delay = non_negative(req.max_delay, "max_delay")?.unwrap_or(DEFAULT_MAX_DELAY_MINS);

        Ok(Self {
            trigger_at,
            tag: req.tag,
            unique_id: Uuid::new_v4().simple().to_string(),
            callback: req.callback,
            callback_method,
            payload: req.payload,
            retry,
            expected_http_status: req
                .expected_http_status
                .unwrap_or(DEFAULT_EXPECTED_HTTP_STATUS),
            max_delay,
            task_state: TaskState::Pending,
            response_status: None,
            response_body: None,
            executed_at: None,
        })
    }

    /// Whether the grace window after `trigger_at` has closed at `now_minute`.
    pub fn is_past_max_delay(&self, now_minute: i64) -> bool {
        let deadline = self
            .trigger_at
            .saturating_add(i64::from(self.max_delay) * SECONDS_PER_MINUTE);
        now_minute > deadline
    }

    /// Store the outcome of the callback and settle the final state.
    pub fn record_response(&mut self, status: Option<u16>, body: &[u8], executed_at: i64) {
        self.task_state = if status == Some(self.expected_http_status) {
            TaskState::Successful
        } else {
            TaskState::Failed
        };
        self.response_status = status;
        self.response_body = Some(truncate_response(body));
        self.executed_at = Some(executed_at);
    }

    /// A copy moved to `trigger_at`, same suffix and request fields, ready
    /// to run again.
    pub fn rescheduled(&self, trigger_at: i64) -> Self {
        Self {
            trigger_at,
            task_state: TaskState::Pending,
            response_status: None,
            response_body: None,
            executed_at: None,
            ..self.clone()
        }
    }
}

/// Keep at most [`MAX_RESPONSE_BYTES`] of `body`, never splitting a UTF-8
/// sequence. Invalid bytes are replaced.
pub fn truncate_response(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_RESPONSE_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_RESPONSE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
