//! 异步任务轮询器：提交后轮询的任务状态机，合并多批次的图文内容片段。
//!
//! Async job poller for vendors whose generation is submit-then-poll.
//!
//! A task moves `SUBMITTED → (RUNNING)* → SUCCEEDED | FAILED | CANCELED | TIMEOUT`.
//! Every `SUCCEEDED` snapshot carries a batch of media parts that is merged into one
//! accumulator; the task only completes once the vendor also sets `finished`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ErrorContext;
use crate::transport::{bearer, HttpTransport};
use crate::{Error, Result};

/// Polling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 90,
            interval: Duration::from_secs(2),
        }
    }
}

/// Vendor task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Unknown,
}

impl TaskStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Running,
            "SUCCEEDED" => TaskStatus::Succeeded,
            "FAILED" => TaskStatus::Failed,
            "CANCELED" => TaskStatus::Canceled,
            _ => TaskStatus::Unknown,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One piece of generated media content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaPart {
    Text { text: String },
    Image { image: String },
}

impl MediaPart {
    pub fn text(text: impl Into<String>) -> Self {
        MediaPart::Text { text: text.into() }
    }

    pub fn image(image: impl Into<String>) -> Self {
        MediaPart::Image {
            image: image.into(),
        }
    }
}

/// Merge a batch into the accumulator. Returns whether anything changed.
///
/// Images are deduplicated by reference; text extends a trailing text item.
pub fn merge_parts(acc: &mut Vec<MediaPart>, batch: &[MediaPart]) -> bool {
    let mut changed = false;
    for part in batch {
        match part {
            MediaPart::Image { image } => {
                let seen = acc
                    .iter()
                    .any(|p| matches!(p, MediaPart::Image { image: i } if i == image));
                if !seen {
                    acc.push(part.clone());
                    changed = true;
                }
            }
            MediaPart::Text { text } if text.is_empty() => {}
            MediaPart::Text { text } => {
                if let Some(MediaPart::Text { text: last }) = acc.last_mut() {
                    last.push_str(text);
                } else {
                    acc.push(part.clone());
                }
                changed = true;
            }
        }
    }
    changed
}

/// Media parts under `output.choices[].message.content[]`.
pub fn extract_parts(body: &Value) -> Vec<MediaPart> {
    let Some(choices) = body.pointer("/output/choices").and_then(Value::as_array) else {
        return Vec::new();
    };
    choices
        .iter()
        .filter_map(|c| c.pointer("/message/content").and_then(Value::as_array))
        .flatten()
        .filter_map(|item| {
            if let Some(image) = item.get("image").and_then(Value::as_str) {
                Some(MediaPart::image(image))
            } else {
                item.get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(MediaPart::text)
            }
        })
        .collect()
}

/// One task query result.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub finished: bool,
    pub parts: Vec<MediaPart>,
    pub message: Option<String>,
}

impl TaskSnapshot {
    /// Read a DashScope-style task envelope.
    pub fn from_value(body: &Value) -> Self {
        Self {
            status: body
                .pointer("/output/task_status")
                .and_then(Value::as_str)
                .map(TaskStatus::parse)
                .unwrap_or(TaskStatus::Unknown),
            finished: body.pointer("/output/finished").and_then(Value::as_bool) == Some(true),
            parts: extract_parts(body),
            message: body
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        }
    }
}

/// Source of task snapshots.
#[async_trait]
pub trait TaskQuery: Send + Sync {
    async fn query(&self, task_id: &str) -> Result<TaskSnapshot>;
}

/// `GET {base}/tasks/{task_id}` with bearer auth.
#[derive(Debug, Clone)]
pub struct HttpTaskQuery {
    transport: HttpTransport,
    base_url: String,
    api_key: String,
}

impl HttpTaskQuery {
    pub fn new(transport: HttpTransport, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TaskQuery for HttpTaskQuery {
    async fn query(&self, task_id: &str) -> Result<TaskSnapshot> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let body = self.transport.get_json(&url, &bearer(&self.api_key)).await?;
        Ok(TaskSnapshot::from_value(&body))
    }
}

/// Progress reported after each query.
#[derive(Debug, Clone, PartialEq)]
pub struct PollProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    pub elapsed: Duration,
    pub status: TaskStatus,
}

/// Bounded polling loop over a [`TaskQuery`].
#[derive(Debug, Clone)]
pub struct JobPoller<Q> {
    query: Q,
    config: PollerConfig,
}

impl<Q: TaskQuery> JobPoller<Q> {
    pub fn new(query: Q) -> Self {
        Self::with_config(query, PollerConfig::default())
    }

    pub fn with_config(query: Q, config: PollerConfig) -> Self {
        Self { query, config }
    }

    /// Poll until the task finishes, fails or exhausts its attempts.
    ///
    /// `on_progress` runs after every query; `on_update` receives the accumulator
    /// whenever a batch added something.
    pub async fn poll<P, U>(&self, task_id: &str, mut on_progress: P, mut on_update: U) -> Result<Vec<MediaPart>>
    where
        P: FnMut(&PollProgress) + Send,
        U: FnMut(&[MediaPart]) + Send,
    {
        info!(task_id, max_attempts = self.config.max_attempts, "polling async task");
        let started = Instant::now();
        let mut acc: Vec<MediaPart> = Vec::new();
        let context = || ErrorContext::new().with_source(format!("task {}", task_id));

        for attempt in 1..=self.config.max_attempts {
            let snapshot = self.query.query(task_id).await?;
            debug!(task_id, attempt, status = %snapshot.status, "task status");
            on_progress(&PollProgress {
                attempt,
                max_attempts: self.config.max_attempts,
                elapsed: started.elapsed(),
                status: snapshot.status,
            });

            match snapshot.status {
                TaskStatus::Succeeded => {
                    if merge_parts(&mut acc, &snapshot.parts) {
                        on_update(&acc);
                    }
                    if snapshot.finished {
                        info!(task_id, attempt, parts = acc.len(), "async task completed");
                        return Ok(acc);
                    }
                    debug!(task_id, "partial batch; continuing");
                }
                TaskStatus::Failed => {
                    let message = snapshot.message.unwrap_or_else(|| "Task failed".to_string());
                    return Err(Error::task(message, context()));
                }
                TaskStatus::Canceled => {
                    return Err(Error::task("Task was canceled", context()));
                }
                TaskStatus::Pending | TaskStatus::Running | TaskStatus::Unknown => {}
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        Err(Error::task(
            format!("Task timeout after {} seconds", started.elapsed().as_secs_f64().round() as u64),
            context(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned snapshots; the last one repeats.
    struct Scripted(Mutex<Vec<Value>>);

    impl Scripted {
        fn new(bodies: Vec<Value>) -> Self {
            Self(Mutex::new(bodies))
        }
    }

    #[async_trait]
    impl TaskQuery for Scripted {
        async fn query(&self, _task_id: &str) -> Result<TaskSnapshot> {
            let mut bodies = self.0.lock().unwrap();
            let body = if bodies.len() > 1 { bodies.remove(0) } else { bodies[0].clone() };
            Ok(TaskSnapshot::from_value(&body))
        }
    }

    fn fast(max_attempts: u32) -> PollerConfig {
        PollerConfig {
            max_attempts,
            interval: Duration::from_millis(1),
        }
    }

    fn succeeded(finished: bool, content: Value) -> Value {
        json!({"output": {
            "task_status": "SUCCEEDED",
            "finished": finished,
            "choices": [{"message": {"content": content}}]
        }})
    }

    #[test]
    fn test_merge_dedupes_images_and_joins_text() {
        let mut acc = Vec::new();
        assert!(merge_parts(&mut acc, &[MediaPart::image("a")]));
        assert!(!merge_parts(&mut acc, &[MediaPart::image("a")]));
        assert_eq!(acc, vec![MediaPart::image("a")]);

        let mut acc = Vec::new();
        merge_parts(&mut acc, &[MediaPart::text("hi")]);
        merge_parts(&mut acc, &[MediaPart::text(" there")]);
        assert_eq!(acc, vec![MediaPart::text("hi there")]);
    }

    #[test]
    fn test_snapshot_parsing() {
        let snap = TaskSnapshot::from_value(&json!({
            "message": "quota",
            "output": {"task_status": "FAILED"}
        }));
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(!snap.finished);
        assert_eq!(snap.message.as_deref(), Some("quota"));
        assert_eq!(TaskStatus::parse("WEIRD"), TaskStatus::Unknown);
    }

    #[tokio::test]
    async fn test_partial_batches_merge_without_duplicates() {
        let poller = JobPoller::with_config(
            Scripted::new(vec![
                json!({"output": {"task_status": "RUNNING"}}),
                succeeded(false, json!([{"image": "x"}])),
                succeeded(true, json!([{"image": "x"}, {"image": "y"}])),
            ]),
            fast(10),
        );
        let mut progress = Vec::new();
        let mut updates = 0;
        let parts = poller
            .poll("t-1", |p| progress.push(p.status), |_| updates += 1)
            .await
            .unwrap();
        assert_eq!(parts, vec![MediaPart::image("x"), MediaPart::image("y")]);
        assert_eq!(
            progress,
            vec![TaskStatus::Running, TaskStatus::Succeeded, TaskStatus::Succeeded]
        );
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_failed_and_canceled_terminate() {
        let failed = JobPoller::with_config(
            Scripted::new(vec![json!({"output": {"task_status": "FAILED"}})]),
            fast(5),
        );
        let err = failed.poll("t", |_| {}, |_| {}).await.unwrap_err();
        assert_eq!(err.message(), "Task failed");
        assert_eq!(err.class(), "task");

        let canceled = JobPoller::with_config(
            Scripted::new(vec![json!({"output": {"task_status": "CANCELED"}})]),
            fast(5),
        );
        let err = canceled.poll("t", |_| {}, |_| {}).await.unwrap_err();
        assert_eq!(err.message(), "Task was canceled");
    }

    #[tokio::test]
    async fn test_attempt_budget_times_out() {
        let poller = JobPoller::with_config(
            Scripted::new(vec![json!({"output": {"task_status": "PENDING"}})]),
            fast(3),
        );
        let mut attempts = 0;
        let err = tokio_test::assert_err!(poller.poll("t", |p| attempts = p.attempt, |_| {}).await);
        assert_eq!(attempts, 3);
        assert!(err.message().starts_with("Task timeout after"));
    }
}
