use std::path::Path;

use chrono::Utc;
use h2_protocol::{MessageId, Priority};
use serde_json::{Value, json};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

use crate::errors::DaemonError;

/// Append-only JSON-lines event stream consumed by `peek`/`status` tooling
/// (§4.7 component G). One writer per agent; readers open their own handle.
pub struct ActivityLog {
    writer: Mutex<BufWriter<tokio::fs::File>>,
    actor: String,
    session_id: String,
    path: std::path::PathBuf,
}

impl ActivityLog {
    pub async fn open(path: &Path, actor: &str, session_id: &str) -> Result<Self, DaemonError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            actor: actor.to_string(),
            session_id: session_id.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Writes one record, flushed immediately — §4.7 requires each line be
    /// flushed, though not fsynced.
    async fn write_record(&self, event: &str, mut fields: Value) {
        let record = fields.as_object_mut().expect("fields must be a JSON object");
        record.insert("ts".to_string(), json!(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)));
        record.insert("actor".to_string(), json!(self.actor));
        record.insert("session_id".to_string(), json!(self.session_id));
        record.insert("event".to_string(), json!(event));

        let line = serde_json::to_string(&fields).expect("activity record always serializes");
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(line.as_bytes()).await;
        let _ = writer.write_all(b"\n").await;
        let _ = writer.flush().await;
    }

    pub async fn log_session_started(&self) {
        self.write_record("session_started", json!({})).await;
    }

    pub async fn log_session_ended(&self) {
        self.write_record("session_ended", json!({})).await;
    }

    pub async fn log_turn_completed(&self) {
        self.write_record("turn_completed", json!({})).await;
    }

    pub async fn log_state_change(&self, from: &str, to: &str) {
        self.write_record("state_change", json!({"from": from, "to": to})).await;
    }

    pub async fn log_message_enqueued(&self, id: &MessageId, priority: Priority) {
        self.write_record(
            "message_enqueued",
            json!({"id": id.as_ref(), "priority": priority.to_string()}),
        )
        .await;
    }

    pub async fn log_message_delivered(&self, id: &MessageId, priority: Priority) {
        self.write_record(
            "message_delivered",
            json!({"id": id.as_ref(), "priority": priority.to_string()}),
        )
        .await;
    }

    pub async fn log_hook(&self, hook_event: &str, tool_name: Option<&str>) {
        let mut fields = json!({"hook_event": hook_event});
        if let Some(tool_name) = tool_name {
            fields["tool_name"] = json!(tool_name);
        }
        self.write_record("hook", fields).await;
    }

    pub async fn log_permission_decision(&self, tool_name: &str, decision: &str) {
        self.write_record(
            "permission_decision",
            json!({"tool_name": tool_name, "decision": decision}),
        )
        .await;
    }

    /// Not named in §3's kind list — a supplemental robustness signal
    /// carried because the daemon needs to record hung-child detection
    /// somewhere auditable, in the same record shape as every other kind.
    pub async fn log_agent_hung(&self) {
        self.write_record("child_hung", json!({})).await;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads the last `n` lines of an activity log, formatting them with
/// relative timestamps and truncating long bodies with a trailing `...`
/// (§4.7 peek contract). Opens its own handle — no shared state with any
/// live `ActivityLog` writer.
pub async fn peek(path: &Path, n: usize, max_body_chars: usize) -> Result<Vec<String>, DaemonError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file).lines();
    let mut all = Vec::new();
    while let Some(line) = reader.next_line().await? {
        all.push(line);
    }

    let tail_start = all.len().saturating_sub(n);
    let now = Utc::now();
    let mut formatted = Vec::with_capacity(all.len() - tail_start);
    for line in &all[tail_start..] {
        formatted.push(format_peek_line(line, now, max_body_chars));
    }
    Ok(formatted)
}

fn format_peek_line(line: &str, now: chrono::DateTime<Utc>, max_body_chars: usize) -> String {
    let Ok(record) = serde_json::from_str::<Value>(line) else {
        return line.to_string();
    };
    let event = record.get("event").and_then(Value::as_str).unwrap_or("unknown");
    let relative = record
        .get("ts")
        .and_then(Value::as_str)
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| format_relative(now - ts.with_timezone(&Utc)))
        .unwrap_or_else(|| "?".to_string());

    let mut summary = format!("{relative} {event}");
    if let Some(body) = record.get("body").and_then(Value::as_str) {
        summary.push(' ');
        summary.push_str(&truncate_with_ellipsis(body, max_body_chars));
    }
    summary
}

fn format_relative(delta: chrono::TimeDelta) -> String {
    let secs = delta.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_and_peek_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-activity.jsonl");
        let log = ActivityLog::open(&path, "a1", "s1").await.unwrap();
        log.log_session_started().await;
        log.log_state_change("starting", "idle").await;

        let lines = peek(&path, 10, 80).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("session_started"));
        assert!(lines[1].contains("state_change"));
    }

    #[tokio::test]
    async fn test_peek_respects_n() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-activity.jsonl");
        let log = ActivityLog::open(&path, "a1", "s1").await.unwrap();
        for _ in 0..5 {
            log.log_turn_completed().await;
        }
        let lines = peek(&path, 2, 80).await.unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn test_peek_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.jsonl");
        let lines = peek(&path, 10, 80).await.unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
    }

    #[test]
    fn test_format_relative_buckets() {
        assert_eq!(format_relative(chrono::TimeDelta::seconds(5)), "5s ago");
        assert_eq!(format_relative(chrono::TimeDelta::seconds(125)), "2m ago");
        assert_eq!(format_relative(chrono::TimeDelta::seconds(7200)), "2h ago");
    }

    #[tokio::test]
    async fn test_required_keys_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-activity.jsonl");
        let log = ActivityLog::open(&path, "a1", "s1").await.unwrap();
        log.log_session_started().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let record: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        for key in ["ts", "actor", "session_id", "event"] {
            assert!(record.get(key).is_some(), "missing key {key}");
        }
    }
}
