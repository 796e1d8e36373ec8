use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const SESSION_STARTED: &str = "session_started";
pub const STATE_CHANGED: &str = "state_changed";
pub const PARENT_STAGED: &str = "parent_staged";
pub const GENERATION_SUBMITTED: &str = "generation_submitted";
pub const GENERATION_COMPLETED: &str = "generation_completed";
pub const GENERATION_FAILED: &str = "generation_failed";
pub const IMAGE_STORED: &str = "image_stored";
pub const STORAGE_FAILED: &str = "storage_failed";
pub const SESSION_FINISHED: &str = "session_finished";

const OMITTED: &str = "<omitted>";

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
/// - inline image data never reaches the file
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::build(Some(path.into()), session_id.into())
    }

    /// A writer that builds events but never touches the filesystem.
    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::build(None, session_id.into())
    }

    fn build(path: Option<PathBuf>, session_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                session_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, sanitize_value(&value));
        }

        let Some(path) = &self.inner.path else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Replaces `data:` URIs, signed URL queries and raw byte fields with a
/// placeholder.
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(text) if text.starts_with("data:") => Value::String(OMITTED.to_string()),
        Value::String(text) => match signed_url_base(text) {
            Some(base) => Value::String(format!("{base}?{OMITTED}")),
            None => value.clone(),
        },
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_value).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "bytes" | "image_bytes" | "b64_json") {
                    out.insert(key.clone(), Value::String(OMITTED.to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_value(row));
            }
            Value::Object(out)
        }
    }
}

/// The part before `?` of an http(s) URL whose query carries a `sig`
/// parameter.
fn signed_url_base(text: &str) -> Option<&str> {
    let lowered = text.get(..8).unwrap_or(text).to_ascii_lowercase();
    if !(lowered.starts_with("http://") || lowered.starts_with("https://"))
        || text.contains(char::is_whitespace)
    {
        return None;
    }
    let (base, query) = text.split_once('?')?;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .any(|pair| pair.split('=').next() == Some("sig"))
        .then_some(base)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
