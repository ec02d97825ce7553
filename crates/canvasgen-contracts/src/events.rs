use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a generation `events.jsonl` log.
///
/// - default fields are `type`, `generation_id` (when scoped) and `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// Clones and scoped copies share one file lock, so concurrent generations can
/// log to the same file without interleaving lines.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<EventFile>,
    generation_id: Option<String>,
}

#[derive(Debug)]
struct EventFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(EventFile {
                path: path.into(),
                lock: Mutex::new(()),
            }),
            generation_id: None,
        }
    }

    /// Same file, every event tagged with `generation_id`.
    pub fn scoped(&self, generation_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            generation_id: Some(generation_id.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn generation_id(&self) -> Option<&str> {
        self.generation_id.as_deref()
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        if let Some(generation_id) = &self.generation_id {
            event.insert(
                "generation_id".to_string(),
                Value::String(generation_id.clone()),
            );
        }
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.shared.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .shared
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path).scoped("gen-123");

        let mut payload = EventPayload::new();
        payload.insert("provider".to_string(), Value::String("openai".to_string()));
        let emitted = writer.emit("generation_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("generation_started".to_string()));
        assert_eq!(parsed["generation_id"], Value::String("gen-123".to_string()));
        assert_eq!(parsed["provider"], Value::String("openai".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn unscoped_writer_omits_generation_id() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"));
        let emitted = writer.emit("providers_listed", EventPayload::new())?;
        assert!(emitted.get("generation_id").is_none());
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl")).scoped("gen-123");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        payload.insert(
            "generation_id".to_string(),
            Value::String("override-gen".to_string()),
        );
        let emitted = writer.emit("generation_started", payload)?;

        assert_eq!(emitted["type"], Value::String("override".to_string()));
        assert_eq!(
            emitted["generation_id"],
            Value::String("override-gen".to_string())
        );
        Ok(())
    }

    #[test]
    fn scoped_writers_append_to_shared_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let root = EventWriter::new(&path);

        root.scoped("a").emit("one", EventPayload::new())?;
        root.scoped("b").emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["generation_id"], Value::String("a".to_string()));
        assert_eq!(second["type"], Value::String("two".to_string()));
        Ok(())
    }
}
