use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AppConfig;
use crate::errors::AppResult;

/// File-buffered event sink. Events queue in memory and land in a JSONL
/// buffer in batches; the buffer is a bounded diagnostic aid, so when it
/// would outgrow its cap it starts over instead of rotating.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: Arc<AtomicBool>,
    queue: Arc<Mutex<Vec<TelemetryEvent>>>,
    buffer_path: PathBuf,
    batch_size: usize,
    max_file_bytes: u64,
}

impl TelemetryClient {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let buffer_path = data_dir.join("telemetry-buffer.jsonl");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&buffer_path)?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.telemetry_enabled_by_default)),
            queue: Arc::new(Mutex::new(Vec::new())),
            buffer_path,
            batch_size: config.telemetry_batch_size.max(1),
            max_file_bytes: config.telemetry_buffer_max_bytes,
        })
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut queue = self.queue.lock();
        queue.push(TelemetryEvent::new(name.into(), payload));
        if queue.len() >= self.batch_size {
            self.persist_locked(&mut queue)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        self.persist_locked(&mut queue)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn persist_locked(&self, queue: &mut Vec<TelemetryEvent>) -> AppResult<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(queue.len());
        let mut incoming_bytes = 0_u64;
        for event in queue.iter() {
            let line = serde_json::to_vec(event)?;
            incoming_bytes += (line.len() + 1) as u64;
            encoded.push(line);
        }

        let current_size = fs::metadata(&self.buffer_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let truncate = current_size + incoming_bytes > self.max_file_bytes;

        let mut file = OpenOptions::new()
            .create(true)
            .append(!truncate)
            .write(truncate)
            .truncate(truncate)
            .open(&self.buffer_path)?;

        for line in &encoded {
            file.write_all(line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        queue.clear();
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn test_config() -> AppConfig {
        AppConfig {
            geocoder_endpoint: "http://localhost/geocode".into(),
            geocoder_api_key: None,
            suntimes_endpoint: "http://localhost/json".into(),
            http_timeout_secs: 5,
            database_file_name: "test.db".into(),
            incomplete_row_policy: crate::config::IncompleteRowPolicy::Abort,
            telemetry_enabled_by_default: true,
            telemetry_batch_size: 2,
            telemetry_buffer_max_bytes: 1024,
        }
    }

    #[test]
    fn writes_events_to_disk() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.telemetry_batch_size = 1;

        let client = TelemetryClient::new(dir.path(), &config).unwrap();
        client.record("resolve_served", json!({ "cached": 3 })).unwrap();
        client.flush().unwrap();

        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.contains("resolve_served"));
    }

    #[test]
    fn keeps_buffer_across_instances() {
        let dir = tempdir().unwrap();
        let config = test_config();
        {
            let client = TelemetryClient::new(dir.path(), &config).unwrap();
            client.record("first", json!({})).unwrap();
            client.flush().unwrap();
        }

        let client = TelemetryClient::new(dir.path(), &config).unwrap();
        client.record("second", json!({})).unwrap();
        client.flush().unwrap();

        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.contains("first"));
        assert!(buffer.contains("second"));
    }

    #[test]
    fn disabled_client_records_nothing() {
        let dir = tempdir().unwrap();
        let client = TelemetryClient::new(dir.path(), &test_config()).unwrap();
        client.set_enabled(false);
        client.record("dropped", json!({})).unwrap();
        client.flush().unwrap();

        assert_eq!(client.queue_depth(), 0);
        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn starts_over_when_exceeding_capacity() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.telemetry_batch_size = 1;
        config.telemetry_buffer_max_bytes = 160;

        let client = TelemetryClient::new(dir.path(), &config).unwrap();
        for idx in 0..6 {
            client
                .record("big", json!({ "payload": "0123456789abcdef", "idx": idx }))
                .unwrap();
        }

        let size = fs::metadata(client.buffer_path()).unwrap().len();
        assert!(size <= 320);
        let buffer = fs::read_to_string(client.buffer_path()).unwrap();
        assert!(buffer.lines().count() < 6);
    }
}
