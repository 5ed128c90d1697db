//! Build event log
//!
//! Appends one JSON line per build event to `~/.local/share/strata/builds.log`.
//! Enabled unless `general.build_log = false`.

use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Event names written to the log
pub mod events {
    pub const BUILD_STARTED: &str = "build.started";
    pub const BUILD_COMPLETED: &str = "build.completed";
    pub const BUILD_FAILED: &str = "build.failed";
    pub const IMAGE_REMOVED: &str = "image.removed";
    pub const CACHE_PRUNED: &str = "cache.pruned";
}

/// File-based build event logger that appends JSON lines
#[derive(Debug, Clone)]
pub struct BuildLog {
    enabled: bool,
    path: PathBuf,
}

impl BuildLog {
    /// Create a build log from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.build_log,
            path: ConfigManager::build_log_path(),
        }
    }

    /// Create a build log writing to an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }

    /// A log that drops every event
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
        }
    }

    /// Record an event as a JSON line
    ///
    /// IO failures are logged and otherwise ignored; the build carries on.
    pub async fn record(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize build event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write build log: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_json_line() {
        let dir = TempDir::new().unwrap();
        let log = BuildLog::at(dir.path().join("builds.log"));

        log.record(
            events::BUILD_COMPLETED,
            &serde_json::json!({"image": "abc123", "dependency_cache_hit": true}),
        )
        .await;

        let content = tokio::fs::read_to_string(&log.path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();

        assert_eq!(parsed["event"], "build.completed");
        assert_eq!(parsed["data"]["image"], "abc123");
        assert_eq!(parsed["data"]["dependency_cache_hit"], true);
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn appends_multiple_lines() {
        let dir = TempDir::new().unwrap();
        let log = BuildLog::at(dir.path().join("nested/builds.log"));

        log.record(events::BUILD_STARTED, &serde_json::json!({})).await;
        log.record(events::BUILD_FAILED, &serde_json::json!({})).await;

        let content = tokio::fs::read_to_string(&log.path).await.unwrap();
        assert_eq!(content.trim().lines().count(), 2);
    }

    #[tokio::test]
    async fn skips_when_disabled() {
        let dir = TempDir::new().unwrap();
        let mut log = BuildLog::at(dir.path().join("builds.log"));
        log.enabled = false;

        log.record("should.not.appear", &serde_json::json!({})).await;

        assert!(!log.path.exists());
    }
}
