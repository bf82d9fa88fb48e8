//! Telemetry source seam.
//!
//! The shared-memory client of a specific simulator lives outside this
//! crate; anything that can produce a [`TelemetrySnapshot`] plugs in here.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::control::TelemetrySnapshot;
use crate::discovery::{ControlDiscovery, RawFrame};
use crate::error::{TelemetryError, TelemetryResult};

/// A readable view of the simulator.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Read one snapshot.
    ///
    /// Fails with `TelemetryUnavailable` when the simulator is not running
    /// or the driver is not in a car. Must not panic.
    async fn read(&self) -> TelemetryResult<TelemetrySnapshot>;
}

/// Reads a [`RawFrame`] JSON file written by an external telemetry bridge.
#[derive(Debug, Clone)]
pub struct SnapshotFileSource {
    path: PathBuf,
    discovery: ControlDiscovery,
}

impl SnapshotFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            discovery: ControlDiscovery::default(),
        }
    }

    /// Use a non-default control prefix.
    pub fn with_discovery(mut self, discovery: ControlDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TelemetrySource for SnapshotFileSource {
    fn name(&self) -> &str {
        "snapshot-file"
    }

    async fn read(&self) -> TelemetryResult<TelemetrySnapshot> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TelemetryError::unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let frame: RawFrame = serde_json::from_str(&content)
            .map_err(|e| TelemetryError::InvalidData(format!("{}: {}", self.path.display(), e)))?;
        self.discovery.snapshot(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn missing_file_is_unavailable() -> TestResult {
        let dir = TempDir::new()?;
        let source = SnapshotFileSource::new(dir.path().join("absent.json"));
        assert!(matches!(
            source.read().await,
            Err(TelemetryError::TelemetryUnavailable { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_is_invalid_data() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("frame.json");
        std::fs::write(&path, "{ not json")?;
        let source = SnapshotFileSource::new(&path);
        assert!(matches!(source.read().await, Err(TelemetryError::InvalidData(_))));
        Ok(())
    }

    #[tokio::test]
    async fn reads_controls_from_file() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("frame.json");
        std::fs::write(
            &path,
            r#"{"car":"BMW M4 GT3","track":"Spa","session_type":"Practice",
                "variables":[{"name":"dcABS","value":4,"min":1,"max":12}]}"#,
        )?;
        let snapshot = SnapshotFileSource::new(&path).read().await?;
        assert_eq!(snapshot.session.car_name, "BMW M4 GT3");
        assert_eq!(snapshot.controls.len(), 1);
        Ok(())
    }
}
