// src/storage.rs
use crate::connectors::traits::PositionStore;
use crate::error::{ChaserError, Result};
use crate::types::{ExecutionReport, TargetPosition};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

/// File-backed position store: targets live in a JSON array, execution
/// reports append to a JSONL log. Stands in for the real strategy database
/// behind the same trait.
pub struct FileStore {
    targets_path: String,
    reports_path: String,
}

impl FileStore {
    pub fn new(targets_path: String, reports_path: String) -> Self {
        Self {
            targets_path,
            reports_path,
        }
    }

    async fn read_targets(&self) -> Result<Vec<TargetPosition>> {
        let data = match tokio::fs::read_to_string(&self.targets_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(ChaserError::Configuration(e.to_string())),
        };
        serde_json::from_str(&data).map_err(|e| ChaserError::Configuration(e.to_string()))
    }
}

#[async_trait]
impl PositionStore for FileStore {
    async fn fetch_unfilled(&self) -> Result<Vec<TargetPosition>> {
        Ok(self
            .read_targets()
            .await?
            .into_iter()
            .filter(|t| t.processed_at.is_none())
            .collect())
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<()> {
        let mut targets = self.read_targets().await?;
        let now = Utc::now();
        for target in &mut targets {
            if ids.contains(&target.id) {
                target.processed_at = Some(now);
            }
        }
        let data = serde_json::to_string_pretty(&targets)
            .map_err(|e| ChaserError::Configuration(e.to_string()))?;
        tokio::fs::write(&self.targets_path, data)
            .await
            .map_err(|e| ChaserError::Configuration(e.to_string()))?;
        info!(count = ids.len(), "marked targets processed");
        Ok(())
    }

    async fn record_report(&self, report: &ExecutionReport) -> Result<()> {
        let mut line =
            serde_json::to_string(report).map_err(|e| ChaserError::Configuration(e.to_string()))?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.reports_path)
            .await
            .map_err(|e| ChaserError::Configuration(e.to_string()))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, line.as_bytes())
            .await
            .map_err(|e| ChaserError::Configuration(e.to_string()))?;
        Ok(())
    }
}
