use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::OutcomeSink;
use crate::error::{Result, RunnerError};
use crate::models::{EmergencySnapshot, OutcomeRecord, ProxyStatsRow, RunSummary};

const OUTCOMES_FILE: &str = "outcomes.jsonl";
const PROXY_STATS_FILE: &str = "proxy_stats.jsonl";
const SUMMARIES_FILE: &str = "summaries.jsonl";
const SNAPSHOTS_FILE: &str = "snapshots.jsonl";

#[derive(Serialize)]
struct StatsLine<'a> {
    flushed_at: DateTime<Utc>,
    #[serde(flatten)]
    row: &'a ProxyStatsRow,
}

/// Appends JSON lines to files under one output directory
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn append_lines<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for item in items {
            serde_json::to_writer(&mut buf, item)?;
            buf.push(b'\n');
        }

        let path = self.dir.join(file);
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| RunnerError::Sink(format!("open {}: {}", path.display(), e)))?;
        handle
            .write_all(&buf)
            .await
            .map_err(|e| RunnerError::Sink(format!("write {}: {}", path.display(), e)))?;
        handle.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeSink for JsonlSink {
    async fn check_ready(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            RunnerError::NotReady(format!("output dir {}: {}", self.dir.display(), e))
        })?;

        let meta = fs::metadata(&self.dir).await?;
        if meta.permissions().readonly() {
            return Err(RunnerError::NotReady(format!(
                "output dir {} is read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    async fn append_outcome(&self, record: &OutcomeRecord) -> Result<()> {
        self.append_lines(OUTCOMES_FILE, std::slice::from_ref(record)).await
    }

    async fn append_proxy_stats(&self, rows: &[ProxyStatsRow]) -> Result<()> {
        let flushed_at = Utc::now();
        let lines: Vec<StatsLine<'_>> = rows
            .iter()
            .map(|row| StatsLine { flushed_at, row })
            .collect();
        self.append_lines(PROXY_STATS_FILE, &lines).await
    }

    async fn append_summary(&self, summary: &RunSummary) -> Result<()> {
        self.append_lines(SUMMARIES_FILE, std::slice::from_ref(summary)).await
    }

    async fn append_emergency_snapshot(&self, snapshot: &EmergencySnapshot) -> Result<()> {
        self.append_lines(SNAPSHOTS_FILE, std::slice::from_ref(snapshot)).await
    }
}
