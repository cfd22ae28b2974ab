//! Emergency snapshot persistence

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::Result;
use crate::models::EmergencySnapshot;

/// File name used for a run's emergency snapshot
pub fn snapshot_file_name(snapshot: &EmergencySnapshot) -> String {
    format!("emergency-{}.json", snapshot.run_id)
}

/// Write `snapshot` as pretty JSON under `dir`
///
/// The file is written to a temporary name and renamed into place so a crash mid-write
/// never leaves a truncated snapshot behind.
pub async fn write_snapshot(dir: &Path, snapshot: &EmergencySnapshot) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;

    let path = dir.join(snapshot_file_name(snapshot));
    let tmp = path.with_extension("json.tmp");

    let body = serde_json::to_vec_pretty(snapshot)?;
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&body).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, &path).await?;
    info!(path = %path.display(), "Emergency snapshot written");
    Ok(path)
}

/// Read a snapshot back, for post-mortem tooling
pub async fn read_snapshot(path: &Path) -> Result<EmergencySnapshot> {
    let body = fs::read(path).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_write_snapshot_atomically() {
        let dir = std::env::temp_dir().join(format!("rota-runner-snap-{}", Uuid::new_v4()));
        let snapshot = EmergencySnapshot {
            run_id: Uuid::new_v4(),
            attempts_total: 7,
            successes_total: 2,
            consecutive_failures: 5,
            daily_target: 20,
            last_error: Some("HTTP 503".to_string()),
            elapsed_secs: 1800,
            written_at: Utc::now(),
        };

        let path = write_snapshot(&dir, &snapshot).await.unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), snapshot_file_name(&snapshot));
        assert!(!path.with_extension("json.tmp").exists());

        let restored = read_snapshot(&path).await.unwrap();
        assert_eq!(restored, snapshot);

        let _ = fs::remove_dir_all(&dir).await;
    }
}
