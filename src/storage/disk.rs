//! One directory per task:
//!
//! ```text
//! state_dir/
//! └── <task-uuid>/
//!     ├── meta.json
//!     ├── full.bin
//!     └── thumb.bin
//! ```
//!
//! Blobs are written once, metadata on every save. Every file goes through a
//! temp file + rename, so a crash corrupts at most the unit being written.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use crate::core::{
    Dimensions, QueueError, Result, StorageAdapter, TaskId, TaskStatus, UploadPayload, UploadTask,
};

const META_FILE: &str = "meta.json";
const FULL_FILE: &str = "full.bin";
const THUMB_FILE: &str = "thumb.bin";

/// Metadata block of a persisted unit.
#[derive(Debug, Serialize, Deserialize)]
struct TaskRecord {
    id: TaskId,
    dimensions: Dimensions,
    title: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    status: TaskStatus,
    #[serde(default)]
    error: Option<String>,
}

impl From<&UploadTask> for TaskRecord {
    fn from(task: &UploadTask) -> Self {
        let payload = task.payload();
        let mut tags: Vec<String> = payload.tags.iter().cloned().collect();
        tags.sort();

        Self {
            id: task.id(),
            dimensions: payload.dimensions,
            title: payload.title.clone(),
            description: payload.description.clone(),
            tags,
            created_at: payload.created_at,
            status: task.status().clone(),
            error: task.error().map(String::from),
        }
    }
}

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unit_dir(&self, task_id: TaskId) -> PathBuf {
        self.root.join(task_id.to_string())
    }

    async fn save_unit(&self, task: &UploadTask) -> Result<()> {
        let dir = self.unit_dir(task.id());
        tokio::fs::create_dir_all(&dir).await?;

        let payload = task.payload();
        write_once(&dir.join(FULL_FILE), &payload.full_image).await?;
        write_once(&dir.join(THUMB_FILE), &payload.thumbnail).await?;

        let meta = serde_json::to_vec_pretty(&TaskRecord::from(task))?;
        write_atomic(&dir.join(META_FILE), &meta).await
    }

    async fn load_unit(&self, dir: &Path) -> Result<UploadTask> {
        let meta = tokio::fs::read(dir.join(META_FILE)).await?;
        let record: TaskRecord = serde_json::from_slice(&meta)?;

        let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if dir_name != record.id.to_string() {
            return Err(QueueError::corrupted(format!(
                "unit {dir_name} holds metadata for {}",
                record.id
            )));
        }

        let full_image = Bytes::from(tokio::fs::read(dir.join(FULL_FILE)).await?);
        let thumbnail = Bytes::from(tokio::fs::read(dir.join(THUMB_FILE)).await?);

        let payload = UploadPayload {
            full_image,
            thumbnail,
            dimensions: record.dimensions,
            title: record.title,
            description: record.description,
            tags: record.tags.into_iter().collect::<HashSet<_>>(),
            created_at: record.created_at,
        };

        Ok(UploadTask::from_parts(record.id, payload, record.status))
    }
}

#[async_trait]
impl StorageAdapter for DiskStorage {
    async fn save_tasks(&self, tasks: &[UploadTask]) -> Result<()> {
        let mut first_error = None;

        for task in tasks {
            if let Err(err) = self.save_unit(task).await {
                warn!(task_id = %task.id(), error = %err, "Failed to write task unit");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<()> {
        match tokio::fs::remove_dir_all(self.unit_dir(task_id)).await {
            Ok(()) => {
                debug!(task_id = %task_id, "Removed task unit");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<UploadTask>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let path = entry.path();
            match self.load_unit(&path).await {
                Ok(task) => tasks.push(task),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable task unit"),
            }
        }

        tasks.sort_by_key(|task| task.payload().created_at);
        Ok(tasks)
    }
}

async fn write_once(path: &Path, data: &[u8]) -> Result<()> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }

    write_atomic(path, data).await
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use super::*;

    fn task(title: &str) -> UploadTask {
        let payload = UploadPayload::from_slices(&[1, 2, 3, 4], &[9, 9], Dimensions::new(640, 480))
            .with_title(title)
            .with_description("a walk in the park")
            .with_tags(["park", "dog"]);
        UploadTask::new(payload)
    }

    #[tokio::test]
    async fn test_save_and_list_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();

        let mut failed = task("second");
        failed.set_status(TaskStatus::failed("quota exceeded"));
        let pending = task("first");
        storage.save_tasks(&[failed.clone(), pending.clone()]).await.unwrap();

        let loaded = storage.list_tasks().await.unwrap();
        assert_eq!(loaded.len(), 2);

        let restored = loaded.iter().find(|t| t.id() == failed.id()).unwrap();
        assert_eq!(restored.status(), failed.status());
        assert_eq!(restored.payload().full_image, failed.payload().full_image);
        assert_eq!(restored.payload().thumbnail, failed.payload().thumbnail);
        assert_eq!(restored.payload().tags, failed.payload().tags);
        assert_eq!(restored.payload().title.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_corrupted_unit_is_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();

        let good = task("good");
        let broken = task("broken");
        let missing_blob = task("missing blob");
        storage.save_tasks(&[good.clone(), broken.clone(), missing_blob.clone()]).await.unwrap();

        tokio::fs::write(storage.unit_dir(broken.id()).join(META_FILE), b"{ not json").await.unwrap();
        tokio::fs::remove_file(storage.unit_dir(missing_blob.id()).join(FULL_FILE)).await.unwrap();
        tokio::fs::write(dir.path().join("stray.txt"), b"ignored").await.unwrap();

        let loaded = storage.list_tasks().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id(), good.id());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();
        let t = task("gone");
        storage.save_tasks(&[t.clone()]).await.unwrap();

        storage.delete_task(t.id()).await.unwrap();
        storage.delete_task(t.id()).await.unwrap();

        assert!(!storage.unit_dir(t.id()).exists());
        assert!(storage.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blobs_are_written_once() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(dir.path()).await.unwrap();
        let mut t = task("once");
        storage.save_tasks(&[t.clone()]).await.unwrap();

        let full_path = storage.unit_dir(t.id()).join(FULL_FILE);
        let before = tokio::fs::metadata(&full_path).await.unwrap().modified().unwrap();

        t.set_status(TaskStatus::failed("offline"));
        storage.save_tasks(&[t.clone()]).await.unwrap();

        let after = tokio::fs::metadata(&full_path).await.unwrap().modified().unwrap();
        assert_eq!(before, after);

        let loaded = storage.list_tasks().await.unwrap();
        assert_eq!(loaded[0].error(), Some("offline"));
    }
}
