use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Body, Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use crate::core::{ProgressFn, QueueError, Result, TaskId, TransferUrls, UploadTransfer};
use super::progress_stream::{ProgressStream, chunked};

/// 简单上传配置
#[derive(Debug, Clone)]
pub struct SimpleConfig {
    pub timeout: Duration,
    pub chunk_size: usize,
}

impl Default for SimpleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300), // 5 分钟
            chunk_size: 256 * 1024,
        }
    }
}

/// 简单 HTTP 上传器
///
/// `PUT {endpoint}/{owner}/{task}/full` and `.../thumb`, one request per
/// blob. The object URL comes from the `Location` header when the storage
/// sets one.
pub struct SimpleUploader {
    client: Client,
    endpoint: Url,
    token: String,
    config: SimpleConfig,
    in_flight: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl SimpleUploader {
    pub fn new(endpoint: &str, token: impl Into<String>, config: SimpleConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: base_url(endpoint)?,
            token: token.into(),
            config,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn object_url(&self, owner_id: &str, task_id: TaskId, name: &str) -> Result<Url> {
        self.endpoint
            .join(&format!("{owner_id}/{task_id}/{name}"))
            .map_err(|err| QueueError::Config(format!("Invalid object url: {err}")))
    }

    async fn put_object(
        &self,
        url: Url,
        data: Bytes,
        sent: Arc<AtomicU64>,
        total: u64,
        on_progress: ProgressFn,
    ) -> Result<String> {
        let len = data.len();
        let stream = ProgressStream::new(chunked(data, self.config.chunk_size), sent, total, on_progress);

        let response = self
            .client
            .put(url.clone())
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(stream))
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(QueueError::NotAuthenticated),
            status if !status.is_success() => {
                return Err(QueueError::transfer(format!("{url} returned {status}")));
            }
            _ => {}
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| url.to_string());

        Ok(location)
    }

    async fn upload_pair(
        &self,
        task_id: TaskId,
        full_image: Bytes,
        thumbnail: Bytes,
        owner_id: &str,
        on_progress: ProgressFn,
    ) -> Result<TransferUrls> {
        let total = (full_image.len() + thumbnail.len()) as u64;
        let sent = Arc::new(AtomicU64::new(0));
        on_progress(0.0);

        let full_url = self
            .put_object(self.object_url(owner_id, task_id, "full")?, full_image, sent.clone(), total, on_progress.clone())
            .await?;
        let thumbnail_url = self
            .put_object(self.object_url(owner_id, task_id, "thumb")?, thumbnail, sent, total, on_progress.clone())
            .await?;

        on_progress(1.0);
        Ok(TransferUrls { full_url, thumbnail_url })
    }
}

#[async_trait]
impl UploadTransfer for SimpleUploader {
    async fn transfer(
        &self,
        task_id: TaskId,
        full_image: Bytes,
        thumbnail: Bytes,
        owner_id: &str,
        on_progress: ProgressFn,
    ) -> Result<TransferUrls> {
        let token = CancellationToken::new();
        self.in_flight.lock().insert(task_id, token.clone());

        let result = tokio::select! {
            _ = token.cancelled() => Err(QueueError::Cancelled),
            result = self.upload_pair(task_id, full_image, thumbnail, owner_id, on_progress) => result,
        };

        self.in_flight.lock().remove(&task_id);
        result
    }

    async fn cancel(&self, task_id: TaskId) {
        let token = self.in_flight.lock().remove(&task_id);
        if let Some(token) = token {
            debug!(task_id = %task_id, "Aborting object upload");
            token.cancel();
        }
    }
}

/// `Url::join` replaces the last segment unless the base ends with '/'.
fn base_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|err| QueueError::Config(format!("Invalid endpoint {endpoint}: {err}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_keeps_endpoint_path() {
        let uploader = SimpleUploader::new("https://media.example.com/v1/uploads", "t", SimpleConfig::default()).unwrap();
        let task_id = TaskId::new();

        let url = uploader.object_url("owner-7", task_id, "thumb").unwrap();
        assert_eq!(url.as_str(), format!("https://media.example.com/v1/uploads/owner-7/{task_id}/thumb"));
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        assert!(matches!(
            SimpleUploader::new("not a url", "t", SimpleConfig::default()),
            Err(QueueError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_noop() {
        let uploader = SimpleUploader::new("https://media.example.com/", "t", SimpleConfig::default()).unwrap();
        uploader.cancel(TaskId::new()).await;
        assert!(uploader.in_flight.lock().is_empty());
    }
}
