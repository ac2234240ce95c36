use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;
use crate::core::{NewRecord, QueueError, RecordCreator, RecordId, Result};

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: String,
}

/// Posts the record JSON to the content service.
pub struct HttpRecordCreator {
    client: Client,
    endpoint: Url,
    token: String,
}

impl HttpRecordCreator {
    pub fn new(endpoint: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| QueueError::Config(format!("Invalid records endpoint {endpoint}: {err}")))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            token: token.into(),
        })
    }
}

#[async_trait]
impl RecordCreator for HttpRecordCreator {
    async fn create_record(&self, record: NewRecord) -> Result<RecordId> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&record)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(QueueError::NotAuthenticated),
            status if status.is_success() => {
                let created: CreatedRecord = response.json().await?;
                Ok(RecordId(created.id))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(QueueError::record(format!("{status}: {body}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let result = HttpRecordCreator::new("::", "t", Duration::from_secs(5));
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_record_body_shape() {
        let record = NewRecord {
            owner_id: "owner".into(),
            full_url: "https://cdn/full".into(),
            thumbnail_url: "https://cdn/thumb".into(),
            dimensions: crate::core::Dimensions::new(800, 600),
            title: Some("Sunset".into()),
            description: None,
            tags: vec!["beach".into(), "sky".into()],
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["dimensions"]["width"], 800);
        assert_eq!(json["tags"][1], "sky");
        assert!(json["description"].is_null());
    }
}
