//! HTTP gateway client for content-addressed objects.
//!
//! Objects are fetched from `{base_url}/ipfs/{content_id}` and streamed back
//! chunk by chunk. Status codes are classified so the retrieval pipeline knows
//! which failures are worth retrying.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use tracing::debug;

use botfleet_core::config::FetchConfig;
use botfleet_core::domain::content::ContentId;
use botfleet_core::errors::FetchError;
use botfleet_core::ports::{ChunkStream, ObjectFetcher};

pub struct HttpObjectFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_owned() })
    }

    pub fn object_url(&self, content_id: &ContentId) -> String {
        format!("{}/ipfs/{}", self.base_url, content_id.0)
    }
}

/// `None` for success; otherwise the failure class for the status.
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let error = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            FetchError::Transient(format!("gateway responded {status}"))
        }
        status if status.is_server_error() => {
            FetchError::Transient(format!("gateway responded {status}"))
        }
        status => FetchError::Fatal(format!("gateway responded {status}")),
    };
    Some(error)
}

fn request_error(error: reqwest::Error) -> FetchError {
    if error.is_builder() {
        FetchError::Fatal(error.to_string())
    } else {
        FetchError::Transient(error.to_string())
    }
}

#[async_trait]
impl ObjectFetcher for HttpObjectFetcher {
    async fn fetch_chunks(&self, content_id: &ContentId) -> Result<ChunkStream, FetchError> {
        let url = self.object_url(content_id);
        let response = self.client.get(&url).send().await.map_err(request_error)?;
        let status = response.status();
        debug!(
            event_name = "fetch.object.response",
            correlation_id = %content_id,
            content_id = %content_id,
            status = status.as_u16(),
            "gateway responded"
        );
        if let Some(error) = classify_status(status) {
            return Err(error);
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|error| FetchError::Transient(error.to_string())));
        Ok(chunks.boxed())
    }
}
