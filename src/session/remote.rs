use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::PageSession;
use crate::error::SessionError;
use crate::model::RawRecord;

/// Talks JSON over HTTP to a rendering sidecar that owns the real browser tab.
///
/// Endpoints, relative to the base URL: `POST /navigate {url, timeoutMs}`,
/// `POST /records {timeoutMs}`, `POST /scroll`, `GET /extent`,
/// `GET /end-marker`, `POST /dismiss-overlays`.
pub struct RemoteSession {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ExtentResponse {
    extent: u64,
}

#[derive(Deserialize)]
struct EndMarkerResponse {
    #[serde(rename = "endMarker")]
    end_marker: bool,
}

#[derive(Deserialize)]
struct RecordsResponse {
    records: Vec<RawRecord>,
}

impl RemoteSession {
    pub fn new(base_url: &str) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(RemoteSession {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SessionError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SessionError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, SessionError> {
        let resp = self.client.post(self.endpoint(path)).json(&body).send().await?;
        Self::check(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let resp = self.client.get(self.endpoint(path)).send().await?;
        Ok(Self::check(resp).await?.json::<T>().await?)
    }
}

#[async_trait]
impl PageSession for RemoteSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let body = serde_json::json!({ "url": url, "timeoutMs": timeout.as_millis() as u64 });
        let resp = self
            .client
            .post(self.endpoint("navigate"))
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Self::check(resp).await.map_err(|e| SessionError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!(url, "navigated");
        Ok(())
    }

    async fn extract_visible_records(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, SessionError> {
        let body = serde_json::json!({ "timeoutMs": timeout.as_millis() as u64 });
        let resp = self.post("records", body).await?;
        let parsed: RecordsResponse = resp.json().await?;
        Ok(parsed.records)
    }

    async fn scroll_step(&mut self) -> Result<(), SessionError> {
        self.post("scroll", serde_json::json!({})).await?;
        Ok(())
    }

    async fn current_scroll_extent(&mut self) -> Result<u64, SessionError> {
        let parsed: ExtentResponse = self.get_json("extent").await?;
        Ok(parsed.extent)
    }

    async fn has_end_marker(&mut self) -> Result<bool, SessionError> {
        let parsed: EndMarkerResponse = self.get_json("end-marker").await?;
        Ok(parsed.end_marker)
    }

    async fn dismiss_overlays(&mut self) -> Result<(), SessionError> {
        self.post("dismiss-overlays", serde_json::json!({})).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "remote"
    }
}
