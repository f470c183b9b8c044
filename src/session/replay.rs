use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::PageSession;
use crate::error::SessionError;
use crate::model::RawRecord;

/// Pixel height one replayed batch contributes to the scroll extent.
const BATCH_EXTENT: u64 = 1000;

/// One recorded feed: what was visible after each scroll step.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedFeed {
    pub batches: Vec<Vec<RawRecord>>,
    /// Whether the page showed its "no more posts" banner after the last batch.
    #[serde(default)]
    pub end_marker: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capture {
    pub feeds: HashMap<String, CapturedFeed>,
}

/// Replays a recorded capture instead of driving a live page. Useful for
/// offline runs and for re-running extraction against known input.
pub struct ReplaySession {
    capture: Capture,
    current: Option<String>,
    position: usize,
}

impl ReplaySession {
    pub fn new(capture: Capture) -> Self {
        ReplaySession {
            capture,
            current: None,
            position: 0,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SessionError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Capture(format!("{}: {}", path.display(), e)))?;
        let capture: Capture = serde_json::from_str(&raw)
            .map_err(|e| SessionError::Capture(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(capture))
    }

    fn feed(&self) -> Result<&CapturedFeed, SessionError> {
        self.current
            .as_ref()
            .and_then(|url| self.capture.feeds.get(url))
            .ok_or_else(|| SessionError::Capture("no page loaded".to_string()))
    }
}

#[async_trait]
impl PageSession for ReplaySession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), SessionError> {
        if !self.capture.feeds.contains_key(url) {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "not present in capture".to_string(),
            });
        }
        self.current = Some(url.to_string());
        self.position = 0;
        Ok(())
    }

    async fn extract_visible_records(&mut self, _timeout: Duration) -> Result<Vec<RawRecord>, SessionError> {
        let feed = self.feed()?;
        Ok(feed.batches.get(self.position).cloned().unwrap_or_default())
    }

    async fn scroll_step(&mut self) -> Result<(), SessionError> {
        let len = self.feed()?.batches.len();
        self.position = (self.position + 1).min(len.saturating_sub(1));
        Ok(())
    }

    async fn current_scroll_extent(&mut self) -> Result<u64, SessionError> {
        self.feed()?;
        Ok((self.position as u64 + 1) * BATCH_EXTENT)
    }

    async fn has_end_marker(&mut self) -> Result<bool, SessionError> {
        let feed = self.feed()?;
        Ok(feed.end_marker && self.position + 1 >= feed.batches.len())
    }

    fn name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> ReplaySession {
        ReplaySession::from_file(Path::new("tests/fixtures/replay_capture.json")).unwrap()
    }

    #[tokio::test]
    async fn unknown_url_fails_navigation() {
        let mut session = fixture();
        let err = session
            .navigate("https://example.invalid/groups/none", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Navigation { .. }));
    }

    #[tokio::test]
    async fn scrolling_walks_batches_and_stops_growing() {
        let mut session = fixture();
        session
            .navigate("https://example.com/groups/craft-beer", Duration::from_secs(1))
            .await
            .unwrap();
        let first = session.extract_visible_records(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(session.current_scroll_extent().await.unwrap(), 1000);

        session.scroll_step().await.unwrap();
        assert_eq!(session.current_scroll_extent().await.unwrap(), 2000);
        assert!(session.has_end_marker().await.unwrap());

        session.scroll_step().await.unwrap();
        assert_eq!(session.current_scroll_extent().await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn nothing_loaded_is_an_error() {
        let mut session = ReplaySession::new(Capture::default());
        assert!(session.scroll_step().await.is_err());
    }
}
