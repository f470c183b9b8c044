//! The page-session capability the collector drives. Rendering, login and
//! anti-bot concerns live behind this trait, outside the crate.

pub mod remote;
pub mod replay;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::model::RawRecord;

pub use remote::RemoteSession;
pub use replay::ReplaySession;

#[async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Records currently visible on the page. `timeout` is a hint for the
    /// implementation; the collector enforces it independently.
    async fn extract_visible_records(&mut self, timeout: Duration) -> Result<Vec<RawRecord>, SessionError>;

    async fn scroll_step(&mut self) -> Result<(), SessionError>;

    async fn current_scroll_extent(&mut self) -> Result<u64, SessionError>;

    async fn has_end_marker(&mut self) -> Result<bool, SessionError>;

    /// Close pop-ups and dialogs covering the feed. Best effort.
    async fn dismiss_overlays(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn name(&self) -> &str;
}
