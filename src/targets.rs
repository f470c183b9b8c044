//! Where a cycle gets its query term and list of targets.
//!
//! Both sources read the same document: `{"query": "...", "groups": [{"name", "url"}]}`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::model::Target;

/// Query used when the document leaves it out.
pub const UNSPECIFIED_QUERY: &str = "ไม่ระบุ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetList {
    pub query: String,
    pub targets: Vec<Target>,
}

#[derive(Deserialize)]
struct TargetDocument {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    groups: Vec<Target>,
}

impl TargetList {
    pub fn parse(raw: &str) -> Result<Self> {
        let doc: TargetDocument = serde_json::from_str(raw).context("Malformed target document")?;
        let query = doc
            .query
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| UNSPECIFIED_QUERY.to_string());
        let targets: Vec<Target> = doc
            .groups
            .into_iter()
            .filter(|t| !t.url.trim().is_empty())
            .collect();
        if targets.is_empty() {
            bail!("target document lists no groups");
        }
        Ok(TargetList { query, targets })
    }
}

#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn fetch(&self) -> Result<TargetList>;

    fn describe(&self) -> String;
}

pub struct HttpTargetSource {
    client: reqwest::Client,
    url: String,
}

impl HttpTargetSource {
    pub fn new(url: &str) -> Self {
        HttpTargetSource {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl TargetSource for HttpTargetSource {
    async fn fetch(&self) -> Result<TargetList> {
        info!("Fetching target list: {}", self.url);
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .context("Failed to fetch target list")?;
        let list = TargetList::parse(&body)?;
        info!("Loaded {} targets for query {:?}", list.targets.len(), list.query);
        Ok(list)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

pub struct FileTargetSource {
    path: PathBuf,
}

impl FileTargetSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileTargetSource { path: path.into() }
    }
}

#[async_trait]
impl TargetSource for FileTargetSource {
    async fn fetch(&self) -> Result<TargetList> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let list = TargetList::parse(&raw)?;
        info!(
            "Loaded {} targets for query {:?} from {}",
            list.targets.len(),
            list.query,
            self.path.display()
        );
        Ok(list)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
