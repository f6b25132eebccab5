use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use super::error::BrowserResult;
use super::page::PageSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabUpdate {
    pub tab: TabId,
    pub status: TabStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    Grey,
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
}

impl FromStr for GroupColor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let color = match value.trim().to_ascii_lowercase().as_str() {
            "grey" | "gray" => GroupColor::Grey,
            "blue" => GroupColor::Blue,
            "red" => GroupColor::Red,
            "yellow" => GroupColor::Yellow,
            "green" => GroupColor::Green,
            "pink" => GroupColor::Pink,
            "purple" => GroupColor::Purple,
            "cyan" => GroupColor::Cyan,
            "orange" => GroupColor::Orange,
            other => return Err(format!("unknown group color: {other}")),
        };
        Ok(color)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMetadata {
    pub title: String,
    pub color: GroupColor,
}

/// Tab management surface of the host browser.
///
/// Every call is treated as an atomic operation. Load notifications may be
/// delivered more than once for the same tab (reloads, redirects).
#[async_trait]
pub trait TabSurface: Send + Sync {
    async fn open_tab(&self, url: &str) -> BrowserResult<TabId>;

    async fn group_tabs(&self, tabs: &[TabId]) -> BrowserResult<GroupId>;

    async fn update_group(&self, group: GroupId, metadata: &GroupMetadata) -> BrowserResult<()>;

    async fn tab_status(&self, tab: TabId) -> BrowserResult<TabStatus>;

    fn subscribe(&self) -> broadcast::Receiver<TabUpdate>;

    async fn session(&self, tab: TabId) -> BrowserResult<Arc<dyn PageSession>>;
}
