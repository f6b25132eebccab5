use thiserror::Error;

use super::surface::TabId;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("{count} element(s) matching \"{selector}\" not found within {timeout_ms}ms")]
    ElementTimeout {
        selector: String,
        count: usize,
        timeout_ms: u64,
    },
    #[error("tab {0} is not open")]
    TabNotFound(TabId),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("failed to stage file {name}: {source}")]
    FileStaging {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch media {name}: {reason}")]
    MediaFetch { name: String, reason: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::ElementTimeout { .. })
    }
}
