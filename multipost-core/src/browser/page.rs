use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::PageFile;

use super::error::BrowserResult;

/// Addresses the `index`-th match of `selector` in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef {
    selector: String,
    index: usize,
}

impl ElementRef {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Input,
    Change,
    Click,
    Focus,
}

impl DomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomEvent::Input => "input",
            DomEvent::Change => "change",
            DomEvent::Click => "click",
            DomEvent::Focus => "focus",
        }
    }
}

/// Scripting surface of one tab's document.
///
/// Assigning a property alone does not update the state of the reactive
/// frameworks composers are built with, so every mutating operation also
/// dispatches the bubbling events those frameworks listen for.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> BrowserResult<usize>;

    /// Feed that receives a unit for every structural mutation of the
    /// document subtree. Dropping the receiver ends the subscription.
    fn mutations(&self) -> broadcast::Receiver<()>;

    /// Sets `value` and dispatches `input` then `change`.
    async fn fill(&self, element: &ElementRef, value: &str) -> BrowserResult<()>;

    async fn dispatch(&self, element: &ElementRef, event: DomEvent) -> BrowserResult<()>;

    /// Focuses the element and dispatches a `paste` carrying `text/html`,
    /// followed by `input` and `change`.
    async fn paste_html(&self, element: &ElementRef, html: &str) -> BrowserResult<()>;

    /// Replaces the file list of a file input and dispatches `change` then `input`.
    async fn attach_files(&self, element: &ElementRef, files: &[PageFile]) -> BrowserResult<()>;

    /// First match of `selector` whose text content contains `text`.
    async fn find_by_text(&self, selector: &str, text: &str)
        -> BrowserResult<Option<ElementRef>>;
}
