mod chromium;
mod error;
pub mod memory;
mod page;
mod poller;
mod retry;
mod surface;

pub use chromium::{ChromiumLauncher, ChromiumPage, ChromiumTabSurface};
pub use error::{BrowserError, BrowserResult};
pub use page::{DomEvent, ElementRef, PageSession};
pub use poller::{DomPoller, WaitStrategy};
pub use retry::{RetryOutcome, RetryPolicy};
pub use surface::{
    GroupColor, GroupId, GroupMetadata, TabId, TabStatus, TabSurface, TabUpdate,
};
