//! In-process page and tab surfaces.
//!
//! The document model is flat: a selector is an opaque key and
//! each key owns an ordered list of elements. Reactions let a test script the
//! way a composer grows new nodes after a click or an upload.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::PageFile;

use super::error::{BrowserError, BrowserResult};
use super::page::{DomEvent, ElementRef, PageSession};
use super::surface::{GroupId, GroupMetadata, TabId, TabStatus, TabSurface, TabUpdate};

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryElement {
    pub text: String,
    pub value: String,
    pub files: Vec<PageFile>,
}

/// Everything a routine did to a [`MemoryPage`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    Fill {
        selector: String,
        value: String,
    },
    Dispatch {
        selector: String,
        event: DomEvent,
    },
    Paste {
        selector: String,
        html: String,
    },
    Attach {
        selector: String,
        files: Vec<PageFile>,
    },
}

#[derive(Debug, Clone)]
enum Reaction {
    Click { trigger: String, insert: String },
    AttachEach { trigger: String, insert: String },
}

#[derive(Debug, Default)]
struct DocumentState {
    elements: HashMap<String, Vec<MemoryElement>>,
    reactions: Vec<Reaction>,
    journal: Vec<PageAction>,
}

#[derive(Debug)]
pub struct MemoryPage {
    state: Mutex<DocumentState>,
    mutations: broadcast::Sender<()>,
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPage {
    pub fn new() -> Self {
        let (mutations, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Mutex::new(DocumentState::default()),
            mutations,
        }
    }

    fn state(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends an element and notifies mutation subscribers.
    pub fn insert(&self, selector: &str, text: &str) {
        self.insert_silently(selector, text);
        let _ = self.mutations.send(());
    }

    /// Appends an element without a mutation notification.
    pub fn insert_silently(&self, selector: &str, text: &str) {
        self.state()
            .elements
            .entry(selector.to_string())
            .or_default()
            .push(MemoryElement {
                text: text.to_string(),
                ..MemoryElement::default()
            });
    }

    pub fn remove_all(&self, selector: &str) {
        self.state().elements.remove(selector);
        let _ = self.mutations.send(());
    }

    /// Clicking `trigger` inserts one `insert` element.
    pub fn on_click(&self, trigger: &str, insert: &str) {
        self.state().reactions.push(Reaction::Click {
            trigger: trigger.to_string(),
            insert: insert.to_string(),
        });
    }

    /// Attaching files to `trigger` inserts one `insert` element per file.
    pub fn on_attach(&self, trigger: &str, insert: &str) {
        self.state().reactions.push(Reaction::AttachEach {
            trigger: trigger.to_string(),
            insert: insert.to_string(),
        });
    }

    pub fn element(&self, selector: &str, index: usize) -> Option<MemoryElement> {
        self.state()
            .elements
            .get(selector)
            .and_then(|list| list.get(index))
            .cloned()
    }

    pub fn actions(&self) -> Vec<PageAction> {
        self.state().journal.clone()
    }

    pub fn dispatched(&self, selector: &str, event: DomEvent) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|action| {
                matches!(action, PageAction::Dispatch { selector: s, event: e } if s == selector && *e == event)
            })
            .count()
    }

    pub fn clicks(&self) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|action| matches!(action, PageAction::Dispatch { event: DomEvent::Click, .. }))
            .count()
    }

    pub fn mutation_subscribers(&self) -> usize {
        self.mutations.receiver_count()
    }

    fn with_element<R>(
        &self,
        element: &ElementRef,
        f: impl FnOnce(&mut MemoryElement) -> R,
    ) -> BrowserResult<R> {
        let mut state = self.state();
        let target = state
            .elements
            .get_mut(element.selector())
            .and_then(|list| list.get_mut(element.index()))
            .ok_or_else(|| {
                BrowserError::Script(format!(
                    "no element {}[{}]",
                    element.selector(),
                    element.index()
                ))
            })?;
        Ok(f(target))
    }

    fn record(&self, action: PageAction) {
        let inserts = {
            let mut state = self.state();
            let inserts = state
                .reactions
                .iter()
                .filter_map(|reaction| match (reaction, &action) {
                    (
                        Reaction::Click { trigger, insert },
                        PageAction::Dispatch {
                            selector,
                            event: DomEvent::Click,
                        },
                    ) if trigger == selector => Some((insert.clone(), 1)),
                    (Reaction::AttachEach { trigger, insert }, PageAction::Attach { selector, files })
                        if trigger == selector =>
                    {
                        Some((insert.clone(), files.len()))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>();
            state.journal.push(action);
            inserts
        };
        for (selector, times) in inserts {
            for _ in 0..times {
                self.insert(&selector, "");
            }
        }
    }
}

#[async_trait]
impl PageSession for MemoryPage {
    async fn count(&self, selector: &str) -> BrowserResult<usize> {
        Ok(self.state().elements.get(selector).map_or(0, Vec::len))
    }

    fn mutations(&self) -> broadcast::Receiver<()> {
        self.mutations.subscribe()
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> BrowserResult<()> {
        self.with_element(element, |target| target.value = value.to_string())?;
        self.record(PageAction::Fill {
            selector: element.selector().to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn dispatch(&self, element: &ElementRef, event: DomEvent) -> BrowserResult<()> {
        self.with_element(element, |_| ())?;
        self.record(PageAction::Dispatch {
            selector: element.selector().to_string(),
            event,
        });
        Ok(())
    }

    async fn paste_html(&self, element: &ElementRef, html: &str) -> BrowserResult<()> {
        self.with_element(element, |target| target.value = html.to_string())?;
        self.record(PageAction::Paste {
            selector: element.selector().to_string(),
            html: html.to_string(),
        });
        Ok(())
    }

    async fn attach_files(&self, element: &ElementRef, files: &[PageFile]) -> BrowserResult<()> {
        self.with_element(element, |target| target.files = files.to_vec())?;
        self.record(PageAction::Attach {
            selector: element.selector().to_string(),
            files: files.to_vec(),
        });
        Ok(())
    }

    async fn find_by_text(
        &self,
        selector: &str,
        text: &str,
    ) -> BrowserResult<Option<ElementRef>> {
        Ok(self.state().elements.get(selector).and_then(|list| {
            list.iter()
                .position(|element| element.text.contains(text))
                .map(|index| ElementRef::new(selector, index))
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryGroup {
    pub tabs: Vec<TabId>,
    pub metadata: Option<GroupMetadata>,
}

#[derive(Debug)]
struct MemoryTab {
    url: String,
    status: TabStatus,
    page: Arc<MemoryPage>,
}

#[derive(Debug, Default)]
struct SurfaceState {
    next_tab: u64,
    next_group: u64,
    tabs: BTreeMap<TabId, MemoryTab>,
    groups: BTreeMap<u64, MemoryGroup>,
    pages: HashMap<String, Arc<MemoryPage>>,
    failing_urls: HashSet<String>,
    session_requests: HashMap<TabId, usize>,
}

/// Tab surface whose tabs only finish loading when told to.
#[derive(Debug)]
pub struct MemoryTabSurface {
    state: Mutex<SurfaceState>,
    updates: broadcast::Sender<TabUpdate>,
}

impl Default for MemoryTabSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTabSurface {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: Mutex::new(SurfaceState::default()),
            updates,
        }
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tabs opened at `url` share `page` as their document.
    pub fn serve(&self, url: &str, page: Arc<MemoryPage>) {
        self.state().pages.insert(url.to_string(), page);
    }

    pub fn fail_url(&self, url: &str) {
        self.state().failing_urls.insert(url.to_string());
    }

    /// Marks the tab loaded and emits a load-complete notification.
    pub fn complete(&self, tab: TabId) {
        if let Some(entry) = self.state().tabs.get_mut(&tab) {
            entry.status = TabStatus::Complete;
        }
        let _ = self.updates.send(TabUpdate {
            tab,
            status: TabStatus::Complete,
        });
    }

    pub fn complete_all(&self) {
        let tabs = self.state().tabs.keys().copied().collect::<Vec<_>>();
        for tab in tabs {
            self.complete(tab);
        }
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state()
            .tabs
            .values()
            .map(|tab| tab.url.clone())
            .collect()
    }

    pub fn groups(&self) -> Vec<MemoryGroup> {
        self.state().groups.values().cloned().collect()
    }

    pub fn page(&self, tab: TabId) -> Option<Arc<MemoryPage>> {
        self.state().tabs.get(&tab).map(|entry| Arc::clone(&entry.page))
    }

    /// How many times a page session was requested for `tab`.
    pub fn session_requests(&self, tab: TabId) -> usize {
        self.state()
            .session_requests
            .get(&tab)
            .copied()
            .unwrap_or(0)
    }

    pub fn listeners(&self) -> usize {
        self.updates.receiver_count()
    }
}

#[async_trait]
impl TabSurface for MemoryTabSurface {
    async fn open_tab(&self, url: &str) -> BrowserResult<TabId> {
        let mut state = self.state();
        if state.failing_urls.contains(url) {
            return Err(BrowserError::Unexpected(format!("cannot open {url}")));
        }
        state.next_tab += 1;
        let tab = TabId(state.next_tab);
        let page = state
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| Arc::new(MemoryPage::new()));
        state.tabs.insert(
            tab,
            MemoryTab {
                url: url.to_string(),
                status: TabStatus::Loading,
                page,
            },
        );
        Ok(tab)
    }

    async fn group_tabs(&self, tabs: &[TabId]) -> BrowserResult<GroupId> {
        let mut state = self.state();
        if let Some(missing) = tabs.iter().find(|tab| !state.tabs.contains_key(*tab)) {
            return Err(BrowserError::TabNotFound(*missing));
        }
        state.next_group += 1;
        let id = state.next_group;
        state.groups.insert(
            id,
            MemoryGroup {
                tabs: tabs.to_vec(),
                metadata: None,
            },
        );
        Ok(GroupId(id))
    }

    async fn update_group(&self, group: GroupId, metadata: &GroupMetadata) -> BrowserResult<()> {
        let mut state = self.state();
        let entry = state
            .groups
            .get_mut(&group.0)
            .ok_or_else(|| BrowserError::Unexpected(format!("group {group} not found")))?;
        entry.metadata = Some(metadata.clone());
        Ok(())
    }

    async fn tab_status(&self, tab: TabId) -> BrowserResult<TabStatus> {
        self.state()
            .tabs
            .get(&tab)
            .map(|entry| entry.status)
            .ok_or(BrowserError::TabNotFound(tab))
    }

    fn subscribe(&self) -> broadcast::Receiver<TabUpdate> {
        self.updates.subscribe()
    }

    async fn session(&self, tab: TabId) -> BrowserResult<Arc<dyn PageSession>> {
        let mut state = self.state();
        *state.session_requests.entry(tab).or_default() += 1;
        let page = state
            .tabs
            .get(&tab)
            .map(|entry| Arc::clone(&entry.page))
            .ok_or(BrowserError::TabNotFound(tab))?;
        Ok(page)
    }
}
