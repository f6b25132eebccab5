use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventLoadEventFired, NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::MultipostConfig;
use crate::model::PageFile;

use super::error::{BrowserError, BrowserResult};
use super::page::{DomEvent, ElementRef, PageSession};
use super::surface::{GroupId, GroupMetadata, TabId, TabStatus, TabSurface, TabUpdate};

const MUTATION_BINDING: &str = "__multipostMutation";
const FEED_CAPACITY: usize = 256;

const OBSERVER_SCRIPT: &str = r#"
(() => {
    const notify = () => {
        try {
            window.__multipostMutation('');
        } catch (_) {}
    };
    const install = () => {
        const root = document.documentElement;
        if (!root || window.__multipostObserver) return;
        window.__multipostObserver = new MutationObserver(notify);
        window.__multipostObserver.observe(root, { childList: true, subtree: true });
        notify();
    };
    if (document.documentElement) {
        install();
    } else {
        document.addEventListener('readystatechange', install, { once: true });
    }
})();
"#;

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: Arc<MultipostConfig>,
}

impl ChromiumLauncher {
    pub fn new(config: MultipostConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MultipostConfig {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<ChromiumTabSurface> {
        let chromium_config = self.build_chromium_config()?;
        info!(
            headless = self.config.chromium.headless,
            profile = ?self.config.chromium.user_data_dir,
            "Launching Chromium instance"
        );
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(ChromiumTabSurface::new(browser, handler_task))
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let mut builder = ChromiumConfig::builder();
        if let Some(path) = &chromium.executable_path {
            builder = builder.chrome_executable(path);
        }
        if let Some(dir) = &chromium.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = Vec::new();
        if chromium.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if let Some(lang) = &self.config.flags.lang {
            args.push(format!("--lang={lang}"));
        }
        // Background tabs keep running their timers while other tabs load.
        args.push("--disable-background-timer-throttling".into());
        args.push("--disable-renderer-backgrounding".into());
        args.extend(self.config.flags.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
struct ChromiumTab {
    session: Arc<ChromiumPage>,
    watcher: JoinHandle<()>,
}

#[derive(Debug, Clone)]
struct GroupRecord {
    tabs: Vec<TabId>,
    metadata: Option<GroupMetadata>,
}

/// Tab surface backed by a DevTools-controlled Chromium.
///
/// The DevTools protocol has no notion of tab groups, so groups are kept as
/// in-process records and reported through logging.
#[derive(Debug)]
pub struct ChromiumTabSurface {
    browser: AsyncMutex<Browser>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    tabs: Mutex<HashMap<TabId, ChromiumTab>>,
    statuses: StatusMap,
    groups: Mutex<HashMap<GroupId, GroupRecord>>,
    updates: broadcast::Sender<TabUpdate>,
    next_tab: AtomicU64,
    next_group: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type StatusMap = Arc<Mutex<HashMap<TabId, TabStatus>>>;

/// Status entry and event watcher of a tab whose navigation is not confirmed yet.
///
/// Dropping it without `commit` aborts the watcher and forgets the status.
struct PendingTab {
    tab: TabId,
    statuses: StatusMap,
    watcher: AbortHandle,
    armed: bool,
}

impl PendingTab {
    fn new(tab: TabId, statuses: &StatusMap, watcher: &JoinHandle<()>) -> Self {
        Self {
            tab,
            statuses: Arc::clone(statuses),
            watcher: watcher.abort_handle(),
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingTab {
    fn drop(&mut self) {
        if self.armed {
            self.watcher.abort();
            lock(&self.statuses).remove(&self.tab);
            debug!(tab = %self.tab, "abandoned tab released");
        }
    }
}

impl ChromiumTabSurface {
    fn new(browser: Browser, handler_task: JoinHandle<()>) -> Self {
        let (updates, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            browser: AsyncMutex::new(browser),
            handler_task: Mutex::new(Some(handler_task)),
            tabs: Mutex::new(HashMap::new()),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            groups: Mutex::new(HashMap::new()),
            updates,
            next_tab: AtomicU64::new(1),
            next_group: AtomicU64::new(1),
        }
    }

    pub fn group_members(&self, group: GroupId) -> Option<Vec<TabId>> {
        lock(&self.groups).get(&group).map(|record| record.tabs.clone())
    }

    pub fn group_metadata(&self, group: GroupId) -> Option<GroupMetadata> {
        lock(&self.groups)
            .get(&group)
            .and_then(|record| record.metadata.clone())
    }

    pub async fn shutdown(&self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        for (_, tab) in lock(&self.tabs).drain() {
            tab.watcher.abort();
        }
        {
            let mut browser = self.browser.lock().await;
            if let Err(err) = browser.close().await {
                warn!(error = %err, "Failed to close browser gracefully");
            }
        }
        let handle = lock(&self.handler_task).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }

    async fn prepare_page(&self, page: &Page) -> BrowserResult<()> {
        page.execute(AddBindingParams::new(MUTATION_BINDING)).await?;
        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(OBSERVER_SCRIPT)
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        Ok(())
    }

    /// Wires the event watcher to `page` and navigates it. The tab becomes
    /// visible to callers only once navigation has been accepted.
    async fn attach(&self, page: &Page, url: &str) -> BrowserResult<TabId> {
        self.prepare_page(page).await?;
        let mut loads = page.event_listener::<EventLoadEventFired>().await?;
        let mut bindings = page.event_listener::<EventBindingCalled>().await?;

        let tab = TabId(self.next_tab.fetch_add(1, Ordering::SeqCst));
        let (mutations, _) = broadcast::channel(FEED_CAPACITY);
        lock(&self.statuses).insert(tab, TabStatus::Loading);

        let statuses = Arc::clone(&self.statuses);
        let updates = self.updates.clone();
        let feed = mutations.clone();
        let watcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    load = loads.next() => {
                        if load.is_none() {
                            break;
                        }
                        lock(&statuses).insert(tab, TabStatus::Complete);
                        let _ = updates.send(TabUpdate { tab, status: TabStatus::Complete });
                    }
                    call = bindings.next() => match call {
                        Some(call) if call.name == MUTATION_BINDING => {
                            let _ = feed.send(());
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            debug!(tab = %tab, "tab event streams ended");
        });
        let pending = PendingTab::new(tab, &self.statuses, &watcher);

        page.execute(NavigateParams::new(url)).await?;
        pending.commit();

        let session = Arc::new(ChromiumPage::new(page.clone(), mutations));
        lock(&self.tabs).insert(tab, ChromiumTab { session, watcher });
        debug!(tab = %tab, url, "navigation started");
        Ok(tab)
    }
}

#[async_trait]
impl TabSurface for ChromiumTabSurface {
    async fn open_tab(&self, url: &str) -> BrowserResult<TabId> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await?
        };
        match self.attach(&page, url).await {
            Ok(tab) => Ok(tab),
            Err(err) => {
                if let Err(close_err) = page.clone().close().await {
                    warn!(url, error = %close_err, "failed to close abandoned page");
                }
                Err(err)
            }
        }
    }

    async fn group_tabs(&self, tabs: &[TabId]) -> BrowserResult<GroupId> {
        {
            let open = lock(&self.tabs);
            if let Some(missing) = tabs.iter().find(|tab| !open.contains_key(*tab)) {
                return Err(BrowserError::TabNotFound(*missing));
            }
        }
        let group = GroupId(self.next_group.fetch_add(1, Ordering::SeqCst));
        lock(&self.groups).insert(
            group,
            GroupRecord {
                tabs: tabs.to_vec(),
                metadata: None,
            },
        );
        Ok(group)
    }

    async fn update_group(&self, group: GroupId, metadata: &GroupMetadata) -> BrowserResult<()> {
        let mut groups = lock(&self.groups);
        let record = groups
            .get_mut(&group)
            .ok_or_else(|| BrowserError::Unexpected(format!("group {group} not found")))?;
        record.metadata = Some(metadata.clone());
        info!(group = %group, title = %metadata.title, color = ?metadata.color, tabs = record.tabs.len(), "tab group labeled");
        Ok(())
    }

    async fn tab_status(&self, tab: TabId) -> BrowserResult<TabStatus> {
        lock(&self.statuses)
            .get(&tab)
            .copied()
            .ok_or(BrowserError::TabNotFound(tab))
    }

    fn subscribe(&self) -> broadcast::Receiver<TabUpdate> {
        self.updates.subscribe()
    }

    async fn session(&self, tab: TabId) -> BrowserResult<Arc<dyn PageSession>> {
        let session = lock(&self.tabs)
            .get(&tab)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or(BrowserError::TabNotFound(tab))?;
        Ok(session)
    }
}

#[derive(Debug)]
pub struct ChromiumPage {
    page: Page,
    mutations: broadcast::Sender<()>,
    // Chromium reads attached files lazily, so staged copies live as long as the page.
    staged: Mutex<Vec<TempDir>>,
}

impl ChromiumPage {
    fn new(page: Page, mutations: broadcast::Sender<()>) -> Self {
        Self {
            page,
            mutations,
            staged: Mutex::new(Vec::new()),
        }
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> BrowserResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?
            .into_value()
            .map_err(|err| BrowserError::Script(format!("unexpected script result: {err}")))
    }

    /// Runs `body` with `el` bound to the addressed element; the body returns
    /// `true` on success.
    async fn with_element(&self, element: &ElementRef, body: &str) -> BrowserResult<()> {
        let script = format!(
            "(() => {{ const el = document.querySelectorAll({selector})[{index}]; if (!el) return false; {body} }})()",
            selector = js_literal(element.selector()),
            index = element.index(),
        );
        if self.eval::<bool>(script).await? {
            Ok(())
        } else {
            Err(BrowserError::Script(format!(
                "element {}[{}] is no longer in the document",
                element.selector(),
                element.index()
            )))
        }
    }
}

fn js_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Writes each file under its own directory in `root` so the browser sees the
/// original base name. Path components in the name are dropped.
fn stage_files(root: &Path, files: &[PageFile]) -> BrowserResult<Vec<PathBuf>> {
    files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            let name = Path::new(&file.name)
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| format!("file-{index}").into());
            let dir = root.join(index.to_string());
            let path = dir.join(name);
            fs::create_dir(&dir)
                .and_then(|()| fs::write(&path, &file.bytes))
                .map_err(|source| BrowserError::FileStaging {
                    name: file.name.clone(),
                    source,
                })?;
            Ok(path)
        })
        .collect()
}

#[async_trait]
impl PageSession for ChromiumPage {
    async fn count(&self, selector: &str) -> BrowserResult<usize> {
        self.eval(format!(
            "document.querySelectorAll({}).length",
            js_literal(selector)
        ))
        .await
    }

    fn mutations(&self) -> broadcast::Receiver<()> {
        self.mutations.subscribe()
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> BrowserResult<()> {
        let body = format!(
            r#"const value = {value};
            const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype
                : el instanceof HTMLInputElement ? HTMLInputElement.prototype : null;
            const setter = proto && Object.getOwnPropertyDescriptor(proto, 'value').set;
            if (setter) {{ setter.call(el, value); }}
            else if ('value' in el) {{ el.value = value; }}
            else {{ el.textContent = value; }}
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;"#,
            value = js_literal(value),
        );
        self.with_element(element, &body).await
    }

    async fn dispatch(&self, element: &ElementRef, event: DomEvent) -> BrowserResult<()> {
        let body = match event {
            DomEvent::Click => "el.click(); return true;".to_string(),
            DomEvent::Focus => "el.focus(); return true;".to_string(),
            other => format!(
                "el.dispatchEvent(new Event('{}', {{ bubbles: true }})); return true;",
                other.name()
            ),
        };
        self.with_element(element, &body).await
    }

    async fn paste_html(&self, element: &ElementRef, html: &str) -> BrowserResult<()> {
        let body = format!(
            r#"el.focus();
            const data = new DataTransfer();
            data.setData('text/html', {html});
            el.dispatchEvent(new ClipboardEvent('paste', {{ bubbles: true, cancelable: true, clipboardData: data }}));
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;"#,
            html = js_literal(html),
        );
        self.with_element(element, &body).await
    }

    async fn attach_files(&self, element: &ElementRef, files: &[PageFile]) -> BrowserResult<()> {
        let dir = TempDir::new().map_err(|source| BrowserError::FileStaging {
            name: "staging directory".into(),
            source,
        })?;
        let paths = stage_files(dir.path(), files)?;
        let input = self
            .page
            .find_elements(element.selector())
            .await?
            .into_iter()
            .nth(element.index())
            .ok_or_else(|| {
                BrowserError::Script(format!(
                    "element {}[{}] is no longer in the document",
                    element.selector(),
                    element.index()
                ))
            })?;

        let mut params = SetFileInputFilesParams::new(
            paths
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        );
        params.backend_node_id = Some(input.backend_node_id);
        self.page.execute(params).await?;
        lock(&self.staged).push(dir);
        debug!(
            selector = element.selector(),
            files = files.len(),
            bytes = files.iter().map(PageFile::len).sum::<usize>(),
            "files staged for input"
        );

        // DOM.setFileInputFiles fires input and change itself.
        let body = format!("return el.files.length === {};", files.len());
        self.with_element(element, &body).await
    }

    async fn find_by_text(
        &self,
        selector: &str,
        text: &str,
    ) -> BrowserResult<Option<ElementRef>> {
        let index: i64 = self
            .eval(format!(
                "Array.from(document.querySelectorAll({selector})).findIndex((node) => (node.textContent || '').includes({text}))",
                selector = js_literal(selector),
                text = js_literal(text),
            ))
            .await?;
        Ok(usize::try_from(index)
            .ok()
            .map(|index| ElementRef::new(selector, index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_literal_escapes_quotes_and_newlines() {
        assert_eq!(
            js_literal(r#"textarea[placeholder="标题"]"#),
            r#""textarea[placeholder=\"标题\"]""#
        );
        assert_eq!(js_literal("a\nb"), r#""a\nb""#);
    }

    #[test]
    fn staged_files_keep_their_names_and_bytes() {
        let root = tempfile::tempdir().unwrap();
        let files = [
            PageFile {
                name: "cover.png".into(),
                mime_type: "image/png".into(),
                bytes: b"first".to_vec(),
            },
            PageFile {
                name: "cover.png".into(),
                mime_type: "image/png".into(),
                bytes: b"second".to_vec(),
            },
        ];
        let paths = stage_files(root.path(), &files).unwrap();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
        for (path, file) in paths.iter().zip(&files) {
            assert_eq!(path.file_name().unwrap(), "cover.png");
            assert_eq!(fs::read(path).unwrap(), file.bytes);
        }
    }

    #[test]
    fn staged_file_names_cannot_escape_the_root() {
        let root = tempfile::tempdir().unwrap();
        let files = [
            PageFile {
                name: "../../etc/passwd".into(),
                mime_type: "text/plain".into(),
                bytes: vec![1],
            },
            PageFile {
                name: "..".into(),
                mime_type: "text/plain".into(),
                bytes: vec![2],
            },
        ];
        let paths = stage_files(root.path(), &files).unwrap();
        assert_eq!(paths[0], root.path().join("0").join("passwd"));
        assert_eq!(paths[1], root.path().join("1").join("file-1"));
    }

    #[tokio::test]
    async fn abandoned_tab_aborts_its_watcher_and_forgets_its_status() {
        let statuses: StatusMap = Arc::default();
        lock(&statuses).insert(TabId(7), TabStatus::Loading);
        let watcher = tokio::spawn(std::future::pending::<()>());
        drop(PendingTab::new(TabId(7), &statuses, &watcher));

        assert!(watcher.await.unwrap_err().is_cancelled());
        assert!(lock(&statuses).is_empty());
    }

    #[tokio::test]
    async fn committed_tab_keeps_its_watcher_and_status() {
        let statuses: StatusMap = Arc::default();
        lock(&statuses).insert(TabId(3), TabStatus::Loading);
        let watcher = tokio::spawn(std::future::pending::<()>());
        PendingTab::new(TabId(3), &statuses, &watcher).commit();
        tokio::task::yield_now().await;

        assert!(!watcher.is_finished());
        assert_eq!(lock(&statuses).get(&TabId(3)), Some(&TabStatus::Loading));
        watcher.abort();
    }

    #[test]
    fn launcher_builds_config_with_custom_executable() {
        let mut config = MultipostConfig::default();
        config.chromium.executable_path = Some("/usr/bin/chromium".into());
        config.chromium.headless = true;
        config.flags.extra_args = vec!["--window-size=1280,800".into()];
        let launcher = ChromiumLauncher::new(config);
        assert!(launcher.build_chromium_config().is_ok());
    }
}
