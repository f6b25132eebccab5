use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::config::PollerSection;

use super::error::{BrowserError, BrowserResult};
use super::page::{ElementRef, PageSession};

/// How a wait decides when to re-evaluate its selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Re-check on every structural mutation of the document.
    Mutation,
    /// Re-check on a fixed tick.
    Interval(Duration),
}

/// Waits for third-party page JavaScript to render the elements a routine needs.
///
/// Every call owns its subscription and its timer; both are released when the
/// call returns, whether it resolved or timed out. Calls share no state, so any
/// number of waits can be outstanding on the same page.
#[derive(Debug, Clone)]
pub struct DomPoller {
    element_timeout: Duration,
    elements_timeout: Duration,
    interval: Duration,
}

impl Default for DomPoller {
    fn default() -> Self {
        Self::new(&PollerSection::default())
    }
}

impl DomPoller {
    pub fn new(config: &PollerSection) -> Self {
        Self {
            element_timeout: Duration::from_millis(config.element_timeout_ms),
            elements_timeout: Duration::from_millis(config.elements_timeout_ms),
            interval: Duration::from_millis(config.interval_ms.max(1)),
        }
    }

    pub fn element_timeout(&self) -> Duration {
        self.element_timeout
    }

    pub fn elements_timeout(&self) -> Duration {
        self.elements_timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn wait_for_element(
        &self,
        page: &dyn PageSession,
        selector: &str,
        timeout: Duration,
    ) -> BrowserResult<ElementRef> {
        let found = self
            .wait_with(page, selector, 1, timeout, WaitStrategy::Mutation)
            .await?;
        found.into_iter().next().ok_or_else(|| {
            BrowserError::Unexpected(format!("wait for \"{selector}\" resolved without a match"))
        })
    }

    /// Resolves once at least `count` elements match at the same time.
    pub async fn wait_for_elements(
        &self,
        page: &dyn PageSession,
        selector: &str,
        count: usize,
        timeout: Duration,
    ) -> BrowserResult<Vec<ElementRef>> {
        self.wait_with(
            page,
            selector,
            count,
            timeout,
            WaitStrategy::Interval(self.interval),
        )
        .await
    }

    pub async fn wait_with(
        &self,
        page: &dyn PageSession,
        selector: &str,
        count: usize,
        timeout: Duration,
        strategy: WaitStrategy,
    ) -> BrowserResult<Vec<ElementRef>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let result = match strategy {
            WaitStrategy::Mutation => {
                self.observe_until(page, selector, count, timeout, deadline)
                    .await
            }
            WaitStrategy::Interval(tick) => {
                poll_until(page, selector, count, timeout, deadline, tick).await
            }
        };
        match &result {
            Ok(found) => debug!(
                selector,
                matches = found.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "element wait resolved"
            ),
            Err(err) => debug!(selector, error = %err, "element wait failed"),
        }
        result
    }

    async fn observe_until(
        &self,
        page: &dyn PageSession,
        selector: &str,
        count: usize,
        timeout: Duration,
        deadline: Instant,
    ) -> BrowserResult<Vec<ElementRef>> {
        // Subscribe before the first check so a mutation landing in between is not lost.
        let mut feed = page.mutations();
        loop {
            if let Some(found) = matches(page, selector, count).await? {
                return Ok(found);
            }
            tokio::select! {
                signal = feed.recv() => match signal {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        trace!(selector, "mutation observed");
                    }
                    Err(RecvError::Closed) => {
                        debug!(selector, "mutation feed closed, falling back to interval polling");
                        return poll_until(page, selector, count, timeout, deadline, self.interval)
                            .await;
                    }
                },
                _ = sleep_until(deadline) => {
                    return matches(page, selector, count)
                        .await?
                        .ok_or_else(|| timeout_error(selector, count, timeout));
                }
            }
        }
    }
}

async fn poll_until(
    page: &dyn PageSession,
    selector: &str,
    count: usize,
    timeout: Duration,
    deadline: Instant,
    tick: Duration,
) -> BrowserResult<Vec<ElementRef>> {
    loop {
        if let Some(found) = matches(page, selector, count).await? {
            return Ok(found);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(timeout_error(selector, count, timeout));
        }
        sleep_until((now + tick).min(deadline)).await;
    }
}

async fn matches(
    page: &dyn PageSession,
    selector: &str,
    count: usize,
) -> BrowserResult<Option<Vec<ElementRef>>> {
    let present = page.count(selector).await?;
    if present >= count {
        Ok(Some(
            (0..count)
                .map(|index| ElementRef::new(selector, index))
                .collect(),
        ))
    } else {
        Ok(None)
    }
}

fn timeout_error(selector: &str, count: usize, timeout: Duration) -> BrowserError {
    BrowserError::ElementTimeout {
        selector: selector.to_string(),
        count,
        timeout_ms: timeout.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::browser::memory::MemoryPage;
    use crate::browser::page::DomEvent;
    use crate::model::PageFile;

    fn poller() -> DomPoller {
        DomPoller::default()
    }

    /// Document whose mutation feed is already closed when handed out.
    struct DetachedFeedPage(Arc<MemoryPage>);

    #[async_trait]
    impl PageSession for DetachedFeedPage {
        async fn count(&self, selector: &str) -> BrowserResult<usize> {
            self.0.count(selector).await
        }

        fn mutations(&self) -> broadcast::Receiver<()> {
            let (sender, receiver) = broadcast::channel(1);
            drop(sender);
            receiver
        }

        async fn fill(&self, element: &ElementRef, value: &str) -> BrowserResult<()> {
            self.0.fill(element, value).await
        }

        async fn dispatch(&self, element: &ElementRef, event: DomEvent) -> BrowserResult<()> {
            self.0.dispatch(element, event).await
        }

        async fn paste_html(&self, element: &ElementRef, html: &str) -> BrowserResult<()> {
            self.0.paste_html(element, html).await
        }

        async fn attach_files(
            &self,
            element: &ElementRef,
            files: &[PageFile],
        ) -> BrowserResult<()> {
            self.0.attach_files(element, files).await
        }

        async fn find_by_text(
            &self,
            selector: &str,
            text: &str,
        ) -> BrowserResult<Option<ElementRef>> {
            self.0.find_by_text(selector, text).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn present_element_resolves_without_waiting() {
        let page = MemoryPage::new();
        page.insert("#title", "");
        let started = Instant::now();
        let element = poller()
            .wait_for_element(&page, "#title", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(element, ElementRef::new("#title", 0));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn present_element_resolves_even_with_zero_timeout() {
        let page = MemoryPage::new();
        page.insert("#title", "");
        assert!(poller()
            .wait_for_element(&page, "#title", Duration::ZERO)
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_wait_resolves_when_element_is_inserted() {
        let page = Arc::new(MemoryPage::new());
        let writer = Arc::clone(&page);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(750)).await;
            writer.insert("#description", "");
        });
        let started = Instant::now();
        let element = poller()
            .wait_for_element(page.as_ref(), "#description", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(element.selector(), "#description");
        assert_eq!(started.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_element_times_out_at_the_deadline() {
        let page = MemoryPage::new();
        let started = Instant::now();
        let err = poller()
            .wait_for_element(&page, "#missing", Duration::from_secs(10))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed <= Duration::from_secs(10) + poller().interval());
        match err {
            BrowserError::ElementTimeout {
                selector,
                count,
                timeout_ms,
            } => {
                assert_eq!(selector, "#missing");
                assert_eq!(count, 1);
                assert_eq!(timeout_ms, 10_000);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(page.mutation_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_mutations_do_not_resolve_the_wait() {
        let page = Arc::new(MemoryPage::new());
        let writer = Arc::clone(&page);
        tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                writer.insert(".noise", "");
            }
        });
        let result = poller()
            .wait_for_element(page.as_ref(), "#target", Duration::from_secs(1))
            .await;
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_is_released_after_success() {
        let page = Arc::new(MemoryPage::new());
        let writer = Arc::clone(&page);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.insert("#a", "");
        });
        poller()
            .wait_for_element(page.as_ref(), "#a", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(page.mutation_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn count_wait_never_resolves_below_threshold() {
        let page = Arc::new(MemoryPage::new());
        let writer = Arc::clone(&page);
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(250)).await;
                writer.insert_silently(".upload-success", "");
            }
        });
        let started = Instant::now();
        let found = poller()
            .wait_for_elements(page.as_ref(), ".upload-success", 3, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(750));
        assert!(started.elapsed() <= Duration::from_millis(850));
    }

    #[tokio::test(start_paused = true)]
    async fn count_wait_times_out_when_threshold_is_never_met() {
        let page = MemoryPage::new();
        page.insert(".upload-success", "");
        let started = Instant::now();
        let err = poller()
            .wait_for_elements(&page, ".upload-success", 2, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() <= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_waits_are_independent() {
        let page = Arc::new(MemoryPage::new());
        let writer = Arc::clone(&page);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.insert("#first", "");
        });
        let poller = poller();
        let (first, second) = tokio::join!(
            poller.wait_for_element(page.as_ref(), "#first", Duration::from_secs(1)),
            poller.wait_for_element(page.as_ref(), "#second", Duration::from_millis(300)),
        );
        assert!(first.is_ok());
        assert!(second.unwrap_err().is_timeout());
        assert_eq!(page.mutation_subscribers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_mutation_feed_falls_back_to_interval_polling() {
        let document = Arc::new(MemoryPage::new());
        let writer = Arc::clone(&document);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            writer.insert_silently("#late", "");
        });
        let page = DetachedFeedPage(document);
        let started = Instant::now();
        let element = poller()
            .wait_for_element(&page, "#late", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(element, ElementRef::new("#late", 0));
        // First interval tick after the insert.
        assert_eq!(started.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_mutation_feed_still_times_out_at_the_deadline() {
        let page = DetachedFeedPage(Arc::new(MemoryPage::new()));
        let started = Instant::now();
        let err = poller()
            .wait_for_element(&page, "#never", Duration::from_millis(450))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn count_wait_returns_exactly_the_requested_matches() {
        let page = MemoryPage::new();
        for _ in 0..5 {
            page.insert(".upload-success", "");
        }
        let found = poller()
            .wait_for_elements(&page, ".upload-success", 2, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            found,
            [
                ElementRef::new(".upload-success", 0),
                ElementRef::new(".upload-success", 1),
            ]
        );
    }
}
