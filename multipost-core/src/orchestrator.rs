use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{
    BrowserError, BrowserResult, GroupColor, GroupMetadata, TabId, TabStatus, TabSurface,
    TabUpdate,
};
use crate::config::{GroupingSection, MultipostConfig};
use crate::model::PublishRequest;
use crate::platforms::{RoutineReport, RoutineToolkit};
use crate::registry::PlatformRegistry;

/// A tab opened for one platform of a batch. Lives for one dispatch only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabBinding {
    pub tab: TabId,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlatformResult {
    Completed { report: RoutineReport },
    Failed { reason: String },
    NeverLoaded { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformOutcome {
    pub platform: String,
    pub tab: TabId,
    #[serde(flatten)]
    pub result: PlatformResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub unresolved: Vec<String>,
    pub not_opened: Vec<String>,
    pub outcomes: Vec<PlatformOutcome>,
}

impl DispatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, PlatformResult::Completed { .. }))
            .count()
    }
}

/// Injections scheduled for a batch. Dropping it leaves the routines running.
#[derive(Debug)]
pub struct Dispatch {
    batch_id: Uuid,
    started_at: DateTime<Utc>,
    unresolved: Vec<String>,
    not_opened: Vec<String>,
    pending: Vec<(TabBinding, JoinHandle<PlatformResult>)>,
}

impl Dispatch {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn bindings(&self) -> Vec<TabBinding> {
        self.pending.iter().map(|(binding, _)| binding.clone()).collect()
    }

    /// Waits for every scheduled routine. Tabs that never finish loading keep
    /// this pending; callers that need a bound wrap it in a timeout.
    pub async fn join(self) -> DispatchReport {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        for (binding, handle) in self.pending {
            let result = handle.await.unwrap_or_else(|err| PlatformResult::Failed {
                reason: format!("routine task aborted: {err}"),
            });
            outcomes.push(PlatformOutcome {
                platform: binding.platform,
                tab: binding.tab,
                result,
            });
        }
        DispatchReport {
            batch_id: self.batch_id,
            started_at: self.started_at,
            unresolved: self.unresolved,
            not_opened: self.not_opened,
            outcomes,
        }
    }
}

/// Fans one publish request out to a tab per platform.
pub struct Orchestrator {
    surface: Arc<dyn TabSurface>,
    registry: Arc<PlatformRegistry>,
    toolkit: RoutineToolkit,
    title_prefix: String,
    color: GroupColor,
}

impl Orchestrator {
    pub fn new(
        surface: Arc<dyn TabSurface>,
        registry: Arc<PlatformRegistry>,
        toolkit: RoutineToolkit,
        grouping: &GroupingSection,
    ) -> BrowserResult<Self> {
        let color = grouping
            .color
            .parse()
            .map_err(BrowserError::Configuration)?;
        Ok(Self {
            surface,
            registry,
            toolkit,
            title_prefix: grouping.title_prefix.clone(),
            color,
        })
    }

    pub fn from_config(
        surface: Arc<dyn TabSurface>,
        registry: Arc<PlatformRegistry>,
        config: &MultipostConfig,
    ) -> BrowserResult<Self> {
        let toolkit = RoutineToolkit::from_config(config)?;
        Self::new(surface, registry, toolkit, &config.grouping)
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    /// Phase 1 followed by phase 2.
    pub async fn publish(&self, request: PublishRequest) -> Dispatch {
        let bindings = self.open_tabs(&request).await;
        let mut dispatch = self.inject_all(bindings, &request);
        let targets = request.targets();
        dispatch.unresolved = targets
            .iter()
            .filter(|id| self.registry.resolve(id).is_none())
            .map(|id| id.to_string())
            .collect();
        let bound = dispatch.bindings();
        dispatch.not_opened = targets
            .iter()
            .filter(|id| self.registry.resolve(id).is_some())
            .filter(|id| !bound.iter().any(|binding| binding.platform == **id))
            .map(|id| id.to_string())
            .collect();
        info!(
            batch = %dispatch.batch_id,
            requested = targets.len(),
            scheduled = bound.len(),
            unresolved = dispatch.unresolved.len(),
            "publish dispatched"
        );
        dispatch
    }

    /// Phase 1: opens one tab per resolvable platform, in request order, and
    /// groups them under a timestamped batch label.
    pub async fn open_tabs(&self, request: &PublishRequest) -> Vec<TabBinding> {
        let mut bindings = Vec::new();
        for platform in request.targets() {
            let Some(descriptor) = self.registry.resolve(platform) else {
                warn!(platform, "unknown platform, skipping");
                continue;
            };
            match self.surface.open_tab(&descriptor.inject_url).await {
                Ok(tab) => {
                    debug!(platform, tab = %tab, url = %descriptor.inject_url, "tab opened");
                    bindings.push(TabBinding {
                        tab,
                        platform: platform.to_string(),
                    });
                }
                Err(err) => warn!(platform, error = %err, "failed to open tab"),
            }
        }
        if !bindings.is_empty() {
            self.group(&bindings).await;
        }
        bindings
    }

    async fn group(&self, bindings: &[TabBinding]) {
        let tabs = bindings.iter().map(|binding| binding.tab).collect::<Vec<_>>();
        let metadata = GroupMetadata {
            title: format!("{}-{}", self.title_prefix, Local::now().format("%H:%M")),
            color: self.color,
        };
        let grouped = match self.surface.group_tabs(&tabs).await {
            Ok(group) => self
                .surface
                .update_group(group, &metadata)
                .await
                .map(|()| group),
            Err(err) => Err(err),
        };
        match grouped {
            Ok(group) => info!(group = %group, title = %metadata.title, tabs = tabs.len(), "tabs grouped"),
            Err(err) => warn!(error = %err, "failed to group tabs"),
        }
    }

    /// Phase 2: arms a one-shot load listener per tab. Returns immediately;
    /// each routine starts when its own tab reports load-complete.
    pub fn inject_all(&self, bindings: Vec<TabBinding>, request: &PublishRequest) -> Dispatch {
        let pending = bindings
            .into_iter()
            .map(|binding| {
                let handle = self.arm(binding.clone(), request.clone());
                (binding, handle)
            })
            .collect();
        Dispatch {
            batch_id: Uuid::new_v4(),
            started_at: Utc::now(),
            unresolved: Vec::new(),
            not_opened: Vec::new(),
            pending,
        }
    }

    fn arm(&self, binding: TabBinding, request: PublishRequest) -> JoinHandle<PlatformResult> {
        // Subscribed before spawning so a load finishing right now is still seen.
        let updates = self.surface.subscribe();
        let surface = Arc::clone(&self.surface);
        let registry = Arc::clone(&self.registry);
        let toolkit = self.toolkit.clone();
        tokio::spawn(async move {
            if let Err(reason) = await_load(surface.as_ref(), updates, binding.tab).await {
                warn!(platform = %binding.platform, tab = %binding.tab, reason = %reason, "tab never loaded");
                return PlatformResult::NeverLoaded { reason };
            }
            inject(surface.as_ref(), &registry, &toolkit, &binding, &request).await
        })
    }
}

/// Resolves on the first load-complete for `tab`, consuming the subscription.
async fn await_load(
    surface: &dyn TabSurface,
    mut updates: Receiver<TabUpdate>,
    tab: TabId,
) -> Result<(), String> {
    if is_complete(surface, tab).await {
        return Ok(());
    }
    loop {
        match updates.recv().await {
            Ok(update) if update.tab == tab && update.status == TabStatus::Complete => {
                return Ok(());
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(tab = %tab, skipped, "tab update feed lagged");
                if is_complete(surface, tab).await {
                    return Ok(());
                }
            }
            Err(RecvError::Closed) => return Err("tab update feed closed".to_string()),
        }
    }
}

async fn is_complete(surface: &dyn TabSurface, tab: TabId) -> bool {
    matches!(surface.tab_status(tab).await, Ok(TabStatus::Complete))
}

async fn inject(
    surface: &dyn TabSurface,
    registry: &PlatformRegistry,
    toolkit: &RoutineToolkit,
    binding: &TabBinding,
    request: &PublishRequest,
) -> PlatformResult {
    let platform = binding.platform.as_str();
    let Some(descriptor) = registry.resolve(platform) else {
        return PlatformResult::Failed {
            reason: format!("platform {platform} is not registered"),
        };
    };
    let page = match surface.session(binding.tab).await {
        Ok(page) => page,
        Err(err) => {
            warn!(platform, tab = %binding.tab, error = %err, "no page session for tab");
            return PlatformResult::Failed {
                reason: err.to_string(),
            };
        }
    };
    info!(platform, tab = %binding.tab, "tab loaded, running routine");
    let ctx = toolkit.context(platform, page, descriptor.publish_control);
    match descriptor.routine.run(&ctx, request).await {
        Ok(report) => {
            info!(
                platform,
                fields = report.fields_filled,
                media = report.media_attached,
                published = ?report.published,
                "routine finished"
            );
            PlatformResult::Completed { report }
        }
        Err(err) => {
            warn!(platform, error = %err, "routine failed");
            PlatformResult::Failed {
                reason: err.to_string(),
            }
        }
    }
}
