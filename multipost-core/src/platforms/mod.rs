//! Per-platform composer automation.
//!
//! A routine fills one platform's composer for one payload kind. Routines
//! report failures as values; the orchestrator logs them and moves on, so one
//! platform failing never disturbs the others.

mod selector;
mod stages;
mod tables;
mod taobao;
mod zhihu;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::browser::{BrowserError, DomPoller, PageSession, RetryPolicy};
use crate::config::{MultipostConfig, TimingsSection};
use crate::media::MediaMaterializer;
use crate::model::{PayloadKind, PublishRequest};

pub use selector::{BodyMode, SelectorRoutine};
pub use tables::{article_table, dynamic_table, video_table};
pub use taobao::TaobaoDynamic;
pub use zhihu::ZhihuArticle;

#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: BrowserError,
    },
    #[error("media for stage {stage} unavailable: {source}")]
    Media {
        stage: &'static str,
        #[source]
        source: BrowserError,
    },
    #[error("routine accepts {expected} payloads, request carries {found}")]
    PayloadMismatch {
        expected: PayloadKind,
        found: PayloadKind,
    },
}

pub type RoutineResult<T> = Result<T, RoutineError>;

/// Whether a platform's composer is expected to offer a publish control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishControl {
    Expected,
    Absent,
}

impl std::str::FromStr for PublishControl {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "expected" => Ok(PublishControl::Expected),
            "absent" => Ok(PublishControl::Absent),
            other => Err(format!("unknown publish control expectation: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    /// Auto-publish was off, or the platform has no publish control.
    Skipped,
    Clicked,
    /// The control never showed up within the retry budget.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutineReport {
    pub fields_filled: usize,
    pub media_attached: usize,
    pub published: PublishState,
}

impl Default for RoutineReport {
    fn default() -> Self {
        Self {
            fields_filled: 0,
            media_attached: 0,
            published: PublishState::Skipped,
        }
    }
}

/// Shared, per-process tooling handed to every routine.
#[derive(Debug, Clone)]
pub struct RoutineToolkit {
    pub poller: DomPoller,
    pub media: MediaMaterializer,
    pub retry: RetryPolicy,
    pub timings: TimingsSection,
}

impl RoutineToolkit {
    pub fn from_config(config: &MultipostConfig) -> Result<Self, BrowserError> {
        Ok(Self {
            poller: DomPoller::new(&config.poller),
            media: MediaMaterializer::new(&config.media)?,
            retry: RetryPolicy::new(config.retry.clone()),
            timings: config.timings.clone(),
        })
    }

    pub fn context(
        &self,
        platform: &str,
        page: Arc<dyn PageSession>,
        publish_control: PublishControl,
    ) -> RoutineContext {
        RoutineContext {
            platform: platform.to_string(),
            page,
            poller: self.poller.clone(),
            media: self.media.clone(),
            retry: self.retry.clone(),
            timings: self.timings.clone(),
            publish_control,
        }
    }
}

/// Everything a routine may touch while it runs in one tab.
pub struct RoutineContext {
    pub platform: String,
    pub page: Arc<dyn PageSession>,
    pub poller: DomPoller,
    pub media: MediaMaterializer,
    pub retry: RetryPolicy,
    pub timings: TimingsSection,
    pub publish_control: PublishControl,
}

#[async_trait]
pub trait PlatformRoutine: Send + Sync {
    fn kind(&self) -> PayloadKind;

    async fn run(
        &self,
        ctx: &RoutineContext,
        request: &PublishRequest,
    ) -> RoutineResult<RoutineReport>;
}
