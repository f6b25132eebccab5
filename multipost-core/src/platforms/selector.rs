use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::config::SelectorEntry;
use crate::model::{ContentPayload, MediaRef, PayloadKind, PublishRequest};

use super::stages::{
    expect_kind, fill_text, paste_html, publish_by_text, publish_with_retry, soft_wait,
    upload_files,
};
use super::{PlatformRoutine, PublishState, RoutineContext, RoutineError, RoutineReport, RoutineResult};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// How the body reaches the composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// Plain `value` assignment, for `<input>` and `<textarea>`.
    Value,
    /// Synthetic paste, for rich-text editors.
    Paste,
}

impl FromStr for BodyMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "value" => Ok(BodyMode::Value),
            "paste" => Ok(BodyMode::Paste),
            other => Err(format!("unknown body mode: {other}")),
        }
    }
}

/// Routine assembled from selectors declared in `platforms.toml`.
#[derive(Debug, Clone)]
pub struct SelectorRoutine {
    kind: PayloadKind,
    title: Option<String>,
    body: Option<String>,
    body_mode: BodyMode,
    file_input: Option<String>,
    upload_done: Option<String>,
    publish: Option<String>,
    publish_text: Option<String>,
}

impl SelectorRoutine {
    pub fn from_entry(kind: PayloadKind, entry: &SelectorEntry) -> Result<Self, String> {
        Ok(Self {
            kind,
            title: entry.title.clone(),
            body: entry.body.clone(),
            body_mode: entry.body_mode.parse()?,
            file_input: entry.file_input.clone(),
            upload_done: entry.upload_done.clone(),
            publish: entry.publish.clone(),
            publish_text: entry.publish_text.clone(),
        })
    }
}

/// Body text and the media a selector routine uploads for each payload kind.
fn composer_parts(data: &ContentPayload) -> (&str, Vec<MediaRef>) {
    match data {
        ContentPayload::Dynamic(payload) => (
            payload.content.as_str(),
            payload
                .images
                .iter()
                .chain(payload.videos.iter())
                .cloned()
                .collect(),
        ),
        ContentPayload::Article(payload) => (
            payload.preferred_body().unwrap_or(payload.content.as_str()),
            payload.cover.iter().cloned().collect(),
        ),
        ContentPayload::Video(payload) => (payload.content.as_str(), vec![payload.video.clone()]),
    }
}

#[async_trait]
impl PlatformRoutine for SelectorRoutine {
    fn kind(&self) -> PayloadKind {
        self.kind
    }

    async fn run(
        &self,
        ctx: &RoutineContext,
        request: &PublishRequest,
    ) -> RoutineResult<RoutineReport> {
        expect_kind(request, self.kind)?;
        let mut report = RoutineReport::default();
        let (body, media) = composer_parts(&request.data);

        if let Some(selector) = &self.title {
            fill_text(ctx, "title", selector, request.data.title()).await?;
            report.fields_filled += 1;
        }
        if let Some(selector) = &self.body {
            match self.body_mode {
                BodyMode::Value => fill_text(ctx, "body", selector, body).await?,
                BodyMode::Paste => {
                    paste_html(ctx, "body", selector, body).await?;
                    sleep(ctx.timings.editor_settle()).await;
                }
            }
            report.fields_filled += 1;
        }

        if let (Some(selector), false) = (&self.file_input, media.is_empty()) {
            let files = ctx
                .media
                .materialize_all(&media)
                .await
                .map_err(|source| RoutineError::Media {
                    stage: "media",
                    source,
                })?;
            upload_files(ctx, "media", selector, &files).await?;
            if let Some(done) = &self.upload_done {
                soft_wait(ctx, "media upload", done, files.len(), UPLOAD_TIMEOUT).await;
            }
            report.media_attached = files.len();
        }

        report.published = match (&self.publish, &self.publish_text) {
            (Some(selector), _) => {
                sleep(ctx.timings.pre_publish()).await;
                publish_with_retry(ctx, request, selector, ctx.poller.element_timeout()).await
            }
            (None, Some(label)) => publish_by_text(ctx, request, "button", label).await,
            (None, None) => PublishState::Skipped,
        };
        Ok(report)
    }
}
