use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{DomEvent, ElementRef};
use crate::model::{
    ArticlePayload, ContentPayload, DynamicPayload, PageFile, PayloadKind, PublishRequest,
};

use super::{PublishControl, PublishState, RoutineContext, RoutineError, RoutineResult};

pub(super) fn expect_kind(request: &PublishRequest, expected: PayloadKind) -> RoutineResult<()> {
    let found = request.data.kind();
    if found == expected {
        Ok(())
    } else {
        Err(RoutineError::PayloadMismatch { expected, found })
    }
}

pub(super) fn article_payload(request: &PublishRequest) -> RoutineResult<&ArticlePayload> {
    match &request.data {
        ContentPayload::Article(article) => Ok(article),
        other => Err(RoutineError::PayloadMismatch {
            expected: PayloadKind::Article,
            found: other.kind(),
        }),
    }
}

pub(super) fn dynamic_payload(request: &PublishRequest) -> RoutineResult<&DynamicPayload> {
    match &request.data {
        ContentPayload::Dynamic(dynamic) => Ok(dynamic),
        other => Err(RoutineError::PayloadMismatch {
            expected: PayloadKind::Dynamic,
            found: other.kind(),
        }),
    }
}

pub(super) async fn locate(
    ctx: &RoutineContext,
    stage: &'static str,
    selector: &str,
) -> RoutineResult<ElementRef> {
    locate_within(ctx, stage, selector, ctx.poller.element_timeout()).await
}

pub(super) async fn locate_within(
    ctx: &RoutineContext,
    stage: &'static str,
    selector: &str,
    timeout: Duration,
) -> RoutineResult<ElementRef> {
    ctx.poller
        .wait_for_element(ctx.page.as_ref(), selector, timeout)
        .await
        .map_err(|source| RoutineError::Stage { stage, source })
}

pub(super) async fn fill_text(
    ctx: &RoutineContext,
    stage: &'static str,
    selector: &str,
    value: &str,
) -> RoutineResult<()> {
    let element = locate(ctx, stage, selector).await?;
    ctx.page
        .fill(&element, value)
        .await
        .map_err(|source| RoutineError::Stage { stage, source })?;
    debug!(platform = %ctx.platform, stage, chars = value.chars().count(), "field filled");
    Ok(())
}

pub(super) async fn paste_html(
    ctx: &RoutineContext,
    stage: &'static str,
    selector: &str,
    html: &str,
) -> RoutineResult<()> {
    let element = locate(ctx, stage, selector).await?;
    ctx.page
        .dispatch(&element, DomEvent::Focus)
        .await
        .map_err(|source| RoutineError::Stage { stage, source })?;
    ctx.page
        .paste_html(&element, html)
        .await
        .map_err(|source| RoutineError::Stage { stage, source })?;
    debug!(platform = %ctx.platform, stage, bytes = html.len(), "editor content pasted");
    Ok(())
}

pub(super) async fn click(
    ctx: &RoutineContext,
    stage: &'static str,
    selector: &str,
) -> RoutineResult<()> {
    let element = locate(ctx, stage, selector).await?;
    ctx.page
        .dispatch(&element, DomEvent::Click)
        .await
        .map_err(|source| RoutineError::Stage { stage, source })
}

/// Hands `files` to the file input at `selector`, then lets the upload start.
pub(super) async fn upload_files(
    ctx: &RoutineContext,
    stage: &'static str,
    selector: &str,
    files: &[PageFile],
) -> RoutineResult<()> {
    let input = locate(ctx, stage, selector).await?;
    ctx.page
        .attach_files(&input, files)
        .await
        .map_err(|source| RoutineError::Stage { stage, source })?;
    sleep(ctx.timings.upload_settle()).await;
    debug!(platform = %ctx.platform, stage, files = files.len(), "files attached");
    Ok(())
}

/// Waits for an upload indicator without failing the routine when it never shows.
pub(super) async fn soft_wait(
    ctx: &RoutineContext,
    stage: &'static str,
    selector: &str,
    count: usize,
    timeout: Duration,
) -> bool {
    let result = if count <= 1 {
        ctx.poller
            .wait_for_element(ctx.page.as_ref(), selector, timeout)
            .await
            .map(|_| ())
    } else {
        ctx.poller
            .wait_for_elements(ctx.page.as_ref(), selector, count, timeout)
            .await
            .map(|_| ())
    };
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(platform = %ctx.platform, stage, error = %err, "upload indicator not seen, continuing");
            false
        }
    }
}

fn publish_allowed(ctx: &RoutineContext, request: &PublishRequest) -> bool {
    if !request.auto_publish {
        debug!(platform = %ctx.platform, "auto publish disabled");
        return false;
    }
    if ctx.publish_control == PublishControl::Absent {
        debug!(platform = %ctx.platform, "platform declares no publish control");
        return false;
    }
    true
}

/// Locates and clicks the publish control under the shared retry policy.
pub(super) async fn publish_with_retry(
    ctx: &RoutineContext,
    request: &PublishRequest,
    selector: &str,
    timeout: Duration,
) -> PublishState {
    if !publish_allowed(ctx, request) {
        return PublishState::Skipped;
    }
    let outcome = ctx
        .retry
        .run("publish control", |_| async move {
            let element = ctx
                .poller
                .wait_for_element(ctx.page.as_ref(), selector, timeout)
                .await?;
            ctx.page.dispatch(&element, DomEvent::Click).await?;
            sleep(ctx.timings.publish_settle()).await;
            Ok(())
        })
        .await;
    match outcome {
        Ok(outcome) => {
            info!(platform = %ctx.platform, attempts = outcome.attempts, "publish clicked");
            PublishState::Clicked
        }
        Err(err) => {
            warn!(
                platform = %ctx.platform,
                attempts = ctx.retry.max_attempts(),
                error = %err,
                "publish control missing after retries"
            );
            PublishState::Missing
        }
    }
}

/// Finds the publish control by its label after letting the composer settle.
pub(super) async fn publish_by_text(
    ctx: &RoutineContext,
    request: &PublishRequest,
    selector: &str,
    label: &str,
) -> PublishState {
    if !publish_allowed(ctx, request) {
        return PublishState::Skipped;
    }
    sleep(ctx.timings.pre_publish()).await;
    let control = match ctx.page.find_by_text(selector, label).await {
        Ok(Some(control)) => control,
        Ok(None) => {
            warn!(platform = %ctx.platform, label, "publish control not found");
            return PublishState::Missing;
        }
        Err(err) => {
            warn!(platform = %ctx.platform, label, error = %err, "publish control lookup failed");
            return PublishState::Missing;
        }
    };
    match ctx.page.dispatch(&control, DomEvent::Click).await {
        Ok(()) => {
            info!(platform = %ctx.platform, "publish clicked");
            PublishState::Clicked
        }
        Err(err) => {
            warn!(platform = %ctx.platform, error = %err, "publish click failed");
            PublishState::Missing
        }
    }
}
