use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::model::{DynamicPayload, PayloadKind, PublishRequest};

use super::stages::{dynamic_payload, fill_text, publish_with_retry, soft_wait, upload_files};
use super::{PlatformRoutine, RoutineContext, RoutineError, RoutineReport, RoutineResult};

const TITLE_INPUT: &str = "#title";
const DESCRIPTION_INPUT: &str = "#description";
const FILE_INPUT: &str = r#"input[type="file"]"#;
const UPLOAD_DONE: &str = ".upload-success";
const PUBLISH_BUTTON: &str = "#J_PublishBtn";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Taobao listing composer: title, description and product images.
#[derive(Debug, Default)]
pub struct TaobaoDynamic;

#[async_trait]
impl PlatformRoutine for TaobaoDynamic {
    fn kind(&self) -> PayloadKind {
        PayloadKind::Dynamic
    }

    async fn run(
        &self,
        ctx: &RoutineContext,
        request: &PublishRequest,
    ) -> RoutineResult<RoutineReport> {
        let payload = dynamic_payload(request)?;
        let mut report = RoutineReport::default();

        fill_text(ctx, "title", TITLE_INPUT, &payload.title).await?;
        fill_text(ctx, "description", DESCRIPTION_INPUT, &payload.content).await?;
        report.fields_filled = 2;

        report.media_attached = upload_images(ctx, payload).await?;

        sleep(ctx.timings.publish_settle()).await;
        report.published = publish_with_retry(ctx, request, PUBLISH_BUTTON, PUBLISH_TIMEOUT).await;
        Ok(report)
    }
}

async fn upload_images(ctx: &RoutineContext, payload: &DynamicPayload) -> RoutineResult<usize> {
    if payload.images.is_empty() {
        debug!(platform = %ctx.platform, "no images to upload");
        return Ok(0);
    }
    let files = ctx
        .media
        .materialize_all(&payload.images)
        .await
        .map_err(|source| RoutineError::Media {
            stage: "images",
            source,
        })?;
    upload_files(ctx, "images", FILE_INPUT, &files).await?;
    if soft_wait(ctx, "image upload", UPLOAD_DONE, files.len(), UPLOAD_TIMEOUT).await {
        info!(platform = %ctx.platform, images = files.len(), "images uploaded");
    }
    Ok(files.len())
}
