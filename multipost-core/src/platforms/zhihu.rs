use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use crate::model::{ArticlePayload, MediaRef, PayloadKind, PublishRequest};

use super::stages::{
    article_payload, click, fill_text, locate, paste_html, publish_by_text, soft_wait,
};
use super::{PlatformRoutine, RoutineContext, RoutineError, RoutineReport, RoutineResult};

const TITLE_INPUT: &str = r#"textarea[placeholder="请输入标题（最多 100 个字）"]"#;
const EDITOR: &str = r#"div[data-contents="true"]"#;
const COVER_TRIGGER: &str = ".UploadPicture-wrapper";
const COVER_INPUT: &str = r#"input[type="file"].UploadPicture-input"#;
const COVER_PREVIEW: &str = ".Image-PreviewImage";
const PUBLISH_LABEL: &str = "发布";
const TITLE_LIMIT: usize = 100;
const EMPTY_BODY: &str = "<p>内容为空</p>";
const COVER_PREVIEW_TIMEOUT: Duration = Duration::from_secs(15);

/// Zhihu column article composer.
#[derive(Debug, Default)]
pub struct ZhihuArticle;

#[async_trait]
impl PlatformRoutine for ZhihuArticle {
    fn kind(&self) -> PayloadKind {
        PayloadKind::Article
    }

    async fn run(
        &self,
        ctx: &RoutineContext,
        request: &PublishRequest,
    ) -> RoutineResult<RoutineReport> {
        let article = article_payload(request)?;
        let mut report = RoutineReport::default();

        fill_article(ctx, article).await?;
        report.fields_filled = 2;

        if let Some(cover) = &article.cover {
            upload_cover(ctx, cover).await?;
            report.media_attached = 1;
        } else {
            debug!(platform = %ctx.platform, "no cover to upload");
        }

        report.published = publish_by_text(ctx, request, "button", PUBLISH_LABEL).await;
        Ok(report)
    }
}

async fn fill_article(ctx: &RoutineContext, article: &ArticlePayload) -> RoutineResult<()> {
    let title = article.title.chars().take(TITLE_LIMIT).collect::<String>();
    fill_text(ctx, "title", TITLE_INPUT, &title).await?;

    let body = article.preferred_body().unwrap_or(EMPTY_BODY);
    paste_html(ctx, "editor", EDITOR, body).await?;
    sleep(ctx.timings.editor_settle()).await;
    Ok(())
}

async fn upload_cover(ctx: &RoutineContext, cover: &MediaRef) -> RoutineResult<()> {
    click(ctx, "cover trigger", COVER_TRIGGER).await?;
    let input = locate(ctx, "cover input", COVER_INPUT).await?;
    let file = ctx
        .media
        .materialize(cover)
        .await
        .map_err(|source| RoutineError::Media {
            stage: "cover",
            source,
        })?;
    ctx.page
        .attach_files(&input, std::slice::from_ref(&file))
        .await
        .map_err(|source| RoutineError::Stage {
            stage: "cover",
            source,
        })?;
    soft_wait(ctx, "cover preview", COVER_PREVIEW, 1, COVER_PREVIEW_TIMEOUT).await;
    sleep(ctx.timings.editor_settle()).await;
    Ok(())
}
