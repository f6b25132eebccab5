use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use multipost_core::browser::memory::{MemoryPage, PageAction};
use multipost_core::browser::{DomEvent, PageSession};
use multipost_core::config::{load_platforms_config, MultipostConfig};
use multipost_core::model::{
    ArticlePayload, ContentPayload, DynamicPayload, MediaRef, PayloadKind, PublishRequest,
    VideoPayload,
};
use multipost_core::platforms::{
    PlatformRoutine, PublishControl, PublishState, RoutineContext, RoutineError, RoutineToolkit,
    TaobaoDynamic, ZhihuArticle,
};
use multipost_core::registry::PlatformRegistry;

const ZHIHU_TITLE: &str = r#"textarea[placeholder="请输入标题（最多 100 个字）"]"#;
const ZHIHU_EDITOR: &str = r#"div[data-contents="true"]"#;
const ZHIHU_COVER_TRIGGER: &str = ".UploadPicture-wrapper";
const ZHIHU_COVER_INPUT: &str = r#"input[type="file"].UploadPicture-input"#;
const ZHIHU_COVER_PREVIEW: &str = ".Image-PreviewImage";
const FILE_INPUT: &str = r#"input[type="file"]"#;

fn context(platform: &str, page: &Arc<MemoryPage>, control: PublishControl) -> RoutineContext {
    let toolkit = RoutineToolkit::from_config(&MultipostConfig::default()).unwrap();
    toolkit.context(platform, Arc::clone(page) as Arc<dyn PageSession>, control)
}

fn inline_media(name: &str, mime_type: &str) -> MediaRef {
    MediaRef {
        name: name.into(),
        url: format!("blob:{name}"),
        mime_type: mime_type.into(),
        size: 5,
        base64: Some("aGVsbG8=".into()),
        origin_url: None,
    }
}

fn article(title: &str, cover: Option<MediaRef>) -> ArticlePayload {
    ArticlePayload {
        title: title.into(),
        content: "<p>rendered</p>".into(),
        digest: String::new(),
        cover,
        images: vec![],
        videos: vec![],
        file_datas: vec![],
        origin_content: Some("<p>original</p>".into()),
        markdown_content: None,
        markdown_origin_content: None,
    }
}

fn zhihu_page() -> Arc<MemoryPage> {
    let page = Arc::new(MemoryPage::new());
    page.insert(ZHIHU_TITLE, "");
    page.insert(ZHIHU_EDITOR, "");
    page.insert(ZHIHU_COVER_TRIGGER, "");
    page.on_click(ZHIHU_COVER_TRIGGER, ZHIHU_COVER_INPUT);
    page.on_attach(ZHIHU_COVER_INPUT, ZHIHU_COVER_PREVIEW);
    page.insert("button", "保存草稿");
    page.insert("button", "发布");
    page
}

fn taobao_page() -> Arc<MemoryPage> {
    let page = Arc::new(MemoryPage::new());
    page.insert("#title", "");
    page.insert("#description", "");
    page.insert(FILE_INPUT, "");
    page.on_attach(FILE_INPUT, ".upload-success");
    page
}

fn taobao_request(auto_publish: bool, images: usize) -> PublishRequest {
    PublishRequest::new(
        vec!["DYNAMIC_TAOBAO".into()],
        auto_publish,
        ContentPayload::Dynamic(DynamicPayload {
            title: "Handmade mug".into(),
            content: "Glazed stoneware, 350ml".into(),
            images: (0..images)
                .map(|index| inline_media(&format!("mug-{index}.jpg"), "image/jpeg"))
                .collect(),
            videos: vec![],
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn zhihu_fills_composer_and_clicks_publish() {
    let page = zhihu_page();
    let ctx = context("ARTICLE_ZHIHU", &page, PublishControl::Expected);
    let long_title = "标".repeat(120);
    let request = PublishRequest::new(
        vec!["ARTICLE_ZHIHU".into()],
        true,
        ContentPayload::Article(article(&long_title, Some(inline_media("cover.png", "image/png")))),
    );

    let report = ZhihuArticle.run(&ctx, &request).await.unwrap();

    assert_eq!(report.fields_filled, 2);
    assert_eq!(report.media_attached, 1);
    assert_eq!(report.published, PublishState::Clicked);
    let title = page.element(ZHIHU_TITLE, 0).unwrap();
    assert_eq!(title.value.chars().count(), 100);
    assert_eq!(page.element(ZHIHU_EDITOR, 0).unwrap().value, "<p>original</p>");

    let cover = page.element(ZHIHU_COVER_INPUT, 0).unwrap();
    assert_eq!(cover.files.len(), 1);
    assert_eq!(cover.files[0].name, "cover.png");
    assert_eq!(cover.files[0].mime_type, "image/png");

    // The publish click lands on the labeled button, not the draft one.
    let clicked = page
        .actions()
        .into_iter()
        .filter_map(|action| match action {
            PageAction::Dispatch {
                selector,
                event: DomEvent::Click,
            } => Some(selector),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(clicked, [ZHIHU_COVER_TRIGGER, "button"]);
    assert_eq!(page.dispatched("button", DomEvent::Click), 1);
}

#[tokio::test(start_paused = true)]
async fn zhihu_focuses_editor_before_pasting() {
    let page = zhihu_page();
    let ctx = context("ARTICLE_ZHIHU", &page, PublishControl::Expected);
    let request = PublishRequest::new(
        vec!["ARTICLE_ZHIHU".into()],
        false,
        ContentPayload::Article(article("Short", None)),
    );

    let report = ZhihuArticle.run(&ctx, &request).await.unwrap();

    assert_eq!(report.media_attached, 0);
    let actions = page.actions();
    let focus = actions
        .iter()
        .position(|action| {
            matches!(action, PageAction::Dispatch { selector, event: DomEvent::Focus } if selector == ZHIHU_EDITOR)
        })
        .unwrap();
    let paste = actions
        .iter()
        .position(|action| matches!(action, PageAction::Paste { .. }))
        .unwrap();
    assert!(focus < paste);
}

#[tokio::test(start_paused = true)]
async fn zhihu_without_auto_publish_never_clicks_publish() {
    let page = zhihu_page();
    let ctx = context("ARTICLE_ZHIHU", &page, PublishControl::Expected);
    let request = PublishRequest::new(
        vec!["ARTICLE_ZHIHU".into()],
        false,
        ContentPayload::Article(article("Draft only", None)),
    );

    let report = ZhihuArticle.run(&ctx, &request).await.unwrap();

    assert_eq!(report.published, PublishState::Skipped);
    assert_eq!(page.clicks(), 0);
}

#[tokio::test(start_paused = true)]
async fn zhihu_reports_missing_publish_control() {
    let page = zhihu_page();
    page.remove_all("button");
    let ctx = context("ARTICLE_ZHIHU", &page, PublishControl::Expected);
    let request = PublishRequest::new(
        vec!["ARTICLE_ZHIHU".into()],
        true,
        ContentPayload::Article(article("No button", None)),
    );

    let report = ZhihuArticle.run(&ctx, &request).await.unwrap();

    assert_eq!(report.published, PublishState::Missing);
    assert_eq!(report.fields_filled, 2);
}

#[tokio::test(start_paused = true)]
async fn zhihu_rejects_dynamic_payload() {
    let page = zhihu_page();
    let ctx = context("ARTICLE_ZHIHU", &page, PublishControl::Expected);

    let err = ZhihuArticle
        .run(&ctx, &taobao_request(true, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, RoutineError::PayloadMismatch { .. }));
    assert!(page.actions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn taobao_rejects_article_payload() {
    let page = taobao_page();
    let ctx = context("DYNAMIC_TAOBAO", &page, PublishControl::Expected);
    let request = PublishRequest::new(
        vec!["DYNAMIC_TAOBAO".into()],
        true,
        ContentPayload::Article(article("Wrong shape", None)),
    );

    let err = TaobaoDynamic.run(&ctx, &request).await.unwrap_err();

    match err {
        RoutineError::PayloadMismatch { expected, found } => {
            assert_eq!(expected, PayloadKind::Dynamic);
            assert_eq!(found, PayloadKind::Article);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(page.actions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_auto_publish_skips_before_looking_for_the_control() {
    let page = zhihu_page();
    page.remove_all("button");
    let ctx = context("ARTICLE_ZHIHU", &page, PublishControl::Expected);
    let request = PublishRequest::new(
        vec!["ARTICLE_ZHIHU".into()],
        false,
        ContentPayload::Article(article("Draft only", None)),
    );

    let started = Instant::now();
    let report = ZhihuArticle.run(&ctx, &request).await.unwrap();

    assert_eq!(report.published, PublishState::Skipped);
    // Only the editor settle elapsed; the pre-publish pause never ran.
    assert_eq!(started.elapsed(), ctx.timings.editor_settle());
}

#[tokio::test(start_paused = true)]
async fn missing_title_field_fails_after_element_timeout() {
    let page = Arc::new(MemoryPage::new());
    let ctx = context("ARTICLE_ZHIHU", &page, PublishControl::Expected);
    let request = PublishRequest::new(
        vec!["ARTICLE_ZHIHU".into()],
        true,
        ContentPayload::Article(article("Lost", None)),
    );
    let started = Instant::now();

    let err = ZhihuArticle.run(&ctx, &request).await.unwrap_err();

    assert!(matches!(err, RoutineError::Stage { stage: "title", .. }));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));
    assert_eq!(page.mutation_subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn taobao_uploads_images_and_publishes() {
    let page = taobao_page();
    page.insert("#J_PublishBtn", "发布");
    let ctx = context("DYNAMIC_TAOBAO", &page, PublishControl::Expected);

    let report = TaobaoDynamic
        .run(&ctx, &taobao_request(true, 2))
        .await
        .unwrap();

    assert_eq!(report.fields_filled, 2);
    assert_eq!(report.media_attached, 2);
    assert_eq!(report.published, PublishState::Clicked);
    assert_eq!(page.element("#title", 0).unwrap().value, "Handmade mug");
    assert_eq!(
        page.element("#description", 0).unwrap().value,
        "Glazed stoneware, 350ml"
    );
    let input = page.element(FILE_INPUT, 0).unwrap();
    let names = input
        .files
        .iter()
        .map(|file| file.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["mug-0.jpg", "mug-1.jpg"]);
    assert_eq!(page.dispatched("#J_PublishBtn", DomEvent::Click), 1);
}

#[tokio::test(start_paused = true)]
async fn taobao_continues_when_upload_indicator_never_appears() {
    let page = Arc::new(MemoryPage::new());
    page.insert("#title", "");
    page.insert("#description", "");
    page.insert(FILE_INPUT, "");
    page.insert("#J_PublishBtn", "发布");
    let ctx = context("DYNAMIC_TAOBAO", &page, PublishControl::Expected);

    let report = TaobaoDynamic
        .run(&ctx, &taobao_request(true, 1))
        .await
        .unwrap();

    assert_eq!(report.media_attached, 1);
    assert_eq!(report.published, PublishState::Clicked);
}

#[tokio::test(start_paused = true)]
async fn taobao_publish_retries_then_reports_missing() {
    let page = taobao_page();
    let ctx = context("DYNAMIC_TAOBAO", &page, PublishControl::Expected);
    let started = Instant::now();

    let report = TaobaoDynamic
        .run(&ctx, &taobao_request(true, 0))
        .await
        .unwrap();

    assert_eq!(report.published, PublishState::Missing);
    assert_eq!(page.clicks(), 0);
    // Three five-second lookups separated by two backoffs, after the settle pause.
    assert!(started.elapsed() >= Duration::from_secs(3 + 3 * 5 + 2 * 2));
}

#[tokio::test(start_paused = true)]
async fn absent_publish_control_is_skipped_even_with_auto_publish() {
    let page = taobao_page();
    page.insert("#J_PublishBtn", "发布");
    let ctx = context("DYNAMIC_TAOBAO", &page, PublishControl::Absent);

    let report = TaobaoDynamic
        .run(&ctx, &taobao_request(true, 0))
        .await
        .unwrap();

    assert_eq!(report.published, PublishState::Skipped);
    assert_eq!(page.clicks(), 0);
}

#[tokio::test(start_paused = true)]
async fn configured_video_platform_runs_selector_routine() {
    let platforms = load_platforms_config("../configs/platforms.toml").unwrap();
    let registry = PlatformRegistry::with_custom(&platforms).unwrap();
    let descriptor = registry.resolve("VIDEO_SAMPLE").unwrap();

    let page = Arc::new(MemoryPage::new());
    page.insert(r#"input[name="title"]"#, "");
    page.insert(r#"textarea[name="description"]"#, "");
    page.insert(FILE_INPUT, "");
    page.on_attach(FILE_INPUT, ".upload-complete");
    page.insert("button.publish", "Publish");
    let ctx = context(&descriptor.id, &page, descriptor.publish_control);
    let request = PublishRequest::new(
        vec!["VIDEO_SAMPLE".into()],
        true,
        ContentPayload::Video(VideoPayload {
            title: "Launch clip".into(),
            content: "Thirty seconds of launch day".into(),
            video: inline_media("launch.mp4", "video/mp4"),
        }),
    );

    let report = descriptor.routine.run(&ctx, &request).await.unwrap();

    assert_eq!(report.fields_filled, 2);
    assert_eq!(report.media_attached, 1);
    assert_eq!(report.published, PublishState::Clicked);
    assert_eq!(
        page.element(r#"textarea[name="description"]"#, 0).unwrap().value,
        "Thirty seconds of launch day"
    );
    assert_eq!(page.element(FILE_INPUT, 0).unwrap().files[0].name, "launch.mp4");
}
