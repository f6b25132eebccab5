use std::sync::Arc;

use crate::model::PayloadKind;
use crate::registry::PlatformDescriptor;

use super::{PublishControl, TaobaoDynamic, ZhihuArticle};

pub fn dynamic_table() -> Vec<PlatformDescriptor> {
    vec![PlatformDescriptor {
        id: "DYNAMIC_TAOBAO".into(),
        kind: PayloadKind::Dynamic,
        name: "taobao".into(),
        platform_name: "淘宝".into(),
        home_url: "https://www.taobao.com".into(),
        inject_url: "https://item.upload.taobao.com/sell/publish.htm".into(),
        favicon_url: Some("https://www.taobao.com/favicon.ico".into()),
        iconify_icon: None,
        publish_control: PublishControl::Expected,
        routine: Arc::new(TaobaoDynamic),
    }]
}

pub fn article_table() -> Vec<PlatformDescriptor> {
    vec![PlatformDescriptor {
        id: "ARTICLE_ZHIHU".into(),
        kind: PayloadKind::Article,
        name: "zhihu".into(),
        platform_name: "知乎".into(),
        home_url: "https://www.zhihu.com".into(),
        inject_url: "https://zhuanlan.zhihu.com/write".into(),
        favicon_url: Some("https://static.zhihu.com/heifetz/favicon.ico".into()),
        iconify_icon: Some("simple-icons:zhihu".into()),
        publish_control: PublishControl::Expected,
        routine: Arc::new(ZhihuArticle),
    }]
}

/// Video platforms ship as `platforms.toml` entries for now.
pub fn video_table() -> Vec<PlatformDescriptor> {
    Vec::new()
}
