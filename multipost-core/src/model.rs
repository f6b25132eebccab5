use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Dynamic,
    Article,
    Video,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Dynamic => "dynamic",
            PayloadKind::Article => "article",
            PayloadKind::Video => "video",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dynamic" => Ok(PayloadKind::Dynamic),
            "article" => Ok(PayloadKind::Article),
            "video" => Ok(PayloadKind::Video),
            other => Err(format!("unknown payload kind: {other}")),
        }
    }
}

impl Serialize for PayloadKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PayloadKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A file referenced by the payload that still lives outside the target page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(
        default,
        alias = "originUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_url: Option<String>,
}

/// A media file materialized into bytes, ready to be handed to a file input.
#[derive(Clone, PartialEq, Eq)]
pub struct PageFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PageFile {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicPayload {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub images: Vec<MediaRef>,
    #[serde(default)]
    pub videos: Vec<MediaRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticlePayload {
    pub title: String,
    /// Rendered HTML body.
    pub content: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub cover: Option<MediaRef>,
    #[serde(default)]
    pub images: Vec<MediaRef>,
    #[serde(default)]
    pub videos: Vec<MediaRef>,
    #[serde(default, alias = "fileDatas")]
    pub file_datas: Vec<MediaRef>,
    #[serde(default, alias = "originContent")]
    pub origin_content: Option<String>,
    #[serde(default, alias = "markdownContent")]
    pub markdown_content: Option<String>,
    #[serde(default, alias = "markdownOriginContent")]
    pub markdown_origin_content: Option<String>,
}

impl ArticlePayload {
    /// First non-blank body variant, preferring the original HTML.
    pub fn preferred_body(&self) -> Option<&str> {
        [
            self.origin_content.as_deref(),
            Some(self.content.as_str()),
            self.markdown_content.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|body| !body.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPayload {
    pub title: String,
    pub content: String,
    pub video: MediaRef,
}

/// Serialized with a `kind` tag. Deserialization accepts the tag or, when it is
/// missing, infers the kind from the fields present (`video` for videos,
/// article-only fields such as `digest` or `cover` for articles, otherwise
/// dynamic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPayload {
    Dynamic(DynamicPayload),
    Article(ArticlePayload),
    Video(VideoPayload),
}

const ARTICLE_FIELDS: [&str; 10] = [
    "digest",
    "cover",
    "fileDatas",
    "file_datas",
    "originContent",
    "origin_content",
    "markdownContent",
    "markdown_content",
    "markdownOriginContent",
    "markdown_origin_content",
];

fn infer_kind(fields: &serde_json::Map<String, serde_json::Value>) -> PayloadKind {
    if fields.contains_key("video") {
        PayloadKind::Video
    } else if ARTICLE_FIELDS.iter().any(|field| fields.contains_key(*field)) {
        PayloadKind::Article
    } else {
        PayloadKind::Dynamic
    }
}

impl<'de> Deserialize<'de> for ContentPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let mut value = serde_json::Value::deserialize(deserializer)?;
        let fields = value
            .as_object_mut()
            .ok_or_else(|| D::Error::custom("payload data must be an object"))?;
        let kind = match fields.remove("kind") {
            Some(serde_json::Value::String(tag)) => tag.parse().map_err(D::Error::custom)?,
            Some(_) => return Err(D::Error::custom("payload kind must be a string")),
            None => infer_kind(fields),
        };
        let payload = match kind {
            PayloadKind::Dynamic => serde_json::from_value(value).map(ContentPayload::Dynamic),
            PayloadKind::Article => serde_json::from_value(value).map(ContentPayload::Article),
            PayloadKind::Video => serde_json::from_value(value).map(ContentPayload::Video),
        };
        payload.map_err(D::Error::custom)
    }
}

impl ContentPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            ContentPayload::Dynamic(_) => PayloadKind::Dynamic,
            ContentPayload::Article(_) => PayloadKind::Article,
            ContentPayload::Video(_) => PayloadKind::Video,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ContentPayload::Dynamic(payload) => &payload.title,
            ContentPayload::Article(payload) => &payload.title,
            ContentPayload::Video(payload) => &payload.title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub platforms: Vec<String>,
    #[serde(default)]
    pub auto_publish: bool,
    pub data: ContentPayload,
}

impl PublishRequest {
    pub fn new(platforms: Vec<String>, auto_publish: bool, data: ContentPayload) -> Self {
        Self {
            platforms,
            auto_publish,
            data,
        }
    }

    /// Target platform ids in request order, first occurrence wins.
    pub fn targets(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.platforms
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
