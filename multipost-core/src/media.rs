use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use reqwest::Client;
use tracing::{debug, warn};

use crate::browser::{BrowserError, BrowserResult};
use crate::config::MediaSection;
use crate::model::{MediaRef, PageFile};

/// Turns [`MediaRef`]s into bytes a page file input can accept.
///
/// Inline payloads (`base64` or `data:` URLs) are decoded locally; anything
/// else is fetched from its source URL. The resulting file always carries the
/// reference's own name and MIME type.
#[derive(Debug, Clone)]
pub struct MediaMaterializer {
    client: Client,
}

impl MediaMaterializer {
    pub fn new(config: &MediaSection) -> BrowserResult<Self> {
        let mut builder =
            Client::builder().timeout(Duration::from_secs(config.fetch_timeout_seconds));
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        let client = builder
            .build()
            .map_err(|err| BrowserError::Configuration(format!("http client: {err}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn materialize(&self, media: &MediaRef) -> BrowserResult<PageFile> {
        let bytes = match inline_bytes(media)? {
            Some(bytes) => bytes,
            None => self.fetch(media).await?,
        };
        if media.size > 0 && media.size != bytes.len() as u64 {
            warn!(
                name = %media.name,
                declared = media.size,
                actual = bytes.len(),
                "media size differs from declared size"
            );
        }
        debug!(name = %media.name, bytes = bytes.len(), "media materialized");
        Ok(PageFile {
            name: media.name.clone(),
            mime_type: media.mime_type.clone(),
            bytes,
        })
    }

    /// Materializes every reference concurrently, preserving order.
    pub async fn materialize_all(&self, media: &[MediaRef]) -> BrowserResult<Vec<PageFile>> {
        try_join_all(media.iter().map(|item| self.materialize(item))).await
    }

    async fn fetch(&self, media: &MediaRef) -> BrowserResult<Vec<u8>> {
        let failure = |reason: String| BrowserError::MediaFetch {
            name: media.name.clone(),
            reason,
        };
        let response = self
            .client
            .get(&media.url)
            .send()
            .await
            .map_err(|err| failure(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("{} from {}", status, media.url)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| failure(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn inline_bytes(media: &MediaRef) -> BrowserResult<Option<Vec<u8>>> {
    let encoded = match (&media.base64, media.url.strip_prefix("data:")) {
        (Some(encoded), _) if !encoded.is_empty() => encoded.as_str(),
        (_, Some(data_url)) => match data_url.split_once(";base64,") {
            Some((_, encoded)) => encoded,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    let payload = encoded
        .split_once(";base64,")
        .map_or(encoded, |(_, payload)| payload);
    STANDARD
        .decode(payload.trim())
        .map(Some)
        .map_err(|err| BrowserError::MediaFetch {
            name: media.name.clone(),
            reason: format!("invalid inline data: {err}"),
        })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn media(url: String, size: u64) -> MediaRef {
        MediaRef {
            name: "cover.png".into(),
            url,
            mime_type: "image/png".into(),
            size,
            base64: None,
            origin_url: None,
        }
    }

    fn materializer() -> MediaMaterializer {
        MediaMaterializer::new(&MediaSection::default()).unwrap()
    }

    #[tokio::test]
    async fn fetched_media_keeps_name_type_and_length() {
        let server = MockServer::start().await;
        let body = vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4, 5];
        Mock::given(method("GET"))
            .and(path("/cover.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let file = materializer()
            .materialize(&media(format!("{}/cover.png", server.uri()), body.len() as u64))
            .await
            .unwrap();
        assert_eq!(file.name, "cover.png");
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.len(), body.len());
        assert_eq!(file.bytes, body);
    }

    #[tokio::test]
    async fn http_error_is_a_media_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = materializer()
            .materialize(&media(format!("{}/gone.png", server.uri()), 0))
            .await
            .unwrap_err();
        match err {
            BrowserError::MediaFetch { name, reason } => {
                assert_eq!(name, "cover.png");
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn inline_base64_skips_the_network() {
        let mut item = media("blob:https://extension/abc".into(), 5);
        item.base64 = Some(format!("data:image/png;base64,{}", STANDARD.encode(b"hello")));
        let file = materializer().materialize(&item).await.unwrap();
        assert_eq!(file.bytes, b"hello");
    }

    #[tokio::test]
    async fn data_url_is_decoded() {
        let item = media(format!("data:image/png;base64,{}", STANDARD.encode([1u8, 2, 3])), 3);
        let file = materializer().materialize(&item).await.unwrap();
        assert_eq!(file.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn materialize_all_preserves_order() {
        let first = {
            let mut item = media("blob:a".into(), 1);
            item.name = "a.png".into();
            item.base64 = Some(STANDARD.encode([1u8]));
            item
        };
        let second = {
            let mut item = media("blob:b".into(), 2);
            item.name = "b.png".into();
            item.base64 = Some(STANDARD.encode([2u8, 2]));
            item
        };
        let files = materializer()
            .materialize_all(&[first, second])
            .await
            .unwrap();
        let names = files.iter().map(|file| file.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }
}
