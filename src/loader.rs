//! Batch document loading on top of [`SteelClient`].

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::client::SteelClient;
use crate::config::OutputFormat;
use crate::error::{ErrorKind, SteelError};
use crate::logging::category;
use crate::metrics::duration_ms;
use crate::types::request::ScrapeRequest;
use crate::types::result::ScrapeResult;
use crate::types::session::SessionHandle;

const LOADER_NAME: &str = "SteelDocumentLoader";
const DEFAULT_CONCURRENCY: usize = 4;

/// One loaded page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    pub metadata: Map<String, Value>,
}

/// Loads a list of URLs into [`Document`]s.
#[derive(Debug, Clone)]
pub struct SteelDocumentLoader {
    client: SteelClient,
    urls: Vec<String>,
    template: ScrapeRequest,
    session_reuse: bool,
    fallback_format: Option<OutputFormat>,
    concurrency: usize,
}

impl SteelDocumentLoader {
    pub fn new<I, S>(client: SteelClient, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client,
            urls: urls.into_iter().map(Into::into).collect(),
            template: ScrapeRequest::default(),
            session_reuse: true,
            fallback_format: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Options applied to every URL; the template's own `url` is ignored.
    pub fn template(mut self, template: ScrapeRequest) -> Self {
        self.template = template;
        self
    }

    pub fn session_reuse(mut self, enabled: bool) -> Self {
        self.session_reuse = enabled;
        self
    }

    /// Format to retry with when a page comes back empty in the requested one.
    pub fn fallback_format(mut self, format: OutputFormat) -> Self {
        self.fallback_format = Some(format);
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Load every URL in order, one at a time.
    pub async fn load(&self) -> Result<Vec<Document>, SteelError> {
        self.load_with(1).await
    }

    /// Load URLs with up to `concurrency` requests in flight; output keeps input order.
    pub async fn load_concurrent(&self) -> Result<Vec<Document>, SteelError> {
        self.load_with(self.concurrency).await
    }

    async fn load_with(&self, limit: usize) -> Result<Vec<Document>, SteelError> {
        let logger = self.client.logger();
        logger.info(
            format!("loading {} URL(s)", self.urls.len()),
            Some(category::LOADER),
            Some(json!({ "concurrency": limit, "session_reuse": self.session_reuse })),
        );

        let outcomes = if self.session_reuse && self.urls.len() > 1 {
            self.client
                .session_context(|handle| async move {
                    Ok::<_, SteelError>(self.fetch_all(Some(handle), limit).await)
                })
                .await?
        } else {
            self.fetch_all(None, limit).await
        };

        self.client.cleanup_sessions().await;

        let total = outcomes.len();
        let mut documents = Vec::with_capacity(total);
        let mut first_error = None;
        for (url, outcome) in self.urls.iter().zip(outcomes) {
            match outcome {
                Ok(document) => documents.push(document),
                Err(err) => {
                    logger.warn(
                        format!("failed to load {url}: {err}"),
                        Some(category::LOADER),
                        Some(json!({ "url": url, "kind": err.kind() })),
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        logger.info(
            format!("loaded {} of {total} URL(s)", documents.len()),
            Some(category::LOADER),
            None,
        );
        match first_error {
            Some(err) if documents.is_empty() => Err(err),
            _ => Ok(documents),
        }
    }

    async fn fetch_all(
        &self,
        session: Option<SessionHandle>,
        limit: usize,
    ) -> Vec<Result<Document, SteelError>> {
        stream::iter(self.urls.iter())
            .map(|url| self.fetch_one(url, session.clone()))
            .buffered(limit.max(1))
            .collect()
            .await
    }

    async fn fetch_one(
        &self,
        url: &str,
        session: Option<SessionHandle>,
    ) -> Result<Document, SteelError> {
        let request = self.request_for(url, session);
        let requested = request
            .format
            .as_deref()
            .and_then(|format| format.parse::<OutputFormat>().ok());
        let result = match self.client.scrape(request.clone()).await {
            Err(err) if err.kind() == ErrorKind::Content => match self.fallback_format {
                Some(fallback) if requested != Some(fallback) => {
                    self.client.logger().info(
                        format!("{url} returned no usable content; retrying as {fallback}"),
                        Some(category::LOADER),
                        None,
                    );
                    self.client
                        .scrape(request.format(fallback.as_str()))
                        .await?
                }
                _ => return Err(err),
            },
            other => other?,
        };
        Ok(self.document_from(url, result))
    }

    fn request_for(&self, url: &str, session: Option<SessionHandle>) -> ScrapeRequest {
        let format = self
            .template
            .format
            .clone()
            .unwrap_or_else(|| self.client.config().default_format.as_str().to_string());
        ScrapeRequest {
            url: url.to_string(),
            format: Some(format),
            session,
            ..self.template.clone()
        }
    }

    fn document_from(&self, url: &str, result: ScrapeResult) -> Document {
        let mut metadata = Map::new();
        metadata.insert("source".into(), json!(url));
        metadata.insert("format".into(), json!(result.format));
        metadata.insert("loader".into(), json!(LOADER_NAME));
        metadata.insert("status_code".into(), json!(result.status));
        metadata.insert("final_url".into(), json!(result.metadata.resolved_url));
        if let Some(title) = &result.metadata.title {
            metadata.insert("title".into(), json!(title));
        }
        metadata.insert(
            "elapsed_ms".into(),
            json!(duration_ms(result.metadata.elapsed)),
        );
        metadata.insert(
            "timestamp".into(),
            json!(result.metadata.timestamp.to_rfc3339()),
        );
        if self.template.extract_links {
            metadata.insert("links".into(), json!(result.links));
        }
        if self.template.extract_images {
            metadata.insert("images".into(), json!(result.images));
        }
        if let Some(screenshot) = &result.screenshot_url {
            metadata.insert("screenshot".into(), json!(screenshot));
        }

        Document {
            page_content: result.content.to_string(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SteelConfig;
    use crate::http::{HttpResponse, SteelHttp};
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct PageHttp {
        scrape_bodies: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl SteelHttp for PageHttp {
        async fn post_json(
            &self,
            url: &str,
            _headers: &HeaderMap,
            body: &Value,
        ) -> Result<HttpResponse, SteelError> {
            if url.ends_with("/sessions") {
                return Ok(HttpResponse::json(200, &json!({"id": "sess-loader"})));
            }
            self.scrape_bodies.lock().unwrap().push(body.clone());
            let target = body["url"].as_str().unwrap_or_default();
            let format = body["format"][0].as_str().unwrap_or_default();
            let content = if target.contains("empty") && format == "markdown" {
                ""
            } else {
                "page body"
            };
            Ok(HttpResponse::json(
                200,
                &json!({"content": content, "metadata": {"status": 200, "title": target}}),
            ))
        }

        async fn delete(&self, _url: &str, _headers: &HeaderMap) -> Result<HttpResponse, SteelError> {
            Ok(HttpResponse::new(200, ""))
        }
    }

    fn client(http: Arc<PageHttp>) -> SteelClient {
        SteelClient::with_http(SteelConfig::new("k1"), http).expect("client")
    }

    #[tokio::test]
    async fn empty_pages_fall_back_to_another_format() {
        let http = Arc::new(PageHttp::default());
        let loader = SteelDocumentLoader::new(client(Arc::clone(&http)), ["https://example.com/empty"])
            .fallback_format(OutputFormat::Text);

        let documents = loader.load().await.expect("fallback succeeds");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].page_content, "page body");
        assert_eq!(documents[0].metadata["format"], json!("text"));
        assert_eq!(http.scrape_bodies.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fallback_matching_an_aliased_format_is_not_reissued() {
        let http = Arc::new(PageHttp::default());
        let loader = SteelDocumentLoader::new(client(Arc::clone(&http)), ["https://example.com/empty"])
            .template(ScrapeRequest::default().format("MD"))
            .fallback_format(OutputFormat::Markdown);

        let err = loader.load().await.expect_err("same format, same empty page");
        assert_eq!(err.kind(), ErrorKind::Content);
        assert_eq!(http.scrape_bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn without_fallback_content_errors_surface() {
        let http = Arc::new(PageHttp::default());
        let loader = SteelDocumentLoader::new(client(http), ["https://example.com/empty"]);

        let err = loader.load().await.expect_err("no documents");
        assert_eq!(err.kind(), ErrorKind::Content);
    }

    #[tokio::test]
    async fn template_options_reach_every_request() {
        let http = Arc::new(PageHttp::default());
        let template = ScrapeRequest::default()
            .wait_for("main")
            .header("accept-language", "en");
        let loader = SteelDocumentLoader::new(
            client(Arc::clone(&http)),
            ["https://example.com/a", "https://example.com/b"],
        )
        .template(template);

        let documents = loader.load().await.expect("load");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1].metadata["source"], json!("https://example.com/b"));
        assert_eq!(documents[0].metadata["loader"], json!(LOADER_NAME));

        let bodies = http.scrape_bodies.lock().unwrap();
        for body in bodies.iter() {
            assert_eq!(body["wait_for_selector"], json!("main"));
            assert_eq!(body["headers"]["accept-language"], json!("en"));
            assert_eq!(body["session_id"], json!("sess-loader"));
        }
    }
}
