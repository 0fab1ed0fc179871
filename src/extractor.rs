use async_trait::async_trait;
use url::Url;

use crate::backend::BackendClient;
use crate::model::{ExtractLinksRequest, PageLinks};
use crate::parse::extract_page_links;

/// Seam between the crawl controller and HTML parsing. The in-process
/// DOM parser and the backend helper endpoint must produce the same
/// candidate-list semantics; the remote path exists for contexts that
/// have no HTML tree of their own.
#[async_trait]
pub trait LinkExtractor: Send + Sync {
    async fn extract(
        &self,
        html: &str,
        page_url: &Url,
        current_page: u32,
    ) -> anyhow::Result<PageLinks>;
}

pub struct DomLinkExtractor;

#[async_trait]
impl LinkExtractor for DomLinkExtractor {
    async fn extract(
        &self,
        html: &str,
        page_url: &Url,
        current_page: u32,
    ) -> anyhow::Result<PageLinks> {
        Ok(extract_page_links(html, page_url, current_page))
    }
}

/// Delegates parsing to `POST /helper/extract-links`.
pub struct RemoteLinkExtractor {
    backend: BackendClient,
}

impl RemoteLinkExtractor {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl LinkExtractor for RemoteLinkExtractor {
    async fn extract(
        &self,
        html: &str,
        page_url: &Url,
        _current_page: u32,
    ) -> anyhow::Result<PageLinks> {
        self.backend
            .extract_links(&ExtractLinksRequest {
                html: html.to_owned(),
                url: page_url.to_string(),
            })
            .await
    }
}
