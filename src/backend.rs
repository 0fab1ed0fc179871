use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::CONTENT_DISPOSITION;
use tokio_util::sync::CancellationToken;

use crate::model::{ConversionPayload, ExtractLinksRequest, PageLinks};

/// The EPUB returned by `/convert`, with the server's filename
/// suggestion from the Content-Disposition header.
#[derive(Debug)]
pub struct ConvertedFile {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum ConvertOutcome {
    File(ConvertedFile),
    Cancelled,
}

/// Client for the local conversion backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base: String,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base: &str) -> anyhow::Result<Self> {
        if !base.starts_with("http://") && !base.starts_with("https://") {
            anyhow::bail!("backend url must be http/https: {base}");
        }
        // Conversion of a long thread takes a while; only connecting
        // gets a deadline.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("forumclip/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build backend http client")?;

        Ok(Self {
            base: base.trim_end_matches('/').to_owned(),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let url = self.endpoint("ping");
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("backend ping returned {status}");
        }
        Ok(())
    }

    pub async fn extract_links(&self, request: &ExtractLinksRequest) -> anyhow::Result<PageLinks> {
        let url = self.endpoint("helper/extract-links");
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("extract-links helper failed ({status}): {body}");
        }

        response
            .json::<PageLinks>()
            .await
            .context("parse extract-links response")
    }

    /// Posts the payload and waits for the EPUB. This is the only
    /// cancellable network operation: the asset-gathering phase has
    /// already run to completion by the time we get here.
    pub async fn convert(
        &self,
        payload: &ConversionPayload,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ConvertOutcome> {
        let url = self.endpoint("convert");
        let request = self.http.post(&url).json(payload).send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(ConvertOutcome::Cancelled),
            response = request => response.with_context(|| format!("POST {url}"))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("backend conversion failed ({status}): {body}");
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition);

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Ok(ConvertOutcome::Cancelled),
            bytes = response.bytes() => bytes.context("read conversion response body")?,
        };

        Ok(ConvertOutcome::File(ConvertedFile {
            filename,
            bytes: bytes.to_vec(),
        }))
    }
}

fn filename_from_content_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        let Some(raw) = part
            .strip_prefix("filename=")
            .or_else(|| part.strip_prefix("filename*=UTF-8''"))
        else {
            continue;
        };
        let name = raw.trim_matches('"').trim();
        // Never let a server suggestion escape the output directory.
        let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        if !name.is_empty() {
            return Some(name.to_owned());
        }
    }
    None
}
