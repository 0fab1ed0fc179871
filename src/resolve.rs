use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use url::Url;

use crate::context::RequestContext;
use crate::model::{AttachmentCandidate, ResolvedAsset};
use crate::parse::{extract_viewer_image, strip_query};

/// Favor image responses and bypass caches: a stale cached HTML page
/// must not mask a real image response.
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// Classification of one fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    Binary { content_type: String, bytes: Vec<u8> },
    /// A viewer/lightbox page; the caller parses it for the real
    /// full-resolution image URL.
    Html(String),
    Unresolvable,
}

/// Per-candidate resolution state. Replaces the nested try/fallback
/// fetch chains of ad hoc clients with transitions that can be logged
/// and tested independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveStep {
    TryViewer,
    TryDirect,
    TryQuerylessRetry,
    Failed,
}

/// Resolves one candidate to its binary content, or drops it. Dead
/// and removed attachments are routine on forums; a failure here must
/// never abort the crawl, so errors are absorbed into `None`.
pub async fn resolve_candidate(
    ctx: &RequestContext,
    candidate: &AttachmentCandidate,
    referer: &Url,
) -> Option<ResolvedAsset> {
    let direct = Url::parse(&candidate.url).ok()?;
    let viewer = candidate
        .viewer_url
        .as_deref()
        .and_then(|raw| Url::parse(raw).ok());

    let mut step = if viewer.is_some() {
        ResolveStep::TryViewer
    } else {
        ResolveStep::TryDirect
    };

    loop {
        tracing::debug!(url = %candidate.url, ?step, "resolve step");
        match step {
            ResolveStep::TryViewer => {
                let viewer = viewer.as_ref()?;
                match fetch_asset(ctx, viewer, referer).await {
                    FetchOutcome::Binary { content_type, bytes } => {
                        return Some(asset_from(candidate, content_type, &bytes));
                    }
                    FetchOutcome::Html(text) => {
                        if let Some(asset) =
                            resolve_viewer_html(ctx, candidate, &text, viewer, referer).await
                        {
                            return Some(asset);
                        }
                        step = ResolveStep::TryDirect;
                    }
                    FetchOutcome::Unresolvable => step = ResolveStep::TryDirect,
                }
            }
            ResolveStep::TryDirect => {
                match fetch_asset(ctx, &direct, referer).await {
                    FetchOutcome::Binary { content_type, bytes } => {
                        return Some(asset_from(candidate, content_type, &bytes));
                    }
                    // Anchor-less attachment URLs often serve the
                    // lightbox markup directly.
                    FetchOutcome::Html(text) => {
                        if let Some(asset) =
                            resolve_viewer_html(ctx, candidate, &text, &direct, referer).await
                        {
                            return Some(asset);
                        }
                        step = step_after_direct(&direct);
                    }
                    FetchOutcome::Unresolvable => step = step_after_direct(&direct),
                }
            }
            ResolveStep::TryQuerylessRetry => {
                let Some(stripped) = strip_query(&direct) else {
                    step = ResolveStep::Failed;
                    continue;
                };
                match fetch_asset(ctx, &stripped, referer).await {
                    FetchOutcome::Binary { content_type, bytes } => {
                        return Some(asset_from(candidate, content_type, &bytes));
                    }
                    FetchOutcome::Html(text) => {
                        if let Some(asset) =
                            resolve_viewer_html(ctx, candidate, &text, &stripped, referer).await
                        {
                            return Some(asset);
                        }
                        step = ResolveStep::Failed;
                    }
                    FetchOutcome::Unresolvable => step = ResolveStep::Failed,
                }
            }
            ResolveStep::Failed => {
                tracing::debug!(url = %candidate.url, "dropping unresolvable candidate");
                return None;
            }
        }
    }
}

fn step_after_direct(direct: &Url) -> ResolveStep {
    if direct.query().is_some() {
        ResolveStep::TryQuerylessRetry
    } else {
        ResolveStep::Failed
    }
}

/// Follows a viewer page to its full-resolution image and fetches it.
async fn resolve_viewer_html(
    ctx: &RequestContext,
    candidate: &AttachmentCandidate,
    html: &str,
    viewer_page: &Url,
    referer: &Url,
) -> Option<ResolvedAsset> {
    let full = extract_viewer_image(html, viewer_page)?;
    tracing::debug!(page = %viewer_page, full = %full, "viewer page yielded image url");
    match fetch_asset(ctx, &full, referer).await {
        FetchOutcome::Binary { content_type, bytes } => {
            Some(asset_from(candidate, content_type, &bytes))
        }
        _ => None,
    }
}

fn asset_from(candidate: &AttachmentCandidate, content_type: String, bytes: &[u8]) -> ResolvedAsset {
    ResolvedAsset {
        original_url: candidate.url.clone(),
        viewer_url: candidate.viewer_url.clone(),
        canonical_url: candidate.canonical_url.clone(),
        filename_hint: candidate.filename_hint.clone(),
        content_type,
        content: BASE64.encode(bytes),
    }
}

/// Fetches one URL and classifies the response. An HTTP 409 on a
/// query-decorated URL gets exactly one query-stripped retry: forum
/// CDNs routinely reject second-hand fetches of signed URLs but
/// accept the bare path.
pub async fn fetch_asset(ctx: &RequestContext, url: &Url, referer: &Url) -> FetchOutcome {
    let mut target = url.clone();
    let mut retried_queryless = false;

    loop {
        let response = match ctx
            .get(&target, Some(referer))
            .header(ACCEPT, IMAGE_ACCEPT)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(url = %target, error = %err, "asset fetch failed");
                return FetchOutcome::Unresolvable;
            }
        };

        let status = response.status();
        if status == StatusCode::CONFLICT && !retried_queryless {
            if let Some(stripped) = strip_query(&target) {
                tracing::debug!(url = %target, "409 conflict; retrying without query");
                target = stripped;
                retried_queryless = true;
                continue;
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_default();

        if content_type.starts_with("text/html") || content_type.starts_with("application/xhtml")
        {
            if !status.is_success() {
                return FetchOutcome::Unresolvable;
            }
            return match response.text().await {
                Ok(text) => FetchOutcome::Html(text),
                Err(err) => {
                    tracing::debug!(url = %target, error = %err, "read viewer page failed");
                    FetchOutcome::Unresolvable
                }
            };
        }

        // Some servers pair an error status with a usable image body
        // (watermarked placeholders); keep those.
        if !status.is_success() && !content_type.starts_with("image/") {
            tracing::debug!(url = %target, %status, "asset fetch rejected");
            return FetchOutcome::Unresolvable;
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(url = %target, error = %err, "read asset body failed");
                return FetchOutcome::Unresolvable;
            }
        };
        if bytes.is_empty() {
            return FetchOutcome::Unresolvable;
        }

        let content_type = if content_type.is_empty() {
            "application/octet-stream".to_owned()
        } else {
            content_type
        };
        return FetchOutcome::Binary {
            content_type,
            bytes: bytes.to_vec(),
        };
    }
}
