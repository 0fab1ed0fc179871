use std::collections::{HashSet, VecDeque};

use anyhow::Context as _;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::context::RequestContext;
use crate::extractor::LinkExtractor;
use crate::model::ResolvedAsset;
use crate::resolve::resolve_candidate;

static PATH_PAGE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/page-\d+").expect("path page segment pattern"));

/// Everything gathered from one thread crawl.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub assets: Vec<ResolvedAsset>,
    pub pages_visited: Vec<u32>,
    /// HTML of the first page that fetched successfully, kept for the
    /// source record so the backend can extract the thread text.
    pub first_page_html: Option<String>,
}

/// Strips the fragment and any existing page marker (path segment or
/// query parameter) so page URLs can be mechanically rebuilt.
pub fn normalize_thread_url(url: &Url) -> anyhow::Result<Url> {
    let mut base = url.clone();
    base.set_fragment(None);

    let path = base.path().to_owned();
    let stripped = PATH_PAGE_SEGMENT.replace_all(&path, "");
    if stripped != path {
        base.set_path(&stripped);
    }

    let remaining: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(name, _)| name != "page")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if remaining.is_empty() {
        base.set_query(None);
    } else {
        base.query_pairs_mut().clear().extend_pairs(remaining).finish();
    }

    Ok(base)
}

/// Page 1 is the bare thread URL; later pages append the XenForo-style
/// `/page-N` path marker.
pub fn build_forum_page_url(base: &Url, page: u32) -> Url {
    if page <= 1 {
        return base.clone();
    }

    let mut url = base.clone();
    let path = url.path().to_owned();
    if path.ends_with('/') {
        url.set_path(&format!("{path}page-{page}"));
    } else {
        url.set_path(&format!("{path}/page-{page}"));
    }
    url
}

/// Walks the thread one page at a time and resolves every attachment
/// and external image the parser reports.
///
/// With an explicit page list there is no auto-discovery: the list is
/// authoritative, capped at `max_pages` entries. Otherwise the crawl
/// starts at page 1 and follows the parser's next-page numbers.
/// `seen_pages` guarantees each page is fetched at most once, so the
/// queue drains within `max_pages` dequeues no matter what next-page
/// numbers the parser reports.
pub async fn crawl_thread(
    ctx: &RequestContext,
    extractor: &dyn LinkExtractor,
    thread_url: &Url,
    explicit_pages: &[u32],
    max_pages: Option<u32>,
) -> anyhow::Result<CrawlOutcome> {
    let base = normalize_thread_url(thread_url).context("normalize thread url")?;
    let auto_discover = explicit_pages.is_empty();

    let mut queue: VecDeque<u32> = VecDeque::new();
    let mut queued: HashSet<u32> = HashSet::new();
    if auto_discover {
        queue.push_back(1);
        queued.insert(1);
    } else {
        let mut pages = explicit_pages.to_vec();
        pages.sort_unstable();
        pages.dedup();
        if let Some(cap) = max_pages {
            pages.truncate(cap as usize);
        }
        for page in pages {
            if queued.insert(page) {
                queue.push_back(page);
            }
        }
    }

    let mut seen_pages: HashSet<u32> = HashSet::new();
    let mut outcome = CrawlOutcome::default();

    while let Some(page) = queue.pop_front() {
        if !seen_pages.insert(page) {
            continue;
        }

        let page_url = build_forum_page_url(&base, page);
        tracing::info!(page, url = %page_url, "fetch forum page");

        let html = match fetch_page(ctx, &page_url, &base).await {
            Ok(html) => html,
            Err(err) => {
                tracing::warn!(page, url = %page_url, error = %err, "skipping page");
                continue;
            }
        };

        let links = match extractor.extract(&html, &page_url, page).await {
            Ok(links) => links,
            Err(err) => {
                tracing::warn!(page, error = %err, "link extraction failed; zero candidates");
                Default::default()
            }
        };
        tracing::debug!(
            page,
            attachments = links.assets.len(),
            externals = links.externals.len(),
            next = ?links.next_page_num,
            "parsed forum page"
        );

        if outcome.first_page_html.is_none() {
            outcome.first_page_html = Some(html);
        }

        for candidate in links.assets.iter().chain(links.externals.iter()) {
            if let Some(asset) = resolve_candidate(ctx, candidate, &page_url).await {
                outcome.assets.push(asset);
            }
        }

        outcome.pages_visited.push(page);

        if auto_discover
            && let Some(next) = links.next_page_num
            && !seen_pages.contains(&next)
            && !queued.contains(&next)
            && max_pages.is_none_or(|cap| next <= cap)
        {
            queue.push_back(next);
            queued.insert(next);
        }
    }

    tracing::info!(
        pages = outcome.pages_visited.len(),
        assets = outcome.assets.len(),
        "thread crawl finished"
    );
    Ok(outcome)
}

async fn fetch_page(ctx: &RequestContext, page_url: &Url, base: &Url) -> anyhow::Result<String> {
    let response = ctx
        .get(page_url, Some(base))
        .header(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8",
        )
        .send()
        .await
        .with_context(|| format!("GET {page_url}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("page fetch returned {status}");
    }

    response.text().await.context("read page body")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fragment_and_page_markers() {
        let url = Url::parse("https://forum.example/threads/widgets.1/page-7#post-99")
            .expect("parse url");
        let base = normalize_thread_url(&url).expect("normalize");
        assert_eq!(base.as_str(), "https://forum.example/threads/widgets.1");

        let url = Url::parse("https://old.example/showthread.php?t=42&page=3").expect("parse url");
        let base = normalize_thread_url(&url).expect("normalize");
        assert_eq!(base.as_str(), "https://old.example/showthread.php?t=42");
    }

    #[test]
    fn page_one_is_the_base_url() {
        let base = Url::parse("https://forum.example/threads/widgets.1/").expect("parse url");
        assert_eq!(build_forum_page_url(&base, 1), base);
    }

    #[test]
    fn distinct_pages_build_distinct_urls() {
        let base = Url::parse("https://forum.example/threads/widgets.1/").expect("parse url");
        let p2 = build_forum_page_url(&base, 2);
        let p3 = build_forum_page_url(&base, 3);
        assert_eq!(p2.as_str(), "https://forum.example/threads/widgets.1/page-2");
        assert_ne!(p2, p3);
        assert_ne!(p2, base);
    }

    #[test]
    fn page_url_without_trailing_slash_gets_a_separator() {
        let base = Url::parse("https://forum.example/threads/widgets.1").expect("parse url");
        assert_eq!(
            build_forum_page_url(&base, 4).as_str(),
            "https://forum.example/threads/widgets.1/page-4"
        );
    }

    #[test]
    fn normalize_then_build_round_trips_paged_input() {
        let url =
            Url::parse("https://forum.example/threads/widgets.1/page-5").expect("parse url");
        let base = normalize_thread_url(&url).expect("normalize");
        assert_eq!(build_forum_page_url(&base, 5).as_str(), url.as_str());
    }
}
