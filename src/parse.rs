use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::model::{AttachmentCandidate, PageLinks, canonical_url};

static MESSAGE_BODY: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".message-body, .bbWrapper, .messageContent, .post-content")
        .expect("message body selector")
});
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("img selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));
static NEXT_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"a[rel~="next"], a.pageNav-jump--next"#).expect("next link selector")
});
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"]"#).expect("og:image selector")
});
static DATA_URL_IMG: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img[data-url]").expect("data-url selector"));

/// Lightbox viewer links follow the `/attachments/<slug>.<id>/` path
/// convention on XenForo-family forums.
static VIEWER_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/attachments/[^/]+\.\d+/?").expect("viewer href pattern"));
static IMAGE_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(jpe?g|png|webp|gif|bmp)([?#]|$)").expect("image ext pattern"));
static PATH_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"page-(\d+)").expect("path page marker pattern"));
static QUERY_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]page=(\d+)").expect("query page marker pattern"));

const JUNK_MARKERS: &[&str] = &[
    "/avatar",
    "/avatars/",
    "/smilies/",
    "/smileys/",
    "/emoji",
    "/reactions/",
    "/reaction-",
    "/styles/default/xenforo/",
];

/// Parses one forum page for attachment candidates, external images
/// and the auto-discovered next page number. Never fails: anything
/// structurally broken degrades to an empty result so the crawl can
/// move on.
pub fn extract_page_links(html: &str, base: &Url, current_page: u32) -> PageLinks {
    let doc = Html::parse_document(html);

    let mut links = PageLinks::default();
    let mut seen_canonical: HashSet<String> = HashSet::new();

    let containers: Vec<ElementRef<'_>> = doc.select(&MESSAGE_BODY).collect();
    if containers.is_empty() {
        // No recognizable post markup; scan the whole document rather
        // than returning nothing.
        scan_container(doc.root_element(), base, &mut links, &mut seen_canonical);
    } else {
        for container in containers {
            scan_container(container, base, &mut links, &mut seen_canonical);
        }
    }

    links.next_page_num = find_next_page(&doc, base, current_page);
    links
}

fn scan_container(
    container: ElementRef<'_>,
    base: &Url,
    links: &mut PageLinks,
    seen_canonical: &mut HashSet<String>,
) {
    for img in container.select(&IMG) {
        let Some(candidate) = candidate_from_img(&img, base) else {
            continue;
        };
        if !seen_canonical.insert(candidate.candidate.canonical_url.clone()) {
            continue;
        }
        if candidate.is_attachment {
            links.assets.push(candidate.candidate);
        } else {
            links.externals.push(candidate.candidate);
        }
    }
}

struct ClassifiedCandidate {
    candidate: AttachmentCandidate,
    is_attachment: bool,
}

/// Source indicators on the element, in priority order:
/// viewer anchor > `data-url` > widest `srcset` entry > `data-src` > `src`.
fn candidate_from_img(img: &ElementRef<'_>, base: &Url) -> Option<ClassifiedCandidate> {
    let value = img.value();
    let src = value.attr("src");
    let data_src = value.attr("data-src");
    let data_url = value.attr("data-url");
    let data_lazy = value.attr("data-lazy");
    let srcset = value.attr("srcset");
    let data_srcset = value.attr("data-srcset");

    let anchor = enclosing_anchor(img);
    let anchor_href = anchor.as_ref().and_then(|a| a.value().attr("href"));
    let lightboxed = anchor.as_ref().is_some_and(is_lightbox_anchor) || data_url.is_some();

    let mut raw_candidates: Vec<&str> = Vec::new();
    if let Some(v) = data_url {
        raw_candidates.push(v);
    }
    if let Some(widest) = widest_srcset_entry(data_srcset).or_else(|| widest_srcset_entry(srcset)) {
        raw_candidates.push(widest);
    }
    if let Some(v) = data_lazy {
        raw_candidates.push(v);
    }
    if let Some(v) = data_src {
        raw_candidates.push(v);
    }
    if let Some(v) = src {
        raw_candidates.push(v);
    }
    if let Some(v) = anchor_href {
        raw_candidates.push(v);
    }

    let mut primary: Option<Url> = None;
    for raw in &raw_candidates {
        if is_unfetchable(raw) || is_junk(raw) {
            continue;
        }
        let Ok(resolved) = base.join(raw.trim()) else {
            continue;
        };
        if is_junk(resolved.as_str()) {
            continue;
        }
        primary = Some(resolved);
        break;
    }
    let url = primary?;

    let viewer_url = anchor_href
        .filter(|href| VIEWER_HREF.is_match(href))
        .and_then(|href| base.join(href.trim()).ok());

    let is_attachment =
        url.path().contains("/attachments/") || viewer_url.is_some() || lightboxed;

    // Arbitrary non-image decoration without any attachment or
    // lightbox marker is not worth embedding.
    if !is_attachment && !looks_like_image(url.as_str()) {
        return None;
    }

    let mut candidate = AttachmentCandidate::new(url, viewer_url);
    for raw in raw_candidates {
        if is_unfetchable(raw) {
            continue;
        }
        if let Ok(resolved) = base.join(raw.trim()) {
            candidate.add_variant(resolved.as_str());
        }
    }
    if let Some(set) = data_srcset.or(srcset) {
        for (_, entry) in parse_srcset(set) {
            if let Ok(resolved) = base.join(&entry) {
                candidate.add_variant(resolved.as_str());
            }
        }
    }

    Some(ClassifiedCandidate {
        candidate,
        is_attachment,
    })
}

fn enclosing_anchor<'a>(img: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    img.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "a")
}

fn is_lightbox_anchor(anchor: &ElementRef<'_>) -> bool {
    let value = anchor.value();
    if value.attr("data-fancybox").is_some() || value.attr("data-lightbox").is_some() {
        return true;
    }
    if value
        .attr("data-xf-init")
        .is_some_and(|v| v.contains("lightbox"))
    {
        return true;
    }
    value.classes().any(|c| c == "js-lbImage")
}

pub fn is_junk(url: &str) -> bool {
    if url.starts_with("data:") {
        // 1x1 tracking pixels and inline placeholders.
        return true;
    }
    let lower = url.to_ascii_lowercase();
    JUNK_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn is_unfetchable(url: &str) -> bool {
    let trimmed = url.trim_start();
    trimmed.starts_with("data:")
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("javascript:")
}

fn looks_like_image(url: &str) -> bool {
    IMAGE_EXT.is_match(url) || url.contains("image")
}

/// Parses a srcset attribute into (declared width, url) pairs.
/// Density descriptors (`2x`) and missing descriptors count as width
/// zero so any explicit width wins.
pub fn parse_srcset(srcset: &str) -> Vec<(u32, String)> {
    let mut entries = Vec::new();
    for part in srcset.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut tokens = part.split_whitespace();
        let Some(url) = tokens.next() else {
            continue;
        };
        let width = tokens
            .next()
            .and_then(|descriptor| descriptor.strip_suffix('w'))
            .and_then(|w| w.parse::<u32>().ok())
            .unwrap_or(0);
        entries.push((width, url.to_owned()));
    }
    entries
}

fn widest_srcset_entry(srcset: Option<&str>) -> Option<&str> {
    let srcset = srcset?;
    let entries = parse_srcset(srcset);
    let (_, best) = entries.into_iter().max_by_key(|(width, _)| *width)?;
    // Re-borrow from the original attribute so lifetimes line up with
    // the other raw candidates.
    srcset
        .split(',')
        .map(str::trim)
        .filter_map(|part| part.split_whitespace().next())
        .find(|url| *url == best)
}

/// Looks for a "next page" indicator: a `rel=next`/pageNav link, a
/// "Next"-labeled anchor, or an anchor whose text is exactly
/// current-page+1. A next-style link whose href carries no page
/// marker still means "advance": the successor number is used.
fn find_next_page(doc: &Html, base: &Url, current_page: u32) -> Option<u32> {
    let successor = current_page.checked_add(1)?;

    let mut saw_next_link = false;
    for link in doc.select(&NEXT_LINK) {
        saw_next_link = true;
        if let Some(href) = link.value().attr("href")
            && let Some(page) = page_number_from_href(href, base)
        {
            return Some(page);
        }
    }
    if saw_next_link {
        return Some(successor);
    }

    let successor_label = successor.to_string();
    for anchor in doc.select(&ANCHOR) {
        let text = anchor.text().collect::<String>();
        let text = text.trim();
        let labeled_next = text.to_ascii_lowercase().starts_with("next");
        if !labeled_next && text != successor_label {
            continue;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(page) = page_number_from_href(href, base) {
            return Some(page);
        }
        if labeled_next && !is_unfetchable(href) {
            return Some(successor);
        }
        if text == successor_label {
            return Some(successor);
        }
    }

    None
}

fn page_number_from_href(href: &str, base: &Url) -> Option<u32> {
    let resolved = base.join(href).ok()?;
    let resolved = resolved.as_str();
    if let Some(captures) = PATH_PAGE_MARKER.captures(resolved) {
        return captures.get(1)?.as_str().parse().ok();
    }
    if let Some(captures) = QUERY_PAGE_MARKER.captures(resolved) {
        return captures.get(1)?.as_str().parse().ok();
    }
    None
}

/// Pulls the full-resolution image URL out of a lightbox/viewer page:
/// `og:image` meta first, then an `img` with `data-url`, then the
/// widest srcset entry anywhere on the page.
pub fn extract_viewer_image(html: &str, base: &Url) -> Option<Url> {
    let doc = Html::parse_document(html);

    if let Some(meta) = doc.select(&OG_IMAGE).next()
        && let Some(content) = meta.value().attr("content")
        && let Ok(resolved) = base.join(content.trim())
    {
        return Some(resolved);
    }

    if let Some(img) = doc.select(&DATA_URL_IMG).next()
        && let Some(data_url) = img.value().attr("data-url")
        && !is_unfetchable(data_url)
        && let Ok(resolved) = base.join(data_url.trim())
    {
        return Some(resolved);
    }

    let mut best: Option<(u32, Url)> = None;
    for img in doc.select(&IMG) {
        let Some(srcset) = img.value().attr("srcset") else {
            continue;
        };
        for (width, entry) in parse_srcset(srcset) {
            let Ok(resolved) = base.join(&entry) else {
                continue;
            };
            if best.as_ref().is_none_or(|(w, _)| width > *w) {
                best = Some((width, resolved));
            }
        }
    }
    best.map(|(_, url)| url)
}

pub fn strip_query(url: &Url) -> Option<Url> {
    url.query()?;
    Url::parse(&canonical_url(url)).ok()
}
