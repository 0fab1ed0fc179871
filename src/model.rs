use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use url::Url;

/// One discovered reference to a possibly downloadable forum asset.
///
/// The same physical file can surface under several URL forms (raw
/// `src`, lazy-load data attributes, srcset entries, the lightbox
/// viewer link). All of them are retained in `all_url_variants` so a
/// later pass can match this candidate no matter which form it meets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentCandidate {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_url: Option<String>,
    pub canonical_url: String,
    pub all_url_variants: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_hint: Option<String>,
}

impl AttachmentCandidate {
    pub fn new(url: Url, viewer_url: Option<Url>) -> Self {
        let canonical_url = canonical_url(&url);
        let filename_hint = filename_hint(&url);

        let mut all_url_variants = BTreeSet::new();
        all_url_variants.insert(url.to_string());
        all_url_variants.insert(canonical_url.clone());
        if let Some(viewer) = &viewer_url {
            all_url_variants.insert(viewer.to_string());
        }

        Self {
            url: url.to_string(),
            viewer_url: viewer_url.map(|u| u.to_string()),
            canonical_url,
            all_url_variants,
            filename_hint,
        }
    }

    pub fn add_variant(&mut self, variant: &str) {
        self.all_url_variants.insert(variant.to_owned());
    }
}

/// Query-stripped form of a URL, the stable dedup identity for an
/// asset regardless of which signing/CDN query parameters a given
/// page rendering attached.
pub fn canonical_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);
    canonical.to_string()
}

pub fn filename_hint(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    if segment.is_empty() {
        return None;
    }
    Some(segment.to_owned())
}

/// A candidate successfully fetched to binary content. Immutable once
/// created; dedup identity downstream is `original_url`, first-seen
/// wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAsset {
    pub original_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_url: Option<String>,
    pub canonical_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_hint: Option<String>,
    pub content_type: String,
    /// Base64-encoded body.
    pub content: String,
}

/// Result of parsing one forum page: gated attachments, plain
/// hotlinked images, and the auto-discovered next page number.
///
/// Also the response body of the backend's `/helper/extract-links`
/// endpoint, which mirrors the in-process parser for contexts without
/// an HTML tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub assets: Vec<AttachmentCandidate>,
    #[serde(default)]
    pub externals: Vec<AttachmentCandidate>,
    #[serde(default)]
    pub next_page_num: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractLinksRequest {
    pub html: String,
    pub url: String,
}

/// One source entry of the conversion payload sent to `/convert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<HashMap<String, String>>,
    pub assets: Vec<ResolvedAsset>,
    pub is_forum: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

/// Boundary object shipped to the backend, created fresh per download
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionPayload {
    pub sources: Vec<SourceRecord>,
    pub options: ConversionOptions,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_strips_query_and_fragment() {
        let url = Url::parse("https://forum.example/attachments/photo.123/?hash=abc#frag")
            .expect("parse url");
        assert_eq!(
            canonical_url(&url),
            "https://forum.example/attachments/photo.123/"
        );
    }

    #[test]
    fn canonical_url_is_stable_across_query_variants() {
        let a = Url::parse("https://cdn.example/img.png?a=1").expect("parse url");
        let b = Url::parse("https://cdn.example/img.png?a=2").expect("parse url");
        assert_eq!(canonical_url(&a), canonical_url(&b));
    }

    #[test]
    fn filename_hint_takes_last_path_segment() {
        let url = Url::parse("https://forum.example/data/photo.jpg?w=640").expect("parse url");
        assert_eq!(filename_hint(&url).as_deref(), Some("photo.jpg"));

        let trailing = Url::parse("https://forum.example/attachments/photo.123/").expect("parse url");
        assert_eq!(filename_hint(&trailing).as_deref(), Some("photo.123"));
    }

    #[test]
    fn candidate_collects_variants() {
        let url = Url::parse("https://forum.example/attachments/img.png?x=1").expect("parse url");
        let viewer = Url::parse("https://forum.example/attachments/img.456/").expect("parse url");
        let candidate = AttachmentCandidate::new(url, Some(viewer));

        assert_eq!(
            candidate.canonical_url,
            "https://forum.example/attachments/img.png"
        );
        assert!(candidate
            .all_url_variants
            .contains("https://forum.example/attachments/img.png?x=1"));
        assert!(candidate
            .all_url_variants
            .contains("https://forum.example/attachments/img.456/"));
        assert_eq!(candidate.filename_hint.as_deref(), Some("img.png"));
    }
}
