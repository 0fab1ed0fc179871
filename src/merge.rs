use std::collections::HashSet;

use crate::model::ResolvedAsset;

/// Folds crawled assets into a pre-scraped list, keyed by
/// `original_url`, first writer wins. Assets captured from a live DOM
/// tend to carry richer viewer/canonical metadata, so they come first
/// and shadow freshly crawled duplicates.
pub fn merge_assets(
    primary: Vec<ResolvedAsset>,
    secondary: Vec<ResolvedAsset>,
) -> Vec<ResolvedAsset> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(primary.len() + secondary.len());

    for asset in primary.into_iter().chain(secondary) {
        if seen.insert(asset.original_url.clone()) {
            merged.push(asset);
        }
    }

    merged
}
