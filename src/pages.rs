/// Parses the user-facing page-spec mini-language: comma-separated
/// tokens, each a bare positive integer or an inclusive `A-B` range
/// (order-normalized). Returns the sorted unique union.
pub fn parse_page_spec(spec: &str) -> anyhow::Result<Vec<u32>> {
    let mut pages = Vec::new();

    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("empty token in page spec: {spec:?}");
        }

        if let Some((lo, hi)) = token.split_once('-') {
            let lo = parse_page_number(lo)?;
            let hi = parse_page_number(hi)?;
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            pages.extend(lo..=hi);
        } else {
            pages.push(parse_page_number(token)?);
        }
    }

    pages.sort_unstable();
    pages.dedup();
    Ok(pages)
}

fn parse_page_number(token: &str) -> anyhow::Result<u32> {
    let page: u32 = token
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid page number in page spec: {token:?}"))?;
    if page == 0 {
        anyhow::bail!("page numbers start at 1, got 0");
    }
    Ok(page)
}
