use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{COOKIE, REFERER};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Request-scoped state threaded through the crawl and resolution
/// calls: one HTTP client, the forum session cookies, and the
/// cancellation token for the outer conversion request. At most one
/// download runs per context, so there is no ambient global to reset
/// between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    http: reqwest::Client,
    cookie_header: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(cookies: Option<&HashMap<String, String>>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("forumclip/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build crawl http client")?;

        let cookie_header = cookies.filter(|map| !map.is_empty()).map(|map| {
            let mut pairs: Vec<String> =
                map.iter().map(|(name, value)| format!("{name}={value}")).collect();
            pairs.sort();
            pairs.join("; ")
        });

        Ok(Self {
            http,
            cookie_header,
            cancel: CancellationToken::new(),
        })
    }

    /// Starts a GET carrying the session cookies and, when given, a
    /// Referer matching the crawl context. Many forums reject
    /// attachment fetches without both.
    pub fn get(&self, url: &Url, referer: Option<&Url>) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url.clone());
        if let Some(cookie) = &self.cookie_header {
            request = request.header(COOKIE, cookie);
        }
        if let Some(referer) = referer {
            request = request.header(REFERER, referer.as_str());
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_is_sorted_pairs() {
        let mut cookies = HashMap::new();
        cookies.insert("xf_user".to_owned(), "u1".to_owned());
        cookies.insert("xf_session".to_owned(), "s1".to_owned());

        let ctx = RequestContext::new(Some(&cookies)).expect("build context");
        assert_eq!(
            ctx.cookie_header.as_deref(),
            Some("xf_session=s1; xf_user=u1")
        );
    }

    #[test]
    fn empty_cookie_map_means_no_header() {
        let ctx = RequestContext::new(Some(&HashMap::new())).expect("build context");
        assert!(ctx.cookie_header.is_none());
    }
}
