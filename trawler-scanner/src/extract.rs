use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Extract same-domain links from `html`, resolving relative hrefs against
/// `base_url` and keeping only URLs whose host equals `base_url`'s host.
pub fn extract_links(html: &str, base_url: &Url) -> HashSet<String> {
    match base_url.host_str() {
        Some(host) => extract_links_for_host(html, base_url, host),
        None => HashSet::new(),
    }
}

/// Like [`extract_links`], but resolves against the page the HTML came from
/// while filtering on the crawl's seed host.
pub fn extract_links_for_host(html: &str, page_url: &Url, allowed_host: &str) -> HashSet<String> {
    let document = Html::parse_document(html);
    let Ok(link_selector) = Selector::parse("a[href]") else {
        return HashSet::new();
    };

    let mut links = HashSet::new();
    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(absolute_url) = resolve_url(page_url, href) else {
            continue;
        };
        if is_same_host(&absolute_url, allowed_host) {
            links.insert(absolute_url.to_string());
        } else {
            debug!("Skipping off-domain link {}", absolute_url);
        }
    }
    links
}

/// Resolve `href` against `base`, dropping the fragment. Returns `None` for
/// empty, fragment-only and non-HTTP hrefs or anything that fails to parse.
pub fn resolve_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Exact host comparison; subdomains do not match.
pub fn is_same_host(url: &Url, allowed_host: &str) -> bool {
    url.host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(allowed_host))
}

/// Canonical string form of a crawl seed: parsed, fragment removed.
pub fn normalize_seed(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
