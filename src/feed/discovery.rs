//! Feed-link discovery from arbitrary web pages.

use super::fetcher::{FeedClient, FetchError};
use url::Url;

/// Paths tried against the page's origin when a site does not advertise its feed.
const CONVENTIONAL_FEED_PATHS: [&str; 5] = ["/feed", "/rss", "/atom.xml", "/rss.xml", "/feed.xml"];

impl FeedClient {
    /// Lists the feed URLs a web page leads to.
    ///
    /// Advertised `<link type="application/rss+xml|atom+xml">` targets come
    /// first, in document order, followed by any conventional feed path
    /// that validates. Duplicates are dropped, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// Fails only if the page itself cannot be fetched; probes that fail are
    /// left out of the result.
    pub async fn discover(&self, page_url: &str) -> Result<Vec<String>, FetchError> {
        let page = self.check_url(page_url)?;
        let html = self.fetch_page(&page).await?;

        let mut found = Vec::new();
        for href in find_feed_links_in_html(&html, &page) {
            push_unique(&mut found, href);
        }
        tracing::debug!(url = %page, advertised = found.len(), "Scanned page for feed links");

        for path in CONVENTIONAL_FEED_PATHS {
            let Ok(candidate) = page.join(path) else {
                continue;
            };
            let candidate = candidate.to_string();
            if found.contains(&candidate) {
                continue;
            }
            if self.validate(&candidate).await {
                push_unique(&mut found, candidate);
            }
        }

        Ok(found)
    }
}

fn push_unique(found: &mut Vec<String>, url: String) {
    if !found.contains(&url) {
        found.push(url);
    }
}

/// Scans HTML for `<link>` tags with an RSS or Atom `type`, in document order.
///
/// Uses simple string scanning (no HTML parser dependency). `rel` is not
/// required. Relative hrefs are resolved against `base`; anything that does
/// not resolve to http(s) is skipped.
fn find_feed_links_in_html(html: &str, base: &Url) -> Vec<String> {
    let html_lower = html.to_ascii_lowercase();
    let mut links = Vec::new();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let remaining = &html_lower[abs_start..];

        let Some(tag_end) = remaining.find('>') else {
            break;
        };

        let tag = &remaining[..=tag_end];
        if is_feed_type(tag) {
            // Extract href from the original (non-lowered) HTML to preserve URL case
            let original_tag = &html[abs_start..abs_start + tag_end + 1];
            if let Some(resolved) = extract_attr_value(original_tag, "href").and_then(|href| resolve_href(href, base)) {
                links.push(resolved);
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    links
}

/// Checks if a lowercased `<link>` tag has an RSS or Atom feed type.
fn is_feed_type(tag: &str) -> bool {
    tag.contains("application/rss+xml") || tag.contains("application/atom+xml")
}

/// Extracts the value of an attribute from a tag string (case-preserving).
///
/// Handles double quotes, single quotes and unquoted values. The name must
/// start at an attribute boundary, so `data-href=` is not mistaken for `href=`.
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_ascii_lowercase();
    let attr_prefix = format!("{attr_name}=");

    let mut from = 0;
    let value_start = loop {
        let pos = from + tag_lower[from..].find(&attr_prefix)?;
        let at_boundary = tag_lower[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_whitespace() || c == '"' || c == '\'');
        if at_boundary {
            break pos + attr_prefix.len();
        }
        from = pos + attr_prefix.len();
    };

    let rest = tag.get(value_start..)?;
    match *rest.as_bytes().first()? {
        quote @ (b'"' | b'\'') => {
            let inner = &rest[1..];
            let end = inner.find(quote as char)?;
            Some(&inner[..end])
        }
        _ => {
            let end = rest
                .find(|c: char| c.is_ascii_whitespace() || c == '>')
                .unwrap_or(rest.len());
            (end > 0).then(|| &rest[..end])
        }
    }
}

/// Resolves a possibly relative href against the page URL, keeping only http(s) results.
fn resolve_href(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    // Url::join normalizes protocol-relative and dot-segment paths
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fetcher::FeedClientOptions;
    use crate::util::HostPolicy;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn base() -> Url {
        Url::parse("https://example.com/blog/").unwrap()
    }

    // --- HTML link discovery tests ---

    #[test]
    fn test_find_rss_link_in_html() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml" title="RSS">
        </head><body></body></html>"#;
        assert_eq!(find_feed_links_in_html(html, &base()), vec!["https://example.com/feed.xml"]);
    }

    #[test]
    fn test_find_all_links_in_document_order() {
        let html = r#"<head>
            <link rel="stylesheet" href="/style.css">
            <link type="application/atom+xml" href="atom.xml">
            <LINK REL="alternate" TYPE="application/rss+xml" HREF="https://feeds.example.com/RSS">
        </head>"#;
        assert_eq!(
            find_feed_links_in_html(html, &base()),
            vec![
                "https://example.com/blog/atom.xml",
                "https://feeds.example.com/RSS",
            ]
        );
    }

    #[test]
    fn test_find_feed_link_single_quotes_and_reversed_attrs() {
        let html = r#"<link href='/rss' type='application/rss+xml' rel='alternate'>"#;
        assert_eq!(find_feed_links_in_html(html, &base()), vec!["https://example.com/rss"]);
    }

    #[test]
    fn test_find_feed_link_protocol_relative() {
        let html = r#"<link rel="alternate" type="application/rss+xml" href="//cdn.example.com/feed.xml">"#;
        assert_eq!(
            find_feed_links_in_html(html, &base()),
            vec!["https://cdn.example.com/feed.xml"]
        );
    }

    #[test]
    fn test_no_feed_link_in_html() {
        let html = r#"<link rel="stylesheet" href="/style.css"><link rel="icon" href="/x.ico">"#;
        assert!(find_feed_links_in_html(html, &base()).is_empty());
    }

    #[test]
    fn test_javascript_href_skipped() {
        let html = r#"<link type="application/rss+xml" href="javascript:alert(1)">"#;
        assert!(find_feed_links_in_html(html, &base()).is_empty());
    }

    #[test]
    fn test_extract_attr_value_variants() {
        assert_eq!(extract_attr_value(r#"<link href="/a">"#, "href"), Some("/a"));
        assert_eq!(extract_attr_value("<link href=/b>", "href"), Some("/b"));
        assert_eq!(extract_attr_value(r#"<link data-href="/x" href="/c">"#, "href"), Some("/c"));
        assert_eq!(extract_attr_value("<link rel=alternate>", "href"), None);
    }

    #[test]
    fn test_resolve_href_normalizes_path() {
        let resolved = resolve_href("//evil.com/../../../etc/passwd", &base()).unwrap();
        let parsed = Url::parse(&resolved).unwrap();
        assert_eq!(parsed.host_str(), Some("evil.com"));
        assert!(!parsed.path().contains(".."));
    }

    // --- Integration tests with wiremock ---

    const RSS: &str = r#"<rss><channel><title>F</title>
<item><title>A</title><link>https://example.com/a</link></item></channel></rss>"#;

    fn test_client() -> FeedClient {
        FeedClient::new(FeedClientOptions {
            host_policy: HostPolicy::AllowPrivate,
            ..FeedClientOptions::default()
        })
        .unwrap()
    }

    async fn mount(server: &MockServer, at: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_discover_advertised_link_not_duplicated_by_probe() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/",
            ResponseTemplate::new(200).set_body_string(
                r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head></html>"#,
            ),
        )
        .await;
        mount(&server, "/feed.xml", ResponseTemplate::new(200).set_body_string(RSS)).await;

        let found = test_client().discover(&format!("{}/", server.uri())).await.unwrap();
        assert_eq!(found, vec![format!("{}/feed.xml", server.uri())]);
    }

    #[tokio::test]
    async fn test_discover_probes_conventional_paths() {
        let server = MockServer::start().await;
        mount(&server, "/blog/post", ResponseTemplate::new(200).set_body_string("<html></html>")).await;
        mount(&server, "/rss", ResponseTemplate::new(200).set_body_string(RSS)).await;
        mount(&server, "/atom.xml", ResponseTemplate::new(200).set_body_string("<html>nope</html>")).await;

        let found = test_client()
            .discover(&format!("{}/blog/post", server.uri()))
            .await
            .unwrap();
        assert_eq!(found, vec![format!("{}/rss", server.uri())]);
    }

    #[tokio::test]
    async fn test_discover_page_failure_is_error() {
        let server = MockServer::start().await;
        mount(&server, "/", ResponseTemplate::new(503)).await;

        let result = test_client().discover(&format!("{}/", server.uri())).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn test_discover_invalid_url() {
        let strict = FeedClient::new(FeedClientOptions::default()).unwrap();
        for url in ["not a url", "http://localhost/", "http://192.168.1.1/"] {
            let result = strict.discover(url).await;
            assert!(matches!(result, Err(FetchError::InvalidUrl(_))), "{url}");
        }
    }
}
