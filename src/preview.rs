//! Link preview scraping.
//!
//! Fetches a page and pulls OpenGraph metadata out of the raw HTML with a
//! couple of regexes, falling back to the document title and plain meta
//! description. Previews are decorative, so every failure path collapses to
//! None rather than an error.

use regex::Regex;
use reqwest::Client;

use crate::models::LinkPreview;

/// Value of a `<meta name=... content=...>` or `property=...` tag
fn meta_content(html: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"<meta[^>]*(?:name|property)=["']{}["'][^>]*content=["']([^"']+)["']"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(html).map(|c| c[1].to_string())
}

/// Text content of the first `<tag>...</tag>` element
fn tag_content(html: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"<{tag}[^>]*>([^<]+)</{tag}");
    let re = Regex::new(&pattern).ok()?;
    re.captures(html).map(|c| c[1].to_string())
}

fn extract_preview(html: &str) -> LinkPreview {
    LinkPreview {
        title: meta_content(html, "og:title")
            .or_else(|| tag_content(html, "title"))
            .unwrap_or_default(),
        description: meta_content(html, "og:description")
            .or_else(|| meta_content(html, "description"))
            .unwrap_or_default(),
        image: meta_content(html, "og:image").unwrap_or_default(),
    }
}

/// Fetch a URL and scrape preview metadata from its HTML.
///
/// Returns None if the page cannot be fetched or read; missing individual
/// fields come back as empty strings.
pub async fn fetch_link_preview(client: &Client, url: &str) -> Option<LinkPreview> {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "preview fetch failed");
            return None;
        }
    };
    let html = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "preview body unreadable");
            return None;
        }
    };
    Some(extract_preview(&html))
}
