//! Narrow interfaces over the excluded collaborators: byte-stream text
//! extraction and web-page scraping. The pipelines only ever see plain
//! text.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;

use crate::errors::ApiError;

/// Turns an uploaded byte stream into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ApiError>;
}

/// PDF extraction, treated as a black box.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ApiError> {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ApiError::BadRequest(format!("PDF extraction failed: {e}")))
    }
}

/// Fetches a page and reduces it to readable text.
#[derive(Clone)]
pub struct WebScraper {
    client: Client,
}

impl WebScraper {
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; corpora-backend)")
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub async fn fetch(&self, url: &str) -> Result<String, ApiError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ApiError::BadRequest(format!("unsupported URL: {url}")));
        }

        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Provider(format!("failed to fetch {url}: {e}")))?;

        if !res.status().is_success() {
            return Err(ApiError::Provider(format!(
                "fetching {url} returned {}",
                res.status()
            )));
        }

        let html = res.text().await.map_err(ApiError::provider)?;
        Ok(strip_html(&html))
    }
}

/// Drops script/style blocks and markup, collapses whitespace.
pub fn strip_html(html: &str) -> String {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static STYLE: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let script = SCRIPT.get_or_init(|| Regex::new(r"(?is)<script.*?</script>").expect("regex"));
    let style = STYLE.get_or_init(|| Regex::new(r"(?is)<style.*?</style>").expect("regex"));
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("regex"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("regex"));

    let text = script.replace_all(html, " ");
    let text = style.replace_all(&text, " ");
    let text = tag.replace_all(&text, " ");
    let text = space.replace_all(&text, " ");
    text.trim().to_string()
}

/// Host portion of a URL, for deriving web-document titles.
pub fn url_host(url: &str) -> &str {
    let rest = url.split("://").nth(1).unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_scripts_and_styles() {
        let html = r#"
            <html>
            <head><script>var x = 1;</script><style>body { color: red }</style></head>
            <body><h1>Hello</h1><p>World</p></body>
            </html>
        "#;

        let text = strip_html(html);
        assert_eq!(text, "Hello World");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(strip_html("a\n\n   b\t\tc"), "a b c");
    }

    #[test]
    fn host_extraction() {
        assert_eq!(url_host("https://example.com/page?x=1"), "example.com");
        assert_eq!(url_host("http://localhost:8080"), "localhost:8080");
    }
}
