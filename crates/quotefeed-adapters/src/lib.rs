//! Page source contract + HTML quote extraction.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotefeed_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "quotefeed-adapters";

pub const DEFAULT_SOURCE_URL: &str = "https://quotes.toscrape.com/";

/// Which tuples the extractor yields per quote on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// `{text, author, tags}` objects.
    #[default]
    Structured,
    /// Bare quote strings, no author or tags.
    TextOnly,
}

impl ExtractionMode {
    /// Lenient parse of a configuration value; unknown values fall back to
    /// [`ExtractionMode::Structured`].
    pub fn from_config(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "text_only" | "text-only" => Self::TextOnly,
            _ => Self::Structured,
        }
    }
}

/// Result of one page fetch: the page title and the raw extracted tuples.
///
/// Items stay untyped here; turning them into records is the normalizer's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: String,
    pub items: Vec<JsonValue>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading fixture page {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
}

#[async_trait]
pub trait PageSource: Send + Sync {
    fn source_url(&self) -> &str;

    async fn fetch(&self) -> Result<ScrapedPage, AdapterError>;
}

const QUOTE_BLOCK: &str = ".quote";
const QUOTE_TEXT: &str = ".text";
const QUOTE_AUTHOR: &str = ".author";
const QUOTE_TAGS: &str = ".tags .tag";
const PAGE_TITLE: &str = "title";

fn selector(raw: &str) -> Result<Selector, AdapterError> {
    Selector::parse(raw).map_err(|e| AdapterError::Selector {
        selector: raw.to_string(),
        message: e.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Trim whitespace and the typographic quote marks the page wraps text in.
fn strip_quote_marks(text: &str) -> String {
    text.trim()
        .trim_start_matches(['“', '"'])
        .trim_end_matches(['”', '"'])
        .trim()
        .to_string()
}

/// Extract the page title and the quote tuples from an HTML document.
pub fn extract_page(html: &str, mode: ExtractionMode) -> Result<(String, Vec<JsonValue>), AdapterError> {
    let document = Html::parse_document(html);
    let title_sel = selector(PAGE_TITLE)?;
    let block_sel = selector(QUOTE_BLOCK)?;
    let text_sel = selector(QUOTE_TEXT)?;

    let title = document
        .select(&title_sel)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let items = match mode {
        ExtractionMode::TextOnly => document
            .select(&block_sel)
            .filter_map(|block| block.select(&text_sel).next())
            .map(|node| JsonValue::String(strip_quote_marks(&element_text(node))))
            .collect(),
        ExtractionMode::Structured => {
            let author_sel = selector(QUOTE_AUTHOR)?;
            let tag_sel = selector(QUOTE_TAGS)?;
            document
                .select(&block_sel)
                .map(|block| {
                    let text = block
                        .select(&text_sel)
                        .next()
                        .map(|n| strip_quote_marks(&element_text(n)))
                        .unwrap_or_default();
                    let author = block
                        .select(&author_sel)
                        .next()
                        .map(element_text)
                        .unwrap_or_default();
                    let tags = block.select(&tag_sel).map(element_text).collect::<Vec<_>>();
                    json!({ "text": text, "author": author, "tags": tags })
                })
                .collect()
        }
    };

    Ok((title, items))
}

/// Scrapes the configured URL over HTTP.
#[derive(Debug, Clone)]
pub struct LivePageSource {
    url: String,
    http: HttpFetcher,
    mode: ExtractionMode,
}

impl LivePageSource {
    pub fn new(url: impl Into<String>, http: HttpFetcher, mode: ExtractionMode) -> Self {
        Self {
            url: url.into(),
            http,
            mode,
        }
    }
}

#[async_trait]
impl PageSource for LivePageSource {
    fn source_url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<ScrapedPage, AdapterError> {
        let response = self.http.fetch_bytes(&self.url).await?;
        let fetched_at = Utc::now();
        let html = String::from_utf8_lossy(&response.body);
        let (title, items) = extract_page(&html, self.mode)?;
        debug!(url = %response.final_url, items = items.len(), "extracted quote page");
        Ok(ScrapedPage {
            url: self.url.clone(),
            title,
            items,
            fetched_at,
        })
    }
}

#[derive(Debug, Clone)]
enum FixtureContent {
    File(PathBuf),
    Inline(String),
}

/// Extracts from a local HTML snapshot instead of the network.
#[derive(Debug, Clone)]
pub struct FixturePageSource {
    url: String,
    content: FixtureContent,
    mode: ExtractionMode,
}

impl FixturePageSource {
    pub fn from_path(url: impl Into<String>, path: impl Into<PathBuf>, mode: ExtractionMode) -> Self {
        Self {
            url: url.into(),
            content: FixtureContent::File(path.into()),
            mode,
        }
    }

    pub fn from_html(url: impl Into<String>, html: impl Into<String>, mode: ExtractionMode) -> Self {
        Self {
            url: url.into(),
            content: FixtureContent::Inline(html.into()),
            mode,
        }
    }
}

#[async_trait]
impl PageSource for FixturePageSource {
    fn source_url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<ScrapedPage, AdapterError> {
        let html = match &self.content {
            FixtureContent::Inline(html) => html.clone(),
            FixtureContent::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| AdapterError::Io {
                    path: path.clone(),
                    source,
                })?,
        };
        let (title, items) = extract_page(&html, self.mode)?;
        Ok(ScrapedPage {
            url: self.url.clone(),
            title,
            items,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title> Quotes to Scrape </title></head><body>
        <div class="quote">
          <span class="text">“The world as we have created it is a process of our thinking.”</span>
          <span>by <small class="author">Albert Einstein</small></span>
          <div class="tags">Tags:
            <a class="tag" href="/tag/change/">change</a>
            <a class="tag" href="/tag/thinking/">thinking</a>
          </div>
        </div>
        <div class="quote">
          <span class="text">“A day without sunshine is like, you know, night.”</span>
          <span>by <small class="author">Steve Martin</small></span>
          <div class="tags">Tags:</div>
        </div>
        </body></html>
    "#;

    #[test]
    fn structured_extraction_yields_objects() {
        let (title, items) = extract_page(PAGE, ExtractionMode::Structured).unwrap();
        assert_eq!(title, "Quotes to Scrape");
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0]["text"],
            "The world as we have created it is a process of our thinking."
        );
        assert_eq!(items[0]["author"], "Albert Einstein");
        assert_eq!(items[0]["tags"], json!(["change", "thinking"]));
        assert_eq!(items[1]["tags"], json!([]));
    }

    #[test]
    fn text_only_extraction_yields_strings() {
        let (_, items) = extract_page(PAGE, ExtractionMode::TextOnly).unwrap();
        assert_eq!(
            items,
            vec![
                json!("The world as we have created it is a process of our thinking."),
                json!("A day without sunshine is like, you know, night."),
            ]
        );
    }

    #[test]
    fn page_without_quotes_is_empty_not_an_error() {
        let (title, items) = extract_page("<html><body>nothing</body></html>", ExtractionMode::Structured).unwrap();
        assert_eq!(title, "");
        assert!(items.is_empty());
    }

    #[test]
    fn extraction_mode_parses_leniently() {
        assert_eq!(ExtractionMode::from_config("TEXT"), ExtractionMode::TextOnly);
        assert_eq!(ExtractionMode::from_config("text-only"), ExtractionMode::TextOnly);
        assert_eq!(ExtractionMode::from_config("structured"), ExtractionMode::Structured);
        assert_eq!(ExtractionMode::from_config("???"), ExtractionMode::Structured);
    }

    #[tokio::test]
    async fn inline_fixture_source_extracts() {
        let source = FixturePageSource::from_html("fixture://page", PAGE, ExtractionMode::Structured);
        let page = source.fetch().await.unwrap();
        assert_eq!(page.url, "fixture://page");
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn missing_fixture_file_is_an_io_error() {
        let source = FixturePageSource::from_path("fixture://gone", "/definitely/not/here.html", ExtractionMode::Structured);
        assert!(matches!(source.fetch().await, Err(AdapterError::Io { .. })));
    }
}
