// Extraction over the checked-in quotes.toscrape.com snapshot, normalized the
// way the pipeline does it.

use std::path::PathBuf;

use quotefeed_adapters::{ExtractionMode, FixturePageSource, PageSource};
use quotefeed_core::{merge, normalize_items};

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/quotes-toscrape/page1.html")
}

#[tokio::test]
async fn fixture_page_extracts_and_normalizes() {
    let source = FixturePageSource::from_path("https://quotes.toscrape.com/", fixture_path(), ExtractionMode::Structured);
    let page = source.fetch().await.expect("fixture fetch");

    assert_eq!(page.title, "Quotes to Scrape");
    assert_eq!(page.items.len(), 5);

    let records = normalize_items(&page.items);
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].author, "Albert Einstein");
    assert!(records[0].tags.contains("deep-thoughts"));

    let merged = merge(&[], &records);
    assert_eq!(merged.len(), 3);
    let rowling = merged.iter().find(|r| r.author == "J.K. Rowling").expect("rowling");
    assert_eq!(rowling.tags.len(), 3);
}

#[tokio::test]
async fn text_only_fixture_has_no_authors() {
    let source = FixturePageSource::from_path("https://quotes.toscrape.com/", fixture_path(), ExtractionMode::TextOnly);
    let page = source.fetch().await.expect("fixture fetch");
    let records = normalize_items(&page.items);
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.author.is_empty() && r.tags.is_empty()));
}
