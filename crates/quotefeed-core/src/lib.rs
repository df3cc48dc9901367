//! Core quote model, ingestion normalizer and merge engine for quotefeed.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "quotefeed-core";

/// Canonical quote. Identity is the trimmed `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QuoteRecord {
    pub text: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl QuoteRecord {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            author: author.into().trim().to_string(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags.extend(clean_tags(tags));
        self
    }
}

/// Ordered, text-unique quote list. Order is first-seen order.
pub type QuoteCollection = Vec<QuoteRecord>;

/// On-disk document rewritten at the end of every scrape cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    pub scraped_at: DateTime<Utc>,
    pub source: String,
    pub title: String,
    pub count: usize,
    pub quotes: QuoteCollection,
}

impl PersistedDocument {
    pub fn new(
        scraped_at: DateTime<Utc>,
        source: impl Into<String>,
        title: impl Into<String>,
        quotes: QuoteCollection,
    ) -> Self {
        Self {
            scraped_at,
            source: source.into(),
            title: title.into(),
            count: quotes.len(),
            quotes,
        }
    }
}

fn clean_tags<I, S>(tags: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter().filter_map(|tag| {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Coerce one untyped item (scraped tuple or stored entry) into a record.
///
/// Bare strings are the legacy stored format. Objects contribute `text`,
/// `author` and `tags` when those have the expected JSON shape; anything else
/// is treated as missing. Returns `None` when the item has no usable text.
pub fn normalize_item(value: &JsonValue) -> Option<QuoteRecord> {
    let record = match value {
        JsonValue::String(text) => QuoteRecord::new(text.as_str(), ""),
        JsonValue::Object(map) => {
            let text = map.get("text").and_then(JsonValue::as_str).unwrap_or_default();
            let author = map
                .get("author")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            let tags = map
                .get("tags")
                .and_then(JsonValue::as_array)
                .map(|arr| arr.iter().filter_map(JsonValue::as_str).collect::<Vec<_>>())
                .unwrap_or_default();
            QuoteRecord::new(text, author).with_tags(tags)
        }
        _ => return None,
    };

    if record.text.is_empty() {
        None
    } else {
        Some(record)
    }
}

pub fn normalize_items(values: &[JsonValue]) -> QuoteCollection {
    values.iter().filter_map(normalize_item).collect()
}

/// What a merge did to the combined collection, counted per incoming record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upsert {
    Ignored,
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Default)]
struct MergeState {
    records: QuoteCollection,
    index: HashMap<String, usize>,
}

impl MergeState {
    fn upsert(&mut self, record: &QuoteRecord) -> Upsert {
        let text = record.text.trim();
        if text.is_empty() {
            return Upsert::Ignored;
        }

        let Some(&slot) = self.index.get(text) else {
            let fresh = QuoteRecord::new(text, record.author.as_str()).with_tags(&record.tags);
            self.index.insert(fresh.text.clone(), self.records.len());
            self.records.push(fresh);
            return Upsert::Inserted;
        };

        let current = &mut self.records[slot];
        let mut changed = false;

        let incoming_author = record.author.trim();
        if current.author.is_empty() && !incoming_author.is_empty() {
            current.author = incoming_author.to_string();
            changed = true;
        }

        for tag in clean_tags(&record.tags) {
            changed |= current.tags.insert(tag);
        }

        if changed {
            Upsert::Updated
        } else {
            Upsert::Unchanged
        }
    }
}

/// Merge a freshly scraped batch into the existing collection.
///
/// Existing records keep their position; new texts are appended in encounter
/// order. On a text collision the first non-empty author wins and tags are
/// unioned.
pub fn merge(existing: &[QuoteRecord], incoming: &[QuoteRecord]) -> QuoteCollection {
    merge_with_stats(existing, incoming).0
}

pub fn merge_with_stats(
    existing: &[QuoteRecord],
    incoming: &[QuoteRecord],
) -> (QuoteCollection, MergeStats) {
    let mut state = MergeState::default();
    for record in existing {
        state.upsert(record);
    }

    let mut stats = MergeStats::default();
    for record in incoming {
        match state.upsert(record) {
            Upsert::Inserted => stats.added += 1,
            Upsert::Updated => stats.updated += 1,
            Upsert::Unchanged => stats.unchanged += 1,
            Upsert::Ignored => {}
        }
    }

    (state.records, stats)
}
