//! Per-field analyzer selection.
//!
//! The index carries two analyzers: a full-text tokenizer and a verbatim
//! keyword analyzer. Which one applies to a field follows from the live
//! schema; the selector caches its choice per field name and drops the
//! cache whenever the schema's version moves.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tantivy::{
    tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer},
    Index,
};

use crate::schema::{DataType, Schema};

/// Name of the registered full-text tokenizer.
pub const FULL_TEXT_TOKENIZER: &str = "doc_text";
/// Name of tantivy's built-in verbatim analyzer.
pub const KEYWORD_TOKENIZER: &str = "raw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// Tokenized, lower-cased full-text analysis.
    FullText,
    /// Whole-value keyword analysis.
    Keyword,
}

pub fn register_tokenizers(index: &Index) {
    let doc_text = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(255))
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(FULL_TEXT_TOKENIZER, doc_text);
}

/// Chooses the analyzer for a field name against the live schema.
pub struct FieldAnalyzerSelector {
    schema: Arc<RwLock<Schema>>,
    cache: Mutex<AnalyzerCache>,
}

#[derive(Default)]
struct AnalyzerCache {
    schema_version: u64,
    choices: HashMap<String, Analyzer>,
}

impl FieldAnalyzerSelector {
    pub fn new(schema: Arc<RwLock<Schema>>) -> Self {
        FieldAnalyzerSelector {
            schema,
            cache: Mutex::new(AnalyzerCache::default()),
        }
    }

    /// The analyzer for a (possibly dotted) field path. Verbatim text,
    /// numbers, timestamps, GUIDs and booleans take the keyword
    /// analyzer; tokenized text and unknown names take the tokenizer.
    pub fn select(&self, path: &str) -> Analyzer {
        // Synthetic sort/group/null names are keyword-matched.
        if path.starts_with("__") && path.ends_with("__") {
            return Analyzer::Keyword;
        }

        let schema = self.schema.read();
        let mut cache = self.cache.lock();
        if cache.schema_version != schema.version() {
            cache.choices.clear();
            cache.schema_version = schema.version();
        }
        if let Some(choice) = cache.choices.get(path) {
            return *choice;
        }

        let choice = match schema.field_by_path(path) {
            Some(field) => {
                let data_type = match field.data_type {
                    DataType::Array => field.array_element_type.unwrap_or(DataType::Null),
                    other => other,
                };
                match data_type {
                    DataType::Text => {
                        if field.is_tokenized {
                            Analyzer::FullText
                        } else {
                            Analyzer::Keyword
                        }
                    }
                    DataType::Number
                    | DataType::Timestamp
                    | DataType::Guid
                    | DataType::Bool => Analyzer::Keyword,
                    DataType::Null | DataType::Array | DataType::Object => Analyzer::FullText,
                }
            }
            None => Analyzer::FullText,
        };
        cache.choices.insert(path.to_string(), choice);
        choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_with(build: impl FnOnce(&mut Schema)) -> FieldAnalyzerSelector {
        let mut schema = Schema::new("t");
        build(&mut schema);
        FieldAnalyzerSelector::new(Arc::new(RwLock::new(schema)))
    }

    #[test]
    fn tokenized_text_uses_full_text() {
        let selector = selector_with(|s| {
            s.add_or_get("title", "title", DataType::Text, true).unwrap();
        });
        assert_eq!(selector.select("title"), Analyzer::FullText);
    }

    #[test]
    fn scalars_use_keyword() {
        let selector = selector_with(|s| {
            s.add_or_get("count", "count", DataType::Number, true).unwrap();
            s.add_or_get("when", "when", DataType::Timestamp, true).unwrap();
            s.add_or_get("ref", "ref", DataType::Guid, true).unwrap();
            s.add_or_get("flag", "flag", DataType::Bool, true).unwrap();
        });
        for field in ["count", "when", "ref", "flag", "_id"] {
            assert_eq!(selector.select(field), Analyzer::Keyword, "{field}");
        }
    }

    #[test]
    fn unknown_fields_default_to_full_text() {
        let selector = selector_with(|_| {});
        assert_eq!(selector.select("mystery"), Analyzer::FullText);
    }

    #[test]
    fn synthetic_names_are_keyword() {
        let selector = selector_with(|_| {});
        assert_eq!(selector.select("__title_null__"), Analyzer::Keyword);
    }

    #[test]
    fn cache_follows_schema_version() {
        let schema = Arc::new(RwLock::new(Schema::new("t")));
        let selector = FieldAnalyzerSelector::new(schema.clone());

        assert_eq!(selector.select("count"), Analyzer::FullText);

        schema
            .write()
            .add_or_get("count", "count", DataType::Number, true)
            .unwrap();
        assert_eq!(selector.select("count"), Analyzer::Keyword);
    }
}
