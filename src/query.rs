//! Search criteria, result shaping, and the schema-aware query rewrite.

use crate::{
    analyzer::{Analyzer, FieldAnalyzerSelector},
    error::{Error, Result},
    value::{fields as meta, Document},
};

pub const DEFAULT_TOP_N: usize = 100_000;
pub const DEFAULT_ITEMS_PER_PAGE: usize = 10;

/// What to search for and how to page it.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    /// Query string; empty or `*:*` matches everything.
    pub query: String,
    /// Top-level sortable field to order by, with an optional leading
    /// `-` for descending. Blank means relevance order.
    pub sort_by_field: Option<String>,
    pub top_n: usize,
    pub items_per_page: usize,
    pub page_number: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        SearchCriteria {
            query: String::new(),
            sort_by_field: None,
            top_n: DEFAULT_TOP_N,
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            page_number: 1,
        }
    }
}

impl SearchCriteria {
    pub fn with_query(query: impl Into<String>) -> Self {
        SearchCriteria {
            query: query.into(),
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(Error::invalid("topN must be positive"));
        }
        if self.items_per_page == 0 {
            return Err(Error::invalid("itemsPerPage must be positive"));
        }
        if self.page_number == 0 {
            return Err(Error::invalid("pageNumber must be positive"));
        }
        Ok(())
    }

    pub(crate) fn sort_spec(&self) -> Option<SortSpec> {
        let raw = self.sort_by_field.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.strip_prefix('-') {
            Some(field) => Some(SortSpec {
                field: field.to_string(),
                descending: true,
            }),
            None => Some(SortSpec {
                field: raw.to_string(),
                descending: false,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SortSpec {
    pub field: String,
    pub descending: bool,
}

/// A page of hits plus the paging math around it.
#[derive(Debug)]
pub struct SearchResult {
    pub query: String,
    pub sort_by_field: Option<String>,
    pub top_n: usize,
    pub items_per_page: usize,
    pub page_number: usize,
    /// Number of items in this page's window.
    pub hit_count: usize,
    /// Total matches reported by the index.
    pub total_hit_count: usize,
    pub page_count: usize,
    pub items: Vec<Document>,
}

/// The window of hit indices for one page, clipped to the selected set.
pub(crate) fn page_window(criteria: &SearchCriteria, selected: usize) -> std::ops::Range<usize> {
    let start = (criteria.page_number - 1).saturating_mul(criteria.items_per_page);
    let end = (start + criteria.items_per_page).min(selected);
    start.min(selected)..end
}

pub(crate) fn page_count(criteria: &SearchCriteria, total: usize) -> usize {
    let selected = total.min(criteria.top_n);
    selected.div_ceil(criteria.items_per_page)
}

/// Rewrite `field:` prefixes onto the JSON fields that actually carry
/// them, per the analyzer selector: tokenized fields to `tok.`, verbatim
/// fields to `raw.`. `_id` and `_full_text` are concrete index fields
/// and pass through, as does anything inside double quotes.
pub(crate) fn rewrite_query(query: &str, selector: &FieldAnalyzerSelector) -> String {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len() + 16);
    let mut in_quotes = false;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            in_quotes = !in_quotes;
            out.push(c);
            prev = Some(c);
            i += 1;
            continue;
        }
        let token_start = matches!(prev, None | Some(' ' | '\t' | '(' | '+' | '-' | '!'));
        if !in_quotes && token_start && (c.is_alphanumeric() || c == '_') {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if i < chars.len() && chars[i] == ':' {
                match json_field_for(&word, selector) {
                    Some(json_field) => {
                        out.push_str(json_field);
                        out.push('.');
                        out.push_str(&word);
                    }
                    None => out.push_str(&word),
                }
                out.push(':');
                i += 1;
            } else {
                out.push_str(&word);
            }
            prev = out.chars().last();
            continue;
        }
        out.push(c);
        prev = Some(c);
        i += 1;
    }
    out
}

fn json_field_for(name: &str, selector: &FieldAnalyzerSelector) -> Option<&'static str> {
    if name == meta::ID || name == meta::FULL_TEXT {
        return None;
    }
    match selector.select(name) {
        Analyzer::FullText => Some("tok"),
        Analyzer::Keyword => Some("raw"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;
    use crate::schema::{DataType, Schema};

    fn selector() -> FieldAnalyzerSelector {
        let mut schema = Schema::new("t");
        schema
            .add_or_get("title", "title", DataType::Text, true)
            .unwrap();
        schema
            .add_or_get("count", "count", DataType::Number, true)
            .unwrap();
        let author = schema
            .add_or_get("author", "author", DataType::Object, false)
            .unwrap();
        author
            .object_schema_mut()
            .add_or_get("name", "author.name", DataType::Text, false)
            .unwrap();
        FieldAnalyzerSelector::new(Arc::new(RwLock::new(schema)))
    }

    #[test]
    fn defaults_match_contract() {
        let criteria = SearchCriteria::default();
        assert_eq!(criteria.top_n, 100_000);
        assert_eq!(criteria.items_per_page, 10);
        assert_eq!(criteria.page_number, 1);
        criteria.validate().unwrap();
    }

    #[test]
    fn non_positive_paging_is_rejected() {
        for broken in [
            SearchCriteria {
                top_n: 0,
                ..Default::default()
            },
            SearchCriteria {
                items_per_page: 0,
                ..Default::default()
            },
            SearchCriteria {
                page_number: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                broken.validate(),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn sort_spec_parses_descending_prefix() {
        let mut criteria = SearchCriteria::default();
        assert_eq!(criteria.sort_spec(), None);

        criteria.sort_by_field = Some("  ".into());
        assert_eq!(criteria.sort_spec(), None);

        criteria.sort_by_field = Some("count".into());
        assert_eq!(
            criteria.sort_spec(),
            Some(SortSpec {
                field: "count".into(),
                descending: false
            })
        );

        criteria.sort_by_field = Some("-count".into());
        assert_eq!(
            criteria.sort_spec(),
            Some(SortSpec {
                field: "count".into(),
                descending: true
            })
        );
    }

    #[test]
    fn window_math() {
        let criteria = SearchCriteria {
            items_per_page: 10,
            page_number: 3,
            ..Default::default()
        };
        assert_eq!(page_window(&criteria, 25), 20..25);
        assert_eq!(page_window(&criteria, 50), 20..30);
        assert_eq!(page_window(&criteria, 5), 5..5);
        assert_eq!(page_count(&criteria, 25), 3);
        assert_eq!(page_count(&criteria, 0), 0);

        let capped = SearchCriteria {
            top_n: 12,
            items_per_page: 10,
            ..Default::default()
        };
        assert_eq!(page_count(&capped, 25), 2);
    }

    #[test]
    fn rewrite_routes_by_analyzer() {
        let s = selector();
        assert_eq!(rewrite_query("title:Hello", &s), "tok.title:Hello");
        assert_eq!(rewrite_query("count:3", &s), "raw.count:3");
        assert_eq!(
            rewrite_query("author.name:Ada", &s),
            "tok.author.name:Ada"
        );
        assert_eq!(
            rewrite_query("title:a AND count:3", &s),
            "tok.title:a AND raw.count:3"
        );
    }

    #[test]
    fn rewrite_leaves_reserved_and_bare_terms() {
        let s = selector();
        assert_eq!(rewrite_query("hello world", &s), "hello world");
        assert_eq!(rewrite_query("_id:abc", &s), "_id:abc");
        assert_eq!(rewrite_query("_full_text:abc", &s), "_full_text:abc");
        assert_eq!(
            rewrite_query("__title_null__:1", &s),
            "raw.__title_null__:1"
        );
    }

    #[test]
    fn rewrite_respects_quotes_and_negation() {
        let s = selector();
        assert_eq!(
            rewrite_query("\"title:Hello\"", &s),
            "\"title:Hello\""
        );
        assert_eq!(
            rewrite_query("-title:x +count:2", &s),
            "-tok.title:x +raw.count:2"
        );
        assert_eq!(
            rewrite_query("title:\"hello world\"", &s),
            "tok.title:\"hello world\""
        );
    }

    #[test]
    fn unknown_fields_route_to_tokenizer() {
        let s = selector();
        assert_eq!(rewrite_query("mystery:x", &s), "tok.mystery:x");
    }
}
