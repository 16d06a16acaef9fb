//! The per-collection tantivy index.
//!
//! tantivy's per-index schema is static, so dynamic document fields map
//! into fixed JSON fields:
//!
//! - `_id` -- verbatim, the only stored field,
//! - `_full_text` -- tokenized catch-all, the default query field,
//! - `tok` -- tokenized text search entries,
//! - `raw` -- verbatim text, numbers, booleans, timestamp ticks, GUIDs,
//!   and `__<name>_null__` markers,
//! - `cols` -- fast-only sort and grouping columns, as order-preserving
//!   strings,
//! - `_facets` -- hierarchical facet entries.
//!
//! One writer and one manually reloaded reader share the directory; a
//! 500 ms refresh tick keeps searchers near-real-time, and every
//! mutation is followed by a synchronous commit (the durability
//! boundary).

use std::{path::Path, thread, time::Duration};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::{Map as JsonMap, Value as Json};
use tantivy::{
    collector::{Count, TopDocs},
    query::{AllQuery, Query, QueryParser},
    schema::{
        Facet, FacetOptions, Field, IndexRecordOption, JsonObjectOptions, Schema as IndexSchema,
        TextFieldIndexing, TextOptions, Value as _, STORED, STRING,
    },
    DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term,
};
use tracing::{debug, warn};

use crate::{
    analyzer::{register_tokenizers, FULL_TEXT_TOKENIZER, KEYWORD_TOKENIZER},
    collector::TopFieldCollector,
    error::{Error, Result},
    projector::{sort_field_name, IndexKind, IndexValue, Projection},
    value::fields as meta,
};

/// JSON container field names inside the tantivy schema.
pub mod containers {
    pub const TOK: &str = "tok";
    pub const RAW: &str = "raw";
    pub const COLS: &str = "cols";
    pub const FACETS: &str = "_facets";
}

const WRITER_MEMORY_BYTES: usize = 15_000_000;
const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Ordered ids of the selected top hits plus the total match count.
#[derive(Debug)]
pub struct Hits {
    pub total: usize,
    pub ids: Vec<String>,
}

#[derive(Clone, Copy)]
struct IndexFields {
    id: Field,
    full_text: Field,
}

/// An append/update-capable writer and a refreshable reader view over
/// one index directory.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: IndexFields,
    refresh_stop: Option<Sender<()>>,
    refresh_handle: Option<thread::JoinHandle<()>>,
}

fn build_schema() -> (IndexSchema, IndexFields) {
    let mut builder = IndexSchema::builder();

    let id = builder.add_text_field(meta::ID, STRING | STORED);

    let full_text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(FULL_TEXT_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let full_text = builder.add_text_field(meta::FULL_TEXT, full_text_opts);

    let tok_opts = JsonObjectOptions::default()
        .set_expand_dots_enabled()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(FULL_TEXT_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
    builder.add_json_field(containers::TOK, tok_opts);

    let raw_opts = JsonObjectOptions::default()
        .set_expand_dots_enabled()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(KEYWORD_TOKENIZER)
                .set_index_option(IndexRecordOption::Basic),
        );
    builder.add_json_field(containers::RAW, raw_opts);

    let cols_opts = JsonObjectOptions::default().set_fast(Some(KEYWORD_TOKENIZER));
    builder.add_json_field(containers::COLS, cols_opts);

    builder.add_facet_field(containers::FACETS, FacetOptions::default());

    let schema = builder.build();
    let fields = IndexFields { id, full_text };
    (schema, fields)
}

impl SearchIndex {
    /// Open or create an index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        };

        Self::from_index(index, fields)
    }

    /// An in-memory index (for testing).
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: IndexFields) -> Result<Self> {
        register_tokenizers(&index);
        let writer: IndexWriter = index.writer(WRITER_MEMORY_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let tick_reader: IndexReader = reader.clone();
        let refresh_handle = thread::Builder::new()
            .name("quilldb-refresh".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(REFRESH_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {
                        // Reload failures are transient; the next tick retries.
                        let _ = tick_reader.reload();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(SearchIndex {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
            refresh_stop: Some(stop_tx),
            refresh_handle: Some(refresh_handle),
        })
    }

    /// Add a projected document. Does not commit.
    pub fn add(&self, projection: &Projection) -> Result<()> {
        let doc = self.build_doc(projection)?;
        self.writer.lock().add_document(doc)?;
        Ok(())
    }

    /// Replace the document with the given id: delete by `_id` term,
    /// then add. Does not commit.
    pub fn update(&self, id: &str, projection: &Projection) -> Result<()> {
        let doc = self.build_doc(projection)?;
        let writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.fields.id, id));
        writer.add_document(doc)?;
        Ok(())
    }

    /// Delete all documents with the given id. Does not commit.
    pub fn delete(&self, id: &str) {
        self.writer
            .lock()
            .delete_term(Term::from_field_text(self.fields.id, id));
    }

    /// Durably flush pending mutations.
    pub fn commit(&self) -> Result<()> {
        self.writer.lock().commit()?;
        Ok(())
    }

    /// Make all committed mutations visible to new searchers now, rather
    /// than at the next refresh tick.
    pub fn refresh(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    /// Parse an already-rewritten query string. Empty and `*:*` queries
    /// match all documents; anything unparsable is an invalid argument.
    pub fn parse_query(&self, query: &str) -> Result<Box<dyn Query>> {
        let trimmed = query.trim();
        if trimmed.is_empty() || trimmed == "*:*" {
            return Ok(Box::new(AllQuery));
        }
        let parser = QueryParser::for_index(&self.index, vec![self.fields.full_text]);
        parser
            .parse_query(trimmed)
            .map_err(|e| Error::invalid(format!("malformed query: {e}")))
    }

    /// Execute `query`, keeping the top `limit` hits -- by relevance, or
    /// by a sortable field's column when `sort` is given -- and resolve
    /// their stored ids. Acquires one searcher snapshot for the whole
    /// call and releases it on return.
    pub fn search(
        &self,
        query: &dyn Query,
        limit: usize,
        sort: Option<(&str, bool)>,
    ) -> Result<Hits> {
        let searcher = self.reader.searcher();
        let (total, addresses) = match sort {
            None => {
                let (total, top) =
                    searcher.search(query, &(Count, TopDocs::with_limit(limit)))?;
                (
                    total,
                    top.into_iter().map(|(_score, addr)| addr).collect::<Vec<_>>(),
                )
            }
            Some((field, descending)) => {
                let column = format!("{}.{}", containers::COLS, sort_field_name(field));
                let fruit =
                    searcher.search(query, &TopFieldCollector::new(column, limit, descending))?;
                (fruit.total, fruit.hits)
            }
        };

        let mut ids = Vec::with_capacity(addresses.len());
        for address in addresses {
            ids.push(self.stored_id(&searcher, address)?);
        }
        Ok(Hits { total, ids })
    }

    fn stored_id(&self, searcher: &tantivy::Searcher, address: DocAddress) -> Result<String> {
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(doc
            .get_first(self.fields.id)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    fn build_doc(&self, projection: &Projection) -> Result<TantivyDocument> {
        let mut root = JsonMap::new();
        let mut tok = JsonMap::new();
        let mut raw = JsonMap::new();
        let mut cols = JsonMap::new();

        for field in &projection.fields {
            match field.kind {
                IndexKind::StringStored => {
                    if let IndexValue::Str(id) = &field.value {
                        root.insert(meta::ID.to_string(), Json::String(id.clone()));
                    }
                }
                IndexKind::Text if field.name == meta::FULL_TEXT => {
                    if let IndexValue::Str(text) = &field.value {
                        root.insert(meta::FULL_TEXT.to_string(), Json::String(text.clone()));
                    }
                }
                IndexKind::Text => {
                    if let Some(value) = search_json(&field.value) {
                        push_value(&mut tok, &field.name, value);
                    }
                }
                IndexKind::String | IndexKind::DoublePoint | IndexKind::LongPoint
                | IndexKind::IntPoint => {
                    if let Some(value) = search_json(&field.value) {
                        push_value(&mut raw, &field.name, value);
                    }
                }
                IndexKind::NumericDocValue
                | IndexKind::SortedNumericDocValue
                | IndexKind::SortedDocValue
                | IndexKind::SortedSetDocValue => {
                    push_value(&mut cols, &field.name, Json::String(column_key(&field.value)))
                }
            }
        }

        root.insert(containers::TOK.to_string(), Json::Object(tok));
        root.insert(containers::RAW.to_string(), Json::Object(raw));
        root.insert(containers::COLS.to_string(), Json::Object(cols));
        if !projection.facets.is_empty() {
            let facets: Vec<Json> = projection
                .facets
                .iter()
                .filter(|path| {
                    let ok = Facet::from_text(path).is_ok();
                    if !ok {
                        warn!(facet = %path, "malformed facet path skipped");
                    }
                    ok
                })
                .map(|path| Json::String(path.clone()))
                .collect();
            root.insert(containers::FACETS.to_string(), Json::Array(facets));
        }

        let json = serde_json::to_string(&Json::Object(root))?;
        let doc = TantivyDocument::parse_json(&self.index.schema(), &json)
            .map_err(|e| tantivy::TantivyError::InvalidArgument(e.to_string()))?;
        Ok(doc)
    }
}

impl Drop for SearchIndex {
    fn drop(&mut self) {
        drop(self.refresh_stop.take());
        if let Some(handle) = self.refresh_handle.take() {
            let _ = handle.join();
        }
        debug!("search index closed");
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex").finish_non_exhaustive()
    }
}

/// Insert `value` under `name`, turning repeated names (array elements)
/// into JSON arrays.
fn push_value(map: &mut JsonMap<String, Json>, name: &str, value: Json) {
    if !map.contains_key(name) {
        map.insert(name.to_string(), value);
        return;
    }
    let existing = map.get_mut(name).expect("key just checked");
    if let Json::Array(items) = existing {
        items.push(value);
    } else {
        let first = existing.take();
        *existing = Json::Array(vec![first, value]);
    }
}

/// Search entries keep their native JSON type. Integral doubles are
/// written as integers so that term generation agrees with what the
/// query parser produces for unquoted numeric literals. Non-finite
/// numbers have no JSON form and are skipped.
fn search_json(value: &IndexValue) -> Option<Json> {
    match value {
        IndexValue::Str(s) => Some(Json::String(s.clone())),
        IndexValue::I64(v) => Some(Json::from(*v)),
        IndexValue::U64(v) => Some(Json::from(*v)),
        IndexValue::F64(v) => {
            if !v.is_finite() {
                warn!(value = *v, "non-finite number skipped");
                return None;
            }
            if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                Some(Json::from(*v as i64))
            } else {
                Some(Json::from(*v))
            }
        }
    }
}

/// Sort/group column keys are strings whose lexical order matches the
/// intended order: numerics arrive pre-mapped to u64 and are written as
/// fixed-width hex; text arrives already truncated and cased.
fn column_key(value: &IndexValue) -> String {
    match value {
        IndexValue::Str(s) => s.clone(),
        IndexValue::U64(v) => format!("{v:016x}"),
        IndexValue::I64(v) => format!("{:016x}", crate::projector::long_to_sortable_u64(*v)),
        IndexValue::F64(v) => format!("{:016x}", crate::projector::double_to_sortable_u64(*v)),
    }
}
