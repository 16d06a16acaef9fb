//! A named set of documents with one schema and one index.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    analyzer::FieldAnalyzerSelector,
    doc_store::DocStore,
    error::{Error, Result},
    index::SearchIndex,
    projector::{project, FacetBuilder, Projection},
    query::{self, SearchCriteria, SearchResult},
    schema::Schema,
    value::{fields as meta, Document, Value},
};

/// Binds one live schema, one KV namespace, and one index.
///
/// Mutations persist the payload first (the KV row is the source of
/// truth), then project it against the schema -- possibly extending it --
/// and write to the index with a synchronous commit. Reads go through a
/// searcher snapshot and resolve hit ids back against the KV store.
pub struct Collection {
    name: String,
    store: Arc<DocStore>,
    index: SearchIndex,
    schema: Arc<RwLock<Schema>>,
    selector: FieldAnalyzerSelector,
    dropped: AtomicBool,
    disposed: AtomicBool,
}

impl Collection {
    pub(crate) fn open(
        name: &str,
        index_dir: &Path,
        store: Arc<DocStore>,
        schema: Schema,
    ) -> Result<Self> {
        let index = SearchIndex::open(index_dir)?;
        Ok(Self::with_parts(name, index, store, schema))
    }

    fn with_parts(name: &str, index: SearchIndex, store: Arc<DocStore>, schema: Schema) -> Self {
        let schema = Arc::new(RwLock::new(schema));
        let selector = FieldAnalyzerSelector::new(schema.clone());
        Collection {
            name: name.to_string(),
            store,
            index,
            schema,
            selector,
            dropped: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A snapshot of the live schema.
    pub fn schema(&self) -> Schema {
        self.schema.read().clone()
    }

    pub(crate) fn schema_handle(&self) -> Arc<RwLock<Schema>> {
        self.schema.clone()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_dropped() {
            return Err(Error::not_found("collection", &self.name));
        }
        Ok(())
    }

    /// Declare a top-level field as a facet source.
    pub fn set_facet_field(&self, field: &str) -> Result<()> {
        self.ensure_live()?;
        self.schema.write().set_facet(field);
        Ok(())
    }

    /// Insert a document, assigning `_id` if absent and stamping both
    /// timestamps. Returns the document's id.
    pub fn insert(&self, mut doc: Document) -> Result<Uuid> {
        self.ensure_live()?;

        let id = match doc.get(meta::ID) {
            None => {
                let id = Uuid::new_v4();
                doc.set_id(id);
                id
            }
            Some(Value::Guid(id)) => *id,
            Some(_) => return Err(Error::invalid("_id must be a GUID")),
        };
        doc.stamp_created(Utc::now());

        self.store
            .insert(&self.name, &id.to_string(), &doc.to_bytes()?)?;
        let projection = self.project_locked(&doc)?;
        self.index.add(&projection)?;
        self.index.commit()?;

        debug!(collection = %self.name, %id, "document inserted");
        Ok(id)
    }

    /// Replace an existing document wholesale, bumping
    /// `_modifiedTimestamp` and preserving the stored creation stamp.
    pub fn update(&self, mut doc: Document) -> Result<()> {
        self.ensure_live()?;
        let id = doc.id().ok_or(Error::MissingId)?;
        let key = id.to_string();

        let existing = self
            .store
            .get(&self.name, &key)?
            .ok_or_else(|| Error::not_found("document", &key))?;
        let existing = Document::from_bytes(&existing)?;
        if let Some(created) = existing.created_timestamp() {
            doc.set(meta::CREATED, created);
        }
        doc.stamp_modified(Utc::now());

        self.store.update(&self.name, &key, &doc.to_bytes()?)?;
        let projection = self.project_locked(&doc)?;
        self.index.update(&key, &projection)?;
        self.index.commit()?;

        debug!(collection = %self.name, %id, "document updated");
        Ok(())
    }

    /// Remove a document from the KV store and the index.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.ensure_live()?;
        let key = id.to_string();

        let deleted = self.store.delete(&self.name, &key)?;
        if deleted == 0 {
            return Err(Error::not_found("document", &key));
        }
        self.index.delete(&key);
        self.index.commit()?;

        debug!(collection = %self.name, %id, "document deleted");
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Document>> {
        self.ensure_live()?;
        match self.store.get(&self.name, &id.to_string())? {
            Some(bytes) => Ok(Some(Document::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<usize> {
        self.ensure_live()?;
        self.store.count(&self.name)
    }

    /// Execute a ranked, optionally sorted, paginated query.
    pub fn search(&self, criteria: &SearchCriteria) -> Result<SearchResult> {
        self.ensure_live()?;
        criteria.validate()?;

        let rewritten = query::rewrite_query(&criteria.query, &self.selector);
        let parsed = self.index.parse_query(&rewritten)?;
        let sort_spec = criteria.sort_spec();
        let sort = sort_spec
            .as_ref()
            .map(|spec| (spec.field.as_str(), spec.descending));

        let hits = self.index.search(&*parsed, criteria.top_n, sort)?;

        let window = query::page_window(criteria, hits.ids.len());
        let mut items = Vec::with_capacity(window.len());
        for id in &hits.ids[window] {
            match self.store.get(&self.name, id)? {
                Some(bytes) => items.push(Document::from_bytes(&bytes)?),
                // The index can briefly lead or trail the KV store after
                // a partial failure; the KV row is authoritative.
                None => warn!(collection = %self.name, %id, "hit has no payload row"),
            }
        }

        Ok(SearchResult {
            query: criteria.query.clone(),
            sort_by_field: criteria.sort_by_field.clone(),
            top_n: criteria.top_n,
            items_per_page: criteria.items_per_page,
            page_number: criteria.page_number,
            hit_count: items.len(),
            total_hit_count: hits.total,
            page_count: query::page_count(criteria, hits.total),
            items,
        })
    }

    /// Make committed writes visible to searchers immediately instead of
    /// waiting for the refresh tick.
    pub fn refresh(&self) -> Result<()> {
        self.index.refresh()
    }

    /// Tear down: mark dropped, delete the payload namespace, mark
    /// disposed. Index files are removed by the owning database once the
    /// collection handle is released.
    pub(crate) fn drop_contents(&self) -> Result<()> {
        self.dropped.store(true, Ordering::Release);
        self.store.drop_namespace(&self.name)?;
        self.disposed.store(true, Ordering::Release);
        debug!(collection = %self.name, "collection dropped");
        Ok(())
    }

    fn project_locked(&self, doc: &Document) -> Result<Projection> {
        let mut schema = self.schema.write();
        project(doc, &mut schema, Some(&HierarchicalFacets))
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("dropped", &self.is_dropped())
            .finish_non_exhaustive()
    }
}

/// Builds `/field/value` facet paths for fields declared as facets.
/// Array fields contribute one path per element.
struct HierarchicalFacets;

impl FacetBuilder for HierarchicalFacets {
    fn build(&self, doc: &Document, schema: &Schema) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for (name, field) in schema.fields.iter().filter(|(_, f)| f.is_facet) {
            let Some(value) = doc.get(name) else {
                continue;
            };
            match value {
                Value::Array(items) => {
                    for item in items {
                        if let Some(leaf) = facet_leaf(item) {
                            paths.push(format!("/{name}/{leaf}"));
                        }
                    }
                }
                other => {
                    if let Some(leaf) = facet_leaf(other) {
                        paths.push(format!("/{name}/{leaf}"));
                    }
                }
            }
        }
        Ok(paths)
    }
}

fn facet_leaf(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Guid(g) => Some(g.to_string()),
        Value::Number(n) => Some(crate::value::format_number(*n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d").to_string()),
        _ => None,
    }
}
