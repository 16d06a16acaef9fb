//! quilldb -- a schema-flexible document database with integrated
//! full-text search.
//!
//! quilldb stores heterogeneous documents (arbitrary keyed maps) in
//! named collections, assigns each a stable GUID identity, maintains an
//! inverted index over their contents, and answers ranked, paginated,
//! sortable queries against that index.
//!
//! # Architecture
//!
//! Three subsystems carry the design:
//!
//! 1. **Schema inference** -- each collection observes incoming
//!    documents and lazily builds a typed field schema covering nested
//!    objects and arrays, rejecting type contradictions per value while
//!    never failing a whole document.
//!
//! 2. **Indexing projection** -- a deterministic mapping from a dynamic
//!    document to index fields with three access paths: *search*
//!    (tokenized or verbatim terms), *sort* (`__<name>_sort__` columns),
//!    and *grouping* (`__<name>_docvalues__` columns).
//!
//! 3. **Index lifecycle** -- continuous ingestion through a serialized
//!    [tantivy](https://github.com/quickwit-oss/tantivy) writer with
//!    synchronous commits, near-real-time readers refreshed on a 500 ms
//!    tick, and background schema persistence.
//!
//! # Storage
//!
//! All state lives under one data directory:
//!
//! - **`data/docs.redb`** ([`DocStore`]) -- document payloads, one
//!   namespace per collection, plus persisted schemas
//! - **`data/index/<collection>/`** ([`SearchIndex`]) -- per-collection
//!   index segments
//!
//! The KV row is the source of truth; the index is derived state.
//!
//! # Quick start
//!
//! ```no_run
//! use quilldb::{Database, Document, SearchCriteria};
//!
//! let db = Database::open(std::path::Path::new("./quilldb-data")).unwrap();
//! let books = db.collection("books").unwrap();
//!
//! let mut doc = Document::new();
//! doc.set("title", "The Left Hand of Darkness");
//! doc.set("year", 1969.0);
//! let id = books.insert(doc).unwrap();
//!
//! let mut criteria = SearchCriteria::with_query("title:darkness");
//! criteria.sort_by_field = Some("-year".to_string());
//! let results = books.search(&criteria).unwrap();
//! for item in &results.items {
//!     println!("{:?}: {:?}", item.id(), item.get("title"));
//! }
//! # let _ = id;
//! ```

pub mod analyzer;
pub mod collection;
pub mod collector;
pub mod data_dir;
pub mod database;
pub mod doc_store;
pub mod error;
pub mod index;
pub mod projector;
pub mod query;
pub mod schema;
pub mod value;

pub use collection::Collection;
pub use data_dir::DataDir;
pub use database::{Config, Database};
pub use doc_store::DocStore;
pub use error::{Error, Result};
pub use index::SearchIndex;
pub use query::{SearchCriteria, SearchResult};
pub use schema::{DataType, Field, Schema};
pub use value::{Document, Value};
