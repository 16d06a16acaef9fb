//! The database: named collections over one shared KV engine and data
//! directory, with background schema persistence.

use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    thread,
    time::Duration,
};

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    collection::Collection,
    data_dir::DataDir,
    doc_store::{DocStore, SCHEMA_NAMESPACE},
    error::{Error, Result},
    projector::is_legal_field_name,
    schema::Schema,
};

const PERSIST_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct Config {
    /// Period of the schema-persist tick.
    pub schema_persist_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schema_persist_interval: Duration::from_secs(1),
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, Arc<Collection>>>>;

/// Multiplexes named collections over a shared KV engine and data
/// directory.
///
/// Collections are created implicitly on first reference by name and
/// reloaded from persisted schemas at open. A background task snapshots
/// each live collection's schema into the reserved `__schema__`
/// namespace: inserted on first sight, rewritten only when the live
/// field set differs from the saved one. Persistence failures are
/// logged, never propagated.
pub struct Database {
    data_dir: DataDir,
    store: Arc<DocStore>,
    registry: Registry,
    create_lock: Mutex<()>,
    persist_lock: Arc<Mutex<()>>,
    persist_stop: Option<Sender<()>>,
    persist_handle: Option<thread::JoinHandle<()>>,
}

impl Database {
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with(root, Config::default())
    }

    pub fn open_with(root: &Path, config: Config) -> Result<Self> {
        let data_dir = DataDir::resolve(root)?;
        let store = Arc::new(DocStore::open(&data_dir.store_path())?);

        let mut collections = HashMap::new();
        for schema in store.load_schemas()? {
            let name = schema.name.clone();
            let collection =
                Collection::open(&name, &data_dir.index_dir(&name), store.clone(), schema)?;
            collections.insert(name, Arc::new(collection));
        }
        debug!(collections = collections.len(), "database opened");

        let registry: Registry = Arc::new(Mutex::new(collections));
        let persist_lock = Arc::new(Mutex::new(()));

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let tick_registry = registry.clone();
        let tick_store = store.clone();
        let tick_lock = persist_lock.clone();
        let interval = config.schema_persist_interval;
        let persist_handle = thread::Builder::new()
            .name("quilldb-schema-persist".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        persist_tick(&tick_registry, &tick_store, &tick_lock)
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Database {
            data_dir,
            store,
            registry,
            create_lock: Mutex::new(()),
            persist_lock,
            persist_stop: Some(stop_tx),
            persist_handle: Some(persist_handle),
        })
    }

    /// Look up a collection by name, creating it with a default schema
    /// on first reference.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        validate_collection_name(name)?;

        if let Some(existing) = self.registry.lock().get(name) {
            return Ok(existing.clone());
        }

        // Serialize creations; the registry lock itself is held only for
        // map access, never across index or store I/O.
        let _creating = self.create_lock.lock();
        if let Some(existing) = self.registry.lock().get(name) {
            return Ok(existing.clone());
        }
        let fresh = Arc::new(Collection::open(
            name,
            &self.data_dir.index_dir(name),
            self.store.clone(),
            Schema::new(name),
        )?);
        self.registry
            .lock()
            .insert(name.to_string(), fresh.clone());
        Ok(fresh)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.registry.lock().keys().cloned().collect()
    }

    /// Drop a collection: remove it from the registry, tear down its
    /// contents, and delete its schema row and index files. A partial
    /// failure reports unsuccessful but leaves the registry consistent.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let collection = self
            .registry
            .lock()
            .remove(name)
            .ok_or_else(|| Error::not_found("collection", name))?;

        collection.drop_contents()?;
        self.store.delete_schema(name)?;

        // Release our handle before removing segment files; stale
        // readers on other handles keep working off open descriptors.
        drop(collection);
        let index_dir = self.data_dir.index_dir(name);
        if index_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&index_dir) {
                warn!(collection = name, error = %e, "index directory not removed");
            }
        }
        Ok(())
    }

    /// Run one schema-persistence pass synchronously, as the background
    /// tick would.
    pub fn persist_schemas(&self) {
        persist_tick(&self.registry, &self.store, &self.persist_lock);
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        drop(self.persist_stop.take());
        if let Some(handle) = self.persist_handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.data_dir.root())
            .finish_non_exhaustive()
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid("collection name must not be blank"));
    }
    if name == SCHEMA_NAMESPACE {
        return Err(Error::invalid(format!(
            "collection name '{SCHEMA_NAMESPACE}' is reserved"
        )));
    }
    if !is_legal_field_name(name) {
        return Err(Error::invalid(format!(
            "collection name '{name}' contains illegal characters"
        )));
    }
    Ok(())
}

/// One pass of the schema-persist task. Skips the tick when the
/// persistence lock stays contended past its timeout; per-collection
/// failures are logged and never propagated.
fn persist_tick(registry: &Registry, store: &DocStore, persist_lock: &Mutex<()>) {
    let Some(_guard) = persist_lock.try_lock_for(PERSIST_LOCK_TIMEOUT) else {
        debug!("schema persistence tick skipped, lock contended");
        return;
    };

    let collections: Vec<Arc<Collection>> = registry.lock().values().cloned().collect();
    for collection in collections {
        if collection.is_dropped() {
            continue;
        }
        if let Err(e) = persist_schema(store, &collection) {
            warn!(collection = collection.name(), error = %e, "schema persistence failed");
        }
    }
}

fn persist_schema(store: &DocStore, collection: &Collection) -> Result<()> {
    let live = collection.schema_handle();
    match store.get_schema(collection.name())? {
        None => {
            let snapshot = live.read().clone();
            store.put_schema(&snapshot)
        }
        Some(saved) => {
            if saved.same_fields(&live.read()) {
                return Ok(());
            }
            let snapshot = {
                let mut schema = live.write();
                schema.modified_at = Utc::now();
                schema.clone()
            };
            store.put_schema(&snapshot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Document;

    #[test]
    fn name_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        for bad in ["", "  ", "__schema__", "a/b", "a b", "a:b"] {
            assert!(
                matches!(db.collection(bad), Err(Error::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
        db.collection("books").unwrap();
    }

    #[test]
    fn collection_handles_are_shared() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        let a = db.collection("books").unwrap();
        let b = db.collection("books").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(db.collection_names(), vec!["books".to_string()]);
    }

    #[test]
    fn drop_unknown_collection_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open(tmp.path()).unwrap();
        assert!(matches!(
            db.drop_collection("ghost"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn persist_is_idempotent_until_schema_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open(tmp.path()).unwrap();
        let books = db.collection("books").unwrap();

        db.persist_schemas();
        let first = db.store.get_schema("books").unwrap().unwrap();

        // Unchanged schema: the row is untouched.
        db.persist_schemas();
        let second = db.store.get_schema("books").unwrap().unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.modified_at, second.modified_at);

        // A new field bumps _modifiedTimestamp, preserves _createdTimestamp.
        let mut doc = Document::new();
        doc.set("title", "Hello");
        books.insert(doc).unwrap();
        db.persist_schemas();
        let third = db.store.get_schema("books").unwrap().unwrap();
        assert_eq!(first.created_at, third.created_at);
        assert!(third.modified_at > second.modified_at);
        assert!(third.field("title").is_some());
    }
}
