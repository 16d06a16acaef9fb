//! Payload and schema persistence over redb.
//!
//! One shared database file carries every collection: payloads live in a
//! `docs:<collection>` table keyed by canonical GUID, and persisted
//! schemas live in the reserved `__schema__` table keyed by collection
//! name. redb transactions are the durability boundary; the KV row is
//! the source of truth for a document.

use std::path::Path;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::{error::Result, schema::Schema};

/// Reserved namespace for persisted collection schemas.
pub const SCHEMA_NAMESPACE: &str = "__schema__";

const SCHEMAS: TableDefinition<&str, &[u8]> = TableDefinition::new(SCHEMA_NAMESPACE);

pub struct DocStore {
    db: Database,
}

impl DocStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure the schema table exists so reads never race creation.
        let txn = db.begin_write()?;
        txn.open_table(SCHEMAS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    fn table_name(collection: &str) -> String {
        format!("docs:{collection}")
    }

    // -- Payloads --

    pub fn insert(&self, collection: &str, id: &str, payload: &[u8]) -> Result<()> {
        let name = Self::table_name(collection);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(def)?;
            table.insert(id, payload)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Replace a payload; returns the number of rows updated (0 or 1).
    pub fn update(&self, collection: &str, id: &str, payload: &[u8]) -> Result<usize> {
        let name = Self::table_name(collection);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db.begin_write()?;
        let replaced = {
            let mut table = txn.open_table(def)?;
            let existing = table.insert(id, payload)?.is_some();
            existing
        };
        txn.commit()?;
        Ok(usize::from(replaced))
    }

    /// Remove a payload; returns the number of rows deleted (0 or 1).
    pub fn delete(&self, collection: &str, id: &str) -> Result<usize> {
        let name = Self::table_name(collection);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(def)?;
            let existing = table.remove(id)?.is_some();
            existing
        };
        txn.commit()?;
        Ok(usize::from(removed))
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Vec<u8>>> {
        let name = Self::table_name(collection);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(def) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(table.get(id)?.map(|v| v.value().to_vec()))
    }

    /// All `(id, payload)` pairs of a collection in one read transaction.
    pub fn get_all(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let name = Self::table_name(collection);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(def) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_vec()));
        }
        Ok(result)
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let name = Self::table_name(collection);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db.begin_read()?;
        match txn.open_table(def) {
            Ok(table) => Ok(table.len()? as usize),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a collection's whole payload namespace. Returns whether the
    /// namespace existed.
    pub fn drop_namespace(&self, collection: &str) -> Result<bool> {
        let name = Self::table_name(collection);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let txn = self.db.begin_write()?;
        let existed = txn.delete_table(def)?;
        txn.commit()?;
        Ok(existed)
    }

    // -- Schema rows --

    pub fn load_schemas(&self) -> Result<Vec<Schema>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SCHEMAS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    pub fn get_schema(&self, collection: &str) -> Result<Option<Schema>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SCHEMAS)?;
        match table.get(collection)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_schema(&self, schema: &Schema) -> Result<()> {
        let bytes = serde_json::to_vec(schema)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SCHEMAS)?;
            table.insert(schema.name.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete_schema(&self, collection: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SCHEMAS)?;
            let existing = table.remove(collection)?.is_some();
            existing
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for DocStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    fn test_store() -> (tempfile::TempDir, DocStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocStore::open(&tmp.path().join("docs.redb")).unwrap();
        (tmp, store)
    }

    #[test]
    fn payload_crud() {
        let (_tmp, store) = test_store();

        assert_eq!(store.get("books", "a").unwrap(), None);
        assert_eq!(store.count("books").unwrap(), 0);

        store.insert("books", "a", b"one").unwrap();
        assert_eq!(store.get("books", "a").unwrap().unwrap(), b"one");
        assert_eq!(store.count("books").unwrap(), 1);

        assert_eq!(store.update("books", "a", b"two").unwrap(), 1);
        assert_eq!(store.get("books", "a").unwrap().unwrap(), b"two");

        assert_eq!(store.delete("books", "a").unwrap(), 1);
        assert_eq!(store.delete("books", "a").unwrap(), 0);
        assert_eq!(store.get("books", "a").unwrap(), None);
    }

    #[test]
    fn namespaces_are_isolated() {
        let (_tmp, store) = test_store();

        store.insert("books", "a", b"book").unwrap();
        store.insert("films", "a", b"film").unwrap();

        assert_eq!(store.get("books", "a").unwrap().unwrap(), b"book");
        assert_eq!(store.get("films", "a").unwrap().unwrap(), b"film");

        assert!(store.drop_namespace("books").unwrap());
        assert_eq!(store.get("books", "a").unwrap(), None);
        assert_eq!(store.get("films", "a").unwrap().unwrap(), b"film");
        assert!(!store.drop_namespace("books").unwrap());
    }

    #[test]
    fn get_all_returns_every_row() {
        let (_tmp, store) = test_store();
        store.insert("books", "b", b"2").unwrap();
        store.insert("books", "a", b"1").unwrap();

        let all = store.get_all("books").unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&("a".to_string(), b"1".to_vec())));
        assert_eq!(store.get_all("ghost").unwrap(), vec![]);
    }

    #[test]
    fn schema_rows_round_trip() {
        let (_tmp, store) = test_store();
        assert_eq!(store.get_schema("books").unwrap(), None);

        let mut schema = Schema::new("books");
        schema
            .add_or_get("title", "title", DataType::Text, true)
            .unwrap();
        store.put_schema(&schema).unwrap();

        let loaded = store.get_schema("books").unwrap().unwrap();
        assert!(schema.same_fields(&loaded));

        let all = store.load_schemas().unwrap();
        assert_eq!(all.len(), 1);

        assert!(store.delete_schema("books").unwrap());
        assert!(!store.delete_schema("books").unwrap());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("docs.redb");

        {
            let store = DocStore::open(&path).unwrap();
            store.insert("books", "a", b"kept").unwrap();
            store.put_schema(&Schema::new("books")).unwrap();
        }

        {
            let store = DocStore::open(&path).unwrap();
            assert_eq!(store.get("books", "a").unwrap().unwrap(), b"kept");
            assert_eq!(store.load_schemas().unwrap().len(), 1);
        }
    }
}
