use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    value::{fields as meta, Value},
};

/// The type tag of a document value, as observed by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Bool,
    Number,
    Text,
    Timestamp,
    Guid,
    Array,
    Object,
}

impl DataType {
    pub fn of(value: &Value) -> DataType {
        match value {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Bool,
            Value::Number(_) => DataType::Number,
            Value::Text(_) => DataType::Text,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Guid(_) => DataType::Guid,
            Value::Array(_) => DataType::Array,
            Value::Object(_) => DataType::Object,
        }
    }
}

/// Descriptor for one observed field.
///
/// `name` is the full dotted path; the owning schema keys fields by their
/// local (undotted) name. Once `data_type` is set to anything other than
/// `Null` it never changes, and likewise for `array_element_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub is_tokenized: bool,
    pub is_sortable: bool,
    pub is_facet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_element_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_schema: Option<Box<Schema>>,
}

impl Field {
    fn new(full_name: &str, data_type: DataType, sortable: bool) -> Self {
        Field {
            name: full_name.to_string(),
            data_type,
            is_tokenized: data_type == DataType::Text,
            is_sortable: sortable,
            is_facet: false,
            array_element_type: (data_type == DataType::Array).then_some(DataType::Null),
            object_schema: None,
        }
    }

    /// The nested schema for `Object` fields (and `Array`-of-`Object`
    /// fields), synthesized on first use.
    pub fn object_schema_mut(&mut self) -> &mut Schema {
        self.object_schema
            .get_or_insert_with(|| Box::new(Schema::child(&self.name)))
    }
}

/// The union of observed field descriptors for one collection.
///
/// Grows monotonically: fields are added, never removed or renamed. The
/// in-memory `version` counter is bumped on every mutation and lets
/// downstream caches (analyzer routing) detect staleness; it is not
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub fields: BTreeMap<String, Field>,
    #[serde(skip)]
    version: u64,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields
    }
}

impl Schema {
    /// The default schema for a fresh collection: the three reserved
    /// metadata fields, `_id` first.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut schema = Schema {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            modified_at: now,
            fields: BTreeMap::new(),
            version: 0,
        };
        schema.fields.insert(
            meta::ID.to_string(),
            Field::new(meta::ID, DataType::Guid, false),
        );
        schema.fields.insert(
            meta::CREATED.to_string(),
            Field::new(meta::CREATED, DataType::Timestamp, true),
        );
        schema.fields.insert(
            meta::MODIFIED.to_string(),
            Field::new(meta::MODIFIED, DataType::Timestamp, true),
        );
        schema
    }

    /// A nested schema for the object field `parent`. Carries no metadata
    /// fields; its field names are dotted with the parent's prefix.
    fn child(parent: &str) -> Self {
        let now = Utc::now();
        Schema {
            id: Uuid::new_v4(),
            name: parent.to_string(),
            created_at: now,
            modified_at: now,
            fields: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn field(&self, local: &str) -> Option<&Field> {
        self.fields.get(local)
    }

    /// Resolve a dotted path (`author.name`) through nested schemas.
    pub fn field_by_path(&self, path: &str) -> Option<&Field> {
        let mut schema = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let field = schema.fields.get(segment)?;
            if segments.peek().is_none() {
                return Some(field);
            }
            schema = field.object_schema.as_deref()?;
        }
        None
    }

    /// Idempotent, type-checked field registration.
    ///
    /// A stored `Null` type adopts the incoming one; matching (or `Null`
    /// incoming) types are accepted silently; anything else is a type
    /// conflict and the caller skips indexing the value.
    pub fn add_or_get(
        &mut self,
        local: &str,
        full_name: &str,
        observed: DataType,
        sortable: bool,
    ) -> Result<&mut Field> {
        if !self.fields.contains_key(local) {
            self.fields
                .insert(local.to_string(), Field::new(full_name, observed, sortable));
            self.version += 1;
        } else {
            let field = self.fields.get_mut(local).expect("field just checked");
            if field.data_type == DataType::Null && observed != DataType::Null {
                field.data_type = observed;
                field.is_tokenized = observed == DataType::Text;
                field.is_sortable = sortable;
                field.array_element_type =
                    (observed == DataType::Array).then_some(DataType::Null);
                self.version += 1;
            } else if observed != DataType::Null && field.data_type != observed {
                warn!(
                    field = full_name,
                    expected = ?field.data_type,
                    actual = ?observed,
                    "type conflict, value skipped"
                );
                return Err(Error::SchemaConflict {
                    field: full_name.to_string(),
                    expected: field.data_type,
                    actual: observed,
                });
            }
        }
        Ok(self.fields.get_mut(local).expect("field just inserted"))
    }

    /// Declare a top-level field as a facet source. Creates the field
    /// with an open (`Null`) type if it has not been observed yet.
    pub fn set_facet(&mut self, local: &str) {
        let field = self
            .fields
            .entry(local.to_string())
            .or_insert_with(|| Field::new(local, DataType::Null, false));
        field.is_facet = true;
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Field-set equality, ignoring timestamps and the version counter.
    /// The persistence tick uses this to decide whether a schema row
    /// needs rewriting.
    pub fn same_fields(&self, other: &Schema) -> bool {
        self.fields == other.fields
    }
}
