//! Projection of a dynamic document onto index fields.
//!
//! The projector is the deterministic mapping `(document, schema) ->
//! (updated schema, index fields)`. Each leaf value emits up to three
//! entries -- a search entry under the raw field name, a sort entry under
//! `__<name>_sort__`, and a grouping entry under `__<name>_docvalues__` --
//! and projection drives schema evolution as a side effect: unseen fields
//! are registered, `Null`-typed fields adopt the first concrete type, and
//! values that contradict an established type are skipped with a warning
//! rather than failing the document.

use tracing::warn;

use crate::{
    error::{Error, Result},
    schema::{DataType, Schema},
    value::{self, fields as meta, Document, Value},
};

/// Index entry kinds, mirroring the underlying engine's field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Tokenized full-text search entry.
    Text,
    /// Verbatim (keyword) search entry.
    String,
    /// Verbatim search entry with a stored value; only `_id` uses this.
    StringStored,
    /// Double-precision point search entry.
    DoublePoint,
    /// 64-bit integer point search entry.
    LongPoint,
    /// 32-bit integer point search entry (bools, null markers).
    IntPoint,
    /// Single numeric per-document column, for sorting.
    NumericDocValue,
    /// Multi-valued numeric column, for grouping.
    SortedNumericDocValue,
    /// Single string column, for sorting.
    SortedDocValue,
    /// Multi-valued string column, for grouping.
    SortedSetDocValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Str(String),
    F64(f64),
    I64(i64),
    U64(u64),
}

/// One `(name, value, kind)` triple destined for the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexField {
    pub name: String,
    pub kind: IndexKind,
    pub value: IndexValue,
}

impl IndexField {
    fn new(name: impl Into<String>, kind: IndexKind, value: IndexValue) -> Self {
        IndexField {
            name: name.into(),
            kind,
            value,
        }
    }
}

/// Builds hierarchical facet entries for fields declared as facets.
/// Failures are recoverable: the document is indexed without facets.
pub trait FacetBuilder {
    fn build(&self, doc: &Document, schema: &Schema) -> Result<Vec<String>>;
}

/// The projector's output: index entries (the document's `_id` first,
/// `_full_text` last) and any facet paths.
#[derive(Debug, Default)]
pub struct Projection {
    pub fields: Vec<IndexField>,
    pub facets: Vec<String>,
}

pub fn sort_field_name(name: &str) -> String {
    format!("__{name}_sort__")
}

pub fn group_field_name(name: &str) -> String {
    format!("__{name}_docvalues__")
}

pub fn null_field_name(name: &str) -> String {
    format!("__{name}_null__")
}

const ILLEGAL_CHARS: &[char] = &[
    '+', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\', '/', '.',
];

/// A local field name is indexable unless it contains query-syntax
/// characters or whitespace, or collides with the reserved `__…__`
/// namespace. Names failing this stay in the persisted payload but are
/// skipped for indexing.
pub fn is_legal_field_name(name: &str) -> bool {
    if name.is_empty() || name == meta::FULL_TEXT {
        return false;
    }
    if name.starts_with("__") && name.ends_with("__") {
        return false;
    }
    !name
        .chars()
        .any(|c| c.is_whitespace() || ILLEGAL_CHARS.contains(&c))
}

/// Lucene's monotonic double-to-long mapping, shifted into unsigned
/// space: `a < b` as doubles iff `map(a) < map(b)` as u64.
pub fn double_to_sortable_u64(v: f64) -> u64 {
    let bits = v.to_bits() as i64;
    let sortable = bits ^ ((bits >> 63) & 0x7fff_ffff_ffff_ffff);
    (sortable as u64) ^ (1 << 63)
}

/// Order-preserving i64 -> u64 shift.
pub fn long_to_sortable_u64(v: i64) -> u64 {
    (v as u64) ^ (1 << 63)
}

/// Sort and grouping entries keep at most the first 256 characters,
/// trimmed.
fn truncated(s: &str) -> String {
    let cut: String = s.chars().take(256).collect();
    cut.trim().to_string()
}

/// Project `doc` against the live `schema`, extending the schema as new
/// fields are observed.
///
/// Requires `_id` to be set. Emits the `_id` entry first and the
/// synthetic `_full_text` entry last; facet paths are built through
/// `facet_builder` when the schema declares facet fields.
pub fn project(
    doc: &Document,
    schema: &mut Schema,
    facet_builder: Option<&dyn FacetBuilder>,
) -> Result<Projection> {
    let id = doc.id().ok_or(Error::MissingId)?;

    let mut out = Projection::default();
    out.fields.push(IndexField::new(
        meta::ID,
        IndexKind::StringStored,
        IndexValue::Str(id.to_string()),
    ));
    out.fields.push(IndexField::new(
        group_field_name(meta::ID),
        IndexKind::SortedSetDocValue,
        IndexValue::Str(id.to_string()),
    ));

    let mut changed = false;
    for (name, value) in doc.iter() {
        if name == meta::ID {
            continue;
        }
        if !meta::is_metadata(name) && !is_legal_field_name(name) {
            warn!(field = %name, "illegal field name, not indexed");
            continue;
        }
        project_field(name, name, value, schema, true, &mut changed, &mut out.fields);
    }

    let mut lines = Vec::new();
    for (name, value) in doc.iter() {
        if meta::is_metadata(name) {
            continue;
        }
        value.append_full_text(&mut lines);
    }
    out.fields.push(IndexField::new(
        meta::FULL_TEXT,
        IndexKind::Text,
        IndexValue::Str(lines.join("\n")),
    ));

    if changed {
        schema.bump_version();
    }

    if let Some(builder) = facet_builder {
        if schema.fields.values().any(|f| f.is_facet) {
            match builder.build(doc, schema) {
                Ok(facets) => out.facets = facets,
                Err(e) => {
                    warn!(error = %e, "facet build failed, indexing without facets")
                }
            }
        }
    }

    Ok(out)
}

fn project_field(
    local: &str,
    full: &str,
    value: &Value,
    schema: &mut Schema,
    top_level: bool,
    changed: &mut bool,
    out: &mut Vec<IndexField>,
) {
    let observed = DataType::of(value);
    let leaf = !matches!(observed, DataType::Array | DataType::Object);
    let sortable = top_level && leaf && observed != DataType::Null;

    let before = schema.field(local).map(|f| f.data_type);
    let field = match schema.add_or_get(local, full, observed, sortable) {
        Ok(field) => field,
        // Conflicting value: already logged by the registry, skip it.
        Err(_) => return,
    };
    if before != Some(field.data_type) {
        *changed = true;
    }

    match value {
        Value::Null => {
            out.push(IndexField::new(
                null_field_name(full),
                IndexKind::IntPoint,
                IndexValue::I64(1),
            ));
        }
        Value::Bool(b) => {
            let as_long = i64::from(*b);
            out.push(IndexField::new(full, IndexKind::IntPoint, IndexValue::I64(as_long)));
            if field.is_sortable {
                out.push(IndexField::new(
                    sort_field_name(full),
                    IndexKind::NumericDocValue,
                    IndexValue::U64(long_to_sortable_u64(as_long)),
                ));
            }
            out.push(IndexField::new(
                group_field_name(full),
                IndexKind::SortedNumericDocValue,
                IndexValue::U64(long_to_sortable_u64(as_long)),
            ));
        }
        Value::Number(n) => {
            out.push(IndexField::new(full, IndexKind::DoublePoint, IndexValue::F64(*n)));
            if field.is_sortable {
                out.push(IndexField::new(
                    sort_field_name(full),
                    IndexKind::NumericDocValue,
                    IndexValue::U64(double_to_sortable_u64(*n)),
                ));
            }
            out.push(IndexField::new(
                group_field_name(full),
                IndexKind::SortedNumericDocValue,
                IndexValue::U64(double_to_sortable_u64(*n)),
            ));
        }
        Value::Text(s) => {
            let kind = if field.is_tokenized {
                IndexKind::Text
            } else {
                IndexKind::String
            };
            out.push(IndexField::new(full, kind, IndexValue::Str(s.clone())));
            if field.is_sortable {
                out.push(IndexField::new(
                    sort_field_name(full),
                    IndexKind::SortedDocValue,
                    IndexValue::Str(truncated(s).to_lowercase()),
                ));
            }
            out.push(IndexField::new(
                group_field_name(full),
                IndexKind::SortedSetDocValue,
                IndexValue::Str(truncated(s)),
            ));
        }
        Value::Timestamp(ts) => {
            let ticks = value::timestamp_ticks(ts);
            out.push(IndexField::new(full, IndexKind::LongPoint, IndexValue::I64(ticks)));
            if field.is_sortable {
                out.push(IndexField::new(
                    sort_field_name(full),
                    IndexKind::NumericDocValue,
                    IndexValue::U64(long_to_sortable_u64(ticks)),
                ));
            }
            out.push(IndexField::new(
                group_field_name(full),
                IndexKind::SortedNumericDocValue,
                IndexValue::U64(long_to_sortable_u64(ticks)),
            ));
        }
        Value::Guid(g) => {
            out.push(IndexField::new(full, IndexKind::String, IndexValue::Str(g.to_string())));
            if field.is_sortable {
                out.push(IndexField::new(
                    sort_field_name(full),
                    IndexKind::SortedDocValue,
                    IndexValue::Str(g.to_string()),
                ));
            }
            out.push(IndexField::new(
                group_field_name(full),
                IndexKind::SortedSetDocValue,
                IndexValue::Str(g.to_string()),
            ));
        }
        Value::Array(items) => {
            for item in items {
                let elem_type = DataType::of(item);
                match elem_type {
                    DataType::Null => continue,
                    // Nested arrays are unsupported.
                    DataType::Array => {
                        warn!(field = %full, "nested array element skipped");
                        continue;
                    }
                    _ => {}
                }

                match field.array_element_type {
                    Some(DataType::Null) | None => {
                        field.array_element_type = Some(elem_type);
                        if elem_type == DataType::Text {
                            field.is_tokenized = true;
                        }
                        *changed = true;
                    }
                    Some(established) if established != elem_type => {
                        warn!(
                            field = %full,
                            expected = ?established,
                            actual = ?elem_type,
                            "array element type conflict, element skipped"
                        );
                        continue;
                    }
                    Some(_) => {}
                }

                match item {
                    Value::Bool(b) => {
                        let as_long = i64::from(*b);
                        out.push(IndexField::new(full, IndexKind::IntPoint, IndexValue::I64(as_long)));
                        out.push(IndexField::new(
                            group_field_name(full),
                            IndexKind::SortedNumericDocValue,
                            IndexValue::U64(long_to_sortable_u64(as_long)),
                        ));
                    }
                    Value::Number(n) => {
                        out.push(IndexField::new(full, IndexKind::DoublePoint, IndexValue::F64(*n)));
                        out.push(IndexField::new(
                            group_field_name(full),
                            IndexKind::SortedNumericDocValue,
                            IndexValue::U64(double_to_sortable_u64(*n)),
                        ));
                    }
                    Value::Text(s) => {
                        let kind = if field.is_tokenized {
                            IndexKind::Text
                        } else {
                            IndexKind::String
                        };
                        out.push(IndexField::new(full, kind, IndexValue::Str(s.clone())));
                        out.push(IndexField::new(
                            group_field_name(full),
                            IndexKind::SortedSetDocValue,
                            IndexValue::Str(truncated(s)),
                        ));
                    }
                    Value::Timestamp(ts) => {
                        let ticks = value::timestamp_ticks(ts);
                        out.push(IndexField::new(full, IndexKind::LongPoint, IndexValue::I64(ticks)));
                        out.push(IndexField::new(
                            group_field_name(full),
                            IndexKind::SortedNumericDocValue,
                            IndexValue::U64(long_to_sortable_u64(ticks)),
                        ));
                    }
                    Value::Guid(g) => {
                        out.push(IndexField::new(full, IndexKind::String, IndexValue::Str(g.to_string())));
                        out.push(IndexField::new(
                            group_field_name(full),
                            IndexKind::SortedSetDocValue,
                            IndexValue::Str(g.to_string()),
                        ));
                    }
                    Value::Object(map) => {
                        let child = field.object_schema_mut();
                        for (k, v) in map {
                            if !is_legal_field_name(k) {
                                warn!(field = %k, "illegal field name, not indexed");
                                continue;
                            }
                            let child_full = format!("{full}.{k}");
                            project_field(k, &child_full, v, child, false, changed, out);
                        }
                    }
                    Value::Null | Value::Array(_) => unreachable!("filtered above"),
                }
            }
        }
        Value::Object(map) => {
            let child = field.object_schema_mut();
            for (k, v) in map {
                if !is_legal_field_name(k) {
                    warn!(field = %k, "illegal field name, not indexed");
                    continue;
                }
                let child_full = format!("{full}.{k}");
                project_field(k, &child_full, v, child, false, changed, out);
            }
        }
    }
}
