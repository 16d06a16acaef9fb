//! End-to-end tests over a real on-disk database.

use std::{collections::BTreeMap, time::Duration};

use quilldb::{
    schema::DataType, Database, Document, Error, SearchCriteria, Value,
};
use uuid::Uuid;

fn open_db() -> (tempfile::TempDir, Database) {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::open(tmp.path()).unwrap();
    (tmp, db)
}

fn doc(pairs: &[(&str, Value)]) -> Document {
    let mut doc = Document::new();
    doc.set_id(Uuid::new_v4());
    for (name, value) in pairs {
        doc.set(*name, value.clone());
    }
    doc
}

#[test]
fn insert_then_search_by_field() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    let mut d = doc(&[("count", Value::Number(3.0))]);
    d.set("title", "Hello");
    let id = d.id().unwrap();
    books.insert(d).unwrap();
    books.refresh().unwrap();

    let result = books
        .search(&SearchCriteria::with_query("title:Hello"))
        .unwrap();
    assert_eq!(result.total_hit_count, 1);
    assert_eq!(result.hit_count, 1);
    assert_eq!(result.items[0].id(), Some(id));

    let schema = books.schema();
    let title = schema.field("title").unwrap();
    assert_eq!(title.data_type, DataType::Text);
    assert!(title.is_tokenized);
    let count = schema.field("count").unwrap();
    assert_eq!(count.data_type, DataType::Number);
    assert!(count.is_sortable);
}

#[test]
fn type_conflict_skips_field_but_keeps_document() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    books
        .insert(doc(&[("count", Value::Number(3.0))]))
        .unwrap();
    let conflicting = doc(&[("count", Value::Text("three".into()))]);
    let id = conflicting.id().unwrap();
    books.insert(conflicting).unwrap();
    books.refresh().unwrap();

    // The second insert succeeded and its payload is intact.
    let stored = books.get(id).unwrap().unwrap();
    assert_eq!(stored.get("count"), Some(&Value::Text("three".into())));

    // The schema still says Number, and only the first document matches
    // a numeric term.
    assert_eq!(
        books.schema().field("count").unwrap().data_type,
        DataType::Number
    );
    let result = books.search(&SearchCriteria::with_query("count:3")).unwrap();
    assert_eq!(result.total_hit_count, 1);
}

#[test]
fn mismatched_array_elements_are_skipped() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    let clean = doc(&[(
        "tags",
        Value::Array(vec!["a".into(), "b".into(), "c".into()]),
    )]);
    let g3 = clean.id().unwrap();
    let mixed = doc(&[(
        "tags",
        Value::Array(vec!["a".into(), Value::Number(1.0), "c".into()]),
    )]);
    let g4 = mixed.id().unwrap();
    books.insert(clean).unwrap();
    books.insert(mixed).unwrap();
    books.refresh().unwrap();

    let result = books.search(&SearchCriteria::with_query("tags:a")).unwrap();
    let mut ids: Vec<_> = result.items.iter().filter_map(Document::id).collect();
    ids.sort();
    let mut expected = vec![g3, g4];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn nested_objects_search_by_dotted_path() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    let mut author = BTreeMap::new();
    author.insert("name".to_string(), Value::Text("Ada".into()));
    author.insert("age".to_string(), Value::Number(36.0));
    let d = doc(&[("author", Value::Object(author))]);
    let id = d.id().unwrap();
    books.insert(d).unwrap();
    books.refresh().unwrap();

    let schema = books.schema();
    let name = schema.field_by_path("author.name").unwrap();
    assert_eq!(name.data_type, DataType::Text);
    let age = schema.field_by_path("author.age").unwrap();
    assert_eq!(age.data_type, DataType::Number);

    let result = books
        .search(&SearchCriteria::with_query("author.name:Ada"))
        .unwrap();
    assert_eq!(result.total_hit_count, 1);
    assert_eq!(result.items[0].id(), Some(id));
}

#[test]
fn pagination_window_math() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    for i in 0..25 {
        books
            .insert(doc(&[("n", Value::Number(f64::from(i)))]))
            .unwrap();
    }
    books.refresh().unwrap();

    let criteria = SearchCriteria {
        items_per_page: 10,
        page_number: 3,
        ..Default::default()
    };
    let result = books.search(&criteria).unwrap();
    assert_eq!(result.total_hit_count, 25);
    assert_eq!(result.hit_count, 5);
    assert_eq!(result.page_count, 3);
    assert_eq!(result.items.len(), 5);

    // A page past the end is empty but well-formed.
    let criteria = SearchCriteria {
        items_per_page: 10,
        page_number: 4,
        ..Default::default()
    };
    let result = books.search(&criteria).unwrap();
    assert_eq!(result.hit_count, 0);
    assert_eq!(result.page_count, 3);

    // topN caps the selected set before pagination.
    let criteria = SearchCriteria {
        top_n: 12,
        items_per_page: 10,
        page_number: 2,
        ..Default::default()
    };
    let result = books.search(&criteria).unwrap();
    assert_eq!(result.hit_count, 2);
    assert_eq!(result.total_hit_count, 25);
    assert_eq!(result.page_count, 2);
}

#[test]
fn dropped_collection_fails_then_recreates_empty() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();
    books.insert(doc(&[("title", "Hello".into())])).unwrap();
    db.persist_schemas();

    db.drop_collection("books").unwrap();

    // The stale handle is dead.
    assert!(matches!(
        books.search(&SearchCriteria::default()),
        Err(Error::NotFound { .. })
    ));

    // Re-creating by name yields an empty index and a default schema.
    let fresh = db.collection("books").unwrap();
    assert_eq!(fresh.count().unwrap(), 0);
    fresh.refresh().unwrap();
    let result = fresh.search(&SearchCriteria::default()).unwrap();
    assert_eq!(result.total_hit_count, 0);
    assert_eq!(fresh.schema().fields.len(), 3);
    assert!(fresh.schema().field("title").is_none());
}

#[test]
fn sorted_paged_search() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    for i in 0..7 {
        books
            .insert(doc(&[("rank", Value::Number(f64::from(i)))]))
            .unwrap();
    }
    books.refresh().unwrap();

    let criteria = SearchCriteria {
        sort_by_field: Some("-rank".into()),
        items_per_page: 3,
        page_number: 2,
        ..Default::default()
    };
    let result = books.search(&criteria).unwrap();
    let ranks: Vec<_> = result
        .items
        .iter()
        .map(|d| d.get("rank").cloned().unwrap())
        .collect();
    assert_eq!(
        ranks,
        vec![Value::Number(3.0), Value::Number(2.0), Value::Number(1.0)]
    );
}

#[test]
fn inserted_document_becomes_visible_without_manual_refresh() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();
    books
        .insert(doc(&[("title", "eventual".into())]))
        .unwrap();

    // The refresh tick runs every 500 ms; well before a second has
    // passed the commit must be visible to new searchers.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let result = books
            .search(&SearchCriteria::with_query("title:eventual"))
            .unwrap();
        if result.total_hit_count == 1 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "document not visible after 5s"
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn reopen_restores_collections_and_index() {
    let tmp = tempfile::tempdir().unwrap();
    let id;
    {
        let db = Database::open(tmp.path()).unwrap();
        let books = db.collection("books").unwrap();
        let d = doc(&[("title", "persistent words".into())]);
        id = d.id().unwrap();
        books.insert(d).unwrap();
        db.persist_schemas();
    }

    let db = Database::open(tmp.path()).unwrap();
    assert_eq!(db.collection_names(), vec!["books".to_string()]);

    let books = db.collection("books").unwrap();
    let schema = books.schema();
    assert_eq!(schema.field("title").unwrap().data_type, DataType::Text);

    assert!(books.get(id).unwrap().is_some());
    books.refresh().unwrap();
    let result = books
        .search(&SearchCriteria::with_query("title:persistent"))
        .unwrap();
    assert_eq!(result.total_hit_count, 1);
    assert_eq!(result.items[0].id(), Some(id));
}

#[test]
fn full_text_default_field_spans_document() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    let d = doc(&[
        ("title", "Structure and Interpretation".into()),
        ("year", Value::Number(1985.0)),
    ]);
    let id = d.id().unwrap();
    books.insert(d).unwrap();
    books.refresh().unwrap();

    // Bare terms hit the synthetic catch-all field.
    for query in ["interpretation", "1985"] {
        let result = books.search(&SearchCriteria::with_query(query)).unwrap();
        assert_eq!(result.total_hit_count, 1, "query {query:?}");
        assert_eq!(result.items[0].id(), Some(id));
    }
}

#[test]
fn null_fields_are_findable_by_marker() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    let with_null = doc(&[("subtitle", Value::Null)]);
    let marked = with_null.id().unwrap();
    books.insert(with_null).unwrap();
    books
        .insert(doc(&[("subtitle", "present".into())]))
        .unwrap();
    books.refresh().unwrap();

    let result = books
        .search(&SearchCriteria::with_query("__subtitle_null__:1"))
        .unwrap();
    assert_eq!(result.total_hit_count, 1);
    assert_eq!(result.items[0].id(), Some(marked));
}

#[test]
fn update_and_delete_round_trip() {
    let (_tmp, db) = open_db();
    let books = db.collection("books").unwrap();

    let original = doc(&[("title", "before".into())]);
    let id = original.id().unwrap();
    books.insert(original).unwrap();

    let mut replacement = Document::new();
    replacement.set_id(id);
    replacement.set("title", "after");
    books.update(replacement).unwrap();
    books.refresh().unwrap();

    assert_eq!(
        books
            .search(&SearchCriteria::with_query("title:before"))
            .unwrap()
            .total_hit_count,
        0
    );
    assert_eq!(
        books
            .search(&SearchCriteria::with_query("title:after"))
            .unwrap()
            .total_hit_count,
        1
    );

    books.delete(id).unwrap();
    books.refresh().unwrap();
    assert_eq!(books.get(id).unwrap(), None);
    assert_eq!(
        books
            .search(&SearchCriteria::default())
            .unwrap()
            .total_hit_count,
        0
    );
}
