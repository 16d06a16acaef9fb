//! A top-N collector ordered by a string fast-field column.
//!
//! Sort keys live in the `cols` JSON field as order-preserving strings
//! (see the projector), so one collector covers every sortable type. Each
//! segment gathers `(key, doc)` pairs from its column, sorts locally, and
//! the merge keeps the global top N. Documents without a key sort last in
//! either direction; ties fall back to ascending document order.

use std::cmp::Ordering;

use tantivy::{
    collector::{Collector, SegmentCollector},
    columnar::StrColumn,
    DocAddress, DocId, Score, SegmentOrdinal, SegmentReader,
};

pub struct TopFieldDocs {
    /// Total number of matching documents, before the top-N cut.
    pub total: usize,
    pub hits: Vec<DocAddress>,
}

type Entry = (Option<Vec<u8>>, DocAddress);

pub struct TopFieldCollector {
    column: String,
    limit: usize,
    descending: bool,
}

impl TopFieldCollector {
    pub fn new(column: impl Into<String>, limit: usize, descending: bool) -> Self {
        TopFieldCollector {
            column: column.into(),
            limit,
            descending,
        }
    }

    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        let by_key = match (&a.0, &b.0) {
            (Some(x), Some(y)) => {
                if self.descending {
                    y.cmp(x)
                } else {
                    x.cmp(y)
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_key.then_with(|| {
            (a.1.segment_ord, a.1.doc_id).cmp(&(b.1.segment_ord, b.1.doc_id))
        })
    }
}

impl Collector for TopFieldCollector {
    type Fruit = TopFieldDocs;
    type Child = TopFieldSegmentCollector;

    fn for_segment(
        &self,
        segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let column = segment.fast_fields().str(&self.column)?;
        Ok(TopFieldSegmentCollector {
            column,
            segment_ord: segment_local_id,
            entries: Vec::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<Vec<Entry>>,
    ) -> tantivy::Result<Self::Fruit> {
        let total = segment_fruits.iter().map(Vec::len).sum();
        let mut entries: Vec<Entry> = segment_fruits.into_iter().flatten().collect();
        entries.sort_by(|a, b| self.compare(a, b));
        entries.truncate(self.limit);
        Ok(TopFieldDocs {
            total,
            hits: entries.into_iter().map(|(_, addr)| addr).collect(),
        })
    }
}

pub struct TopFieldSegmentCollector {
    column: Option<StrColumn>,
    segment_ord: SegmentOrdinal,
    entries: Vec<Entry>,
}

impl SegmentCollector for TopFieldSegmentCollector {
    type Fruit = Vec<Entry>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        let key = self.column.as_ref().and_then(|column| {
            let ord = column.term_ords(doc).next()?;
            let mut bytes = Vec::new();
            match column.ord_to_bytes(ord, &mut bytes) {
                Ok(true) => Some(bytes),
                _ => None,
            }
        });
        self.entries.push((
            key,
            DocAddress {
                segment_ord: self.segment_ord,
                doc_id: doc,
            },
        ));
    }

    fn harvest(self) -> Self::Fruit {
        self.entries
    }
}
