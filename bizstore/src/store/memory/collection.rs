use crate::collection::Document;
use crate::common::{Value, DOC_ID};
use crate::errors::{BizError, BizResult, ErrorKind};
use crate::store::{ensure_id, Filter, FindOptions};
use std::collections::BTreeMap;

/// Documents of one in-memory collection.
///
/// Documents are keyed by an insertion sequence number, so iteration order
/// is insertion order. `primary` maps `_id` to that number and each unique
/// index maps a field value to it. Missing and null values are not indexed.
///
/// A dropped collection is detached from its store and must not be written.
#[derive(Default)]
pub(crate) struct MemoryCollection {
    next_seq: u64,
    documents: BTreeMap<u64, Document>,
    primary: BTreeMap<Value, u64>,
    unique: BTreeMap<String, BTreeMap<Value, u64>>,
    dropped: bool,
}

impl MemoryCollection {
    pub(crate) fn new() -> Self {
        MemoryCollection::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub(crate) fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    /// True until the first document or unique index lands.
    pub(crate) fn is_pristine(&self) -> bool {
        self.next_seq == 0 && self.unique.is_empty()
    }

    pub(crate) fn insert(&mut self, mut document: Document) -> BizResult<Value> {
        let id = ensure_id(&mut document)?;
        if self.primary.contains_key(&id) {
            return Err(duplicate(DOC_ID, &id));
        }
        self.check_unique(&document, None)?;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.primary.insert(id.clone(), seq);
        self.index_unique(&document, seq);
        self.documents.insert(seq, document);
        Ok(id)
    }

    pub(crate) fn find(&self, filter: &Filter, options: &FindOptions) -> Vec<Document> {
        if let Some(id) = filter.id_value() {
            let hit = self
                .primary
                .get(id)
                .and_then(|seq| self.documents.get(seq))
                .filter(|doc| filter.matches(doc))
                .cloned();
            return options.paginate(hit.into_iter());
        }

        options.paginate(
            self.documents
                .values()
                .filter(|doc| filter.matches(doc))
                .cloned(),
        )
    }

    pub(crate) fn find_first(&self, filter: &Filter) -> Option<(u64, Document)> {
        if let Some(id) = filter.id_value() {
            return self.primary.get(id).and_then(|seq| {
                self.documents
                    .get(seq)
                    .filter(|doc| filter.matches(doc))
                    .map(|doc| (*seq, doc.clone()))
            });
        }

        self.documents
            .iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(seq, doc)| (*seq, doc.clone()))
    }

    /// Replaces the document stored under `seq`. The `_id` must not change.
    pub(crate) fn replace(&mut self, seq: u64, document: Document) -> BizResult<()> {
        self.check_unique(&document, Some(seq))?;
        if let Some(previous) = self.documents.get(&seq).cloned() {
            self.unindex_unique(&previous);
        }
        self.index_unique(&document, seq);
        self.documents.insert(seq, document);
        Ok(())
    }

    pub(crate) fn remove(&mut self, seq: u64) -> Option<Document> {
        let document = self.documents.remove(&seq)?;
        if let Some(id) = document.id() {
            self.primary.remove(id);
        }
        self.unindex_unique(&document);
        Some(document)
    }

    pub(crate) fn create_unique_index(&mut self, field: &str) -> BizResult<()> {
        if self.unique.contains_key(field) {
            return Ok(());
        }

        let mut index = BTreeMap::new();
        for (seq, document) in &self.documents {
            let value = document.get(field);
            if value.is_null() {
                continue;
            }
            if index.insert(value.clone(), *seq).is_some() {
                return Err(duplicate(field, &value));
            }
        }
        self.unique.insert(field.to_string(), index);
        Ok(())
    }

    fn check_unique(&self, document: &Document, own_seq: Option<u64>) -> BizResult<()> {
        for (field, index) in &self.unique {
            let value = document.get(field);
            if value.is_null() {
                continue;
            }
            if let Some(seq) = index.get(&value) {
                if Some(*seq) != own_seq {
                    return Err(duplicate(field, &value));
                }
            }
        }
        Ok(())
    }

    fn index_unique(&mut self, document: &Document, seq: u64) {
        for (field, index) in self.unique.iter_mut() {
            let value = document.get(field);
            if !value.is_null() {
                index.insert(value, seq);
            }
        }
    }

    fn unindex_unique(&mut self, document: &Document) {
        for (field, index) in self.unique.iter_mut() {
            let value = document.get(field);
            if !value.is_null() {
                index.remove(&value);
            }
        }
    }
}

fn duplicate(field: &str, value: &Value) -> BizError {
    log::error!("Duplicate value {:?} for unique field '{}'", value, field);
    BizError::new(
        &format!("Duplicate value for unique field '{}'", field),
        ErrorKind::UniqueConstraintViolation,
    )
}
