use crate::collection::{Document, ObjectId};
use crate::common::{Value, DOC_ID};
use crate::context::Context;
use crate::errors::BizResult;
use crate::store::{Filter, FindOptions, Update, UpdateOptions};
use std::ops::Deref;
use std::sync::Arc;

/// Contract every document store backend implements.
///
/// Each operation takes the caller's [Context]. Implementations check the
/// deadline inside their critical section immediately before mutating, so a
/// call that fails with a transient error has applied nothing.
///
/// # Atomicity
///
/// `find_one_and_update` is an atomic read-modify-write on one document: no
/// other operation on the same collection observes or interleaves with the
/// match, the update and, for an upsert, the insert. This is the only
/// primitive the sequence allocator relies on.
pub trait StoreGatewayProvider: Send + Sync {
    /// Name of the backing store, for diagnostics.
    fn name(&self) -> String;

    /// Inserts `document`, assigning an [ObjectId] `_id` when it has none.
    /// Returns the `_id` of the stored document.
    ///
    /// Fails with `UniqueConstraintViolation` on a duplicate `_id` or a
    /// duplicate value of a uniquely indexed field.
    fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> BizResult<Value>;

    /// Returns the matching documents in insertion order, paginated.
    fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> BizResult<Vec<Document>>;

    /// Returns the first matching document in insertion order.
    fn find_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<Option<Document>>;

    /// Atomically updates the first matching document.
    ///
    /// When nothing matches and `options` requests an upsert, a new document
    /// is seeded from the filter's equality fields and `$setOnInsert`, the
    /// update is applied to it and it is inserted, all in the same atomic
    /// step. Returns the image selected by `options`, or `None` when nothing
    /// matched and no upsert took place.
    fn find_one_and_update(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: &UpdateOptions,
    ) -> BizResult<Option<Document>>;

    /// Deletes the first matching document; returns how many were deleted.
    fn delete_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<u64>;

    /// Declares `field` unique within `collection`. Creating an index that
    /// already exists is a no-op; existing duplicates fail the call.
    fn create_unique_index(&self, ctx: &Context, collection: &str, field: &str) -> BizResult<()>;

    /// Removes `collection` with all its documents and indexes.
    fn drop_collection(&self, ctx: &Context, collection: &str) -> BizResult<()>;

    fn list_collection_names(&self, ctx: &Context) -> BizResult<Vec<String>>;

    /// Closes the gateway. Every later call fails with `StoreAlreadyClosed`.
    fn close(&self) -> BizResult<()>;

    fn is_closed(&self) -> bool;
}

/// Cheap-to-clone handle to a [StoreGatewayProvider].
///
/// ```text
/// let gateway = StoreGateway::new(InMemoryGateway::new(InMemoryGatewayConfig::default()));
/// let ctx = Context::background();
/// gateway.insert_one(&ctx, "talk_info", doc! { Title: "hello" })?;
/// ```
#[derive(Clone)]
pub struct StoreGateway {
    inner: Arc<dyn StoreGatewayProvider>,
}

impl StoreGateway {
    pub fn new<T: StoreGatewayProvider + 'static>(inner: T) -> Self {
        StoreGateway {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for StoreGateway {
    type Target = Arc<dyn StoreGatewayProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Ensures `document` carries an `_id`, generating an [ObjectId] if needed.
pub fn ensure_id(document: &mut Document) -> BizResult<Value> {
    match document.id() {
        Some(id) if !id.is_null() => Ok(id.clone()),
        _ => {
            let id = Value::ObjectId(ObjectId::new());
            document.put(DOC_ID, id.clone())?;
            Ok(id)
        }
    }
}

/// Builds the document an upsert inserts when `filter` matched nothing.
pub fn upsert_document(filter: &Filter, update: &Update) -> BizResult<Document> {
    let mut document = Document::new();
    for (field, value) in filter.equality_fields() {
        document.put(field, value)?;
    }
    update.apply(&mut document, true)?;
    ensure_id(&mut document)?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::store::{and, by_id, field};

    #[test]
    fn ensure_id_keeps_existing() {
        let mut doc = doc! { _id: 7u64 };
        assert_eq!(ensure_id(&mut doc).unwrap(), Value::U64(7));
    }

    #[test]
    fn ensure_id_generates_object_id() {
        let mut doc = doc! { Title: "t" };
        let id = ensure_id(&mut doc).unwrap();
        assert!(id.as_object_id().is_some());
        assert_eq!(doc.id(), Some(&id));
    }

    #[test]
    fn upsert_document_seeds_from_filter_and_set_on_insert() {
        let filter = by_id("users");
        let update = Update::new().inc("value", 1).set_on_insert("value", 0u64);
        let doc = upsert_document(&filter, &update).unwrap();
        assert_eq!(doc.get("_id"), Value::from("users"));
        assert_eq!(doc.get("value"), Value::U64(1));
    }

    #[test]
    fn upsert_document_ignores_non_equality_clauses() {
        let filter = and(vec![field("a").eq(1i64), field("b").is_in(vec![2i64, 3i64])]);
        let doc = upsert_document(&filter, &Update::new()).unwrap();
        assert_eq!(doc.get("a"), Value::I64(1));
        assert!(!doc.contains_key("b"));
        assert!(doc.has_id());
    }
}
