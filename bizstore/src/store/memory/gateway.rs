use super::collection::MemoryCollection;
use super::InMemoryGatewayConfig;
use crate::collection::Document;
use crate::common::{atomic, Atomic, ReadExecutor, Value, WriteExecutor};
use crate::context::Context;
use crate::errors::{BizError, BizResult, ErrorKind};
use crate::store::{
    upsert_document, Filter, FindOptions, ReturnDocument, StoreGatewayProvider, Update,
    UpdateOptions,
};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Backing stores shared by name across gateways.
static SHARED_STORES: Lazy<DashMap<String, Arc<MemoryBacking>>> = Lazy::new(DashMap::new);

#[derive(Default)]
struct MemoryBacking {
    collections: DashMap<String, Atomic<MemoryCollection>>,
}

/// In-memory store gateway.
///
/// Every collection sits behind its own `RwLock`. Reads take the read lock;
/// every mutation, including the whole match-update-insert sequence of
/// `find_one_and_update`, runs under the write lock, so it is atomic with
/// respect to all other operations on that collection. Dropping a collection
/// takes the same lock.
///
/// Gateways configured with the same store name share their collections.
/// Closing one of them does not affect the others.
#[derive(Clone)]
pub struct InMemoryGateway {
    inner: Arc<InMemoryGatewayInner>,
}

impl InMemoryGateway {
    pub fn new(config: InMemoryGatewayConfig) -> InMemoryGateway {
        InMemoryGateway {
            inner: Arc::new(InMemoryGatewayInner::new(config)),
        }
    }

    /// Forgets the shared backing store registered under `name`. Gateways
    /// already open on it keep working on the detached data.
    pub fn release_shared(name: &str) {
        SHARED_STORES.remove(name);
    }
}

impl StoreGatewayProvider for InMemoryGateway {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> BizResult<Value> {
        self.inner.insert_one(ctx, collection, document)
    }

    fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> BizResult<Vec<Document>> {
        self.inner.find(ctx, collection, filter, options)
    }

    fn find_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<Option<Document>> {
        self.inner.find_one(ctx, collection, filter)
    }

    fn find_one_and_update(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: &UpdateOptions,
    ) -> BizResult<Option<Document>> {
        self.inner
            .find_one_and_update(ctx, collection, filter, update, options)
    }

    fn delete_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<u64> {
        self.inner.delete_one(ctx, collection, filter)
    }

    fn create_unique_index(&self, ctx: &Context, collection: &str, field: &str) -> BizResult<()> {
        self.inner.create_unique_index(ctx, collection, field)
    }

    fn drop_collection(&self, ctx: &Context, collection: &str) -> BizResult<()> {
        self.inner.drop_collection(ctx, collection)
    }

    fn list_collection_names(&self, ctx: &Context) -> BizResult<Vec<String>> {
        self.inner.list_collection_names(ctx)
    }

    fn close(&self) -> BizResult<()> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

struct InMemoryGatewayInner {
    config: InMemoryGatewayConfig,
    backing: Arc<MemoryBacking>,
    closed: AtomicBool,
}

impl InMemoryGatewayInner {
    fn new(config: InMemoryGatewayConfig) -> InMemoryGatewayInner {
        let name = config.store_name();
        let backing = if name.is_empty() {
            Arc::new(MemoryBacking::default())
        } else {
            SHARED_STORES
                .entry(name.clone())
                .or_insert_with(|| Arc::new(MemoryBacking::default()))
                .clone()
        };
        log::debug!("Opened in-memory gateway '{}'", name);

        InMemoryGatewayInner {
            config,
            backing,
            closed: AtomicBool::new(false),
        }
    }

    fn name(&self) -> String {
        let name = self.config.store_name();
        if name.is_empty() {
            "mem".to_string()
        } else {
            format!("mem://{}", name)
        }
    }

    fn ensure_open(&self) -> BizResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("In-memory gateway {} is closed", self.name());
            return Err(BizError::new(
                "Store gateway is closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }

    /// Returns the collection, creating it when `create` is set.
    fn collection(&self, name: &str, create: bool) -> Option<Atomic<MemoryCollection>> {
        if let Some(collection) = self.backing.collections.get(name) {
            return Some(collection.value().clone());
        }
        if !create {
            return None;
        }
        let collection = self
            .backing
            .collections
            .entry(name.to_string())
            .or_insert_with(|| atomic(MemoryCollection::new()))
            .value()
            .clone();
        Some(collection)
    }

    /// Runs `mutation` under the write lock of collection `name`.
    ///
    /// Returns `None` when the collection does not exist and `create` is not
    /// set. A collection dropped while the caller waited for its lock is
    /// looked up again, so a write never lands on a detached collection. A
    /// collection created for a mutation that then fails is removed again.
    fn write_collection<R>(
        &self,
        ctx: &Context,
        name: &str,
        create: bool,
        mut mutation: impl FnMut(&mut MemoryCollection) -> BizResult<R>,
    ) -> BizResult<Option<R>> {
        loop {
            let target = match self.collection(name, false) {
                Some(target) => target,
                None if create => {
                    ctx.check()?;
                    match self.collection(name, true) {
                        Some(target) => target,
                        None => return Err(missing(name)),
                    }
                }
                None => return Ok(None),
            };

            let outcome = target.write_with(|coll| {
                if coll.is_dropped() {
                    return None;
                }
                let result = mutation(coll);
                if result.is_err() && coll.is_pristine() {
                    self.detach(name, &target, coll);
                }
                Some(result)
            });
            match outcome {
                Some(result) => return result.map(Some),
                None => log::debug!("Collection '{}' was dropped, looking it up again", name),
            }
        }
    }

    /// Removes `target` from the store. Called under its write lock.
    fn detach(&self, name: &str, target: &Atomic<MemoryCollection>, coll: &mut MemoryCollection) {
        coll.mark_dropped();
        self.backing
            .collections
            .remove_if(name, |_, current| Arc::ptr_eq(current, target));
    }

    /// Last step of every mutation: optional stall, then the deadline check.
    fn before_mutation(&self, ctx: &Context) -> BizResult<()> {
        if let Some(latency) = self.config.write_latency() {
            thread::sleep(latency);
        }
        ctx.check()
    }

    fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> BizResult<Value> {
        self.ensure_open()?;
        self.write_collection(ctx, collection, true, |coll| {
            self.before_mutation(ctx)?;
            coll.insert(document.clone())
        })?
        .ok_or_else(|| missing(collection))
    }

    fn find(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> BizResult<Vec<Document>> {
        self.ensure_open()?;
        ctx.check()?;
        match self.collection(collection, false) {
            Some(target) => Ok(target.read_with(|coll| coll.find(filter, options))),
            None => Ok(Vec::new()),
        }
    }

    fn find_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<Option<Document>> {
        self.ensure_open()?;
        ctx.check()?;
        match self.collection(collection, false) {
            Some(target) => Ok(target.read_with(|coll| coll.find_first(filter).map(|(_, doc)| doc))),
            None => Ok(None),
        }
    }

    fn find_one_and_update(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: &UpdateOptions,
    ) -> BizResult<Option<Document>> {
        self.ensure_open()?;
        let updated = self.write_collection(ctx, collection, options.is_upsert(), |coll| {
            match coll.find_first(filter) {
                Some((seq, before)) => {
                    let mut after = before.clone();
                    update.apply(&mut after, false)?;
                    self.before_mutation(ctx)?;
                    coll.replace(seq, after.clone())?;
                    Ok(Some(match options.return_document() {
                        ReturnDocument::Before => before,
                        ReturnDocument::After => after,
                    }))
                }
                None if options.is_upsert() => {
                    let inserted = upsert_document(filter, update)?;
                    self.before_mutation(ctx)?;
                    coll.insert(inserted.clone())?;
                    Ok(match options.return_document() {
                        ReturnDocument::Before => None,
                        ReturnDocument::After => Some(inserted),
                    })
                }
                None => {
                    ctx.check()?;
                    Ok(None)
                }
            }
        })?;
        match updated {
            Some(result) => Ok(result),
            None => {
                ctx.check()?;
                Ok(None)
            }
        }
    }

    fn delete_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<u64> {
        self.ensure_open()?;
        let deleted = self.write_collection(ctx, collection, false, |coll| {
            let Some((seq, _)) = coll.find_first(filter) else {
                return Ok(0);
            };
            self.before_mutation(ctx)?;
            Ok(coll.remove(seq).map(|_| 1).unwrap_or(0))
        })?;
        match deleted {
            Some(count) => Ok(count),
            None => {
                ctx.check()?;
                Ok(0)
            }
        }
    }

    fn create_unique_index(&self, ctx: &Context, collection: &str, field: &str) -> BizResult<()> {
        self.ensure_open()?;
        self.write_collection(ctx, collection, true, |coll| {
            self.before_mutation(ctx)?;
            coll.create_unique_index(field)
        })?
        .ok_or_else(|| missing(collection))
    }

    /// A write holding the collection lock completes before the drop; one
    /// waiting for it goes to a fresh collection.
    fn drop_collection(&self, ctx: &Context, collection: &str) -> BizResult<()> {
        self.ensure_open()?;
        ctx.check()?;
        let Some(target) = self.collection(collection, false) else {
            return Ok(());
        };
        target.write_with(|coll| {
            ctx.check()?;
            if !coll.is_dropped() {
                self.detach(collection, &target, coll);
                log::info!("Dropped collection '{}' from {}", collection, self.name());
            }
            Ok(())
        })
    }

    fn list_collection_names(&self, ctx: &Context) -> BizResult<Vec<String>> {
        self.ensure_open()?;
        ctx.check()?;
        let mut names: Vec<String> = self
            .backing
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn close(&self) -> BizResult<()> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            log::debug!("Closed in-memory gateway {}", self.name());
        }
        Ok(())
    }
}

fn missing(collection: &str) -> BizError {
    log::error!("Collection '{}' could not be opened", collection);
    BizError::new(
        &format!("Collection '{}' could not be opened", collection),
        ErrorKind::InternalError,
    )
}
