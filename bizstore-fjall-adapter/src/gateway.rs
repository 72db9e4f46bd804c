use crate::config::FjallConfig;
use crate::version::fjall_version;
use crate::wrapper::{
    decode_document, decode_name, decode_seq, encode_document, encode_key, encode_name,
    encode_seq, to_biz_error, to_commit_error,
};
use bizstore::collection::Document;
use bizstore::common::{LockRegistry, Value, DOC_ID};
use bizstore::context::Context;
use bizstore::errors::{BizError, BizResult, ErrorKind};
use bizstore::store::{
    ensure_id, upsert_document, Filter, FindOptions, ReturnDocument, StoreGatewayProvider, Update,
    UpdateOptions,
};
use dashmap::DashMap;
use fjall::{Batch, Keyspace, PartitionHandle, PersistMode};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const META_PARTITION: &str = "meta";
const MAX_PARTITION_NAME_LEN: usize = 255;
const MARKER: &[u8] = &[1];

/// Store gateway over a fjall keyspace.
///
/// Each collection is kept in three kinds of partition:
///
/// | partition | key | value |
/// |---|---|---|
/// | `d#<collection>` | insertion sequence (8 bytes, big-endian) | bincode document |
/// | `i#<collection>` | encoded `_id` | insertion sequence |
/// | `u#<collection>#<field>` | encoded field value | insertion sequence |
///
/// The `meta` partition records, per collection, the next insertion
/// sequence (`c#<collection>`) and each unique index (`u#<collection>#<field>`).
/// Names are escaped with `encode_name`, so `#` only ever separates parts.
///
/// Writes to one collection are serialized by a per-collection lock. Every
/// mutation is a single batch committed with `PersistMode::SyncAll`
/// durability, so an acknowledged write survives a crash and a call that
/// fails before the commit leaves nothing behind. A failing commit has an
/// unknown outcome and is reported as a non-transient `BackendError`.
#[derive(Clone)]
pub struct FjallGateway {
    inner: Arc<FjallGatewayInner>,
}

impl FjallGateway {
    /// Opens (or creates) the keyspace at the configured path.
    pub fn open(config: FjallConfig) -> BizResult<FjallGateway> {
        let inner = FjallGatewayInner::open(config)?;
        Ok(FjallGateway {
            inner: Arc::new(inner),
        })
    }

    pub fn db_path(&self) -> String {
        self.inner.config.db_path()
    }
}

impl StoreGatewayProvider for FjallGateway {
    fn name(&self) -> String {
        format!("fjall://{}", self.inner.config.db_path())
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
        self.inner.ensure_open()?;
        ctx.check()?;
        Ok(self.inner.find_first(collection, filter)?.map(|(_, doc)| doc))
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

/// What the `meta` partition knows about one collection.
#[derive(Default)]
struct CollectionState {
    next_seq: u64,
    unique_fields: Vec<String>,
}

/// Index entries a document occupies, resolved against open partitions.
type IndexEntries = Vec<(PartitionHandle, Vec<u8>)>;

struct FjallGatewayInner {
    config: FjallConfig,
    keyspace: RwLock<Option<Keyspace>>,
    partitions: DashMap<String, PartitionHandle>,
    locks: LockRegistry,
    closed: AtomicBool,
}

impl FjallGatewayInner {
    fn open(config: FjallConfig) -> BizResult<FjallGatewayInner> {
        if config.db_path().is_empty() {
            log::error!("Fjall gateway needs a database path");
            return Err(BizError::new(
                "Fjall gateway needs a database path",
                ErrorKind::Configuration,
            ));
        }

        let keyspace = Keyspace::open(config.keyspace_config()).map_err(|err| {
            log::error!("Failed to open fjall keyspace at {}: {}", config.db_path(), err);
            to_biz_error(err)
        })?;
        log::info!(
            "Opened fjall/{} keyspace at {}",
            fjall_version().unwrap_or_else(|_| "unknown".to_string()),
            config.db_path()
        );

        Ok(FjallGatewayInner {
            config,
            keyspace: RwLock::new(Some(keyspace)),
            partitions: DashMap::new(),
            locks: LockRegistry::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> BizResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Fjall gateway {} is closed", self.config.db_path());
            return Err(BizError::new(
                "Store gateway is closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }

    fn keyspace(&self) -> BizResult<Keyspace> {
        self.ensure_open()?;
        match self.keyspace.read().as_ref() {
            Some(keyspace) => Ok(keyspace.clone()),
            None => Err(BizError::new(
                "Store gateway is closed",
                ErrorKind::StoreAlreadyClosed,
            )),
        }
    }

    /// Opens a partition, creating it if needed.
    fn partition(&self, name: &str) -> BizResult<PartitionHandle> {
        if let Some(partition) = self.partitions.get(name) {
            return Ok(partition.clone());
        }
        if name.len() > MAX_PARTITION_NAME_LEN {
            log::error!("Partition name {} is too long", name);
            return Err(BizError::new(
                &format!("Collection or field name too long for fjall: {}", name),
                ErrorKind::InvalidArgument,
            ));
        }

        let keyspace = self.keyspace()?;
        let partition = keyspace
            .open_partition(name, self.config.partition_config())
            .map_err(|err| {
                log::error!("Failed to open partition {}: {}", name, err);
                to_biz_error(err)
            })?;
        self.partitions.insert(name.to_string(), partition.clone());
        Ok(partition)
    }

    /// Opens a partition only if it already exists.
    fn existing_partition(&self, name: &str) -> BizResult<Option<PartitionHandle>> {
        if let Some(partition) = self.partitions.get(name) {
            return Ok(Some(partition.clone()));
        }
        if name.len() > MAX_PARTITION_NAME_LEN || !self.keyspace()?.partition_exists(name) {
            return Ok(None);
        }
        self.partition(name).map(Some)
    }

    fn load_state(&self, collection: &str) -> BizResult<Option<CollectionState>> {
        let meta = self.partition(META_PARTITION)?;
        let Some(next_seq) = meta
            .get(collection_key(collection))
            .map_err(to_biz_error)?
        else {
            return Ok(None);
        };

        let mut unique_fields = Vec::new();
        let prefix = unique_prefix(collection);
        for item in meta.prefix(&prefix) {
            let (key, _) = item.map_err(to_biz_error)?;
            let field = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            unique_fields.push(decode_name(&field)?);
        }

        Ok(Some(CollectionState {
            next_seq: decode_seq(&next_seq)?,
            unique_fields,
        }))
    }

    fn lookup_id(&self, collection: &str, id: &Value) -> BizResult<Option<(u64, Document)>> {
        let Some(ids) = self.existing_partition(&id_partition(collection))? else {
            return Ok(None);
        };
        let Some(seq) = ids.get(encode_key(id)?).map_err(to_biz_error)? else {
            return Ok(None);
        };
        let seq = decode_seq(&seq)?;

        let Some(data) = self.existing_partition(&data_partition(collection))? else {
            return Ok(None);
        };
        match data.get(encode_seq(seq)).map_err(to_biz_error)? {
            Some(bytes) => Ok(Some((seq, decode_document(&bytes)?))),
            None => Ok(None),
        }
    }

    /// Every document of the collection in insertion order.
    fn scan(&self, collection: &str) -> BizResult<Vec<(u64, Document)>> {
        let Some(data) = self.existing_partition(&data_partition(collection))? else {
            return Ok(Vec::new());
        };
        let mut documents = Vec::new();
        for item in data.iter() {
            let (key, value) = item.map_err(to_biz_error)?;
            documents.push((decode_seq(&key)?, decode_document(&value)?));
        }
        Ok(documents)
    }

    fn find_first(&self, collection: &str, filter: &Filter) -> BizResult<Option<(u64, Document)>> {
        if let Some(id) = filter.id_value() {
            return Ok(self
                .lookup_id(collection, id)?
                .filter(|(_, doc)| filter.matches(doc)));
        }
        Ok(self
            .scan(collection)?
            .into_iter()
            .find(|(_, doc)| filter.matches(doc)))
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
        if filter.id_value().is_some() {
            let hit = self.find_first(collection, filter)?.map(|(_, doc)| doc);
            return Ok(options.paginate(hit.into_iter()));
        }
        let matches = self
            .scan(collection)?
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc));
        Ok(options.paginate(matches))
    }

    /// Resolves the unique index entries of `document`, failing on a value
    /// already held by another document.
    fn unique_entries(
        &self,
        collection: &str,
        state: &CollectionState,
        document: &Document,
        own_seq: Option<u64>,
    ) -> BizResult<IndexEntries> {
        let mut entries = Vec::new();
        for field in &state.unique_fields {
            let value = document.get(field);
            if value.is_null() {
                continue;
            }
            let partition = self.partition(&unique_partition(collection, field))?;
            let key = encode_key(&value)?;
            if let Some(holder) = partition.get(&key).map_err(to_biz_error)? {
                if Some(decode_seq(&holder)?) != own_seq {
                    return Err(duplicate(field, &value));
                }
            }
            entries.push((partition, key));
        }
        Ok(entries)
    }

    /// Commits `batch` with the journal sync as part of the commit, so the
    /// batch becomes visible only once it is on disk.
    fn commit(&self, batch: Batch) -> BizResult<()> {
        batch
            .durability(Some(PersistMode::SyncAll))
            .commit()
            .map_err(|err| {
                log::error!("Failed to commit batch to {}: {}", self.config.db_path(), err);
                to_commit_error(err)
            })
    }

    /// Inserts `document`; the caller holds the collection lock.
    fn insert_locked(
        &self,
        ctx: &Context,
        collection: &str,
        state: &CollectionState,
        mut document: Document,
    ) -> BizResult<Value> {
        let keyspace = self.keyspace()?;
        let id = ensure_id(&mut document)?;
        let ids = self.partition(&id_partition(collection))?;
        let id_key = encode_key(&id)?;
        if ids.contains_key(&id_key).map_err(to_biz_error)? {
            return Err(duplicate(DOC_ID, &id));
        }
        let entries = self.unique_entries(collection, state, &document, None)?;
        let data = self.partition(&data_partition(collection))?;
        let meta = self.partition(META_PARTITION)?;
        let bytes = encode_document(&document)?;
        let seq = state.next_seq;
        let seq_bytes = encode_seq(seq).to_vec();

        ctx.check()?;
        let mut batch = keyspace.batch();
        batch.insert(&data, seq_bytes.clone(), bytes);
        batch.insert(&ids, id_key, seq_bytes.clone());
        for (partition, key) in entries {
            batch.insert(&partition, key, seq_bytes.clone());
        }
        batch.insert(&meta, collection_key(collection), encode_seq(seq + 1).to_vec());
        self.commit(batch)?;
        Ok(id)
    }

    /// Replaces the document stored under `seq`; the caller holds the
    /// collection lock.
    fn replace_locked(
        &self,
        ctx: &Context,
        collection: &str,
        state: &CollectionState,
        seq: u64,
        before: &Document,
        after: &Document,
    ) -> BizResult<()> {
        let keyspace = self.keyspace()?;
        let entries = self.unique_entries(collection, state, after, Some(seq))?;
        let mut stale = Vec::new();
        for field in &state.unique_fields {
            let old = before.get(field);
            if old.is_null() {
                continue;
            }
            let old_key = encode_key(&old)?;
            if old_key != encode_key(&after.get(field))? {
                stale.push((self.partition(&unique_partition(collection, field))?, old_key));
            }
        }
        let data = self.partition(&data_partition(collection))?;
        let bytes = encode_document(after)?;
        let seq_bytes = encode_seq(seq).to_vec();

        ctx.check()?;
        let mut batch = keyspace.batch();
        for (partition, key) in stale {
            batch.remove(&partition, key);
        }
        for (partition, key) in entries {
            batch.insert(&partition, key, seq_bytes.clone());
        }
        batch.insert(&data, seq_bytes, bytes);
        self.commit(batch)
    }

    fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> BizResult<Value> {
        self.ensure_open()?;
        let lock = self.locks.get_lock(collection);
        let _guard = lock.lock();

        let state = self.load_state(collection)?.unwrap_or_default();
        self.insert_locked(ctx, collection, &state, document)
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
        let lock = self.locks.get_lock(collection);
        let _guard = lock.lock();

        let state = self.load_state(collection)?;
        let matched = match state {
            Some(_) => self.find_first(collection, filter)?,
            None => None,
        };
        let state = state.unwrap_or_default();

        match matched {
            Some((seq, before)) => {
                let mut after = before.clone();
                update.apply(&mut after, false)?;
                self.replace_locked(ctx, collection, &state, seq, &before, &after)?;
                Ok(Some(match options.return_document() {
                    ReturnDocument::Before => before,
                    ReturnDocument::After => after,
                }))
            }
            None if options.is_upsert() => {
                let inserted = upsert_document(filter, update)?;
                self.insert_locked(ctx, collection, &state, inserted.clone())?;
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
    }

    fn delete_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<u64> {
        self.ensure_open()?;
        let lock = self.locks.get_lock(collection);
        let _guard = lock.lock();

        let Some(state) = self.load_state(collection)? else {
            ctx.check()?;
            return Ok(0);
        };
        let Some((seq, document)) = self.find_first(collection, filter)? else {
            ctx.check()?;
            return Ok(0);
        };

        let keyspace = self.keyspace()?;
        let data = self.partition(&data_partition(collection))?;
        let ids = self.partition(&id_partition(collection))?;
        let mut stale = Vec::new();
        for field in &state.unique_fields {
            let value = document.get(field);
            if !value.is_null() {
                stale.push((self.partition(&unique_partition(collection, field))?, encode_key(&value)?));
            }
        }
        let id_key = match document.id() {
            Some(id) => Some(encode_key(id)?),
            None => None,
        };

        ctx.check()?;
        let mut batch = keyspace.batch();
        batch.remove(&data, encode_seq(seq).to_vec());
        if let Some(id_key) = id_key {
            batch.remove(&ids, id_key);
        }
        for (partition, key) in stale {
            batch.remove(&partition, key);
        }
        self.commit(batch)?;
        Ok(1)
    }

    fn create_unique_index(&self, ctx: &Context, collection: &str, field: &str) -> BizResult<()> {
        self.ensure_open()?;
        if field.is_empty() {
            log::error!("Unique index on {} needs a field name", collection);
            return Err(BizError::new(
                "Unique index needs a field name",
                ErrorKind::InvalidArgument,
            ));
        }
        let lock = self.locks.get_lock(collection);
        let _guard = lock.lock();

        let state = self.load_state(collection)?;
        if let Some(state) = &state {
            if state.unique_fields.iter().any(|f| f == field) {
                return Ok(());
            }
        }

        let keyspace = self.keyspace()?;
        let index = self.partition(&unique_partition(collection, field))?;
        let meta = self.partition(META_PARTITION)?;
        let mut entries: Vec<(Vec<u8>, u64)> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for (seq, document) in self.scan(collection)? {
            let value = document.get(field);
            if value.is_null() {
                continue;
            }
            let key = encode_key(&value)?;
            if !seen.insert(key.clone()) {
                return Err(duplicate(field, &value));
            }
            entries.push((key, seq));
        }

        ctx.check()?;
        let mut batch = keyspace.batch();
        for (key, seq) in entries {
            batch.insert(&index, key, encode_seq(seq).to_vec());
        }
        if state.is_none() {
            batch.insert(&meta, collection_key(collection), encode_seq(0).to_vec());
        }
        batch.insert(&meta, unique_key(collection, field), MARKER.to_vec());
        self.commit(batch)?;
        log::debug!("Created unique index {}.{}", collection, field);
        Ok(())
    }

    fn drop_collection(&self, ctx: &Context, collection: &str) -> BizResult<()> {
        self.ensure_open()?;
        let lock = self.locks.get_lock(collection);
        let _guard = lock.lock();

        let Some(state) = self.load_state(collection)? else {
            ctx.check()?;
            return Ok(());
        };
        ctx.check()?;

        let keyspace = self.keyspace()?;
        let mut names = vec![data_partition(collection), id_partition(collection)];
        names.extend(
            state
                .unique_fields
                .iter()
                .map(|field| unique_partition(collection, field)),
        );

        // one batch, so a crash never leaves a half-dropped collection
        let mut batch = keyspace.batch();
        for name in names {
            if let Some(partition) = self.existing_partition(&name)? {
                for item in partition.iter() {
                    let (key, _) = item.map_err(to_biz_error)?;
                    batch.remove(&partition, key);
                }
            }
        }
        let meta = self.partition(META_PARTITION)?;
        batch.remove(&meta, collection_key(collection));
        for field in &state.unique_fields {
            batch.remove(&meta, unique_key(collection, field));
        }
        self.commit(batch)?;
        log::info!("Dropped collection '{}' from {}", collection, self.config.db_path());
        Ok(())
    }

    fn list_collection_names(&self, ctx: &Context) -> BizResult<Vec<String>> {
        self.ensure_open()?;
        ctx.check()?;
        let meta = self.partition(META_PARTITION)?;
        let mut names = Vec::new();
        for item in meta.prefix(COLLECTION_PREFIX) {
            let (key, _) = item.map_err(to_biz_error)?;
            let name = String::from_utf8_lossy(&key[COLLECTION_PREFIX.len()..]).to_string();
            names.push(decode_name(&name)?);
        }
        names.sort();
        Ok(names)
    }

    fn close(&self) -> BizResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.partitions.clear();
        let keyspace = self.keyspace.write().take();
        if let Some(keyspace) = keyspace {
            keyspace.persist(PersistMode::SyncAll).map_err(|err| {
                log::error!("Failed to persist {} on close: {}", self.config.db_path(), err);
                to_biz_error(err)
            })?;
        }
        log::debug!("Closed fjall gateway {}", self.config.db_path());
        Ok(())
    }
}

const COLLECTION_PREFIX: &str = "c#";

fn collection_key(collection: &str) -> Vec<u8> {
    format!("{}{}", COLLECTION_PREFIX, encode_name(collection)).into_bytes()
}

fn unique_prefix(collection: &str) -> Vec<u8> {
    format!("u#{}#", encode_name(collection)).into_bytes()
}

fn unique_key(collection: &str, field: &str) -> Vec<u8> {
    let mut key = unique_prefix(collection);
    key.extend_from_slice(encode_name(field).as_bytes());
    key
}

fn data_partition(collection: &str) -> String {
    format!("d#{}", encode_name(collection))
}

fn id_partition(collection: &str) -> String {
    format!("i#{}", encode_name(collection))
}

fn unique_partition(collection: &str, field: &str) -> String {
    format!("u#{}#{}", encode_name(collection), encode_name(field))
}

fn duplicate(field: &str, value: &Value) -> BizError {
    log::error!("Duplicate value {:?} for unique field '{}'", value, field);
    BizError::new(
        &format!("Duplicate value for unique field '{}'", field),
        ErrorKind::UniqueConstraintViolation,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizstore::doc;
    use bizstore::store::{all, by_id, field, skip_by, update_only, upsert, StoreGateway};
    use std::time::{Duration, Instant};
    use std::{fs, thread};

    fn random_path() -> String {
        std::env::temp_dir()
            .join(format!("bizstore-fjall-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string()
    }

    fn open(path: &str) -> StoreGateway {
        let config = FjallConfig::new().for_path(path);
        config.set_flush_workers(1);
        config.set_compaction_workers(1);
        StoreGateway::new(FjallGateway::open(config).unwrap())
    }

    fn with_gateway(test: impl FnOnce(&StoreGateway, &str)) {
        let path = random_path();
        let gateway = open(&path);
        test(&gateway, &path);
        let _ = gateway.close();
        let _ = fs::remove_dir_all(&path);
    }

    fn counter_update() -> Update {
        Update::new().inc("value", 1).set_on_insert("value", 0u64)
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = FjallGateway::open(FjallConfig::new()).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }

    #[test]
    fn insert_and_find_in_insertion_order() {
        with_gateway(|gateway, _| {
            let ctx = Context::background();
            for id in [5u64, 1, 3] {
                gateway.insert_one(&ctx, "talk:x", doc! { _id: id, n: id }).unwrap();
            }
            let ids: Vec<_> = gateway
                .find(&ctx, "talk:x", &all(), &FindOptions::new())
                .unwrap()
                .iter()
                .map(|d| d.get("_id").as_u64().unwrap())
                .collect();
            assert_eq!(ids, vec![5, 1, 3]);

            let page = gateway.find(&ctx, "talk:x", &all(), &skip_by(1).limit(1)).unwrap();
            assert_eq!(page[0].get("_id"), Value::U64(1));

            let hit = gateway.find_one(&ctx, "talk:x", &by_id(3i64)).unwrap().unwrap();
            assert_eq!(hit.get("n"), Value::U64(3));
            assert!(gateway.find_one(&ctx, "missing", &all()).unwrap().is_none());
        });
    }

    #[test]
    fn duplicate_id_is_rejected() {
        with_gateway(|gateway, _| {
            let ctx = Context::background();
            gateway.insert_one(&ctx, "users", doc! { _id: 1u64 }).unwrap();
            let err = gateway.insert_one(&ctx, "users", doc! { _id: 1i64 }).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);
            assert_eq!(gateway.find(&ctx, "users", &all(), &FindOptions::new()).unwrap().len(), 1);
        });
    }

    #[test]
    fn upsert_counts_up() {
        with_gateway(|gateway, _| {
            let ctx = Context::background();
            for expected in 1..=3u64 {
                let after = gateway
                    .find_one_and_update(&ctx, "ids", &by_id("users"), &counter_update(), &upsert())
                    .unwrap()
                    .unwrap();
                assert_eq!(after.get("value").as_u64(), Some(expected));
            }
            let none = gateway
                .find_one_and_update(&ctx, "ids", &by_id("talks"), &counter_update(), &update_only())
                .unwrap();
            assert!(none.is_none());
            assert_eq!(gateway.list_collection_names(&ctx).unwrap(), vec!["ids".to_string()]);
        });
    }

    #[test]
    fn expired_deadline_applies_nothing() {
        with_gateway(|gateway, _| {
            let ctx = Context::background();
            gateway
                .find_one_and_update(&ctx, "ids", &by_id("users"), &counter_update(), &upsert())
                .unwrap();

            let expired = Context::with_deadline(Instant::now() - Duration::from_millis(1));
            let err = gateway
                .find_one_and_update(&expired, "ids", &by_id("users"), &counter_update(), &upsert())
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DeadlineExceeded);
            let err = gateway.insert_one(&expired, "users", doc! { _id: 9u64 }).unwrap_err();
            assert!(err.is_transient());

            let counter = gateway.find_one(&ctx, "ids", &by_id("users")).unwrap().unwrap();
            assert_eq!(counter.get("value").as_u64(), Some(1));
            assert!(gateway.find_one(&ctx, "users", &by_id(9u64)).unwrap().is_none());
        });
    }

    #[test]
    fn concurrent_upserts_are_unique() {
        with_gateway(|gateway, _| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let gateway = gateway.clone();
                    thread::spawn(move || {
                        let ctx = Context::background();
                        (0..25)
                            .map(|_| {
                                gateway
                                    .find_one_and_update(&ctx, "ids", &by_id("n"), &counter_update(), &upsert())
                                    .unwrap()
                                    .unwrap()
                                    .get("value")
                                    .as_u64()
                                    .unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            let mut values: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
            values.sort();
            assert_eq!(values, (1..=200).collect::<Vec<_>>());
        });
    }

    #[test]
    fn unique_index_tracks_updates_and_deletes() {
        with_gateway(|gateway, _| {
            let ctx = Context::background();
            gateway.insert_one(&ctx, "users", doc! { _id: 1u64, user_name: "a" }).unwrap();
            gateway.insert_one(&ctx, "users", doc! { _id: 2u64, user_name: "a" }).unwrap();
            let err = gateway.create_unique_index(&ctx, "users", "user_name").unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);

            assert_eq!(gateway.delete_one(&ctx, "users", &by_id(2u64)).unwrap(), 1);
            gateway.create_unique_index(&ctx, "users", "user_name").unwrap();
            gateway.create_unique_index(&ctx, "users", "user_name").unwrap();

            let err = gateway
                .insert_one(&ctx, "users", doc! { _id: 3u64, user_name: "a" })
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);
            gateway.insert_one(&ctx, "users", doc! { _id: 3u64 }).unwrap();

            gateway
                .find_one_and_update(
                    &ctx,
                    "users",
                    &by_id(1u64),
                    &Update::new().set("user_name", "b"),
                    &update_only(),
                )
                .unwrap();
            gateway.insert_one(&ctx, "users", doc! { _id: 4u64, user_name: "a" }).unwrap();
            let err = gateway
                .find_one_and_update(
                    &ctx,
                    "users",
                    &by_id(4u64),
                    &Update::new().set("user_name", "b"),
                    &update_only(),
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);

            assert_eq!(gateway.delete_one(&ctx, "users", &field("user_name").eq("b")).unwrap(), 1);
            assert_eq!(gateway.delete_one(&ctx, "users", &by_id(1u64)).unwrap(), 0);
            gateway.insert_one(&ctx, "users", doc! { _id: 5u64, user_name: "b" }).unwrap();
        });
    }

    #[test]
    fn drop_collection_removes_everything() {
        with_gateway(|gateway, _| {
            let ctx = Context::background();
            gateway.create_unique_index(&ctx, "users", "user_name").unwrap();
            gateway.insert_one(&ctx, "users", doc! { _id: 1u64, user_name: "a" }).unwrap();
            gateway.insert_one(&ctx, "talk_info", doc! { Title: "t" }).unwrap();

            gateway.drop_collection(&ctx, "users").unwrap();
            gateway.drop_collection(&ctx, "users").unwrap();
            assert_eq!(gateway.list_collection_names(&ctx).unwrap(), vec!["talk_info".to_string()]);
            assert!(gateway.find(&ctx, "users", &all(), &FindOptions::new()).unwrap().is_empty());

            gateway.insert_one(&ctx, "users", doc! { _id: 1u64, user_name: "a" }).unwrap();
            gateway.insert_one(&ctx, "users", doc! { _id: 2u64, user_name: "a" }).unwrap();
        });
    }

    #[test]
    fn data_survives_reopen() {
        let path = random_path();
        let ctx = Context::background();
        {
            let gateway = open(&path);
            gateway.create_unique_index(&ctx, "users", "user_name").unwrap();
            gateway.insert_one(&ctx, "users", doc! { _id: 1u64, user_name: "a" }).unwrap();
            for _ in 0..5 {
                gateway
                    .find_one_and_update(&ctx, "ids", &by_id("users"), &counter_update(), &upsert())
                    .unwrap();
            }
            gateway.close().unwrap();
            assert!(gateway.is_closed());
            let err = gateway.find_one(&ctx, "ids", &by_id("users")).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::StoreAlreadyClosed);
        }

        let gateway = open(&path);
        let counter = gateway
            .find_one_and_update(&ctx, "ids", &by_id("users"), &counter_update(), &upsert())
            .unwrap()
            .unwrap();
        assert_eq!(counter.get("value").as_u64(), Some(6));
        let err = gateway
            .insert_one(&ctx, "users", doc! { _id: 2u64, user_name: "a" })
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);
        gateway.insert_one(&ctx, "users", doc! { _id: 2u64, user_name: "b" }).unwrap();
        let names: Vec<_> = gateway
            .find(&ctx, "users", &all(), &FindOptions::new())
            .unwrap()
            .iter()
            .map(|d| d.get("user_name").as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        gateway.close().unwrap();
        let _ = fs::remove_dir_all(&path);
    }
}
