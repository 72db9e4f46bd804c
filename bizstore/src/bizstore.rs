use crate::bizstore_builder::BizStoreBuilder;
use crate::bizstore_config::BizStoreConfig;
use crate::context::Context;
use crate::errors::{BizError, BizResult, ErrorKind};
use crate::repository::{TalkRepository, UserRepository};
use crate::sequence::SequenceAllocator;
use crate::store::StoreGateway;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Entry point of the library.
///
/// A `BizStore` owns one open [StoreGateway], the [SequenceAllocator]
/// configured over it, and hands out repositories. Clones share the same
/// gateway. Closing any clone closes the gateway for all of them.
///
/// # Examples
///
/// ```rust,ignore
/// use bizstore::bizstore::BizStore;
///
/// let store = BizStore::builder().open()?;
/// let ctx = store.context();
///
/// let users = store.user_repository(&ctx)?;
/// let user = users.add_user(&ctx, "alice", "secret")?;
///
/// let talks = store.talk_repository();
/// let query = TalkQuery { creator_id: user.id, ..TalkQuery::default() };
/// let talks_of_alice = talks.query_talks(&ctx, &query)?;
///
/// store.close()?;
/// ```
#[derive(Clone)]
pub struct BizStore {
    inner: Arc<BizStoreInner>,
}

impl BizStore {
    pub fn builder() -> BizStoreBuilder {
        BizStoreBuilder::new()
    }

    pub(crate) fn open(config: BizStoreConfig) -> BizResult<BizStore> {
        let (connection, gateway) = config.open_gateway()?;
        let allocator = SequenceAllocator::builder(gateway.clone())
            .counter_collection(&config.counter_collection())
            .initial_value(config.initial_sequence())
            .build();
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(err) => {
                // the gateway is useless without an allocator
                if let Err(close_err) = gateway.close() {
                    log::warn!("Failed to close gateway after open failure: {}", close_err);
                }
                return Err(err);
            }
        };
        config.freeze();

        log::info!(
            "BizStore opened on database '{}' (counters in '{}')",
            connection.database(),
            allocator.counter_collection()
        );
        Ok(BizStore {
            inner: Arc::new(BizStoreInner {
                database: connection.database(),
                config,
                gateway,
                allocator,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &BizStoreConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &StoreGateway {
        &self.inner.gateway
    }

    pub fn allocator(&self) -> &SequenceAllocator {
        &self.inner.allocator
    }

    /// Name of the database selected by the connection string.
    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// A fresh context carrying the configured default timeout.
    pub fn context(&self) -> Context {
        Context::with_timeout(self.inner.config.default_timeout())
    }

    /// Allocates the next id of `namespace` under the store's retry policy.
    pub fn next_id(&self, ctx: &Context, namespace: &str) -> BizResult<u64> {
        self.inner.ensure_open()?;
        let policy = self.inner.config.retry_policy();
        crate::common::retry_transient(&policy, ctx, || self.inner.allocator.next(ctx, namespace))
    }

    pub fn talk_repository(&self) -> TalkRepository {
        TalkRepository::new(self.inner.gateway.clone())
    }

    /// Opens the user repository over the configured user collection.
    pub fn user_repository(&self, ctx: &Context) -> BizResult<UserRepository> {
        let collection = self.inner.config.user_collection();
        self.user_repository_for(ctx, &collection)
    }

    /// Opens a user repository over `collection`. Each collection has its
    /// own id sequence.
    pub fn user_repository_for(&self, ctx: &Context, collection: &str) -> BizResult<UserRepository> {
        self.inner.ensure_open()?;
        UserRepository::open(
            ctx,
            self.inner.allocator.clone(),
            collection,
            self.inner.config.retry_policy(),
        )
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.gateway.is_closed()
    }

    /// Closes the gateway. Closing twice is a no-op.
    pub fn close(&self) -> BizResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::info!("Closing BizStore on database '{}'", self.inner.database);
        self.inner.gateway.close()
    }
}

struct BizStoreInner {
    database: String,
    config: BizStoreConfig,
    gateway: StoreGateway,
    allocator: SequenceAllocator,
    closed: AtomicBool,
}

impl BizStoreInner {
    fn ensure_open(&self) -> BizResult<()> {
        if self.closed.load(Ordering::Acquire) {
            log::error!("BizStore is already closed");
            return Err(BizError::new(
                "BizStore is already closed",
                ErrorKind::StoreAlreadyClosed,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RetryPolicy;
    use crate::repository::{TalkInfo, TalkQuery, TalkStatus};

    // Runs once for the whole test binary.
    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    fn open_store() -> BizStore {
        BizStore::builder()
            .retry_policy(RetryPolicy::never())
            .open()
            .unwrap()
    }

    #[test]
    fn database_defaults_to_biz() {
        let store = open_store();
        assert_eq!(store.database(), "biz");
        let store = BizStore::builder()
            .connection_string("mem://localhost/shop?authSource=admin")
            .open()
            .unwrap();
        assert_eq!(store.database(), "admin");
    }

    #[test]
    fn next_id_is_sequential_per_namespace() {
        let store = open_store();
        let ctx = store.context();
        assert_eq!(store.next_id(&ctx, "a").unwrap(), 1);
        assert_eq!(store.next_id(&ctx, "a").unwrap(), 2);
        assert_eq!(store.next_id(&ctx, "b").unwrap(), 1);
    }

    #[test]
    fn repositories_share_the_gateway() {
        let store = open_store();
        let ctx = store.context();

        let users = store.user_repository(&ctx).unwrap();
        assert_eq!(users.collection(), "users");
        let user = users.add_user(&ctx, "alice", "secret").unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(store.allocator().current(&ctx, "users").unwrap(), Some(1));

        let talks = store.talk_repository();
        let talk_id = talks
            .create_talk(
                &ctx,
                &TalkInfo {
                    status: TalkStatus::Opened,
                    title: "hello".to_string(),
                    creator_id: user.id,
                    ..TalkInfo::default()
                },
            )
            .unwrap();
        let found = talks
            .query_talks(&ctx, &TalkQuery { creator_id: user.id, ..TalkQuery::default() })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].talk_id, talk_id);
    }

    #[test]
    fn separate_user_collections_have_separate_sequences() {
        let store = open_store();
        let ctx = store.context();
        let staff = store.user_repository_for(&ctx, "staff").unwrap();
        let users = store.user_repository(&ctx).unwrap();
        assert_eq!(staff.add_user(&ctx, "a", "p").unwrap().id, 1);
        assert_eq!(users.add_user(&ctx, "a", "p").unwrap().id, 1);
        assert_eq!(staff.add_user(&ctx, "b", "p").unwrap().id, 2);
    }

    #[test]
    fn closed_store_rejects_calls() {
        let store = open_store();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        let err = store.next_id(&Context::background(), "a").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::StoreAlreadyClosed);
        let err = store.user_repository(&Context::background()).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::StoreAlreadyClosed);
    }
}
