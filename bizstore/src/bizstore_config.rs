//! Configuration of a [BizStore](crate::bizstore::BizStore).

use crate::common::{
    atomic, Atomic, ReadExecutor, RetryPolicy, WriteExecutor, DEFAULT_COUNTER_COLLECTION,
    DEFAULT_INITIAL_SEQUENCE, DEFAULT_SCHEME, DEFAULT_USER_COLLECTION,
};
use crate::errors::{BizError, BizResult, ErrorKind};
use crate::sequence::validate_namespace;
use crate::store::memory::InMemoryModule;
use crate::store::{ConnectionString, StoreGateway, StoreModule};
use dashmap::DashMap;
use itertools::Itertools;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default deadline applied by [BizStore::context](crate::bizstore::BizStore::context).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by every component a [BizStore](crate::bizstore::BizStore) opens.
///
/// The configuration is mutable until the store is opened. After that every
/// setter fails with a `Configuration` error.
///
/// # Examples
///
/// ```rust,ignore
/// let config = BizStoreConfig::new();
/// config.set_connection_string("mem://localhost/biz")?;
/// config.set_initial_sequence(1000)?;
/// ```
#[derive(Clone)]
pub struct BizStoreConfig {
    inner: Arc<BizStoreConfigInner>,
}

impl Default for BizStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BizStoreConfig {
    /// Creates a configuration with the built-in `mem` module loaded.
    pub fn new() -> BizStoreConfig {
        BizStoreConfig {
            inner: Arc::new(BizStoreConfigInner::new()),
        }
    }

    pub fn connection_string(&self) -> String {
        self.inner.connection_string.read_with(|s| s.clone())
    }

    /// Sets the connection string. It is parsed eagerly so a malformed
    /// string is reported by the setter.
    pub fn set_connection_string(&self, connection_string: &str) -> BizResult<()> {
        self.inner.ensure_mutable()?;
        ConnectionString::parse(connection_string)?;
        self.inner
            .connection_string
            .write_with(|s| *s = connection_string.to_string());
        Ok(())
    }

    pub fn counter_collection(&self) -> String {
        self.inner.counter_collection.read_with(|s| s.clone())
    }

    pub fn set_counter_collection(&self, collection: &str) -> BizResult<()> {
        self.inner.ensure_mutable()?;
        validate_namespace(collection)?;
        self.inner
            .counter_collection
            .write_with(|s| *s = collection.to_string());
        Ok(())
    }

    pub fn initial_sequence(&self) -> u64 {
        self.inner.initial_sequence.load(Ordering::Relaxed)
    }

    /// Sets the first id issued for a fresh namespace. Zero is rejected.
    pub fn set_initial_sequence(&self, value: u64) -> BizResult<()> {
        self.inner.ensure_mutable()?;
        if value == 0 {
            log::error!("Initial sequence value must be at least 1");
            return Err(BizError::new(
                "Initial sequence value must be at least 1",
                ErrorKind::Configuration,
            ));
        }
        self.inner.initial_sequence.store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn user_collection(&self) -> String {
        self.inner.user_collection.read_with(|s| s.clone())
    }

    pub fn set_user_collection(&self, collection: &str) -> BizResult<()> {
        self.inner.ensure_mutable()?;
        validate_namespace(collection)?;
        self.inner
            .user_collection
            .write_with(|s| *s = collection.to_string());
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout.read_with(|d| *d)
    }

    pub fn set_default_timeout(&self, timeout: Duration) -> BizResult<()> {
        self.inner.ensure_mutable()?;
        if timeout.is_zero() {
            log::error!("Default operation timeout must be positive");
            return Err(BizError::new(
                "Default operation timeout must be positive",
                ErrorKind::Configuration,
            ));
        }
        self.inner.default_timeout.write_with(|d| *d = timeout);
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy.read_with(|p| p.clone())
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) -> BizResult<()> {
        self.inner.ensure_mutable()?;
        self.inner.retry_policy.write_with(|p| *p = policy);
        Ok(())
    }

    /// Registers a gateway module under its scheme. A module loaded later
    /// for the same scheme replaces the earlier one.
    pub fn load_module<T: StoreModule + 'static>(&self, module: T) -> BizResult<()> {
        self.inner.ensure_mutable()?;
        let scheme = module.scheme().to_string();
        if scheme.is_empty() {
            log::error!("Store module declares an empty scheme");
            return Err(BizError::new(
                "Store module declares an empty scheme",
                ErrorKind::Configuration,
            ));
        }
        log::debug!("Loaded store module for scheme '{}'", scheme);
        self.inner.modules.insert(scheme, Arc::new(module));
        Ok(())
    }

    /// Returns the schemes of every loaded module, sorted.
    pub fn schemes(&self) -> Vec<String> {
        self.inner
            .modules
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .collect()
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// Parses the connection string and opens a gateway with the module
    /// registered for its scheme.
    pub(crate) fn open_gateway(&self) -> BizResult<(ConnectionString, StoreGateway)> {
        let connection = ConnectionString::parse(&self.connection_string())?;
        let module = match self.inner.modules.get(connection.scheme()) {
            Some(entry) => entry.value().clone(),
            None => {
                log::error!(
                    "No store module loaded for scheme '{}' (loaded: {:?})",
                    connection.scheme(),
                    self.schemes()
                );
                return Err(BizError::new(
                    &format!("No store module loaded for scheme '{}'", connection.scheme()),
                    ErrorKind::Configuration,
                ));
            }
        };
        let gateway = module.open_gateway(&connection)?;
        log::info!("Opened {} gateway for {}", gateway.name(), connection);
        Ok((connection, gateway))
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }
}

struct BizStoreConfigInner {
    connection_string: Atomic<String>,
    counter_collection: Atomic<String>,
    initial_sequence: AtomicU64,
    user_collection: Atomic<String>,
    default_timeout: Atomic<Duration>,
    retry_policy: Atomic<RetryPolicy>,
    modules: DashMap<String, Arc<dyn StoreModule>>,
    frozen: AtomicBool,
}

impl BizStoreConfigInner {
    fn new() -> BizStoreConfigInner {
        let modules: DashMap<String, Arc<dyn StoreModule>> = DashMap::new();
        modules.insert(DEFAULT_SCHEME.to_string(), Arc::new(InMemoryModule::new()));

        BizStoreConfigInner {
            connection_string: atomic(format!("{}://", DEFAULT_SCHEME)),
            counter_collection: atomic(DEFAULT_COUNTER_COLLECTION.to_string()),
            initial_sequence: AtomicU64::new(DEFAULT_INITIAL_SEQUENCE),
            user_collection: atomic(DEFAULT_USER_COLLECTION.to_string()),
            default_timeout: atomic(DEFAULT_OPERATION_TIMEOUT),
            retry_policy: atomic(RetryPolicy::default()),
            modules,
            frozen: AtomicBool::new(false),
        }
    }

    fn ensure_mutable(&self) -> BizResult<()> {
        if self.frozen.load(Ordering::Acquire) {
            log::error!("Configuration cannot be changed after the store is opened");
            return Err(BizError::new(
                "Configuration cannot be changed after the store is opened",
                ErrorKind::Configuration,
            ));
        }
        Ok(())
    }
}
