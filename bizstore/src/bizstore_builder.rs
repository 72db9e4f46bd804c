use crate::bizstore::BizStore;
use crate::bizstore_config::BizStoreConfig;
use crate::common::RetryPolicy;
use crate::errors::{BizError, BizResult};
use crate::store::StoreModule;
use std::time::Duration;

/// Builder for a [BizStore].
///
/// Setters never fail. The first invalid setting is remembered and
/// reported by [open](BizStoreBuilder::open), which validates the rest of
/// the configuration and opens the gateway.
///
/// # Examples
///
/// ```rust,ignore
/// use bizstore::bizstore::BizStore;
///
/// let store = BizStore::builder()
///     .connection_string("mem://localhost/biz")
///     .initial_sequence(1)
///     .open()?;
/// let id = store.next_id(&store.context(), "orders")?;
/// ```
pub struct BizStoreBuilder {
    error: Option<BizError>,
    config: BizStoreConfig,
}

impl Default for BizStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BizStoreBuilder {
    pub fn new() -> Self {
        BizStoreBuilder {
            error: None,
            config: BizStoreConfig::new(),
        }
    }

    pub fn connection_string(mut self, connection_string: &str) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_connection_string(connection_string) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Collection holding one counter record per namespace.
    pub fn counter_collection(mut self, collection: &str) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_counter_collection(collection) {
                self.error = Some(e);
            }
        }
        self
    }

    /// First id issued for a fresh namespace.
    pub fn initial_sequence(mut self, value: u64) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_initial_sequence(value) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn user_collection(mut self, collection: &str) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_user_collection(collection) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_default_timeout(timeout) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Retry policy repositories apply around id allocation.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_retry_policy(policy) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Loads a gateway module, e.g. the fjall adapter's `FjallModule`.
    pub fn load_module<T: StoreModule + 'static>(mut self, module: T) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.load_module(module) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Opens the store, returning the first error captured by a setter if any.
    pub fn open(self) -> BizResult<BizStore> {
        if let Some(error) = self.error {
            return Err(error);
        }
        BizStore::open(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::store::{ConnectionString, StoreGateway};

    struct RefusingModule;

    impl StoreModule for RefusingModule {
        fn scheme(&self) -> &str {
            "down"
        }

        fn open_gateway(&self, _connection: &ConnectionString) -> BizResult<StoreGateway> {
            Err(BizError::new("store is down", ErrorKind::StoreUnavailable))
        }
    }

    #[test]
    fn first_error_is_reported() {
        let err = BizStoreBuilder::new()
            .initial_sequence(0)
            .counter_collection("")
            .open()
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
        assert!(err.message().contains("Initial sequence"));
    }

    #[test]
    fn module_failure_surfaces_from_open() {
        let err = BizStoreBuilder::new()
            .load_module(RefusingModule)
            .connection_string("down://somewhere")
            .open()
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::StoreUnavailable);
    }

    #[test]
    fn unknown_scheme() {
        let err = BizStoreBuilder::new()
            .connection_string("postgres://localhost/biz")
            .open()
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::Configuration);
    }

    #[test]
    fn open_with_settings() {
        let store = BizStoreBuilder::new()
            .connection_string("mem://")
            .counter_collection("counters")
            .initial_sequence(100)
            .default_timeout(Duration::from_secs(2))
            .retry_policy(RetryPolicy::never())
            .open()
            .unwrap();
        assert_eq!(store.allocator().counter_collection(), "counters");
        assert_eq!(store.allocator().initial_value(), 100);
        assert_eq!(store.next_id(&store.context(), "orders").unwrap(), 100);
        assert!(store.config().is_frozen());
        store.close().unwrap();
    }
}
