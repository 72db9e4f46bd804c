use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use std::sync::Arc;
use std::time::Duration;

/// Configuration of an in-memory gateway.
///
/// Gateways opened with the same non-empty store name share one backing
/// store, the way several processes share one database server. An empty
/// name gives a private store.
///
/// `write_latency` stalls every mutation inside its critical section. It
/// exists to widen race windows in concurrency tests.
///
/// ```text
/// let config = InMemoryGatewayConfig::new();
/// config.set_store_name("shared");
/// config.set_write_latency(Some(Duration::from_millis(1)));
/// let gateway = InMemoryGateway::new(config);
/// ```
#[derive(Default, Clone)]
pub struct InMemoryGatewayConfig {
    inner: Arc<InMemoryGatewayConfigInner>,
}

impl InMemoryGatewayConfig {
    pub fn new() -> InMemoryGatewayConfig {
        InMemoryGatewayConfig {
            inner: Arc::new(InMemoryGatewayConfigInner::new()),
        }
    }

    pub fn store_name(&self) -> String {
        self.inner.store_name.read_with(|name| name.clone())
    }

    pub fn set_store_name(&self, name: &str) {
        self.inner
            .store_name
            .write_with(|current| *current = name.to_string())
    }

    pub fn write_latency(&self) -> Option<Duration> {
        self.inner.write_latency.read_with(|latency| *latency)
    }

    pub fn set_write_latency(&self, latency: Option<Duration>) {
        self.inner
            .write_latency
            .write_with(|current| *current = latency.filter(|d| !d.is_zero()))
    }
}

#[derive(Default)]
struct InMemoryGatewayConfigInner {
    store_name: Atomic<String>,
    write_latency: Atomic<Option<Duration>>,
}

impl InMemoryGatewayConfigInner {
    fn new() -> InMemoryGatewayConfigInner {
        InMemoryGatewayConfigInner {
            store_name: atomic(String::new()),
            write_latency: atomic(None),
        }
    }
}
