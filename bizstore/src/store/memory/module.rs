use crate::errors::BizResult;
use crate::store::memory::{InMemoryGateway, InMemoryGatewayConfig};
use crate::store::{ConnectionString, StoreGateway, StoreModule};
use std::time::Duration;

/// The built-in `mem` backend.
///
/// `mem://host/db` opens the shared store named `host/db`, so every
/// gateway opened with the same host and database sees the same data.
/// `mem://` (no host) opens a private store.
#[derive(Default)]
pub struct InMemoryModule {
    write_latency: Option<Duration>,
}

impl InMemoryModule {
    pub fn new() -> InMemoryModule {
        InMemoryModule::default()
    }

    pub fn with_config() -> InMemoryModuleBuilder {
        InMemoryModuleBuilder::new()
    }

    fn gateway_config(&self, connection: &ConnectionString) -> InMemoryGatewayConfig {
        let config = InMemoryGatewayConfig::new();
        if !connection.hosts().is_empty() {
            config.set_store_name(&format!(
                "{}/{}",
                connection.hosts().join(","),
                connection.database()
            ));
        }
        config.set_write_latency(self.write_latency);
        config
    }
}

impl StoreModule for InMemoryModule {
    fn scheme(&self) -> &str {
        "mem"
    }

    fn open_gateway(&self, connection: &ConnectionString) -> BizResult<StoreGateway> {
        let gateway = InMemoryGateway::new(self.gateway_config(connection));
        Ok(StoreGateway::new(gateway))
    }
}

#[derive(Default)]
pub struct InMemoryModuleBuilder {
    write_latency: Option<Duration>,
}

impl InMemoryModuleBuilder {
    pub fn new() -> InMemoryModuleBuilder {
        InMemoryModuleBuilder::default()
    }

    /// Stall every mutation by `latency` inside its critical section.
    pub fn write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    pub fn build(self) -> InMemoryModule {
        InMemoryModule {
            write_latency: self.write_latency,
        }
    }
}
