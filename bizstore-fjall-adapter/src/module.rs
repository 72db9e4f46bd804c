use crate::config::FjallConfig;
use crate::gateway::FjallGateway;
use bizstore::errors::{BizError, BizResult, ErrorKind};
use bizstore::store::{ConnectionString, StoreGateway, StoreGatewayProvider, StoreModule};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fjall::CompressionType;
use once_cell::sync::Lazy;
use std::path::Path;

// A keyspace directory must only be opened once per process.
static OPEN_GATEWAYS: Lazy<DashMap<String, FjallGateway>> = Lazy::new(DashMap::new);

/// Store module persisting documents in a fjall keyspace.
///
/// Serves the `fjall` scheme. The store directory is the configured
/// `db_path` if one was given, else the location of the connection string,
/// with the database name appended:
///
/// | connection string | directory |
/// |---|---|
/// | `fjall:///var/lib/biz` | `/var/lib/biz/biz` |
/// | `fjall:///var/lib/biz?authSource=admin` | `/var/lib/biz/admin` |
/// | `fjall://` with `db_path("/data")` | `/data/biz` |
///
/// Gateways are shared per directory within the process, so two stores
/// opened on the same directory see the same data.
///
/// # Examples
///
/// ```rust,ignore
/// use bizstore::bizstore::BizStore;
/// use bizstore_fjall_adapter::FjallModule;
///
/// let store = BizStore::builder()
///     .load_module(FjallModule::with_config().production_preset().build())
///     .connection_string("fjall:///var/lib/biz")
///     .open()?;
/// ```
///
/// # Configuration Presets
///
/// - `production_preset()` - balanced caches and workers
/// - `high_throughput_preset()` - large buffers for write-heavy loads
/// - `low_memory_preset()` - small caches and a single worker of each kind
pub struct FjallModule {
    store_config: FjallConfig,
}

impl FjallModule {
    #[inline]
    pub fn with_config() -> FjallModuleBuilder {
        FjallModuleBuilder::new()
    }

    pub fn config(&self) -> &FjallConfig {
        &self.store_config
    }

    fn store_path(&self, connection: &ConnectionString) -> BizResult<String> {
        let root = match self.store_config.db_path() {
            path if !path.is_empty() => path,
            _ => connection.location(),
        };
        if root.is_empty() {
            log::error!("No directory for fjall store in {}", connection);
            return Err(BizError::new(
                "Fjall store needs a db_path or a location in the connection string",
                ErrorKind::Configuration,
            ));
        }
        Ok(Path::new(&root)
            .join(connection.database())
            .to_string_lossy()
            .to_string())
    }
}

impl StoreModule for FjallModule {
    fn scheme(&self) -> &str {
        "fjall"
    }

    fn open_gateway(&self, connection: &ConnectionString) -> BizResult<StoreGateway> {
        let path = self.store_path(connection)?;
        let gateway = match OPEN_GATEWAYS.entry(path.clone()) {
            Entry::Occupied(mut entry) if entry.get().is_closed() => {
                let gateway = FjallGateway::open(self.store_config.for_path(&path))?;
                entry.insert(gateway.clone());
                gateway
            }
            Entry::Occupied(entry) => {
                log::debug!("Reusing open fjall gateway at {}", path);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let gateway = FjallGateway::open(self.store_config.for_path(&path))?;
                entry.insert(gateway.clone());
                gateway
            }
        };
        Ok(StoreGateway::new(gateway))
    }
}

/// Builder of a [FjallModule].
pub struct FjallModuleBuilder {
    store_config: FjallConfig,
}

impl Default for FjallModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FjallModuleBuilder {
    #[inline]
    pub fn new() -> FjallModuleBuilder {
        FjallModuleBuilder {
            store_config: FjallConfig::new(),
        }
    }

    /// 256 MB block cache, 128 MB write buffer, every CPU flushing and half
    /// of them compacting, LZ4 blocks with bloom filters.
    #[inline]
    pub fn production_preset(self) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        self.block_cache_capacity(256 * 1024 * 1024)
            .max_write_buffer_size(128 * 1024 * 1024)
            .max_memtable_size(32 * 1024 * 1024)
            .flush_workers(cpus)
            .compaction_workers((cpus / 2).max(1))
            .bloom_filter_bits(10)
            .compression_type(CompressionType::Lz4)
    }

    /// Large caches and memtables for bulk loading.
    ///
    /// Writes are still synced before they are acknowledged.
    #[inline]
    pub fn high_throughput_preset(self) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        self.block_cache_capacity(512 * 1024 * 1024)
            .max_write_buffer_size(256 * 1024 * 1024)
            .max_memtable_size(64 * 1024 * 1024)
            .flush_workers(cpus)
            .compaction_workers(cpus)
            .bloom_filter_bits(10)
    }

    #[inline]
    pub fn low_memory_preset(self) -> Self {
        self.block_cache_capacity(16 * 1024 * 1024)
            .max_write_buffer_size(32 * 1024 * 1024)
            .max_memtable_size(8 * 1024 * 1024)
            .flush_workers(1)
            .compaction_workers(1)
            .bloom_filter_bits(10)
    }

    /// Root directory; overrides the location of the connection string.
    #[inline]
    pub fn db_path(self, db_path: &str) -> Self {
        self.store_config.set_db_path(db_path);
        self
    }

    #[inline]
    pub fn flush_workers(self, count: usize) -> Self {
        self.store_config.set_flush_workers(count);
        self
    }

    #[inline]
    pub fn compaction_workers(self, count: usize) -> Self {
        self.store_config.set_compaction_workers(count);
        self
    }

    #[inline]
    pub fn block_cache_capacity(self, bytes: u64) -> Self {
        self.store_config.set_block_cache_capacity(bytes);
        self
    }

    #[inline]
    pub fn max_journaling_size(self, bytes: u64) -> Self {
        self.store_config.set_max_journaling_size(bytes);
        self
    }

    #[inline]
    pub fn max_write_buffer_size(self, bytes: u64) -> Self {
        self.store_config.set_max_write_buffer_size(bytes);
        self
    }

    #[inline]
    pub fn fsync_frequency(self, millis: u16) -> Self {
        self.store_config.set_fsync_frequency(millis);
        self
    }

    /// Zero disables the bloom filter.
    #[inline]
    pub fn bloom_filter_bits(self, bits: u8) -> Self {
        let bits = if bits == 0 { -1 } else { bits.min(i8::MAX as u8) as i8 };
        self.store_config.set_bloom_filter_bits(bits);
        self
    }

    #[inline]
    pub fn compression_type(self, compression: CompressionType) -> Self {
        self.store_config.set_compression_type(compression);
        self
    }

    #[inline]
    pub fn max_memtable_size(self, bytes: u32) -> Self {
        self.store_config.set_max_memtable_size(bytes);
        self
    }

    #[inline]
    pub fn block_size(self, bytes: u32) -> Self {
        self.store_config.set_block_size(bytes);
        self
    }

    #[inline]
    pub fn build(self) -> FjallModule {
        FjallModule {
            store_config: self.store_config,
        }
    }
}
