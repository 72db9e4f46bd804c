use fjall::{CompressionType, Config, PartitionCreateOptions};
use bizstore::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use std::sync::atomic::{AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Tuning of a fjall-backed gateway.
///
/// A cloneable, thread-safe holder (PIMPL over `Arc<FjallConfigInner>`).
/// One configuration may serve several databases: the module derives a
/// copy per database with [for_path](FjallConfig::for_path).
///
/// Every write is persisted with `PersistMode::SyncAll` before it is
/// acknowledged whatever the settings here, so `fsync_frequency` only
/// controls the background journal sync of the engine.
#[derive(Clone)]
pub struct FjallConfig {
    inner: Arc<FjallConfigInner>,
}

impl Default for FjallConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FjallConfig {
    #[inline]
    pub fn new() -> FjallConfig {
        FjallConfig {
            inner: Arc::new(FjallConfigInner::new()),
        }
    }

    /// Keyspace settings for the configured path.
    pub(crate) fn keyspace_config(&self) -> Config {
        let mut config = Config::new(self.db_path())
            .flush_workers(self.flush_workers())
            .compaction_workers(self.compaction_workers())
            .cache_size(self.block_cache_capacity())
            .max_journaling_size(self.max_journaling_size())
            .max_write_buffer_size(self.max_write_buffer_size());

        if self.fsync_frequency() > 0 {
            config = config.fsync_ms(Some(self.fsync_frequency()));
        }
        config
    }

    pub(crate) fn partition_config(&self) -> PartitionCreateOptions {
        let bits = self.bloom_filter_bits();
        PartitionCreateOptions::default()
            .bloom_filter_bits(if bits < 0 { None } else { Some(bits as u8) })
            .compression(self.compression_type())
            .max_memtable_size(self.max_memtable_size())
            .block_size(self.block_size())
    }

    /// Copy of this configuration rooted at `db_path`.
    pub(crate) fn for_path(&self, db_path: &str) -> FjallConfig {
        let inner = FjallConfigInner::new();
        inner.db_path.write_with(|path| *path = db_path.to_string());
        inner.flush_workers.store(self.flush_workers(), Ordering::Relaxed);
        inner
            .compaction_workers
            .store(self.compaction_workers(), Ordering::Relaxed);
        inner
            .block_cache_capacity
            .store(self.block_cache_capacity(), Ordering::Relaxed);
        inner
            .max_journaling_size
            .store(self.max_journaling_size(), Ordering::Relaxed);
        inner
            .max_write_buffer_size
            .store(self.max_write_buffer_size(), Ordering::Relaxed);
        inner.fsync_frequency.store(self.fsync_frequency(), Ordering::Relaxed);
        inner.bloom_filter_bits.store(self.bloom_filter_bits(), Ordering::Relaxed);
        inner
            .compression_type
            .write_with(|c| *c = self.compression_type());
        inner.max_memtable_size.store(self.max_memtable_size(), Ordering::Relaxed);
        inner.block_size.store(self.block_size(), Ordering::Relaxed);
        FjallConfig {
            inner: Arc::new(inner),
        }
    }

    /// Root directory of the store. Empty until set.
    #[inline]
    pub fn db_path(&self) -> String {
        self.inner.db_path.read_with(|path| path.clone())
    }

    #[inline]
    pub(crate) fn set_db_path(&self, db_path: &str) {
        self.inner.db_path.write_with(|path| *path = db_path.to_string())
    }

    #[inline]
    pub fn flush_workers(&self) -> usize {
        self.inner.flush_workers.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_flush_workers(&self, count: usize) {
        self.inner.flush_workers.store(count.max(1), Ordering::Relaxed)
    }

    #[inline]
    pub fn compaction_workers(&self) -> usize {
        self.inner.compaction_workers.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_compaction_workers(&self, count: usize) {
        self.inner.compaction_workers.store(count.max(1), Ordering::Relaxed)
    }

    /// Block cache size in bytes.
    #[inline]
    pub fn block_cache_capacity(&self) -> u64 {
        self.inner.block_cache_capacity.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_block_cache_capacity(&self, bytes: u64) {
        self.inner.block_cache_capacity.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn max_journaling_size(&self) -> u64 {
        self.inner.max_journaling_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_max_journaling_size(&self, bytes: u64) {
        self.inner.max_journaling_size.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn max_write_buffer_size(&self) -> u64 {
        self.inner.max_write_buffer_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_max_write_buffer_size(&self, bytes: u64) {
        self.inner.max_write_buffer_size.store(bytes, Ordering::Relaxed)
    }

    /// Background fsync interval in milliseconds; zero disables it.
    #[inline]
    pub fn fsync_frequency(&self) -> u16 {
        self.inner.fsync_frequency.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_fsync_frequency(&self, millis: u16) {
        self.inner.fsync_frequency.store(millis, Ordering::Relaxed)
    }

    /// Bloom filter bits per key; negative disables the filter.
    #[inline]
    pub fn bloom_filter_bits(&self) -> i8 {
        self.inner.bloom_filter_bits.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_bloom_filter_bits(&self, bits: i8) {
        self.inner.bloom_filter_bits.store(bits, Ordering::Relaxed)
    }

    #[inline]
    pub fn compression_type(&self) -> CompressionType {
        self.inner.compression_type.read_with(|c| *c)
    }

    #[inline]
    pub(crate) fn set_compression_type(&self, compression: CompressionType) {
        self.inner.compression_type.write_with(|c| *c = compression)
    }

    #[inline]
    pub fn max_memtable_size(&self) -> u32 {
        self.inner.max_memtable_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_max_memtable_size(&self, bytes: u32) {
        self.inner.max_memtable_size.store(bytes, Ordering::Relaxed)
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.inner.block_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_block_size(&self, bytes: u32) {
        self.inner.block_size.store(bytes, Ordering::Relaxed)
    }
}

struct FjallConfigInner {
    db_path: Atomic<String>,
    flush_workers: AtomicUsize,
    compaction_workers: AtomicUsize,
    block_cache_capacity: AtomicU64,
    max_journaling_size: AtomicU64,
    max_write_buffer_size: AtomicU64,
    fsync_frequency: AtomicU16,
    bloom_filter_bits: AtomicI8,
    compression_type: Atomic<CompressionType>,
    max_memtable_size: AtomicU32,
    block_size: AtomicU32,
}

impl FjallConfigInner {
    pub const DEFAULT_BLOCK_CACHE_MB: u64 = 64;
    pub const DEFAULT_WRITE_BUFFER_MB: u64 = 128;
    pub const DEFAULT_MAX_JOURNALING_MB: u64 = 512;
    pub const DEFAULT_MEMTABLE_MB: u32 = 16;

    fn new() -> FjallConfigInner {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        FjallConfigInner {
            db_path: atomic(String::new()),
            flush_workers: AtomicUsize::new(cpus.max(1)),
            compaction_workers: AtomicUsize::new((cpus / 2).max(1)),
            block_cache_capacity: AtomicU64::new(Self::DEFAULT_BLOCK_CACHE_MB * 1_024 * 1_024),
            max_journaling_size: AtomicU64::new(Self::DEFAULT_MAX_JOURNALING_MB * 1_024 * 1_024),
            max_write_buffer_size: AtomicU64::new(Self::DEFAULT_WRITE_BUFFER_MB * 1_024 * 1_024),
            fsync_frequency: AtomicU16::new(0),
            bloom_filter_bits: AtomicI8::new(10),
            compression_type: atomic(CompressionType::Lz4),
            max_memtable_size: AtomicU32::new(Self::DEFAULT_MEMTABLE_MB * 1_024 * 1_024),
            block_size: AtomicU32::new(4 * 1_024),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FjallConfig::new();
        assert_eq!(config.db_path(), "");
        assert!(config.flush_workers() >= 1);
        assert!(config.compaction_workers() >= 1);
        assert_eq!(config.block_cache_capacity(), 64 * 1_024 * 1_024);
        assert_eq!(config.fsync_frequency(), 0);
        assert_eq!(config.bloom_filter_bits(), 10);
        assert_eq!(config.compression_type(), CompressionType::Lz4);
    }

    #[test]
    fn for_path_copies_tuning() {
        let config = FjallConfig::new();
        config.set_flush_workers(1);
        config.set_compaction_workers(1);
        config.set_block_cache_capacity(1_024);
        config.set_fsync_frequency(100);
        config.set_bloom_filter_bits(-1);
        config.set_block_size(8 * 1_024);

        let derived = config.for_path("/tmp/biz/orders");
        assert_eq!(derived.db_path(), "/tmp/biz/orders");
        assert_eq!(config.db_path(), "");
        assert_eq!(derived.flush_workers(), 1);
        assert_eq!(derived.compaction_workers(), 1);
        assert_eq!(derived.block_cache_capacity(), 1_024);
        assert_eq!(derived.fsync_frequency(), 100);
        assert_eq!(derived.bloom_filter_bits(), -1);
        assert_eq!(derived.block_size(), 8 * 1_024);
    }

    #[test]
    fn worker_counts_never_drop_to_zero() {
        let config = FjallConfig::new();
        config.set_flush_workers(0);
        config.set_compaction_workers(0);
        assert_eq!(config.flush_workers(), 1);
        assert_eq!(config.compaction_workers(), 1);
    }
}
