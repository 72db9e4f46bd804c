use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared, lock-protected value.
pub type Atomic<T> = Arc<RwLock<T>>;

#[inline]
pub fn atomic<T>(t: T) -> Atomic<T> {
    Arc::new(RwLock::new(t))
}

pub trait ReadExecutor<T: ?Sized> {
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R;
}

impl<T> ReadExecutor<T> for Atomic<T> {
    #[inline]
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let read_guard = self.read();
        f(&*read_guard)
    }
}

pub trait WriteExecutor<T: ?Sized> {
    fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

impl<T> WriteExecutor<T> for Atomic<T> {
    #[inline]
    fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut write_guard = self.write();
        f(&mut *write_guard)
    }
}

/// Registry of named mutexes, one per collection.
///
/// Store backends without a native read-modify-write primitive serialize the
/// writes of a collection through the mutex registered under its name. The
/// registry never removes an entry while a guard for it may be alive, so two
/// callers asking for the same name always contend on the same mutex.
///
/// # Examples
///
/// ```
/// use bizstore::common::LockRegistry;
///
/// let registry = LockRegistry::new();
/// let lock = registry.get_lock("ids");
/// {
///     let _guard = lock.lock();
///     // exclusive access to the "ids" collection
/// }
/// assert_eq!(registry.lock_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the lock for `name`, creating it on first use.
    pub fn get_lock(&self, name: &str) -> LockHandle {
        if let Some(lock) = self.locks.read().get(name) {
            return LockHandle { lock: lock.clone() };
        }

        let lock = {
            let mut locks = self.locks.write();
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        LockHandle { lock }
    }

    pub fn lock_count(&self) -> usize {
        self.locks.read().len()
    }
}

/// A handle to one registered mutex.
#[derive(Clone)]
pub struct LockHandle {
    lock: Arc<Mutex<()>>,
}

impl LockHandle {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}
