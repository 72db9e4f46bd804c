use bizstore::bizstore::BizStore;
use bizstore::errors::{BizError, BizResult, ErrorKind};
use std::backtrace::Backtrace;
use std::time::{Duration, Instant};
use std::{env, fs, thread};

/// Runs a test with retry logic and error handling.
///
/// `after` runs whether the test passed or failed. A failing attempt is
/// retried up to three times before the test panics with the last error.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> BizResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> BizResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> BizResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => after(ctx)
                        .map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();

        let (error, backtrace) = match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => (e, bt),
            Err(panic_err) => {
                let message = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                (format!("Panic: {}", message), Backtrace::capture().to_string())
            }
        };

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("Error: {}", error);
            eprintln!("Retrying in {}ms...\n", 100 * attempt);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
        last_error = Some(error);
        last_backtrace = Some(backtrace);
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// An open store plus where it lives.
///
/// `path` is the fjall directory, or the shared in-memory store name when
/// running with the `memory` feature.
#[derive(Clone)]
pub struct TestContext {
    path: String,
    store: BizStore,
}

impl TestContext {
    pub fn new(path: String, store: BizStore) -> Self {
        Self { path, store }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn store(&self) -> BizStore {
        self.store.clone()
    }

    /// Opens a second store over the same data, as another process would.
    pub fn open_peer(&self) -> BizResult<BizStore> {
        open_store(&self.path)
    }
}

pub fn random_path() -> String {
    let id = uuid::Uuid::new_v4();
    env::temp_dir()
        .join(format!("bizstore-{}", id))
        .to_string_lossy()
        .to_string()
}

#[cfg(all(feature = "fjall", not(feature = "memory")))]
pub fn open_store(path: &str) -> BizResult<BizStore> {
    use bizstore_fjall_adapter::FjallModule;

    // one flush and one compaction worker per keyspace
    let module = FjallModule::with_config()
        .db_path(path)
        .low_memory_preset()
        .build();

    BizStore::builder()
        .load_module(module)
        .connection_string("fjall://")
        .open()
}

#[cfg(any(feature = "memory", not(feature = "fjall")))]
pub fn open_store(path: &str) -> BizResult<BizStore> {
    BizStore::builder()
        .connection_string(&format!("mem://{}/biz", store_host(path)))
        .open()
}

#[cfg(any(feature = "memory", not(feature = "fjall")))]
fn store_host(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn create_test_context() -> BizResult<TestContext> {
    const MAX_ATTEMPTS: u32 = 3;
    let mut last_error: Option<BizError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let path = random_path();
        if std::path::Path::new(&path).exists() {
            let _ = fs::remove_dir_all(&path);
        }

        match open_store(&path) {
            Ok(store) => return Ok(TestContext::new(path, store)),
            Err(e) => {
                let _ = fs::remove_dir_all(&path);
                if attempt < MAX_ATTEMPTS {
                    eprintln!(
                        "Warning: Failed to create test context (attempt {}/{}): {:?}",
                        attempt, MAX_ATTEMPTS, e
                    );
                    thread::sleep(Duration::from_millis(50 * attempt as u64));
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        BizError::new("Failed to create test context", ErrorKind::InternalError)
    }))
}

#[cfg(all(feature = "fjall", not(feature = "memory")))]
pub fn cleanup(ctx: TestContext) -> BizResult<()> {
    if let Err(e) = ctx.store().close() {
        eprintln!("Warning: Failed to close store: {:?}", e);
    }

    thread::sleep(Duration::from_millis(50));

    let path = ctx.path().to_string();
    let max_retries = 15;
    let mut delay_ms = 50u64;

    for retry in 0..max_retries {
        if !std::path::Path::new(&path).exists() {
            return Ok(());
        }
        match fs::remove_dir_all(&path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(_) if retry < max_retries - 1 => {
                thread::sleep(Duration::from_millis(delay_ms));
                delay_ms = std::cmp::min(delay_ms * 2, 1000);
            }
            Err(e) => {
                // temp files are left for the OS
                eprintln!(
                    "Warning: Failed to remove test directory {} after {} attempts: {:?}",
                    path, max_retries, e
                );
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(any(feature = "memory", not(feature = "fjall")))]
pub fn cleanup(ctx: TestContext) -> BizResult<()> {
    use bizstore::store::memory::InMemoryGateway;

    ctx.store().close()?;
    InMemoryGateway::release_shared(&format!("{}/biz", store_host(ctx.path())));
    Ok(())
}
