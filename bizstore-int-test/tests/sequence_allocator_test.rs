use bizstore::collection::Document;
use bizstore::common::{retry_transient, RetryPolicy, Value};
use bizstore::context::Context;
use bizstore::doc;
use bizstore::errors::{BizError, BizResult, ErrorKind};
use bizstore::sequence::SequenceAllocator;
use bizstore::store::{
    by_id, Filter, FindOptions, StoreGateway, StoreGatewayProvider, Update, UpdateOptions,
};
use bizstore_int_test::test_util::{cleanup, create_test_context, run_test};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[ctor::ctor]
fn init() {
    colog::init();
}

fn allocate_concurrently(
    store: &bizstore::bizstore::BizStore,
    namespace: &str,
    callers: usize,
) -> Vec<u64> {
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let namespace = namespace.to_string();
            thread::spawn(move || {
                barrier.wait();
                store.next_id(&store.context(), &namespace)
            })
        })
        .collect();

    let mut values: Vec<u64> = handles
        .into_iter()
        .map(|handle| handle.join().expect("caller panicked").expect("allocation failed"))
        .collect();
    values.sort();
    values
}

#[test]
fn test_sequential_allocation() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            assert_eq!(store.next_id(&context, "users")?, 1);
            assert_eq!(store.next_id(&context, "users")?, 2);
            assert_eq!(store.next_id(&context, "users")?, 3);

            // namespaces are independent
            assert_eq!(store.next_id(&context, "orders")?, 1);
            assert_eq!(store.allocator().current(&context, "users")?, Some(3));
            assert_eq!(store.allocator().current(&context, "invoices")?, None);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_concurrent_callers_get_consecutive_values() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            for _ in 0..3 {
                store.next_id(&context, "users")?;
            }

            let values = allocate_concurrently(&store, "users", 50);
            assert_eq!(values, (4..=53).collect::<Vec<_>>());
            assert_eq!(store.allocator().current(&context, "users")?, Some(53));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_many_concurrent_callers_never_collide() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let values = allocate_concurrently(&store, "events", 300);
            let distinct: HashSet<_> = values.iter().copied().collect();
            assert_eq!(distinct.len(), 300);
            assert_eq!(values.first(), Some(&1));
            assert_eq!(values.last(), Some(&300));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_cold_start_race() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            // nobody has allocated in this namespace before the race
            let values = allocate_concurrently(&store, "fresh", 20);
            assert_eq!(values, (1..=20).collect::<Vec<_>>());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_peers_share_counters() {
    run_test(
        create_test_context,
        |ctx| {
            let first = ctx.store();
            let second = ctx.open_peer()?;

            let handles: Vec<_> = [first.clone(), second.clone()]
                .into_iter()
                .map(|store| {
                    thread::spawn(move || {
                        (0..25)
                            .map(|_| store.next_id(&store.context(), "users"))
                            .collect::<Result<Vec<_>, _>>()
                    })
                })
                .collect();

            let mut values = Vec::new();
            for handle in handles {
                values.extend(handle.join().expect("peer panicked")?);
            }
            values.sort();
            assert_eq!(values, (1..=50).collect::<Vec<_>>());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_expired_deadline_leaves_counter_unchanged() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            for _ in 0..3 {
                store.next_id(&context, "users")?;
            }

            let expired = Context::with_deadline(Instant::now() - Duration::from_millis(5));
            let err = store.next_id(&expired, "users").unwrap_err();
            assert!(err.is_transient());
            assert_eq!(err.kind(), &ErrorKind::DeadlineExceeded);

            let counter = store
                .gateway()
                .find_one(&Context::background(), "ids", &by_id("users"))?
                .expect("counter record");
            assert_eq!(counter.get("value").as_u64(), Some(3));
            assert_eq!(store.next_id(&context, "users")?, 4);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_invalid_namespace_is_rejected() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            for namespace in ["", "a\0b"] {
                let err = store.next_id(&context, namespace).unwrap_err();
                assert_eq!(err.kind(), &ErrorKind::Configuration);
            }
            let long = "n".repeat(129);
            assert_eq!(
                store.next_id(&context, &long).unwrap_err().kind(),
                &ErrorKind::Configuration
            );
            assert!(store
                .gateway()
                .list_collection_names(&context)?
                .iter()
                .all(|name| name != "ids"));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_corrupted_counter_is_reported() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            store
                .gateway()
                .insert_one(&context, "ids", doc! { _id: "broken", value: "five" })?;

            let err = store.next_id(&context, "broken").unwrap_err();
            assert!(!err.is_transient());
            Ok(())
        },
        cleanup,
    )
}

/// Fails the first `failures` mutations, either before they reach the store
/// (a dropped connection) or after the store applied them (a lost
/// acknowledgement).
struct DroppingGateway {
    inner: StoreGateway,
    failures: AtomicUsize,
    kind: ErrorKind,
    after_apply: bool,
}

impl DroppingGateway {
    fn new(inner: StoreGateway, failures: usize) -> Self {
        DroppingGateway {
            inner,
            failures: AtomicUsize::new(failures),
            kind: ErrorKind::ConnectionReset,
            after_apply: false,
        }
    }

    fn losing_acks(inner: StoreGateway, failures: usize, kind: ErrorKind) -> Self {
        DroppingGateway {
            inner,
            failures: AtomicUsize::new(failures),
            kind,
            after_apply: true,
        }
    }

    fn interrupt(&self) -> BizResult<()> {
        let dropped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(BizError::new("connection lost", self.kind.clone()));
        }
        Ok(())
    }

    fn mutate<T>(&self, apply: impl FnOnce() -> BizResult<T>) -> BizResult<T> {
        if !self.after_apply {
            self.interrupt()?;
        }
        let result = apply()?;
        if self.after_apply {
            self.interrupt()?;
        }
        Ok(result)
    }
}

impl StoreGatewayProvider for DroppingGateway {
    fn name(&self) -> String {
        format!("dropping({})", self.inner.name())
    }

    fn insert_one(&self, ctx: &Context, collection: &str, document: Document) -> BizResult<Value> {
        self.mutate(|| self.inner.insert_one(ctx, collection, document))
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
        self.inner.find_one(ctx, collection, filter)
    }

    fn find_one_and_update(
        &self,
        ctx: &Context,
        collection: &str,
        filter: &Filter,
        update: &Update,
        options: &UpdateOptions,
    ) -> BizResult<Option<Document>> {
        self.mutate(|| {
            self.inner
                .find_one_and_update(ctx, collection, filter, update, options)
        })
    }

    fn delete_one(&self, ctx: &Context, collection: &str, filter: &Filter) -> BizResult<u64> {
        self.mutate(|| self.inner.delete_one(ctx, collection, filter))
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
        self.inner.is_closed()
    }
}

#[test]
fn test_interrupted_allocation_leaves_counter_unchanged() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            for _ in 0..3 {
                store.next_id(&context, "users")?;
            }

            let dropping = StoreGateway::new(DroppingGateway::new(store.gateway().clone(), 2));
            let allocator = SequenceAllocator::new(dropping);

            let err = allocator.next(&context, "users").unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConnectionReset);
            let counter = store
                .gateway()
                .find_one(&Context::background(), "ids", &by_id("users"))?
                .expect("counter record");
            assert_eq!(counter.get("value").as_u64(), Some(3));

            // the second failure is absorbed by the retry policy
            let policy = RetryPolicy::linear(3, Duration::from_millis(1));
            let value = retry_transient(&policy, &context, || allocator.next(&context, "users"))?;
            assert_eq!(value, 4);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_retries_give_up_with_the_transient_error() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            let dropping = StoreGateway::new(DroppingGateway::new(store.gateway().clone(), 10));
            let allocator = SequenceAllocator::new(dropping);

            let policy = RetryPolicy::linear(3, Duration::from_millis(1));
            let err = retry_transient(&policy, &context, || allocator.next(&context, "users"))
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConnectionReset);
            assert_eq!(store.allocator().current(&context, "users")?, None);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failure_after_apply_is_not_retried() {
    run_test(
        create_test_context,
        |ctx| {
            let store = ctx.store();
            let context = store.context();
            for _ in 0..3 {
                store.next_id(&context, "users")?;
            }

            // the increment lands but its outcome is reported as unknown
            let failing = StoreGateway::new(DroppingGateway::losing_acks(
                store.gateway().clone(),
                1,
                ErrorKind::BackendError,
            ));
            let allocator = SequenceAllocator::new(failing);

            let policy = RetryPolicy::linear(3, Duration::from_millis(1));
            let err = retry_transient(&policy, &context, || allocator.next(&context, "users"))
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::BackendError);
            assert!(!err.is_transient());

            let counter = store
                .gateway()
                .find_one(&Context::background(), "ids", &by_id("users"))?
                .expect("counter record");
            assert_eq!(counter.get("value").as_u64(), Some(4));
            assert_eq!(allocator.next(&context, "users")?, 5);
            Ok(())
        },
        cleanup,
    )
}
