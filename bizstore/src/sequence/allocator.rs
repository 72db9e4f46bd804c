use crate::common::{
    COUNTER_VALUE_FIELD, DEFAULT_COUNTER_COLLECTION, DEFAULT_INITIAL_SEQUENCE,
};
use crate::context::Context;
use crate::errors::{BizError, BizResult, ErrorKind};
use crate::sequence::validate_namespace;
use crate::store::{by_id, upsert, StoreGateway, Update};
use dashmap::DashMap;
use std::sync::Arc;

/// Hands out strictly increasing integer ids per namespace.
///
/// Each namespace has one counter record `{_id: namespace, value: u64}` in
/// the counter collection (`ids` by default). One call is exactly one
/// atomic upsert-increment on that record:
///
/// ```text
/// find_one_and_update(
///     {_id: namespace},
///     {$inc: {value: 1}, $setOnInsert: {value: initial - 1}},
///     upsert, return post-image)
/// ```
///
/// so the first call for a namespace returns the initial value and two
/// racing first calls get `initial` and `initial + 1`. The allocator never
/// reads a counter and writes it back, never retries and never resets a
/// counter. Callers that want retries wrap `next` in
/// [retry_transient](crate::common::retry_transient).
///
/// As a safety net the allocator remembers the highest value it has handed
/// out for each namespace. A call whose result is not greater than the
/// highest value known when the call started fails with
/// `InvariantViolation`; the store has then been rewound or the counter
/// written by something else.
///
/// # Examples
///
/// ```rust
/// use bizstore::context::Context;
/// use bizstore::sequence::SequenceAllocator;
/// use bizstore::store::memory::{InMemoryGateway, InMemoryGatewayConfig};
/// use bizstore::store::StoreGateway;
///
/// let gateway = StoreGateway::new(InMemoryGateway::new(InMemoryGatewayConfig::new()));
/// let allocator = SequenceAllocator::new(gateway);
/// let ctx = Context::background();
/// assert_eq!(allocator.next(&ctx, "users").unwrap(), 1);
/// assert_eq!(allocator.next(&ctx, "users").unwrap(), 2);
/// assert_eq!(allocator.next(&ctx, "orders").unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct SequenceAllocator {
    inner: Arc<SequenceAllocatorInner>,
}

struct SequenceAllocatorInner {
    gateway: StoreGateway,
    counter_collection: String,
    initial_value: u64,
    highest_seen: DashMap<String, u64>,
}

impl SequenceAllocator {
    /// Allocator over the `ids` collection starting every namespace at 1.
    pub fn new(gateway: StoreGateway) -> SequenceAllocator {
        SequenceAllocator {
            inner: Arc::new(SequenceAllocatorInner {
                gateway,
                counter_collection: DEFAULT_COUNTER_COLLECTION.to_string(),
                initial_value: DEFAULT_INITIAL_SEQUENCE,
                highest_seen: DashMap::new(),
            }),
        }
    }

    pub fn builder(gateway: StoreGateway) -> SequenceAllocatorBuilder {
        SequenceAllocatorBuilder {
            gateway,
            counter_collection: DEFAULT_COUNTER_COLLECTION.to_string(),
            initial_value: DEFAULT_INITIAL_SEQUENCE,
        }
    }

    pub fn counter_collection(&self) -> &str {
        &self.inner.counter_collection
    }

    pub fn initial_value(&self) -> u64 {
        self.inner.initial_value
    }

    pub fn gateway(&self) -> &StoreGateway {
        &self.inner.gateway
    }

    /// Returns the next id of `namespace`.
    ///
    /// # Errors
    ///
    /// * `Configuration` for an invalid namespace; the store is not contacted.
    /// * A transient kind when the store could not apply the increment; the
    ///   counter is unchanged.
    /// * `InvariantViolation` when the store's answer cannot be a fresh id.
    pub fn next(&self, ctx: &Context, namespace: &str) -> BizResult<u64> {
        validate_namespace(namespace)?;
        self.inner.next(ctx, namespace)
    }

    /// Last id issued for `namespace`, read without advancing the counter.
    pub fn current(&self, ctx: &Context, namespace: &str) -> BizResult<Option<u64>> {
        validate_namespace(namespace)?;
        let record = self
            .inner
            .gateway
            .find_one(ctx, &self.inner.counter_collection, &by_id(namespace))?;
        match record {
            Some(record) => Ok(Some(counter_value(namespace, &record)?)),
            None => Ok(None),
        }
    }
}

impl SequenceAllocatorInner {
    fn next(&self, ctx: &Context, namespace: &str) -> BizResult<u64> {
        let floor = self.highest_seen.get(namespace).map(|v| *v);

        let update = Update::new()
            .inc(COUNTER_VALUE_FIELD, 1)
            .set_on_insert(COUNTER_VALUE_FIELD, self.initial_value - 1);
        let record = self
            .gateway
            .find_one_and_update(ctx, &self.counter_collection, &by_id(namespace), &update, &upsert())
            .map_err(|err| {
                log::warn!("Sequence allocation for '{}' failed: {}", namespace, err);
                err
            })?;

        let Some(record) = record else {
            log::error!(
                "Upsert on counter '{}' returned no document from {}",
                namespace,
                self.gateway.name()
            );
            return Err(BizError::new(
                &format!("Upsert on counter '{}' returned no document", namespace),
                ErrorKind::InvariantViolation,
            ));
        };

        let value = counter_value(namespace, &record)?;
        if value < self.initial_value {
            log::error!(
                "Counter '{}' returned {} below the initial value {}",
                namespace,
                value,
                self.initial_value
            );
            return Err(BizError::new(
                &format!("Counter '{}' returned a value below the initial value", namespace),
                ErrorKind::InvariantViolation,
            ));
        }
        if let Some(floor) = floor {
            if value <= floor {
                log::error!(
                    "Counter '{}' went backwards: returned {} after {} was issued",
                    namespace,
                    value,
                    floor
                );
                return Err(BizError::new(
                    &format!(
                        "Counter '{}' returned {} which is not greater than {}",
                        namespace, value, floor
                    ),
                    ErrorKind::InvariantViolation,
                ));
            }
        }

        self.highest_seen
            .entry(namespace.to_string())
            .and_modify(|seen| *seen = (*seen).max(value))
            .or_insert(value);
        Ok(value)
    }
}

fn counter_value(namespace: &str, record: &crate::collection::Document) -> BizResult<u64> {
    record.get(COUNTER_VALUE_FIELD).as_u64().ok_or_else(|| {
        log::error!(
            "Counter '{}' has no valid unsigned value: {:?}",
            namespace,
            record
        );
        BizError::new(
            &format!("Counter '{}' has no valid unsigned value", namespace),
            ErrorKind::InvariantViolation,
        )
    })
}

pub struct SequenceAllocatorBuilder {
    gateway: StoreGateway,
    counter_collection: String,
    initial_value: u64,
}

impl SequenceAllocatorBuilder {
    pub fn counter_collection(mut self, name: &str) -> Self {
        self.counter_collection = name.to_string();
        self
    }

    /// First value issued for a fresh namespace. Must be at least 1.
    pub fn initial_value(mut self, value: u64) -> Self {
        self.initial_value = value;
        self
    }

    pub fn build(self) -> BizResult<SequenceAllocator> {
        if self.initial_value == 0 {
            log::error!("Initial sequence value must be at least 1");
            return Err(BizError::new(
                "Initial sequence value must be at least 1",
                ErrorKind::Configuration,
            ));
        }
        validate_namespace(&self.counter_collection).map_err(|err| {
            BizError::new_with_cause(
                "Invalid counter collection name",
                ErrorKind::Configuration,
                err,
            )
        })?;

        Ok(SequenceAllocator {
            inner: Arc::new(SequenceAllocatorInner {
                gateway: self.gateway,
                counter_collection: self.counter_collection,
                initial_value: self.initial_value,
                highest_seen: DashMap::new(),
            }),
        })
    }
}

/// Allocates the next id of `namespace` with the default configuration.
pub fn next_sequence(gateway: &StoreGateway, ctx: &Context, namespace: &str) -> BizResult<u64> {
    SequenceAllocator::new(gateway.clone()).next(ctx, namespace)
}
