use crate::errors::BizResult;
use crate::store::{ConnectionString, StoreGateway};

/// A loadable store backend, selected by connection-string scheme.
///
/// The in-memory backend is always available under `mem`; other backends
/// (such as the fjall adapter under `fjall`) are registered through
/// `BizStoreBuilder::load_module`.
pub trait StoreModule: Send + Sync {
    /// Scheme this module serves, lowercase.
    fn scheme(&self) -> &str;

    /// Opens a gateway for `connection`.
    fn open_gateway(&self, connection: &ConnectionString) -> BizResult<StoreGateway>;
}
