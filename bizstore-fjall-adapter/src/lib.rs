//! Fjall store gateway for bizstore.
//!
//! Load [FjallModule] into a `BizStoreBuilder` and open the store with a
//! `fjall://` connection string. Documents, the `_id` index and unique
//! indexes live in fjall partitions; every acknowledged write has been
//! synced to the journal.

mod config;
mod gateway;
mod module;
mod version;
mod wrapper;

pub use config::*;
pub use gateway::FjallGateway;
pub use module::*;
pub use wrapper::FjallValueError;
