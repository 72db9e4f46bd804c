#![allow(dead_code, unused_imports)]
//! # bizstore
//!
//! Document-store persistence for chat talks and user accounts, built around
//! an atomic sequence-id allocator.
//!
//! The document store is reached only through a [StoreGateway](store::StoreGateway).
//! Stores that assign opaque object ids (talks) use them directly. Entities
//! that need dense integer ids (users) take them from the
//! [SequenceAllocator](sequence::SequenceAllocator), which keeps one counter
//! record per namespace and advances it with a single atomic
//! find-one-and-update with upsert. Two callers never receive the same id for
//! the same namespace, across threads and across processes sharing a store.
//!
//! ## Getting Started
//!
//! ```rust,ignore
//! use bizstore::bizstore::BizStore;
//!
//! let store = BizStore::builder()
//!     .connection_string("mem://localhost/biz")
//!     .open()?;
//! let ctx = store.context();
//!
//! let users = store.user_repository(&ctx)?;
//! let alice = users.add_user(&ctx, "alice", "secret")?;
//! assert_eq!(alice.id, 1);
//!
//! let order_id = store.next_id(&ctx, "orders")?;
//! store.close()?;
//! ```
//!
//! Durable storage lives in the `bizstore_fjall_adapter` crate and is loaded
//! with `BizStore::builder().load_module(FjallModule::with_config()...build())`.
//!
//! ## Module Organization
//!
//! - [`bizstore`] - The store facade
//! - [`bizstore_builder`] - Builder for opening a store
//! - [`bizstore_config`] - Store configuration
//! - [`collection`] - Documents and object ids
//! - [`common`] - Values, conversion, locking, retry and shared constants
//! - [`context`] - Deadline-bearing execution context
//! - [`errors`] - Error types and result definitions
//! - [`repository`] - Talk and user repositories
//! - [`sequence`] - The sequence-id allocator
//! - [`store`] - Store gateway abstraction and the in-memory gateway

pub mod bizstore;
pub mod bizstore_builder;
pub mod bizstore_config;
pub mod collection;
pub mod common;
pub mod context;
pub mod errors;
pub mod repository;
pub mod sequence;
pub mod store;
