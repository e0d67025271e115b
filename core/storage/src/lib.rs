//! Durable key-value store abstraction for Strongbox.
//!
//! The vault core persists into any string-keyed store that exposes
//! `get/set/remove`. This crate defines that seam and ships two adapters:
//! an in-memory store (ephemeral sessions and tests) and a directory-backed
//! store with one file per key.
//!
//! # Design Principles
//! - Store isolation: no vault or crypto logic in adapters
//! - Async operations: all I/O operations are async
//! - No schema: values are opaque strings to the store

pub mod local;
pub mod memory;
pub mod registry;
pub mod store;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use store::KeyValueStore;
