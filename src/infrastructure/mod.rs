//! Adapters implementing the domain ports.

pub mod gateway;
pub mod in_memory;
pub mod locks;
pub mod notifier;
pub mod revocation;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
