//! # Serial storage
//!
//! Implementations of the [`SerialStore`](crate::service::SerialStore)
//! port. The in-memory store backs tests and local development; the
//! file-backed store survives restarts and is safe against concurrent
//! allocators, including a second process sharing the same file.

pub mod file;
pub mod memory;

pub use file::FileSerialStore;
pub use memory::MemorySerialStore;
