//! # strata-core
//!
//! Core abstractions for the strata workflow-output catalog engine.
//!
//! This crate provides the foundational types and traits used across all
//! strata components:
//!
//! - **Identifiers**: strongly-typed names for workflows, collections,
//!   and runs
//! - **Storage**: the CAS object-storage contract with memory and local
//!   filesystem backends
//! - **Scoped layout**: the documented catalog path layout under a
//!   store prefix
//! - **Locking**: the distributed lock used as the bootstrap InitLock
//! - **Errors**: shared error definitions and result types
//! - **Observability**: logging initialization and span helpers
//!
//! `strata-core` is the only crate allowed to define shared primitives;
//! all cross-component interaction happens via the contracts here.

pub mod error;
pub mod id;
pub mod lock;
pub mod observability;
pub mod scoped;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{CollectionId, CollectionTag, PassId, RunId, WorkflowName};
    pub use crate::lock::{LockGuard, LockInfo, StoreLock};
    pub use crate::scoped::ScopedStorage;
    pub use crate::storage::{
        LocalFsBackend, MemoryBackend, ObjectMeta, StorageBackend, TimeoutBackend,
        WritePrecondition, WriteResult,
    };
}

pub use error::{Error, Result};
pub use id::{CollectionId, CollectionTag, PassId, RunId, WorkflowName};
pub use lock::{LockGuard, LockInfo, StoreLock};
pub use observability::{init_logging, LogFormat};
pub use scoped::ScopedStorage;
pub use storage::{
    LocalFsBackend, MemoryBackend, ObjectMeta, StorageBackend, TimeoutBackend, WritePrecondition,
    WriteResult,
};
