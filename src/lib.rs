//! Workspace umbrella crate.
//!
//! Re-exports the individual workspace crates so host applications can depend
//! on `backup-workspace` alone and reach the service façade, the sync engine,
//! the runtime helpers and the bridge traits they must implement.

pub use bridge_traits;
pub use core_runtime;
pub use core_service;
pub use core_sync;
