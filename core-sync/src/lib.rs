//! # Incremental Sync Engine
//!
//! Incrementally backs up content items from a hierarchical source system
//! into an object store.
//!
//! ## Overview
//!
//! Each site run reconciles three views: the live source listing, the
//! persisted per-site sync state, and the destination store's own objects.
//! Unchanged items are never transferred again, removed items keep their
//! stored objects alive through retention refreshes, and one failing item
//! never stops the rest of the batch.
//!
//! ## Components
//!
//! - **Hierarchy Index** (`hierarchy`): Resolves project trees into canonical paths
//! - **Sync State** (`state`): Per-site record of stored items and its persistence
//! - **Change Detector** (`detector`): Diffs listing against state within a scope
//! - **Retry Policy** (`retry`): Bounded-attempt executor with optional backoff
//! - **Worker Pool** (`pool`): Bounded-concurrency fan-out with failure isolation
//! - **Item Transfer** (`transfer`, `tags`): Download, tag and upload one item
//! - **Retention Sweeper** (`sweeper`): Refreshes timestamps of stale objects
//! - **Result Sinks** (`sink`, `report`): Append-only outcome channels and run report
//! - **Sync Coordinator** (`coordinator`): Runs the phases above for one site

pub mod coordinator;
pub mod detector;
pub mod error;
pub mod hierarchy;
pub mod pool;
pub mod report;
pub mod retry;
pub mod sink;
pub mod state;
pub mod sweeper;
pub mod tags;
pub mod transfer;

pub use coordinator::{SiteBackupRequest, SyncConfig, SyncCoordinator};
pub use detector::{ChangeDetector, ChangeKind, ChangeSet, FieldChange, SyncScope, Tombstone, TransferCandidate};
pub use error::{Result, SyncError};
pub use hierarchy::HierarchyIndex;
pub use pool::{PoolFailure, PoolReport, TransferWorkerPool};
pub use report::{RunId, RunReport, SiteRunStatus, SiteRunSummary, BYTES_PER_MB};
pub use retry::RetryPolicy;
pub use sink::{result_channel, FailureRecord, ItemSummary, ResultCollector, ResultSink};
pub use state::{SyncState, SyncStateEntry, SyncStateStore};
pub use sweeper::{RetentionSweeper, SweepSummary};
pub use transfer::{Fidelity, ItemTransfer, TransferOutcome};
