//! # Host Bridge Traits
//!
//! Port traits that host applications implement to plug a concrete content
//! source, object store and telemetry backend into the backup engine.
//!
//! ## Overview
//!
//! This crate defines the contract between the engine and its external
//! collaborators. The engine never talks to a vendor API directly; it only
//! calls these narrow capabilities.
//!
//! ## Traits
//!
//! ### Content & Storage
//! - [`SourceSystem`](source::SourceSystem) - Sites, projects, items and item downloads
//! - [`DestinationStore`](store::DestinationStore) - Documents, tagged uploads, timestamp refresh, listings
//! - [`StoreResolver`](store::StoreResolver) - Opens a store bound to a named bucket
//!
//! ### Telemetry
//! - [`MetricSender`](telemetry::MetricSender) - Fire-and-forget run metrics
//! - [`ErrorReporter`](telemetry::ErrorReporter) - Fire-and-forget error capture
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map vendor failures onto it so the engine can tell a missing key
//! (`NotFound`) from a fatal credential problem (`Unauthorized`) from a
//! retryable network hiccup (`Transient`).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds: downloads, uploads and
//! refreshes are issued concurrently from worker tasks.

pub mod error;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use source::{ContentItem, ProjectNode, Site, SourceSystem, SourceUser};
pub use store::{DestinationStore, ObjectSummary, ObjectTags, StoreResolver};
pub use telemetry::{ErrorContext, ErrorReporter, MetricSender, NoopTelemetry};
pub use time::{Clock, SystemClock};
