//! Destination Store Abstractions
//!
//! Provides the object-store operations the engine needs: whole-document
//! get/put for persisted sync state, tagged file uploads, in-place timestamp
//! refresh and prefix listings.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

/// Tags attached to an uploaded object, ordered by key
pub type ObjectTags = BTreeMap<String, String>;

/// Listing entry of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Destination store port.
///
/// One instance is bound to one bucket (or equivalent namespace). Every
/// remote call carries its own request-level timeout in the implementation.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::store::DestinationStore;
///
/// async fn touch_all(store: &dyn DestinationStore, prefix: &str) -> Result<()> {
///     for object in store.list_objects(prefix).await? {
///         store.refresh_timestamp(&object.key).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Write a whole document, replacing any previous content
    async fn put_document(&self, key: &str, body: Bytes) -> Result<()>;

    /// Read a whole document
    ///
    /// Returns [`BridgeError::NotFound`](crate::BridgeError::NotFound) when the
    /// key does not exist.
    async fn get_document(&self, key: &str) -> Result<Bytes>;

    /// Upload a local file under `key` with the given tags
    async fn upload_file(&self, local_path: &Path, key: &str, tags: &ObjectTags) -> Result<()>;

    /// Copy an object onto itself so its last-modified time advances
    async fn refresh_timestamp(&self, key: &str) -> Result<()>;

    /// List every object whose key starts with `prefix`
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>>;
}

/// Opens a [`DestinationStore`] bound to a named bucket.
#[async_trait]
pub trait StoreResolver: Send + Sync {
    async fn open_bucket(&self, bucket: &str) -> Result<Arc<dyn DestinationStore>>;
}
