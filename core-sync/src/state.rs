//! # Sync State
//!
//! The per-site record of what has already been stored, keyed by resolved
//! item path. It is the only source of truth for "was this transferred";
//! the destination listing is never consulted for equality checks.
//!
//! The document lives at `{site}/{state_file_name}` and is a JSON object
//! mapping path to entry:
//!
//! ```json
//! {
//!   "prod/Sales/Q1/Report1": {
//!     "id": "5",
//!     "name": "Report1",
//!     "created_at": "2024-01-01 00:00:00+0000",
//!     "updated_at": "2024-01-02 00:00:00+0000",
//!     "upload_date": "2024-01-03",
//!     "object_key": "prod/Sales/Q1/Report1.twbx"
//!   }
//! }
//! ```
//!
//! Saving replaces the whole document. There is no concurrency check: one
//! process owns a site's state for the duration of a run.

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use bridge_traits::{ContentItem, DestinationStore};
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Second precision with numeric offset, e.g. `2024-01-01 00:00:00+0000`
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub use core_runtime::config::DEFAULT_STATE_FILE_NAME;

pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.format(TIME_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateEntry {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    pub upload_date: String,
    pub object_key: String,
}

impl SyncStateEntry {
    pub fn for_item(item: &ContentItem, object_key: impl Into<String>, upload_date: NaiveDate) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            created_at: format_timestamp(&item.created_at),
            updated_at: format_timestamp(&item.updated_at),
            upload_date: upload_date.format(DATE_FORMAT).to_string(),
            object_key: object_key.into(),
        }
    }

    /// Exact match on id and both formatted timestamps.
    pub fn matches(&self, item: &ContentItem) -> bool {
        self.id == item.id
            && self.created_at == format_timestamp(&item.created_at)
            && self.updated_at == format_timestamp(&item.updated_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncState {
    entries: BTreeMap<String, SyncStateEntry>,
}

impl SyncState {
    pub fn get(&self, path: &str) -> Option<&SyncStateEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: SyncStateEntry) -> Option<SyncStateEntry> {
        self.entries.insert(path.into(), entry)
    }

    pub fn remove(&mut self, path: &str) -> Option<SyncStateEntry> {
        self.entries.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SyncStateEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON with sorted keys; unchanged state serialises identically.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

/// Loads and persists [`SyncState`] documents in a destination store.
pub struct SyncStateStore {
    store: Arc<dyn DestinationStore>,
    state_file_name: String,
    retry: RetryPolicy,
}

impl SyncStateStore {
    pub fn new(
        store: Arc<dyn DestinationStore>,
        state_file_name: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            state_file_name: state_file_name.into(),
            retry,
        }
    }

    pub fn document_key(&self, site: &str) -> String {
        format!("{}/{}", site, self.state_file_name)
    }

    /// A missing document yields an empty state; every other failure propagates.
    #[instrument(skip(self))]
    pub async fn load(&self, site: &str) -> Result<SyncState> {
        let key = self.document_key(site);
        let store = Arc::clone(&self.store);

        let fetched = self
            .retry
            .run("load_state", || {
                let store = Arc::clone(&store);
                let key = key.clone();
                async move { store.get_document(&key).await.map_err(SyncError::Destination) }
            })
            .await;

        let body = match fetched {
            Ok(body) => body,
            Err(e) if e.is_not_found() => {
                info!(key = %key, "No sync state document found, starting from empty state");
                return Ok(SyncState::default());
            }
            Err(e) => return Err(e),
        };

        let state = SyncState::from_json(&body).map_err(|e| SyncError::InvalidState {
            key: key.clone(),
            message: e.to_string(),
        })?;

        info!(key = %key, entries = state.len(), "Loaded sync state");
        Ok(state)
    }

    /// Writes the full document, replacing whatever was stored.
    #[instrument(skip(self, state), fields(entries = state.len()))]
    pub async fn save(&self, site: &str, state: &SyncState) -> Result<()> {
        let key = self.document_key(site);
        let body = Bytes::from(state.to_json().map_err(|e| SyncError::InvalidState {
            key: key.clone(),
            message: e.to_string(),
        })?);
        let store = Arc::clone(&self.store);

        self.retry
            .run("save_state", || {
                let store = Arc::clone(&store);
                let key = key.clone();
                let body = body.clone();
                async move {
                    store
                        .put_document(&key, body)
                        .await
                        .map_err(SyncError::Destination)
                }
            })
            .await?;

        debug!(key = %key, bytes = body.len(), "Sync state persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, ObjectSummary, ObjectTags};
    use chrono::TimeZone;
    use mockall::mock;
    use mockall::predicate::eq;
    use std::path::Path;

    mock! {
        Store {}

        #[async_trait]
        impl DestinationStore for Store {
            async fn put_document(&self, key: &str, body: Bytes) -> bridge_traits::error::Result<()>;
            async fn get_document(&self, key: &str) -> bridge_traits::error::Result<Bytes>;
            async fn upload_file(&self, local_path: &Path, key: &str, tags: &ObjectTags) -> bridge_traits::error::Result<()>;
            async fn refresh_timestamp(&self, key: &str) -> bridge_traits::error::Result<()>;
            async fn list_objects(&self, prefix: &str) -> bridge_traits::error::Result<Vec<ObjectSummary>>;
        }
    }

    fn item() -> ContentItem {
        let utc = FixedOffset::east_opt(0).unwrap();
        ContentItem {
            id: "5".to_string(),
            name: "Report1".to_string(),
            project_id: "q1".to_string(),
            project_name: "Q1".to_string(),
            site: "prod".to_string(),
            size: 2,
            owner_id: None,
            description: None,
            created_at: utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            tags: Default::default(),
        }
    }

    fn sample_state() -> SyncState {
        let mut state = SyncState::default();
        state.insert(
            "prod/Sales/Q1/Report1",
            SyncStateEntry::for_item(
                &item(),
                "prod/Sales/Q1/Report1.twbx",
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            ),
        );
        state
    }

    #[test]
    fn test_entry_format_and_matching() {
        let entry = SyncStateEntry::for_item(
            &item(),
            "prod/Sales/Q1/Report1.twbx",
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        );
        assert_eq!(entry.created_at, "2024-01-01 00:00:00+0000");
        assert_eq!(entry.updated_at, "2024-01-02 00:00:00+0000");
        assert_eq!(entry.upload_date, "2024-01-03");
        assert!(entry.matches(&item()));

        let mut moved = item();
        moved.updated_at = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 1, 0, 0)
            .unwrap();
        // Same instant, different offset: counts as changed.
        assert!(!entry.matches(&moved));

        let mut replaced = item();
        replaced.id = "6".to_string();
        assert!(!entry.matches(&replaced));
    }

    #[test]
    fn test_json_layout() {
        let json: serde_json::Value =
            serde_json::from_slice(&sample_state().to_json().unwrap()).unwrap();
        let entry = &json["prod/Sales/Q1/Report1"];
        assert_eq!(entry["id"], "5");
        assert_eq!(entry["object_key"], "prod/Sales/Q1/Report1.twbx");
        assert_eq!(entry["created_at"], "2024-01-01 00:00:00+0000");
    }

    #[tokio::test]
    async fn test_load_missing_document_is_empty_state() {
        let mut store = MockStore::new();
        store
            .expect_get_document()
            .with(eq("prod/upload_state.json"))
            .times(1)
            .returning(|key| Err(BridgeError::NotFound(key.to_string())));

        let states = SyncStateStore::new(Arc::new(store), DEFAULT_STATE_FILE_NAME, RetryPolicy::new(3));
        let state = states.load("prod").await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_load_propagates_other_failures() {
        let mut store = MockStore::new();
        store
            .expect_get_document()
            .times(1)
            .returning(|_| Err(BridgeError::Unauthorized("expired".to_string())));

        let states = SyncStateStore::new(Arc::new(store), DEFAULT_STATE_FILE_NAME, RetryPolicy::new(3));
        let err = states.load("prod").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_document() {
        let mut store = MockStore::new();
        store
            .expect_get_document()
            .returning(|_| Ok(Bytes::from_static(b"not json")));

        let states = SyncStateStore::new(Arc::new(store), DEFAULT_STATE_FILE_NAME, RetryPolicy::new(1));
        let err = states.load("prod").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_save_retries_and_writes_full_document() {
        let expected = Bytes::from(sample_state().to_json().unwrap());
        let mut store = MockStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_put_document()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(BridgeError::Transient("503".to_string())));
        store
            .expect_put_document()
            .with(eq("prod/upload_state.json"), eq(expected))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let states = SyncStateStore::new(Arc::new(store), DEFAULT_STATE_FILE_NAME, RetryPolicy::new(3));
        states.save("prod", &sample_state()).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_returns_saved_state() {
        let body = Bytes::from(sample_state().to_json().unwrap());
        let mut store = MockStore::new();
        store
            .expect_get_document()
            .returning(move |_| Ok(body.clone()));

        let states = SyncStateStore::new(Arc::new(store), DEFAULT_STATE_FILE_NAME, RetryPolicy::new(1));
        assert_eq!(states.load("prod").await.unwrap(), sample_state());
    }
}
