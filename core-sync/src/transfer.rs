//! # Item Transfer
//!
//! Moves one item from the source system into the destination store:
//!
//! 1. Download the full-fidelity artifact into `{staging_dir}/{hex(item_id)}/`,
//!    retried within the transfer budget.
//! 2. If that fails for a non-fatal reason, download once in degraded mode.
//! 3. Derive the object key: resolved path plus the artifact's extension.
//! 4. Upload with sanitised tags, retried within the transfer budget.
//! 5. Remove the staging directory, on success and on failure.
//!
//! A state entry is produced only for full-fidelity artifacts, or for
//! degraded ones whose item carries the fidelity opt-out tag. Other degraded
//! uploads stay unrecorded so the next run tries again.

use crate::detector::TransferCandidate;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::state::SyncStateEntry;
use crate::tags::build_tags;
use bridge_traits::{Clock, ContentItem, DestinationStore, SourceSystem};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub use core_runtime::config::DEFAULT_FIDELITY_OPT_OUT_TAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    Full,
    Degraded,
}

impl fmt::Display for Fidelity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fidelity::Full => write!(f, "full"),
            Fidelity::Degraded => write!(f, "degraded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub object_key: String,
    pub fidelity: Fidelity,
    /// `None` when the upload must not count as fully synced
    pub entry: Option<SyncStateEntry>,
}

#[derive(Clone)]
pub struct ItemTransfer {
    source: Arc<dyn SourceSystem>,
    store: Arc<dyn DestinationStore>,
    staging_dir: PathBuf,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    owners: Arc<HashMap<String, String>>,
    opt_out_tag: String,
}

impl ItemTransfer {
    pub fn new(
        source: Arc<dyn SourceSystem>,
        store: Arc<dyn DestinationStore>,
        staging_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            store,
            staging_dir: staging_dir.into(),
            retry,
            clock,
            owners: Arc::new(HashMap::new()),
            opt_out_tag: DEFAULT_FIDELITY_OPT_OUT_TAG.to_string(),
        }
    }

    /// User id to display name, used for the owner tag.
    pub fn with_owners(mut self, owners: HashMap<String, String>) -> Self {
        self.owners = Arc::new(owners);
        self
    }

    pub fn with_opt_out_tag(mut self, tag: impl Into<String>) -> Self {
        self.opt_out_tag = tag.into();
        self
    }

    #[instrument(skip(self, candidate), fields(path = %candidate.path, item_id = %candidate.item.id))]
    pub async fn transfer(&self, candidate: &TransferCandidate) -> Result<TransferOutcome> {
        let staging = StagingDir::create(&self.staging_dir, &candidate.item.id).await?;
        self.transfer_staged(candidate, staging.path()).await
    }

    async fn transfer_staged(
        &self,
        candidate: &TransferCandidate,
        staging: &Path,
    ) -> Result<TransferOutcome> {
        let item = &candidate.item;
        info!(
            project = %item.project_name,
            name = %item.name,
            size_mb = item.size,
            "Backing up item"
        );

        let (artifact, fidelity) = match self.download(item, true, staging).await {
            Ok(path) => (path, Fidelity::Full),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Full download failed, trying once in degraded mode");
                let path = self
                    .source
                    .download_item(&item.id, false, staging)
                    .await
                    .map_err(SyncError::Source)?;
                (path, Fidelity::Degraded)
            }
        };

        let object_key = object_key_for(&candidate.path, &artifact);
        let owner = item
            .owner_id
            .as_ref()
            .and_then(|id| self.owners.get(id))
            .map(String::as_str);
        let tags = build_tags(item, owner);

        let store = Arc::clone(&self.store);
        let key = object_key.clone();
        self.retry
            .run("upload", move || {
                let store = Arc::clone(&store);
                let artifact = artifact.clone();
                let key = key.clone();
                let tags = tags.clone();
                async move {
                    store
                        .upload_file(&artifact, &key, &tags)
                        .await
                        .map_err(SyncError::Destination)
                }
            })
            .await?;

        let record = fidelity == Fidelity::Full || item.has_tag(&self.opt_out_tag);
        let entry = record.then(|| SyncStateEntry::for_item(item, &object_key, self.clock.today()));

        if record {
            info!(object_key = %object_key, %fidelity, "Item stored");
        } else {
            warn!(
                object_key = %object_key,
                "Stored degraded artifact only, item stays pending for the next run"
            );
        }

        Ok(TransferOutcome {
            object_key,
            fidelity,
            entry,
        })
    }

    async fn download(&self, item: &ContentItem, full_fidelity: bool, staging: &Path) -> Result<PathBuf> {
        let source = Arc::clone(&self.source);
        let item_id = item.id.clone();
        let staging = staging.to_path_buf();

        debug!(full_fidelity, "Downloading item");
        self.retry
            .run("download", move || {
                let source = Arc::clone(&source);
                let item_id = item_id.clone();
                let staging = staging.clone();
                async move {
                    source
                        .download_item(&item_id, full_fidelity, &staging)
                        .await
                        .map_err(SyncError::Source)
                }
            })
            .await
    }
}

/// Directory name for one item's staging area.
///
/// Source ids are opaque, so the id is hex-encoded into a single path
/// segment that can never be `.`, `..` or contain a separator, and distinct
/// ids never share a directory.
pub fn staging_segment(item_id: &str) -> Result<String> {
    if item_id.is_empty() {
        return Err(SyncError::InvalidInput {
            field: "item_id".to_string(),
            message: "empty id cannot be staged".to_string(),
        });
    }
    Ok(item_id.bytes().map(|b| format!("{:02x}", b)).collect())
}

/// Per-item staging directory, removed when dropped.
///
/// Removal happens in `Drop` so an aborted task cleans up as well.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    async fn create(root: &Path, item_id: &str) -> Result<Self> {
        let path = root.join(staging_segment(item_id)?);
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(staging = %self.path.display(), error = %e, "Failed to remove staging directory");
            }
        }
    }
}

/// Resolved path plus the artifact extension, e.g. `prod/Sales/Q1/Report1.twbx`.
pub fn object_key_for(path: &str, artifact: &Path) -> String {
    match artifact.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", path, ext),
        _ => path.to_string(),
    }
}
