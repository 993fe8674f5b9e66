//! Source System Abstractions
//!
//! Describes the content source being backed up: a set of sites, each holding
//! a forest of projects, each project holding content items that can be
//! downloaded to local staging storage.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A top-level tenant on the source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub content_url: String,
}

impl Site {
    pub fn new(name: impl Into<String>, content_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_url: content_url.into(),
        }
    }
}

/// A node of the project forest. `parent_id == None` marks a root project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
}

impl ProjectNode {
    pub fn root(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            name: name.into(),
        }
    }

    pub fn child(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent_id.into()),
            name: name.into(),
        }
    }
}

/// Snapshot of one syncable unit, taken at listing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Source-assigned id. Replacing an item on the source yields a new id.
    pub id: String,
    pub name: String,
    pub project_id: String,
    /// Display name of the owning project, used for reporting only
    pub project_name: String,
    pub site: String,
    /// Size as reported by the source, in megabytes
    pub size: u64,
    pub owner_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
    pub tags: BTreeSet<String>,
}

impl ContentItem {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// A user account on the current site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    pub id: String,
    pub name: String,
}

/// Source system port.
///
/// Implementations are scoped: [`enter_site`](SourceSystem::enter_site) selects
/// the site that every subsequent listing and download refers to. The engine
/// only enters one site at a time.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::SourceSystem;
///
/// async fn count_items(source: &dyn SourceSystem) -> Result<usize> {
///     let sites = source.list_sites().await?;
///     let mut total = 0;
///     for site in &sites {
///         source.enter_site(site).await?;
///         total += source.list_items().await?.len();
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait SourceSystem: Send + Sync {
    /// List every site visible to the authenticated account
    async fn list_sites(&self) -> Result<Vec<Site>>;

    /// Scope subsequent calls to `site`
    async fn enter_site(&self, site: &Site) -> Result<()>;

    /// List users of the current site
    async fn list_users(&self) -> Result<Vec<SourceUser>>;

    /// List all projects of the current site
    async fn list_projects(&self) -> Result<Vec<ProjectNode>>;

    /// List all content items of the current site
    async fn list_items(&self) -> Result<Vec<ContentItem>>;

    /// Download an item to local staging storage.
    ///
    /// `staging_path` is the extension-less base path reserved for this item;
    /// the implementation returns the path of the file it actually wrote,
    /// whose extension reflects the fidelity of the download.
    async fn download_item(
        &self,
        item_id: &str,
        full_fidelity: bool,
        staging_path: &Path,
    ) -> Result<PathBuf>;
}
