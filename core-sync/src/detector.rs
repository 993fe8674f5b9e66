//! # Change Detection
//!
//! Three-way diff between the live source listing, the persisted
//! [`SyncState`] and the inclusion scope of the current job.
//!
//! - Items without a state entry are **new**.
//! - Items whose entry matches on id, `created_at` and `updated_at` are
//!   **unchanged** and skipped.
//! - Items whose entry differs are **replaced** (id changed) or
//!   **modified** (a timestamp changed).
//! - State entries inside the scope with no matching live item become
//!   **tombstones**. Entries outside a project-filtered scope are never
//!   tombstoned.

use crate::error::SyncError;
use crate::hierarchy::{normalize_project_path, HierarchyIndex};
use crate::state::{format_timestamp, SyncState, SyncStateEntry};
use bridge_traits::ContentItem;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub previous: String,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Replaced { previous_id: String },
    Modified { changes: Vec<FieldChange> },
}

#[derive(Debug, Clone)]
pub struct TransferCandidate {
    pub item: ContentItem,
    pub path: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub path: String,
    pub object_key: String,
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    pub candidates: Vec<TransferCandidate>,
    pub tombstones: Vec<Tombstone>,
    pub unchanged: usize,
    /// Items whose path could not be resolved, with the reason
    pub unresolved: Vec<(ContentItem, SyncError)>,
}

impl ChangeSet {
    pub fn is_noop(&self) -> bool {
        self.candidates.is_empty() && self.tombstones.is_empty()
    }
}

/// Which part of a site a job covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    Site,
    Projects {
        project_ids: HashSet<String>,
        /// `{site}/{project path}` of each selected project
        path_prefixes: Vec<String>,
    },
}

impl SyncScope {
    /// Expands configured project paths into their full subtrees.
    ///
    /// An empty list selects the whole site. Unknown paths are logged and
    /// ignored.
    pub fn resolve(index: &HierarchyIndex, site: &str, project_paths: &[String]) -> Self {
        if project_paths.is_empty() {
            return SyncScope::Site;
        }

        let mut project_ids = HashSet::new();
        let mut path_prefixes = Vec::new();

        for raw in project_paths {
            let path = normalize_project_path(raw);
            match index.find_by_path(&path) {
                Some(project_id) => {
                    project_ids.extend(index.subtree_of(project_id));
                    path_prefixes.push(format!("{}/{}", site, path));
                }
                None => warn!(site, project = %path, "Project not found"),
            }
        }

        info!(
            site,
            projects = project_paths.len(),
            project_ids = project_ids.len(),
            "Backup restricted to selected projects"
        );

        SyncScope::Projects {
            project_ids,
            path_prefixes,
        }
    }

    pub fn includes_project(&self, project_id: &str) -> bool {
        match self {
            SyncScope::Site => true,
            SyncScope::Projects { project_ids, .. } => project_ids.contains(project_id),
        }
    }

    pub fn covers_path(&self, path: &str) -> bool {
        match self {
            SyncScope::Site => true,
            SyncScope::Projects { path_prefixes, .. } => {
                path_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
            }
        }
    }
}

pub struct ChangeDetector<'a> {
    index: &'a HierarchyIndex,
    site: &'a str,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(index: &'a HierarchyIndex, site: &'a str) -> Self {
        Self { index, site }
    }

    pub fn detect(&self, items: Vec<ContentItem>, state: &SyncState, scope: &SyncScope) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut live_paths = HashSet::new();

        for item in items {
            if !scope.includes_project(&item.project_id) {
                continue;
            }

            let path = match self.index.item_path(self.site, &item) {
                Ok(path) => path,
                Err(e) => {
                    warn!(site = self.site, item_id = %item.id, error = %e, "Cannot resolve item path");
                    changes.unresolved.push((item, e));
                    continue;
                }
            };

            if !live_paths.insert(path.clone()) {
                warn!(path = %path, item_id = %item.id, "Duplicate item path in listing, keeping first");
                continue;
            }

            match state.get(&path) {
                None => {
                    debug!(path = %path, "New item");
                    changes.candidates.push(TransferCandidate {
                        item,
                        path,
                        change: ChangeKind::New,
                    });
                }
                Some(entry) if entry.matches(&item) => {
                    debug!(path = %path, "Already stored with the same metadata");
                    changes.unchanged += 1;
                }
                Some(entry) => {
                    let change = classify(entry, &item);
                    log_change(&path, &change);
                    changes.candidates.push(TransferCandidate { item, path, change });
                }
            }
        }

        for (path, entry) in state.iter() {
            if scope.covers_path(path) && !live_paths.contains(path) {
                info!(path = %path, object_key = %entry.object_key, "Item no longer exists in source");
                changes.tombstones.push(Tombstone {
                    path: path.clone(),
                    object_key: entry.object_key.clone(),
                });
            }
        }

        changes
    }
}

fn classify(entry: &SyncStateEntry, item: &ContentItem) -> ChangeKind {
    if entry.id != item.id {
        return ChangeKind::Replaced {
            previous_id: entry.id.clone(),
        };
    }

    let mut changes = Vec::new();
    let created_at = format_timestamp(&item.created_at);
    if entry.created_at != created_at {
        changes.push(FieldChange {
            field: "created_at",
            previous: entry.created_at.clone(),
            current: created_at,
        });
    }
    let updated_at = format_timestamp(&item.updated_at);
    if entry.updated_at != updated_at {
        changes.push(FieldChange {
            field: "updated_at",
            previous: entry.updated_at.clone(),
            current: updated_at,
        });
    }
    ChangeKind::Modified { changes }
}

fn log_change(path: &str, change: &ChangeKind) {
    match change {
        ChangeKind::Replaced { previous_id } => {
            info!(path, previous_id = %previous_id, "Item id changed, item was replaced");
        }
        ChangeKind::Modified { changes } => {
            for c in changes {
                info!(path, field = c.field, previous = %c.previous, current = %c.current, "Item changed");
            }
        }
        ChangeKind::New => {}
    }
}
