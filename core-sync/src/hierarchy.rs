//! # Project Hierarchy Index
//!
//! Resolves the flat project listing of one site into canonical
//! slash-separated paths.
//!
//! A root project `Sales` has path `Sales/`, its child `Q1` has path
//! `Sales/Q1/`, and an item `Report1` inside `Q1` on site `prod` resolves to
//! `prod/Sales/Q1/Report1`. Parent walks are guarded with a visited set, so a
//! malformed listing with cyclic parent links fails with
//! [`SyncError::HierarchyCycle`] instead of looping.

use crate::error::{Result, SyncError};
use bridge_traits::{ContentItem, ProjectNode};
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    nodes: HashMap<String, ProjectNode>,
    paths: HashMap<String, String>,
    children: HashMap<String, Vec<String>>,
    roots: Vec<String>,
}

impl HierarchyIndex {
    /// Builds the index, failing fast on cycles and dangling parent links.
    pub fn build(projects: Vec<ProjectNode>) -> Result<Self> {
        let mut nodes = HashMap::with_capacity(projects.len());
        let mut order = Vec::with_capacity(projects.len());

        for node in projects {
            if nodes.contains_key(&node.id) {
                warn!(project_id = %node.id, "Duplicate project id in listing, keeping first");
                continue;
            }
            order.push(node.id.clone());
            nodes.insert(node.id.clone(), node);
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut roots = Vec::new();

        for id in &order {
            let node = &nodes[id];
            match &node.parent_id {
                None => roots.push(id.clone()),
                Some(parent_id) if nodes.contains_key(parent_id) => {
                    children
                        .entry(parent_id.clone())
                        .or_default()
                        .push(id.clone());
                }
                Some(parent_id) => {
                    return Err(SyncError::UnknownParent {
                        project_id: id.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
            }
        }

        let mut paths = HashMap::with_capacity(nodes.len());
        for id in &order {
            resolve_path(id, &nodes, &mut paths)?;
        }

        Ok(Self {
            nodes,
            paths,
            children,
            roots,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Canonical path of a project, always ending in `/`.
    pub fn path_of(&self, project_id: &str) -> Option<&str> {
        self.paths.get(project_id).map(String::as_str)
    }

    /// Direct children of a project, or the roots when `parent_id` is `None`.
    pub fn children_of(&self, parent_id: Option<&str>) -> &[String] {
        match parent_id {
            None => &self.roots,
            Some(id) => self.children.get(id).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    /// The project itself plus every transitive descendant.
    pub fn subtree_of(&self, project_id: &str) -> Vec<String> {
        if !self.nodes.contains_key(project_id) {
            return Vec::new();
        }

        let mut visited = HashSet::new();
        let mut stack = vec![project_id.to_string()];
        let mut subtree = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().cloned());
            }
            subtree.push(id);
        }

        subtree
    }

    /// Looks up a project by its path; the trailing `/` is optional.
    pub fn find_by_path(&self, path: &str) -> Option<&str> {
        let wanted = normalize_project_path(path);
        self.paths
            .iter()
            .find(|(_, p)| **p == wanted)
            .map(|(id, _)| id.as_str())
    }

    /// `{site}/{project path}{item name}`
    pub fn item_path(&self, site: &str, item: &ContentItem) -> Result<String> {
        let project_path =
            self.path_of(&item.project_id)
                .ok_or_else(|| SyncError::UnknownProject {
                    item_id: item.id.clone(),
                    project_id: item.project_id.clone(),
                })?;
        Ok(format!("{}/{}{}", site, project_path, item.name))
    }
}

/// Appends the trailing `/` a configured project path may lack.
pub fn normalize_project_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn resolve_path(
    id: &str,
    nodes: &HashMap<String, ProjectNode>,
    paths: &mut HashMap<String, String>,
) -> Result<()> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut prefix = String::new();
    let mut current = Some(id.to_string());

    while let Some(cursor) = current {
        if let Some(known) = paths.get(&cursor) {
            prefix = known.clone();
            break;
        }
        if !visited.insert(cursor.clone()) {
            return Err(SyncError::HierarchyCycle { project_id: cursor });
        }
        let node = nodes
            .get(&cursor)
            .ok_or_else(|| SyncError::UnknownParent {
                project_id: id.to_string(),
                parent_id: cursor.clone(),
            })?;
        current = node.parent_id.clone();
        chain.push(cursor);
    }

    for cursor in chain.into_iter().rev() {
        prefix.push_str(&nodes[&cursor].name);
        prefix.push('/');
        paths.insert(cursor, prefix.clone());
    }

    Ok(())
}
