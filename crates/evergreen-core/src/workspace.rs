//! Project auto-detection from the workspace directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::config::expand_home;

/// Resolve the project configured for `workspace_dir`.
///
/// An exact directory match wins; otherwise the longest configured ancestor
/// of the workspace is used.
pub fn detect_project(
    projects_for_directory: &BTreeMap<String, String>,
    workspace_dir: &Path,
) -> Option<String> {
    if projects_for_directory.is_empty() {
        debug!("No projects_for_directory mappings configured");
        return None;
    }

    let workspace = normalize(&expand_home(workspace_dir));
    debug!(workspace = ?workspace, "Checking workspace for project mapping");

    let mut best: Option<(usize, &String)> = None;
    for (dir, project_id) in projects_for_directory {
        let configured = normalize(&expand_home(Path::new(dir)));

        if configured == workspace {
            info!(workspace = ?workspace, project = %project_id, "Exact project match");
            return Some(project_id.clone());
        }

        if workspace.starts_with(&configured) {
            let depth = configured.components().count();
            if best.map_or(true, |(d, _)| depth > d) {
                best = Some((depth, project_id));
            }
        }
    }

    match best {
        Some((_, project_id)) => {
            info!(project = %project_id, "Parent directory project match");
            Some(project_id.clone())
        }
        None => {
            debug!(workspace = ?workspace, "No project match for workspace");
            None
        }
    }
}

/// Lexically normalize a path (drop `.`, resolve `..`) without touching disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
