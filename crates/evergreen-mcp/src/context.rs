//! Per-server context handed to every tool and resource handler.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use evergreen_core::workspace::detect_project;
use evergreen_core::EvergreenApi;

/// Everything a request needs besides its own arguments.
#[derive(Clone)]
pub struct EvergreenContext {
    pub api: Arc<dyn EvergreenApi>,
    /// Evergreen user the session is authenticated as.
    pub user_id: String,
    pub default_project_id: Option<String>,
    pub workspace_dir: Option<PathBuf>,
    pub projects_for_directory: BTreeMap<String, String>,
}

impl EvergreenContext {
    pub fn new(api: Arc<dyn EvergreenApi>, user_id: impl Into<String>) -> Self {
        Self {
            api,
            user_id: user_id.into(),
            default_project_id: None,
            workspace_dir: None,
            projects_for_directory: BTreeMap::new(),
        }
    }

    pub fn with_default_project(mut self, project_id: Option<String>) -> Self {
        self.default_project_id = project_id;
        self
    }

    pub fn with_workspace(
        mut self,
        workspace_dir: Option<PathBuf>,
        projects_for_directory: BTreeMap<String, String>,
    ) -> Self {
        self.workspace_dir = workspace_dir;
        self.projects_for_directory = projects_for_directory;
        self
    }

    /// The explicit project if given, else the configured default, else the
    /// project mapped to the workspace directory.
    pub fn effective_project(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(project) = explicit.filter(|p| !p.is_empty()) {
            return Some(project.to_string());
        }
        if let Some(project) = &self.default_project_id {
            return Some(project.clone());
        }
        let dir = self.workspace_dir.as_ref()?;
        detect_project(&self.projects_for_directory, dir)
    }
}

impl std::fmt::Debug for EvergreenContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvergreenContext")
            .field("user_id", &self.user_id)
            .field("default_project_id", &self.default_project_id)
            .field("workspace_dir", &self.workspace_dir)
            .field("projects_for_directory", &self.projects_for_directory.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    fn context() -> EvergreenContext {
        EvergreenContext::new(Arc::new(FakeApi::default()), "jdoe")
    }

    #[test]
    fn test_explicit_project_wins() {
        let ctx = context().with_default_project(Some("mms".into()));
        assert_eq!(ctx.effective_project(Some("mongo")), Some("mongo".into()));
        assert_eq!(ctx.effective_project(Some("")), Some("mms".into()));
        assert_eq!(ctx.effective_project(None), Some("mms".into()));
    }

    #[test]
    fn test_workspace_mapping_is_last_resort() {
        let mut mappings = BTreeMap::new();
        mappings.insert("/work/mms".to_string(), "mms".to_string());
        let ctx = context().with_workspace(Some(PathBuf::from("/work/mms/server")), mappings);

        assert_eq!(ctx.effective_project(None), Some("mms".into()));
        assert_eq!(context().effective_project(None), None);
    }

    #[test]
    fn test_debug_omits_api() {
        let rendered = format!("{:?}", context());
        assert!(rendered.contains("jdoe"));
    }
}
