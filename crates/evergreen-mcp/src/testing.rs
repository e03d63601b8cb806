//! In-memory `EvergreenApi` for handler and server tests.

use std::sync::Mutex;

use async_trait::async_trait;
use evergreen_core::{EvergreenApi, Error, Result};
use serde_json::Value;

/// Serves canned payloads and records every call as a short string.
#[derive(Default)]
pub(crate) struct FakeApi {
    pub projects: Vec<Value>,
    pub patches: Vec<Value>,
    pub patch: Option<Value>,
    pub task: Option<Value>,
    pub waterfall: Vec<Value>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn task_or_missing(&self, task_id: &str) -> Result<Value> {
        self.task
            .clone()
            .ok_or_else(|| Error::NotFound(format!("Task not found: {}", task_id)))
    }
}

#[async_trait]
impl EvergreenApi for FakeApi {
    async fn get_projects(&self) -> Result<Vec<Value>> {
        self.record("projects".into());
        Ok(self.projects.clone())
    }

    async fn get_project(&self, project_id: &str) -> Result<Value> {
        self.record(format!("project:{}", project_id));
        Err(Error::NotFound(format!("Project not found: {}", project_id)))
    }

    async fn get_project_settings(&self, project_id: &str) -> Result<Value> {
        self.record(format!("settings:{}", project_id));
        Err(Error::NotFound(format!("Project settings not found: {}", project_id)))
    }

    async fn get_user_recent_patches(
        &self,
        user_id: &str,
        limit: u32,
        page: u32,
    ) -> Result<Vec<Value>> {
        self.record(format!("patches:{}:{}:{}", user_id, limit, page));
        Ok(self.patches.clone())
    }

    async fn get_patch_failed_tasks(&self, patch_id: &str) -> Result<Value> {
        self.record(format!("patch:{}", patch_id));
        self.patch
            .clone()
            .ok_or_else(|| Error::NotFound(format!("Patch not found: {}", patch_id)))
    }

    async fn get_version_with_failed_tasks(&self, version_id: &str) -> Result<Value> {
        self.record(format!("version:{}", version_id));
        Err(Error::NotFound(format!("Version not found: {}", version_id)))
    }

    async fn get_task_logs(&self, task_id: &str, execution: u32) -> Result<Value> {
        self.record(format!("logs:{}:{}", task_id, execution));
        self.task_or_missing(task_id)
    }

    async fn get_task_test_results(
        &self,
        task_id: &str,
        execution: u32,
        failed_only: bool,
        limit: u32,
    ) -> Result<Value> {
        self.record(format!("tests:{}:{}:{}:{}", task_id, execution, failed_only, limit));
        self.task_or_missing(task_id)
    }

    async fn get_waterfall_failed_tasks(
        &self,
        project_identifier: &str,
        variants: &[String],
        _statuses: &[String],
        waterfall_limit: u32,
    ) -> Result<Vec<Value>> {
        self.record(format!(
            "waterfall:{}:{}:{}",
            project_identifier,
            variants.join(","),
            waterfall_limit
        ));
        Ok(self.waterfall.clone())
    }
}
