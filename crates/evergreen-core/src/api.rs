//! Traits at the seams between the MCP layer, the GraphQL client and the
//! authentication manager.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Task statuses treated as failures when none are given.
pub const DEFAULT_FAILED_STATUSES: &[&str] = &["failed", "system-failed", "task-timed-out"];

/// Read access to the Evergreen API.
///
/// Results are returned as raw JSON objects; shaping them for display is the
/// caller's job.
#[async_trait]
pub trait EvergreenApi: Send + Sync {
    /// All projects, flattened out of their display groups.
    async fn get_projects(&self) -> Result<Vec<Value>>;

    /// A single project by identifier.
    async fn get_project(&self, project_id: &str) -> Result<Value>;

    /// Settings and configuration of a project.
    async fn get_project_settings(&self, project_id: &str) -> Result<Value>;

    /// One page of a user's recent patches. `limit` is capped at 50.
    async fn get_user_recent_patches(&self, user_id: &str, limit: u32, page: u32)
        -> Result<Vec<Value>>;

    /// A patch together with its failed tasks.
    async fn get_patch_failed_tasks(&self, patch_id: &str) -> Result<Value>;

    /// A version together with its failed tasks.
    async fn get_version_with_failed_tasks(&self, version_id: &str) -> Result<Value>;

    /// Task log entries of one execution.
    async fn get_task_logs(&self, task_id: &str, execution: u32) -> Result<Value>;

    /// Test results of one task execution.
    async fn get_task_test_results(
        &self,
        task_id: &str,
        execution: u32,
        failed_only: bool,
        limit: u32,
    ) -> Result<Value>;

    /// The most recent waterfall version with failures across `variants`.
    ///
    /// Returns at most one merged version.
    async fn get_waterfall_failed_tasks(
        &self,
        project_identifier: &str,
        variants: &[String],
        statuses: &[String],
        waterfall_limit: u32,
    ) -> Result<Vec<Value>>;
}

/// Source of fresh bearer tokens for clients whose token was rejected.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a new access token from the identity provider.
    async fn refresh_access_token(&self) -> Result<String>;
}
