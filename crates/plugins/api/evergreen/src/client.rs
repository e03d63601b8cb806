//! Evergreen GraphQL client implementation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evergreen_core::{EvergreenApi, Error, Result, TokenRefresher, DEFAULT_FAILED_STATUSES};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::queries;
use crate::USER_AGENT;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Test statuses requested when only failures are wanted.
const FAILED_TEST_STATUSES: &[&str] = &["fail", "failed"];

/// Maximum page size for patch listings.
const MAX_PATCH_LIMIT: u32 = 50;

/// How requests authenticate.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// OIDC access token.
    Bearer(String),
    /// Evergreen user and API key.
    ApiKey { user: String, api_key: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(***)"),
            Credentials::ApiKey { user, .. } => write!(f, "ApiKey {{ user: {:?} }}", user),
        }
    }
}

impl Credentials {
    fn headers(&self) -> Result<HeaderMap> {
        let value = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|_| Error::Config("credentials contain invalid header characters".into()))
        };

        let mut headers = HeaderMap::new();
        match self {
            Credentials::Bearer(token) => {
                let mut auth = value(&format!("Bearer {}", token))?;
                auth.set_sensitive(true);
                headers.insert(AUTHORIZATION, auth);
            }
            Credentials::ApiKey { user, api_key } => {
                headers.insert(HeaderName::from_static("api-user"), value(user)?);
                let mut key = value(api_key)?;
                key.set_sensitive(true);
                headers.insert(HeaderName::from_static("api-key"), key);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// Evergreen GraphQL API client.
pub struct EvergreenGraphQlClient {
    endpoint: String,
    credentials: RwLock<Credentials>,
    connection: RwLock<Option<reqwest::Client>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl EvergreenGraphQlClient {
    /// Create a client. Call [`connect`](Self::connect) before querying.
    pub fn new(endpoint: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: RwLock::new(credentials),
            connection: RwLock::new(None),
            refresher: None,
        }
    }

    /// Create and connect a client.
    pub async fn connected(endpoint: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let client = Self::new(endpoint, credentials);
        client.connect().await?;
        Ok(client)
    }

    /// Refresh rejected bearer tokens through `refresher`.
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the HTTP connection with the current credentials.
    pub async fn connect(&self) -> Result<()> {
        let headers = self.credentials.read().await.headers()?;
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        *self.connection.write().await = Some(http);
        debug!(endpoint = %self.endpoint, "GraphQL client connected");
        Ok(())
    }

    /// Drop the HTTP connection.
    pub async fn close(&self) {
        if self.connection.write().await.take().is_some() {
            debug!("GraphQL client closed");
        }
    }

    /// Run a GraphQL document and return its `data`.
    ///
    /// A 401 on a bearer-authenticated client triggers one token refresh,
    /// a reconnect, and a single retry.
    pub async fn execute(&self, query: &str, variables: Value) -> Result<Value> {
        let body = json!({ "query": query, "variables": variables });

        match self.send(&body).await {
            Err(e) if e.is_unauthorized() => {
                if !self.try_refresh().await {
                    return Err(e);
                }
                info!("Retrying query after token refresh");
                self.send(&body).await.inspect_err(|e| {
                    error!(error = %e, "GraphQL query failed after token refresh");
                })
            }
            other => other,
        }
    }

    async fn send(&self, body: &Value) -> Result<Value> {
        let http = self
            .connection
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Config("GraphQL client not connected".into()))?;

        let response = http
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(self.endpoint.clone())
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let message = response.text().await.unwrap_or_default();
            warn!(status = status_code, message = %message, "Evergreen API error response");
            return Err(Error::from_status(status_code, message));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::InvalidData(format!("Failed to parse response: {}", e)))?;
        let data = extract_data(payload)?;
        debug!(chars = data.to_string().len(), "Query executed successfully");
        Ok(data)
    }

    async fn try_refresh(&self) -> bool {
        let Some(refresher) = &self.refresher else {
            debug!("No token refresher configured");
            return false;
        };
        if !matches!(*self.credentials.read().await, Credentials::Bearer(_)) {
            return false;
        }

        info!("Access token rejected by server, attempting refresh");
        let token = match refresher.refresh_access_token().await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Error refreshing token");
                return false;
            }
        };

        *self.credentials.write().await = Credentials::Bearer(token);
        self.close().await;
        match self.connect().await {
            Ok(()) => {
                info!("Token refreshed and client reconnected");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to reconnect after token refresh");
                false
            }
        }
    }

    /// One variant's waterfall query.
    async fn waterfall_for_variant(
        &self,
        project_identifier: &str,
        variant: &str,
        statuses: &[String],
        waterfall_limit: u32,
    ) -> Result<Vec<Value>> {
        let variables = json!({
            "options": {
                "projectIdentifier": project_identifier,
                "limit": waterfall_limit,
            },
            "tasksOptions": {
                "variant": variant,
                "statuses": statuses,
            },
        });

        let result = self
            .execute(queries::GET_WATERFALL_FAILED_TASKS, variables)
            .await
            .inspect_err(|e| {
                error!(variant = %variant, error = %e, "Error fetching waterfall failed tasks");
            })?;

        Ok(result
            .pointer("/waterfall/flattenedVersions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

/// Pull `data` out of a GraphQL response, surfacing `errors`.
fn extract_data(mut payload: Value) -> Result<Value> {
    if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .collect();
            return Err(Error::GraphQl(messages.join("; ")));
        }
    }

    match payload.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(Error::InvalidData("GraphQL response has no data".into())),
    }
}

/// Take a non-null object at `key` or report `what` as missing.
fn required(mut data: Value, key: &str, what: &str, id: &str) -> Result<Value> {
    match data.get_mut(key).map(Value::take) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(Error::NotFound(format!("{} not found: {}", what, id))),
    }
}

fn count_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// A waterfall version accumulating tasks across variants.
struct MergedVersion {
    fields: Map<String, Value>,
    start_time: String,
    task_ids: BTreeSet<String>,
    tasks: Vec<Value>,
    variants: BTreeSet<String>,
}

impl MergedVersion {
    fn into_value(self) -> Value {
        let mut fields = self.fields;
        fields.insert("tasks".into(), Value::Array(self.tasks));
        fields.insert(
            "variants".into(),
            Value::Array(self.variants.into_iter().map(Value::String).collect()),
        );
        Value::Object(fields)
    }
}

/// Merge per-variant waterfall versions and keep the newest failing one.
///
/// Versions without a start time or without tasks are ignored. Tasks are
/// de-duplicated by id across variants.
fn merge_waterfall(per_variant: Vec<(String, Vec<Value>)>) -> Option<Value> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, MergedVersion> = HashMap::new();

    for (variant, versions) in per_variant {
        for version in versions {
            let start_time = match version.get("startTime").and_then(Value::as_str) {
                Some(s) if !s.is_empty() => s.to_string(),
                _ => continue,
            };
            let tasks = match version.pointer("/tasks/data").and_then(Value::as_array) {
                Some(tasks) if !tasks.is_empty() => tasks,
                _ => continue,
            };

            let id = version
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();

            let entry = merged.entry(id.clone()).or_insert_with(|| {
                order.push(id.clone());
                let mut fields = Map::new();
                fields.insert("id".into(), Value::String(id.clone()));
                for key in ["revision", "branch", "startTime", "finishTime"] {
                    fields.insert(
                        key.into(),
                        version.get(key).cloned().unwrap_or(Value::Null),
                    );
                }
                MergedVersion {
                    fields,
                    start_time,
                    task_ids: BTreeSet::new(),
                    tasks: Vec::new(),
                    variants: BTreeSet::new(),
                }
            });

            for task in tasks {
                let task_id = task
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if entry.task_ids.insert(task_id) {
                    entry.tasks.push(task.clone());
                }
            }
            entry.variants.insert(variant.clone());
        }
    }

    // first-seen wins on equal start times
    let mut newest: Option<&String> = None;
    for id in &order {
        let is_newer = match newest {
            None => true,
            Some(best) => merged[id].start_time > merged[best].start_time,
        };
        if is_newer {
            newest = Some(id);
        }
    }

    let newest = newest?.clone();
    merged.remove(&newest).map(MergedVersion::into_value)
}

#[async_trait]
impl EvergreenApi for EvergreenGraphQlClient {
    async fn get_projects(&self) -> Result<Vec<Value>> {
        let result = self.execute(queries::GET_PROJECTS, json!({})).await?;

        let projects: Vec<Value> = result
            .get("projects")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|group| group.get("projects").and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect();

        info!(count = projects.len(), "Retrieved projects");
        Ok(projects)
    }

    async fn get_project(&self, project_id: &str) -> Result<Value> {
        let result = self
            .execute(queries::GET_PROJECT, json!({ "projectId": project_id }))
            .await?;
        let project = required(result, "project", "Project", project_id)?;

        let display_name = project
            .get("displayName")
            .and_then(Value::as_str)
            .unwrap_or(project_id);
        info!(project = %display_name, "Retrieved project details");
        Ok(project)
    }

    async fn get_project_settings(&self, project_id: &str) -> Result<Value> {
        let result = self
            .execute(queries::GET_PROJECT_SETTINGS, json!({ "projectId": project_id }))
            .await?;
        let settings = required(result, "projectSettings", "Project settings", project_id)?;

        info!(project = %project_id, "Retrieved project settings");
        Ok(settings)
    }

    async fn get_user_recent_patches(
        &self,
        user_id: &str,
        limit: u32,
        page: u32,
    ) -> Result<Vec<Value>> {
        let variables = json!({
            "userId": user_id,
            "limit": limit.min(MAX_PATCH_LIMIT),
            "page": page,
        });
        let result = self
            .execute(queries::GET_USER_RECENT_PATCHES, variables)
            .await?;

        let patches = result
            .pointer("/user/patches/patches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        info!(count = patches.len(), user = %user_id, page, "Retrieved patches");
        Ok(patches)
    }

    async fn get_patch_failed_tasks(&self, patch_id: &str) -> Result<Value> {
        let result = self
            .execute(queries::GET_PATCH_FAILED_TASKS, json!({ "patchId": patch_id }))
            .await?;
        let patch = required(result, "patch", "Patch", patch_id)?;

        info!(
            patch = %patch_id,
            failed = count_at(&patch, "/versionFull/tasks/count"),
            "Retrieved patch failed tasks"
        );
        Ok(patch)
    }

    async fn get_version_with_failed_tasks(&self, version_id: &str) -> Result<Value> {
        let result = self
            .execute(
                queries::GET_VERSION_WITH_FAILED_TASKS,
                json!({ "versionId": version_id }),
            )
            .await?;
        let version = required(result, "version", "Version", version_id)?;

        info!(
            version = %version_id,
            failed = count_at(&version, "/tasks/count"),
            "Retrieved version failed tasks"
        );
        Ok(version)
    }

    async fn get_task_logs(&self, task_id: &str, execution: u32) -> Result<Value> {
        let result = self
            .execute(
                queries::GET_TASK_LOGS,
                json!({ "taskId": task_id, "execution": execution }),
            )
            .await?;
        let task = required(result, "task", "Task", task_id)?;

        let entries = task
            .pointer("/taskLogs/taskLogs")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        info!(task = %task_id, entries, "Retrieved task logs");
        Ok(task)
    }

    async fn get_task_test_results(
        &self,
        task_id: &str,
        execution: u32,
        failed_only: bool,
        limit: u32,
    ) -> Result<Value> {
        let mut filter = json!({ "limit": limit, "page": 0 });
        if failed_only {
            filter["statuses"] = json!(FAILED_TEST_STATUSES);
        }

        let variables = json!({
            "taskId": task_id,
            "execution": execution,
            "testFilterOptions": filter,
        });
        let result = self
            .execute(queries::GET_TASK_TEST_RESULTS, variables)
            .await?;
        let task = required(result, "task", "Task", task_id)?;

        info!(
            task = %task_id,
            tests = count_at(&task, "/tests/filteredTestCount"),
            "Retrieved test results"
        );
        Ok(task)
    }

    async fn get_waterfall_failed_tasks(
        &self,
        project_identifier: &str,
        variants: &[String],
        statuses: &[String],
        waterfall_limit: u32,
    ) -> Result<Vec<Value>> {
        if variants.is_empty() {
            return Err(Error::InvalidInput(
                "At least one variant must be provided".into(),
            ));
        }

        let statuses: Vec<String> = if statuses.is_empty() {
            DEFAULT_FAILED_STATUSES.iter().map(|s| s.to_string()).collect()
        } else {
            statuses.to_vec()
        };

        let mut per_variant = Vec::with_capacity(variants.len());
        for variant in variants {
            let versions = self
                .waterfall_for_variant(project_identifier, variant, &statuses, waterfall_limit)
                .await?;
            per_variant.push((variant.clone(), versions));
        }

        match merge_waterfall(per_variant) {
            Some(version) => {
                let version_id = version.get("id").and_then(Value::as_str).unwrap_or("unknown");
                info!(
                    project = %project_identifier,
                    version = %version_id,
                    "Selected most recent failing version"
                );
                Ok(vec![version])
            }
            None => {
                info!(project = %project_identifier, ?variants, "No failing versions found");
                Ok(Vec::new())
            }
        }
    }
}
