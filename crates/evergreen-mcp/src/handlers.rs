//! Tool handlers for MCP server.
//!
//! Each tool parses its arguments, calls the Evergreen API through the
//! context and shapes the result into pretty-printed JSON.

use evergreen_core::{Error, Result, DEFAULT_FAILED_STATUSES};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::EvergreenContext;
use crate::format;
use crate::protocol::{ResourceDefinition, ToolCallResult, ToolDefinition};

pub const LIST_USER_RECENT_PATCHES: &str = "list_user_recent_patches_evergreen";
pub const GET_PATCH_FAILED_JOBS: &str = "get_patch_failed_jobs_evergreen";
pub const GET_TASK_LOGS: &str = "get_task_logs_evergreen";
pub const GET_TASK_TEST_RESULTS: &str = "get_task_test_results_evergreen";
pub const GET_WATERFALL_FAILED_TASKS: &str = "get_waterfall_failed_tasks_evergreen";

pub const PROJECTS_RESOURCE_URI: &str = "evergreen://projects";

const MAX_PATCH_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
struct RecentPatchesArgs {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default = "default_patch_limit")]
    limit: u32,
    #[serde(default)]
    page: u32,
}

#[derive(Debug, Deserialize)]
struct PatchFailedJobsArgs {
    #[serde(default)]
    patch_id: String,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default = "default_max_results")]
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct TaskLogsArgs {
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    execution: u32,
    #[serde(default = "default_max_lines")]
    max_lines: u32,
    #[serde(default = "default_true")]
    filter_errors: bool,
}

#[derive(Debug, Deserialize)]
struct TestResultsArgs {
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    execution: u32,
    #[serde(default = "default_true")]
    failed_only: bool,
    #[serde(default = "default_test_limit")]
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct WaterfallArgs {
    #[serde(default)]
    project_identifier: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    variants: Option<Vec<String>>,
    #[serde(default = "default_waterfall_limit")]
    waterfall_limit: u32,
    #[serde(default)]
    statuses: Option<Vec<String>>,
}

fn default_patch_limit() -> u32 {
    10
}

fn default_max_results() -> u32 {
    50
}

fn default_max_lines() -> u32 {
    1000
}

fn default_test_limit() -> u32 {
    100
}

fn default_waterfall_limit() -> u32 {
    200
}

fn default_true() -> bool {
    true
}

fn parse_args<T: DeserializeOwned>(arguments: Option<Value>) -> Result<T> {
    let value = match arguments {
        None | Some(Value::Null) => json!({}),
        Some(v) => v,
    };
    serde_json::from_value(value).map_err(|e| Error::InvalidInput(format!("Invalid arguments: {}", e)))
}

fn require(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} parameter is required", name)));
    }
    Ok(())
}

/// Executes tools and resources against the Evergreen API.
pub struct ToolHandler {
    context: EvergreenContext,
}

impl ToolHandler {
    pub fn new(context: EvergreenContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &EvergreenContext {
        &self.context
    }

    /// Get available tool definitions.
    pub fn available_tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: LIST_USER_RECENT_PATCHES.to_string(),
                description: "Retrieve the authenticated user's recent Evergreen patches/commits \
                    with their CI/CD status. Use this to see your recent code changes, check \
                    patch status (success/failed/running), and identify patches that need \
                    attention. Returns patch IDs needed for other tools."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "project_id": {
                            "type": "string",
                            "description": "Evergreen project identifier (e.g., 'mongodb-mongo-master', 'mms') to filter patches. Defaults to the workspace project; without one, patches from all projects are returned."
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Number of recent patches to return. Use 3-5 for a quick overview, 10-20 for comprehensive analysis. Maximum 50.",
                            "default": 10,
                            "minimum": 1,
                            "maximum": 50
                        },
                        "page": {
                            "type": "integer",
                            "description": "Page number, 0-indexed. Use next_page from a previous response.",
                            "default": 0,
                            "minimum": 0
                        }
                    }
                }),
            },
            ToolDefinition {
                name: GET_PATCH_FAILED_JOBS.to_string(),
                description: "Analyze failed CI/CD jobs for a specific patch to understand why \
                    builds are failing. Shows detailed failure information including failed \
                    tasks, build variants, timeout issues, log links, and test failure counts. \
                    Essential for debugging patch failures."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "patch_id": {
                            "type": "string",
                            "description": "Patch identifier obtained from list_user_recent_patches_evergreen (the 'patch_id' field)."
                        },
                        "project_id": {
                            "type": "string",
                            "description": "Evergreen project identifier the patch must belong to (e.g., 'mongodb-mongo-master', 'mms')."
                        },
                        "max_results": {
                            "type": "integer",
                            "description": "Maximum number of failed tasks to analyze. Use 10-20 for focused analysis, 50+ for comprehensive failure review.",
                            "default": 50,
                            "minimum": 1
                        }
                    },
                    "required": ["patch_id"]
                }),
            },
            ToolDefinition {
                name: GET_TASK_LOGS.to_string(),
                description: "Extract detailed logs from a specific failed Evergreen task to \
                    identify root cause of failures. Filters for error messages by default to \
                    focus on relevant failure information. Use task_id from \
                    get_patch_failed_jobs_evergreen results."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "task_id": {
                            "type": "string",
                            "description": "Task identifier from the 'task_id' field of failed_tasks."
                        },
                        "execution": {
                            "type": "integer",
                            "description": "Task execution number if the task was retried. Usually 0 for the first execution.",
                            "default": 0,
                            "minimum": 0
                        },
                        "max_lines": {
                            "type": "integer",
                            "description": "Maximum log lines to return. Use 100-500 for quick error analysis, 1000+ for comprehensive debugging.",
                            "default": 1000,
                            "minimum": 1
                        },
                        "filter_errors": {
                            "type": "boolean",
                            "description": "Show only error/failure messages (recommended) or all log output.",
                            "default": true
                        }
                    },
                    "required": ["task_id"]
                }),
            },
            ToolDefinition {
                name: GET_TASK_TEST_RESULTS.to_string(),
                description: "Fetch detailed test results for a specific Evergreen task, \
                    including individual unit test failures. Use this when a task shows \
                    failed_test_count > 0 to get specific test failure details."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "task_id": {
                            "type": "string",
                            "description": "Task identifier from the 'task_id' field of failed_tasks."
                        },
                        "execution": {
                            "type": "integer",
                            "description": "Task execution number if the task was retried. Usually 0 for the first execution.",
                            "default": 0,
                            "minimum": 0
                        },
                        "failed_only": {
                            "type": "boolean",
                            "description": "Fetch only failed tests (recommended) or all test results.",
                            "default": true
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Maximum number of test results to return.",
                            "default": 100,
                            "minimum": 1
                        }
                    },
                    "required": ["task_id"]
                }),
            },
            ToolDefinition {
                name: GET_WATERFALL_FAILED_TASKS.to_string(),
                description: "Retrieve the most recent version (flattened waterfall view) \
                    containing failed tasks for one or more build variants in a project. Use \
                    this to identify failing revisions and obtain task IDs for deeper log/test \
                    analysis."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "project_identifier": {
                            "type": "string",
                            "description": "Evergreen project identifier (e.g. 'mms')."
                        },
                        "variant": {
                            "type": "string",
                            "description": "Single build variant to query. Can be combined with 'variants'."
                        },
                        "variants": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Build variants to query when investigating failures across platforms."
                        },
                        "waterfall_limit": {
                            "type": "integer",
                            "description": "Maximum number of recent versions to examine. Limits versions, not tasks.",
                            "default": 200,
                            "minimum": 1
                        },
                        "statuses": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Task statuses to include. Defaults to ['failed','system-failed','task-timed-out']."
                        }
                    },
                    "required": ["project_identifier"]
                }),
            },
        ]
    }

    pub fn available_resources(&self) -> Vec<ResourceDefinition> {
        vec![ResourceDefinition::json(
            PROJECTS_RESOURCE_URI,
            "projects",
            "All Evergreen projects visible to the user",
        )]
    }

    /// Execute a tool by name with arguments.
    ///
    /// Failures are reported as error results carrying the tool name and the
    /// arguments it was called with.
    pub async fn execute(&self, name: &str, arguments: Option<Value>) -> ToolCallResult {
        let echoed = arguments.clone().unwrap_or_else(|| json!({}));

        let result = match name {
            LIST_USER_RECENT_PATCHES => self.list_user_recent_patches(arguments).await,
            GET_PATCH_FAILED_JOBS => self.get_patch_failed_jobs(arguments).await,
            GET_TASK_LOGS => self.get_task_logs(arguments).await,
            GET_TASK_TEST_RESULTS => self.get_task_test_results(arguments).await,
            GET_WATERFALL_FAILED_TASKS => self.get_waterfall_failed_tasks(arguments).await,
            _ => return ToolCallResult::error(format!("Unknown tool: {}", name)),
        };

        match result.and_then(|value| Ok(serde_json::to_string_pretty(&value)?)) {
            Ok(text) => ToolCallResult::text(text),
            Err(e) => {
                tracing::error!(tool = name, error = %e, "Tool call failed");
                let body = json!({
                    "error": e.to_string(),
                    "tool": name,
                    "arguments": echoed,
                });
                let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| e.to_string());
                ToolCallResult::error(text)
            }
        }
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<String> {
        match uri {
            PROJECTS_RESOURCE_URI => {
                let projects = self.context.api.get_projects().await?;
                Ok(serde_json::to_string_pretty(&format::projects(&projects))?)
            }
            _ => Err(Error::NotFound(format!("Resource not found: {}", uri))),
        }
    }

    async fn list_user_recent_patches(&self, arguments: Option<Value>) -> Result<Value> {
        let args: RecentPatchesArgs = parse_args(arguments)?;
        let page_size = args.limit.clamp(1, MAX_PATCH_LIMIT);
        let project = self.context.effective_project(args.project_id.as_deref());

        tracing::info!(
            user = %self.context.user_id,
            page = args.page,
            page_size,
            project = ?project,
            "Fetching recent patches"
        );
        let raw = self
            .context
            .api
            .get_user_recent_patches(&self.context.user_id, page_size, args.page)
            .await?;

        Ok(format::recent_patches(
            &self.context.user_id,
            project.as_deref(),
            &raw,
            args.page,
            page_size,
        ))
    }

    async fn get_patch_failed_jobs(&self, arguments: Option<Value>) -> Result<Value> {
        let args: PatchFailedJobsArgs = parse_args(arguments)?;
        require(&args.patch_id, "patch_id")?;
        let project = self.context.effective_project(args.project_id.as_deref());

        tracing::info!(patch = %args.patch_id, project = ?project, "Fetching failed jobs");
        let patch = self.context.api.get_patch_failed_tasks(&args.patch_id).await?;

        if let Some(project) = &project {
            let owner = patch.get("projectIdentifier").and_then(Value::as_str);
            if owner != Some(project.as_str()) {
                return Err(Error::InvalidInput(
                    "Patch does not belong to the specified project".into(),
                ));
            }
        }

        Ok(format::patch_failed_jobs(
            &patch,
            args.max_results as usize,
            project.as_deref(),
        ))
    }

    async fn get_task_logs(&self, arguments: Option<Value>) -> Result<Value> {
        let args: TaskLogsArgs = parse_args(arguments)?;
        require(&args.task_id, "task_id")?;

        let task = self
            .context
            .api
            .get_task_logs(&args.task_id, args.execution)
            .await?;

        let result = format::task_logs(
            &task,
            &args.task_id,
            args.execution,
            args.max_lines as usize,
            args.filter_errors,
        );
        tracing::info!(task = %args.task_id, lines = %result["total_lines"], "Fetched task logs");
        Ok(result)
    }

    async fn get_task_test_results(&self, arguments: Option<Value>) -> Result<Value> {
        let args: TestResultsArgs = parse_args(arguments)?;
        require(&args.task_id, "task_id")?;

        let task = self
            .context
            .api
            .get_task_test_results(&args.task_id, args.execution, args.failed_only, args.limit)
            .await?;

        Ok(format::test_results(&task, args.failed_only))
    }

    async fn get_waterfall_failed_tasks(&self, arguments: Option<Value>) -> Result<Value> {
        let args: WaterfallArgs = parse_args(arguments)?;
        require(&args.project_identifier, "project_identifier")?;

        let mut variants: Vec<String> = args
            .variants
            .unwrap_or_default()
            .into_iter()
            .chain(args.variant)
            .filter(|v| !v.is_empty())
            .collect();
        variants.sort();
        variants.dedup();
        if variants.is_empty() {
            return Err(Error::InvalidInput(
                "At least one variant must be provided via variant or variants".into(),
            ));
        }

        let statuses = match args.statuses {
            Some(statuses) if !statuses.is_empty() => statuses,
            _ => DEFAULT_FAILED_STATUSES.iter().map(|s| s.to_string()).collect(),
        };

        tracing::info!(
            project = %args.project_identifier,
            ?variants,
            limit = args.waterfall_limit,
            "Fetching waterfall failed tasks"
        );
        let raw = self
            .context
            .api
            .get_waterfall_failed_tasks(
                &args.project_identifier,
                &variants,
                &statuses,
                args.waterfall_limit,
            )
            .await?;

        Ok(format::waterfall(&args.project_identifier, &variants, &statuses, &raw))
    }
}
