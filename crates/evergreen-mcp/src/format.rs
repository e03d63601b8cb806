//! Shaping of raw GraphQL payloads into tool output.
//!
//! The GraphQL layer hands back camelCase JSON as the API returns it; tools
//! answer with flatter snake_case documents that are easier for an assistant
//! to read. Missing fields become `null`.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

const FAILED_TEST_STATUSES: &[&str] = &["fail", "failed"];
const ERROR_SEVERITIES: &[&str] = &["error", "fatal"];
const ERROR_KEYWORDS: &[&str] = &["error", "fail", "exception"];

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

fn field_or(value: &Value, key: &str, default: Value) -> Value {
    value.get(key).cloned().unwrap_or(default)
}

fn lower(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

/// `Some(object)` when `value[key]` is a non-empty object.
fn non_empty<'a>(value: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    value
        .get(key)
        .and_then(Value::as_object)
        .filter(|o| !o.is_empty())
}

fn array<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// One page of a user's patches, optionally restricted to a project.
///
/// `has_more` is inferred from a full page of raw results, before the
/// project filter is applied.
pub(crate) fn recent_patches(
    user_id: &str,
    project_id: Option<&str>,
    raw: &[Value],
    page: u32,
    page_size: u32,
) -> Value {
    let patches: Vec<Value> = raw
        .iter()
        .filter(|patch| {
            project_id.map_or(true, |project| {
                patch.get("projectIdentifier").and_then(Value::as_str) == Some(project)
            })
        })
        .map(|patch| {
            let version = patch.get("versionFull").filter(|v| !v.is_null());
            json!({
                "patch_id": field(patch, "id"),
                "patch_number": field(patch, "patchNumber"),
                "githash": field(patch, "githash"),
                "description": field(patch, "description"),
                "author": field(patch, "author"),
                "author_display_name": field(patch, "authorDisplayName"),
                "status": field(patch, "status"),
                "create_time": field(patch, "createTime"),
                "project_identifier": field(patch, "projectIdentifier"),
                "has_version": version.is_some(),
                "version_status": version.map_or(Value::Null, |v| field(v, "status")),
            })
        })
        .collect();

    let has_more = raw.len() == page_size as usize;
    let next_page = has_more.then(|| page + 1);
    json!({
        "user_id": user_id,
        "project_id": project_id,
        "count": patches.len(),
        "patches": patches,
        "page": page,
        "page_size": page_size,
        "has_more": has_more,
        "next_page": next_page,
    })
}

fn failed_task(task: &Value) -> (Value, bool) {
    let mut info = json!({
        "task_id": field(task, "id"),
        "task_name": field(task, "displayName"),
        "build_variant": field(task, "buildVariant"),
        "status": field(task, "status"),
        "execution": field_or(task, "execution", json!(0)),
        "finish_time": field(task, "finishTime"),
        "duration_ms": field(task, "timeTaken"),
    });

    let mut timed_out = false;
    if let Some(details) = non_empty(task, "details") {
        let details = Value::Object(details.clone());
        timed_out = details.get("timedOut").and_then(Value::as_bool) == Some(true);
        info["failure_details"] = json!({
            "description": field(&details, "description"),
            "timed_out": field_or(&details, "timedOut", json!(false)),
            "timeout_type": field(&details, "timeoutType"),
            "failing_command": field(&details, "failingCommand"),
        });
    }

    if let Some(logs) = non_empty(task, "logs") {
        let logs = Value::Object(logs.clone());
        info["logs"] = json!({
            "task_log": field(&logs, "taskLogLink"),
            "agent_log": field(&logs, "agentLogLink"),
            "system_log": field(&logs, "systemLogLink"),
            "all_logs": field(&logs, "allLogLink"),
        });
    }

    let has_tests = task.get("hasTestResults").and_then(Value::as_bool) == Some(true);
    info["test_info"] = if has_tests {
        json!({
            "has_test_results": true,
            "failed_test_count": field_or(task, "failedTestCount", json!(0)),
            "total_test_count": field_or(task, "totalTestCount", json!(0)),
        })
    } else {
        json!({
            "has_test_results": false,
            "failed_test_count": 0,
            "total_test_count": 0,
        })
    };

    (info, timed_out)
}

/// A patch, its version and up to `max_results` failed tasks.
pub(crate) fn patch_failed_jobs(patch: &Value, max_results: usize, project_id: Option<&str>) -> Value {
    let version = patch.get("versionFull").filter(|v| !v.is_null());

    let patch_info = json!({
        "patch_id": field(patch, "id"),
        "patch_number": field(patch, "patchNumber"),
        "githash": field(patch, "githash"),
        "description": field(patch, "description"),
        "author": field(patch, "author"),
        "author_display_name": field(patch, "authorDisplayName"),
        "status": field(patch, "status"),
        "create_time": field(patch, "createTime"),
        "project_identifier": field(patch, "projectIdentifier"),
    });

    let version_info = version.map_or(Value::Null, |v| {
        json!({
            "version_id": field(v, "id"),
            "revision": field(v, "revision"),
            "author": field(v, "author"),
            "create_time": field(v, "createTime"),
            "status": field(v, "status"),
        })
    });

    let (tasks, total) = match version {
        Some(v) => (
            array(v, "/tasks/data"),
            v.pointer("/tasks/count").and_then(Value::as_u64).unwrap_or(0),
        ),
        None => (&[][..], 0),
    };

    let mut failed_tasks = Vec::new();
    let mut variants = BTreeSet::new();
    let mut has_timeouts = false;
    for task in tasks.iter().take(max_results) {
        let (info, timed_out) = failed_task(task);
        has_timeouts |= timed_out;
        if let Some(variant) = task.get("buildVariant").and_then(Value::as_str) {
            variants.insert(variant.to_string());
        }
        failed_tasks.push(info);
    }

    json!({
        "patch_info": patch_info,
        "version_info": version_info,
        "summary": {
            "total_failed_tasks": total,
            "returned_tasks": failed_tasks.len(),
            "failed_build_variants": variants,
            "has_timeouts": has_timeouts,
        },
        "failed_tasks": failed_tasks,
        "project_id": project_id,
    })
}

fn is_error_entry(entry: &Value) -> bool {
    let severity = lower(entry, "severity");
    if ERROR_SEVERITIES.contains(&severity.as_str()) {
        return true;
    }
    let message = lower(entry, "message");
    ERROR_KEYWORDS.iter().any(|k| message.contains(k))
}

/// Keep error-looking entries (when `filter_errors`), order by timestamp and
/// cap at `max_lines`.
pub(crate) fn filter_logs(raw: &[Value], max_lines: usize, filter_errors: bool) -> Vec<Value> {
    let mut logs: Vec<Value> = raw
        .iter()
        .filter(|entry| !filter_errors || is_error_entry(entry))
        .cloned()
        .collect();
    logs.sort_by(|a, b| {
        let a = a.get("timestamp").and_then(Value::as_str).unwrap_or_default();
        let b = b.get("timestamp").and_then(Value::as_str).unwrap_or_default();
        a.cmp(b)
    });
    logs.truncate(max_lines);
    logs
}

pub(crate) fn task_logs(
    task: &Value,
    task_id: &str,
    execution: u32,
    max_lines: usize,
    filter_errors: bool,
) -> Value {
    let logs = filter_logs(array(task, "/taskLogs/taskLogs"), max_lines, filter_errors);
    json!({
        "task_id": task_id,
        "execution": execution,
        "task_name": field(task, "displayName"),
        "log_type": "task",
        "total_lines": logs.len(),
        "truncated": logs.len() >= max_lines,
        "logs": logs,
    })
}

pub(crate) fn test_results(task: &Value, failed_only: bool) -> Value {
    let task_info = json!({
        "task_id": field(task, "id"),
        "task_name": field(task, "displayName"),
        "build_variant": field(task, "buildVariant"),
        "status": field(task, "status"),
        "execution": field(task, "execution"),
        "has_test_results": field_or(task, "hasTestResults", json!(false)),
        "failed_test_count": field_or(task, "failedTestCount", json!(0)),
        "total_test_count": field_or(task, "totalTestCount", json!(0)),
    });

    let tests = task.get("tests").cloned().unwrap_or(Value::Null);
    let mut failed = 0usize;
    let results: Vec<Value> = array(&tests, "/testResults")
        .iter()
        .map(|test| {
            if FAILED_TEST_STATUSES.contains(&lower(test, "status").as_str()) {
                failed += 1;
            }
            let mut info = json!({
                "test_id": field(test, "id"),
                "test_file": field(test, "testFile"),
                "status": field(test, "status"),
                "duration": field(test, "duration"),
                "start_time": field(test, "startTime"),
                "end_time": field(test, "endTime"),
                "exit_code": field(test, "exitCode"),
                "group_id": field(test, "groupID"),
            });
            if let Some(logs) = non_empty(test, "logs") {
                let logs = Value::Object(logs.clone());
                info["logs"] = json!({
                    "url": field(&logs, "url"),
                    "url_parsley": field(&logs, "urlParsley"),
                    "url_raw": field(&logs, "urlRaw"),
                    "line_num": field(&logs, "lineNum"),
                    "rendering_type": field(&logs, "renderingType"),
                    "version": field(&logs, "version"),
                });
            }
            info
        })
        .collect();

    let filter_applied = if failed_only { "failed tests only" } else { "all tests" };
    json!({
        "task_info": task_info,
        "summary": {
            "total_test_results": field_or(&tests, "totalTestCount", json!(0)),
            "filtered_test_count": field_or(&tests, "filteredTestCount", json!(0)),
            "returned_tests": results.len(),
            "failed_tests_in_results": failed,
            "filter_applied": filter_applied,
        },
        "test_results": results,
    })
}

/// The most recent failing waterfall version, if any.
pub(crate) fn waterfall(
    project_identifier: &str,
    variants: &[String],
    statuses: &[String],
    raw: &[Value],
) -> Value {
    let Some(version) = raw.first() else {
        return json!({
            "project_identifier": project_identifier,
            "variants_queried": variants,
            "statuses": statuses,
            "versions": [],
            "summary": {
                "total_versions_with_failures": 0,
                "total_failed_tasks": 0,
                "variants": variants,
                "suggested_next_steps": [
                    "Verify variant names and failure statuses",
                    "Try increasing waterfall_limit if failures are older",
                ],
                "note": "No failing version found",
            },
        });
    };

    let tasks: Vec<Value> = array(version, "/tasks")
        .iter()
        .map(|task| {
            json!({
                "task_id": field(task, "id"),
                "task_name": field(task, "displayName"),
                "status": field(task, "status"),
            })
        })
        .collect();
    let task_count = tasks.len();

    json!({
        "project_identifier": project_identifier,
        "variants_queried": variants,
        "statuses": statuses,
        "versions": [{
            "version_id": field(version, "id"),
            "revision": field(version, "revision"),
            "branch": field(version, "branch"),
            "start_time": field(version, "startTime"),
            "finish_time": field(version, "finishTime"),
            "failed_task_count": task_count,
            "failed_tasks": tasks,
            "variants_with_failures": field_or(version, "variants", json!([])),
        }],
        "summary": {
            "total_versions_with_failures": 1,
            "total_failed_tasks": task_count,
            "variants": variants,
            "suggested_next_steps": [
                "Invoke get_task_logs_evergreen on a task_id to inspect errors",
                "Invoke get_task_test_results_evergreen on tasks suspected of test failures",
            ],
        },
    })
}

/// Projects listing served as the `evergreen://projects` resource.
pub(crate) fn projects(projects: &[Value]) -> Value {
    projects
        .iter()
        .map(|p| {
            json!({
                "id": field(p, "id"),
                "identifier": field(p, "identifier"),
                "displayName": field(p, "displayName"),
                "enabled": field(p, "enabled"),
                "owner": field(p, "owner"),
                "repo": field(p, "repo"),
            })
        })
        .collect()
}
