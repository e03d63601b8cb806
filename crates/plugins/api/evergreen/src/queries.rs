//! GraphQL documents sent to the Evergreen API.

/// All projects, grouped by display group.
pub const GET_PROJECTS: &str = r#"
query GetProjects {
  projects {
    groupDisplayName
    projects {
      id
      displayName
      identifier
      enabled
      owner
      repo
      branch
    }
  }
}
"#;

pub const GET_PROJECT: &str = r#"
query GetProject($projectId: String!) {
  project(projectIdentifier: $projectId) {
    id
    displayName
    identifier
    enabled
    owner
    repo
    branch
    admins
    banner {
      text
      theme
    }
  }
}
"#;

pub const GET_PROJECT_SETTINGS: &str = r#"
query GetProjectSettings($projectId: String!) {
  projectSettings(projectIdentifier: $projectId) {
    projectRef {
      id
      identifier
      displayName
      enabled
      owner
      repo
      branch
    }
    githubWebhooksEnabled
    vars {
      adminOnlyVars
      privateVars
      vars
    }
    aliases {
      alias
      gitTag
      variant
      task
    }
  }
}
"#;

pub const GET_USER_RECENT_PATCHES: &str = r#"
query GetUserRecentPatches($userId: String!, $limit: Int = 10, $page: Int = 0) {
  user(userId: $userId) {
    patches(patchesInput: {
      limit: $limit
      page: $page
      patchName: ""
      statuses: []
      includeHidden: false
    }) {
      patches {
        id
        githash
        description
        author
        authorDisplayName
        status
        createTime
        patchNumber
        projectIdentifier
        versionFull {
          id
          status
        }
      }
    }
  }
}
"#;

pub const GET_PATCH_FAILED_TASKS: &str = r#"
query GetPatchFailedTasks($patchId: String!) {
  patch(patchId: $patchId) {
    id
    githash
    description
    author
    authorDisplayName
    status
    createTime
    patchNumber
    projectIdentifier
    versionFull {
      id
      revision
      author
      createTime
      status
      tasks(options: {
        statuses: ["failed", "system-failed", "task-timed-out"]
        limit: 100
      }) {
        count
        data {
          id
          displayName
          buildVariant
          status
          execution
          finishTime
          timeTaken
          hasTestResults
          failedTestCount
          totalTestCount
          details {
            description
            status
            timedOut
            timeoutType
            failingCommand
          }
          logs {
            taskLogLink
            agentLogLink
            systemLogLink
            allLogLink
          }
        }
      }
    }
  }
}
"#;

pub const GET_VERSION_WITH_FAILED_TASKS: &str = r#"
query GetVersionWithFailedTasks($versionId: String!) {
  version(versionId: $versionId) {
    id
    revision
    author
    createTime
    status
    tasks(options: {
      statuses: ["failed", "system-failed", "task-timed-out"]
      limit: 100
    }) {
      count
      data {
        id
        displayName
        buildVariant
        status
        execution
        finishTime
        timeTaken
        hasTestResults
        failedTestCount
        totalTestCount
        details {
          description
          status
          timedOut
          timeoutType
          failingCommand
        }
        logs {
          taskLogLink
          agentLogLink
          systemLogLink
          allLogLink
        }
      }
    }
  }
}
"#;

pub const GET_TASK_LOGS: &str = r#"
query GetTaskLogs($taskId: String!, $execution: Int!) {
  task(taskId: $taskId, execution: $execution) {
    id
    displayName
    execution
    taskLogs {
      taskId
      execution
      taskLogs {
        severity
        message
        timestamp
        type
      }
    }
  }
}
"#;

pub const GET_TASK_TEST_RESULTS: &str = r#"
query GetTaskTestResults(
  $taskId: String!,
  $execution: Int!,
  $testFilterOptions: TestFilterOptions
) {
  task(taskId: $taskId, execution: $execution) {
    id
    displayName
    buildVariant
    status
    execution
    hasTestResults
    failedTestCount
    totalTestCount
    tests(opts: $testFilterOptions) {
      totalTestCount
      filteredTestCount
      testResults {
        id
        status
        testFile
        duration
        startTime
        endTime
        exitCode
        groupID
        logs {
          url
          urlParsley
          urlRaw
          lineNum
          renderingType
          version
        }
      }
    }
  }
}
"#;

/// Waterfall versions with the tasks of one variant.
///
/// The schema filters tasks by a single variant, so callers issue one query
/// per variant. Most versions come back with an empty task list.
pub const GET_WATERFALL_FAILED_TASKS: &str = r#"
query Waterfall($options: WaterfallOptions!, $tasksOptions: TaskFilterOptions!) {
  waterfall(options: $options) {
    flattenedVersions {
      id
      branch
      startTime
      revision
      finishTime
      tasks(options: $tasksOptions) {
        data {
          id
          displayName
          status
        }
      }
    }
  }
}
"#;
