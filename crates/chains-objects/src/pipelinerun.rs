//! PipelineRun record.
//!
//! Child TaskRuns are listed either in the embedded `status.taskRuns` map
//! (older API) or in `status.childReferences` (newer API).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{succeeded_state, Condition, ObjectKind, ObjectMeta};
use crate::taskrun::{TaskRun, TaskRunStatus};
use crate::tracked::{ChildTaskRuns, TrackedObject};
use crate::value::{Param, RunResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: PipelineRunSpec,

    #[serde(default)]
    pub status: PipelineRunStatus,

    /// Child TaskRuns fetched by the reconciler; never serialized.
    #[serde(skip)]
    pub attached_task_runs: Vec<TaskRun>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, alias = "pipelineResults", skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<RunResult>,

    /// Embedded child status keyed by TaskRun name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub task_runs: BTreeMap<String, PipelineRunTaskRunStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_references: Vec<ChildReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunTaskRunStatus {
    #[serde(default)]
    pub pipeline_task_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskRunStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default)]
    pub kind: String,

    pub name: String,

    #[serde(default)]
    pub pipeline_task_name: String,
}

impl PipelineRun {
    /// Attach fetched child TaskRuns so extraction and formatting can see them.
    pub fn with_task_runs(mut self, task_runs: Vec<TaskRun>) -> Self {
        self.attached_task_runs = task_runs;
        self
    }
}

impl TrackedObject for PipelineRun {
    fn kind(&self) -> ObjectKind {
        ObjectKind::PipelineRun
    }

    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn is_done(&self) -> bool {
        succeeded_state(&self.status.conditions).0
    }

    fn is_successful(&self) -> bool {
        succeeded_state(&self.status.conditions).1
    }

    fn results(&self) -> &[RunResult] {
        &self.status.results
    }

    fn params(&self) -> &[Param] {
        &self.spec.params
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.status.start_time
    }

    fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.status.completion_time
    }

    fn step_images(&self) -> Vec<String> {
        self.attached_task_runs
            .iter()
            .flat_map(|tr| tr.step_images())
            .collect()
    }

    fn status_record(&self) -> serde_json::Value {
        serde_json::to_value(&self.status).unwrap_or(serde_json::Value::Null)
    }

    fn child_task_runs(&self) -> ChildTaskRuns {
        // The embedded map wins whenever it is populated, or when there is
        // nothing else to go on.
        if self.status.child_references.is_empty() || !self.status.task_runs.is_empty() {
            let mut names = Vec::with_capacity(self.status.task_runs.len());
            for (name, child) in &self.status.task_runs {
                let finalized = child
                    .status
                    .as_ref()
                    .is_some_and(|s| s.completion_time.is_some());
                if !finalized {
                    return ChildTaskRuns::Unfinalized(name.clone());
                }
                names.push(name.clone());
            }
            return ChildTaskRuns::Listed(names);
        }

        ChildTaskRuns::Listed(
            self.status
                .child_references
                .iter()
                .filter(|cr| cr.kind.is_empty() || cr.kind == "TaskRun")
                .map(|cr| cr.name.clone())
                .collect(),
        )
    }

    fn attached_children(&self) -> Vec<&dyn TrackedObject> {
        self.attached_task_runs
            .iter()
            .map(|tr| tr as &dyn TrackedObject)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline_run(status: serde_json::Value) -> PipelineRun {
        serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "PipelineRun",
            "metadata": {"name": "release", "namespace": "ci", "uid": "pr-uid"},
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn test_child_references() {
        let pr = pipeline_run(json!({
            "childReferences": [
                {"kind": "TaskRun", "name": "release-build", "pipelineTaskName": "build"},
                {"kind": "CustomRun", "name": "release-wait", "pipelineTaskName": "wait"},
                {"kind": "TaskRun", "name": "release-push", "pipelineTaskName": "push"}
            ]
        }));
        assert_eq!(
            pr.child_task_runs(),
            ChildTaskRuns::Listed(vec!["release-build".into(), "release-push".into()])
        );
    }

    #[test]
    fn test_embedded_status_complete() {
        let pr = pipeline_run(json!({
            "taskRuns": {
                "release-build": {"pipelineTaskName": "build", "status": {
                    "completionTime": "2024-05-01T10:00:00Z"
                }}
            }
        }));
        assert_eq!(
            pr.child_task_runs(),
            ChildTaskRuns::Listed(vec!["release-build".into()])
        );
    }

    #[test]
    fn test_embedded_status_unfinalized() {
        let pr = pipeline_run(json!({
            "taskRuns": {
                "release-build": {"pipelineTaskName": "build", "status": {
                    "completionTime": "2024-05-01T10:00:00Z"
                }},
                "release-push": {"pipelineTaskName": "push", "status": {}}
            }
        }));
        assert_eq!(
            pr.child_task_runs(),
            ChildTaskRuns::Unfinalized("release-push".into())
        );
    }

    #[test]
    fn test_no_children() {
        let pr = pipeline_run(json!({}));
        assert_eq!(pr.child_task_runs(), ChildTaskRuns::Listed(vec![]));
    }

    #[test]
    fn test_pipeline_results_alias() {
        let pr = pipeline_run(json!({
            "pipelineResults": [{"name": "IMAGE_URL", "value": "registry.example/app"}]
        }));
        assert_eq!(pr.results().len(), 1);
    }
}
