//! TaskRun record.
//!
//! Accepts both the `tekton.dev/v1` shape (`status.results`) and the
//! `tekton.dev/v1beta1` shape (`status.taskResults`, `status.resourcesResult`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{succeeded_state, Condition, ObjectKind, ObjectMeta};
use crate::tracked::TrackedObject;
use crate::value::{Param, RunResult, RunValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: TaskRunSpec,

    #[serde(default)]
    pub status: TaskRunStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Declared PipelineResource bindings (v1beta1 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<TaskRunResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRunResources {
    #[serde(default)]
    pub outputs: Vec<ResourceBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBinding {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_spec: Option<ResourceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, alias = "taskResults", skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<RunResult>,

    /// Outputs written by declared resources (v1beta1 only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_result: Vec<ResourceResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResult {
    pub key: String,
    pub value: String,

    #[serde(default)]
    pub resource_name: String,
}

/// Per-step state; `image_id` feeds provenance materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "imageID", skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl TaskRun {
    /// Image outputs declared as PipelineResources, as (url, digest) pairs.
    ///
    /// The url comes from the resource's `url` param and the digest from the
    /// `digest` entry of `status.resourcesResult` for the same resource name.
    /// Outputs missing either half are omitted.
    pub fn declared_image_outputs(&self) -> Vec<(String, String)> {
        let Some(resources) = &self.spec.resources else {
            return Vec::new();
        };

        resources
            .outputs
            .iter()
            .filter_map(|output| {
                let spec = output.resource_spec.as_ref()?;
                if spec.resource_type != "image" {
                    return None;
                }
                let url = spec
                    .params
                    .iter()
                    .find(|p| p.name == "url")
                    .and_then(|p| p.value.as_str())?;
                let digest = self
                    .status
                    .resources_result
                    .iter()
                    .find(|rr| rr.resource_name == output.name && rr.key == "digest")
                    .map(|rr| rr.value.as_str())?;
                Some((url.to_string(), digest.to_string()))
            })
            .collect()
    }

    /// Param value by name.
    pub fn param(&self, name: &str) -> Option<&RunValue> {
        self.spec
            .params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

impl TrackedObject for TaskRun {
    fn kind(&self) -> ObjectKind {
        ObjectKind::TaskRun
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
        self.status
            .steps
            .iter()
            .filter_map(|s| s.image_id.clone())
            .collect()
    }

    fn declared_images(&self) -> Vec<(String, String)> {
        self.declared_image_outputs()
    }

    fn status_record(&self) -> serde_json::Value {
        serde_json::to_value(&self.status).unwrap_or(serde_json::Value::Null)
    }
}
