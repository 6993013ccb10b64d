//! The `TrackedObject` capability and the `TektonObject` store value.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::ObjectError;
use crate::meta::{GroupVersionKind, ObjectKind, ObjectMeta, ObjectRef};
use crate::pipelinerun::PipelineRun;
use crate::taskrun::TaskRun;
use crate::value::{Param, RunResult};

/// Child TaskRuns of a composite object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildTaskRuns {
    /// Names of every child TaskRun.
    Listed(Vec<String>),
    /// An embedded child status has no completion time yet; the named child
    /// has not been finalized and the list cannot be trusted.
    Unfinalized(String),
}

/// A completed (or running) execution record the signing core can observe.
///
/// The ledger, extractor, signer and reconciler depend only on this trait.
/// Each concrete kind supplies one implementation.
pub trait TrackedObject: fmt::Debug + Send + Sync {
    fn kind(&self) -> ObjectKind;

    fn api_version(&self) -> &str;

    fn metadata(&self) -> &ObjectMeta;

    /// Execution finished, with success or failure.
    fn is_done(&self) -> bool;

    fn is_successful(&self) -> bool;

    fn results(&self) -> &[RunResult];

    /// Status block as JSON; the basis of the `tekton` payload format.
    fn status_record(&self) -> serde_json::Value;

    fn params(&self) -> &[Param] {
        &[]
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn completion_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Digested images the steps ran in.
    fn step_images(&self) -> Vec<String> {
        Vec::new()
    }

    /// Image outputs declared outside of results, as (url, digest).
    fn declared_images(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn child_task_runs(&self) -> ChildTaskRuns {
        ChildTaskRuns::Listed(Vec::new())
    }

    /// Children fetched and attached by the reconciler.
    fn attached_children(&self) -> Vec<&dyn TrackedObject> {
        Vec::new()
    }

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn namespace(&self) -> &str {
        &self.metadata().namespace
    }

    fn uid(&self) -> &str {
        &self.metadata().uid
    }

    fn annotations(&self) -> &BTreeMap<String, String> {
        &self.metadata().annotations
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata().annotations.get(key).map(String::as_str)
    }

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.kind(), self.namespace(), self.name())
    }

    fn gvk(&self) -> Result<GroupVersionKind, ObjectError> {
        GroupVersionKind::parse(self.api_version(), self.kind().as_str())
    }

    /// Storage key of the object's own record (`taskrun-<uid>`).
    fn object_key(&self) -> String {
        format!("{}-{}", self.kind().key_prefix(), self.uid())
    }
}

/// A run object as held by a store.
#[derive(Debug, Clone, PartialEq)]
pub enum TektonObject {
    TaskRun(TaskRun),
    PipelineRun(PipelineRun),
}

impl TektonObject {
    /// Decode from a JSON document, dispatching on `kind`.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ObjectError> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or(ObjectError::MissingField("kind"))?;
        match ObjectKind::parse(kind)? {
            ObjectKind::TaskRun => Ok(TektonObject::TaskRun(serde_json::from_value(value)?)),
            ObjectKind::PipelineRun => {
                Ok(TektonObject::PipelineRun(serde_json::from_value(value)?))
            }
        }
    }

    /// Encode as a JSON document.
    pub fn to_value(&self) -> Result<serde_json::Value, ObjectError> {
        let value = match self {
            TektonObject::TaskRun(tr) => serde_json::to_value(tr)?,
            TektonObject::PipelineRun(pr) => serde_json::to_value(pr)?,
        };
        Ok(value)
    }

    pub fn as_tracked(&self) -> &dyn TrackedObject {
        match self {
            TektonObject::TaskRun(tr) => tr,
            TektonObject::PipelineRun(pr) => pr,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            TektonObject::TaskRun(tr) => &mut tr.metadata,
            TektonObject::PipelineRun(pr) => &mut pr.metadata,
        }
    }

    pub fn into_task_run(self) -> Option<TaskRun> {
        match self {
            TektonObject::TaskRun(tr) => Some(tr),
            TektonObject::PipelineRun(_) => None,
        }
    }
}

impl From<TaskRun> for TektonObject {
    fn from(tr: TaskRun) -> Self {
        TektonObject::TaskRun(tr)
    }
}

impl From<PipelineRun> for TektonObject {
    fn from(pr: PipelineRun) -> Self {
        TektonObject::PipelineRun(pr)
    }
}

impl TrackedObject for TektonObject {
    fn kind(&self) -> ObjectKind {
        self.as_tracked().kind()
    }

    fn api_version(&self) -> &str {
        self.as_tracked().api_version()
    }

    fn metadata(&self) -> &ObjectMeta {
        self.as_tracked().metadata()
    }

    fn is_done(&self) -> bool {
        self.as_tracked().is_done()
    }

    fn is_successful(&self) -> bool {
        self.as_tracked().is_successful()
    }

    fn results(&self) -> &[RunResult] {
        self.as_tracked().results()
    }

    fn status_record(&self) -> serde_json::Value {
        self.as_tracked().status_record()
    }

    fn params(&self) -> &[Param] {
        self.as_tracked().params()
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        self.as_tracked().start_time()
    }

    fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.as_tracked().completion_time()
    }

    fn step_images(&self) -> Vec<String> {
        self.as_tracked().step_images()
    }

    fn declared_images(&self) -> Vec<(String, String)> {
        self.as_tracked().declared_images()
    }

    fn child_task_runs(&self) -> ChildTaskRuns {
        self.as_tracked().child_task_runs()
    }

    fn attached_children(&self) -> Vec<&dyn TrackedObject> {
        self.as_tracked().attached_children()
    }
}
