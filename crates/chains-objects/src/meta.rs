//! Object metadata, identity and status conditions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ObjectError;

/// Kind of run object the controller watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    TaskRun,
    PipelineRun,
}

impl ObjectKind {
    /// Kubernetes kind string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::TaskRun => "TaskRun",
            ObjectKind::PipelineRun => "PipelineRun",
        }
    }

    /// Lowercase form used in signable keys (`taskrun-<uid>`).
    pub fn key_prefix(&self) -> &'static str {
        match self {
            ObjectKind::TaskRun => "taskrun",
            ObjectKind::PipelineRun => "pipelinerun",
        }
    }

    /// Parse a Kubernetes kind string.
    pub fn parse(kind: &str) -> Result<Self, ObjectError> {
        match kind {
            "TaskRun" => Ok(ObjectKind::TaskRun),
            "PipelineRun" => Ok(ObjectKind::PipelineRun),
            other => Err(ObjectError::UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a run object inside a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Group, version and kind of an object, parsed from `apiVersion` + `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Parse `apiVersion` (`<group>/<version>`) and `kind`.
    ///
    /// Tekton objects always live in a named group, so a bare version or any
    /// extra path segment is rejected.
    pub fn parse(api_version: &str, kind: &str) -> Result<Self, ObjectError> {
        let mut parts = api_version.split('/');
        let (group, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(g), Some(v), None) if !g.is_empty() && !v.is_empty() => (g, v),
            _ => return Err(ObjectError::MalformedApiVersion(api_version.to_string())),
        };
        if kind.is_empty() {
            return Err(ObjectError::MissingField("kind"));
        }
        Ok(Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        })
    }

    /// `<group>/<version>` form.
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

/// The subset of Kubernetes object metadata the controller reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub uid: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A status condition (`status.conditions[]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Look up the `Succeeded` condition and report (done, successful).
pub(crate) fn succeeded_state(conditions: &[Condition]) -> (bool, bool) {
    match conditions
        .iter()
        .find(|c| c.condition_type == crate::SUCCEEDED_CONDITION)
    {
        Some(c) if c.status == "True" => (true, true),
        Some(c) if c.status == "False" => (true, false),
        _ => (false, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_parse() {
        let gvk = GroupVersionKind::parse("tekton.dev/v1beta1", "TaskRun").unwrap();
        assert_eq!(gvk.group, "tekton.dev");
        assert_eq!(gvk.version, "v1beta1");
        assert_eq!(gvk.api_version(), "tekton.dev/v1beta1");
    }

    #[test]
    fn test_gvk_rejects_malformed() {
        for bad in ["v1", "tekton.dev/", "/v1", "a/b/c", ""] {
            let err = GroupVersionKind::parse(bad, "TaskRun").unwrap_err();
            assert!(matches!(err, ObjectError::MalformedApiVersion(_)), "{bad}");
        }
        assert!(GroupVersionKind::parse("tekton.dev/v1", "").is_err());
    }

    #[test]
    fn test_succeeded_state() {
        let cond = |status: &str| Condition {
            condition_type: "Succeeded".to_string(),
            status: status.to_string(),
            reason: None,
            message: None,
        };
        assert_eq!(succeeded_state(&[cond("True")]), (true, true));
        assert_eq!(succeeded_state(&[cond("False")]), (true, false));
        assert_eq!(succeeded_state(&[cond("Unknown")]), (false, false));
        assert_eq!(succeeded_state(&[]), (false, false));
    }

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::new(ObjectKind::PipelineRun, "ci", "build-7");
        assert_eq!(r.to_string(), "PipelineRun ci/build-7");
    }
}
