//! Tekton run object model.
//!
//! Defines the TaskRun/PipelineRun records observed by the signing
//! controller, the `TrackedObject` capability the signing core depends on,
//! and the `ObjectStore` interface standing in for the Kubernetes API server.

pub mod error;
pub mod file_store;
pub mod memory_store;
pub mod meta;
pub mod patch;
pub mod pipelinerun;
pub mod store;
pub mod taskrun;
pub mod tracked;
pub mod value;

pub use error::{ObjectError, StoreError};
pub use file_store::FileStore;
pub use memory_store::{MemoryStore, StoreFault, StoreOp};
pub use meta::{Condition, GroupVersionKind, ObjectKind, ObjectMeta, ObjectRef};
pub use patch::AnnotationPatch;
pub use pipelinerun::{ChildReference, PipelineRun, PipelineRunStatus, PipelineRunTaskRunStatus};
pub use store::ObjectStore;
pub use taskrun::{StepState, TaskRun, TaskRunSpec, TaskRunStatus};
pub use tracked::{ChildTaskRuns, TektonObject, TrackedObject};
pub use value::{Param, RunResult, RunValue};

/// API group of all Tekton run objects.
pub const TEKTON_GROUP: &str = "tekton.dev";

/// Current API version for newly written records.
pub const TEKTON_API_VERSION: &str = "tekton.dev/v1";

/// Condition type that carries the execution outcome.
pub const SUCCEEDED_CONDITION: &str = "Succeeded";
