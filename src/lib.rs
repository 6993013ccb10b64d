//! Chains controller - provenance signing for Tekton runs
//!
//! Watches completed TaskRuns and PipelineRuns, works out what to attest
//! (the run itself plus images, SBOMs and packages it produced), formats,
//! signs and stores a payload for each, optionally records the signatures
//! in a transparency log, and keeps its progress in annotations on the run.

pub mod config;
pub mod context;
pub mod controller;
pub mod formats;
pub mod ledger;
pub mod mock;
pub mod reconciler;
pub mod registry;
pub mod signer;
pub mod signing;
pub mod storage;
pub mod transparency;
pub mod verify;

pub use config::{ChainsConfig, ConfigError, EffectiveConfig};
pub use context::{Cancelled, SignContext};
pub use controller::{Controller, ControllerOptions, ObjectResult, RunReport};
pub use ledger::{AnnotationLedger, LedgerError};
pub use reconciler::{Coordinator, Outcome, ReconcileError};
pub use registry::{Registry, RegistryError};
pub use signer::{ObjectSigner, SignError, SignErrors, SignableError};
pub use verify::{Verifier, VerifyError, VerifyReport};
