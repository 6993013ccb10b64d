//! Test doubles
//!
//! Recording implementations of the formatter, signer, backend and
//! transparency log traits with configurable failure injection. Pair them
//! with `chains_objects::MemoryStore` to drive the signer and reconciler
//! without touching disk.

mod doubles;
mod failure;

pub use doubles::{MockBackend, MockFormatter, MockSigner, MockTransparencyLog};
pub use failure::{FailureInjector, FailurePlan};
