//! Signable extraction for Tekton runs.
//!
//! Turns a completed run into the list of things to attest: the run record
//! itself plus OCI images, SBOMs and Maven packages referenced by its
//! results. Candidates missing any required field are dropped silently;
//! candidates with a malformed digest are dropped with a warning and
//! reported in the extraction's `skipped` list.

mod digest;
mod extract;
mod signable;
mod skipped;

pub use digest::{DigestError, DigestedRef, ImageRef, Sha256Digest};
pub use extract::{collect_subjects, extract, extract_signables, ExtractOptions, Extraction, Subject};
pub use signable::{Artifact, Signable, SignableType};
pub use skipped::SkipReason;

/// Result suffix naming an image repository.
pub const IMAGE_URL_SUFFIX: &str = "IMAGE_URL";

/// Result suffix naming an image digest.
pub const IMAGE_DIGEST_SUFFIX: &str = "IMAGE_DIGEST";

/// Result holding a comma or newline separated list of digested images.
pub const IMAGES_RESULT: &str = "IMAGES";

/// Result suffixes of an SBOM attached to an image.
pub const SBOM_URI_SUFFIX: &str = "SBOM_URI";
pub const SBOM_FORMAT_SUFFIX: &str = "SBOM_FORMAT";

/// Result suffixes of a Maven package triple.
pub const MAVEN_PKG_SUFFIX: &str = "MAVEN_PKG";
pub const MAVEN_POM_SUFFIX: &str = "MAVEN_POM";
pub const MAVEN_SRC_SUFFIX: &str = "MAVEN_SRC";

/// Result suffixes of a generic artifact (in-toto subject only).
pub const ARTIFACT_URI_SUFFIX: &str = "ARTIFACT_URI";
pub const ARTIFACT_DIGEST_SUFFIX: &str = "ARTIFACT_DIGEST";

/// Object results ending with this name carry `{uri, digest}`.
pub const ARTIFACT_OUTPUTS_SUFFIX: &str = "ARTIFACT_OUTPUTS";

/// Number of digest hex characters used in short keys.
pub const SHORT_KEY_LEN: usize = 12;
