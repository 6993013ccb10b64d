//! Signable units of work.

use std::fmt;

use chains_objects::{ObjectKind, ObjectRef};
use serde::{Deserialize, Serialize};

use crate::digest::{DigestedRef, ImageRef};

/// Kind of signable; selects the `artifacts.<section>` configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignableType {
    TaskRun,
    PipelineRun,
    Oci,
    Sbom,
    Maven,
}

impl SignableType {
    /// Type tag (`tekton`, `oci`, `sbom`, `maven`).
    pub fn type_tag(&self) -> &'static str {
        match self {
            SignableType::TaskRun | SignableType::PipelineRun => "tekton",
            SignableType::Oci => "oci",
            SignableType::Sbom => "sbom",
            SignableType::Maven => "maven",
        }
    }

    /// Name of the `artifacts.<section>` configuration table.
    pub fn config_section(&self) -> &'static str {
        match self {
            SignableType::TaskRun => "taskrun",
            SignableType::PipelineRun => "pipelinerun",
            SignableType::Oci => "oci",
            SignableType::Sbom => "sbom",
            SignableType::Maven => "maven",
        }
    }

    /// The record type for an object kind.
    pub fn for_object(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::TaskRun => SignableType::TaskRun,
            ObjectKind::PipelineRun => SignableType::PipelineRun,
        }
    }
}

impl fmt::Display for SignableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_section())
    }
}

/// What a signable refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    /// The owning run record.
    Object,
    Image(ImageRef),
    Sbom {
        image: ImageRef,
        uri: String,
        format: String,
    },
    MavenPackage {
        package: DigestedRef,
        pom: DigestedRef,
        sources: DigestedRef,
    },
}

/// A unit of work to format, sign and store.
///
/// Recomputed from the owning object on every attempt; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signable {
    pub signable_type: SignableType,

    /// Backend address suffix (`payload-<short_key>`).
    pub short_key: String,

    /// Full lookup key.
    pub full_key: String,

    pub owner: ObjectRef,

    pub artifact: Artifact,
}

impl Signable {
    /// The owning object's own record.
    pub fn object(owner: ObjectRef, object_key: String) -> Self {
        Self {
            signable_type: SignableType::for_object(owner.kind),
            short_key: object_key.clone(),
            full_key: object_key,
            owner,
            artifact: Artifact::Object,
        }
    }

    /// An OCI image. Short key is the first 12 digest hex chars.
    pub fn image(owner: ObjectRef, image: ImageRef) -> Self {
        Self {
            signable_type: SignableType::Oci,
            short_key: image.digest.short().to_string(),
            full_key: image.to_string(),
            owner,
            artifact: Artifact::Image(image),
        }
    }

    pub fn sbom(owner: ObjectRef, image: ImageRef, uri: String, format: String) -> Self {
        Self {
            signable_type: SignableType::Sbom,
            short_key: format!("sbom-{}", image.digest.short()),
            full_key: uri.clone(),
            owner,
            artifact: Artifact::Sbom { image, uri, format },
        }
    }

    pub fn maven(owner: ObjectRef, package: DigestedRef, pom: DigestedRef, sources: DigestedRef) -> Self {
        Self {
            signable_type: SignableType::Maven,
            short_key: format!("maven-{}", package.digest.short()),
            full_key: package.to_string(),
            owner,
            artifact: Artifact::MavenPackage {
                package,
                pom,
                sources,
            },
        }
    }

    /// Whether this signable is the owning object's record.
    pub fn is_object(&self) -> bool {
        matches!(self.artifact, Artifact::Object)
    }
}
