//! `in-toto` format (alias `slsa/v1`): an in-toto statement carrying SLSA
//! provenance for the owning run.

use std::collections::{BTreeMap, BTreeSet};

use chains_artifacts::{
    collect_subjects, Artifact, ExtractOptions, ImageRef, Signable, Subject,
};
use chains_objects::{ObjectKind, TrackedObject};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::{FormatError, PayloadFormatter, FORMAT_IN_TOTO};

pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v0.1";
pub const SLSA_PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v0.2";
pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

const SPDX_PREDICATE_TYPE: &str = "https://spdx.dev/Document";
const CYCLONEDX_PREDICATE_TYPE: &str = "https://cyclonedx.org/bom";
const GENERIC_SBOM_PREDICATE_TYPE: &str = "https://in-toto.io/attestation/sbom";

/// Prefix kubelets put on resolved step image ids.
const PULLABLE_PREFIX: &str = "docker-pullable://";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Statement<P> {
    #[serde(rename = "_type")]
    statement_type: &'static str,
    subject: Vec<Subject>,
    predicate_type: &'static str,
    predicate: P,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlsaPredicate {
    builder: Builder,
    build_type: String,
    invocation: Invocation,
    build_config: Value,
    metadata: BuildMetadata,
    materials: Vec<Material>,
}

#[derive(Serialize)]
struct Builder {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Invocation {
    config_source: Value,
    parameters: BTreeMap<String, Value>,
    environment: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    build_started_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build_finished_on: Option<DateTime<Utc>>,
    completeness: Completeness,
    reproducible: bool,
}

#[derive(Serialize)]
struct Completeness {
    parameters: bool,
    environment: bool,
    materials: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
struct Material {
    uri: String,
    digest: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct SbomPredicate<'a> {
    uri: &'a str,
    format: &'a str,
}

pub struct InTotoFormatter {
    name: &'static str,
    builder_id: String,
    extract: ExtractOptions,
}

impl InTotoFormatter {
    /// `name` is the configured alias (`in-toto` or `slsa/v1`).
    pub fn new(name: &'static str, builder_id: impl Into<String>, extract: ExtractOptions) -> Self {
        Self {
            name,
            builder_id: builder_id.into(),
            extract,
        }
    }

    fn provenance(&self, obj: &dyn TrackedObject) -> SlsaPredicate {
        let parameters = obj
            .params()
            .iter()
            .map(|p| (p.name.clone(), p.value.to_json()))
            .collect();

        SlsaPredicate {
            builder: Builder {
                id: self.builder_id.clone(),
            },
            build_type: format!("{}/{}", obj.api_version(), obj.kind()),
            invocation: Invocation {
                config_source: json!({}),
                parameters,
                environment: json!({}),
            },
            build_config: build_config(obj),
            metadata: BuildMetadata {
                build_started_on: obj.start_time(),
                build_finished_on: obj.completion_time(),
                completeness: Completeness {
                    parameters: false,
                    environment: false,
                    materials: false,
                },
                reproducible: false,
            },
            materials: materials(obj),
        }
    }

    fn subjects(&self, obj: &dyn TrackedObject, signable: &Signable) -> Vec<Subject> {
        match &signable.artifact {
            Artifact::Object => collect_subjects(obj, &self.extract),
            Artifact::Image(image) | Artifact::Sbom { image, .. } => vec![image_subject(image)],
            Artifact::MavenPackage {
                package,
                pom,
                sources,
            } => [package, pom, sources]
                .into_iter()
                .map(|r| Subject {
                    name: r.uri.clone(),
                    digest: sha256_digest(r.digest.hex()),
                })
                .collect(),
        }
    }
}

impl PayloadFormatter for InTotoFormatter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn create_payload(
        &self,
        obj: &dyn TrackedObject,
        signable: &Signable,
    ) -> Result<Value, FormatError> {
        let subject = self.subjects(obj, signable);

        if let Artifact::Sbom { uri, format, .. } = &signable.artifact {
            let statement = Statement {
                statement_type: STATEMENT_TYPE,
                subject,
                predicate_type: sbom_predicate_type(format),
                predicate: SbomPredicate { uri, format },
            };
            return Ok(serde_json::to_value(statement)?);
        }

        let statement = Statement {
            statement_type: STATEMENT_TYPE,
            subject,
            predicate_type: SLSA_PREDICATE_TYPE,
            predicate: self.provenance(obj),
        };
        Ok(serde_json::to_value(statement)?)
    }

    fn wrap(&self) -> bool {
        true
    }

    fn payload_type(&self) -> &'static str {
        IN_TOTO_PAYLOAD_TYPE
    }
}

impl Default for InTotoFormatter {
    fn default() -> Self {
        Self::new(FORMAT_IN_TOTO, "https://tekton.dev/chains/v2", ExtractOptions::default())
    }
}

fn sha256_digest(hex: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("sha256".to_string(), hex.to_string())])
}

fn image_subject(image: &ImageRef) -> Subject {
    Subject {
        name: image.repository.clone(),
        digest: sha256_digest(image.digest.hex()),
    }
}

fn sbom_predicate_type(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "spdx" | "spdx+json" => SPDX_PREDICATE_TYPE,
        "cyclonedx" | "cyclonedx+json" => CYCLONEDX_PREDICATE_TYPE,
        _ => GENERIC_SBOM_PREDICATE_TYPE,
    }
}

/// Step images that resolve to a digest, as materials.
fn materials(obj: &dyn TrackedObject) -> Vec<Material> {
    let unique: BTreeSet<Material> = obj
        .step_images()
        .iter()
        .filter_map(|id| ImageRef::parse(id.trim_start_matches(PULLABLE_PREFIX)).ok())
        .map(|image| Material {
            uri: format!("oci://{}", image.repository),
            digest: sha256_digest(image.digest.hex()),
        })
        .collect();
    unique.into_iter().collect()
}

fn build_config(obj: &dyn TrackedObject) -> Value {
    match obj.kind() {
        ObjectKind::TaskRun => json!({ "steps": obj.step_images() }),
        ObjectKind::PipelineRun => {
            let tasks: Vec<Value> = obj
                .attached_children()
                .into_iter()
                .map(|child| {
                    let results: BTreeMap<&str, Value> = child
                        .results()
                        .iter()
                        .map(|r| (r.name.as_str(), r.value.to_json()))
                        .collect();
                    json!({
                        "name": child.name(),
                        "startedOn": child.start_time(),
                        "finishedOn": child.completion_time(),
                        "results": results,
                    })
                })
                .collect();
            json!({ "tasks": tasks })
        }
    }
}
