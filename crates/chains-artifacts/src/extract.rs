//! Signable and subject extraction from run results.

use std::collections::{BTreeMap, BTreeSet};

use chains_objects::{ObjectKind, ObjectRef, RunResult, RunValue, TrackedObject};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::digest::{DigestError, DigestedRef, ImageRef, Sha256Digest};
use crate::signable::Signable;
use crate::skipped::SkipReason;
use crate::{
    ARTIFACT_DIGEST_SUFFIX, ARTIFACT_OUTPUTS_SUFFIX, ARTIFACT_URI_SUFFIX, IMAGES_RESULT,
    IMAGE_DIGEST_SUFFIX, IMAGE_URL_SUFFIX, MAVEN_PKG_SUFFIX, MAVEN_POM_SUFFIX, MAVEN_SRC_SUFFIX,
    SBOM_FORMAT_SUFFIX, SBOM_URI_SUFFIX,
};

/// Suffixes grouped by result-name prefix.
const GROUPED_SUFFIXES: &[&str] = &[
    IMAGE_URL_SUFFIX,
    IMAGE_DIGEST_SUFFIX,
    SBOM_URI_SUFFIX,
    SBOM_FORMAT_SUFFIX,
    MAVEN_PKG_SUFFIX,
    MAVEN_POM_SUFFIX,
    MAVEN_SRC_SUFFIX,
    ARTIFACT_URI_SUFFIX,
    ARTIFACT_DIGEST_SUFFIX,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// For PipelineRuns, also scan the results of attached child TaskRuns.
    pub deep_inspection: bool,
}

/// Outcome of an extraction pass.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub signables: Vec<Signable>,
    pub skipped: Vec<SkipReason>,
}

/// An in-toto subject.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub digest: BTreeMap<String, String>,
}

impl Subject {
    fn sha256(name: impl Into<String>, digest: &Sha256Digest) -> Self {
        let mut map = BTreeMap::new();
        map.insert("sha256".to_string(), digest.hex().to_string());
        Self {
            name: name.into(),
            digest: map,
        }
    }
}

/// Extract every signable of `obj`: its own record first, then artifacts.
///
/// Artifact order is not meaningful; callers compare as sets.
pub fn extract(obj: &dyn TrackedObject, opts: &ExtractOptions) -> Extraction {
    let owner = obj.object_ref();
    let scan = Scan::run(obj, opts);

    let mut signables = vec![Signable::object(owner.clone(), obj.object_key())];
    let mut seen = BTreeSet::new();

    for image in &scan.images {
        if seen.insert(("oci", image.to_string())) {
            signables.push(Signable::image(owner.clone(), image.clone()));
        }
    }
    for (image, uri, format) in &scan.sboms {
        if seen.insert(("sbom", uri.clone())) {
            signables.push(Signable::sbom(
                owner.clone(),
                image.clone(),
                uri.clone(),
                format.clone(),
            ));
        }
    }
    for (pkg, pom, src) in &scan.maven {
        if seen.insert(("maven", pkg.to_string())) {
            signables.push(Signable::maven(
                owner.clone(),
                pkg.clone(),
                pom.clone(),
                src.clone(),
            ));
        }
    }

    debug!(
        object = %owner,
        signables = signables.len(),
        skipped = scan.skipped.len(),
        "extracted signables"
    );

    Extraction {
        signables,
        skipped: scan.skipped,
    }
}

/// Convenience wrapper returning only the signables.
pub fn extract_signables(obj: &dyn TrackedObject, opts: &ExtractOptions) -> Vec<Signable> {
    extract(obj, opts).signables
}

/// Every digested artifact the run produced, as in-toto subjects, sorted.
pub fn collect_subjects(obj: &dyn TrackedObject, opts: &ExtractOptions) -> Vec<Subject> {
    let scan = Scan::run(obj, opts);
    let mut subjects = BTreeSet::new();

    for image in &scan.images {
        subjects.insert(Subject::sha256(&image.repository, &image.digest));
    }
    for (image, _, _) in &scan.sboms {
        subjects.insert(Subject::sha256(&image.repository, &image.digest));
    }
    for (pkg, pom, src) in &scan.maven {
        for r in [pkg, pom, src] {
            subjects.insert(Subject::sha256(&r.uri, &r.digest));
        }
    }
    for r in &scan.structured {
        subjects.insert(Subject::sha256(&r.uri, &r.digest));
    }

    subjects.into_iter().collect()
}

/// Raw scan of all result sources of an object.
#[derive(Default)]
struct Scan {
    images: Vec<ImageRef>,
    sboms: Vec<(ImageRef, String, String)>,
    maven: Vec<(DigestedRef, DigestedRef, DigestedRef)>,
    structured: Vec<DigestedRef>,
    skipped: Vec<SkipReason>,
}

impl Scan {
    fn run(obj: &dyn TrackedObject, opts: &ExtractOptions) -> Self {
        let mut scan = Scan::default();
        let owner = obj.object_ref();

        let mut sources: Vec<&dyn TrackedObject> = vec![obj];
        if opts.deep_inspection && obj.kind() == ObjectKind::PipelineRun {
            sources.extend(obj.attached_children());
        }

        for source in sources {
            scan.declared(&owner, source);
            scan.images_result(&owner, source.results());
            scan.grouped(&owner, source.results());
            scan.artifact_outputs(&owner, source.results());
        }
        scan
    }

    fn skip(&mut self, owner: &ObjectRef, source: &str, err: DigestError) {
        let reason = match err {
            DigestError::Malformed(value) => SkipReason::MalformedDigest {
                source: source.to_string(),
                value,
            },
            DigestError::MalformedReference(value) => SkipReason::MalformedReference {
                source: source.to_string(),
                value,
            },
        };
        warn!(object = %owner, reason = %reason.to_code(), "skipping artifact");
        self.skipped.push(reason);
    }

    fn declared(&mut self, owner: &ObjectRef, source: &dyn TrackedObject) {
        for (url, digest) in source.declared_images() {
            if url.trim().is_empty() || digest.trim().is_empty() {
                continue;
            }
            match ImageRef::from_parts(&url, &digest) {
                Ok(image) => self.images.push(image),
                Err(e) => self.skip(owner, "resource", e),
            }
        }
    }

    fn images_result(&mut self, owner: &ObjectRef, results: &[RunResult]) {
        for result in results.iter().filter(|r| r.name == IMAGES_RESULT) {
            let entries: Vec<String> = match &result.value {
                RunValue::String(s) => s
                    .split(|c| c == ',' || c == '\n')
                    .map(|e| e.trim().to_string())
                    .collect(),
                RunValue::Array(items) => items.iter().map(|e| e.trim().to_string()).collect(),
                RunValue::Object(_) => continue,
            };
            for entry in entries.into_iter().filter(|e| !e.is_empty()) {
                match ImageRef::parse(&entry) {
                    Ok(image) => self.images.push(image),
                    Err(e) => self.skip(owner, IMAGES_RESULT, e),
                }
            }
        }
    }

    fn grouped(&mut self, owner: &ObjectRef, results: &[RunResult]) {
        for (prefix, fields) in group_by_suffix(results) {
            let get = |suffix: &str| fields.get(suffix).map(String::as_str);

            if let (Some(url), Some(digest)) = (get(IMAGE_URL_SUFFIX), get(IMAGE_DIGEST_SUFFIX)) {
                let source = format!("{prefix}{IMAGE_DIGEST_SUFFIX}");
                match ImageRef::from_parts(url, digest) {
                    Ok(image) => {
                        if let (Some(uri), Some(format)) =
                            (get(SBOM_URI_SUFFIX), get(SBOM_FORMAT_SUFFIX))
                        {
                            self.sboms
                                .push((image.clone(), uri.to_string(), format.to_string()));
                        }
                        self.images.push(image);
                    }
                    Err(e) => self.skip(owner, &source, e),
                }
            }

            if let (Some(pkg), Some(pom), Some(src)) = (
                get(MAVEN_PKG_SUFFIX),
                get(MAVEN_POM_SUFFIX),
                get(MAVEN_SRC_SUFFIX),
            ) {
                let source = format!("{prefix}{MAVEN_PKG_SUFFIX}");
                let parsed = DigestedRef::parse(pkg).and_then(|pkg| {
                    Ok((pkg, DigestedRef::parse(pom)?, DigestedRef::parse(src)?))
                });
                match parsed {
                    Ok(triple) => self.maven.push(triple),
                    Err(e) => self.skip(owner, &source, e),
                }
            }

            if let (Some(uri), Some(digest)) =
                (get(ARTIFACT_URI_SUFFIX), get(ARTIFACT_DIGEST_SUFFIX))
            {
                match Sha256Digest::parse(digest) {
                    Ok(digest) => self.structured.push(DigestedRef {
                        uri: uri.to_string(),
                        digest,
                    }),
                    Err(e) => self.skip(owner, &format!("{prefix}{ARTIFACT_DIGEST_SUFFIX}"), e),
                }
            }
        }
    }

    fn artifact_outputs(&mut self, owner: &ObjectRef, results: &[RunResult]) {
        for result in results
            .iter()
            .filter(|r| r.name.ends_with(ARTIFACT_OUTPUTS_SUFFIX))
        {
            let Some(fields) = result.value.as_object() else {
                continue;
            };
            let (Some(uri), Some(digest)) = (fields.get("uri"), fields.get("digest")) else {
                continue;
            };
            if uri.trim().is_empty() || digest.trim().is_empty() {
                continue;
            }
            match Sha256Digest::parse(digest) {
                Ok(digest) => self.structured.push(DigestedRef {
                    uri: uri.trim().to_string(),
                    digest,
                }),
                Err(e) => self.skip(owner, &result.name, e),
            }
        }
    }
}

/// Group non-empty string results by the prefix before a known suffix.
///
/// `FOO_IMAGE_URL` groups under `FOO_`; a bare `IMAGE_URL` under `""`.
fn group_by_suffix(results: &[RunResult]) -> BTreeMap<String, BTreeMap<&'static str, String>> {
    let mut groups: BTreeMap<String, BTreeMap<&'static str, String>> = BTreeMap::new();

    for result in results {
        let Some(value) = result.value.as_str().map(str::trim) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        for suffix in GROUPED_SUFFIXES {
            let Some(prefix) = result.name.strip_suffix(suffix) else {
                continue;
            };
            if !prefix.is_empty() && !prefix.ends_with('_') {
                continue;
            }
            groups
                .entry(prefix.to_string())
                .or_default()
                .insert(suffix, value.to_string());
            break;
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signable::Artifact;
    use crate::SignableType;
    use chains_objects::{PipelineRun, TaskRun};
    use serde_json::json;

    const HEX_A: &str = "05f95b26ed10668b7183c1e2da98610e91372fa9f510046d4ce5812addad86b5";
    const HEX_B: &str = "4d0d1e0b1c2f8e1a5c2b7d9f3e6a8b0c1d2e3f405162738495a6b7c8d9e0f1a2";
    const HEX_C: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn task_run(results: serde_json::Value) -> TaskRun {
        serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "TaskRun",
            "metadata": {"name": "build", "namespace": "ci", "uid": "tr-uid"},
            "status": {
                "conditions": [{"type": "Succeeded", "status": "True"}],
                "results": results
            }
        }))
        .unwrap()
    }

    fn oci_keys(signables: &[Signable]) -> BTreeSet<String> {
        signables
            .iter()
            .filter(|s| s.signable_type == SignableType::Oci)
            .map(|s| s.full_key.clone())
            .collect()
    }

    #[test]
    fn test_image_pair_yields_one_oci_signable() {
        let tr = task_run(json!([
            {"name": "FOO_IMAGE_URL", "value": "registry.example/app"},
            {"name": "FOO_IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")}
        ]));
        let signables = extract_signables(&tr, &ExtractOptions::default());

        let oci: Vec<_> = signables
            .iter()
            .filter(|s| s.signable_type == SignableType::Oci)
            .collect();
        assert_eq!(oci.len(), 1);
        assert_eq!(oci[0].short_key, &HEX_A[..12]);
        assert_eq!(oci[0].full_key, format!("registry.example/app@sha256:{HEX_A}"));
    }

    #[test]
    fn test_url_without_digest_yields_nothing() {
        let tr = task_run(json!([
            {"name": "FOO_IMAGE_URL", "value": "registry.example/app"}
        ]));
        let signables = extract_signables(&tr, &ExtractOptions::default());
        assert!(oci_keys(&signables).is_empty());
        // only the record itself
        assert_eq!(signables.len(), 1);
        assert!(signables[0].is_object());
        assert_eq!(signables[0].short_key, "taskrun-tr-uid");
    }

    #[test]
    fn test_mismatched_prefixes_do_not_pair() {
        let tr = task_run(json!([
            {"name": "FOO_IMAGE_URL", "value": "registry.example/app"},
            {"name": "BAR_IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")},
            {"name": "XIMAGE_URL", "value": "registry.example/other"},
            {"name": "XIMAGE_DIGEST", "value": format!("sha256:{HEX_B}")}
        ]));
        assert!(oci_keys(&extract_signables(&tr, &ExtractOptions::default())).is_empty());
    }

    #[test]
    fn test_malformed_digest_is_skipped_not_fatal() {
        let tr = task_run(json!([
            {"name": "FOO_IMAGE_URL", "value": "registry.example/app"},
            {"name": "FOO_IMAGE_DIGEST", "value": "sha256:nothex"},
            {"name": "BAR_IMAGE_URL", "value": "registry.example/lib"},
            {"name": "BAR_IMAGE_DIGEST", "value": format!("sha256:{HEX_B}")}
        ]));
        let extraction = extract(&tr, &ExtractOptions::default());
        assert_eq!(
            oci_keys(&extraction.signables),
            BTreeSet::from([format!("registry.example/lib@sha256:{HEX_B}")])
        );
        assert_eq!(extraction.skipped.len(), 1);
        assert!(matches!(
            &extraction.skipped[0],
            SkipReason::MalformedDigest { source, .. } if source == "FOO_IMAGE_DIGEST"
        ));
    }

    #[test]
    fn test_images_result_delimiters() {
        let tr = task_run(json!([
            {"name": "IMAGES", "value": format!(
                "gcr.io/a@sha256:{HEX_A}, gcr.io/b@sha256:{HEX_B}\ngcr.io/c@sha256:{HEX_C}\n\nnot-a-ref"
            )}
        ]));
        let extraction = extract(&tr, &ExtractOptions::default());
        assert_eq!(
            oci_keys(&extraction.signables),
            BTreeSet::from([
                format!("gcr.io/a@sha256:{HEX_A}"),
                format!("gcr.io/b@sha256:{HEX_B}"),
                format!("gcr.io/c@sha256:{HEX_C}"),
            ])
        );
        assert_eq!(extraction.skipped.len(), 1);
    }

    #[test]
    fn test_duplicate_images_collapse() {
        let tr = task_run(json!([
            {"name": "IMAGES", "value": format!("gcr.io/a@sha256:{HEX_A}")},
            {"name": "IMAGE_URL", "value": "gcr.io/a:latest"},
            {"name": "IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")}
        ]));
        let signables = extract_signables(&tr, &ExtractOptions::default());
        assert_eq!(oci_keys(&signables).len(), 1);
        assert_eq!(signables.len(), 2);
    }

    #[test]
    fn test_sbom_needs_all_four_fields() {
        let complete = task_run(json!([
            {"name": "APP_IMAGE_URL", "value": "gcr.io/app"},
            {"name": "APP_IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")},
            {"name": "APP_SBOM_URI", "value": "gcr.io/app-sbom@sha256:00"},
            {"name": "APP_SBOM_FORMAT", "value": "spdx"}
        ]));
        let signables = extract_signables(&complete, &ExtractOptions::default());
        let sbom: Vec<_> = signables
            .iter()
            .filter(|s| s.signable_type == SignableType::Sbom)
            .collect();
        assert_eq!(sbom.len(), 1);
        assert_eq!(sbom[0].short_key, format!("sbom-{}", &HEX_A[..12]));
        assert!(matches!(&sbom[0].artifact, Artifact::Sbom { format, .. } if format == "spdx"));

        let partial = task_run(json!([
            {"name": "APP_IMAGE_URL", "value": "gcr.io/app"},
            {"name": "APP_IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")},
            {"name": "APP_SBOM_URI", "value": "gcr.io/app-sbom"}
        ]));
        assert!(extract_signables(&partial, &ExtractOptions::default())
            .iter()
            .all(|s| s.signable_type != SignableType::Sbom));
    }

    #[test]
    fn test_maven_triple() {
        let tr = task_run(json!([
            {"name": "LIB_MAVEN_PKG", "value": format!("pkg:maven/org.example/lib@1.0?type=jar@sha256:{HEX_A}")},
            {"name": "LIB_MAVEN_POM", "value": format!("pkg:maven/org.example/lib@1.0?type=pom@sha256:{HEX_B}")},
            {"name": "LIB_MAVEN_SRC", "value": format!("pkg:maven/org.example/lib@1.0?classifier=sources@sha256:{HEX_C}")},
            {"name": "OTHER_MAVEN_PKG", "value": format!("pkg:maven/org.example/other@1.0@sha256:{HEX_A}")}
        ]));
        let signables = extract_signables(&tr, &ExtractOptions::default());
        let maven: Vec<_> = signables
            .iter()
            .filter(|s| s.signable_type == SignableType::Maven)
            .collect();
        assert_eq!(maven.len(), 1);
        assert_eq!(maven[0].short_key, format!("maven-{}", &HEX_A[..12]));

        let subjects = collect_subjects(&tr, &ExtractOptions::default());
        assert_eq!(subjects.len(), 3);
    }

    #[test]
    fn test_empty_values_do_not_count() {
        let tr = task_run(json!([
            {"name": "FOO_IMAGE_URL", "value": "   "},
            {"name": "FOO_IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")}
        ]));
        let extraction = extract(&tr, &ExtractOptions::default());
        assert!(oci_keys(&extraction.signables).is_empty());
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn test_structured_subjects() {
        let tr = task_run(json!([
            {"name": "BIN_ARTIFACT_URI", "value": "gs://bucket/bin"},
            {"name": "BIN_ARTIFACT_DIGEST", "value": format!("sha256:{HEX_B}")},
            {"name": "WHEEL_ARTIFACT_OUTPUTS", "value": {
                "uri": "pkg:pypi/wheel@1.0", "digest": format!("sha256:{HEX_C}")
            }},
            {"name": "IMAGE_URL", "value": "gcr.io/app"},
            {"name": "IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")}
        ]));
        let names: Vec<String> = collect_subjects(&tr, &ExtractOptions::default())
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["gcr.io/app", "gs://bucket/bin", "pkg:pypi/wheel@1.0"]);

        // structured artifacts are subjects, not signables
        let signables = extract_signables(&tr, &ExtractOptions::default());
        assert_eq!(signables.len(), 2);
    }

    #[test]
    fn test_deep_inspection_reads_children() {
        let child = task_run(json!([
            {"name": "IMAGE_URL", "value": "gcr.io/child"},
            {"name": "IMAGE_DIGEST", "value": format!("sha256:{HEX_A}")}
        ]));
        let pr: PipelineRun = serde_json::from_value(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "PipelineRun",
            "metadata": {"name": "release", "namespace": "ci", "uid": "pr-uid"},
            "status": {"conditions": [{"type": "Succeeded", "status": "True"}]}
        }))
        .unwrap();
        let pr = pr.with_task_runs(vec![child]);

        let shallow = extract_signables(&pr, &ExtractOptions::default());
        assert!(oci_keys(&shallow).is_empty());
        assert_eq!(shallow[0].short_key, "pipelinerun-pr-uid");

        let deep = extract_signables(
            &pr,
            &ExtractOptions {
                deep_inspection: true,
            },
        );
        assert_eq!(
            oci_keys(&deep),
            BTreeSet::from([format!("gcr.io/child@sha256:{HEX_A}")])
        );
        assert!(deep.iter().all(|s| s.owner.kind == ObjectKind::PipelineRun));
    }
}
