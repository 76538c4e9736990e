//! OCI manifest and index documents.
//!
//! Manifests are always carried as their raw bytes ([`RawManifest`]); the
//! parsed [`ManifestDocument`] is only used to enumerate what a manifest
//! references. Re-serializing a parsed document would change its digest.

use std::collections::BTreeMap;

use imgpkg_core::error::{PkgError, Result};
use serde::{Deserialize, Serialize};

use super::reference::Digest;

/// OCI image manifest media type.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index media type.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
/// Docker schema 2 manifest media type.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list media type.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image config media type.
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
/// Gzip-compressed OCI layer media type.
pub const OCI_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Media types accepted when fetching manifests.
pub const ACCEPTED_MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_MANIFEST_MEDIA_TYPE,
    OCI_INDEX_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
    DOCKER_MANIFEST_LIST_MEDIA_TYPE,
];

/// Annotation marking an artifact as a bundle.
pub const BUNDLE_ANNOTATION: &str = "dev.carvel.imgpkg.bundle";
/// Annotation written by older releases; still recognized.
pub const LEGACY_BUNDLE_ANNOTATION: &str = "io.k14s.imgpkg.bundle";

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Describe `data` stored under `media_type`.
    pub fn for_blob(media_type: &str, data: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: Digest::of(data).to_string(),
            size: data.len() as u64,
            platform: None,
            annotations: BTreeMap::new(),
        }
    }

    /// Parsed digest of the described content.
    pub fn digest(&self) -> Result<Digest> {
        Digest::parse(&self.digest)
    }

    /// Whether the described content is gzip compressed.
    pub fn is_gzip(&self) -> bool {
        self.media_type.ends_with("gzip")
    }
}

/// Platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Union of the manifest and index schemas.
///
/// Manifests fill `config` and `layers`; indexes fill `manifests`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ManifestDocument {
    /// Whether this document is an image index / manifest list.
    pub fn is_index(&self) -> bool {
        match self.media_type.as_deref() {
            Some(OCI_INDEX_MEDIA_TYPE) | Some(DOCKER_MANIFEST_LIST_MEDIA_TYPE) => true,
            Some(_) => false,
            None => self.config.is_none() && !self.manifests.is_empty(),
        }
    }

    /// Whether the bundle annotation is set to `"true"`.
    pub fn is_bundle(&self) -> bool {
        [BUNDLE_ANNOTATION, LEGACY_BUNDLE_ANNOTATION]
            .iter()
            .any(|key| self.annotations.get(*key).map(String::as_str) == Some("true"))
    }

    /// Every blob this manifest references (config first, then layers).
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        self.config.iter().chain(self.layers.iter())
    }
}

/// Manifest bytes exactly as stored in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl RawManifest {
    /// Wrap bytes; the media type falls back to the document's own field.
    pub fn new(bytes: Vec<u8>, media_type: Option<&str>) -> Self {
        let media_type = media_type
            .map(str::to_string)
            .or_else(|| {
                serde_json::from_slice::<ManifestDocument>(&bytes)
                    .ok()
                    .and_then(|doc| doc.media_type)
            })
            .unwrap_or_else(|| OCI_MANIFEST_MEDIA_TYPE.to_string());
        Self { media_type, bytes }
    }

    /// Serialize a document into manifest bytes.
    pub fn from_document(document: &ManifestDocument) -> Result<Self> {
        let bytes = serde_json::to_vec(document)?;
        let media_type = document
            .media_type
            .clone()
            .unwrap_or_else(|| OCI_MANIFEST_MEDIA_TYPE.to_string());
        Ok(Self { media_type, bytes })
    }

    /// Digest of the stored bytes.
    pub fn digest(&self) -> Digest {
        Digest::of(&self.bytes)
    }

    /// Parse the bytes.
    pub fn document(&self) -> Result<ManifestDocument> {
        serde_json::from_slice(&self.bytes).map_err(|e| {
            PkgError::SerializationError(format!(
                "Failed to parse manifest {}: {}",
                self.digest(),
                e
            ))
        })
    }
}

/// Pick the index entry for `linux` on the host architecture, else the first entry.
pub fn select_platform(entries: &[Descriptor]) -> Option<&Descriptor> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    entries
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .or_else(|| entries.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:1111111111111111111111111111111111111111111111111111111111111111", "size": 10},
        "layers": [{"mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": "sha256:2222222222222222222222222222222222222222222222222222222222222222", "size": 20}],
        "annotations": {"io.k14s.imgpkg.bundle": "true"}
    }"#;

    const INDEX: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:3333333333333333333333333333333333333333333333333333333333333333", "size": 5, "platform": {"architecture": "s390x", "os": "linux"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:4444444444444444444444444444444444444444444444444444444444444444", "size": 5, "platform": {"architecture": "amd64", "os": "linux"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:5555555555555555555555555555555555555555555555555555555555555555", "size": 5, "platform": {"architecture": "arm64", "os": "linux"}}
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let raw = RawManifest::new(MANIFEST.as_bytes().to_vec(), None);
        assert_eq!(raw.media_type, OCI_MANIFEST_MEDIA_TYPE);
        let doc = raw.document().unwrap();
        assert!(!doc.is_index());
        assert!(doc.is_bundle());
        assert_eq!(doc.blobs().count(), 2);
        assert!(doc.layers[0].is_gzip());
    }

    #[test]
    fn test_parse_index() {
        let doc: ManifestDocument = serde_json::from_str(INDEX).unwrap();
        assert!(doc.is_index());
        assert!(!doc.is_bundle());
        assert_eq!(doc.blobs().count(), 0);
        assert_eq!(doc.manifests.len(), 3);
    }

    #[test]
    fn test_bundle_annotation_requires_true() {
        let mut doc = ManifestDocument::default();
        doc.annotations
            .insert(BUNDLE_ANNOTATION.to_string(), String::new());
        assert!(!doc.is_bundle());
        doc.annotations
            .insert(BUNDLE_ANNOTATION.to_string(), "true".to_string());
        assert!(doc.is_bundle());
    }

    #[test]
    fn test_raw_manifest_digest_is_over_bytes() {
        let raw = RawManifest::new(MANIFEST.as_bytes().to_vec(), None);
        assert_eq!(raw.digest(), Digest::of(MANIFEST.as_bytes()));
    }

    #[test]
    fn test_select_platform_prefers_host() {
        let doc: ManifestDocument = serde_json::from_str(INDEX).unwrap();
        let selected = select_platform(&doc.manifests).unwrap();
        match std::env::consts::ARCH {
            "x86_64" => assert!(selected.digest.contains("4444")),
            "aarch64" => assert!(selected.digest.contains("5555")),
            _ => assert!(selected.digest.contains("3333")),
        }
        assert!(select_platform(&[]).is_none());
    }

    #[test]
    fn test_descriptor_for_blob() {
        let d = Descriptor::for_blob(OCI_CONFIG_MEDIA_TYPE, b"{}");
        assert_eq!(d.size, 2);
        assert_eq!(d.digest().unwrap(), Digest::of(b"{}"));
        assert!(!d.is_gzip());
    }
}
