//! Pull: download an image or bundle and unpack it into a directory.

use std::path::{Path, PathBuf};

use imgpkg_core::error::{PkgError, Result};

use crate::bundle::{BundleLock, ContentKind, ImagesLock, IMAGES_LOCK_FILE, IMGPKG_DIR};
use crate::oci::layers::extract_layer;
use crate::oci::manifest::{select_platform, RawManifest};
use crate::oci::reference::{Digest, ImageReference};
use crate::registry::RegistryReader;

const BUNDLE_AS_IMAGE_HINT: &str =
    "Expected bundle flag when pulling a bundle, please use -b instead of --image";
const IMAGE_AS_BUNDLE_HINT: &str =
    "Expected image flag when pulling a image or index, please use --image instead of -b";

/// Where to pull from.
#[derive(Debug, Clone)]
pub enum PullSource {
    Reference(ImageReference),
    /// A BundleLock file; its `spec.image.url` is pulled as a bundle
    BundleLock(PathBuf),
}

/// Result of a successful pull.
#[derive(Debug, Clone)]
pub struct PullOutcome {
    /// Manifest that was unpacked, addressed by digest
    pub resolved: ImageReference,
    pub kind: ContentKind,
    /// Entries in the bundle's ImagesLock (0 for images or bundles without one)
    pub image_count: usize,
}

/// Downloads artifacts from a registry.
pub struct Puller<R> {
    registry: R,
}

impl<R: RegistryReader> Puller<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// Pull `source` into `destination`, which is created if missing.
    pub async fn pull(
        &self,
        source: &PullSource,
        destination: &Path,
        expected: ContentKind,
    ) -> Result<PullOutcome> {
        let (reference, expected) = match source {
            PullSource::Reference(reference) => (reference.clone(), expected),
            PullSource::BundleLock(path) => {
                let lock = BundleLock::from_path(path)?;
                (lock.image_reference()?, ContentKind::Bundle)
            }
        };

        tracing::info!(reference = %reference, expected = %expected, "Pulling");

        let manifest = self.fetch_manifest(&reference).await?;
        let document = manifest.document()?;
        let actual = if !document.is_index() && document.is_bundle() {
            ContentKind::Bundle
        } else {
            ContentKind::Image
        };

        if actual != expected {
            let hint = match actual {
                ContentKind::Bundle => BUNDLE_AS_IMAGE_HINT,
                ContentKind::Image => IMAGE_AS_BUNDLE_HINT,
            };
            return Err(PkgError::KindMismatch {
                reference: reference.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
                hint: hint.to_string(),
            });
        }

        let (resolved, document) = if document.is_index() {
            let child = select_platform(&document.manifests).ok_or_else(|| {
                PkgError::Other(format!("Image index {} has no manifests", reference))
            })?;
            let child_ref = reference.with_digest(child.digest()?);
            tracing::debug!(index = %reference, selected = %child_ref, "Selected platform manifest");
            let child_manifest = self.fetch_manifest(&child_ref).await?;
            let child_document = child_manifest.document()?;
            if child_document.is_index() {
                return Err(PkgError::Other(format!(
                    "Nested image index {} is not supported",
                    child_ref
                )));
            }
            (child_ref, child_document)
        } else {
            (reference.with_digest(manifest.digest()), document)
        };

        std::fs::create_dir_all(destination).map_err(|e| {
            PkgError::Other(format!(
                "Failed to create output directory {}: {}",
                destination.display(),
                e
            ))
        })?;

        for layer in &document.layers {
            let digest = layer.digest()?;
            let data = self.registry.get_blob(&resolved, &digest).await?;
            verify_blob(&digest, &data)?;
            let gzip = layer.is_gzip() || data.starts_with(&[0x1f, 0x8b]);
            extract_layer(&data, gzip, destination)?;
        }

        let image_count = match actual {
            ContentKind::Bundle => {
                let lock_path = destination.join(IMGPKG_DIR).join(IMAGES_LOCK_FILE);
                if lock_path.exists() {
                    ImagesLock::from_path(&lock_path)?.images.len()
                } else {
                    0
                }
            }
            ContentKind::Image => 0,
        };

        tracing::info!(
            reference = %resolved,
            destination = %destination.display(),
            layers = document.layers.len(),
            "Pulled"
        );

        Ok(PullOutcome {
            resolved,
            kind: actual,
            image_count,
        })
    }

    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let manifest = self.registry.get_manifest(reference).await?;
        if let Some(expected) = &reference.digest {
            let actual = manifest.digest();
            if *expected != actual {
                return Err(PkgError::DigestMismatch {
                    subject: format!("manifest {}", reference),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(manifest)
    }
}

fn verify_blob(expected: &Digest, data: &[u8]) -> Result<()> {
    let actual = Digest::of(data);
    if actual != *expected {
        return Err(PkgError::DigestMismatch {
            subject: "blob".to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleContents;
    use crate::oci::manifest::{
        Descriptor, ManifestDocument, Platform, OCI_INDEX_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE,
    };
    use crate::push::Pusher;
    use crate::registry::{BlobReader, ManifestReader, ManifestWriter, MemoryRegistry};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    const IMAGES_YML: &str = "apiVersion: imgpkg.carvel.dev/v1alpha1\nkind: ImagesLock\nimages:\n- image: registry.local/dep@sha256:1111111111111111111111111111111111111111111111111111111111111111\n";

    fn reference(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    async fn push_dir(
        registry: &MemoryRegistry,
        files: &[(&str, &str)],
        to: &str,
        kind: ContentKind,
    ) -> ImageReference {
        let dir = TempDir::new().unwrap();
        for (path, contents) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, contents).unwrap();
        }
        let contents = BundleContents::new(vec![dir.path().to_path_buf()], vec![]);
        Pusher::new(registry)
            .push(&contents, &reference(to), kind, None)
            .await
            .unwrap()
            .image_url
    }

    #[tokio::test]
    async fn test_pull_bundle_round_trip() {
        let registry = MemoryRegistry::new();
        push_dir(
            &registry,
            &[("README.md", "hello"), (".imgpkg/images.yml", IMAGES_YML)],
            "registry.local/bundle:v1",
            ContentKind::Bundle,
        )
        .await;

        let out = TempDir::new().unwrap();
        let target = out.path().join("nested/out");
        let outcome = Puller::new(&registry)
            .pull(
                &PullSource::Reference(reference("registry.local/bundle:v1")),
                &target,
                ContentKind::Bundle,
            )
            .await
            .unwrap();

        assert_eq!(outcome.kind, ContentKind::Bundle);
        assert_eq!(outcome.image_count, 1);
        assert_eq!(fs::read_to_string(target.join("README.md")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(target.join(".imgpkg/images.yml")).unwrap(),
            IMAGES_YML
        );
    }

    #[tokio::test]
    async fn test_pull_bundle_as_image_hint() {
        let registry = MemoryRegistry::new();
        push_dir(&registry, &[(".imgpkg/bundle.yml", "")], "registry.local/b:v1", ContentKind::Bundle)
            .await;

        let out = TempDir::new().unwrap();
        let err = Puller::new(&registry)
            .pull(
                &PullSource::Reference(reference("registry.local/b:v1")),
                out.path(),
                ContentKind::Image,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PkgError::KindMismatch { .. }));
        assert!(err.to_string().starts_with(BUNDLE_AS_IMAGE_HINT));
        assert!(fs::read_dir(out.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_pull_image_as_bundle_hint() {
        let registry = MemoryRegistry::new();
        push_dir(&registry, &[("app", "bin")], "registry.local/i:v1", ContentKind::Image).await;

        let out = TempDir::new().unwrap();
        let err = Puller::new(&registry)
            .pull(
                &PullSource::Reference(reference("registry.local/i:v1")),
                out.path(),
                ContentKind::Bundle,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with(IMAGE_AS_BUNDLE_HINT));
    }

    #[tokio::test]
    async fn test_pull_from_bundle_lock() {
        let registry = MemoryRegistry::new();
        let url = push_dir(
            &registry,
            &[("config.yml", "a: 1"), (".imgpkg/bundle.yml", "")],
            "registry.local/b:v1",
            ContentKind::Bundle,
        )
        .await;

        let out = TempDir::new().unwrap();
        let lock_path = out.path().join("lock.yml");
        BundleLock::new(&url, "v1").unwrap().write_to_path(&lock_path).unwrap();

        let target = out.path().join("pulled");
        let outcome = Puller::new(&registry)
            .pull(&PullSource::BundleLock(lock_path), &target, ContentKind::Image)
            .await
            .unwrap();
        assert_eq!(outcome.resolved, url);
        assert_eq!(outcome.image_count, 0);
        assert!(target.join("config.yml").exists());
    }

    #[tokio::test]
    async fn test_pull_bundle_with_invalid_images_lock() {
        let registry = MemoryRegistry::new();
        push_dir(
            &registry,
            &[(".imgpkg/images.yml", "kind: Nonsense\n")],
            "registry.local/b:v1",
            ContentKind::Bundle,
        )
        .await;

        let out = TempDir::new().unwrap();
        let err = Puller::new(&registry)
            .pull(
                &PullSource::Reference(reference("registry.local/b:v1")),
                out.path(),
                ContentKind::Bundle,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PkgError::Lock { .. }));
    }

    #[tokio::test]
    async fn test_pull_index_selects_platform() {
        let registry = MemoryRegistry::new();
        let mut entries = Vec::new();
        for arch in ["amd64", "arm64", "s390x"] {
            let pushed = push_dir(
                &registry,
                &[("arch.txt", arch)],
                &format!("registry.local/multi:{arch}"),
                ContentKind::Image,
            )
            .await;
            let manifest = registry.get_manifest(&pushed).await.unwrap();
            let mut descriptor = Descriptor::for_blob(OCI_MANIFEST_MEDIA_TYPE, &manifest.bytes);
            descriptor.platform = Some(Platform {
                architecture: arch.to_string(),
                os: "linux".to_string(),
                variant: None,
            });
            entries.push(descriptor);
        }
        let index = RawManifest::from_document(&ManifestDocument {
            schema_version: 2,
            media_type: Some(OCI_INDEX_MEDIA_TYPE.to_string()),
            manifests: entries,
            ..Default::default()
        })
        .unwrap();
        registry
            .put_manifest(&reference("registry.local/multi:latest"), &index)
            .await
            .unwrap();

        let out = TempDir::new().unwrap();
        Puller::new(&registry)
            .pull(
                &PullSource::Reference(reference("registry.local/multi:latest")),
                out.path(),
                ContentKind::Image,
            )
            .await
            .unwrap();

        let expected = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            _ => "amd64",
        };
        assert_eq!(
            fs::read_to_string(out.path().join("arch.txt")).unwrap(),
            expected
        );
    }

    struct TamperedBlobs(MemoryRegistry);

    #[async_trait]
    impl ManifestReader for TamperedBlobs {
        async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
            self.0.get_manifest(reference).await
        }
    }

    #[async_trait]
    impl BlobReader for TamperedBlobs {
        async fn get_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<Vec<u8>> {
            let mut data = self.0.get_blob(repository, digest).await?;
            data.push(0);
            Ok(data)
        }
    }

    #[tokio::test]
    async fn test_pull_verifies_blob_digest() {
        let registry = MemoryRegistry::new();
        push_dir(&registry, &[("app", "bin")], "registry.local/i:v1", ContentKind::Image).await;

        let out = TempDir::new().unwrap();
        let err = Puller::new(TamperedBlobs(registry))
            .pull(
                &PullSource::Reference(reference("registry.local/i:v1")),
                out.path(),
                ContentKind::Image,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PkgError::DigestMismatch { .. }));
        assert!(!out.path().join("app").exists());
    }
}
