//! In-process registry.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use imgpkg_core::error::{PkgError, Result};
use parking_lot::{Mutex, RwLock};

use super::{BlobReader, BlobWriter, ManifestReader, ManifestWriter, TagLister};
use crate::oci::manifest::RawManifest;
use crate::oci::reference::{Digest, ImageReference};

#[derive(Debug, Default)]
struct Repository {
    manifests: HashMap<Digest, RawManifest>,
    tags: BTreeMap<String, Digest>,
    blobs: HashMap<Digest, Vec<u8>>,
}

/// Number of write calls received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub blobs: usize,
    pub manifests: usize,
}

/// Registry keeping repositories in memory, keyed by `registry/repository`.
///
/// Like a real registry it rejects manifests whose blobs or child manifests
/// are not yet stored in the same repository, and content that does not
/// hash to the digest it is stored under.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    repositories: RwLock<HashMap<String, Repository>>,
    writes: Mutex<WriteCounts>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_counts(&self) -> WriteCounts {
        *self.writes.lock()
    }

    /// Distinct manifests stored in `repository`.
    pub fn manifest_count(&self, repository: &ImageReference) -> usize {
        self.repositories
            .read()
            .get(&repository.context())
            .map_or(0, |r| r.manifests.len())
    }

    /// Whether a manifest with `digest` is stored in `repository`.
    pub fn contains_manifest(&self, repository: &ImageReference, digest: &Digest) -> bool {
        self.repositories
            .read()
            .get(&repository.context())
            .map_or(false, |r| r.manifests.contains_key(digest))
    }

    /// Drop a blob, e.g. to simulate a partially replicated repository.
    pub fn remove_blob(&self, repository: &ImageReference, digest: &Digest) -> bool {
        self.repositories
            .write()
            .get_mut(&repository.context())
            .map_or(false, |r| r.blobs.remove(digest).is_some())
    }

    fn resolve(repo: &Repository, reference: &ImageReference) -> Option<Digest> {
        match (&reference.digest, &reference.tag) {
            (Some(digest), _) => repo.manifests.contains_key(digest).then(|| digest.clone()),
            (None, Some(tag)) => repo.tags.get(tag).cloned(),
            (None, None) => None,
        }
    }

    fn check_references(repo: &Repository, reference: &ImageReference, manifest: &RawManifest) -> Result<()> {
        // Unparseable manifests are stored as opaque bytes
        let Ok(document) = manifest.document() else {
            return Ok(());
        };
        for blob in document.blobs() {
            let digest = blob.digest()?;
            if !repo.blobs.contains_key(&digest) {
                return Err(PkgError::RegistryError {
                    registry: reference.registry.clone(),
                    message: format!(
                        "MANIFEST_BLOB_UNKNOWN: blob {} not found in {}",
                        digest,
                        reference.context()
                    ),
                });
            }
        }
        for child in &document.manifests {
            let digest = child.digest()?;
            if !repo.manifests.contains_key(&digest) {
                return Err(PkgError::RegistryError {
                    registry: reference.registry.clone(),
                    message: format!(
                        "MANIFEST_UNKNOWN: child manifest {} not found in {}",
                        digest,
                        reference.context()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ManifestReader for MemoryRegistry {
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let repositories = self.repositories.read();
        repositories
            .get(&reference.context())
            .and_then(|repo| {
                Self::resolve(repo, reference).and_then(|d| repo.manifests.get(&d).cloned())
            })
            .ok_or_else(|| PkgError::ManifestNotFound {
                reference: reference.to_string(),
            })
    }
}

#[async_trait]
impl BlobReader for MemoryRegistry {
    async fn get_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<Vec<u8>> {
        self.repositories
            .read()
            .get(&repository.context())
            .and_then(|repo| repo.blobs.get(digest).cloned())
            .ok_or_else(|| PkgError::BlobNotFound {
                repository: repository.context(),
                digest: digest.to_string(),
            })
    }
}

#[async_trait]
impl ManifestWriter for MemoryRegistry {
    async fn put_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
    ) -> Result<Digest> {
        let digest = manifest.digest();
        if let Some(expected) = &reference.digest {
            if *expected != digest {
                return Err(PkgError::DigestMismatch {
                    subject: format!("manifest {}", reference),
                    expected: expected.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        let mut repositories = self.repositories.write();
        let repo = repositories.entry(reference.context()).or_default();
        Self::check_references(repo, reference, manifest)?;
        repo.manifests.insert(digest.clone(), manifest.clone());
        if let Some(tag) = &reference.tag {
            repo.tags.insert(tag.clone(), digest.clone());
        }
        self.writes.lock().manifests += 1;
        Ok(digest)
    }

    async fn manifest_digest(&self, reference: &ImageReference) -> Result<Option<Digest>> {
        Ok(self
            .repositories
            .read()
            .get(&reference.context())
            .and_then(|repo| Self::resolve(repo, reference)))
    }
}

#[async_trait]
impl BlobWriter for MemoryRegistry {
    async fn put_blob(
        &self,
        repository: &ImageReference,
        digest: &Digest,
        data: &[u8],
    ) -> Result<()> {
        let actual = Digest::of(data);
        if actual != *digest {
            return Err(PkgError::DigestMismatch {
                subject: format!("blob upload to {}", repository.context()),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        self.repositories
            .write()
            .entry(repository.context())
            .or_default()
            .blobs
            .insert(actual, data.to_vec());
        self.writes.lock().blobs += 1;
        Ok(())
    }

    async fn has_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<bool> {
        Ok(self
            .repositories
            .read()
            .get(&repository.context())
            .map_or(false, |repo| repo.blobs.contains_key(digest)))
    }
}

#[async_trait]
impl TagLister for MemoryRegistry {
    async fn list_tags(&self, repository: &ImageReference) -> Result<Vec<String>> {
        Ok(self
            .repositories
            .read()
            .get(&repository.context())
            .map(|repo| repo.tags.keys().cloned().collect())
            .unwrap_or_default())
    }
}
