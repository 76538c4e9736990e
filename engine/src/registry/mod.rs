//! Registry capabilities used by the push, pull and copy engines.
//!
//! Each engine asks only for the operations it performs. [`OciRegistry`]
//! talks to a real registry; [`MemoryRegistry`] keeps everything in process.
//!
//! [`OciRegistry`]: crate::oci::registry::OciRegistry

mod memory;

pub use memory::{MemoryRegistry, WriteCounts};

use async_trait::async_trait;
use imgpkg_core::error::Result;

use crate::oci::manifest::RawManifest;
use crate::oci::reference::{Digest, ImageReference};

/// Fetch manifests by tag or digest.
#[async_trait]
pub trait ManifestReader: Send + Sync {
    /// Raw manifest bytes as stored, never re-encoded.
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest>;
}

/// Fetch blobs by digest.
#[async_trait]
pub trait BlobReader: Send + Sync {
    async fn get_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<Vec<u8>>;
}

/// Store manifests under a tag or digest.
#[async_trait]
pub trait ManifestWriter: Send + Sync {
    /// Store `manifest` at `reference`; returns the digest the registry reports.
    async fn put_manifest(&self, reference: &ImageReference, manifest: &RawManifest)
        -> Result<Digest>;

    /// Digest currently stored at `reference`, `None` if nothing is there.
    async fn manifest_digest(&self, reference: &ImageReference) -> Result<Option<Digest>>;

    async fn has_manifest(&self, reference: &ImageReference) -> Result<bool> {
        Ok(self.manifest_digest(reference).await?.is_some())
    }
}

/// Store blobs by digest.
#[async_trait]
pub trait BlobWriter: Send + Sync {
    async fn put_blob(&self, repository: &ImageReference, digest: &Digest, data: &[u8])
        -> Result<()>;

    /// Whether `repository` already holds the blob, so uploads can be skipped.
    async fn has_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<bool>;
}

/// Enumerate tags of a repository.
#[async_trait]
pub trait TagLister: Send + Sync {
    async fn list_tags(&self, repository: &ImageReference) -> Result<Vec<String>>;
}

/// Everything needed to read artifacts.
pub trait RegistryReader: ManifestReader + BlobReader {}
impl<T: ManifestReader + BlobReader> RegistryReader for T {}

/// Everything needed to write artifacts.
pub trait RegistryWriter: ManifestWriter + BlobWriter {}
impl<T: ManifestWriter + BlobWriter> RegistryWriter for T {}

// Shared handles (`&R`, `Arc<R>`) act as the registry they point to.
macro_rules! forward_registry {
    ([$($generics:tt)*] $handle:ty) => {
        #[async_trait]
        impl<$($generics)*> ManifestReader for $handle
        where
            T: ManifestReader,
        {
            async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
                (**self).get_manifest(reference).await
            }
        }

        #[async_trait]
        impl<$($generics)*> BlobReader for $handle
        where
            T: BlobReader,
        {
            async fn get_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<Vec<u8>> {
                (**self).get_blob(repository, digest).await
            }
        }

        #[async_trait]
        impl<$($generics)*> ManifestWriter for $handle
        where
            T: ManifestWriter,
        {
            async fn put_manifest(
                &self,
                reference: &ImageReference,
                manifest: &RawManifest,
            ) -> Result<Digest> {
                (**self).put_manifest(reference, manifest).await
            }

            async fn manifest_digest(&self, reference: &ImageReference) -> Result<Option<Digest>> {
                (**self).manifest_digest(reference).await
            }
        }

        #[async_trait]
        impl<$($generics)*> BlobWriter for $handle
        where
            T: BlobWriter,
        {
            async fn put_blob(
                &self,
                repository: &ImageReference,
                digest: &Digest,
                data: &[u8],
            ) -> Result<()> {
                (**self).put_blob(repository, digest, data).await
            }

            async fn has_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<bool> {
                (**self).has_blob(repository, digest).await
            }
        }

        #[async_trait]
        impl<$($generics)*> TagLister for $handle
        where
            T: TagLister,
        {
            async fn list_tags(&self, repository: &ImageReference) -> Result<Vec<String>> {
                (**self).list_tags(repository).await
            }
        }
    };
}

forward_registry!(['a, T: ?Sized + 'a] &'a T);
forward_registry!([T: ?Sized] std::sync::Arc<T>);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Upload through nothing but the write capability.
    async fn upload_missing<W: RegistryWriter>(
        registry: W,
        repository: &ImageReference,
        data: &[u8],
    ) -> Result<bool> {
        let digest = Digest::of(data);
        if registry.has_blob(repository, &digest).await? {
            return Ok(false);
        }
        registry.put_blob(repository, &digest, data).await?;
        Ok(true)
    }

    #[tokio::test]
    async fn test_writer_checks_existing_blobs() {
        let registry = Arc::new(MemoryRegistry::new());
        let repository = ImageReference::parse_repository("registry.local/app").unwrap();

        assert!(upload_missing(registry.clone(), &repository, b"layer").await.unwrap());
        assert!(!upload_missing(&*registry, &repository, b"layer").await.unwrap());
        assert_eq!(registry.write_counts().blobs, 1);
    }
}
