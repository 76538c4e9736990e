//! Push: pack local contents and upload them as a single-layer artifact.

use std::path::Path;

use imgpkg_core::error::{PkgError, Result};

use crate::bundle::{Blob, BundleContents, BundleLock, ContentKind};
use crate::oci::reference::{Digest, ImageReference};
use crate::registry::RegistryWriter;

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// `repository@digest` of the pushed manifest
    pub image_url: ImageReference,
    pub digest: Digest,
    pub tag: String,
    /// BundleLock written to the lock output path, if one was requested
    pub lock: Option<BundleLock>,
}

/// Uploads packed contents to a registry.
pub struct Pusher<R> {
    registry: R,
}

impl<R: RegistryWriter> Pusher<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// Pack `contents` as `kind` and push it to `destination` (which must be tagged).
    ///
    /// Validation happens before any upload. The manifest is written by tag
    /// after both blobs are stored.
    pub async fn push(
        &self,
        contents: &BundleContents,
        destination: &ImageReference,
        kind: ContentKind,
        lock_output: Option<&Path>,
    ) -> Result<PushOutcome> {
        let tag = match (&destination.tag, &destination.digest) {
            (Some(tag), None) => tag.clone(),
            _ => {
                return Err(PkgError::Validation(format!(
                    "Expected destination '{}' to have a tag and no digest",
                    destination
                )))
            }
        };
        if lock_output.is_some() && kind == ContentKind::Image {
            return Err(PkgError::Validation(
                "Lock output is not compatible with image, use bundle for lock output".to_string(),
            ));
        }

        let packed = contents.pack(kind)?;
        let digest = packed.digest();

        tracing::info!(
            destination = %destination,
            kind = %kind,
            digest = %digest,
            "Pushing contents"
        );

        futures::try_join!(
            self.upload_blob(destination, &packed.config),
            self.upload_blob(destination, &packed.layer),
        )?;

        let reported = self
            .registry
            .put_manifest(destination, &packed.manifest)
            .await?;
        if reported != digest {
            return Err(PkgError::DigestMismatch {
                subject: format!("manifest pushed to {}", destination),
                expected: digest.to_string(),
                actual: reported.to_string(),
            });
        }

        let image_url = destination.with_digest(digest.clone());
        let lock = match lock_output {
            Some(path) => {
                let lock = BundleLock::new(&image_url, tag.clone())?;
                lock.write_to_path(path)?;
                tracing::debug!(path = %path.display(), "Wrote bundle lock");
                Some(lock)
            }
            None => None,
        };

        tracing::info!(image = %image_url, tag = %tag, "Pushed");

        Ok(PushOutcome {
            image_url,
            digest,
            tag,
            lock,
        })
    }

    async fn upload_blob(&self, destination: &ImageReference, blob: &Blob) -> Result<()> {
        let digest = blob.digest()?;
        if self.registry.has_blob(destination, &digest).await? {
            tracing::debug!(digest = %digest, "Blob already present");
            return Ok(());
        }
        self.registry
            .put_blob(destination, &digest, &blob.data)
            .await
    }
}
