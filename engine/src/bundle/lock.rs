//! Lock documents: `BundleLock` (written by push) and `ImagesLock`
//! (a bundle's pinned image dependencies).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use imgpkg_core::error::{PkgError, Result};
use serde::{Deserialize, Serialize};

use crate::oci::reference::ImageReference;

/// apiVersion written into BundleLock documents.
pub const BUNDLE_LOCK_API_VERSION: &str = "imgpkg.k14s.io/v1alpha1";
pub const BUNDLE_LOCK_KIND: &str = "BundleLock";

/// apiVersion written into ImagesLock documents.
pub const IMAGES_LOCK_API_VERSION: &str = "imgpkg.carvel.dev/v1alpha1";
/// Older ImagesLock apiVersion, accepted on read.
pub const LEGACY_IMAGES_LOCK_API_VERSION: &str = "imgpkg.k14s.io/v1alpha1";
pub const IMAGES_LOCK_KIND: &str = "ImagesLock";

/// Record of a successful bundle push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleLock {
    pub api_version: String,
    pub kind: String,
    pub spec: BundleLockSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleLockSpec {
    pub image: BundleImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleImage {
    /// `repository@digest` of the pushed manifest
    pub url: String,
    /// Tag the bundle was pushed under
    pub tag: String,
}

impl BundleLock {
    /// Build a lock for a pushed bundle. `url` must carry a digest.
    pub fn new(url: &ImageReference, tag: impl Into<String>) -> Result<Self> {
        if url.digest.is_none() {
            return Err(PkgError::Validation(format!(
                "BundleLock url must be pinned by digest, got '{}'",
                url
            )));
        }
        Ok(Self {
            api_version: BUNDLE_LOCK_API_VERSION.to_string(),
            kind: BUNDLE_LOCK_KIND.to_string(),
            spec: BundleLockSpec {
                image: BundleImage {
                    url: url.to_string(),
                    tag: tag.into(),
                },
            },
        })
    }

    /// Read and validate a BundleLock file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = read_lock_file(path)?;
        Self::parse(&contents, &path.display().to_string())
    }

    /// Parse and validate a BundleLock document; `origin` names it in errors.
    pub fn parse(contents: &str, origin: &str) -> Result<Self> {
        let lock: BundleLock = serde_yaml::from_str(contents).map_err(|e| lock_error(origin, e))?;
        check_version(origin, &lock.api_version, &lock.kind, BUNDLE_LOCK_KIND, &[
            BUNDLE_LOCK_API_VERSION,
        ])?;
        let url = lock.image_reference().map_err(|e| lock_error(origin, e))?;
        if url.digest.is_none() {
            return Err(lock_error(
                origin,
                format!("Expected spec.image.url to be pinned by digest, got '{}'", url),
            ));
        }
        Ok(lock)
    }

    /// The pinned reference in `spec.image.url`.
    pub fn image_reference(&self) -> Result<ImageReference> {
        ImageReference::parse(&self.spec.image.url)
    }

    /// YAML text, starting with a document marker.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(format!("---\n{}", serde_yaml::to_string(self)?))
    }

    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        write_lock_file(path, &self.to_yaml()?)
    }
}

/// One pinned dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub image: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_yaml::Value>,
}

impl ImageRef {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            annotations: BTreeMap::new(),
            metadata: None,
        }
    }

    pub fn reference(&self) -> Result<ImageReference> {
        ImageReference::parse(&self.image)
    }
}

/// A bundle's image dependencies, each pinned by digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesLock {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

impl ImagesLock {
    pub fn new(images: Vec<ImageRef>) -> Self {
        Self {
            api_version: IMAGES_LOCK_API_VERSION.to_string(),
            kind: IMAGES_LOCK_KIND.to_string(),
            images,
        }
    }

    /// Read and validate an ImagesLock file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = read_lock_file(path)?;
        Self::parse(&contents, &path.display().to_string())
    }

    /// Parse and validate an ImagesLock document; `origin` names it in errors.
    pub fn parse(contents: &str, origin: &str) -> Result<Self> {
        let lock: ImagesLock = serde_yaml::from_str(contents).map_err(|e| lock_error(origin, e))?;
        check_version(origin, &lock.api_version, &lock.kind, IMAGES_LOCK_KIND, &[
            IMAGES_LOCK_API_VERSION,
            LEGACY_IMAGES_LOCK_API_VERSION,
        ])?;
        lock.validate_images(origin)?;
        Ok(lock)
    }

    fn validate_images(&self, origin: &str) -> Result<()> {
        let mut seen = HashSet::new();
        for image_ref in &self.images {
            let reference = image_ref.reference().map_err(|e| lock_error(origin, e))?;
            if reference.digest.is_none() {
                return Err(lock_error(
                    origin,
                    format!("Expected image '{}' to be pinned by digest", image_ref.image),
                ));
            }
            if !seen.insert(reference.full_reference()) {
                return Err(lock_error(
                    origin,
                    format!("Found duplicate image '{}'", image_ref.image),
                ));
            }
        }
        Ok(())
    }

    /// Parsed references of every image, in document order.
    pub fn references(&self) -> Result<Vec<ImageReference>> {
        self.images.iter().map(ImageRef::reference).collect()
    }

    /// Point every image at `repository`, keeping digests and annotations.
    ///
    /// Entries that collapse onto the same relocated reference are merged,
    /// keeping the first entry's annotations and metadata.
    pub fn relocated_to(&self, repository: &ImageReference) -> Result<ImagesLock> {
        let mut seen = HashSet::new();
        let mut images = Vec::with_capacity(self.images.len());
        for image_ref in &self.images {
            let digest = image_ref.reference()?.digest.ok_or_else(|| {
                PkgError::Validation(format!(
                    "Expected image '{}' to be pinned by digest",
                    image_ref.image
                ))
            })?;
            let relocated = repository.with_digest(digest).to_string();
            if seen.insert(relocated.clone()) {
                images.push(ImageRef {
                    image: relocated,
                    annotations: image_ref.annotations.clone(),
                    metadata: image_ref.metadata.clone(),
                });
            }
        }
        Ok(ImagesLock {
            api_version: IMAGES_LOCK_API_VERSION.to_string(),
            kind: IMAGES_LOCK_KIND.to_string(),
            images,
        })
    }

    /// YAML text, starting with a document marker.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(format!("---\n{}", serde_yaml::to_string(self)?))
    }

    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        write_lock_file(path, &self.to_yaml()?)
    }
}

/// The `kind` field of a lock file, without validating the rest.
pub fn lock_kind(path: &Path) -> Result<String> {
    #[derive(Deserialize)]
    struct KindOnly {
        #[serde(default)]
        kind: String,
    }

    let origin = path.display().to_string();
    let contents = read_lock_file(path)?;
    let doc: KindOnly = serde_yaml::from_str(&contents).map_err(|e| lock_error(&origin, e))?;
    Ok(doc.kind)
}

fn check_version(
    origin: &str,
    api_version: &str,
    kind: &str,
    expected_kind: &str,
    accepted_versions: &[&str],
) -> Result<()> {
    if kind != expected_kind {
        return Err(lock_error(
            origin,
            format!("Expected kind '{}', got '{}'", expected_kind, kind),
        ));
    }
    if !accepted_versions.contains(&api_version) {
        return Err(lock_error(
            origin,
            format!(
                "Unsupported apiVersion '{}' for {} (supported: {})",
                api_version,
                expected_kind,
                accepted_versions.join(", ")
            ),
        ));
    }
    Ok(())
}

fn lock_error(origin: &str, message: impl std::fmt::Display) -> PkgError {
    PkgError::Lock {
        path: origin.to_string(),
        message: message.to_string(),
    }
}

fn read_lock_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| lock_error(&path.display().to_string(), e))
}

fn write_lock_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| {
        PkgError::Other(format!("Writing lock file {}: {}", path.display(), e))
    })
}
