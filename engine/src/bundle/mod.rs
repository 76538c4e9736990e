//! Bundle content model and lock documents.

pub mod contents;
pub mod lock;
pub mod walk;

pub use contents::{Blob, BundleContents, ContentKind, PackedArtifact, DEFAULT_EXCLUDED};
pub use lock::{lock_kind, BundleLock, ImageRef, ImagesLock, BUNDLE_LOCK_KIND};

/// Metadata directory marking a tree as a bundle.
pub const IMGPKG_DIR: &str = ".imgpkg";
/// Image dependencies of a bundle, inside [`IMGPKG_DIR`].
pub const IMAGES_LOCK_FILE: &str = "images.yml";

/// Layer path of a bundle's ImagesLock.
pub fn images_lock_path() -> String {
    format!("{}/{}", IMGPKG_DIR, IMAGES_LOCK_FILE)
}
