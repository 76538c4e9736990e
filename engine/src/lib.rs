//! imgpkg Engine - bundle packaging and relocation.
//!
//! Packs directory trees into single-layer OCI artifacts, pulls them back,
//! and relocates whole reference closures between registries without
//! changing a single digest.

#![allow(clippy::result_large_err)]

pub mod bundle;
pub mod copy;
pub mod oci;
pub mod pull;
pub mod push;
pub mod registry;

// Re-export common types
pub use bundle::{BundleContents, BundleLock, ContentKind, ImageRef, ImagesLock, PackedArtifact};
pub use copy::{CopyOptions, CopyReport, CopySource, Copier, RelocatedRoot};
pub use oci::{CredentialStore, Digest, ImageReference, OciRegistry, RawManifest, RegistryAuth};
pub use pull::{PullOutcome, PullSource, Puller};
pub use push::{PushOutcome, Pusher};
pub use registry::{
    BlobReader, BlobWriter, ManifestReader, ManifestWriter, MemoryRegistry, RegistryReader,
    RegistryWriter, TagLister,
};

/// imgpkg engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
