//! OCI artifact model and registry transport.
//!
//! - Image references and content digests
//! - Manifest / index documents, kept as raw bytes
//! - Layer extraction (tar and tar.gz)
//! - Registry access through `oci-distribution`, plus saved credentials

pub mod credentials;
pub mod layers;
pub mod manifest;
pub mod reference;
pub mod registry;

pub use credentials::{Credential, CredentialStore};
pub use layers::extract_layer;
pub use manifest::{Descriptor, ManifestDocument, RawManifest};
pub use reference::{Digest, ImageReference};
pub use registry::{OciRegistry, RegistryAuth};
