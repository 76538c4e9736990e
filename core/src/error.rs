use thiserror::Error;

/// imgpkg error types
#[derive(Error, Debug)]
pub enum PkgError {
    /// Two input roots place a file at the same relative path
    #[error("Found duplicate paths: {}", paths.join(", "))]
    DuplicatePaths { paths: Vec<String> },

    /// Wrong number of `.imgpkg` directories for a bundle
    #[error("Expected one '.imgpkg' dir, got {count}: {}", paths.join(", "))]
    BundleDirCount { count: usize, paths: Vec<String> },

    /// The `.imgpkg` directory is not a direct child of an input root
    #[error("Expected '.imgpkg' directory, to be a direct child of one of: {}; was {path}", roots.join(", "))]
    BundleDirPlacement { path: String, roots: Vec<String> },

    /// Plain images must not carry bundle metadata
    #[error("Images cannot be pushed with a '.imgpkg' bundle directory (found at '{path}'), consider using a bundle")]
    ImageWithBundleDir { path: String },

    /// Invalid flag combination or destination
    #[error("Validation error: {0}")]
    Validation(String),

    /// Artifact kind differs from the kind the caller asked for
    #[error("{hint} (reference '{reference}' is {actual}, expected {expected})")]
    KindMismatch {
        reference: String,
        expected: String,
        actual: String,
        hint: String,
    },

    /// Image reference could not be parsed
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Manifest missing from the registry
    #[error("Manifest not found: {reference}")]
    ManifestNotFound { reference: String },

    /// Blob missing from the registry
    #[error("Blob not found: {digest} in {repository}")]
    BlobNotFound { repository: String, digest: String },

    /// Content does not hash to the digest it was addressed by
    #[error("Digest mismatch for {subject}: expected {expected}, got {actual}")]
    DigestMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Lock document could not be read or failed validation
    #[error("Lock error: {path} - {message}")]
    Lock { path: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PkgError {
    /// Whether this error comes from checking the shape of bundle contents.
    ///
    /// Such errors mean "this is not a bundle" rather than a failure to read
    /// the inputs.
    pub fn is_bundle_validation(&self) -> bool {
        matches!(
            self,
            PkgError::BundleDirCount { .. } | PkgError::BundleDirPlacement { .. }
        )
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(err: serde_json::Error) -> Self {
        PkgError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for PkgError {
    fn from(err: serde_yaml::Error) -> Self {
        PkgError::SerializationError(err.to_string())
    }
}

/// Result type alias for imgpkg operations
pub type Result<T> = std::result::Result<T, PkgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_paths_display() {
        let error = PkgError::DuplicatePaths {
            paths: vec!["/a/config.yml".to_string(), "/b/config.yml".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Found duplicate paths: /a/config.yml, /b/config.yml"
        );
    }

    #[test]
    fn test_bundle_dir_count_display() {
        let error = PkgError::BundleDirCount {
            count: 0,
            paths: vec![],
        };
        assert_eq!(error.to_string(), "Expected one '.imgpkg' dir, got 0: ");
    }

    #[test]
    fn test_bundle_dir_placement_display() {
        let error = PkgError::BundleDirPlacement {
            path: "/src/nested/.imgpkg".to_string(),
            roots: vec!["/src".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Expected '.imgpkg' directory, to be a direct child of one of: /src; was /src/nested/.imgpkg"
        );
    }

    #[test]
    fn test_kind_mismatch_display_contains_hint() {
        let error = PkgError::KindMismatch {
            reference: "ghcr.io/org/app:v1".to_string(),
            expected: "image".to_string(),
            actual: "bundle".to_string(),
            hint: "Expected bundle flag when pulling a bundle, please use -b instead of --image"
                .to_string(),
        };
        let msg = error.to_string();
        assert!(msg.starts_with("Expected bundle flag when pulling a bundle"));
        assert!(msg.contains("ghcr.io/org/app:v1"));
    }

    #[test]
    fn test_registry_error_display() {
        let error = PkgError::RegistryError {
            registry: "ghcr.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }

    #[test]
    fn test_digest_mismatch_display() {
        let error = PkgError::DigestMismatch {
            subject: "layer".to_string(),
            expected: "sha256:aa".to_string(),
            actual: "sha256:bb".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Digest mismatch for layer: expected sha256:aa, got sha256:bb"
        );
    }

    #[test]
    fn test_is_bundle_validation() {
        assert!(PkgError::BundleDirCount {
            count: 2,
            paths: vec![]
        }
        .is_bundle_validation());
        assert!(!PkgError::DuplicatePaths { paths: vec![] }.is_bundle_validation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PkgError = io_error.into();
        assert!(matches!(err, PkgError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let err: PkgError = result.unwrap_err().into();
        assert!(matches!(err, PkgError::SerializationError(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ bad");
        let err: PkgError = result.unwrap_err().into();
        assert!(matches!(err, PkgError::SerializationError(_)));
    }
}
