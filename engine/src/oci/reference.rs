//! OCI image reference parsing.
//!
//! Parses references like `ghcr.io/org/app:v1.0` or
//! `ghcr.io/org/app@sha256:...` into structured components, and models
//! content digests.

use std::fmt;
use std::str::FromStr;

use imgpkg_core::error::{PkgError, Result};
use sha2::{Digest as _, Sha256};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Content digest in `algorithm:hex` form.
///
/// Only ever produced by hashing bytes ([`Digest::of`]) or by parsing a
/// string that came from a registry response or a lock document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// SHA-256 digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        Digest(format!("sha256:{}", hex::encode(Sha256::digest(data))))
    }

    /// Parse an `algorithm:hex` digest string.
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, encoded) = digest.split_once(':').ok_or_else(|| {
            PkgError::InvalidReference(format!(
                "Invalid digest '{}': expected algorithm:hex",
                digest
            ))
        })?;

        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
        let hex_ok = !encoded.is_empty()
            && encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !algorithm_ok || !hex_ok {
            return Err(PkgError::InvalidReference(format!(
                "Invalid digest '{}': expected algorithm:hex",
                digest
            )));
        }
        if algorithm == "sha256" && encoded.len() != 64 {
            return Err(PkgError::InvalidReference(format!(
                "Invalid sha256 digest '{}': expected 64 hex characters, got {}",
                digest,
                encoded.len()
            )));
        }

        Ok(Digest(digest.to_string()))
    }

    /// Full `algorithm:hex` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encoded hash without the algorithm prefix.
    pub fn hex(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, h)| h)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self> {
        Digest::parse(s)
    }
}

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: Option<String>,
    /// Content digest
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let (registry, repository, tag, digest) = Self::split(reference)?;

        // Apply default tag if no tag and no digest
        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Parse a bare repository (no tag, no digest), e.g. a copy destination.
    pub fn parse_repository(repository: &str) -> Result<Self> {
        let (registry, repository_path, tag, digest) = Self::split(repository)?;
        if tag.is_some() || digest.is_some() {
            return Err(PkgError::InvalidReference(format!(
                "Expected a repository without tag or digest, got '{}'",
                repository.trim()
            )));
        }
        Ok(ImageReference {
            registry,
            repository: repository_path,
            tag: None,
            digest: None,
        })
    }

    fn split(reference: &str) -> Result<(String, String, Option<String>, Option<Digest>)> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PkgError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = if let Some(at_pos) = reference.rfind('@') {
            let digest_part = &reference[at_pos + 1..];
            let digest = Digest::parse(digest_part).map_err(|e| {
                PkgError::InvalidReference(format!(
                    "Invalid digest format in reference '{}': {}",
                    reference, e
                ))
            })?;
            (&reference[..at_pos], Some(digest))
        } else {
            (reference, None)
        };

        // Split tag (: separator, but only after the last /)
        let (name, tag) = if let Some(slash_pos) = name_tag.rfind('/') {
            let after_slash = &name_tag[slash_pos + 1..];
            if let Some(colon_pos) = after_slash.rfind(':') {
                let tag = &after_slash[colon_pos + 1..];
                let name = &name_tag[..slash_pos + 1 + colon_pos];
                (name.to_string(), Some(tag.to_string()))
            } else {
                (name_tag.to_string(), None)
            }
        } else if let Some(colon_pos) = name_tag.rfind(':') {
            // Could be registry:port or name:tag; check if after colon is numeric (port)
            let after_colon = &name_tag[colon_pos + 1..];
            if digest.is_none() && after_colon.chars().all(|c| c.is_ascii_digit()) {
                (name_tag.to_string(), None)
            } else {
                (name_tag[..colon_pos].to_string(), Some(after_colon.to_string()))
            }
        } else {
            (name_tag.to_string(), None)
        };

        if let Some(ref tag) = tag {
            if tag.is_empty() {
                return Err(PkgError::InvalidReference(format!(
                    "Empty tag in reference '{}'",
                    reference
                )));
            }
        }

        let (registry, repository) = Self::split_registry_repository(&name)?;
        Ok((registry, repository, tag, digest))
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        if name.is_empty() {
            return Err(PkgError::InvalidReference(
                "Empty repository name".to_string(),
            ));
        }

        // Check if the first component looks like a registry hostname
        // (contains a dot or colon, or is "localhost")
        if let Some(slash_pos) = name.find('/') {
            let first = &name[..slash_pos];
            if first.contains('.') || first.contains(':') || first == "localhost" {
                let registry = first.to_string();
                let repo = name[slash_pos + 1..].to_string();
                if repo.is_empty() {
                    return Err(PkgError::InvalidReference(format!(
                        "Empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((registry, repo));
            }
        }

        // No registry detected, use default
        let repository = if name.contains('/') {
            name.to_string()
        } else {
            // Single name like "nginx" → "library/nginx" for Docker Hub
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// `registry/repository`, without tag or digest.
    pub fn context(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Same repository, addressed purely by `digest`.
    pub fn with_digest(&self, digest: Digest) -> Self {
        ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest),
        }
    }

    /// Same repository, addressed purely by `tag`.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.context();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest.as_str());
        }
        s
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl FromStr for ImageReference {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self> {
        ImageReference::parse(s)
    }
}
