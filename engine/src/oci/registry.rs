//! Registry access over the OCI distribution API.
//!
//! Uses the `oci-distribution` crate for transport, authentication and
//! content negotiation. Manifests travel as raw bytes so digests survive
//! the round trip.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use http::HeaderValue;
use imgpkg_core::config::RegistryConfig;
use imgpkg_core::error::{PkgError, Result};
use oci_distribution::client::{Certificate, CertificateEncoding, ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::Mutex;

use super::credentials::CredentialStore;
use super::manifest::{RawManifest, ACCEPTED_MANIFEST_MEDIA_TYPES};
use super::reference::{Digest, ImageReference};
use crate::registry::{BlobReader, BlobWriter, ManifestReader, ManifestWriter, TagLister};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Pick credentials for `registry`.
    ///
    /// Explicit username/password win, then the anonymous flag, then the
    /// credential store. Anything else is anonymous.
    pub fn resolve(
        config: &RegistryConfig,
        store: Option<&CredentialStore>,
        registry: &str,
    ) -> Result<Self> {
        if let Some((username, password)) = config.basic_credentials() {
            return Ok(Self::basic(username, password));
        }
        if config.anonymous {
            return Ok(Self::anonymous());
        }
        if let Some(store) = store {
            if let Some(credential) = store.lookup(registry)? {
                return Ok(Self::basic(credential.username, credential.password));
            }
        }
        Ok(Self::anonymous())
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// A registry reachable over HTTPS (or HTTP when insecure).
pub struct OciRegistry {
    client: Client,
    config: RegistryConfig,
    store: Option<CredentialStore>,
    auths: Mutex<HashMap<String, OciRegistryAuth>>,
    // (repository context, push) pairs with a token already in the client
    authenticated: Mutex<HashSet<(String, bool)>>,
}

impl OciRegistry {
    /// Build a client from `config`, reading credentials from the default store.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let store = CredentialStore::default_path().ok();
        Self::with_store(config, store)
    }

    pub fn with_store(config: RegistryConfig, store: Option<CredentialStore>) -> Result<Self> {
        let mut extra_root_certificates = Vec::new();
        for path in &config.ca_cert_paths {
            let data = std::fs::read(path).map_err(|e| {
                PkgError::ConfigError(format!(
                    "Failed to read CA certificate {}: {}",
                    path.display(),
                    e
                ))
            })?;
            extra_root_certificates.push(Certificate {
                encoding: CertificateEncoding::Pem,
                data,
            });
        }

        let client_config = ClientConfig {
            protocol: if config.insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            accept_invalid_certificates: !config.verify_certs,
            extra_root_certificates,
            ..Default::default()
        };

        Ok(Self {
            client: Client::new(client_config),
            config,
            store,
            auths: Mutex::new(HashMap::new()),
            authenticated: Mutex::new(HashSet::new()),
        })
    }

    fn auth_for(&self, registry: &str) -> Result<OciRegistryAuth> {
        if let Some(auth) = self.auths.lock().get(registry) {
            return Ok(auth.clone());
        }
        let auth = RegistryAuth::resolve(&self.config, self.store.as_ref(), registry)?;
        tracing::debug!(
            registry = registry,
            anonymous = auth.is_anonymous(),
            "Resolved registry credentials"
        );
        let auth = auth.to_oci_auth();
        self.auths.lock().insert(registry.to_string(), auth.clone());
        Ok(auth)
    }

    /// Make sure the client holds a token for `reference`'s repository.
    async fn ensure_auth(
        &self,
        reference: &ImageReference,
        oci_ref: &Reference,
        push: bool,
    ) -> Result<OciRegistryAuth> {
        let auth = self.auth_for(&reference.registry)?;
        let key = (reference.context(), push);
        if self.authenticated.lock().contains(&key) {
            return Ok(auth);
        }
        let operation = if push {
            RegistryOperation::Push
        } else {
            RegistryOperation::Pull
        };
        self.client
            .auth(oci_ref, &auth, operation)
            .await
            .map_err(|e| registry_error(reference, "authenticate", e))?;
        self.authenticated.lock().insert(key);
        Ok(auth)
    }

    /// Convert an ImageReference to an oci-distribution Reference.
    fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
        let ref_str = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => format!("{}@{}", reference.context(), digest),
            (None, Some(tag)) => format!("{}:{}", reference.context(), tag),
            (None, None) => format!("{}:latest", reference.context()),
        };

        ref_str.parse::<Reference>().map_err(|e| {
            PkgError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
        })
    }
}

fn registry_error(reference: &ImageReference, action: &str, err: OciDistributionError) -> PkgError {
    PkgError::RegistryError {
        registry: reference.registry.clone(),
        message: format!("Failed to {} {}: {}", action, reference, err),
    }
}

fn is_not_found(err: &OciDistributionError) -> bool {
    matches!(
        err,
        OciDistributionError::ImageManifestNotFoundError(_)
            | OciDistributionError::ServerError { code: 404, .. }
    )
}

#[async_trait]
impl ManifestReader for OciRegistry {
    async fn get_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let oci_ref = Self::to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry)?;

        tracing::debug!(reference = %reference, "Fetching manifest");
        let (bytes, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &auth, ACCEPTED_MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    PkgError::ManifestNotFound {
                        reference: reference.to_string(),
                    }
                } else {
                    registry_error(reference, "fetch manifest", e)
                }
            })?;

        let manifest = RawManifest::new(bytes, None);
        let actual = manifest.digest();
        if let Some(expected) = &reference.digest {
            if *expected != actual {
                return Err(PkgError::DigestMismatch {
                    subject: format!("manifest {}", reference),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        tracing::debug!(reference = %reference, digest = %digest, "Fetched manifest");
        Ok(manifest)
    }
}

#[async_trait]
impl BlobReader for OciRegistry {
    async fn get_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<Vec<u8>> {
        let reference = repository.with_digest(digest.clone());
        let oci_ref = Self::to_oci_reference(&reference)?;
        self.ensure_auth(&reference, &oci_ref, false).await?;

        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &descriptor, &mut data)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    PkgError::BlobNotFound {
                        repository: repository.context(),
                        digest: digest.to_string(),
                    }
                } else {
                    registry_error(&reference, "fetch blob", e)
                }
            })?;

        tracing::debug!(digest = %digest, size = data.len(), "Fetched blob");
        Ok(data)
    }
}

#[async_trait]
impl ManifestWriter for OciRegistry {
    async fn put_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
    ) -> Result<Digest> {
        let oci_ref = Self::to_oci_reference(reference)?;
        let auth = self.ensure_auth(reference, &oci_ref, true).await?;

        let content_type = HeaderValue::from_str(&manifest.media_type).map_err(|e| {
            PkgError::Other(format!(
                "Invalid manifest media type '{}': {}",
                manifest.media_type, e
            ))
        })?;
        let url = self
            .client
            .push_manifest_raw(&oci_ref, manifest.bytes.clone(), content_type)
            .await
            .map_err(|e| registry_error(reference, "push manifest", e))?;
        tracing::debug!(reference = %reference, url = %url, "Pushed manifest");

        let reported = self
            .client
            .fetch_manifest_digest(&oci_ref, &auth)
            .await
            .map_err(|e| registry_error(reference, "resolve manifest", e))?;
        Digest::parse(&reported)
    }

    async fn manifest_digest(&self, reference: &ImageReference) -> Result<Option<Digest>> {
        let oci_ref = Self::to_oci_reference(reference)?;
        let auth = self.auth_for(&reference.registry)?;
        match self.client.fetch_manifest_digest(&oci_ref, &auth).await {
            Ok(digest) => Ok(Some(Digest::parse(&digest)?)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(registry_error(reference, "resolve manifest", e)),
        }
    }
}

#[async_trait]
impl BlobWriter for OciRegistry {
    async fn put_blob(
        &self,
        repository: &ImageReference,
        digest: &Digest,
        data: &[u8],
    ) -> Result<()> {
        let reference = repository.with_digest(digest.clone());
        let oci_ref = Self::to_oci_reference(&reference)?;
        self.ensure_auth(&reference, &oci_ref, true).await?;

        self.client
            .push_blob(&oci_ref, data, digest.as_str())
            .await
            .map_err(|e| registry_error(&reference, "push blob", e))?;
        tracing::debug!(digest = %digest, size = data.len(), "Pushed blob");
        Ok(())
    }

    async fn has_blob(&self, repository: &ImageReference, digest: &Digest) -> Result<bool> {
        let reference = repository.with_digest(digest.clone());
        let oci_ref = Self::to_oci_reference(&reference)?;
        self.ensure_auth(&reference, &oci_ref, true).await?;

        self.client
            .blob_exists(&oci_ref, digest.as_str())
            .await
            .map_err(|e| registry_error(&reference, "check blob", e))
    }
}

#[async_trait]
impl TagLister for OciRegistry {
    async fn list_tags(&self, repository: &ImageReference) -> Result<Vec<String>> {
        let oci_ref = Self::to_oci_reference(repository)?;
        let auth = self.auth_for(&repository.registry)?;
        let response = self
            .client
            .list_tags(&oci_ref, &auth, None, None)
            .await
            .map_err(|e| registry_error(repository, "list tags", e))?;
        Ok(response.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registry_auth_to_oci() {
        assert!(matches!(
            RegistryAuth::anonymous().to_oci_auth(),
            OciRegistryAuth::Anonymous
        ));
        assert!(matches!(
            RegistryAuth::basic("user", "pass").to_oci_auth(),
            OciRegistryAuth::Basic(_, _)
        ));
    }

    #[test]
    fn test_resolve_prefers_explicit_credentials() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save("ghcr.io", "stored", "secret").unwrap();

        let config = RegistryConfig {
            username: Some("flag".to_string()),
            password: Some("pw".to_string()),
            anonymous: true,
            ..Default::default()
        };
        let auth = RegistryAuth::resolve(&config, Some(&store), "ghcr.io").unwrap();
        assert_eq!(auth, RegistryAuth::basic("flag", "pw"));
    }

    #[test]
    fn test_resolve_anonymous_flag_skips_store() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save("ghcr.io", "stored", "secret").unwrap();

        let config = RegistryConfig {
            anonymous: true,
            ..Default::default()
        };
        let auth = RegistryAuth::resolve(&config, Some(&store), "ghcr.io").unwrap();
        assert!(auth.is_anonymous());
    }

    #[test]
    fn test_resolve_falls_back_to_store_then_anonymous() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save("ghcr.io", "stored", "secret").unwrap();

        let config = RegistryConfig::default();
        assert_eq!(
            RegistryAuth::resolve(&config, Some(&store), "ghcr.io").unwrap(),
            RegistryAuth::basic("stored", "secret")
        );
        assert!(RegistryAuth::resolve(&config, Some(&store), "quay.io")
            .unwrap()
            .is_anonymous());
        assert!(RegistryAuth::resolve(&config, None, "ghcr.io")
            .unwrap()
            .is_anonymous());
    }

    #[test]
    fn test_missing_ca_cert_is_config_error() {
        let config = RegistryConfig {
            ca_cert_paths: vec!["/nonexistent/ca.pem".into()],
            ..Default::default()
        };
        assert!(matches!(
            OciRegistry::with_store(config, None),
            Err(PkgError::ConfigError(_))
        ));
    }

    #[test]
    fn test_to_oci_reference_with_tag() {
        let reference = ImageReference::parse("ghcr.io/org/bundle:v0.1.0").unwrap();
        let oci_ref = OciRegistry::to_oci_reference(&reference).unwrap();
        assert_eq!(oci_ref.to_string(), "ghcr.io/org/bundle:v0.1.0");
    }

    #[test]
    fn test_to_oci_reference_prefers_digest() {
        let digest = Digest::of(b"manifest");
        let reference = ImageReference::parse("ghcr.io/org/bundle:v1")
            .unwrap()
            .with_digest(digest.clone());
        let oci_ref = OciRegistry::to_oci_reference(&reference).unwrap();
        assert_eq!(oci_ref.digest(), Some(digest.as_str()));
    }
}
