use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of concurrent uploads during copy.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Registry connection and authentication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Extra CA certificates (PEM files) trusted for registry TLS
    #[serde(default)]
    pub ca_cert_paths: Vec<PathBuf>,

    /// Verify the registry's certificate chain and host name
    pub verify_certs: bool,

    /// Allow plain HTTP to these registries
    #[serde(default)]
    pub insecure: bool,

    /// Basic auth username
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    /// Skip credential lookup entirely
    #[serde(default)]
    pub anonymous: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ca_cert_paths: Vec::new(),
            verify_certs: true,
            insecure: false,
            username: None,
            password: None,
            anonymous: false,
        }
    }
}

impl RegistryConfig {
    /// Fill unset fields from `IMGPKG_USERNAME`, `IMGPKG_PASSWORD`, `IMGPKG_ANON`.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.username.as_deref().map_or(true, str::is_empty) {
            self.username = lookup("IMGPKG_USERNAME").filter(|s| !s.is_empty());
            if self.username.is_some() {
                tracing::debug!("Registry username taken from IMGPKG_USERNAME");
            }
        }
        if self.password.as_deref().map_or(true, str::is_empty) {
            self.password = lookup("IMGPKG_PASSWORD").filter(|s| !s.is_empty());
        }
        if lookup("IMGPKG_ANON").as_deref() == Some("true") {
            tracing::debug!("Anonymous registry access requested by IMGPKG_ANON");
            self.anonymous = true;
        }
        self
    }

    /// Explicit basic credentials, if both halves are present.
    pub fn basic_credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

/// Relocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Maximum concurrent node and blob transfers
    pub concurrency: usize,

    /// Follow nested bundles' image locks
    pub recursive: bool,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            recursive: true,
        }
    }
}

impl CopyConfig {
    /// Override concurrency from `IMGPKG_CONCURRENCY` when it parses as a positive number.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("IMGPKG_CONCURRENCY") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => {
                    tracing::debug!(concurrency = n, "Concurrency taken from IMGPKG_CONCURRENCY");
                    self.concurrency = n;
                }
                _ => tracing::warn!(value = %value, "Ignoring invalid IMGPKG_CONCURRENCY"),
            }
        }
        self
    }
}
