//! Registry credentials saved by `imgpkg login`.
//!
//! Kept at `~/.imgpkg/auth/credentials.json`, rewritten through a temporary
//! file and a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use imgpkg_core::error::{PkgError, Result};
use serde::{Deserialize, Serialize};

/// Username and password for one registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    registries: BTreeMap<String, Credential>,
}

/// Credentials keyed by registry host.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store under the user's home directory.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            PkgError::ConfigError("Cannot determine home directory for credential store".to_string())
        })?;
        Ok(Self::new(home.join(".imgpkg").join("auth").join("credentials.json")))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save credentials for `registry`, replacing any previous entry.
    pub fn save(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.load()?;
        file.registries.insert(
            registry_key(registry),
            Credential {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        self.write(&file)
    }

    pub fn lookup(&self, registry: &str) -> Result<Option<Credential>> {
        Ok(self.load()?.registries.remove(&registry_key(registry)))
    }

    /// Drop the entry for `registry`; `false` if there was none.
    pub fn forget(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        if file.registries.remove(&registry_key(registry)).is_none() {
            return Ok(false);
        }
        self.write(&file)?;
        Ok(true)
    }

    /// Registries with saved credentials, sorted.
    pub fn registries(&self) -> Result<Vec<String>> {
        Ok(self.load()?.registries.into_keys().collect())
    }

    fn load(&self) -> Result<CredentialFile> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialFile::default())
            }
            Err(e) => return Err(self.config_error("read", e)),
        };
        serde_json::from_str(&data).map_err(|e| self.config_error("parse", e))
    }

    fn write(&self, file: &CredentialFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.config_error("create", e))?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(file)?)
            .map_err(|e| self.config_error("write", e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| self.config_error("replace", e))
    }

    fn config_error(&self, action: &str, err: impl std::fmt::Display) -> PkgError {
        PkgError::ConfigError(format!(
            "Failed to {} credential store {}: {}",
            action,
            self.path.display(),
            err
        ))
    }
}

/// Docker Hub aliases share one entry; hosts compare case-insensitively.
fn registry_key(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    match r.as_str() {
        "docker.io" | "registry-1.docker.io" => "index.docker.io".to_string(),
        _ => r,
    }
}
