//! Registry connection flags shared by every command that talks to a registry.

use std::path::PathBuf;

use clap::{ArgAction, Args};
use imgpkg_core::RegistryConfig;

#[derive(Args, Debug, Clone)]
pub struct RegistryFlags {
    /// Username for registry authentication
    #[arg(long = "registry-username")]
    pub username: Option<String>,

    /// Password for registry authentication
    #[arg(long = "registry-password")]
    pub password: Option<String>,

    /// Skip credential lookup and connect anonymously
    #[arg(long = "registry-anon")]
    pub anon: bool,

    /// Allow plain HTTP registries
    #[arg(long = "registry-insecure")]
    pub insecure: bool,

    /// Verify the registry's TLS certificate
    #[arg(
        long = "registry-verify-certs",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub verify_certs: bool,

    /// Extra CA certificate (PEM) to trust; may be repeated
    #[arg(long = "registry-ca-cert-path")]
    pub ca_cert_paths: Vec<PathBuf>,
}

impl RegistryFlags {
    /// Registry settings from these flags, with unset credentials taken from the environment.
    pub fn to_config(&self) -> RegistryConfig {
        RegistryConfig {
            ca_cert_paths: self.ca_cert_paths.clone(),
            verify_certs: self.verify_certs,
            insecure: self.insecure,
            username: self.username.clone(),
            password: self.password.clone(),
            anonymous: self.anon,
        }
        .with_env()
    }
}
