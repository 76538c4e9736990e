//! CLI command definitions and dispatch.

mod copy;
mod login;
mod logout;
mod pull;
mod push;
mod registry_flags;
mod tag;
mod version;

use clap::{Parser, Subcommand};
use imgpkg_engine::{CredentialStore, OciRegistry};

pub use registry_flags::RegistryFlags;

/// imgpkg - store sets of files and images as OCI artifacts.
#[derive(Parser)]
#[command(name = "imgpkg", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Push files as an image or bundle
    Push(push::PushArgs),
    /// Pull an image or bundle into a directory
    Pull(pull::PullArgs),
    /// Copy an image or bundle, with its images, to another repository
    Copy(copy::CopyArgs),
    /// Inspect tags
    Tag(tag::TagArgs),
    /// Store registry credentials
    Login(login::LoginArgs),
    /// Remove stored registry credentials
    Logout(logout::LogoutArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Open a registry client with the credential store at its default location.
pub(crate) fn open_registry(
    flags: &RegistryFlags,
) -> Result<OciRegistry, Box<dyn std::error::Error>> {
    // No home directory means no stored logins
    let store = CredentialStore::default_path().ok();
    let config = flags.to_config();
    tracing::debug!(
        insecure = config.insecure,
        anonymous = config.anonymous,
        ca_certs = config.ca_cert_paths.len(),
        "Opening registry client"
    );
    Ok(OciRegistry::with_store(config, store)?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Push(args) => push::execute(args).await,
        Command::Pull(args) => pull::execute(args).await,
        Command::Copy(args) => copy::execute(args).await,
        Command::Tag(args) => tag::execute(args).await,
        Command::Login(args) => login::execute(args).await,
        Command::Logout(args) => logout::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
