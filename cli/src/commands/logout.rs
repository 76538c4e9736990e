//! `imgpkg logout` command - Remove stored registry credentials.

use clap::Args;
use imgpkg_engine::CredentialStore;

#[derive(Args, Debug)]
pub struct LogoutArgs {
    /// Registry server (default: index.docker.io)
    pub server: Option<String>,
}

pub async fn execute(args: LogoutArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = args.server.unwrap_or_else(|| "index.docker.io".to_string());

    let store = CredentialStore::default_path()?;
    if store.forget(&server)? {
        println!("Removing login credentials for {}", server);
    } else {
        println!("Not logged in to {}", server);
    }

    Ok(())
}
