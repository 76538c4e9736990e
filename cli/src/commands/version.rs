//! `imgpkg version` command.

use clap::Args;

#[derive(Args, Debug)]
pub struct VersionArgs;

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("imgpkg version {}", imgpkg_core::VERSION);
    Ok(())
}
