//! `imgpkg tag` commands.

use clap::{Args, Subcommand};
use imgpkg_engine::{ImageReference, TagLister};

use super::RegistryFlags;

#[derive(Args, Debug)]
pub struct TagArgs {
    #[command(subcommand)]
    pub command: TagCommand,
}

#[derive(Subcommand, Debug)]
pub enum TagCommand {
    /// List tags of a repository
    List(TagListArgs),
}

#[derive(Args, Debug)]
pub struct TagListArgs {
    /// Repository whose tags to list; a tag or digest is ignored
    #[arg(short = 'i', long)]
    pub image: String,

    #[command(flatten)]
    pub registry: RegistryFlags,
}

pub async fn execute(args: TagArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        TagCommand::List(list) => {
            let reference = ImageReference::parse(&list.image)?;
            let registry = super::open_registry(&list.registry)?;
            for tag in registry.list_tags(&reference).await? {
                println!("{}", tag);
            }
            Ok(())
        }
    }
}
