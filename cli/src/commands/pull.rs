//! `imgpkg pull` command - Download an image or bundle into a directory.

use std::path::PathBuf;

use clap::Args;
use imgpkg_core::PkgError;
use imgpkg_engine::{ContentKind, ImageReference, PullSource, Puller};

use super::RegistryFlags;

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference to pull
    #[arg(short = 'i', long)]
    pub image: Option<String>,

    /// Bundle reference to pull
    #[arg(short = 'b', long)]
    pub bundle: Option<String>,

    /// BundleLock file naming the bundle to pull
    #[arg(long)]
    pub lock: Option<PathBuf>,

    /// Directory to unpack into (created if missing)
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub registry: RegistryFlags,
}

impl PullArgs {
    fn source(&self) -> Result<(PullSource, ContentKind), PkgError> {
        match (&self.image, &self.bundle, &self.lock) {
            (Some(image), None, None) => Ok((
                PullSource::Reference(ImageReference::parse(image)?),
                ContentKind::Image,
            )),
            (None, Some(bundle), None) => Ok((
                PullSource::Reference(ImageReference::parse(bundle)?),
                ContentKind::Bundle,
            )),
            (None, None, Some(lock)) => {
                Ok((PullSource::BundleLock(lock.clone()), ContentKind::Bundle))
            }
            (None, None, None) => Err(PkgError::Validation(
                "Expected either image, bundle, or lock".to_string(),
            )),
            _ => Err(PkgError::Validation(
                "Expected only one of image, bundle, or lock".to_string(),
            )),
        }
    }
}

pub async fn execute(args: PullArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (source, expected) = args.source()?;
    let registry = super::open_registry(&args.registry)?;

    let outcome = Puller::new(&registry)
        .pull(&source, &args.output, expected)
        .await?;

    println!("Pulled {} '{}'", outcome.kind, outcome.resolved);
    if outcome.kind == ContentKind::Bundle {
        println!("Bundle references {} image(s)", outcome.image_count);
    }
    println!("Unpacked into {}", args.output.display());
    println!("Succeeded");
    Ok(())
}
