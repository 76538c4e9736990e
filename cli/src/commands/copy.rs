//! `imgpkg copy` command - Relocate an image or bundle and everything it references.

use std::path::{Path, PathBuf};

use clap::Args;
use imgpkg_core::{CopyConfig, PkgError, PrefixedLogger};
use imgpkg_engine::bundle::{lock_kind, BUNDLE_LOCK_KIND};
use imgpkg_engine::{
    BundleLock, ContentKind, CopyOptions, CopySource, Copier, ImageReference,
};

use super::RegistryFlags;

#[derive(Args, Debug)]
pub struct CopyArgs {
    /// Image reference to copy
    #[arg(short = 'i', long)]
    pub image: Option<String>,

    /// Bundle reference to copy
    #[arg(short = 'b', long)]
    pub bundle: Option<String>,

    /// BundleLock or ImagesLock file listing what to copy
    #[arg(long)]
    pub lock: Option<PathBuf>,

    /// Destination repository (e.g., "mirror.local/apps")
    #[arg(long = "to-repo")]
    pub to_repo: String,

    /// Write an ImagesLock of the relocated references
    #[arg(long = "lock-output")]
    pub lock_output: Option<PathBuf>,

    /// Maximum concurrent transfers (default 5, or IMGPKG_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Only relocate images named by the top-level bundles
    #[arg(long = "no-recursive")]
    pub no_recursive: bool,

    #[command(flatten)]
    pub registry: RegistryFlags,
}

impl CopyArgs {
    fn source(&self) -> Result<CopySource, PkgError> {
        match (&self.image, &self.bundle, &self.lock) {
            (Some(image), None, None) => Ok(CopySource::Reference {
                reference: ImageReference::parse(image)?,
                expected: Some(ContentKind::Image),
            }),
            (None, Some(bundle), None) => Ok(CopySource::Reference {
                reference: ImageReference::parse(bundle)?,
                expected: Some(ContentKind::Bundle),
            }),
            (None, None, Some(lock)) => lock_source(lock),
            (None, None, None) => Err(PkgError::Validation(
                "Expected either image, bundle, or lock".to_string(),
            )),
            _ => Err(PkgError::Validation(
                "Expected only one of image, bundle, or lock".to_string(),
            )),
        }
    }

    fn options(&self) -> CopyOptions {
        let mut config = CopyConfig::default().with_env();
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency.max(1);
        }
        config.recursive = !self.no_recursive;

        let mut options = CopyOptions::from(&config);
        options.lock_output = self.lock_output.clone();
        options
    }
}

/// A BundleLock when the file says `kind: BundleLock`, otherwise an ImagesLock.
fn lock_source(path: &Path) -> Result<CopySource, PkgError> {
    if lock_kind(path)? == BUNDLE_LOCK_KIND {
        // Surface BundleLock problems before anything is fetched
        BundleLock::from_path(path)?;
        Ok(CopySource::BundleLock(path.to_path_buf()))
    } else {
        Ok(CopySource::ImagesLock(path.to_path_buf()))
    }
}

pub async fn execute(args: CopyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = args.source()?;
    let repository = ImageReference::parse_repository(&args.to_repo)?;
    let options = args.options();

    let registry = super::open_registry(&args.registry)?;
    let report = Copier::new(&registry, &registry)
        .with_logger(PrefixedLogger::stderr())
        .copy(&source, &repository, &options)
        .await?;

    for root in &report.roots {
        println!("Copied {} '{}' to '{}'", root.kind, root.source, root.destination);
    }
    println!(
        "{} manifest(s) copied, {} already present",
        report.manifests_copied, report.manifests_skipped
    );
    if let Some(path) = &options.lock_output {
        println!("Wrote lock to '{}'", path.display());
    }
    println!("Succeeded");
    Ok(())
}
