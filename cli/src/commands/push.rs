//! `imgpkg push` command - Pack files and push them as an image or bundle.

use std::path::PathBuf;

use clap::Args;
use imgpkg_core::PkgError;
use imgpkg_engine::bundle::DEFAULT_EXCLUDED;
use imgpkg_engine::{BundleContents, ContentKind, ImageReference, Pusher};

use super::RegistryFlags;

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Image reference to push to (e.g., "registry.local/app:v1")
    #[arg(short = 'i', long)]
    pub image: Option<String>,

    /// Bundle reference to push to
    #[arg(short = 'b', long)]
    pub bundle: Option<String>,

    /// File or directory to include; may be repeated
    #[arg(short = 'f', long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// Path to leave out; may be repeated
    #[arg(long = "file-exclude")]
    pub file_exclude: Vec<PathBuf>,

    /// Also leave out `.git` wherever it appears
    #[arg(long = "file-exclude-defaults")]
    pub file_exclude_defaults: bool,

    /// Write a BundleLock describing the pushed bundle
    #[arg(long = "lock-output")]
    pub lock_output: Option<PathBuf>,

    #[command(flatten)]
    pub registry: RegistryFlags,
}

impl PushArgs {
    /// Destination and kind selected by `-i`/`-b`.
    fn target(&self) -> Result<(ImageReference, ContentKind), PkgError> {
        let (reference, kind) = match (&self.image, &self.bundle) {
            (Some(_), Some(_)) => {
                return Err(PkgError::Validation(
                    "Expected only one of image or bundle".to_string(),
                ))
            }
            (None, None) => {
                return Err(PkgError::Validation(
                    "Expected either image or bundle".to_string(),
                ))
            }
            (Some(image), None) => (image, ContentKind::Image),
            (None, Some(bundle)) => (bundle, ContentKind::Bundle),
        };
        if kind == ContentKind::Image && self.lock_output.is_some() {
            return Err(PkgError::Validation(
                "Lock output is not compatible with image, use bundle for lock output".to_string(),
            ));
        }
        Ok((ImageReference::parse(reference)?, kind))
    }

    fn contents(&self) -> BundleContents {
        let mut excluded = self.file_exclude.clone();
        if self.file_exclude_defaults {
            excluded.extend(DEFAULT_EXCLUDED.iter().map(PathBuf::from));
        }
        BundleContents::new(self.files.clone(), excluded)
    }
}

pub async fn execute(args: PushArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (destination, kind) = args.target()?;
    let contents = args.contents();
    contents.validate(kind)?;

    let registry = super::open_registry(&args.registry)?;
    let outcome = Pusher::new(&registry)
        .push(&contents, &destination, kind, args.lock_output.as_deref())
        .await?;

    println!("Pushed '{}'", outcome.image_url);
    if let Some(path) = &args.lock_output {
        println!("Wrote lock to '{}'", path.display());
    }
    println!("Succeeded");
    Ok(())
}
