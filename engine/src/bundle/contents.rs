//! Bundle contents: validation of input trees and packing into one layer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, Metadata};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use imgpkg_core::error::{PkgError, Result};
use serde_json::json;
use tar::{Builder, EntryType, Header, HeaderMode};

use super::walk::{EntryKind, Walk, WalkEntry};
use super::IMGPKG_DIR;
use crate::oci::manifest::{
    Descriptor, ManifestDocument, RawManifest, BUNDLE_ANNOTATION, OCI_CONFIG_MEDIA_TYPE,
    OCI_LAYER_GZIP_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE,
};
use crate::oci::reference::Digest;

/// Names excluded by `--file-exclude-defaults`.
pub const DEFAULT_EXCLUDED: &[&str] = &[".git"];

/// What an artifact is meant to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Bundle,
    Image,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Bundle => f.write_str("bundle"),
            ContentKind::Image => f.write_str("image"),
        }
    }
}

/// A blob together with its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub descriptor: Descriptor,
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(media_type: &str, data: Vec<u8>) -> Self {
        Self {
            descriptor: Descriptor::for_blob(media_type, &data),
            data,
        }
    }

    pub fn digest(&self) -> Result<Digest> {
        self.descriptor.digest()
    }
}

/// Output of [`BundleContents::pack`].
#[derive(Debug, Clone)]
pub struct PackedArtifact {
    pub layer: Blob,
    pub config: Blob,
    pub manifest: RawManifest,
}

impl PackedArtifact {
    /// Digest of the manifest bytes.
    pub fn digest(&self) -> Digest {
        self.manifest.digest()
    }
}

/// Input trees plus exclusions.
#[derive(Debug, Clone)]
pub struct BundleContents {
    paths: Vec<PathBuf>,
    excluded: Vec<PathBuf>,
}

struct Collected {
    root: usize,
    entry: WalkEntry,
}

impl BundleContents {
    pub fn new(paths: Vec<PathBuf>, excluded: Vec<PathBuf>) -> Self {
        Self { paths, excluded }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Check the inputs against the rules for `kind` without packing.
    pub fn validate(&self, kind: ContentKind) -> Result<()> {
        let collected = self.collect()?;
        self.validate_entries(&collected, kind)
    }

    /// Whether the inputs have exactly one well-placed `.imgpkg` directory.
    ///
    /// Bundle-shape errors answer `false`; other errors propagate.
    pub fn presents_as_bundle(&self) -> Result<bool> {
        match self.validate(ContentKind::Bundle) {
            Ok(()) => Ok(true),
            Err(e) if e.is_bundle_validation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Validate, then serialize into a single-layer OCI artifact.
    pub fn pack(&self, kind: ContentKind) -> Result<PackedArtifact> {
        let collected = self.collect()?;
        self.validate_entries(&collected, kind)?;

        let tar_bytes = write_tar(&collected)?;
        let diff_id = Digest::of(&tar_bytes);
        let layer = Blob::new(OCI_LAYER_GZIP_MEDIA_TYPE, gzip(&tar_bytes)?);

        let mut labels = serde_json::Map::new();
        let mut annotations = BTreeMap::new();
        if kind == ContentKind::Bundle {
            labels.insert(BUNDLE_ANNOTATION.to_string(), json!("true"));
            annotations.insert(BUNDLE_ANNOTATION.to_string(), "true".to_string());
        }
        let config_json = json!({
            "architecture": "",
            "os": "",
            "config": { "Labels": labels },
            "rootfs": { "type": "layers", "diff_ids": [diff_id.as_str()] },
        });
        let config = Blob::new(OCI_CONFIG_MEDIA_TYPE, serde_json::to_vec(&config_json)?);

        let document = ManifestDocument {
            schema_version: 2,
            media_type: Some(OCI_MANIFEST_MEDIA_TYPE.to_string()),
            config: Some(config.descriptor.clone()),
            layers: vec![layer.descriptor.clone()],
            annotations,
            ..Default::default()
        };
        let manifest = RawManifest::from_document(&document)?;

        tracing::debug!(
            kind = %kind,
            layer_size = layer.data.len(),
            digest = %manifest.digest(),
            "Packed contents"
        );

        Ok(PackedArtifact {
            layer,
            config,
            manifest,
        })
    }

    fn collect(&self) -> Result<Vec<Collected>> {
        let mut collected = Vec::new();
        for (index, root) in self.paths.iter().enumerate() {
            if self.excluded.iter().any(|ex| ex == root) {
                continue;
            }
            let excluded = self.excluded.clone();
            let walk = Walk::new(root).filter_entry(move |e| !is_excluded(e, &excluded));
            for entry in walk {
                collected.push(Collected {
                    root: index,
                    entry: entry?,
                });
            }
        }
        Ok(collected)
    }

    fn validate_entries(&self, collected: &[Collected], kind: ContentKind) -> Result<()> {
        // (directories, everything else) per relative path
        let mut by_relative: BTreeMap<&Path, (BTreeSet<&Path>, BTreeSet<&Path>)> = BTreeMap::new();
        for c in collected {
            let (dirs, others) = by_relative.entry(c.entry.relative.as_path()).or_default();
            if c.entry.kind == EntryKind::Dir {
                dirs.insert(c.entry.path.as_path());
            } else {
                others.insert(c.entry.path.as_path());
            }
        }
        // Directories merge, but a file may neither repeat nor shadow a directory
        let mut duplicates: Vec<String> = by_relative
            .values()
            .filter(|(dirs, others)| others.len() > 1 || (!others.is_empty() && !dirs.is_empty()))
            .flat_map(|(dirs, others)| dirs.iter().chain(others.iter()))
            .map(|p| p.display().to_string())
            .collect();
        if !duplicates.is_empty() {
            duplicates.sort();
            return Err(PkgError::DuplicatePaths { paths: duplicates });
        }

        let bundle_dirs: Vec<&Collected> = collected
            .iter()
            .filter(|c| c.entry.kind == EntryKind::Dir && c.entry.file_name() == Some(IMGPKG_DIR))
            .collect();

        match kind {
            ContentKind::Image => match bundle_dirs.first() {
                Some(found) => Err(PkgError::ImageWithBundleDir {
                    path: found.entry.path.display().to_string(),
                }),
                None => Ok(()),
            },
            ContentKind::Bundle => {
                if bundle_dirs.len() != 1 {
                    return Err(PkgError::BundleDirCount {
                        count: bundle_dirs.len(),
                        paths: bundle_dirs
                            .iter()
                            .map(|c| c.entry.path.display().to_string())
                            .collect(),
                    });
                }
                let found = bundle_dirs[0];
                if found.entry.relative.components().count() != 1 {
                    return Err(PkgError::BundleDirPlacement {
                        path: found.entry.path.display().to_string(),
                        roots: self.paths.iter().map(|p| p.display().to_string()).collect(),
                    });
                }
                tracing::trace!(root = found.root, "Found bundle directory");
                Ok(())
            }
        }
    }
}

fn is_excluded(entry: &WalkEntry, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|ex| {
        *ex == entry.path
            || *ex == entry.relative
            || entry.file_name().map_or(false, |name| ex.as_os_str() == name)
    })
}

/// POSIX-separated relative path for tar headers.
fn tar_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &Metadata) -> u32 {
    0o644
}

fn deterministic_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

fn write_tar(collected: &[Collected]) -> Result<Vec<u8>> {
    // Directories shared by several roots appear once
    let mut ordered: BTreeMap<String, &WalkEntry> = BTreeMap::new();
    for c in collected {
        ordered.entry(tar_path(&c.entry.relative)).or_insert(&c.entry);
    }

    let mut builder = Builder::new(Vec::new());
    builder.mode(HeaderMode::Deterministic);

    for (path, entry) in ordered {
        let tar_err = |e: std::io::Error| {
            PkgError::Other(format!("Failed to add {} to layer: {}", entry.path.display(), e))
        };
        match entry.kind {
            EntryKind::Dir => {
                let mut header = deterministic_header(EntryType::Directory, 0o755, 0);
                builder
                    .append_data(&mut header, &path, std::io::empty())
                    .map_err(tar_err)?;
            }
            EntryKind::File => {
                let data = fs::read(&entry.path).map_err(|e| {
                    PkgError::Other(format!("Failed to read {}: {}", entry.path.display(), e))
                })?;
                let mut header = deterministic_header(
                    EntryType::Regular,
                    file_mode(&entry.metadata),
                    data.len() as u64,
                );
                builder
                    .append_data(&mut header, &path, data.as_slice())
                    .map_err(tar_err)?;
            }
            EntryKind::Symlink => {
                let target = fs::read_link(&entry.path).map_err(|e| {
                    PkgError::Other(format!("Failed to read link {}: {}", entry.path.display(), e))
                })?;
                let mut header = deterministic_header(EntryType::Symlink, 0o777, 0);
                builder
                    .append_link(&mut header, &path, &target)
                    .map_err(tar_err)?;
            }
        }
    }

    builder
        .into_inner()
        .map_err(|e| PkgError::Other(format!("Failed to finish layer: {}", e)))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
