//! Relocation: copy a reference closure into one destination repository.
//!
//! Manifests and blobs are copied byte for byte, so every digest stays
//! valid at the destination. Nodes are written leaves first, a manifest
//! only after its blobs, and root tags after everything else.

mod closure;

pub use closure::{Closure, Node};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use imgpkg_core::config::{CopyConfig, DEFAULT_CONCURRENCY};
use imgpkg_core::error::{PkgError, Result};
use imgpkg_core::log::{PrefixWriter, PrefixedLogger};

use crate::bundle::{BundleLock, ContentKind, ImageRef, ImagesLock};
use crate::oci::reference::{Digest, ImageReference};
use crate::registry::{RegistryReader, RegistryWriter};

const BUNDLE_AS_IMAGE_HINT: &str =
    "Expected bundle flag when copying a bundle, please use -b instead of -i";
const IMAGE_AS_BUNDLE_HINT: &str =
    "Expected image flag when copying a image or index, please use -i instead of -b";

/// What to copy.
#[derive(Debug, Clone)]
pub enum CopySource {
    /// One image, index or bundle; `expected` is checked against the root
    Reference {
        reference: ImageReference,
        expected: Option<ContentKind>,
    },
    /// A BundleLock file: `spec.image.url`, tagged with `spec.image.tag`
    BundleLock(PathBuf),
    /// An ImagesLock file: every listed image is a root
    ImagesLock(PathBuf),
}

/// Tuning for one copy.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub concurrency: usize,
    /// Expand ImagesLocks of nested bundles too
    pub recursive: bool,
    /// Write an ImagesLock of the relocated roots here
    pub lock_output: Option<PathBuf>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            recursive: true,
            lock_output: None,
        }
    }
}

impl From<&CopyConfig> for CopyOptions {
    fn from(config: &CopyConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            recursive: config.recursive,
            lock_output: None,
        }
    }
}

/// A root after relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocatedRoot {
    pub source: ImageReference,
    /// `destination@digest`
    pub destination: ImageReference,
    /// Tag written at the destination, if the source had one
    pub tag: Option<String>,
    pub kind: ContentKind,
}

/// What a copy did.
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub roots: Vec<RelocatedRoot>,
    pub manifests_copied: usize,
    pub manifests_skipped: usize,
    pub blobs_copied: usize,
    pub blobs_skipped: usize,
    pub tags_written: usize,
    /// Every expanded bundle's ImagesLock, pointing at the destination
    pub relocated_locks: BTreeMap<Digest, ImagesLock>,
    /// ImagesLock written to `lock_output`
    pub lock: Option<ImagesLock>,
}

impl CopyReport {
    /// Manifests in the closure.
    pub fn total_manifests(&self) -> usize {
        self.manifests_copied + self.manifests_skipped
    }
}

struct Root {
    reference: ImageReference,
    tag: Option<String>,
    annotations: BTreeMap<String, String>,
    expected: Option<ContentKind>,
}

#[derive(Default)]
struct NodeStats {
    manifest_copied: bool,
    blobs_copied: usize,
    blobs_skipped: usize,
}

/// Copies closures from `source` into repositories of `destination`.
pub struct Copier<S, D> {
    source: S,
    destination: D,
    logger: PrefixedLogger,
}

impl<S: RegistryReader, D: RegistryWriter> Copier<S, D> {
    pub fn new(source: S, destination: D) -> Self {
        Self {
            source,
            destination,
            logger: PrefixedLogger::discard(),
        }
    }

    /// Send progress lines to `logger`.
    pub fn with_logger(mut self, logger: PrefixedLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Copy everything reachable from `source` into `repository`.
    pub async fn copy(
        &self,
        source: &CopySource,
        repository: &ImageReference,
        options: &CopyOptions,
    ) -> Result<CopyReport> {
        if repository.tag.is_some() || repository.digest.is_some() {
            return Err(PkgError::Validation(format!(
                "Expected destination '{}' to be a repository without tag or digest",
                repository
            )));
        }
        let concurrency = options.concurrency.max(1);
        let roots = resolve_roots(source)?;
        let log = self.logger.writer("copy | ");

        log.line(format_args!(
            "copying {} root(s) to {}",
            roots.len(),
            repository.context()
        ));

        let root_refs: Vec<ImageReference> = roots.iter().map(|r| r.reference.clone()).collect();
        let closure =
            Closure::discover(&self.source, &root_refs, options.recursive, concurrency).await?;

        for (root, digest) in roots.iter().zip(&closure.roots) {
            if let (Some(expected), Some(node)) = (root.expected, closure.nodes.get(digest)) {
                check_kind(&root.reference, expected, node.kind())?;
            }
        }

        log.line(format_args!(
            "found {} manifest(s) to relocate",
            closure.nodes.len()
        ));

        let mut report = CopyReport::default();
        for level in closure.levels() {
            let stats: Vec<NodeStats> = stream::iter(level.iter().filter_map(|d| closure.nodes.get(d)))
                .map(|node| self.copy_node(node, repository, concurrency, &log))
                .buffer_unordered(concurrency)
                .try_collect()
                .await?;
            for s in stats {
                if s.manifest_copied {
                    report.manifests_copied += 1;
                } else {
                    report.manifests_skipped += 1;
                }
                report.blobs_copied += s.blobs_copied;
                report.blobs_skipped += s.blobs_skipped;
            }
        }

        for (root, digest) in roots.iter().zip(&closure.roots) {
            let Some(node) = closure.nodes.get(digest) else {
                continue;
            };
            if let Some(tag) = &root.tag {
                let tagged = repository.with_tag(tag.clone());
                if self.destination.manifest_digest(&tagged).await?.as_ref() != Some(digest) {
                    self.put_manifest(&tagged, node).await?;
                    report.tags_written += 1;
                    log.line(format_args!("tagged {}", tagged));
                }
            }
            report.roots.push(RelocatedRoot {
                source: root.reference.clone(),
                destination: repository.with_digest(digest.clone()),
                tag: root.tag.clone(),
                kind: node.kind(),
            });
        }

        for node in closure.nodes.values() {
            if let Some(lock) = &node.images_lock {
                report
                    .relocated_locks
                    .insert(node.digest.clone(), lock.relocated_to(repository)?);
            }
        }

        if let Some(path) = &options.lock_output {
            let lock = roots_lock(&roots, &report.roots);
            write_lock(&lock, path)?;
            report.lock = Some(lock);
        }

        log.line(format_args!(
            "done: {} manifest(s) copied, {} already present, {} blob(s) uploaded",
            report.manifests_copied, report.manifests_skipped, report.blobs_copied
        ));
        tracing::info!(
            destination = %repository.context(),
            manifests = report.total_manifests(),
            copied = report.manifests_copied,
            blobs = report.blobs_copied,
            "Copy finished"
        );

        Ok(report)
    }

    async fn copy_node(
        &self,
        node: &Node,
        repository: &ImageReference,
        concurrency: usize,
        log: &PrefixWriter,
    ) -> Result<NodeStats> {
        let target = repository.with_digest(node.digest.clone());
        if self.destination.has_manifest(&target).await? {
            tracing::debug!(digest = %node.digest, "Manifest already present");
            return Ok(NodeStats::default());
        }

        let mut stats = NodeStats {
            manifest_copied: true,
            ..Default::default()
        };
        let copied: Vec<bool> = stream::iter(node.document.blobs())
            .map(|blob| async move {
                let digest = blob.digest()?;
                self.copy_blob(&node.source, repository, &digest).await
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;
        for was_copied in copied {
            if was_copied {
                stats.blobs_copied += 1;
            } else {
                stats.blobs_skipped += 1;
            }
        }

        self.put_manifest(&target, node).await?;
        log.line(format_args!("copied {} ({})", node.source, node.kind()));
        Ok(stats)
    }

    /// Returns false when the destination already had the blob.
    async fn copy_blob(
        &self,
        from: &ImageReference,
        repository: &ImageReference,
        digest: &Digest,
    ) -> Result<bool> {
        if self.destination.has_blob(repository, digest).await? {
            return Ok(false);
        }
        let data = self.source.get_blob(from, digest).await?;
        let actual = Digest::of(&data);
        if actual != *digest {
            return Err(PkgError::DigestMismatch {
                subject: format!("blob from {}", from.context()),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        self.destination.put_blob(repository, digest, &data).await?;
        tracing::debug!(digest = %digest, size = data.len(), "Copied blob");
        Ok(true)
    }

    async fn put_manifest(&self, target: &ImageReference, node: &Node) -> Result<()> {
        let reported = self.destination.put_manifest(target, &node.manifest).await?;
        if reported != node.digest {
            return Err(PkgError::DigestMismatch {
                subject: format!("manifest copied to {}", target),
                expected: node.digest.to_string(),
                actual: reported.to_string(),
            });
        }
        Ok(())
    }
}

fn resolve_roots(source: &CopySource) -> Result<Vec<Root>> {
    match source {
        CopySource::Reference {
            reference,
            expected,
        } => Ok(vec![Root {
            reference: reference.clone(),
            tag: reference.tag.clone(),
            annotations: BTreeMap::new(),
            expected: *expected,
        }]),
        CopySource::BundleLock(path) => {
            let lock = BundleLock::from_path(path)?;
            Ok(vec![Root {
                reference: lock.image_reference()?,
                tag: Some(lock.spec.image.tag.clone()).filter(|t| !t.is_empty()),
                annotations: BTreeMap::new(),
                expected: Some(ContentKind::Bundle),
            }])
        }
        CopySource::ImagesLock(path) => {
            let lock = ImagesLock::from_path(path)?;
            lock.images
                .iter()
                .map(|image| {
                    Ok(Root {
                        reference: image.reference()?,
                        tag: None,
                        annotations: image.annotations.clone(),
                        expected: None,
                    })
                })
                .collect()
        }
    }
}

fn check_kind(reference: &ImageReference, expected: ContentKind, actual: ContentKind) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    let hint = match actual {
        ContentKind::Bundle => BUNDLE_AS_IMAGE_HINT,
        ContentKind::Image => IMAGE_AS_BUNDLE_HINT,
    };
    Err(PkgError::KindMismatch {
        reference: reference.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
        hint: hint.to_string(),
    })
}

fn roots_lock(roots: &[Root], relocated: &[RelocatedRoot]) -> ImagesLock {
    let mut images: Vec<ImageRef> = Vec::new();
    for (root, moved) in roots.iter().zip(relocated) {
        let image = moved.destination.to_string();
        if images.iter().any(|existing| existing.image == image) {
            continue;
        }
        images.push(ImageRef {
            image,
            annotations: root.annotations.clone(),
            metadata: None,
        });
    }
    ImagesLock::new(images)
}

fn write_lock(lock: &ImagesLock, path: &Path) -> Result<()> {
    lock.write_to_path(path)?;
    tracing::debug!(path = %path.display(), images = lock.images.len(), "Wrote lock output");
    Ok(())
}
