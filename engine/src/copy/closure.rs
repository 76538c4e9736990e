//! Reference closure: every manifest reachable from the copy roots.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::stream::{self, StreamExt, TryStreamExt};
use imgpkg_core::error::{PkgError, Result};

use crate::bundle::{images_lock_path, ContentKind, ImagesLock};
use crate::oci::layers::read_file;
use crate::oci::manifest::{ManifestDocument, RawManifest};
use crate::oci::reference::{Digest, ImageReference};
use crate::registry::RegistryReader;

/// One manifest in the closure.
#[derive(Debug, Clone)]
pub struct Node {
    /// Where the manifest was found, addressed by digest
    pub source: ImageReference,
    pub digest: Digest,
    pub manifest: RawManifest,
    pub document: ManifestDocument,
    /// Digests of index children and ImagesLock entries
    pub children: Vec<Digest>,
    /// The bundle's own ImagesLock, when it was expanded
    pub images_lock: Option<ImagesLock>,
}

impl Node {
    pub fn kind(&self) -> ContentKind {
        if !self.document.is_index() && self.document.is_bundle() {
            ContentKind::Bundle
        } else {
            ContentKind::Image
        }
    }
}

/// Nodes keyed by digest, plus the digests of the roots in input order.
#[derive(Debug, Default)]
pub struct Closure {
    pub nodes: BTreeMap<Digest, Node>,
    pub roots: Vec<Digest>,
}

struct Visit {
    reference: ImageReference,
    expand_lock: bool,
}

impl Closure {
    /// Walk from `roots`, fetching up to `concurrency` manifests at a time.
    ///
    /// Root bundles always have their ImagesLock expanded; nested bundles
    /// only when `recursive` is set.
    pub async fn discover<R: RegistryReader>(
        registry: &R,
        roots: &[ImageReference],
        recursive: bool,
        concurrency: usize,
    ) -> Result<Self> {
        let mut closure = Closure::default();
        let mut queued: HashSet<Digest> = HashSet::new();
        let mut frontier: Vec<Visit> = roots
            .iter()
            .map(|reference| Visit {
                reference: reference.clone(),
                expand_lock: true,
            })
            .collect();
        let mut first_level = true;

        while !frontier.is_empty() {
            let fetched: Vec<Node> = stream::iter(frontier.into_iter().map(|visit| async move {
                fetch_node(registry, visit.reference, visit.expand_lock).await
            }))
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

            let mut next = Vec::new();
            for node in fetched {
                if first_level {
                    closure.roots.push(node.digest.clone());
                }
                if !queued.insert(node.digest.clone()) {
                    continue;
                }
                for child in child_references(&node)? {
                    if let Some(digest) = &child.digest {
                        if queued.contains(digest) || closure.nodes.contains_key(digest) {
                            continue;
                        }
                    }
                    next.push(Visit {
                        reference: child,
                        expand_lock: recursive,
                    });
                }
                closure.nodes.insert(node.digest.clone(), node);
            }

            // Several parents may name the same child
            let mut seen = HashSet::new();
            next.retain(|visit| seen.insert(visit.reference.clone()));
            frontier = next;
            first_level = false;
        }

        tracing::debug!(
            roots = closure.roots.len(),
            nodes = closure.nodes.len(),
            "Discovered reference closure"
        );
        Ok(closure)
    }

    /// Digests grouped by height, leaves first.
    ///
    /// Every node appears in a later level than all of its children.
    pub fn levels(&self) -> Vec<Vec<Digest>> {
        let mut heights: HashMap<&Digest, usize> = HashMap::new();
        for digest in self.nodes.keys() {
            self.height(digest, &mut heights, &mut HashSet::new());
        }

        let mut levels: Vec<Vec<Digest>> = Vec::new();
        for (digest, height) in heights {
            if levels.len() <= height {
                levels.resize_with(height + 1, Vec::new);
            }
            levels[height].push(digest.clone());
        }
        for level in &mut levels {
            level.sort();
        }
        levels
    }

    fn height<'a>(
        &'a self,
        digest: &'a Digest,
        heights: &mut HashMap<&'a Digest, usize>,
        in_progress: &mut HashSet<&'a Digest>,
    ) -> usize {
        if let Some(height) = heights.get(digest) {
            return *height;
        }
        let Some(node) = self.nodes.get(digest) else {
            return 0;
        };
        // A cycle cannot be ordered; treat the back edge as a leaf
        if !in_progress.insert(digest) {
            return 0;
        }
        let height = node
            .children
            .iter()
            .filter(|child| self.nodes.contains_key(*child))
            .map(|child| self.height(child, heights, in_progress) + 1)
            .max()
            .unwrap_or(0);
        in_progress.remove(digest);
        heights.insert(digest, height);
        height
    }
}

async fn fetch_node<R: RegistryReader>(
    registry: &R,
    reference: ImageReference,
    expand_lock: bool,
) -> Result<Node> {
    let manifest = registry.get_manifest(&reference).await?;
    let digest = manifest.digest();
    if let Some(expected) = &reference.digest {
        if *expected != digest {
            return Err(PkgError::DigestMismatch {
                subject: format!("manifest {}", reference),
                expected: expected.to_string(),
                actual: digest.to_string(),
            });
        }
    }
    let document = manifest.document()?;
    let source = reference.with_digest(digest.clone());

    let mut children = Vec::new();
    for child in &document.manifests {
        children.push(child.digest()?);
    }

    let mut images_lock = None;
    if expand_lock && !document.is_index() && document.is_bundle() {
        if let Some(lock) = read_images_lock(registry, &source, &document).await? {
            for image in lock.references()? {
                if let Some(child) = image.digest {
                    children.push(child);
                }
            }
            images_lock = Some(lock);
        }
    }

    tracing::debug!(
        reference = %source,
        children = children.len(),
        bundle = document.is_bundle(),
        "Fetched closure node"
    );

    Ok(Node {
        source,
        digest,
        manifest,
        document,
        children,
        images_lock,
    })
}

/// Find `.imgpkg/images.yml` in the bundle's layers (last layer wins).
async fn read_images_lock<R: RegistryReader>(
    registry: &R,
    source: &ImageReference,
    document: &ManifestDocument,
) -> Result<Option<ImagesLock>> {
    let wanted = images_lock_path();
    let mut found = None;
    for layer in &document.layers {
        let digest = layer.digest()?;
        let data = registry.get_blob(source, &digest).await?;
        let actual = Digest::of(&data);
        if actual != digest {
            return Err(PkgError::DigestMismatch {
                subject: format!("layer of {}", source),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        let gzip = layer.is_gzip() || data.starts_with(&[0x1f, 0x8b]);
        if let Some(contents) = read_file(&data, gzip, &wanted)? {
            found = Some(contents);
        }
    }

    match found {
        Some(contents) => {
            let text = String::from_utf8(contents).map_err(|e| PkgError::Lock {
                path: format!("{}:{}", source, wanted),
                message: e.to_string(),
            })?;
            ImagesLock::parse(&text, &format!("{}:{}", source, wanted)).map(Some)
        }
        None => Ok(None),
    }
}

/// References to follow from `node`: index children in the node's own
/// repository, ImagesLock entries where the lock says they live.
fn child_references(node: &Node) -> Result<Vec<ImageReference>> {
    let mut children = Vec::new();
    for child in &node.document.manifests {
        children.push(node.source.with_digest(child.digest()?));
    }
    if let Some(lock) = &node.images_lock {
        children.extend(lock.references()?);
    }
    Ok(children)
}
