//! Integration test: push, pull and relocate a bundle end to end.
//!
//! Everything runs against the in-process `MemoryRegistry`:
//!
//! 1. Push a bundle made of `README.md`, `config/config.yml` and `.imgpkg/`
//! 2. Pull it back and compare every file byte for byte
//! 3. Copy the bundle with its images to another repository
//! 4. Copy again and check nothing is written
//!
//! ```bash
//! cargo test -p imgpkg-engine --test bundle_relocation
//! ```

use std::fs;
use std::path::Path;

use imgpkg_engine::bundle::{BundleContents, BundleLock, ContentKind, ImagesLock};
use imgpkg_engine::copy::{CopyOptions, CopySource, Copier};
use imgpkg_engine::oci::ImageReference;
use imgpkg_engine::pull::{PullSource, Puller};
use imgpkg_engine::push::Pusher;
use imgpkg_engine::registry::{ManifestReader, MemoryRegistry, TagLister};
use tempfile::TempDir;

const IMAGE_COUNT: usize = 3;

fn write(root: &Path, path: &str, contents: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
}

fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                files.push((relative, fs::read(&path).unwrap()));
            }
        }
    }
    files.sort();
    files
}

async fn push_images(registry: &MemoryRegistry) -> Vec<ImageReference> {
    let mut images = Vec::new();
    for n in 0..IMAGE_COUNT {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app", &format!("application {n}"));
        let pushed = Pusher::new(registry)
            .push(
                &BundleContents::new(vec![dir.path().to_path_buf()], vec![]),
                &ImageReference::parse(&format!("source.local/apps/app{n}:1.0")).unwrap(),
                ContentKind::Image,
                None,
            )
            .await
            .unwrap();
        images.push(pushed.image_url);
    }
    images
}

fn bundle_tree(images: &[ImageReference]) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "README.md", "# Sample bundle\n");
    write(dir.path(), "config/config.yml", "replicas: 3\n");
    write(dir.path(), ".imgpkg/bundle.yml", "apiVersion: imgpkg.carvel.dev/v1alpha1\nkind: Bundle\n");

    let mut lock = "apiVersion: imgpkg.carvel.dev/v1alpha1\nkind: ImagesLock\nimages:\n".to_string();
    for image in images {
        lock.push_str(&format!("- image: {}\n", image));
    }
    write(dir.path(), ".imgpkg/images.yml", &lock);
    dir
}

#[tokio::test]
async fn test_push_pull_round_trip() {
    let registry = MemoryRegistry::new();
    let images = push_images(&registry).await;
    let tree = bundle_tree(&images);
    let work = TempDir::new().unwrap();
    let lock_path = work.path().join("bundle.lock.yml");
    let destination = ImageReference::parse("source.local/bundles/sample:v1").unwrap();

    let pushed = Pusher::new(&registry)
        .push(
            &BundleContents::new(vec![tree.path().to_path_buf()], vec![]),
            &destination,
            ContentKind::Bundle,
            Some(&lock_path),
        )
        .await
        .unwrap();

    let stored = registry.get_manifest(&destination).await.unwrap();
    let lock = BundleLock::from_path(&lock_path).unwrap();
    assert_eq!(
        lock.spec.image.url,
        format!("source.local/bundles/sample@{}", stored.digest())
    );
    assert_eq!(lock.spec.image.tag, "v1");
    assert_eq!(pushed.digest, stored.digest());

    let out = work.path().join("pulled");
    let outcome = Puller::new(&registry)
        .pull(&PullSource::BundleLock(lock_path), &out, ContentKind::Bundle)
        .await
        .unwrap();
    assert_eq!(outcome.image_count, IMAGE_COUNT);
    assert_eq!(read_tree(&out), read_tree(tree.path()));
}

#[tokio::test]
async fn test_repeated_push_has_same_digest() {
    let registry = MemoryRegistry::new();
    let tree = bundle_tree(&push_images(&registry).await);
    let contents = BundleContents::new(vec![tree.path().to_path_buf()], vec![]);
    let pusher = Pusher::new(&registry);

    let first = pusher
        .push(
            &contents,
            &ImageReference::parse("source.local/bundles/sample:a").unwrap(),
            ContentKind::Bundle,
            None,
        )
        .await
        .unwrap();
    let second = pusher
        .push(
            &contents,
            &ImageReference::parse("source.local/bundles/sample:b").unwrap(),
            ContentKind::Bundle,
            None,
        )
        .await
        .unwrap();

    assert_eq!(first.digest, second.digest);
    let tags = registry
        .list_tags(&ImageReference::parse_repository("source.local/bundles/sample").unwrap())
        .await
        .unwrap();
    assert_eq!(tags, vec!["a", "b"]);
}

#[tokio::test]
async fn test_relocate_bundle_with_images() {
    let registry = MemoryRegistry::new();
    let images = push_images(&registry).await;
    let tree = bundle_tree(&images);
    let bundle = Pusher::new(&registry)
        .push(
            &BundleContents::new(vec![tree.path().to_path_buf()], vec![]),
            &ImageReference::parse("source.local/bundles/sample:v1").unwrap(),
            ContentKind::Bundle,
            None,
        )
        .await
        .unwrap();

    let destination = ImageReference::parse_repository("target.local/mirror").unwrap();
    let source = CopySource::Reference {
        reference: ImageReference::parse("source.local/bundles/sample:v1").unwrap(),
        expected: Some(ContentKind::Bundle),
    };
    let work = TempDir::new().unwrap();
    let options = CopyOptions {
        concurrency: 2,
        lock_output: Some(work.path().join("relocated.yml")),
        ..Default::default()
    };
    let copier = Copier::new(&registry, &registry);

    let report = copier.copy(&source, &destination, &options).await.unwrap();
    assert_eq!(report.manifests_copied, IMAGE_COUNT + 1);
    assert_eq!(registry.manifest_count(&destination), IMAGE_COUNT + 1);
    for image in images.iter().chain([&bundle.image_url]) {
        let digest = image.digest.clone().unwrap();
        assert!(registry.contains_manifest(&destination, &digest));
        let source_bytes = registry.get_manifest(image).await.unwrap().bytes;
        let copied_bytes = registry
            .get_manifest(&destination.with_digest(digest))
            .await
            .unwrap()
            .bytes;
        assert_eq!(source_bytes, copied_bytes);
    }

    let relocated = &report.relocated_locks[&bundle.digest];
    assert_eq!(relocated.images.len(), IMAGE_COUNT);
    for (entry, original) in relocated.images.iter().zip(&images) {
        let moved = ImageReference::parse(&entry.image).unwrap();
        assert_eq!(moved.context(), "target.local/mirror");
        assert_eq!(moved.digest, original.digest);
    }

    let written = ImagesLock::from_path(&work.path().join("relocated.yml")).unwrap();
    assert_eq!(
        written.images[0].image,
        destination.with_digest(bundle.digest.clone()).to_string()
    );

    // Pulling the relocated bundle yields the same tree
    let out = work.path().join("pulled");
    Puller::new(&registry)
        .pull(
            &PullSource::Reference(destination.with_tag("v1")),
            &out,
            ContentKind::Bundle,
        )
        .await
        .unwrap();
    assert_eq!(read_tree(&out), read_tree(tree.path()));

    let before = registry.write_counts();
    let again = copier.copy(&source, &destination, &options).await.unwrap();
    assert_eq!(registry.write_counts(), before);
    assert_eq!(again.manifests_copied, 0);
    assert_eq!(again.manifests_skipped, IMAGE_COUNT + 1);
}
