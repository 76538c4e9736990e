//! OCI layer extraction utilities.
//!
//! Unpacks layer blobs (tar or tar.gz) to the filesystem and reads single
//! files out of a layer without touching disk.

use std::io::{Cursor, Read};
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use imgpkg_core::error::{PkgError, Result};
use tar::Archive;

fn open_archive(data: &[u8], gzip: bool) -> Archive<Box<dyn Read + '_>> {
    let reader: Box<dyn Read + '_> = if gzip {
        Box::new(GzDecoder::new(Cursor::new(data)))
    } else {
        Box::new(Cursor::new(data))
    };
    Archive::new(reader)
}

/// Extract a single layer blob to `target_dir`.
///
/// Entries escaping the target directory are skipped by the tar crate.
pub fn extract_layer(data: &[u8], gzip: bool, target_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(target_dir).map_err(|e| {
        PkgError::Other(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    let mut archive = open_archive(data, gzip);
    archive.set_preserve_permissions(true);
    archive.unpack(target_dir).map_err(|e| {
        PkgError::Other(format!(
            "Failed to extract layer to {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    tracing::debug!(
        target = %target_dir.display(),
        size = data.len(),
        "Extracted layer"
    );

    Ok(())
}

/// Read the file at `wanted` (relative, `/`-separated) from a layer blob.
pub fn read_file(data: &[u8], gzip: bool, wanted: &str) -> Result<Option<Vec<u8>>> {
    let wanted = normalize(Path::new(wanted));
    let mut archive = open_archive(data, gzip);
    let entries = archive
        .entries()
        .map_err(|e| PkgError::Other(format!("Failed to read layer: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| PkgError::Other(format!("Failed to read layer entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| PkgError::Other(format!("Invalid path in layer: {}", e)))?;
        if normalize(&path) != wanted {
            continue;
        }

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        return Ok(Some(contents));
    }

    Ok(None)
}

/// Drop `.` components and leading separators so `./a/b` and `/a/b` match `a/b`.
fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
