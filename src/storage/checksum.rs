//! MD5 digest sidecars for archives

use super::{CHECKSUM_EXTENSION, StorageLayout, ZIP_EXTENSION};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Sidecar path of an archive (`<archive>.md5sum`)
pub fn checksum_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// Lower-case hex MD5 of a file, read in chunks
pub fn compute_md5(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Write `<destination>.md5sum` holding the digest of `source` plus a newline
pub fn write_checksum_file(source: &Path, destination: &Path) -> Result<String> {
    let digest = compute_md5(source)?;
    std::fs::write(checksum_path(destination), format!("{digest}\n"))?;
    Ok(digest)
}

/// Digest an archive on a blocking thread and write its sidecar next to it
pub async fn write_checksum(archive: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || write_checksum_file(&archive, &archive))
        .await
        .map_err(|e| Error::Other(format!("checksum task failed: {e}")))?
}

/// Create sidecars for every archive that lacks one
///
/// Archives are looked up under `zips_root` (or the layout root) per format
/// folder; sidecars are written to the matching folder of the layout root.
/// Existing sidecars are detected case-insensitively. Returns the archives that
/// received a new sidecar.
pub fn generate_missing(layout: &StorageLayout, zips_root: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for format in layout.formats() {
        let source_dir = zips_root
            .map(|root| root.join(&format.name))
            .unwrap_or_else(|| layout.format_dir(format));
        let target_dir = layout.format_dir(format);
        if !source_dir.is_dir() {
            tracing::warn!(folder = %source_dir.display(), "Archive folder does not exist, skipping");
            continue;
        }
        std::fs::create_dir_all(&target_dir)?;

        let mut archives = Vec::new();
        let mut sidecars = std::collections::HashSet::new();
        for entry in std::fs::read_dir(&target_dir)? {
            let name = entry?.file_name().to_string_lossy().to_lowercase();
            if name.ends_with(CHECKSUM_EXTENSION) {
                sidecars.insert(name);
            }
        }
        for entry in std::fs::read_dir(&source_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_file() && name.to_lowercase().ends_with(ZIP_EXTENSION) {
                archives.push(name);
            }
        }
        archives.sort();

        for name in archives {
            let sidecar = format!("{name}{CHECKSUM_EXTENSION}").to_lowercase();
            if sidecars.contains(&sidecar) {
                continue;
            }
            let source = source_dir.join(&name);
            let destination = target_dir.join(&name);
            match write_checksum_file(&source, &destination) {
                Ok(digest) => {
                    tracing::info!(archive = %source.display(), %digest, "Created checksum");
                    created.push(source);
                }
                Err(e) => {
                    tracing::error!(archive = %source.display(), error = %e, "Failed to create checksum");
                }
            }
        }
    }
    Ok(created)
}
