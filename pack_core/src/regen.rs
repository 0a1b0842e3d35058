//! Rebuilding and verifying a pack's block DAG from its manifest.

use crate::cancel::CancelToken;
use crate::dag::{DagBuilder, ImportSettings};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::locate::locate_root;
use crate::manifest::ManifestReader;
use crate::pack_tree::{PackTree, split_rel_path};
use crate::store::Store;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of a successful regen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegenReport {
    /// Reconstructed root, equal to the manifest's root record.
    pub root: Hash,
    /// Files re-imported and verified.
    pub files: usize,
    /// Directory records (including the root record) passed over.
    pub directories_skipped: usize,
}

/// Re-import every file listed in `manifest` and verify it.
///
/// All records are validated first, so a malformed line or a record made with
/// other import settings fails before any file is read or block written. The
/// files are then imported in manifest order; the first hash that differs
/// from its record aborts the run. Blocks written before a failure stay in
/// the store.
pub fn regenerate(
    workdir: &Path,
    manifest: &Path,
    store: &Store,
    settings: &ImportSettings,
    cancel: &CancelToken,
) -> Result<RegenReport> {
    settings.validate()?;
    let records = validate_manifest(manifest, settings)?;
    tracing::info!(records, manifest = %manifest.display(), "validated manifest");

    let builder = DagBuilder::new(store, *settings)?;
    let mut tree = PackTree::new();
    let mut files = 0;
    let mut directories_skipped = 0;

    for item in ManifestReader::open(manifest)? {
        cancel.check()?;
        let (_, record) = item?;

        let components = split_rel_path(&record.path)?;
        let file_path: PathBuf = components
            .iter()
            .fold(workdir.to_path_buf(), |path, name| path.join(name));

        let metadata = match fs::symlink_metadata(&file_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::FileMissingFromPack { path: record.path });
            }
            Err(source) => {
                return Err(Error::FileStat {
                    path: record.path,
                    source,
                });
            }
        };

        if metadata.is_dir() {
            directories_skipped += 1;
            continue;
        }
        if !metadata.is_file() {
            return Err(Error::UnsupportedFileType { path: record.path });
        }

        let link = builder.add_file(&file_path)?;
        if link.hash != record.hash {
            return Err(Error::ChecksumMismatch {
                path: record.path,
                expected: record.hash.to_hex(),
                got: link.hash.to_hex(),
            });
        }

        if let Some((_, parents)) = components.split_last() {
            tree.mkdir_all(&parents.join("/"))?;
        }
        tree.put_node(&record.path, link)?;
        files += 1;
        tracing::debug!(path = %record.path, hash = %link.hash, "verified file");
    }

    let root = tree.finalize(&builder)?;
    drop(builder);

    let expected = locate_root(manifest)?;
    if root != expected {
        return Err(Error::RootMismatch {
            expected: expected.to_hex(),
            got: root.to_hex(),
        });
    }

    tracing::info!(%root, files, "regenerated pack");
    Ok(RegenReport {
        root,
        files,
        directories_skipped,
    })
}

/// Check every record's structure and fingerprint. Returns the record count.
fn validate_manifest(manifest: &Path, settings: &ImportSettings) -> Result<usize> {
    let expected = settings.fingerprint();
    let mut records = 0;

    for item in ManifestReader::open(manifest)? {
        let (line, record) = item?;
        if record.fingerprint != expected {
            return Err(Error::FingerprintMismatch {
                line,
                expected,
                found: record.fingerprint,
            });
        }
        records += 1;
    }

    if records == 0 {
        return Err(Error::EmptyManifest {
            path: manifest.to_path_buf(),
        });
    }
    Ok(records)
}
