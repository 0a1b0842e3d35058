//! Creating a pack: importing a directory and writing its manifest.

use crate::cancel::CancelToken;
use crate::dag::{DagBuilder, ImportSettings};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::manifest::{ManifestRecord, ManifestWriter};
use crate::pack_tree::PackTree;
use crate::store::Store;
use serde::Serialize;
use std::path::{Component, Path};

/// Outcome of a successful make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MakeReport {
    /// Hash of the pack's root directory node.
    pub root: Hash,
    /// Files imported.
    pub files: usize,
    /// Total file bytes imported.
    pub bytes: u64,
}

/// Import every regular file under `workdir` and write `manifest`.
///
/// Hidden entries are skipped, which keeps the store directory out of the
/// pack. Entries are visited sorted by name; one record is written per file,
/// followed by a `.` record holding the root directory hash. Symlinks and
/// other special files are rejected. The manifest is replaced only once
/// everything has been imported.
pub fn make_pack(
    workdir: &Path,
    manifest: &Path,
    store: &Store,
    settings: &ImportSettings,
    cancel: &CancelToken,
) -> Result<MakeReport> {
    let fingerprint = settings.fingerprint();
    let builder = DagBuilder::new(store, *settings)?;
    let mut tree = PackTree::new();
    let mut records = Vec::new();
    let mut bytes = 0;

    let skip = manifest.to_path_buf();
    let walker = ignore::WalkBuilder::new(workdir)
        .standard_filters(false)
        .hidden(true) // Skips the store directory too
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| entry.path() != skip.as_path())
        .build();

    for entry in walker {
        cancel.check()?;
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let rel = relative_path(workdir, entry.path())?;
        let file_type = entry
            .file_type()
            .ok_or_else(|| Error::UnsupportedFileType { path: rel.clone() })?;
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            return Err(Error::UnsupportedFileType { path: rel });
        }

        let link = builder.add_file(entry.path())?;
        if let Some((parent, _)) = rel.rsplit_once('/') {
            tree.mkdir_all(parent)?;
        }
        tree.put_node(&rel, link)?;
        bytes += link.size;
        records.push(ManifestRecord::new(link.hash, fingerprint.as_str(), rel));
    }

    let root = tree.finalize(&builder)?;
    drop(builder);

    let mut writer = ManifestWriter::create(manifest)?;
    for record in &records {
        writer.append(record)?;
    }
    writer.append(&ManifestRecord::new(root, fingerprint, "."))?;
    writer.finish()?;

    tracing::info!(%root, files = records.len(), bytes, "made pack");
    Ok(MakeReport {
        root,
        files: records.len(),
        bytes,
    })
}

/// `/`-separated path of `path` below `workdir`.
fn relative_path(workdir: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(workdir)
        .map_err(|_| Error::invalid_path(path.display().to_string(), "outside the pack"))?;

    let mut names = Vec::new();
    for component in rel.components() {
        let Component::Normal(name) = component else {
            return Err(Error::invalid_path(
                rel.display().to_string(),
                "unexpected path component",
            ));
        };
        let name = name
            .to_str()
            .ok_or_else(|| Error::invalid_path(rel.display().to_string(), "not valid UTF-8"))?;
        names.push(name);
    }
    Ok(names.join("/"))
}
