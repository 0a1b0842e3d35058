//! A pack directory: its manifest, its store and the operations over both.

use crate::cancel::CancelToken;
use crate::dag::ImportSettings;
use crate::error::{Error, Result};
use crate::gc::{Sweep, collect_pack};
use crate::make::{MakeReport, make_pack};
use crate::regen::{RegenReport, regenerate};
use crate::store::{AllKeys, Blockstore, Store};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the manifest at the pack root.
pub const MANIFEST_FILENAME: &str = "PackManifest";

/// Directory name of the block store at the pack root.
pub const STORE_DIRNAME: &str = ".pack-repo";

/// A pack rooted at a working directory.
#[derive(Debug, Clone)]
pub struct Pack {
    workdir: PathBuf,
}

impl Pack {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.workdir.join(MANIFEST_FILENAME)
    }

    pub fn store_path(&self) -> PathBuf {
        self.workdir.join(STORE_DIRNAME)
    }

    pub fn has_store(&self) -> bool {
        Store::is_initialized(&self.store_path())
    }

    /// Open the pack's store, failing with `StoreNotFound` if there is none.
    pub fn open_store(&self) -> Result<Store> {
        let path = self.store_path();
        if !Store::is_initialized(&path) {
            return Err(Error::StoreNotFound { path });
        }
        Store::open(path)
    }

    /// Open the pack's store, initializing it first if needed.
    pub fn open_or_init_store(&self) -> Result<Store> {
        let path = self.store_path();
        if Store::is_initialized(&path) {
            Store::open(path)
        } else {
            tracing::info!(path = %path.display(), "initializing store");
            Store::init(path)
        }
    }

    /// Import the working directory and write a fresh manifest.
    pub fn make(&self, settings: &ImportSettings, cancel: &CancelToken) -> Result<MakeReport> {
        let store = self.open_or_init_store()?;
        make_pack(
            &self.workdir,
            &self.manifest_path(),
            &store,
            settings,
            cancel,
        )
    }

    /// Rebuild the store from the manifest, verifying every file.
    pub fn regen(&self, settings: &ImportSettings, cancel: &CancelToken) -> Result<RegenReport> {
        // Surface a missing manifest before creating a store.
        let manifest = self.manifest_path();
        if !manifest.is_file() {
            return Err(Error::manifest_missing(manifest));
        }

        let store = self.open_or_init_store()?;
        regenerate(&self.workdir, &manifest, &store, settings, cancel)
    }

    /// Start garbage collection rooted at the manifest's root.
    pub fn gc<'a>(&self, store: &'a Store, cancel: &CancelToken) -> Result<Sweep<'a, Store>> {
        collect_pack(store, &self.manifest_path(), cancel)
    }

    /// Lazily list every block in the store.
    pub fn ls(&self) -> Result<AllKeys> {
        self.open_store()?.all_keys()
    }

    /// Delete the pack's store. Pack files and the manifest are untouched.
    pub fn remove_store(&self) -> Result<()> {
        let path = self.store_path();
        if !Store::is_initialized(&path) {
            return Err(Error::StoreNotFound { path });
        }
        fs::remove_dir_all(&path)?;
        tracing::info!(path = %path.display(), "removed store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_store_is_a_clean_error() {
        let temp_dir = TempDir::new().unwrap();
        let pack = Pack::new(temp_dir.path());

        assert!(!pack.has_store());
        assert!(matches!(pack.open_store(), Err(Error::StoreNotFound { .. })));
        assert!(matches!(pack.ls(), Err(Error::StoreNotFound { .. })));
        assert!(matches!(
            pack.remove_store(),
            Err(Error::StoreNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_store_message() {
        let pack = Pack::new("/srv/data");
        let err = pack.open_store().unwrap_err();
        assert_eq!(err.to_string(), "no repo found at /srv/data/.pack-repo");
    }

    #[test]
    fn test_regen_without_manifest_creates_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let pack = Pack::new(temp_dir.path());

        let result = pack.regen(&ImportSettings::default(), &CancelToken::new());
        assert!(matches!(result, Err(Error::ManifestMissing { .. })));
        assert!(!pack.has_store());
    }

    #[test]
    fn test_make_then_remove_store() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("file.txt"), b"contents").unwrap();
        let pack = Pack::new(temp_dir.path());

        let report = pack
            .make(&ImportSettings::default(), &CancelToken::new())
            .unwrap();
        assert!(pack.has_store());
        assert!(pack.ls().unwrap().any(|k| k.unwrap() == report.root));

        pack.remove_store().unwrap();
        assert!(!pack.store_path().exists());
        assert!(pack.manifest_path().exists());
        assert!(temp_dir.path().join("file.txt").exists());
    }
}
