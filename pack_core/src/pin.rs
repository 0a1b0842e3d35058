//! Pinned roots for garbage collection.

use crate::error::{Error, Result};
use crate::hash::Hash;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// How much of the DAG below a pin is kept alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// The block and everything reachable from it.
    Recursive,
    /// Only the block itself.
    Direct,
}

impl PinMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinMode::Recursive => "recursive",
            PinMode::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recursive" => Some(PinMode::Recursive),
            "direct" => Some(PinMode::Direct),
            _ => None,
        }
    }
}

/// A set of pinned hashes backed by a text file.
///
/// Each line holds `<hex>\t<recursive|direct>`. Changes stay in memory until
/// [`PinSet::flush`].
#[derive(Debug, Clone)]
pub struct PinSet {
    path: PathBuf,
    pins: BTreeMap<Hash, PinMode>,
}

impl PinSet {
    /// An empty pin set that will be written to `path`.
    pub fn fresh(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pins: BTreeMap::new(),
        }
    }

    /// Load the pin set at `path`. A missing file is an empty set.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::fresh(path)),
            Err(e) => return Err(e.into()),
        };

        let mut pins = BTreeMap::new();
        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }

            let (hex, mode) = line.split_once('\t').ok_or_else(|| Error::InvalidPin {
                line: line_no,
                reason: "expected <hash>\\t<mode>".to_string(),
            })?;
            let hash = Hash::from_hex(hex).map_err(|e| Error::InvalidPin {
                line: line_no,
                reason: e.to_string(),
            })?;
            let mode = PinMode::parse(mode).ok_or_else(|| Error::InvalidPin {
                line: line_no,
                reason: format!("unknown pin mode {:?}", mode),
            })?;
            pins.insert(hash, mode);
        }

        Ok(Self { path, pins })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pin(&mut self, hash: Hash, mode: PinMode) {
        self.pins.insert(hash, mode);
    }

    pub fn unpin(&mut self, hash: &Hash) -> Option<PinMode> {
        self.pins.remove(hash)
    }

    pub fn mode(&self, hash: &Hash) -> Option<PinMode> {
        self.pins.get(hash).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash, PinMode)> {
        self.pins.iter().map(|(hash, mode)| (hash, *mode))
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Durably replace the pin file with the current set.
    pub fn flush(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        for (hash, mode) in &self.pins {
            writeln!(temp, "{}\t{}", hash, mode.as_str())?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path)?;

        tracing::debug!(path = %self.path.display(), pins = self.pins.len(), "flushed pin set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pin_flush_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pins");

        let a = Hash::hash_bytes(b"a");
        let b = Hash::hash_bytes(b"b");
        let mut pins = PinSet::fresh(&path);
        pins.pin(a, PinMode::Recursive);
        pins.pin(b, PinMode::Direct);
        pins.flush().unwrap();

        let loaded = PinSet::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.mode(&a), Some(PinMode::Recursive));
        assert_eq!(loaded.mode(&b), Some(PinMode::Direct));
    }

    #[test]
    fn test_load_missing_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let pins = PinSet::load(temp_dir.path().join("pins")).unwrap();
        assert!(pins.is_empty());
    }

    #[test]
    fn test_fresh_replaces_previous_pins() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pins");

        let old = Hash::hash_bytes(b"old");
        let mut pins = PinSet::fresh(&path);
        pins.pin(old, PinMode::Recursive);
        pins.flush().unwrap();

        let new = Hash::hash_bytes(b"new");
        let mut pins = PinSet::fresh(&path);
        pins.pin(new, PinMode::Recursive);
        pins.flush().unwrap();

        let loaded = PinSet::load(&path).unwrap();
        assert_eq!(loaded.mode(&old), None);
        assert_eq!(loaded.mode(&new), Some(PinMode::Recursive));
    }

    #[test]
    fn test_unpin() {
        let mut pins = PinSet::fresh("pins");
        let a = Hash::hash_bytes(b"a");
        pins.pin(a, PinMode::Direct);
        assert_eq!(pins.unpin(&a), Some(PinMode::Direct));
        assert_eq!(pins.unpin(&a), None);
        assert_eq!(pins.iter().count(), 0);
    }

    #[test]
    fn test_load_rejects_bad_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pins");
        let hash = Hash::hash_bytes(b"a");

        fs::write(&path, format!("{}\tsometimes\n", hash)).unwrap();
        assert!(matches!(
            PinSet::load(&path),
            Err(Error::InvalidPin { line: 1, .. })
        ));

        fs::write(&path, format!("{}\trecursive\nnot-a-hash\n", hash)).unwrap();
        assert!(matches!(
            PinSet::load(&path),
            Err(Error::InvalidPin { line: 2, .. })
        ));
    }
}
