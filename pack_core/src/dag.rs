//! Importing files into the block store as balanced DAGs.

use crate::chunking::{Chunk, ChunkerConfig, chunk_stream};
use crate::error::{Error, Result};
use crate::hash::{Hash, NodeKind};
use crate::object::{FileNode, FileRef, Link, ObjectType};
use crate::store::{LockGuard, Store};
use crate::tree::{TreeEntry, encode_tree};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Default maximum number of links per file node.
pub const DEFAULT_MAX_LINKS: usize = 174;

/// How files are turned into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    pub chunker: ChunkerConfig,
    /// Maximum links per interior file node.
    pub max_links: usize,
    /// Store leaves as raw blocks instead of file nodes with inline data.
    pub raw_leaves: bool,
    /// Reference leaf bytes in the original file instead of copying them.
    pub no_copy: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            max_links: DEFAULT_MAX_LINKS,
            raw_leaves: true,
            no_copy: true,
        }
    }
}

impl ImportSettings {
    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;
        if self.max_links < 2 {
            return Err(Error::invalid_settings(format!(
                "max links must be at least 2, got {}",
                self.max_links
            )));
        }
        if self.no_copy && !self.raw_leaves {
            return Err(Error::invalid_settings("no-copy requires raw leaves"));
        }
        Ok(())
    }

    /// Opaque, tab-free identifier recorded with every manifest record.
    pub fn fingerprint(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ImportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blake3-256:fastcdc-{}-{}-{}:links-{}:{}:{}",
            self.chunker.min_size,
            self.chunker.avg_size,
            self.chunker.max_size,
            self.max_links,
            if self.raw_leaves {
                "raw-leaves"
            } else {
                "node-leaves"
            },
            if self.no_copy { "no-copy" } else { "copy" }
        )
    }
}

/// Writes file and directory DAGs into a store.
///
/// Holds the shared side of the store's GC lock for its whole lifetime, so
/// blocks it writes cannot be swept before they are referenced.
#[derive(Debug)]
pub struct DagBuilder<'a> {
    store: &'a Store,
    settings: ImportSettings,
    _lock: LockGuard,
}

impl<'a> DagBuilder<'a> {
    pub fn new(store: &'a Store, settings: ImportSettings) -> Result<Self> {
        settings.validate()?;
        let lock = store.write_lock()?;
        Ok(Self {
            store,
            settings,
            _lock: lock,
        })
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    /// Import one regular file and return its root link.
    pub fn add_file(&self, path: &Path) -> Result<Link> {
        let source = if self.settings.no_copy {
            Some(std::path::absolute(path)?)
        } else {
            None
        };

        let reader = BufReader::new(File::open(path)?);
        let mut links = Vec::new();
        for chunk in chunk_stream(reader, self.settings.chunker) {
            links.push(self.put_leaf(&chunk?, source.as_deref())?);
        }

        if links.is_empty() {
            let empty = Chunk {
                offset: 0,
                data: Vec::new(),
            };
            links.push(self.put_leaf(&empty, source.as_deref())?);
        }

        let leaves = links.len();
        while links.len() > 1 {
            links = links
                .chunks(self.settings.max_links)
                .map(|group| self.put_file_node(group))
                .collect::<Result<Vec<_>>>()?;
        }

        let root = links
            .pop()
            .ok_or_else(|| Error::invalid_node("file produced no root"))?;
        tracing::debug!(path = %path.display(), hash = %root.hash, size = root.size, leaves, "imported file");
        Ok(root)
    }

    /// Store a directory node and return its link.
    pub fn put_directory(&self, entries: Vec<TreeEntry>) -> Result<Link> {
        let size = entries.iter().map(|e| e.size).sum();
        let payload = encode_tree(entries);
        let hash = Hash::hash_node(NodeKind::Directory, &payload);
        self.store
            .put_block(&hash, ObjectType::Directory, &payload)?;
        Ok(Link { hash, size })
    }

    fn put_leaf(&self, chunk: &Chunk, source: Option<&Path>) -> Result<Link> {
        let size = chunk.data.len() as u64;

        if !self.settings.raw_leaves {
            let node = FileNode {
                links: Vec::new(),
                data: chunk.data.clone(),
            };
            let payload = node.encode();
            let hash = Hash::hash_node(NodeKind::File, &payload);
            self.store.put_block(&hash, ObjectType::File, &payload)?;
            return Ok(Link { hash, size });
        }

        let hash = Hash::hash_bytes(&chunk.data);
        match source {
            Some(path) => {
                let file_ref = FileRef {
                    path: PathBuf::from(path),
                    offset: chunk.offset,
                    len: size,
                };
                self.store
                    .put_block(&hash, ObjectType::FileRef, &file_ref.encode()?)?;
            }
            None => {
                self.store.put_block(&hash, ObjectType::Raw, &chunk.data)?;
            }
        }
        Ok(Link { hash, size })
    }

    fn put_file_node(&self, links: &[Link]) -> Result<Link> {
        let node = FileNode {
            links: links.to_vec(),
            data: Vec::new(),
        };
        let payload = node.encode();
        let hash = Hash::hash_node(NodeKind::File, &payload);
        self.store.put_block(&hash, ObjectType::File, &payload)?;
        Ok(Link {
            hash,
            size: node.size(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Blockstore;
    use tempfile::TempDir;

    fn small_chunks() -> ChunkerConfig {
        ChunkerConfig {
            min_size: 64,
            avg_size: 256,
            max_size: 1024,
        }
    }

    fn copy_settings() -> ImportSettings {
        ImportSettings {
            no_copy: false,
            ..ImportSettings::default()
        }
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    fn setup() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path().join("store")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_default_fingerprint() {
        assert_eq!(
            ImportSettings::default().fingerprint(),
            "blake3-256:fastcdc-262144-524288-1048576:links-174:raw-leaves:no-copy"
        );
        let other = ImportSettings {
            raw_leaves: false,
            no_copy: false,
            max_links: 8,
            ..ImportSettings::default()
        };
        assert_eq!(
            other.fingerprint(),
            "blake3-256:fastcdc-262144-524288-1048576:links-8:node-leaves:copy"
        );
    }

    #[test]
    fn test_invalid_settings() {
        let (_temp_dir, store) = setup();

        let no_copy_without_raw = ImportSettings {
            raw_leaves: false,
            ..ImportSettings::default()
        };
        assert!(matches!(
            DagBuilder::new(&store, no_copy_without_raw),
            Err(Error::InvalidSettings { .. })
        ));

        let one_link = ImportSettings {
            max_links: 1,
            ..ImportSettings::default()
        };
        assert!(DagBuilder::new(&store, one_link).is_err());
    }

    #[test]
    fn test_single_chunk_hash_is_content_hash() {
        let (temp_dir, store) = setup();
        let path = temp_dir.path().join("small.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let builder = DagBuilder::new(&store, copy_settings()).unwrap();
        let link = builder.add_file(&path).unwrap();

        assert_eq!(link.hash, Hash::hash_bytes(b"hello world"));
        assert_eq!(link.size, 11);
        assert_eq!(store.read_data(&link.hash).unwrap(), b"hello world");
    }

    #[test]
    fn test_empty_file() {
        let (temp_dir, store) = setup();
        let path = temp_dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let builder = DagBuilder::new(&store, copy_settings()).unwrap();
        let link = builder.add_file(&path).unwrap();

        assert_eq!(link.hash, Hash::hash_bytes(b""));
        assert_eq!(link.size, 0);
        assert!(store.has(&link.hash));
    }

    #[test]
    fn test_multi_level_tree() {
        let (temp_dir, store) = setup();
        let data = noise(20_000);
        let path = temp_dir.path().join("big.bin");
        std::fs::write(&path, &data).unwrap();

        let settings = ImportSettings {
            chunker: small_chunks(),
            max_links: 2,
            ..copy_settings()
        };
        let builder = DagBuilder::new(&store, settings).unwrap();
        let link = builder.add_file(&path).unwrap();

        assert_eq!(link.size, data.len() as u64);
        assert_eq!(store.read_data(&link.hash).unwrap(), data);

        let root = store.get_block(&link.hash).unwrap();
        assert_eq!(root.object_type, ObjectType::File);
        let children = store.links(&link.hash).unwrap().unwrap();
        assert_eq!(children.len(), 2);
        let child = store.get_block(&children[0]).unwrap();
        assert_eq!(child.object_type, ObjectType::File);
    }

    #[test]
    fn test_deterministic_across_stores() {
        let (temp_dir, store) = setup();
        let other = Store::init(temp_dir.path().join("other")).unwrap();
        let path = temp_dir.path().join("data.bin");
        std::fs::write(&path, noise(5_000)).unwrap();

        let settings = ImportSettings {
            chunker: small_chunks(),
            max_links: 3,
            ..copy_settings()
        };
        let a = DagBuilder::new(&store, settings).unwrap().add_file(&path).unwrap();
        let b = DagBuilder::new(&other, settings).unwrap().add_file(&path).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_copy_leaves_reference_source() {
        let (temp_dir, store) = setup();
        let data = noise(3_000);
        let path = temp_dir.path().join("ref.bin");
        std::fs::write(&path, &data).unwrap();

        let settings = ImportSettings {
            chunker: small_chunks(),
            ..ImportSettings::default()
        };
        let builder = DagBuilder::new(&store, settings).unwrap();
        let link = builder.add_file(&path).unwrap();

        let copy_store = Store::init(temp_dir.path().join("copy")).unwrap();
        let copy_settings = ImportSettings {
            no_copy: false,
            ..settings
        };
        let copied = DagBuilder::new(&copy_store, copy_settings)
            .unwrap()
            .add_file(&path)
            .unwrap();
        assert_eq!(link, copied);

        let leaf = store.links(&link.hash).unwrap().unwrap()[0];
        assert_eq!(
            store.get_block(&leaf).unwrap().object_type,
            ObjectType::FileRef
        );
        assert_eq!(store.read_data(&link.hash).unwrap(), data);
    }

    #[test]
    fn test_node_leaves_change_hash() {
        let (temp_dir, store) = setup();
        let path = temp_dir.path().join("a.txt");
        std::fs::write(&path, b"inline me").unwrap();

        let settings = ImportSettings {
            raw_leaves: false,
            ..copy_settings()
        };
        let link = DagBuilder::new(&store, settings)
            .unwrap()
            .add_file(&path)
            .unwrap();

        assert_ne!(link.hash, Hash::hash_bytes(b"inline me"));
        assert_eq!(store.read_data(&link.hash).unwrap(), b"inline me");
    }

    #[test]
    fn test_builder_blocks_gc() {
        let (_temp_dir, store) = setup();
        let builder = DagBuilder::new(&store, copy_settings()).unwrap();
        assert!(matches!(
            store.try_gc_lock(),
            Err(Error::StoreBusy { .. })
        ));
        drop(builder);
        assert!(store.try_gc_lock().is_ok());
    }
}
