//! Block store management and block I/O.

use crate::error::{Error, Result};
use crate::hash::{Algorithm, Hash, NodeKind};
use crate::object::{CompressionType, FileNode, FileRef, HEADER_SIZE, ObjectHeader, ObjectType};
use crate::tree;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Compression threshold: raw leaves >= 4KB are compressed.
const COMPRESSION_THRESHOLD: usize = 4096;

const CONFIG_FILE: &str = "config";
const BLOCKS_DIR: &str = "blocks";
const PINS_FILE: &str = "pins";
const GC_LOCK_FILE: &str = "gc.lock";

/// A content-addressed block store.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    algorithm: Algorithm,
}

/// A decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub object_type: ObjectType,
    /// Uncompressed payload.
    pub payload: Vec<u8>,
}

impl Store {
    /// Initialize a new store at the given path.
    ///
    /// Creates the directory structure:
    /// - `blocks/` for storing blocks, sharded by the first hash byte
    /// - `config` file with version and algorithm
    /// - `gc.lock` file guarding writers against garbage collection
    pub fn init<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let algorithm = Algorithm::Blake3;

        fs::create_dir_all(root.join(BLOCKS_DIR))?;

        let config_content = format!("version=1\nalgo={}\n", algorithm.as_str());
        fs::write(root.join(CONFIG_FILE), config_content)?;

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(GC_LOCK_FILE))?;

        tracing::debug!(root = %root.display(), "initialized block store");

        Ok(Self { root, algorithm })
    }

    /// Open an existing store at the given path.
    ///
    /// Validates the store structure and reads the configuration.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }

        let config_content = fs::read_to_string(&config_path)?;
        let algorithm = Self::parse_config(&config_content)
            .map_err(|e| Error::invalid_store(&root, e.to_string()))?;

        if !root.join(BLOCKS_DIR).is_dir() {
            return Err(Error::invalid_store(&root, "blocks directory missing"));
        }

        Ok(Self { root, algorithm })
    }

    /// Whether a store has been initialized at `root`.
    pub fn is_initialized(root: &Path) -> bool {
        root.join(CONFIG_FILE).is_file() && root.join(BLOCKS_DIR).is_dir()
    }

    /// Parse the config file to extract the algorithm.
    fn parse_config(content: &str) -> Result<Algorithm> {
        let mut version = None;
        let mut algo = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "algo" => algo = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(Error::unsupported_algorithm(format!(
                "config version {:?}",
                version
            )));
        }

        let algo_str = algo.ok_or_else(|| Error::unsupported_algorithm("<missing algo>"))?;
        Algorithm::parse(algo_str)
    }

    /// Get the path to a block file given its hash.
    ///
    /// Returns: `blocks/{prefix}/{suffix}`
    pub fn block_path(&self, hash: &Hash) -> PathBuf {
        self.root
            .join(BLOCKS_DIR)
            .join(hash.prefix())
            .join(hash.suffix())
    }

    /// Get the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the algorithm used by this store.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Path of the persisted pin set.
    pub fn pins_path(&self) -> PathBuf {
        self.root.join(PINS_FILE)
    }

    /// Whether a block is present.
    pub fn has(&self, hash: &Hash) -> bool {
        self.block_path(hash).is_file()
    }

    /// Take the shared side of the GC lock. Held by anything that adds blocks.
    pub fn write_lock(&self) -> Result<LockGuard> {
        let file = self.open_lock_file()?;
        FileExt::lock_shared(&file)?;
        Ok(LockGuard { file })
    }

    /// Take the exclusive side of the GC lock without waiting.
    ///
    /// Fails with `StoreBusy` while any writer holds the shared side.
    pub fn try_gc_lock(&self) -> Result<LockGuard> {
        let file = self.open_lock_file()?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(LockGuard { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(Error::StoreBusy {
                path: self.root.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn open_lock_file(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(GC_LOCK_FILE))?)
    }

    /// Read a block header from a file.
    fn read_object_header(&self, file: &mut File) -> Result<ObjectHeader> {
        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        ObjectHeader::decode(&header_buf)
    }

    /// Read and decompress a block, without verifying its hash.
    fn read_block_unverified(&self, hash: &Hash) -> Result<Block> {
        let path = self.block_path(hash);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::object_not_found(hash.to_hex()));
            }
            Err(e) => return Err(e.into()),
        };

        let header = self.read_object_header(&mut file)?;

        let mut stored = Vec::new();
        file.read_to_end(&mut stored)?;
        if stored.len() as u64 != header.payload_len {
            return Err(Error::corrupted_object(
                &path,
                format!(
                    "Payload length mismatch: expected {}, got {}",
                    header.payload_len,
                    stored.len()
                ),
            ));
        }

        let payload = match header.compression {
            CompressionType::None => stored,
            CompressionType::Zstd => decompress_zstd(&stored)?,
        };

        Ok(Block {
            object_type: header.object_type,
            payload,
        })
    }

    /// Write a block atomically using tempfile.
    fn write_object_atomic(&self, hash: &Hash, header: &ObjectHeader, payload: &[u8]) -> Result<()> {
        let obj_path = self.block_path(hash);
        let shard_dir = self.root.join(BLOCKS_DIR).join(hash.prefix());
        fs::create_dir_all(&shard_dir)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&shard_dir)?;
        temp_file.write_all(&header.encode())?;
        temp_file.write_all(payload)?;
        temp_file.flush()?;
        temp_file.persist(&obj_path)?;

        Ok(())
    }

    /// Store a block under `hash`.
    ///
    /// Existing blocks are left untouched, except file references, which are
    /// rewritten so they follow the file's current location. Returns whether
    /// anything was written.
    pub(crate) fn put_block(
        &self,
        hash: &Hash,
        object_type: ObjectType,
        payload: &[u8],
    ) -> Result<bool> {
        if object_type != ObjectType::FileRef && self.has(hash) {
            return Ok(false);
        }

        let (stored, compression) =
            if object_type == ObjectType::Raw && payload.len() >= COMPRESSION_THRESHOLD {
                (compress_zstd(payload)?, CompressionType::Zstd)
            } else {
                (payload.to_vec(), CompressionType::None)
            };

        let header = ObjectHeader::new(
            object_type,
            self.algorithm,
            compression,
            stored.len() as u64,
        );
        self.write_object_atomic(hash, &header, &stored)?;

        tracing::trace!(%hash, kind = object_type.as_str(), "stored block");
        Ok(true)
    }

    /// Retrieve a block by hash, verifying it against its address.
    ///
    /// File references are returned as stored; their target bytes are checked
    /// by [`Store::read_data`].
    pub fn get_block(&self, hash: &Hash) -> Result<Block> {
        let block = self.read_block_unverified(hash)?;

        let computed = match block.object_type {
            ObjectType::Raw => Some(Hash::hash_bytes(&block.payload)),
            ObjectType::File => Some(Hash::hash_node(NodeKind::File, &block.payload)),
            ObjectType::Directory => Some(Hash::hash_node(NodeKind::Directory, &block.payload)),
            ObjectType::FileRef => None,
        };

        if let Some(computed) = computed
            && computed != *hash
        {
            return Err(Error::corrupted_object(
                self.block_path(hash),
                format!("Hash mismatch: expected {}, got {}", hash, computed),
            ));
        }

        Ok(block)
    }

    /// Reassemble the file bytes below `hash`.
    pub fn read_data(&self, hash: &Hash) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.append_data(hash, &mut data)?;
        Ok(data)
    }

    fn append_data(&self, hash: &Hash, out: &mut Vec<u8>) -> Result<()> {
        let block = self.get_block(hash)?;

        match block.object_type {
            ObjectType::Raw => out.extend_from_slice(&block.payload),
            ObjectType::FileRef => {
                let file_ref = FileRef::decode(&block.payload)?;
                let bytes = read_file_range(&file_ref)?;
                let computed = Hash::hash_bytes(&bytes);
                if computed != *hash {
                    return Err(Error::corrupted_object(
                        &file_ref.path,
                        format!(
                            "Referenced bytes changed at offset {}: expected {}, got {}",
                            file_ref.offset, hash, computed
                        ),
                    ));
                }
                out.extend_from_slice(&bytes);
            }
            ObjectType::File => {
                let node = FileNode::decode(&block.payload)?;
                out.extend_from_slice(&node.data);
                for link in &node.links {
                    self.append_data(&link.hash, out)?;
                }
            }
            ObjectType::Directory => {
                return Err(Error::invalid_object_type(
                    "raw, file or file_ref",
                    ObjectType::Directory.as_str(),
                ));
            }
        }

        Ok(())
    }

    /// List the entries of a directory block.
    pub fn get_directory(&self, hash: &Hash) -> Result<Vec<tree::TreeEntry>> {
        let block = self.get_block(hash)?;
        if block.object_type != ObjectType::Directory {
            return Err(Error::invalid_object_type(
                ObjectType::Directory.as_str(),
                block.object_type.as_str(),
            ));
        }
        tree::decode_tree(&block.payload)
    }
}

/// The store operations garbage collection needs.
pub trait Blockstore {
    /// Lazy iterator over the keys present in the store.
    type Keys<'a>: Iterator<Item = Result<Hash>>
    where
        Self: 'a;

    /// Enumerate every key currently resident in the store.
    fn all_keys(&self) -> Result<Self::Keys<'_>>;

    /// Child links of a block, or `None` if the block is absent.
    fn links(&self, hash: &Hash) -> Result<Option<Vec<Hash>>>;

    /// Delete a single block.
    fn delete_block(&self, hash: &Hash) -> Result<()>;

    /// Take the exclusive side of the GC lock, waiting for writers to finish.
    fn gc_lock(&self) -> Result<LockGuard>;
}

impl Blockstore for Store {
    type Keys<'a> = AllKeys;

    fn all_keys(&self) -> Result<AllKeys> {
        Ok(AllKeys {
            shards: fs::read_dir(self.root.join(BLOCKS_DIR))?,
            current: None,
        })
    }

    fn links(&self, hash: &Hash) -> Result<Option<Vec<Hash>>> {
        let block = match self.get_block(hash) {
            Ok(block) => block,
            Err(Error::ObjectNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let links = match block.object_type {
            ObjectType::Raw | ObjectType::FileRef => Vec::new(),
            ObjectType::File => FileNode::decode(&block.payload)?
                .links
                .into_iter()
                .map(|link| link.hash)
                .collect(),
            ObjectType::Directory => tree::decode_tree(&block.payload)?
                .into_iter()
                .map(|entry| entry.hash)
                .collect(),
        };

        Ok(Some(links))
    }

    fn delete_block(&self, hash: &Hash) -> Result<()> {
        let path = self.block_path(hash);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::object_not_found(hash.to_hex()));
            }
            Err(e) => return Err(e.into()),
        }

        // Prune the shard directory once it is empty; fails harmlessly otherwise.
        if let Some(shard) = path.parent() {
            let _ = fs::remove_dir(shard);
        }

        Ok(())
    }

    fn gc_lock(&self) -> Result<LockGuard> {
        let file = self.open_lock_file()?;
        FileExt::lock_exclusive(&file)?;
        Ok(LockGuard { file })
    }
}

/// Lazy walk over the shard directories of a store.
#[derive(Debug)]
pub struct AllKeys {
    shards: fs::ReadDir,
    current: Option<(String, fs::ReadDir)>,
}

impl Iterator for AllKeys {
    type Item = Result<Hash>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((prefix, entries)) = self.current.as_mut() {
                match entries.next() {
                    Some(Ok(entry)) => {
                        // Temp files and stray names are not keys.
                        let name = entry.file_name();
                        let Some(name) = name.to_str() else { continue };
                        if let Ok(hash) = Hash::from_hex(&format!("{}{}", prefix, name)) {
                            return Some(Ok(hash));
                        }
                        continue;
                    }
                    Some(Err(e)) => return Some(Err(e.into())),
                    None => {}
                }
            }
            self.current = None;

            let shard = match self.shards.next()? {
                Ok(shard) => shard,
                Err(e) => return Some(Err(e.into())),
            };
            let Some(prefix) = shard.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if prefix.len() != 2 || !shard.path().is_dir() {
                continue;
            }

            match fs::read_dir(shard.path()) {
                Ok(entries) => self.current = Some((prefix, entries)),
                // Pruned by a concurrent sweep.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// A held side of the store's GC lock, released on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_file_range(file_ref: &FileRef) -> Result<Vec<u8>> {
    let mut file = File::open(&file_ref.path)?;
    file.seek(SeekFrom::Start(file_ref.offset))?;
    let mut bytes = Vec::with_capacity(file_ref.len as usize);
    file.take(file_ref.len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != file_ref.len {
        return Err(Error::corrupted_object(
            &file_ref.path,
            format!(
                "Referenced file truncated: wanted {} bytes at offset {}, got {}",
                file_ref.len,
                file_ref.offset,
                bytes.len()
            ),
        ));
    }
    Ok(bytes)
}

/// Compress data using zstd.
fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 3) // Level 3 = fast compression
        .map_err(|e| Error::compression_error(format!("zstd compression failed: {}", e)))
}

/// Decompress data using zstd.
fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data)
        .map_err(|e| Error::compression_error(format!("zstd decompression failed: {}", e)))
}
