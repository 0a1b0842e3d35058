//! Directory node encoding.

use crate::error::{Error, Result};
use crate::hash::{HASH_SIZE, Hash};
use std::io::Read;

/// Maximum length of a directory entry name in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Entry type in a directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A file (raw leaf, file reference or file node).
    File = 1,
    /// A subdirectory.
    Directory = 2,
}

impl EntryType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(EntryType::File),
            2 => Ok(EntryType::Directory),
            _ => Err(Error::invalid_tree_entry(format!(
                "Invalid entry type: {}",
                value
            ))),
        }
    }
}

/// An entry in a directory node (file or subdirectory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Type of entry.
    pub entry_type: EntryType,
    /// Hash of the child node.
    pub hash: Hash,
    /// Cumulative file bytes below the entry.
    pub size: u64,
    /// Name of the entry (UTF-8, a single path component).
    pub name: String,
}

impl TreeEntry {
    /// Create a new directory entry.
    pub fn new(entry_type: EntryType, hash: Hash, size: u64, name: String) -> Result<Self> {
        validate_name(&name)?;

        Ok(Self {
            entry_type,
            hash,
            size,
            name,
        })
    }

    /// Encode the entry to bytes.
    ///
    /// Format:
    /// - 1 byte: type (1=file, 2=directory)
    /// - 32 bytes: hash
    /// - 8 bytes: size (u64 LE)
    /// - 1 byte: name_len
    /// - N bytes: name (UTF-8)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + HASH_SIZE + 8 + 1 + self.name.len());
        buf.push(self.entry_type.to_u8());
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.push(self.name.len() as u8);
        buf.extend_from_slice(self.name.as_bytes());
        buf
    }

    /// Decode an entry from a reader.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut type_buf = [0u8; 1];
        reader.read_exact(&mut type_buf)?;
        let entry_type = EntryType::from_u8(type_buf[0])?;

        let mut hash_buf = [0u8; HASH_SIZE];
        reader.read_exact(&mut hash_buf)?;
        let hash = Hash::from_bytes(hash_buf);

        let mut size_buf = [0u8; 8];
        reader.read_exact(&mut size_buf)?;
        let size = u64::from_le_bytes(size_buf);

        let mut name_len_buf = [0u8; 1];
        reader.read_exact(&mut name_len_buf)?;
        let name_len = name_len_buf[0] as usize;

        let mut name_buf = vec![0u8; name_len];
        reader.read_exact(&mut name_buf)?;
        let name = String::from_utf8(name_buf)
            .map_err(|e| Error::invalid_tree_entry(format!("Invalid UTF-8 in name: {}", e)))?;

        Self::new(entry_type, hash, size, name)
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    /// Compare by name (bytewise UTF-8) for canonical ordering.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.as_bytes().cmp(other.name.as_bytes())
    }
}

/// Check that `name` is usable as a single directory entry name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_tree_entry("Name cannot be empty"));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_tree_entry(format!(
            "Name too long: {} bytes (max {})",
            name.len(),
            MAX_NAME_LEN
        )));
    }

    if name.contains('\0') {
        return Err(Error::invalid_tree_entry("Name cannot contain null bytes"));
    }

    if name.contains('/') {
        return Err(Error::invalid_tree_entry(format!(
            "Name cannot contain '/': {}",
            name
        )));
    }

    Ok(())
}

/// Encode a list of directory entries (sorted by name).
pub fn encode_tree(mut entries: Vec<TreeEntry>) -> Vec<u8> {
    entries.sort();

    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(&entry.encode());
    }
    buf
}

/// Decode a list of directory entries from bytes.
pub fn decode_tree(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut reader = std::io::Cursor::new(data);
    let mut entries = Vec::new();

    while reader.position() < data.len() as u64 {
        let entry = TreeEntry::decode(&mut reader)?;
        entries.push(entry);
    }

    Ok(entries)
}
