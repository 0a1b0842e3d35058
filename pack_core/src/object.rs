//! Binary block format and encoding.
//!
//! Blocks are stored with a 16-byte header followed by the payload:
//!
//! ```text
//! 0x00  4   "PBLK" magic
//! 0x04  1   version (u8) = 1
//! 0x05  1   type: 1=raw, 2=file, 3=directory, 4=file_ref
//! 0x06  1   algo: 1=blake3-256
//! 0x07  1   compression: 0=none, 1=zstd
//! 0x08  8   payload_len (u64 LE) - stored (possibly compressed) size
//! 0x10  ... payload
//! ```

use crate::error::{Error, Result};
use crate::hash::{Algorithm, HASH_SIZE, Hash};
use std::path::PathBuf;

/// Magic bytes at the start of every block file.
pub const MAGIC: &[u8; 4] = b"PBLK";

/// Current block format version.
pub const VERSION: u8 = 1;

/// Size of the block header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Block types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Raw leaf bytes.
    Raw = 1,
    /// A file node: links to children plus optional inline data.
    File = 2,
    /// A directory node.
    Directory = 3,
    /// A leaf kept in the original file (no-copy mode).
    FileRef = 4,
}

impl ObjectType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ObjectType::Raw),
            2 => Ok(ObjectType::File),
            3 => Ok(ObjectType::Directory),
            4 => Ok(ObjectType::FileRef),
            _ => Err(Error::invalid_object_type(
                "raw, file, directory or file_ref",
                format!("type byte {}", value),
            )),
        }
    }

    /// Get the string name of this block type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Raw => "raw",
            ObjectType::File => "file",
            ObjectType::Directory => "directory",
            ObjectType::FileRef => "file_ref",
        }
    }
}

/// Compression types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// No compression.
    None = 0,
    /// Zstandard compression.
    Zstd = 1,
}

impl CompressionType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zstd),
            _ => Err(Error::compression_error(format!(
                "Invalid compression type: {}",
                value
            ))),
        }
    }
}

/// A 16-byte block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Block format version.
    pub version: u8,
    /// Block type.
    pub object_type: ObjectType,
    /// Hash algorithm used.
    pub algorithm: Algorithm,
    /// Compression type.
    pub compression: CompressionType,
    /// Length of the stored payload in bytes.
    pub payload_len: u64,
}

impl ObjectHeader {
    /// Create a new block header.
    pub fn new(
        object_type: ObjectType,
        algorithm: Algorithm,
        compression: CompressionType,
        payload_len: u64,
    ) -> Self {
        Self {
            version: VERSION,
            object_type,
            algorithm,
            compression,
            payload_len,
        }
    }

    /// Encode the header to a 16-byte array.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version;
        buf[5] = self.object_type.to_u8();
        buf[6] = self.algorithm.id();
        buf[7] = self.compression.to_u8();
        buf[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Decode a header from a 16-byte array.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::invalid_node(format!(
                "Header too short: {} bytes (expected {})",
                buf.len(),
                HEADER_SIZE
            )));
        }

        if &buf[0..4] != MAGIC {
            return Err(Error::invalid_node(format!(
                "Invalid magic: expected {:?}, got {:?}",
                MAGIC,
                &buf[0..4]
            )));
        }

        let version = buf[4];
        if version != VERSION {
            return Err(Error::invalid_node(format!(
                "Unsupported version: {} (expected {})",
                version, VERSION
            )));
        }

        let object_type = ObjectType::from_u8(buf[5])?;
        let algorithm = Algorithm::from_id(buf[6])?;
        let compression = CompressionType::from_u8(buf[7])?;

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes);

        Ok(Self {
            version,
            object_type,
            algorithm,
            compression,
            payload_len,
        })
    }
}

/// A link from a file node to a child block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Hash of the child.
    pub hash: Hash,
    /// Number of file bytes below the child.
    pub size: u64,
}

/// Size of a link in bytes (32-byte hash + 8-byte size).
pub const LINK_SIZE: usize = HASH_SIZE + 8;

/// A file node: an interior node of a chunked file, or a leaf with inline
/// data when raw leaves are disabled.
///
/// Payload: link count (u32 LE), `count` links of 40 bytes, then inline data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileNode {
    pub links: Vec<Link>,
    pub data: Vec<u8>,
}

impl FileNode {
    /// Total number of file bytes this node represents.
    pub fn size(&self) -> u64 {
        self.data.len() as u64 + self.links.iter().map(|l| l.size).sum::<u64>()
    }

    /// Encode the node to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.links.len() * LINK_SIZE + self.data.len());
        buf.extend_from_slice(&(self.links.len() as u32).to_le_bytes());
        for link in &self.links {
            buf.extend_from_slice(link.hash.as_bytes());
            buf.extend_from_slice(&link.size.to_le_bytes());
        }
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode a node from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let count_bytes: [u8; 4] = bytes
            .get(0..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::invalid_node("File node shorter than its link count"))?;
        let count = u32::from_le_bytes(count_bytes) as usize;

        let links_end = count
            .checked_mul(LINK_SIZE)
            .and_then(|n| n.checked_add(4))
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| {
                Error::invalid_node(format!(
                    "File node declares {} links but holds {} bytes",
                    count,
                    bytes.len()
                ))
            })?;

        let mut links = Vec::with_capacity(count);
        for link_bytes in bytes[4..links_end].chunks_exact(LINK_SIZE) {
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(&link_bytes[..HASH_SIZE]);
            let mut size = [0u8; 8];
            size.copy_from_slice(&link_bytes[HASH_SIZE..]);
            links.push(Link {
                hash: Hash::from_bytes(hash),
                size: u64::from_le_bytes(size),
            });
        }

        Ok(FileNode {
            links,
            data: bytes[links_end..].to_vec(),
        })
    }
}

/// A leaf whose bytes stay in the original file (no-copy mode).
///
/// Payload: offset (u64 LE), length (u64 LE), then the UTF-8 file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub path: PathBuf,
    pub offset: u64,
    pub len: u64,
}

impl FileRef {
    /// Encode the reference to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let path = self.path.to_str().ok_or_else(|| {
            Error::invalid_path(
                self.path.display().to_string(),
                "no-copy references require UTF-8 paths",
            )
        })?;
        let mut buf = Vec::with_capacity(16 + path.len());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.len.to_le_bytes());
        buf.extend_from_slice(path.as_bytes());
        Ok(buf)
    }

    /// Decode a reference from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(Error::invalid_node(format!(
                "File reference too short: {} bytes",
                bytes.len()
            )));
        }
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[0..8]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[8..16]);
        let path = std::str::from_utf8(&bytes[16..])
            .map_err(|e| Error::invalid_node(format!("File reference path: {}", e)))?;

        Ok(FileRef {
            path: PathBuf::from(path),
            offset: u64::from_le_bytes(offset),
            len: u64::from_le_bytes(len),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_conversions() {
        for ty in [
            ObjectType::Raw,
            ObjectType::File,
            ObjectType::Directory,
            ObjectType::FileRef,
        ] {
            assert_eq!(ObjectType::from_u8(ty.to_u8()).unwrap(), ty);
        }
        assert!(ObjectType::from_u8(0).is_err());
        assert!(ObjectType::from_u8(5).is_err());
    }

    #[test]
    fn test_header_encode_decode() {
        let header = ObjectHeader::new(
            ObjectType::Directory,
            Algorithm::Blake3,
            CompressionType::None,
            512,
        );
        let encoded = header.encode();
        assert_eq!(&encoded[0..4], MAGIC);
        assert_eq!(ObjectHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_header_decode_invalid_magic() {
        let mut buf = ObjectHeader::new(
            ObjectType::Raw,
            Algorithm::Blake3,
            CompressionType::None,
            1,
        )
        .encode();
        buf[0..4].copy_from_slice(b"CAFS");
        assert!(ObjectHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_decode_invalid_version() {
        let mut buf = ObjectHeader::new(
            ObjectType::Raw,
            Algorithm::Blake3,
            CompressionType::None,
            1,
        )
        .encode();
        buf[4] = 99;
        assert!(ObjectHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_too_short() {
        assert!(ObjectHeader::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_file_node_size_counts_links_and_data() {
        let node = FileNode {
            links: vec![
                Link {
                    hash: Hash::hash_bytes(b"a"),
                    size: 10,
                },
                Link {
                    hash: Hash::hash_bytes(b"b"),
                    size: 5,
                },
            ],
            data: vec![1, 2, 3],
        };
        assert_eq!(node.size(), 18);
    }

    #[test]
    fn test_file_node_rejects_truncated_links() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; LINK_SIZE]);
        assert!(FileNode::decode(&bytes).is_err());
        assert!(FileNode::decode(&[1, 0]).is_err());
    }

    #[test]
    fn test_file_ref_decode_too_short() {
        assert!(FileRef::decode(&[0u8; 15]).is_err());
    }

    // Property-based tests
    use proptest::prelude::*;

    fn arb_file_node() -> impl Strategy<Value = FileNode> {
        (
            prop::collection::vec(
                (prop::array::uniform32(any::<u8>()), any::<u64>()),
                0..20,
            ),
            prop::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(links, data)| FileNode {
                links: links
                    .into_iter()
                    .map(|(hash, size)| Link {
                        hash: Hash::from_bytes(hash),
                        size,
                    })
                    .collect(),
                data,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        #[test]
        fn prop_file_node_roundtrip(node in arb_file_node()) {
            let decoded = FileNode::decode(&node.encode())?;
            prop_assert_eq!(decoded, node);
        }

        #[test]
        fn prop_file_ref_roundtrip(
            path in "/[a-z0-9/._-]{1,64}",
            offset in any::<u64>(),
            len in any::<u64>(),
        ) {
            let file_ref = FileRef { path: PathBuf::from(path), offset, len };
            let decoded = FileRef::decode(&file_ref.encode()?)?;
            prop_assert_eq!(decoded, file_ref);
        }
    }
}
