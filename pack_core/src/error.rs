//! Error types for pack_core.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using pack_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pack and store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// No manifest in the pack directory.
    #[error("no {} found in {}", file_name(.path), parent_dir(.path))]
    ManifestMissing { path: PathBuf },

    /// The manifest has no records at all.
    #[error("manifest {path} is empty")]
    EmptyManifest { path: PathBuf },

    /// A content hash field could not be decoded.
    #[error("cannot decode content hash {value:?}: {reason}")]
    DecodeHash { value: String, reason: String },

    /// A manifest line is structurally invalid.
    #[error("malformed manifest record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// An escaped manifest path is malformed.
    #[error("bad escape in path {escaped:?}: {reason}")]
    BadEscape { escaped: String, reason: String },

    /// A record was produced with different import settings.
    #[error("unsupported import settings on line {line}: {found} != {expected}")]
    FingerprintMismatch {
        line: usize,
        expected: String,
        found: String,
    },

    /// A manifest path is absolute or escapes the pack root.
    #[error("invalid pack path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A file listed in the manifest is not in the pack directory.
    #[error("in manifest, missing from pack: {path}")]
    FileMissingFromPack { path: String },

    /// A file listed in the manifest could not be inspected.
    #[error("reading file {path}: {source}")]
    FileStat {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Only regular files and directories can be part of a pack.
    #[error("unsupported file type: {path}")]
    UnsupportedFileType { path: String },

    /// The re-derived content hash differs from the recorded one.
    #[error("checksum fail on {path} (exp {expected}, got {got})")]
    ChecksumMismatch {
        path: String,
        expected: String,
        got: String,
    },

    /// The reconstructed root differs from the manifest's root record.
    #[error("reconstructed root {got} does not match manifest root {expected}")]
    RootMismatch { expected: String, got: String },

    /// Block file is corrupted or invalid.
    #[error("Corrupted block at {path}: {reason}")]
    CorruptedObject { path: PathBuf, reason: String },

    /// Block not found in store.
    #[error("Block not found: {hash}")]
    ObjectNotFound { hash: String },

    /// Store is invalid or not initialized.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// No store has been initialized for this pack.
    #[error("no repo found at {path}")]
    StoreNotFound { path: PathBuf },

    /// The GC lock is held by active writers.
    #[error("store at {path} is busy: writers hold the gc lock")]
    StoreBusy { path: PathBuf },

    /// Invalid object type.
    #[error("Invalid object type: expected {expected}, got {got}")]
    InvalidObjectType { expected: String, got: String },

    /// Invalid directory entry.
    #[error("Invalid tree entry: {reason}")]
    InvalidTreeEntry { reason: String },

    /// Invalid file node or file reference payload.
    #[error("Invalid node: {reason}")]
    InvalidNode { reason: String },

    /// The mutable tree cannot apply an operation.
    #[error("error reconstructing tree at {path}: {reason}")]
    Tree { path: String, reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Import settings cannot be used together.
    #[error("Invalid import settings: {reason}")]
    InvalidSettings { reason: String },

    /// Pin set file is malformed.
    #[error("Invalid pin on line {line}: {reason}")]
    InvalidPin { line: usize, reason: String },

    /// Content-defined chunking failed.
    #[error("Chunking error: {reason}")]
    Chunking { reason: String },

    /// Compression or decompression failed.
    #[error("Compression error: {reason}")]
    Compression { reason: String },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a ManifestMissing error.
    pub fn manifest_missing(path: impl Into<PathBuf>) -> Self {
        Error::ManifestMissing { path: path.into() }
    }

    /// Create a DecodeHash error.
    pub fn decode_hash(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DecodeHash {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a MalformedRecord error.
    pub fn malformed_record(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }

    /// Create a BadEscape error.
    pub fn bad_escape(escaped: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BadEscape {
            escaped: escaped.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a CorruptedObject error.
    pub fn corrupted_object(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptedObject {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an ObjectNotFound error.
    pub fn object_not_found(hash: impl Into<String>) -> Self {
        Error::ObjectNotFound { hash: hash.into() }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidObjectType error.
    pub fn invalid_object_type(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::InvalidObjectType {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create an InvalidTreeEntry error.
    pub fn invalid_tree_entry(reason: impl Into<String>) -> Self {
        Error::InvalidTreeEntry {
            reason: reason.into(),
        }
    }

    /// Create an InvalidNode error.
    pub fn invalid_node(reason: impl Into<String>) -> Self {
        Error::InvalidNode {
            reason: reason.into(),
        }
    }

    /// Create a Tree error.
    pub fn tree(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Tree {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create an InvalidSettings error.
    pub fn invalid_settings(reason: impl Into<String>) -> Self {
        Error::InvalidSettings {
            reason: reason.into(),
        }
    }

    /// Create a Chunking error.
    pub fn chunking(reason: impl Into<String>) -> Self {
        Error::Chunking {
            reason: reason.into(),
        }
    }

    /// Create a Compression error.
    pub fn compression_error(reason: impl Into<String>) -> Self {
        Error::Compression {
            reason: reason.into(),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parent_dir(path: &Path) -> String {
    path.parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
