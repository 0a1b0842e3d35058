//! # Pack Core
//!
//! Manifest-driven, content-addressed pack repositories using BLAKE3 hashing.
//!
//! A pack is a directory tree mirrored into a block store and described by a
//! manifest binding every file to its content hash and relative path. The last
//! manifest record holds the hash of the pack's root directory.
//!
//! ## Features
//!
//! - Manifest codec with path escaping and atomic rewrites
//! - Root lookup from the manifest tail without reading the whole file
//! - Regen: re-import and verify every file, rebuilding the directory DAG
//! - Pin-rooted mark-and-sweep garbage collection with a lazy sweep
//! - FastCDC chunking into balanced file DAGs, optionally without copying data
//!
//! ## Example
//!
//! ```no_run
//! use pack_core::{CancelToken, GcEvent, ImportSettings, Pack};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pack = Pack::new("./my-pack");
//! let settings = ImportSettings::default();
//! let cancel = CancelToken::new();
//!
//! // Import the directory and write its manifest
//! let made = pack.make(&settings, &cancel)?;
//!
//! // Later: verify the files still match and rebuild the store
//! let regen = pack.regen(&settings, &cancel)?;
//! assert_eq!(made.root, regen.root);
//!
//! // Drop every block the manifest no longer reaches
//! let store = pack.open_store()?;
//! for event in pack.gc(&store, &cancel)? {
//!     if let GcEvent::KeyRemoved(hash) = event {
//!         println!("removed {}", hash);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod cancel;
mod chunking;
mod dag;
mod error;
mod gc;
mod hash;
mod locate;
mod make;
mod manifest;
mod object;
mod pack;
mod pack_tree;
mod pin;
mod regen;
mod store;
mod tree;

pub use cancel::CancelToken;
pub use chunking::ChunkerConfig;
pub use dag::{DEFAULT_MAX_LINKS, DagBuilder, ImportSettings};
pub use error::{Error, Result};
pub use gc::{GcEvent, Sweep, collect, collect_pack};
pub use hash::{Algorithm, Hash};
pub use locate::locate_root;
pub use make::{MakeReport, make_pack};
pub use manifest::{
    ManifestReader, ManifestRecord, ManifestWriter, escape_path, format_record, parse_record,
    unescape_path,
};
pub use object::{Link, ObjectType};
pub use pack::{MANIFEST_FILENAME, Pack, STORE_DIRNAME};
pub use pack_tree::PackTree;
pub use pin::{PinMode, PinSet};
pub use regen::{RegenReport, regenerate};
pub use store::{AllKeys, Block, Blockstore, LockGuard, Store};
pub use tree::{EntryType, TreeEntry};
