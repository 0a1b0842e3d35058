//! Finding a pack's root hash from the tail of its manifest.
//!
//! The last manifest record names the root directory node. Small manifests
//! are scanned whole; larger ones are read from a tail window that doubles
//! until it holds a complete last line.

use crate::error::{Error, Result};
use crate::hash::Hash;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Manifests up to this size are read in full.
pub const SCAN_THRESHOLD: u64 = 1024;

/// Initial tail window for larger manifests.
pub const TAIL_WINDOW: u64 = 512;

/// Return the root content hash recorded in the manifest at `path`.
pub fn locate_root(path: &Path) -> Result<Hash> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::manifest_missing(path));
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata()?.len();

    let line = last_line(&mut file, size)?.ok_or_else(|| Error::EmptyManifest {
        path: path.to_path_buf(),
    })?;

    let field = line.split('\t').next().unwrap_or_default();
    let root = Hash::from_hex(field)?;
    tracing::debug!(manifest = %path.display(), %root, "located pack root");
    Ok(root)
}

/// Read the last non-empty line of a `size`-byte stream.
fn last_line<R: Read + Seek>(reader: &mut R, size: u64) -> Result<Option<String>> {
    let mut window = if size <= SCAN_THRESHOLD {
        size
    } else {
        TAIL_WINDOW
    };

    loop {
        let start = size - window;
        reader.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity(window as usize);
        reader.by_ref().take(window).read_to_end(&mut buf)?;

        let end = buf
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |i| i + 1);
        let tail = &buf[..end];

        match tail.iter().rposition(|b| *b == b'\n') {
            Some(newline) => {
                return Ok(Some(line_text(&tail[newline + 1..])));
            }
            None if start == 0 => {
                return Ok((!tail.is_empty()).then(|| line_text(tail)));
            }
            None => window = window.saturating_mul(2).min(size),
        }
    }
}

fn line_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
