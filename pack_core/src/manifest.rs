//! Manifest records and path escaping.
//!
//! A manifest is UTF-8 text with one record per line:
//!
//! ```text
//! <content-hash>\t<import-fingerprint>\t<escaped-relative-path>\n
//! ```
//!
//! Paths are escaped so that no record ever contains a TAB, LF or CR:
//! `\` becomes `\\`, TAB `\t`, LF `\n` and CR `\r`.

use crate::error::{Error, Result};
use crate::hash::Hash;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One file imported into a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// Content hash of the imported node.
    pub hash: Hash,
    /// Fingerprint of the import settings that produced `hash`.
    pub fingerprint: String,
    /// Path relative to the pack root, `/`-separated, unescaped.
    pub path: String,
}

impl ManifestRecord {
    pub fn new(hash: Hash, fingerprint: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            hash,
            fingerprint: fingerprint.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ManifestRecord {
    /// Formats the record as a manifest line without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}",
            self.hash,
            self.fingerprint,
            escape_path(&self.path)
        )
    }
}

/// Format a record as a manifest line (no trailing newline).
pub fn format_record(record: &ManifestRecord) -> String {
    record.to_string()
}

/// Parse one manifest line.
///
/// Only the first two tabs separate fields. `line` is the 1-based line number
/// reported in structural errors.
pub fn parse_record(text: &str, line: usize) -> Result<ManifestRecord> {
    let mut fields = text.splitn(3, '\t');
    let (Some(hash), Some(fingerprint), Some(escaped)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(Error::malformed_record(
            line,
            "expected hash, fingerprint and path separated by tabs",
        ));
    };

    Ok(ManifestRecord {
        hash: Hash::from_hex(hash)?,
        fingerprint: fingerprint.to_string(),
        path: unescape_path(escaped)?,
    })
}

/// Escape a path for storage in a manifest. Total and deterministic.
pub fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Reverse [`escape_path`].
pub fn unescape_path(escaped: &str) -> Result<String> {
    let mut path = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            path.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => path.push('\\'),
            Some('t') => path.push('\t'),
            Some('n') => path.push('\n'),
            Some('r') => path.push('\r'),
            Some(other) => {
                return Err(Error::bad_escape(
                    escaped,
                    format!("unknown escape code \\{}", other),
                ));
            }
            None => return Err(Error::bad_escape(escaped, "dangling escape at end")),
        }
    }

    Ok(path)
}

/// Streaming reader yielding `(line_number, record)` pairs in file order.
#[derive(Debug)]
pub struct ManifestReader<R> {
    lines: Lines<R>,
    line: usize,
}

impl ManifestReader<BufReader<File>> {
    /// Open the manifest at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        match File::open(path) {
            Ok(file) => Ok(Self::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::manifest_missing(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<(usize, ManifestRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = match self.lines.next()? {
            Ok(text) => text,
            Err(e) => return Some(Err(e.into())),
        };
        self.line += 1;
        let line = self.line;

        if text.is_empty() {
            return Some(Err(Error::malformed_record(line, "blank line")));
        }

        let record = parse_record(&text, line).map_err(|e| match e {
            e @ (Error::DecodeHash { .. } | Error::BadEscape { .. }) => {
                Error::malformed_record(line, e.to_string())
            }
            e => e,
        });
        Some(record.map(|record| (line, record)))
    }
}

/// Writes a manifest atomically.
///
/// Records go to a temporary file next to the manifest, which replaces the
/// manifest only on [`ManifestWriter::finish`]. Dropping the writer without
/// finishing leaves the old manifest untouched.
#[derive(Debug)]
pub struct ManifestWriter {
    path: PathBuf,
    out: BufWriter<NamedTempFile>,
    records: usize,
}

impl ManifestWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let temp = NamedTempFile::new_in(dir)?;

        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(temp),
            records: 0,
        })
    }

    /// Append one record.
    pub fn append(&mut self, record: &ManifestRecord) -> Result<()> {
        if record.fingerprint.contains(['\t', '\n', '\r']) {
            return Err(Error::invalid_settings(format!(
                "fingerprint {:?} contains a field or line separator",
                record.fingerprint
            )));
        }
        writeln!(self.out, "{}", record)?;
        self.records += 1;
        Ok(())
    }

    /// Number of records appended so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Flush, sync and move the manifest into place.
    pub fn finish(self) -> Result<()> {
        let temp = self.out.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)?;
        tracing::debug!(path = %self.path.display(), records = self.records, "wrote manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str) -> ManifestRecord {
        ManifestRecord::new(Hash::hash_bytes(path.as_bytes()), "fp-1", path)
    }

    #[test]
    fn test_escape_known_codes() {
        assert_eq!(escape_path("a\tb"), "a\\tb");
        assert_eq!(escape_path("a\nb\rc"), "a\\nb\\rc");
        assert_eq!(escape_path("back\\slash"), "back\\\\slash");
        assert_eq!(escape_path("plain/path.txt"), "plain/path.txt");
    }

    #[test]
    fn test_unescape_rejects_bad_input() {
        assert!(matches!(
            unescape_path("trailing\\"),
            Err(Error::BadEscape { .. })
        ));
        assert!(matches!(
            unescape_path("bad\\q"),
            Err(Error::BadEscape { .. })
        ));
        assert_eq!(unescape_path("a\\\\b").unwrap(), "a\\b");
    }

    #[test]
    fn test_parse_splits_on_first_two_tabs() {
        let hash = Hash::hash_bytes(b"x");
        let line = format!("{}\tfp\tdir/with\\ttab", hash);
        let parsed = parse_record(&line, 1).unwrap();
        assert_eq!(parsed.hash, hash);
        assert_eq!(parsed.fingerprint, "fp");
        assert_eq!(parsed.path, "dir/with\ttab");

        // A raw tab in the path field stays part of the path.
        let line = format!("{}\tfp\ta\tb", hash);
        assert_eq!(parse_record(&line, 1).unwrap().path, "a\tb");
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let hash = Hash::hash_bytes(b"x");
        assert!(matches!(
            parse_record(&format!("{}\tfp", hash), 7),
            Err(Error::MalformedRecord { line: 7, .. })
        ));
        assert!(matches!(
            parse_record("nothex\tfp\tpath", 1),
            Err(Error::DecodeHash { .. })
        ));
    }

    #[test]
    fn test_reader_numbers_lines_and_rejects_blank() {
        let text = format!(
            "{}\n{}\r\n\n{}\n",
            record("a"),
            record("b"),
            record("c")
        );
        let mut reader = ManifestReader::new(text.as_bytes());

        assert_eq!(reader.next().unwrap().unwrap(), (1, record("a")));
        assert_eq!(reader.next().unwrap().unwrap(), (2, record("b")));
        assert!(matches!(
            reader.next().unwrap(),
            Err(Error::MalformedRecord { line: 3, .. })
        ));
    }

    #[test]
    fn test_reader_reports_line_of_bad_hash() {
        let text = format!("{}\nzz\tfp\tb\n", record("a"));
        let results: Vec<_> = ManifestReader::new(text.as_bytes()).collect();
        assert!(matches!(
            results[1],
            Err(Error::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn test_open_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let result = ManifestReader::open(&temp_dir.path().join("PackManifest"));
        assert!(matches!(result, Err(Error::ManifestMissing { .. })));
    }

    #[test]
    fn test_writer_replaces_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("PackManifest");
        std::fs::write(&path, "old contents\n").unwrap();

        let mut writer = ManifestWriter::create(&path).unwrap();
        writer.append(&record("a")).unwrap();
        writer.append(&record("new\nline")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old contents\n");
        assert_eq!(writer.records(), 2);
        writer.finish().unwrap();

        let records: Vec<_> = ManifestReader::open(&path)
            .unwrap()
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(records, vec![record("a"), record("new\nline")]);
    }

    #[test]
    fn test_writer_rejects_tab_in_fingerprint() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = ManifestWriter::create(&temp_dir.path().join("PackManifest")).unwrap();
        let bad = ManifestRecord::new(Hash::hash_bytes(b"x"), "a\tb", "x");
        assert!(matches!(
            writer.append(&bad),
            Err(Error::InvalidSettings { .. })
        ));
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Escaping is reversible and strips separators
        #[test]
        fn prop_escape_roundtrip(path in any::<String>()) {
            let escaped = escape_path(&path);
            prop_assert!(!escaped.contains(['\t', '\n', '\r']));
            prop_assert_eq!(unescape_path(&escaped)?, path);
        }

        /// Format then parse yields the same record
        #[test]
        fn prop_format_parse_idempotent(
            bytes in prop::array::uniform32(any::<u8>()),
            fingerprint in "[a-z0-9:-]{1,40}",
            path in any::<String>(),
        ) {
            let record = ManifestRecord::new(Hash::from_bytes(bytes), fingerprint, path);
            let line = format_record(&record);
            let parsed = parse_record(&line, 1)?;
            prop_assert_eq!(&parsed, &record);
            prop_assert_eq!(format_record(&parsed), line);
        }
    }
}
