//! In-memory mutable directory tree for assembling a pack root.

use crate::dag::DagBuilder;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::Link;
use crate::tree::{EntryType, TreeEntry, validate_name};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Node {
    File(Link),
    Directory(BTreeMap<String, Node>),
}

/// A directory tree built up from pack-relative paths.
///
/// Nothing touches the store until [`PackTree::finalize`], which writes one
/// directory block per directory, children first.
#[derive(Debug, Clone, Default)]
pub struct PackTree {
    root: BTreeMap<String, Node>,
}

/// Split a pack-relative path into validated components.
///
/// `.` and empty components are dropped, so `"."` names the root. Absolute
/// paths and `..` are rejected.
pub fn split_rel_path(path: &str) -> Result<Vec<&str>> {
    if path.starts_with('/') {
        return Err(Error::invalid_path(path, "absolute path"));
    }

    let mut components = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(Error::invalid_path(path, "path escapes the pack root")),
            name => {
                validate_name(name).map_err(|e| Error::invalid_path(path, e.to_string()))?;
                components.push(name);
            }
        }
    }
    Ok(components)
}

impl PackTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the directory at `path` and any missing parents.
    pub fn mkdir_all(&mut self, path: &str) -> Result<()> {
        let mut dir = &mut self.root;
        for name in split_rel_path(path)? {
            let node = dir
                .entry(name.to_string())
                .or_insert_with(|| Node::Directory(BTreeMap::new()));
            dir = match node {
                Node::Directory(children) => children,
                Node::File(_) => {
                    return Err(Error::tree(path, format!("{} is not a directory", name)));
                }
            };
        }
        Ok(())
    }

    /// Insert or replace the file node at `path`. The parent must exist.
    pub fn put_node(&mut self, path: &str, link: Link) -> Result<()> {
        let components = split_rel_path(path)?;
        let Some((name, parents)) = components.split_last() else {
            return Err(Error::tree(path, "cannot replace the root directory"));
        };

        let mut dir = &mut self.root;
        for parent in parents {
            dir = match dir.get_mut(*parent) {
                Some(Node::Directory(children)) => children,
                Some(Node::File(_)) => {
                    return Err(Error::tree(path, format!("{} is not a directory", parent)));
                }
                None => {
                    return Err(Error::tree(path, format!("{} does not exist", parent)));
                }
            };
        }

        dir.insert(name.to_string(), Node::File(link));
        Ok(())
    }

    /// Write every directory block and return the root directory hash.
    pub fn finalize(self, builder: &DagBuilder<'_>) -> Result<Hash> {
        let root = write_directory(self.root, builder)?;
        tracing::debug!(root = %root.hash, size = root.size, "finalized pack tree");
        Ok(root.hash)
    }
}

fn write_directory(children: BTreeMap<String, Node>, builder: &DagBuilder<'_>) -> Result<Link> {
    let mut entries = Vec::with_capacity(children.len());
    for (name, node) in children {
        let entry = match node {
            Node::File(link) => TreeEntry::new(EntryType::File, link.hash, link.size, name)?,
            Node::Directory(grandchildren) => {
                let link = write_directory(grandchildren, builder)?;
                TreeEntry::new(EntryType::Directory, link.hash, link.size, name)?
            }
        };
        entries.push(entry);
    }
    builder.put_directory(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::ImportSettings;
    use crate::store::Store;
    use tempfile::TempDir;

    fn link(data: &[u8]) -> Link {
        Link {
            hash: Hash::hash_bytes(data),
            size: data.len() as u64,
        }
    }

    #[test]
    fn test_split_rel_path() {
        assert_eq!(split_rel_path("a/b/c.txt").unwrap(), vec!["a", "b", "c.txt"]);
        assert_eq!(split_rel_path("./a//b").unwrap(), vec!["a", "b"]);
        assert!(split_rel_path(".").unwrap().is_empty());
        assert!(matches!(
            split_rel_path("/etc/passwd"),
            Err(Error::InvalidPath { .. })
        ));
        assert!(matches!(
            split_rel_path("a/../../b"),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_put_node_requires_parent() {
        let mut tree = PackTree::new();
        assert!(matches!(
            tree.put_node("missing/file", link(b"x")),
            Err(Error::Tree { .. })
        ));

        tree.mkdir_all("present").unwrap();
        tree.put_node("present/file", link(b"x")).unwrap();
        assert!(tree.put_node(".", link(b"x")).is_err());
    }

    #[test]
    fn test_mkdir_through_file_fails() {
        let mut tree = PackTree::new();
        tree.put_node("file", link(b"x")).unwrap();
        assert!(matches!(
            tree.mkdir_all("file/sub"),
            Err(Error::Tree { .. })
        ));
    }

    #[test]
    fn test_finalize_is_order_independent() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path()).unwrap();
        let builder = DagBuilder::new(&store, ImportSettings::default()).unwrap();

        let mut forward = PackTree::new();
        forward.mkdir_all("docs/deep").unwrap();
        forward.put_node("docs/deep/a", link(b"a")).unwrap();
        forward.put_node("b", link(b"b")).unwrap();

        let mut backward = PackTree::new();
        backward.put_node("b", link(b"b")).unwrap();
        backward.mkdir_all("docs").unwrap();
        backward.mkdir_all("docs/deep").unwrap();
        backward.put_node("docs/deep/a", link(b"stale")).unwrap();
        backward.put_node("docs/deep/a", link(b"a")).unwrap();

        let root = forward.finalize(&builder).unwrap();
        assert_eq!(root, backward.finalize(&builder).unwrap());

        let entries = store.get_directory(&root).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "docs"]);
        assert_eq!(entries[1].entry_type, EntryType::Directory);
        assert_eq!(entries[1].size, 1);
    }

    #[test]
    fn test_empty_tree_finalizes() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::init(temp_dir.path()).unwrap();
        let builder = DagBuilder::new(&store, ImportSettings::default()).unwrap();

        let root = PackTree::new().finalize(&builder).unwrap();
        assert!(store.get_directory(&root).unwrap().is_empty());
    }
}
