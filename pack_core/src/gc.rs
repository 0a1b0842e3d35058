//! Garbage collection.
//!
//! Mark-and-sweep over a [`Blockstore`]: everything reachable from a
//! recursive pin (plus every direct pin itself) survives, everything else is
//! deleted. Marking is done up front; the sweep is a lazy iterator that holds
//! the store's GC lock until it is dropped.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::locate::locate_root;
use crate::pin::{PinMode, PinSet};
use crate::store::{Blockstore, LockGuard, Store};
use std::collections::HashSet;
use std::path::Path;

/// One outcome of the sweep.
#[derive(Debug)]
pub enum GcEvent {
    /// A block was deleted.
    KeyRemoved(Hash),
    /// Enumerating or deleting a block failed; the sweep went on.
    Error(Error),
}

/// Mark everything reachable from `pins`, then return the sweep.
///
/// Blocks the GC lock until no writer holds it. Missing blocks below a pin
/// are skipped; a reachable block that cannot be read aborts before anything
/// is deleted.
pub fn collect<'a, S: Blockstore>(
    store: &'a S,
    pins: &PinSet,
    cancel: &CancelToken,
) -> Result<Sweep<'a, S>> {
    let lock = store.gc_lock()?;
    let marked = mark(store, pins)?;
    tracing::debug!(marked = marked.len(), pins = pins.len(), "marked reachable blocks");

    Ok(Sweep {
        store,
        keys: store.all_keys()?,
        marked,
        cancel: cancel.clone(),
        removed: 0,
        failed: 0,
        finished: false,
        _lock: lock,
    })
}

/// Collect garbage for the pack whose manifest is at `manifest`.
///
/// The manifest's root is the only pin: it replaces any previous pin set and
/// is flushed to disk before the sweep starts.
pub fn collect_pack<'a>(
    store: &'a Store,
    manifest: &Path,
    cancel: &CancelToken,
) -> Result<Sweep<'a, Store>> {
    let root = locate_root(manifest)?;

    let mut pins = PinSet::fresh(store.pins_path());
    pins.pin(root, PinMode::Recursive);
    if !store.has(&root) {
        return Err(Error::object_not_found(root.to_hex()));
    }
    pins.flush()?;

    tracing::info!(%root, "collecting garbage");
    collect(store, &pins, cancel)
}

fn mark<S: Blockstore>(store: &S, pins: &PinSet) -> Result<HashSet<Hash>> {
    let mut marked = HashSet::new();
    let mut pending: Vec<Hash> = pins
        .iter()
        .filter(|(_, mode)| *mode == PinMode::Recursive)
        .map(|(hash, _)| *hash)
        .collect();

    while let Some(hash) = pending.pop() {
        if marked.contains(&hash) {
            continue;
        }
        // Absent blocks are not marked.
        if let Some(children) = store.links(&hash)? {
            marked.insert(hash);
            pending.extend(children);
        }
    }

    for (hash, mode) in pins.iter() {
        if mode == PinMode::Direct {
            marked.insert(*hash);
        }
    }

    Ok(marked)
}

/// Lazy sweep over every unmarked block.
///
/// Each deletion is reported exactly once. After cancellation a single
/// `Error(Cancelled)` is yielded and the iterator ends.
pub struct Sweep<'a, S: Blockstore + 'a> {
    store: &'a S,
    keys: S::Keys<'a>,
    marked: HashSet<Hash>,
    cancel: CancelToken,
    removed: usize,
    failed: usize,
    finished: bool,
    // Declared last so the lock outlives everything else.
    _lock: LockGuard,
}

impl<'a, S: Blockstore + 'a> Sweep<'a, S> {
    /// Blocks deleted so far.
    pub fn removed(&self) -> usize {
        self.removed
    }

    /// Failures reported so far.
    pub fn failed(&self) -> usize {
        self.failed
    }
}

impl<'a, S: Blockstore + 'a> Iterator for Sweep<'a, S> {
    type Item = GcEvent;

    fn next(&mut self) -> Option<GcEvent> {
        if self.finished {
            return None;
        }

        loop {
            if self.cancel.is_cancelled() {
                self.finished = true;
                tracing::info!(removed = self.removed, "garbage collection cancelled");
                return Some(GcEvent::Error(Error::Cancelled));
            }

            let key = match self.keys.next() {
                Some(Ok(key)) => key,
                Some(Err(e)) => {
                    self.failed += 1;
                    return Some(GcEvent::Error(e));
                }
                None => {
                    self.finished = true;
                    tracing::info!(
                        removed = self.removed,
                        failed = self.failed,
                        "garbage collection finished"
                    );
                    return None;
                }
            };

            if self.marked.contains(&key) {
                continue;
            }

            return Some(match self.store.delete_block(&key) {
                Ok(()) => {
                    self.removed += 1;
                    tracing::debug!(%key, "removed block");
                    GcEvent::KeyRemoved(key)
                }
                Err(e) => {
                    self.failed += 1;
                    tracing::warn!(%key, error = %e, "failed to remove block");
                    GcEvent::Error(e)
                }
            });
        }
    }
}
