use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::processing::{Fingerprint, ImageHash};

/// Insertion-ordered map from fingerprint to the first file seen with it.
///
/// Entries are bucketed by each hash component, so a lookup only compares
/// against entries sharing at least one component. Candidates are visited in
/// insertion order, which makes every decision identical to comparing against
/// all entries one by one.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    threshold: usize,
    entries: Vec<(Fingerprint, PathBuf)>,
    buckets: [HashMap<ImageHash, Vec<usize>>; 3],
}

impl UniqueIndex {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            entries: Vec::new(),
            buckets: Default::default(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&Fingerprint, &Path)> {
        self.entries.iter().map(|(fp, path)| (fp, path.as_path()))
    }

    /// Earliest inserted entry with at least `threshold` equal components
    pub fn find_match(&self, fingerprint: &Fingerprint) -> Option<(&Fingerprint, &Path)> {
        if self.threshold == 0 {
            return self.entries().next();
        }

        let mut candidates: Vec<usize> = fingerprint
            .components()
            .iter()
            .zip(self.buckets.iter())
            .filter_map(|(hash, bucket)| bucket.get(hash))
            .flatten()
            .copied()
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        candidates
            .into_iter()
            .map(|i| &self.entries[i])
            .find(|(existing, _)| existing.is_similar(fingerprint, self.threshold))
            .map(|(fp, path)| (fp, path.as_path()))
    }

    /// Add an entry. Returns false, leaving the index unchanged, when the exact
    /// fingerprint is already present.
    pub fn insert(&mut self, fingerprint: Fingerprint, path: PathBuf) -> bool {
        if self.entries.iter().any(|(fp, _)| *fp == fingerprint) {
            return false;
        }
        let position = self.entries.len();
        for (hash, bucket) in fingerprint.components().iter().zip(self.buckets.iter_mut()) {
            bucket.entry(*hash).or_default().push(position);
        }
        self.entries.push((fingerprint, path));
        true
    }

    /// Return the original `path` duplicates, or insert it and return `None`
    pub fn check_or_insert(&mut self, fingerprint: Fingerprint, path: &Path) -> Option<PathBuf> {
        if let Some((_, original)) = self.find_match(&fingerprint) {
            return Some(original.to_path_buf());
        }
        self.insert(fingerprint, path.to_path_buf());
        None
    }
}
