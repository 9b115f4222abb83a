//! Near-duplicate detection within one directory.

mod index;

pub use index::UniqueIndex;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;

use crate::config::DuplicateConfig;
use crate::discovery::discover_images;
use crate::error::{Error, Result};
use crate::logging::{log_file_error, log_fs_modification};
use crate::processing::{compute_fingerprint, Fingerprint};

/// A file whose fingerprint matched an earlier file in the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRecord {
    pub duplicate_path: PathBuf,
    pub fingerprint: Fingerprint,
    pub original_path: PathBuf,
}

/// Outcome of [`scan_for_duplicates`]
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Originals, in file name order
    pub unique: UniqueIndex,
    pub duplicates: Vec<DuplicateRecord>,
    /// Files that could not be fingerprinted, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

impl ScanResult {
    pub fn scanned(&self) -> usize {
        self.unique.len() + self.duplicates.len() + self.skipped.len()
    }
}

/// What [`handle_duplicates`] did, or would do with `dry_run`
#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    pub scanned: usize,
    pub unique: usize,
    /// `(from, to)` for every duplicate renamed (or planned)
    pub renamed: Vec<(PathBuf, PathBuf)>,
    pub failed: usize,
    pub skipped: usize,
    pub dry_run: bool,
}

/// Build a rayon pool; 0 threads means one per CPU
pub(crate) fn thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    let threads = if threads == 0 { num_cpus::get() } else { threads };
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Configuration(format!("Failed to set up thread pool: {}", e)))
}

/// Partition the images in `directory` into originals and near-duplicates
pub fn scan_for_duplicates(directory: &Path, config: &DuplicateConfig) -> Result<ScanResult> {
    scan_for_duplicates_with_progress(directory, config, &ProgressBar::hidden())
}

/// [`scan_for_duplicates`], advancing `progress` once per fingerprinted file
pub fn scan_for_duplicates_with_progress(
    directory: &Path,
    config: &DuplicateConfig,
    progress: &ProgressBar,
) -> Result<ScanResult> {
    let files = discover_images(directory)?;
    info!(
        "Fingerprinting {} images in {}",
        files.len(),
        directory.display()
    );
    progress.set_length(files.len() as u64);

    // Parallel map keeps the sorted order of `files`
    let pool = thread_pool(config.threads)?;
    let fingerprints: Vec<(PathBuf, Result<Fingerprint>)> = pool.install(|| {
        files
            .par_iter()
            .map(|file| {
                let result = compute_fingerprint(&file.path);
                progress.inc(1);
                (file.path.clone(), result)
            })
            .collect()
    });

    let mut result = ScanResult {
        unique: UniqueIndex::new(config.similarity_threshold),
        duplicates: Vec::new(),
        skipped: Vec::new(),
    };

    for (path, fingerprint) in fingerprints {
        let fingerprint = match fingerprint {
            Ok(fp) => fp,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                result.skipped.push((path, e.to_string()));
                continue;
            }
        };

        if let Some(original_path) = result.unique.check_or_insert(fingerprint, &path) {
            info!(
                "{} duplicates {} ({})",
                path.display(),
                original_path.display(),
                fingerprint
            );
            result.duplicates.push(DuplicateRecord {
                duplicate_path: path,
                fingerprint,
                original_path,
            });
        }
    }

    info!(
        "Scan of {}: {} unique, {} duplicates, {} skipped",
        directory.display(),
        result.unique.len(),
        result.duplicates.len(),
        result.skipped.len()
    );
    Ok(result)
}

/// First free `<stem>_duplicate_<n>.<ext>` next to `path`, n counting from 1
pub fn duplicate_target(path: &Path, taken: &HashSet<PathBuf>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1u64;
    loop {
        let candidate = path.with_file_name(format!("{}_duplicate_{}{}", stem, n, ext));
        if !candidate.exists() && !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Scan `directory` and rename every duplicate; originals are never touched
pub fn handle_duplicates(directory: &Path, config: &DuplicateConfig) -> Result<DuplicateReport> {
    handle_duplicates_with_progress(directory, config, &ProgressBar::hidden())
}

pub fn handle_duplicates_with_progress(
    directory: &Path,
    config: &DuplicateConfig,
    progress: &ProgressBar,
) -> Result<DuplicateReport> {
    let scan = scan_for_duplicates_with_progress(directory, config, progress)?;

    let mut report = DuplicateReport {
        scanned: scan.scanned(),
        unique: scan.unique.len(),
        skipped: scan.skipped.len(),
        dry_run: config.dry_run,
        ..Default::default()
    };

    let mut planned = HashSet::new();
    for record in &scan.duplicates {
        let target = duplicate_target(&record.duplicate_path, &planned);

        if config.dry_run {
            info!(
                "[dry run] would rename {} -> {}",
                record.duplicate_path.display(),
                target.display()
            );
        } else if let Err(e) = std::fs::rename(&record.duplicate_path, &target) {
            log_file_error(&record.duplicate_path, "rename", &e);
            report.failed += 1;
            continue;
        } else {
            log_fs_modification(
                "rename",
                &record.duplicate_path,
                Some(&format!(
                    "to {} (duplicate of {})",
                    target.display(),
                    record.original_path.display()
                )),
            );
        }

        planned.insert(target.clone());
        report.renamed.push((record.duplicate_path.clone(), target));
    }

    Ok(report)
}
