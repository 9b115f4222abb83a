//! Making duplicates hash-distinct by applying small random edits in place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::DynamicImage;
use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;

use crate::config::DuplicateConfig;
use crate::deduplication::{
    scan_for_duplicates_with_progress, thread_pool, DuplicateRecord, UniqueIndex,
};
use crate::discovery::discover_images;
use crate::error::Result;
use crate::logging::{log_file_error, log_fs_modification};
use crate::processing::codec::{decode_image, write_image_for_path};
use crate::processing::{compute_fingerprint, Fingerprint, Mutation};

/// Mutations applied per attempt by [`RandomMutations::default`]
pub const MUTATIONS_PER_ATTEMPT: usize = 2;

/// Produces a perturbed copy of an image
pub trait Perturbation: Send + Sync {
    fn perturb(&self, img: &DynamicImage) -> DynamicImage;
}

/// `count` random mutations of distinct kinds, drawn fresh for every call
#[derive(Debug, Clone, Copy)]
pub struct RandomMutations {
    pub count: usize,
}

impl Default for RandomMutations {
    fn default() -> Self {
        Self {
            count: MUTATIONS_PER_ATTEMPT,
        }
    }
}

impl Perturbation for RandomMutations {
    fn perturb(&self, img: &DynamicImage) -> DynamicImage {
        let mut rng = rand::rng();
        Mutation::random_set(&mut rng, self.count)
            .iter()
            .fold(img.clone(), |acc, mutation| mutation.apply(&acc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniquifyOutcome {
    /// The file now clears the threshold against every indexed image
    Unique {
        path: PathBuf,
        fingerprint: Fingerprint,
        attempts: usize,
    },
    /// Every attempt still matched; the file holds the last mutation
    Exhausted { path: PathBuf, attempts: usize },
}

#[derive(Debug, Clone, Default)]
pub struct UniquifyReport {
    pub scanned: usize,
    /// Files the run tried to change
    pub targeted: usize,
    pub uniquified: usize,
    pub exhausted: usize,
    /// Files that could not be read, decoded or written
    pub failed: usize,
    pub skipped: usize,
}

pub struct Uniquifier {
    config: DuplicateConfig,
    perturbation: Box<dyn Perturbation>,
}

impl Uniquifier {
    pub fn new(config: DuplicateConfig) -> Self {
        Self::with_perturbation(config, Box::new(RandomMutations::default()))
    }

    pub fn with_perturbation(config: DuplicateConfig, perturbation: Box<dyn Perturbation>) -> Self {
        Self {
            config,
            perturbation,
        }
    }

    /// Mutate `record.duplicate_path` until its fingerprint no longer matches
    /// anything in `index`, or the attempt budget runs out.
    ///
    /// Every attempt starts again from the bytes the file held on entry, so
    /// edits never accumulate. A success is inserted into `index`.
    pub fn uniquify(
        &self,
        record: &DuplicateRecord,
        index: &mut UniqueIndex,
    ) -> Result<UniquifyOutcome> {
        let path = &record.duplicate_path;
        let original = std::fs::read(path).map_err(|e| {
            log_file_error(path, "read", &e);
            e
        })?;

        let max_attempts = self.config.max_uniquify_attempts;
        for attempt in 1..=max_attempts {
            let img = decode_image(&original)?;
            let mutated = self.perturbation.perturb(&img);
            write_image_for_path(path, &mutated)?;

            let fingerprint = compute_fingerprint(path)?;
            match index.find_match(&fingerprint) {
                None => {
                    index.insert(fingerprint, path.clone());
                    log_fs_modification(
                        "uniquify",
                        path,
                        Some(&format!("attempt {}, fingerprint {}", attempt, fingerprint)),
                    );
                    return Ok(UniquifyOutcome::Unique {
                        path: path.clone(),
                        fingerprint,
                        attempts: attempt,
                    });
                }
                Some((_, still_matches)) => {
                    info!(
                        "Attempt {}/{} on {} still matches {}",
                        attempt,
                        max_attempts,
                        path.display(),
                        still_matches.display()
                    );
                }
            }
        }

        warn!(
            "Could not make {} unique in {} attempts",
            path.display(),
            max_attempts
        );
        Ok(UniquifyOutcome::Exhausted {
            path: path.clone(),
            attempts: max_attempts,
        })
    }

    /// Scan `directory` and uniquify every duplicate against the running index
    pub fn uniquify_duplicates(&self, directory: &Path) -> Result<UniquifyReport> {
        self.uniquify_duplicates_with_progress(directory, &ProgressBar::hidden())
    }

    pub fn uniquify_duplicates_with_progress(
        &self,
        directory: &Path,
        progress: &ProgressBar,
    ) -> Result<UniquifyReport> {
        let mut scan = scan_for_duplicates_with_progress(directory, &self.config, progress)?;
        let mut report = UniquifyReport {
            scanned: scan.scanned(),
            targeted: scan.duplicates.len(),
            skipped: scan.skipped.len(),
            ..Default::default()
        };

        for record in &scan.duplicates {
            match self.uniquify(record, &mut scan.unique) {
                Ok(UniquifyOutcome::Unique { .. }) => report.uniquified += 1,
                Ok(UniquifyOutcome::Exhausted { .. }) => report.exhausted += 1,
                Err(e) => {
                    warn!("Failed to uniquify {}: {}", record.duplicate_path.display(), e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Uniquified {} of {} duplicates in {} ({} exhausted, {} failed)",
            report.uniquified,
            report.targeted,
            directory.display(),
            report.exhausted,
            report.failed
        );
        Ok(report)
    }

    /// Apply one perturbation to every image in `directory`, duplicate or not
    pub fn uniquify_all(&self, directory: &Path) -> Result<UniquifyReport> {
        self.uniquify_all_with_progress(directory, &ProgressBar::hidden())
    }

    pub fn uniquify_all_with_progress(
        &self,
        directory: &Path,
        progress: &ProgressBar,
    ) -> Result<UniquifyReport> {
        let files = discover_images(directory)?;
        progress.set_length(files.len() as u64);

        let changed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let pool = thread_pool(self.config.threads)?;
        pool.install(|| {
            files.par_iter().for_each(|file| {
                match self.perturb_file(&file.path) {
                    Ok(()) => changed.fetch_add(1, Ordering::Relaxed),
                    Err(e) => {
                        warn!("Failed to mutate {}: {}", file.path.display(), e);
                        failed.fetch_add(1, Ordering::Relaxed)
                    }
                };
                progress.inc(1);
            })
        });

        let report = UniquifyReport {
            scanned: files.len(),
            targeted: files.len(),
            uniquified: changed.into_inner(),
            failed: failed.into_inner(),
            ..Default::default()
        };
        info!(
            "Mutated {} of {} images in {}",
            report.uniquified,
            report.scanned,
            directory.display()
        );
        Ok(report)
    }

    fn perturb_file(&self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let img = decode_image(&bytes)?;
        write_image_for_path(path, &self.perturbation.perturb(&img))?;
        log_fs_modification("mutate", path, None);
        Ok(())
    }
}
