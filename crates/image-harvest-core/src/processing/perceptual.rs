//! # Perceptual Hashing Module
//!
//! Computes the three perceptual hashes that make up an image [`Fingerprint`].
//!
//! ## Overview
//!
//! Perceptual hashes stay similar for visually similar images, unlike
//! cryptographic hashes where a one-bit change scrambles the output. Each
//! algorithm reacts differently to a given edit, so a fingerprint keeps all
//! three and duplicates are decided by how many of them are equal:
//!
//! 1. pHash: 32×32 grayscale, 2-D DCT-II, the 8×8 low-frequency block compared
//!    to its median
//! 2. dHash: 9×8 grayscale, each pixel compared to its right-hand neighbour
//! 3. aHash: 8×8 grayscale, each pixel compared to the mean
//!
//! All hashes are 64 bits, rendered as 16 lowercase hex characters. Bits are
//! filled in row-major order starting from the most significant bit.
//!
//! ## References
//!
//! - "Implementation and analysis of DCT based global perceptual image hashing" by Bian Yang, et al.
//! - "Kind of Like That", Neal Krawetz (dHash)

use std::fmt;
use std::path::Path;

use image::imageops::FilterType;
use image::{io::Reader as ImageReader, DynamicImage, GrayImage};
use rustdct::{Dct2, DctPlanner};

use crate::error::Result;

const PHASH_SIZE: usize = 32;
const HASH_SIZE: usize = 8;

/// A single 64-bit perceptual hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHash(pub u64);

impl ImageHash {
    /// Calculate the Hamming distance between two hashes
    pub fn distance(&self, other: &ImageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Ordered `(phash, dhash, ahash)` triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub phash: ImageHash,
    pub dhash: ImageHash,
    pub ahash: ImageHash,
}

impl Fingerprint {
    pub fn components(&self) -> [ImageHash; 3] {
        [self.phash, self.dhash, self.ahash]
    }

    /// Number of hash components (0 to 3) equal between two fingerprints
    pub fn matching_components(&self, other: &Fingerprint) -> usize {
        self.components()
            .iter()
            .zip(other.components().iter())
            .filter(|(a, b)| a == b)
            .count()
    }

    /// Duplicate rule: at least `threshold` components agree
    pub fn is_similar(&self, other: &Fingerprint, threshold: usize) -> bool {
        self.matching_components(other) >= threshold
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.phash, self.dhash, self.ahash)
    }
}

/// Fingerprint an image on disk. Any error means the file should be skipped.
pub fn compute_fingerprint<P: AsRef<Path>>(path: P) -> Result<Fingerprint> {
    let img = ImageReader::open(path.as_ref())?
        .with_guessed_format()?
        .decode()?;
    Ok(fingerprint_image(&img))
}

/// Fingerprint an image already in memory
pub fn fingerprint_image(img: &DynamicImage) -> Fingerprint {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let gray = rgb.to_luma8();
    Fingerprint {
        phash: phash(&gray),
        dhash: dhash(&gray),
        ahash: ahash(&gray),
    }
}

/// DCT-based hash
pub fn phash(gray: &GrayImage) -> ImageHash {
    let small = image::imageops::resize(
        gray,
        PHASH_SIZE as u32,
        PHASH_SIZE as u32,
        FilterType::Lanczos3,
    );

    let mut matrix: Vec<f64> = small.pixels().map(|p| p[0] as f64).collect();

    let mut planner: DctPlanner<f64> = DctPlanner::new();
    let dct = planner.plan_dct2(PHASH_SIZE);

    // Rows, then columns through a transpose
    for row in matrix.chunks_exact_mut(PHASH_SIZE) {
        dct.process_dct2(row);
    }
    let mut transposed = transpose(&matrix, PHASH_SIZE);
    for column in transposed.chunks_exact_mut(PHASH_SIZE) {
        dct.process_dct2(column);
    }
    let coefficients = transpose(&transposed, PHASH_SIZE);

    let mut low_freq = Vec::with_capacity(HASH_SIZE * HASH_SIZE);
    for y in 0..HASH_SIZE {
        for x in 0..HASH_SIZE {
            low_freq.push(coefficients[y * PHASH_SIZE + x]);
        }
    }

    let median = median(&low_freq);
    bits_to_hash(low_freq.iter().map(|&v| v > median))
}

/// Gradient hash: left pixel brighter than its right neighbour
pub fn dhash(gray: &GrayImage) -> ImageHash {
    let small = image::imageops::resize(
        gray,
        HASH_SIZE as u32 + 1,
        HASH_SIZE as u32,
        FilterType::Lanczos3,
    );

    let mut bits = Vec::with_capacity(HASH_SIZE * HASH_SIZE);
    for y in 0..HASH_SIZE as u32 {
        for x in 0..HASH_SIZE as u32 {
            let left = small.get_pixel(x, y)[0];
            let right = small.get_pixel(x + 1, y)[0];
            bits.push(left > right);
        }
    }
    bits_to_hash(bits.into_iter())
}

/// Mean hash
pub fn ahash(gray: &GrayImage) -> ImageHash {
    let small = image::imageops::resize(
        gray,
        HASH_SIZE as u32,
        HASH_SIZE as u32,
        FilterType::Lanczos3,
    );

    let values: Vec<f64> = small.pixels().map(|p| p[0] as f64).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    bits_to_hash(values.iter().map(|&v| v > mean))
}

fn bits_to_hash(bits: impl Iterator<Item = bool>) -> ImageHash {
    let hash = bits
        .take(64)
        .fold(0u64, |acc, bit| (acc << 1) | u64::from(bit));
    ImageHash(hash)
}

fn transpose(matrix: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for y in 0..n {
        for x in 0..n {
            out[x * n + y] = matrix[y * n + x];
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
