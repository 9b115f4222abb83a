//! Small, bounded image edits used to make a duplicate hash-distinct while
//! keeping it visually the same picture.

use image::{DynamicImage, Rgb, RgbImage};
use rand::seq::IndexedRandom;
use rand::Rng;

/// Brightness factor range, as an offset from 1.0
pub const BRIGHTNESS_RANGE: (f32, f32) = (-0.02, 0.02);

/// Contrast factor range, as an offset from 1.0
pub const CONTRAST_RANGE: (f32, f32) = (-0.03, 0.03);

/// One edit with its parameters already drawn, so applying it is deterministic
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mutation {
    /// Multiply every channel by the factor
    Brightness(f32),
    /// Scale distance from the mean luminance by the factor
    Contrast(f32),
    /// Remove one pixel from every edge
    CropEdge,
    /// Paint one pixel; position given as fractions of width and height
    PixelNoise { x: f32, y: f32, color: [u8; 3] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationKind {
    Brightness,
    Contrast,
    CropEdge,
    PixelNoise,
}

const KINDS: [MutationKind; 4] = [
    MutationKind::Brightness,
    MutationKind::Contrast,
    MutationKind::CropEdge,
    MutationKind::PixelNoise,
];

impl Mutation {
    fn draw<R: Rng + ?Sized>(kind: MutationKind, rng: &mut R) -> Self {
        match kind {
            MutationKind::Brightness => {
                Mutation::Brightness(1.0 + rng.random_range(BRIGHTNESS_RANGE.0..=BRIGHTNESS_RANGE.1))
            }
            MutationKind::Contrast => {
                Mutation::Contrast(1.0 + rng.random_range(CONTRAST_RANGE.0..=CONTRAST_RANGE.1))
            }
            MutationKind::CropEdge => Mutation::CropEdge,
            MutationKind::PixelNoise => Mutation::PixelNoise {
                x: rng.random_range(0.0..1.0),
                y: rng.random_range(0.0..1.0),
                color: [rng.random(), rng.random(), rng.random()],
            },
        }
    }

    /// Any single mutation with random parameters
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let kind = KINDS[rng.random_range(0..KINDS.len())];
        Self::draw(kind, rng)
    }

    /// `count` mutations of distinct kinds (at most four)
    pub fn random_set<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<Self> {
        let kinds: Vec<MutationKind> = KINDS.choose_multiple(rng, count).copied().collect();
        kinds.into_iter().map(|kind| Self::draw(kind, rng)).collect()
    }

    /// Apply to a copy of `img`; the input is never modified
    pub fn apply(&self, img: &DynamicImage) -> DynamicImage {
        let rgb = img.to_rgb8();
        let out = match *self {
            Mutation::Brightness(factor) => brightness(&rgb, factor),
            Mutation::Contrast(factor) => contrast(&rgb, factor),
            Mutation::CropEdge => crop_edge(&rgb),
            Mutation::PixelNoise { x, y, color } => pixel_noise(rgb, x, y, color),
        };
        DynamicImage::ImageRgb8(out)
    }
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn brightness(rgb: &RgbImage, factor: f32) -> RgbImage {
    let mut out = rgb.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = clamp_channel(*c as f32 * factor);
        }
    }
    out
}

fn contrast(rgb: &RgbImage, factor: f32) -> RgbImage {
    let count = (rgb.width() as f64 * rgb.height() as f64).max(1.0);
    let mean = rgb
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum::<f64>()
        / count;
    let mean = mean as f32;

    let mut out = rgb.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = clamp_channel(mean + (*c as f32 - mean) * factor);
        }
    }
    out
}

fn crop_edge(rgb: &RgbImage) -> RgbImage {
    let (width, height) = rgb.dimensions();
    if width <= 2 || height <= 2 {
        return rgb.clone();
    }
    image::imageops::crop_imm(rgb, 1, 1, width - 2, height - 2).to_image()
}

fn pixel_noise(mut rgb: RgbImage, x: f32, y: f32, color: [u8; 3]) -> RgbImage {
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return rgb;
    }
    let px = ((x * width as f32) as u32).min(width - 1);
    let py = ((y * height as f32) as u32).min(height - 1);
    rgb.put_pixel(px, py, Rgb(color));
    rgb
}
