//! Synthetic images for unit tests. Nothing here touches a fixture file.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use crate::processing::codec::{encode_jpeg, JPEG_QUALITY};

/// Brightness rising left to right, constant down each column
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let span = (width.max(2) - 1) as f32;
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
        let v = (x as f32 / span * 255.0) as u8;
        Rgb([v, v, v])
    }))
}

/// A pattern unrelated to [`gradient_image`]
pub fn checkerboard_image(width: u32, height: u32, cell: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgb([230, 40, 40])
        } else {
            Rgb([20, 20, 200])
        }
    }))
}

pub fn encode_png(img: &DynamicImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageOutputFormat::Png).unwrap();
    buffer.into_inner()
}

/// Write `img` as a canonical JPEG and return its path
pub fn write_jpeg(dir: &Path, name: &str, img: &DynamicImage) -> PathBuf {
    let path = dir.join(name);
    let bytes = encode_jpeg(&img.to_rgb8(), JPEG_QUALITY).unwrap();
    std::fs::write(&path, bytes).unwrap();
    path
}
