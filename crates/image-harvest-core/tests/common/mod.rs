#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use image_harvest_core::download::RetryPolicy;
use image_harvest_core::Config;

/// Brightness rising left to right
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    let span = (width.max(2) - 1) as f32;
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
        let v = (x as f32 / span * 255.0) as u8;
        Rgb([v, v, v])
    }))
}

/// Concentric rings, unrelated to [`gradient`]
pub fn rings(width: u32, height: u32) -> DynamicImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
        if (d / 12.0) as u32 % 2 == 0 {
            Rgb([240, 200, 40])
        } else {
            Rgb([30, 60, 120])
        }
    }))
}

pub fn encode(img: &DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

pub fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    encode(img, ImageOutputFormat::Png)
}

pub fn jpeg_bytes(img: &DynamicImage) -> Vec<u8> {
    encode(img, ImageOutputFormat::Jpeg(95))
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Defaults tuned for a loopback mock server: private hosts allowed and
/// millisecond delays.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.validation.allow_private_hosts = true;
    config.download.concurrency = 4;
    config.download.retries = 3;
    config.download.retry_delay_ms = 5;
    config.download.backoff_base_ms = 5;
    config.download.timeout_ms = 5_000;
    config
}

/// Retry policy without jitter, so tests never wait long
pub fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        retry_delay: Duration::from_millis(5),
        backoff_base: Duration::from_millis(5),
        max_jitter: Duration::ZERO,
    }
}

/// Sorted file names in `dir`
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
