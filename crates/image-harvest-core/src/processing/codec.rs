//! Decoding arbitrary image payloads and re-encoding them as canonical JPEG.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat, RgbImage};
use log::{debug, warn};

use crate::config::{MAX_IMAGE_SIZE, MIN_FILE_SIZE};
use crate::error::{Error, Result};
use crate::logging::log_file_error;

/// Quality used for every canonical JPEG
pub const JPEG_QUALITY: u8 = 95;

/// Formats tried in turn when the magic bytes are not recognised
const FALLBACK_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

/// An RGB image encoded as JPEG
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode a payload, sniffing the format from its magic bytes first
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    match image::guess_format(bytes) {
        Ok(format) => Ok(image::load_from_memory_with_format(bytes, format)?),
        Err(sniff_err) => {
            debug!("Format not recognised from magic bytes: {}", sniff_err);
            FALLBACK_FORMATS
                .iter()
                .find_map(|&format| image::load_from_memory_with_format(bytes, format).ok())
                .ok_or_else(|| Error::Image(sniff_err))
        }
    }
}

/// Drop alpha by compositing onto white; other color modes convert straight to RGB
pub fn flatten_to_rgb(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Encode an RGB buffer as JPEG
pub fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
    Ok(buffer)
}

/// Decode, flatten to RGB and re-encode at [`JPEG_QUALITY`]
pub fn decode_and_normalize(bytes: &[u8]) -> Result<CanonicalImage> {
    decode_and_normalize_with_quality(bytes, JPEG_QUALITY)
}

pub fn decode_and_normalize_with_quality(bytes: &[u8], quality: u8) -> Result<CanonicalImage> {
    let img = decode_image(bytes)?;
    let rgb = flatten_to_rgb(&img);
    let (width, height) = rgb.dimensions();
    Ok(CanonicalImage {
        bytes: encode_jpeg(&rgb, quality)?,
        width,
        height,
    })
}

/// Where an undecodable payload for `path` is kept
pub fn unknown_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".unknown");
    path.with_file_name(name)
}

/// Normalize a downloaded payload and write it to `path`, returning bytes written.
///
/// When the payload cannot be decoded the raw bytes are written to
/// `<name>.unknown` next to `path` and [`Error::Decode`] is returned.
pub fn save_payload(bytes: &[u8], path: &Path) -> Result<u64> {
    save_payload_with(bytes, path, MAX_IMAGE_SIZE, JPEG_QUALITY)
}

pub fn save_payload_with(bytes: &[u8], path: &Path, max_size: u64, quality: u8) -> Result<u64> {
    let size = bytes.len() as u64;
    if size < MIN_FILE_SIZE || size > max_size {
        return Err(Error::InvalidSize {
            size,
            min: MIN_FILE_SIZE,
            max: max_size,
        });
    }

    if !crate::validation::validate_file_extension(path) {
        return Err(Error::UnsupportedFormat(path.display().to_string()));
    }

    match decode_and_normalize_with_quality(bytes, quality) {
        Ok(canonical) => {
            std::fs::write(path, &canonical.bytes).map_err(|e| {
                log_file_error(path, "write", &e);
                e
            })?;
            Ok(canonical.bytes.len() as u64)
        }
        Err(decode_err) => {
            let preserved = unknown_path(path);
            warn!(
                "Could not decode payload for {}: {}; keeping raw bytes",
                path.display(),
                decode_err
            );
            std::fs::write(&preserved, bytes).map_err(|e| {
                log_file_error(&preserved, "write", &e);
                e
            })?;
            Err(Error::Decode {
                path: path.to_path_buf(),
                preserved,
                reason: decode_err.to_string(),
            })
        }
    }
}

/// Write `img` back to `path` in the format its extension names.
///
/// JPEG output is flattened and encoded at [`JPEG_QUALITY`]. WebP cannot be
/// written and fails with [`Error::UnsupportedFormat`].
pub fn write_image_for_path(path: &Path, img: &DynamicImage) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let result = match ext.as_str() {
        "jpg" | "jpeg" => encode_jpeg(&flatten_to_rgb(img), JPEG_QUALITY)
            .and_then(|bytes| std::fs::write(path, bytes).map_err(Error::from)),
        "png" => img.save_with_format(path, ImageFormat::Png).map_err(Error::from),
        "gif" => DynamicImage::ImageRgba8(img.to_rgba8())
            .save_with_format(path, ImageFormat::Gif)
            .map_err(Error::from),
        "bmp" => img.save_with_format(path, ImageFormat::Bmp).map_err(Error::from),
        "tif" | "tiff" => img.save_with_format(path, ImageFormat::Tiff).map_err(Error::from),
        _ => return Err(Error::UnsupportedFormat(path.display().to_string())),
    };

    if let Err(e) = &result {
        log_file_error(path, "write", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{encode_png, gradient_image};
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    #[test]
    fn test_transparent_pixels_become_white() {
        let rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0]));
        let rgb = flatten_to_rgb(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);

        let opaque = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let rgb = flatten_to_rgb(&DynamicImage::ImageRgba8(opaque));
        assert_eq!(rgb.get_pixel(3, 3).0, [10, 20, 30]);
    }

    #[test]
    fn test_decode_and_normalize_png_to_jpeg() {
        let png = encode_png(&gradient_image(64, 48));
        let canonical = decode_and_normalize(&png).unwrap();

        assert_eq!((canonical.width, canonical.height), (64, 48));
        assert_eq!(image::guess_format(&canonical.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_image(&[0u8; 512]).is_err());
    }

    #[test]
    fn test_unknown_path_appends_suffix() {
        assert_eq!(
            unknown_path(Path::new("/tmp/out/1000.jpeg")),
            PathBuf::from("/tmp/out/1000.jpeg.unknown")
        );
    }

    #[test]
    fn test_save_payload_writes_jpeg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1000.jpeg");
        let png = encode_png(&gradient_image(32, 32));

        let written = save_payload(&png, &path).unwrap();

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(written, on_disk.len() as u64);
        assert!(image::load_from_memory(&on_disk).is_ok());
    }

    #[test]
    fn test_save_payload_keeps_undecodable_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1001.jpeg");
        let garbage = vec![0x42u8; 400];

        let err = save_payload(&garbage, &path).unwrap_err();

        assert!(matches!(err, Error::Decode { .. }));
        assert!(!path.exists());
        let preserved = dir.path().join("1001.jpeg.unknown");
        assert_eq!(std::fs::read(preserved).unwrap(), garbage);
    }

    #[test]
    fn test_save_payload_rejects_tiny_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1002.jpeg");

        let err = save_payload(&[1, 2, 3], &path).unwrap_err();

        assert!(matches!(err, Error::InvalidSize { size: 3, .. }));
        assert!(!path.exists());
        assert!(!dir.path().join("1002.jpeg.unknown").exists());
    }

    #[test]
    fn test_write_image_follows_extension() {
        let dir = tempdir().unwrap();
        let img = gradient_image(24, 24);

        let jpg = dir.path().join("a.JPG");
        write_image_for_path(&jpg, &img).unwrap();
        let bytes = std::fs::read(&jpg).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);

        let png = dir.path().join("b.png");
        write_image_for_path(&png, &img).unwrap();
        let bytes = std::fs::read(&png).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);

        let webp = dir.path().join("c.webp");
        assert!(matches!(
            write_image_for_path(&webp, &img),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
