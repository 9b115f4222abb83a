use std::fs;
use std::io;
use std::path::Path;

use log::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::logging::log_file_error;
use crate::types::{ImageFile, ImageFormat};
use crate::validation::validate_file_extension;

/// List the images directly inside `directory`, sorted by file name.
///
/// Subdirectories are not descended into. Hidden files and files without an
/// image extension are dropped. The sort order decides which of two
/// duplicates counts as the original.
pub fn discover_images(directory: &Path) -> Result<Vec<ImageFile>> {
    if !directory.is_dir() {
        return Err(Error::FileNotFound(directory.to_path_buf()));
    }

    let mut image_files = Vec::new();

    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();

        if is_hidden(path) || !is_image_path(path) {
            continue;
        }

        match get_file_metadata(path) {
            Ok((size, last_modified)) => image_files.push(ImageFile {
                path: path.to_path_buf(),
                size,
                last_modified,
                format: get_image_format(path),
            }),
            Err(e) => {
                // Log error but continue with other files
                log_file_error(path, "metadata", &e);
                warn!("Skipping {}: could not read metadata", path.display());
            }
        }
    }

    Ok(image_files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn get_image_format(path: &Path) -> ImageFormat {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    ImageFormat::from_extension(ext)
}

fn get_file_metadata(path: &Path) -> io::Result<(u64, std::time::SystemTime)> {
    let metadata = fs::metadata(path)?;
    Ok((metadata.len(), metadata.modified()?))
}

/// Returns if the given path has an image extension
pub fn is_image_path(path: &Path) -> bool {
    validate_file_extension(path) && get_image_format(path).is_supported()
}

// -- Tests --
