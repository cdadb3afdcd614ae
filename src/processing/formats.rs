//! Image format detection

use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::ImageFormat;

use crate::error::{ErrorContext, Result, WatermarkError};

/// Bytes read from the start of a file to tell its format
const HEADER_LEN: u64 = 8192;

/// Detect image format from the file header (magic bytes)
pub fn detect_format_from_header(data: &[u8]) -> Option<ImageFormat> {
    let kind = infer::get(data)?;
    if kind.matcher_type() != infer::MatcherType::Image {
        return None;
    }
    ImageFormat::from_extension(kind.extension())
}

/// Sniff a file's format from its contents, ignoring the extension.
///
/// Files that are not images, or images we cannot decode, yield `NotAnImage`.
pub fn sniff_file<P: AsRef<Path>>(path: P) -> Result<ImageFormat> {
    let path = path.as_ref();
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    File::open(path)
        .and_then(|file| file.take(HEADER_LEN).read_to_end(&mut header))
        .with_file_context(path.to_path_buf())?;

    detect_format_from_header(&header)
        .filter(|format| format.can_read())
        .ok_or_else(|| WatermarkError::NotAnImage {
            file: path.to_path_buf(),
        })
}

/// Formats we can encode; anything else is written as PNG
pub fn can_write(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::Tiff | ImageFormat::Bmp
    )
}

/// Whether files of this format can carry an alpha channel
pub fn supports_alpha(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif | ImageFormat::Tiff
    )
}
