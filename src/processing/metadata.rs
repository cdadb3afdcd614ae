//! EXIF handling: turn images upright and carry their tags to JPEG copies

use std::io::Cursor;

use exif::{Field, In, Tag, Value};
use image::DynamicImage;
use tracing::debug;

use crate::error::{Result, WatermarkError};

/// APP1 marker and identifier of the JPEG segment that holds EXIF
const APP1: [u8; 2] = [0xFF, 0xE1];
const EXIF_HEADER: &[u8; 6] = b"Exif\0\0";

/// Tags whose values are offsets into the source file
const POINTER_TAGS: [Tag; 7] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

/// EXIF read from an input file
pub struct ExifData {
    exif: exif::Exif,
}

impl ExifData {
    /// Parse EXIF from an encoded image; `None` when it has none
    pub fn read(bytes: &[u8]) -> Option<Self> {
        match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
            Ok(exif) => Some(Self { exif }),
            Err(e) => {
                debug!("No usable EXIF: {}", e);
                None
            }
        }
    }

    /// The Orientation tag, 1 (upright) when absent or out of range
    pub fn orientation(&self) -> u32 {
        self.exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .filter(|o| (1..=8).contains(o))
            .unwrap_or(1)
    }

    /// Rotate and flip `image` so it displays as the camera intended
    pub fn upright(&self, image: DynamicImage) -> DynamicImage {
        apply_orientation(image, self.orientation())
    }

    /// Serialise the primary tags as a TIFF block with the orientation reset
    ///
    /// Thumbnail tags are left out since the thumbnail itself is not copied.
    pub fn to_tiff(&self) -> Result<Vec<u8>> {
        let upright = Field {
            tag: Tag::Orientation,
            ifd_num: In::PRIMARY,
            value: Value::Short(vec![1]),
        };

        let mut writer = exif::experimental::Writer::new();
        let mut has_orientation = false;
        for field in self.exif.fields() {
            if field.ifd_num != In::PRIMARY || POINTER_TAGS.contains(&field.tag) {
                continue;
            }
            if field.tag == Tag::Orientation {
                has_orientation = true;
                writer.push_field(&upright);
            } else {
                writer.push_field(field);
            }
        }
        if !has_orientation {
            writer.push_field(&upright);
        }

        let mut tiff = Cursor::new(Vec::new());
        writer
            .write(&mut tiff, self.exif.little_endian())
            .map_err(|e| WatermarkError::processing(format!("Couldn't write EXIF: {}", e), None))?;
        Ok(tiff.into_inner())
    }
}

/// Apply an EXIF orientation (1-8) to the pixels
pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Insert a TIFF block as an EXIF segment right after the JPEG's SOI marker.
///
/// Returns `None` if `jpeg` does not start with SOI or the block is too big
/// for one segment.
pub fn embed_in_jpeg(jpeg: &[u8], tiff: &[u8]) -> Option<Vec<u8>> {
    if jpeg.len() < 2 || jpeg[..2] != [0xFF, 0xD8] {
        return None;
    }
    let segment_len = u16::try_from(2 + EXIF_HEADER.len() + tiff.len()).ok()?;

    let mut out = Vec::with_capacity(jpeg.len() + segment_len as usize + 2);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&APP1);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[2..]);
    Some(out)
}
