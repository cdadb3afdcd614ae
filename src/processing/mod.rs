//! Core watermarking: load an image, draw the profile's text, save it

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::Profile;
use crate::error::{ErrorContext, Result, WatermarkError};

pub mod anchor;
pub mod fonts;
pub mod formats;
pub mod metadata;
pub mod render;

pub use anchor::{corners, max_ratio, AnchorPlacement};
pub use fonts::{embedded_font, load_font, resolve_font, FittedFont, FontSizer};
pub use formats::sniff_file;
pub use metadata::ExifData;

/// JPEG quality used when none is given
pub const DEFAULT_QUALITY: u8 = 90;

/// Applies one profile's watermark to images.
///
/// Cheap to clone; clones share the font and the size cache.
#[derive(Clone)]
pub struct WatermarkEngine {
    profile: Arc<Profile>,
    sizer: Arc<FontSizer>,
    placement: AnchorPlacement,
    quality: u8,
}

impl WatermarkEngine {
    /// Validate the profile and load its font
    pub fn new(profile: Profile) -> Result<Self> {
        profile.validate()?;
        let font = load_font(&profile.font)?;
        let sizer = FontSizer::new(Arc::new(font), &profile.text, profile.relative_stroke_width);
        let placement = AnchorPlacement::new(&profile);

        Ok(Self {
            profile: Arc::new(profile),
            sizer: Arc::new(sizer),
            placement,
            quality: DEFAULT_QUALITY,
        })
    }

    /// Set the JPEG quality (1-100)
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Draw the watermark on an in-memory image
    pub fn mark_image(&self, image: &DynamicImage) -> Result<DynamicImage> {
        let (width, height) = (image.width(), image.height());
        let (max_width, target_height) = self.placement.target_dimensions(width, height);

        let fitted = self.sizer.fit(target_height, max_width)?;
        let layer = render::render_layer(&self.sizer.layout(fitted.size), &fitted, self.profile.opacity);
        let origin = self.placement.origin(width, height, layer.width(), layer.height());

        debug!(
            "max width: {:.1}/{}, target height: {:.1}/{}, anchor: {}, position: {:?}, margin: {}, origin: {:?}",
            max_width,
            width,
            target_height,
            height,
            self.profile.anchor,
            self.profile.position,
            self.profile.margin,
            origin
        );

        Ok(render::composite(image, &layer, origin))
    }

    /// Where `input` ends up inside `output_dir`, and the format to write.
    ///
    /// `format` is the input's real format, whatever its extension says. The
    /// file name is kept; formats we can't encode are written as PNG under a
    /// `.png` name.
    pub fn output_target(
        input: &Path,
        output_dir: &Path,
        format: ImageFormat,
    ) -> Result<(PathBuf, ImageFormat)> {
        let file_name = input.file_name().ok_or_else(|| {
            WatermarkError::processing("Invalid input filename", Some(input.to_path_buf()))
        })?;

        let mut output = output_dir.join(file_name);
        if formats::can_write(format) {
            return Ok((output, format));
        }
        output.set_extension("png");
        Ok((output, ImageFormat::Png))
    }

    /// Watermark one file into `output_dir`, keeping its file name
    pub async fn mark_file(
        &self,
        input: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
    ) -> Result<MarkResult> {
        let start_time = Instant::now();
        let input = input.as_ref().to_path_buf();
        let output_dir = output_dir.as_ref();

        let format = formats::sniff_file(&input)?;

        let (output, output_format) = Self::output_target(&input, output_dir, format)?;
        if same_file(&input, &output).await {
            return Err(WatermarkError::processing(
                "Output would overwrite the input, choose another output folder",
                Some(input),
            ));
        }

        fs::create_dir_all(output_dir)
            .await
            .with_file_context(output_dir.to_path_buf())?;

        debug!("Marking {:?} ({:?}) -> {:?}", input, format, output);

        let engine = self.clone();
        let (width, height) = tokio::task::spawn_blocking({
            let input = input.clone();
            let output = output.clone();
            move || -> Result<(u32, u32)> {
                let bytes = std::fs::read(&input).with_file_context(input.clone())?;
                let image = image::load_from_memory_with_format(&bytes, format)
                    .with_file_context(input.clone())?;
                let exif = ExifData::read(&bytes);
                let image = match &exif {
                    Some(exif) => exif.upright(image),
                    None => image,
                };

                let marked = engine.mark_image(&image).with_file_context(input.clone())?;
                engine.save(&marked, &output, output_format, exif.as_ref())?;
                Ok((marked.width(), marked.height()))
            }
        })
        .await
        .map_err(|e| WatermarkError::system(format!("Task join error: {}", e)))??;

        Ok(MarkResult {
            input_path: input,
            output_path: output,
            width,
            height,
            processing_time: start_time.elapsed(),
        })
    }

    /// Encode `image` to `output`; JPEG copies get the source's EXIF
    fn save(
        &self,
        image: &DynamicImage,
        output: &Path,
        format: ImageFormat,
        exif: Option<&ExifData>,
    ) -> Result<()> {
        let flattened;
        let image = if image.color().has_alpha() && !formats::supports_alpha(format) {
            flattened = DynamicImage::ImageRgb8(image.to_rgb8());
            &flattened
        } else {
            image
        };

        match format {
            ImageFormat::Jpeg => {
                let mut encoded = Vec::new();
                image
                    .write_to(&mut Cursor::new(&mut encoded), ImageOutputFormat::Jpeg(self.quality))
                    .with_file_context(output.to_path_buf())?;
                if let Some(exif) = exif {
                    encoded = attach_exif(encoded, exif, output);
                }
                std::fs::write(output, encoded).with_file_context(output.to_path_buf())?;
            }
            _ => {
                if exif.is_some() {
                    debug!("EXIF is only copied to JPEG output, not to {:?}", output);
                }
                image
                    .save_with_format(output, format)
                    .with_file_context(output.to_path_buf())?;
            }
        }

        debug!("Saved {:?} as {:?}", output, format);
        Ok(())
    }
}

/// Add the EXIF block to an encoded JPEG, or leave it untagged if that fails
fn attach_exif(jpeg: Vec<u8>, exif: &ExifData, output: &Path) -> Vec<u8> {
    match exif.to_tiff() {
        Ok(tiff) => match metadata::embed_in_jpeg(&jpeg, &tiff) {
            Some(tagged) => tagged,
            None => {
                warn!("EXIF too large to copy to {:?}", output);
                jpeg
            }
        },
        Err(e) => {
            warn!("{}, {:?} is saved without it", e, output);
            jpeg
        }
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Outcome of marking one file
#[derive(Debug, Clone)]
pub struct MarkResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub processing_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::metadata::tests::{copyright, tagged_jpeg};
    use image::{GrayImage, Rgb, RgbImage, RgbaImage};
    use tempfile::tempdir;

    fn engine() -> WatermarkEngine {
        let mut profile = Profile::default();
        profile.relative_height = 0.1;
        WatermarkEngine::new(profile).unwrap()
    }

    fn changed_region(before: &RgbImage, after: &RgbImage) -> Option<(u32, u32, u32, u32)> {
        let mut region: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in after.enumerate_pixels() {
            if p != before.get_pixel(x, y) {
                region = Some(match region {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        region
    }

    #[test]
    fn test_output_target() {
        let out = Path::new("/tmp/out");
        assert_eq!(
            WatermarkEngine::output_target(Path::new("in/a.jpg"), out, ImageFormat::Jpeg).unwrap(),
            (out.join("a.jpg"), ImageFormat::Jpeg)
        );
        assert_eq!(
            WatermarkEngine::output_target(Path::new("in/b.webp"), out, ImageFormat::WebP).unwrap(),
            (out.join("b.png"), ImageFormat::Png)
        );
        // The content decides the encoding, the name is kept
        assert_eq!(
            WatermarkEngine::output_target(Path::new("in/c.jpg"), out, ImageFormat::Png).unwrap(),
            (out.join("c.jpg"), ImageFormat::Png)
        );
        assert_eq!(
            WatermarkEngine::output_target(Path::new("in/IMG_0001"), out, ImageFormat::Jpeg).unwrap(),
            (out.join("IMG_0001"), ImageFormat::Jpeg)
        );
    }

    #[test]
    fn test_engine_rejects_invalid_profile() {
        let err = WatermarkEngine::new(Profile::default().margin(0.9)).err().unwrap();
        assert!(matches!(err, WatermarkError::InvalidProfile { .. }));
    }

    #[test]
    fn test_engine_rejects_missing_font() {
        let err = WatermarkEngine::new(Profile::default().font("no-such-font-123.ttf"))
            .err()
            .unwrap();
        assert!(matches!(err, WatermarkError::FontNotFound { .. }));
    }

    #[test]
    fn test_mark_image_bottom_right() {
        let engine = engine();
        let image = RgbImage::from_pixel(400, 200, Rgb([40, 90, 160]));
        let marked = engine
            .mark_image(&DynamicImage::ImageRgb8(image.clone()))
            .unwrap();

        assert_eq!(marked.color(), image::ColorType::Rgb8);
        let (x0, y0, x1, y1) = changed_region(&image, &marked.to_rgb8()).unwrap();
        // Text hugs the bottom-right corner and respects the target height
        assert!(x1 >= 390 && y1 >= 190, "region ends at {},{}", x1, y1);
        assert!(x0 > 200);
        assert!(y1 - y0 < 22);
    }

    #[test]
    fn test_mark_image_top_left_with_margin() {
        let mut profile = Profile::default()
            .margin(0.1)
            .anchored("lt".parse().unwrap(), [0.1, 0.1]);
        profile.relative_height = 0.1;
        let engine = WatermarkEngine::new(profile).unwrap();

        let image = RgbImage::from_pixel(300, 300, Rgb([128, 128, 128]));
        let marked = engine
            .mark_image(&DynamicImage::ImageRgb8(image.clone()))
            .unwrap();
        let (x0, y0, x1, _) = changed_region(&image, &marked.to_rgb8()).unwrap();
        assert!((30..=34).contains(&x0), "x0 = {}", x0);
        assert!((30..=34).contains(&y0), "y0 = {}", y0);
        // Room is 1 - 0.1 - 0.1 of the width
        assert!(x1 <= 270);
    }

    #[test]
    fn test_mark_image_keeps_grayscale_and_alpha() {
        let engine = engine();
        let gray = DynamicImage::ImageLuma8(GrayImage::new(200, 200));
        assert_eq!(engine.mark_image(&gray).unwrap().color(), image::ColorType::L8);

        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(200, 200));
        assert_eq!(engine.mark_image(&rgba).unwrap().color(), image::ColorType::Rgba8);
    }

    #[tokio::test]
    async fn test_mark_file_writes_output() {
        let engine = engine();
        let dir = tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([200, 10, 10])))
            .save(&input)
            .unwrap();
        let out_dir = dir.path().join("Watermarked");

        let result = engine.mark_file(&input, &out_dir).await.unwrap();
        assert_eq!(result.output_path, out_dir.join("photo.jpg"));
        assert_eq!((result.width, result.height), (320, 240));

        let written = image::open(&result.output_path).unwrap();
        assert_eq!((written.width(), written.height()), (320, 240));
    }

    #[tokio::test]
    async fn test_mark_file_refuses_to_overwrite_input() {
        let engine = engine();
        let dir = tempdir().unwrap();
        let input = dir.path().join("photo.png");
        DynamicImage::ImageRgb8(RgbImage::new(64, 64)).save(&input).unwrap();

        let err = engine
            .mark_file(input.as_path(), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("overwrite"));
    }

    #[tokio::test]
    async fn test_mark_file_not_an_image() {
        let engine = engine();
        let dir = tempdir().unwrap();
        let input = dir.path().join("readme.txt");
        std::fs::write(&input, "just text").unwrap();

        let err = engine
            .mark_file(input, dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, WatermarkError::NotAnImage { .. }));
    }

    #[tokio::test]
    async fn test_mark_file_trusts_content_over_extension() {
        let engine = engine();
        let dir = tempdir().unwrap();
        let png = dir.path().join("source.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([10, 120, 10])))
            .save(&png)
            .unwrap();
        let misnamed = dir.path().join("photo.jpg");
        let bare = dir.path().join("IMG_0001");
        std::fs::copy(&png, &misnamed).unwrap();
        std::fs::copy(&png, &bare).unwrap();
        let out_dir = dir.path().join("out");

        for input in [misnamed, bare] {
            let result = engine.mark_file(&input, &out_dir).await.unwrap();
            assert_eq!(result.output_path, out_dir.join(input.file_name().unwrap()));
            assert_eq!(sniff_file(&result.output_path).unwrap(), ImageFormat::Png);

            let bytes = std::fs::read(&result.output_path).unwrap();
            let written = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
            assert_eq!((written.width(), written.height()), (320, 240));
        }
    }

    #[tokio::test]
    async fn test_mark_file_applies_exif_orientation() {
        let engine = engine();
        let dir = tempdir().unwrap();
        let input = dir.path().join("phone.jpg");
        // Stored landscape, displayed portrait
        std::fs::write(&input, tagged_jpeg(300, 150, 6)).unwrap();
        let out_dir = dir.path().join("out");

        let result = engine.mark_file(&input, &out_dir).await.unwrap();
        assert_eq!((result.width, result.height), (150, 300));

        let bytes = std::fs::read(&result.output_path).unwrap();
        let written = image::load_from_memory(&bytes).unwrap();
        assert_eq!((written.width(), written.height()), (150, 300));

        let exif = ExifData::read(&bytes).unwrap();
        assert_eq!(exif.orientation(), 1);
        assert_eq!(copyright(&bytes).unwrap(), b"Studio North");
    }

    #[tokio::test]
    async fn test_mark_file_png_from_tagged_jpeg_is_upright() {
        let engine = engine();
        let dir = tempdir().unwrap();
        let jpeg = tagged_jpeg(300, 150, 8);
        let image = image::load_from_memory(&jpeg).unwrap();
        let exif = ExifData::read(&jpeg).unwrap();
        let upright = exif.upright(image);
        assert_eq!((upright.width(), upright.height()), (150, 300));

        let marked = engine.mark_image(&upright).unwrap();
        let output = dir.path().join("upright.png");
        engine.save(&marked, &output, ImageFormat::Png, Some(&exif)).unwrap();
        assert_eq!(image::open(&output).unwrap().width(), 150);
    }
}
