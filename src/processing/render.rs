//! Text layer rendering and compositing
//!
//! The watermark is drawn into its own RGBA layer the size of the text box:
//! a white fill, a black outline grown from the fill mask, both at the profile
//! opacity. The layer is then alpha-composited onto the image.

use image::{ColorType, DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::euclidean_squared_distance_transform;

use super::fonts::{FittedFont, TextLayout};

pub const FILL_LEVEL: u8 = 255;
pub const STROKE_LEVEL: u8 = 0;

/// Coverage mask of the glyphs, offset so the ink starts `stroke` pixels in
pub fn glyph_mask(layout: &TextLayout, fitted: &FittedFont) -> GrayImage {
    let width = (fitted.width.ceil() as u32).max(1);
    let height = (fitted.height.ceil() as u32).max(1);
    let mut mask = GrayImage::new(width, height);

    let Some(bounds) = layout.bounds else {
        return mask;
    };
    let offset_x = fitted.stroke as f32 - bounds.min.x;
    let offset_y = fitted.stroke as f32 - bounds.min.y;

    for glyph in &layout.glyphs {
        let glyph_bounds = glyph.px_bounds();
        let left = (glyph_bounds.min.x + offset_x).round() as i64;
        let top = (glyph_bounds.min.y + offset_y).round() as i64;

        glyph.draw(|x, y, coverage| {
            let px = left + x as i64;
            let py = top + y as i64;
            if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                return;
            }
            let value = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
            let pixel = mask.get_pixel_mut(px as u32, py as u32);
            // Overlapping glyphs keep the stronger coverage
            if value > pixel[0] {
                *pixel = Luma([value]);
            }
        });
    }

    mask
}

/// Coverage of a round outline `stroke` pixels wide around the mask.
///
/// Pixels within `stroke` of the glyph edge are covered, with a one pixel
/// anti-aliased rim.
pub fn outline_mask(fill: &GrayImage, stroke: u32) -> GrayImage {
    let inside = GrayImage::from_fn(fill.width(), fill.height(), |x, y| {
        Luma([if fill.get_pixel(x, y)[0] >= 128 { 255 } else { 0 }])
    });
    let distances = euclidean_squared_distance_transform(&inside);
    let reach = stroke as f64 + 0.5;

    GrayImage::from_fn(fill.width(), fill.height(), |x, y| {
        let distance = distances.get_pixel(x, y)[0].sqrt();
        let coverage = (reach - distance).clamp(0.0, 1.0);
        Luma([(coverage * 255.0).round() as u8])
    })
}

/// Render the watermark box for `layout` at the fitted size
pub fn render_layer(layout: &TextLayout, fitted: &FittedFont, opacity: u8) -> RgbaImage {
    let fill = glyph_mask(layout, fitted);
    let outline = (fitted.stroke > 0).then(|| outline_mask(&fill, fitted.stroke));

    let mut layer = RgbaImage::new(fill.width(), fill.height());
    for (x, y, pixel) in layer.enumerate_pixels_mut() {
        let fill_coverage = fill.get_pixel(x, y)[0];
        let outline_coverage = outline.as_ref().map_or(0, |o| o.get_pixel(x, y)[0]);
        let coverage = fill_coverage.max(outline_coverage);
        if coverage == 0 {
            continue;
        }

        // Outline blends into fill along anti-aliased glyph edges
        let level = if outline.is_some() {
            let t = fill_coverage as u16;
            ((FILL_LEVEL as u16 * t + STROKE_LEVEL as u16 * (255 - t)) / 255) as u8
        } else {
            FILL_LEVEL
        };
        let alpha = (opacity as u16 * coverage as u16 / 255) as u8;
        *pixel = Rgba([level, level, level, alpha]);
    }

    layer
}

/// Composite `layer` onto `image` with its top-left corner at `origin`.
///
/// The result keeps the source colour type. 16-bit and float sources are
/// blended at their own precision.
pub fn composite(image: &DynamicImage, layer: &RgbaImage, origin: (i64, i64)) -> DynamicImage {
    let original = image.color();
    let (x, y) = origin;

    let marked = match original {
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            let mut base = image.to_rgba16();
            let layer = DynamicImage::ImageRgba8(layer.clone()).into_rgba16();
            image::imageops::overlay(&mut base, &layer, x, y);
            DynamicImage::ImageRgba16(base)
        }
        ColorType::Rgb32F | ColorType::Rgba32F => {
            let mut base = image.to_rgba32f();
            let layer = DynamicImage::ImageRgba8(layer.clone()).into_rgba32f();
            image::imageops::overlay(&mut base, &layer, x, y);
            DynamicImage::ImageRgba32F(base)
        }
        _ => {
            let mut base = image.to_rgba8();
            image::imageops::overlay(&mut base, layer, x, y);
            DynamicImage::ImageRgba8(base)
        }
    };
    restore_color(marked, original)
}

/// Convert a marked RGBA image back to the colour type of its source
pub fn restore_color(marked: DynamicImage, original: ColorType) -> DynamicImage {
    if marked.color() == original {
        return marked;
    }
    match original {
        ColorType::L8 => DynamicImage::ImageLuma8(marked.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(marked.to_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(marked.to_rgb8()),
        ColorType::Rgba8 => DynamicImage::ImageRgba8(marked.to_rgba8()),
        ColorType::L16 => DynamicImage::ImageLuma16(marked.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(marked.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(marked.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(marked.to_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(marked.to_rgb32f()),
        ColorType::Rgba32F => DynamicImage::ImageRgba32F(marked.to_rgba32f()),
        _ => marked,
    }
}
