//! Font lookup, text measurement and font-size fitting

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ab_glyph::{point, Font, FontVec, OutlinedGlyph, PxScale, Rect, ScaleFont};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::DEFAULT_FONT;
use crate::error::{Result, WatermarkError};

/// Upper bound for the size search
pub const MAX_FONT_SIZE: u32 = 4096;

/// Extra font folders, separated like `PATH`
pub const FONT_DIRS_ENV: &str = "WATERMARKER_FONT_DIRS";

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];

/// Built-in copy of the default font (DejaVu Sans, see `assets/fonts/LICENSE-DejaVu.txt`)
const EMBEDDED_FONT_DATA: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Folders searched for bare font file names
pub fn font_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = env::var_os(FONT_DIRS_ENV)
        .map(|v| env::split_paths(&v).collect())
        .unwrap_or_default();

    if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.join(".local/share/fonts"));
        dirs.push(home.join(".fonts"));
        dirs.push(home.join("Library/Fonts"));
    }
    if let Some(windir) = env::var_os("WINDIR").map(PathBuf::from) {
        dirs.push(windir.join("Fonts"));
    }
    if let Some(local) = env::var_os("LOCALAPPDATA").map(PathBuf::from) {
        dirs.push(local.join("Microsoft").join("Windows").join("Fonts"));
    }

    dirs.extend(
        [
            "/usr/share/fonts",
            "/usr/local/share/fonts",
            "/Library/Fonts",
            "/System/Library/Fonts",
        ]
        .iter()
        .map(PathBuf::from),
    );
    dirs
}

/// Find a font on disk.
///
/// An existing path is used as given. Otherwise the file name is looked up,
/// case-insensitively, in [`font_dirs`]; names without an extension also match
/// `.ttf`, `.otf` and `.ttc` files.
pub fn resolve_font(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let not_found = || WatermarkError::FontNotFound {
        font: name.to_string(),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(not_found)?;

    let mut candidates = vec![file_name.to_string()];
    if path.extension().is_none() {
        candidates.extend(FONT_EXTENSIONS.iter().map(|ext| format!("{}.{}", file_name, ext)));
    }

    for dir in font_dirs().iter().filter(|d| d.is_dir()) {
        let found = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                let entry_name = entry.file_name().to_string_lossy();
                candidates.iter().any(|c| c.eq_ignore_ascii_case(&entry_name))
            });

        if let Some(entry) = found {
            debug!("Resolved font '{}' to {:?}", name, entry.path());
            return Ok(entry.into_path());
        }
    }

    Err(not_found())
}

/// Resolve and parse a font.
///
/// The default font falls back to the built-in copy when it is not installed.
pub fn load_font(name: &str) -> Result<FontVec> {
    let path = match resolve_font(name) {
        Ok(path) => path,
        Err(e) => return fallback_font(name, e),
    };
    let data = std::fs::read(&path)
        .map_err(|e| WatermarkError::font(name, format!("{} ({:?})", e, path)))?;
    let font = FontVec::try_from_vec(data)
        .map_err(|e| WatermarkError::font(name, format!("{} ({:?})", e, path)))?;
    info!("Loaded font {:?}", path);
    Ok(font)
}

/// The font compiled into the binary
pub fn embedded_font() -> Result<FontVec> {
    FontVec::try_from_vec(EMBEDDED_FONT_DATA.to_vec())
        .map_err(|e| WatermarkError::font(DEFAULT_FONT, format!("built-in copy: {}", e)))
}

fn fallback_font(name: &str, err: WatermarkError) -> Result<FontVec> {
    match err {
        WatermarkError::FontNotFound { .. } if name.eq_ignore_ascii_case(DEFAULT_FONT) => {
            info!("Font '{}' is not installed, using the built-in copy", name);
            embedded_font()
        }
        other => Err(other),
    }
}

/// Glyph outlines for a piece of text at one size
pub struct TextLayout {
    pub glyphs: Vec<OutlinedGlyph>,
    /// Union of the glyph pixel bounds; `None` when nothing is drawn
    pub bounds: Option<Rect>,
}

impl TextLayout {
    /// Ink width and height in pixels
    pub fn ink_size(&self) -> (f32, f32) {
        self.bounds
            .map(|b| (b.width(), b.height()))
            .unwrap_or((0.0, 0.0))
    }
}

/// Lay out `text` at `size` with kerning, one line per `\n`
pub fn layout_text<F: Font>(font: &F, text: &str, size: u32) -> TextLayout {
    let scale = font
        .pt_to_px_scale(size as f32)
        .unwrap_or_else(|| PxScale::from(size as f32));
    let scaled = font.as_scaled(scale);
    let line_height = scaled.height() + scaled.line_gap();

    let mut glyphs = Vec::with_capacity(text.len());
    let mut bounds: Option<Rect> = None;
    let mut caret = point(0.0, scaled.ascent());
    let mut previous = None;

    for c in text.chars() {
        if c == '\n' {
            caret.x = 0.0;
            caret.y += line_height;
            previous = None;
            continue;
        }
        if c.is_control() {
            continue;
        }

        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            caret.x += scaled.kern(prev, id);
        }

        let glyph = id.with_scale_and_position(scale, caret);
        caret.x += scaled.h_advance(id);
        previous = Some(id);

        if let Some(outlined) = font.outline_glyph(glyph) {
            let b = outlined.px_bounds();
            bounds = Some(match bounds {
                None => b,
                Some(acc) => Rect {
                    min: point(acc.min.x.min(b.min.x), acc.min.y.min(b.min.y)),
                    max: point(acc.max.x.max(b.max.x), acc.max.y.max(b.max.y)),
                },
            });
            glyphs.push(outlined);
        }
    }

    TextLayout { glyphs, bounds }
}

/// Outline width for a font size.
///
/// A zero relative width disables the outline; anything else gets at least one pixel.
pub fn stroke_width(relative_stroke_width: f32, size: u32) -> u32 {
    if relative_stroke_width <= 0.0 {
        return 0;
    }
    ((relative_stroke_width * size as f32) as u32).max(1)
}

/// A font size chosen for one image, with the box it produces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedFont {
    pub size: u32,
    pub stroke: u32,
    /// Box width including the outline
    pub width: f32,
    /// Box height including the outline
    pub height: f32,
}

#[derive(Debug, Default, Clone, Copy)]
struct SizeCache {
    max_size: u32,
    max_height: f32,
}

/// Picks font sizes so the watermark fills its target box.
///
/// Remembers the largest size found so far and the height that produced it,
/// and starts the next search from a linear interpolation of that pair. For a
/// batch of similar images the search then takes a step or two.
pub struct FontSizer {
    font: Arc<FontVec>,
    text: String,
    relative_stroke_width: f32,
    cache: Mutex<SizeCache>,
}

impl FontSizer {
    pub fn new(font: Arc<FontVec>, text: impl Into<String>, relative_stroke_width: f32) -> Self {
        Self {
            font,
            text: text.into(),
            relative_stroke_width,
            cache: Mutex::new(SizeCache::default()),
        }
    }

    pub fn font(&self) -> &FontVec {
        &self.font
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Glyph outlines at `size`
    pub fn layout(&self, size: u32) -> TextLayout {
        layout_text(self.font.as_ref(), &self.text, size)
    }

    /// Box size at `size`, outline included
    pub fn measure(&self, size: u32) -> FittedFont {
        let stroke = stroke_width(self.relative_stroke_width, size);
        let (ink_width, ink_height) = self.layout(size).ink_size();
        FittedFont {
            size,
            stroke,
            width: ink_width + 2.0 * stroke as f32,
            height: ink_height + 2.0 * stroke as f32,
        }
    }

    fn initial_size(&self, target_height: f32) -> u32 {
        let cache = *self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.max_size == 0 || cache.max_height <= 0.0 {
            return 1;
        }
        let size = (target_height * cache.max_size as f32 / cache.max_height) as u32;
        size.clamp(1, MAX_FONT_SIZE)
    }

    fn update_cache(&self, size: u32, target_height: f32) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.max_size < size {
            cache.max_size = size;
            cache.max_height = target_height;
        }
    }

    /// Largest size whose box fits within `max_width` x `target_height`
    pub fn fit(&self, target_height: f32, max_width: f32) -> Result<FittedFont> {
        let exceeds = |m: &FittedFont| m.height > target_height || m.width > max_width;

        let mut size = self.initial_size(target_height);
        debug!("Initial font size: {}", size);
        let mut measured = self.measure(size);

        if !exceeds(&measured) {
            // Fits, grow while the next size still fits
            while size < MAX_FONT_SIZE {
                let next = self.measure(size + 1);
                if exceeds(&next) {
                    break;
                }
                size += 1;
                measured = next;
            }
        } else {
            // Bigger than allowed, shrink
            while size > 0 && exceeds(&measured) {
                size -= 1;
                if size > 0 {
                    measured = self.measure(size);
                }
            }
        }

        if size == 0 {
            return Err(WatermarkError::NoFittingSize {
                max_width,
                target_height,
            });
        }

        self.update_cache(size, target_height);
        debug!(
            "Final font size: {} ({:.1}x{:.1} px, stroke {})",
            size, measured.width, measured.height, measured.stroke
        );
        Ok(measured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sizer(text: &str, stroke: f32) -> FontSizer {
        FontSizer::new(Arc::new(embedded_font().unwrap()), text, stroke)
    }

    #[test]
    fn test_stroke_width() {
        assert_eq!(stroke_width(0.0, 100), 0);
        assert_eq!(stroke_width(0.05, 10), 1);
        assert_eq!(stroke_width(0.05, 100), 5);
    }

    #[test]
    fn test_missing_font() {
        let err = resolve_font("definitely-not-a-font-4242.ttf").unwrap_err();
        assert!(matches!(err, WatermarkError::FontNotFound { .. }));
    }

    #[test]
    fn test_existing_path_is_used_as_is() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake.ttf");
        std::fs::write(&path, b"not really a font").unwrap();

        assert_eq!(resolve_font(path.to_str().unwrap()).unwrap(), path);
        let err = load_font(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, WatermarkError::FontError { .. }));
    }

    #[test]
    fn test_default_font_falls_back_to_embedded() {
        let not_found = |font: &str| WatermarkError::FontNotFound { font: font.into() };

        let font = fallback_font("dejavusans.TTF", not_found("dejavusans.TTF")).unwrap();
        assert!(font.glyph_id('W').0 != 0);

        let err = fallback_font("Other.ttf", not_found("Other.ttf")).unwrap_err();
        assert!(matches!(err, WatermarkError::FontNotFound { .. }));

        // Only a missing default font falls back, a broken one is reported
        let err = fallback_font(DEFAULT_FONT, WatermarkError::font(DEFAULT_FONT, "bad")).unwrap_err();
        assert!(matches!(err, WatermarkError::FontError { .. }));

        assert!(load_font(DEFAULT_FONT).is_ok());
    }

    #[test]
    fn test_measure_grows_with_size() {
        let sizer = sizer("Hello", 0.05);
        let small = sizer.measure(12);
        let large = sizer.measure(48);
        assert!(large.width > small.width);
        assert!(large.height > small.height);
        assert_eq!(large.stroke, 2);
    }

    #[test]
    fn test_fit_respects_limits() {
        let sizer = sizer("@Watermark", 0.05);
        let fitted = sizer.fit(40.0, 1000.0).unwrap();
        assert!(fitted.height <= 40.0);
        assert!(fitted.width <= 1000.0);

        // One size up no longer fits
        let next = sizer.measure(fitted.size + 1);
        assert!(next.height > 40.0 || next.width > 1000.0);
    }

    #[test]
    fn test_fit_keeps_a_size_that_exactly_fills_the_box() {
        let sizer = sizer("@Watermark", 0.05);
        let target = sizer.measure(24);

        let fitted = sizer.fit(target.height, 10_000.0).unwrap();
        assert!(fitted.size >= 24, "stepped back to {}", fitted.size);
        assert_eq!(fitted.height, target.height);
        assert!(sizer.measure(fitted.size + 1).height > target.height);
    }

    #[test]
    fn test_fit_width_bound() {
        let sizer = sizer("A much longer watermark text", 0.0);
        let fitted = sizer.fit(500.0, 120.0).unwrap();
        assert!(fitted.width <= 120.0);
        assert!(fitted.height < 500.0);
    }

    #[test]
    fn test_fit_uses_cache_from_previous_image() {
        let sizer = sizer("cached", 0.05);
        let first = sizer.fit(30.0, 2000.0).unwrap();
        assert!(sizer.initial_size(30.0) == first.size);

        // A shrink from the cached start reaches the same answer as a cold search
        let small = sizer.fit(15.0, 2000.0).unwrap();
        let cold = self::sizer("cached", 0.05).fit(15.0, 2000.0).unwrap();
        assert_eq!(small.size, cold.size);
    }

    #[test]
    fn test_fit_fails_without_room() {
        let sizer = sizer("@Watermark", 0.05);
        let err = sizer.fit(10.0, 0.0).unwrap_err();
        assert!(matches!(err, WatermarkError::NoFittingSize { .. }));
    }

    #[test]
    fn test_layout_multiline_is_taller() {
        let sizer = sizer("one", 0.0);
        let single = sizer.layout(20).ink_size();
        let multi = layout_text(sizer.font(), "one\ntwo", 20).ink_size();
        assert!(multi.1 > single.1);
    }
}
