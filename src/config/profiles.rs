//! Watermark profiles: named parameter sets and the flags layered over them

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatermarkError};
use crate::processing::anchor::max_ratio;

pub const DEFAULT_NAME: &str = "Default";
pub const DEFAULT_TEXT: &str = "@Watermark";
pub const DEFAULT_FONT: &str = "DejaVuSans.ttf";
pub const DEFAULT_MARGIN: f32 = 0.0;
pub const DEFAULT_RELATIVE_HEIGHT: f32 = 0.02;
pub const DEFAULT_RELATIVE_STROKE_WIDTH: f32 = 0.05;
pub const DEFAULT_OPACITY: u8 = 128;
pub const DEFAULT_POSITION: [f32; 2] = [1.0, 1.0];
pub const DEFAULT_OUTPUT_DIR: &str = "Watermarked";

/// A watermark profile: everything needed to mark a batch of images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique key in the store
    pub name: String,

    /// Watermark text
    #[serde(default = "default_text")]
    pub text: String,

    /// Font file path, or a file name looked up in the system font folders
    #[serde(default = "default_font")]
    pub font: String,

    /// Fraction of the image kept clear along the edges (0.0-0.5)
    #[serde(default = "default_margin")]
    pub margin: f32,

    /// Target text height as a fraction of the image height
    #[serde(default = "default_relative_height")]
    pub relative_height: f32,

    /// Outline width as a fraction of the font size
    #[serde(default = "default_relative_stroke_width")]
    pub relative_stroke_width: f32,

    /// Alpha of the text fill and outline
    #[serde(default = "default_opacity")]
    pub opacity: u8,

    /// Which corner/edge of the text box sits on the anchor point
    #[serde(default)]
    pub anchor: Anchor,

    /// Anchor point as a fraction of image width and height
    #[serde(default = "default_position")]
    pub position: [f32; 2],

    /// Destination folder for marked images
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_text() -> String {
    DEFAULT_TEXT.to_string()
}

fn default_font() -> String {
    DEFAULT_FONT.to_string()
}

fn default_margin() -> f32 {
    DEFAULT_MARGIN
}

fn default_relative_height() -> f32 {
    DEFAULT_RELATIVE_HEIGHT
}

fn default_relative_stroke_width() -> f32 {
    DEFAULT_RELATIVE_STROKE_WIDTH
}

fn default_opacity() -> u8 {
    DEFAULT_OPACITY
}

fn default_position() -> [f32; 2] {
    DEFAULT_POSITION
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

impl Default for Profile {
    fn default() -> Self {
        Self::named(DEFAULT_NAME)
    }
}

impl Profile {
    /// Built-in defaults under the given name
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            text: default_text(),
            font: default_font(),
            margin: DEFAULT_MARGIN,
            relative_height: DEFAULT_RELATIVE_HEIGHT,
            relative_stroke_width: DEFAULT_RELATIVE_STROKE_WIDTH,
            opacity: DEFAULT_OPACITY,
            anchor: Anchor::default(),
            position: DEFAULT_POSITION,
            output_dir: default_output_dir(),
        }
    }

    /// Set the watermark text
    pub fn text<S: Into<String>>(mut self, text: S) -> Self {
        self.text = text.into();
        self
    }

    /// Set the font
    pub fn font<S: Into<String>>(mut self, font: S) -> Self {
        self.font = font.into();
        self
    }

    /// Set the margin
    pub fn margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    /// Set the anchor and anchor point
    pub fn anchored(mut self, anchor: Anchor, position: [f32; 2]) -> Self {
        self.anchor = anchor;
        self.position = position;
        self
    }

    /// Set the opacity
    pub fn opacity(mut self, opacity: u8) -> Self {
        self.opacity = opacity;
        self
    }

    /// Set the destination folder
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Validate the profile values
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(WatermarkError::invalid_profile(&self.name, message));

        if self.name.trim().is_empty() {
            return invalid("Profile name cannot be empty".to_string());
        }

        if self.text.trim().is_empty() {
            return invalid("Watermark text cannot be empty".to_string());
        }

        if self.font.trim().is_empty() {
            return invalid("Font cannot be empty".to_string());
        }

        if !(0.0..0.5).contains(&self.margin) {
            return invalid(format!(
                "Margin value should be between 0 and 0.5, got {}",
                self.margin
            ));
        }

        if !self.position.iter().all(|p| (0.0..=1.0).contains(p)) {
            return invalid(format!(
                "Anchor x and y coordinates should be between 0 and 1, got {},{}",
                self.position[0], self.position[1]
            ));
        }

        if self.relative_height <= 0.0 || self.relative_height > 1.0 {
            return invalid(format!(
                "Relative height should be in (0, 1], got {}",
                self.relative_height
            ));
        }

        if !(0.0..=1.0).contains(&self.relative_stroke_width) {
            return invalid(format!(
                "Relative stroke width should be between 0 and 1, got {}",
                self.relative_stroke_width
            ));
        }

        let x_ratio = max_ratio(self.anchor.horizontal, self.position[0], self.margin);
        let y_ratio = max_ratio(self.anchor.vertical, self.position[1], self.margin);
        if x_ratio <= 0.0 || y_ratio <= 0.0 {
            return invalid("Margin hides watermark!".to_string());
        }

        Ok(())
    }
}

/// Anchor behaviour along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisAnchor {
    /// Text starts at the anchor point (left / top)
    Start,
    /// Text is centred on the anchor point
    Middle,
    /// Text ends at the anchor point (right / bottom)
    End,
}

/// Two-letter anchor code: horizontal `l|m|r` then vertical `t|m|b`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Anchor {
    pub horizontal: AxisAnchor,
    pub vertical: AxisAnchor,
}

impl Anchor {
    pub const fn new(horizontal: AxisAnchor, vertical: AxisAnchor) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }
}

impl Default for Anchor {
    fn default() -> Self {
        Self::new(AxisAnchor::End, AxisAnchor::End)
    }
}

impl FromStr for Anchor {
    type Err = WatermarkError;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.trim().chars().map(|c| c.to_ascii_lowercase());
        let (x, y) = match (chars.next(), chars.next(), chars.next()) {
            (Some(x), Some(y), None) => (x, y),
            _ => {
                return Err(WatermarkError::config(format!(
                    "Anchor must be two characters (e.g. 'rb'), got '{}'",
                    s
                )))
            }
        };

        let horizontal = match x {
            'l' => AxisAnchor::Start,
            'm' => AxisAnchor::Middle,
            'r' => AxisAnchor::End,
            other => {
                return Err(WatermarkError::config(format!(
                    "'{}' is not a recognised anchor for the x direction (use l, m or r)",
                    other
                )))
            }
        };
        let vertical = match y {
            't' => AxisAnchor::Start,
            'm' => AxisAnchor::Middle,
            'b' => AxisAnchor::End,
            other => {
                return Err(WatermarkError::config(format!(
                    "'{}' is not a recognised anchor for the y direction (use t, m or b)",
                    other
                )))
            }
        };

        Ok(Self::new(horizontal, vertical))
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self.horizontal {
            AxisAnchor::Start => 'l',
            AxisAnchor::Middle => 'm',
            AxisAnchor::End => 'r',
        };
        let y = match self.vertical {
            AxisAnchor::Start => 't',
            AxisAnchor::Middle => 'm',
            AxisAnchor::End => 'b',
        };
        write!(f, "{}{}", x, y)
    }
}

impl TryFrom<String> for Anchor {
    type Error = WatermarkError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Anchor> for String {
    fn from(anchor: Anchor) -> Self {
        anchor.to_string()
    }
}

/// Per-run values layered over a stored profile.
///
/// `None` keeps the profile value. The profile name is never overridden.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileOverrides {
    pub text: Option<String>,
    pub font: Option<String>,
    pub margin: Option<f32>,
    pub relative_height: Option<f32>,
    pub relative_stroke_width: Option<f32>,
    pub opacity: Option<u8>,
    pub anchor: Option<Anchor>,
    pub position: Option<[f32; 2]>,
    pub output_dir: Option<PathBuf>,
}

impl ProfileOverrides {
    /// True when no value would change
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Write every set value into `profile`
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(text) = &self.text {
            profile.text = text.clone();
        }
        if let Some(font) = &self.font {
            profile.font = font.clone();
        }
        if let Some(margin) = self.margin {
            profile.margin = margin;
        }
        if let Some(height) = self.relative_height {
            profile.relative_height = height;
        }
        if let Some(stroke) = self.relative_stroke_width {
            profile.relative_stroke_width = stroke;
        }
        if let Some(opacity) = self.opacity {
            profile.opacity = opacity;
        }
        if let Some(anchor) = self.anchor {
            profile.anchor = anchor;
        }
        if let Some(position) = self.position {
            profile.position = position;
        }
        if let Some(dir) = &self.output_dir {
            profile.output_dir = dir.clone();
        }
    }

    /// `profile` with the overrides applied
    pub fn merged(&self, mut profile: Profile) -> Profile {
        self.apply(&mut profile);
        profile
    }
}
