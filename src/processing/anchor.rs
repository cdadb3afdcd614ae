//! Anchor geometry: how much room the text gets and where its box lands
//!
//! Positions and margins are fractions of the image size. Along each axis the
//! anchor decides which side of the anchor point the text grows into, and so
//! how much of the image is left for it once the margin is taken away.

use tracing::debug;

use crate::config::{Anchor, AxisAnchor, Profile};

/// Largest fraction of the image the text may span along one axis.
///
/// Negative results (the whole box would sit inside the margin) clamp to 0.
pub fn max_ratio(anchor: AxisAnchor, position: f32, margin: f32) -> f32 {
    let ratio = match anchor {
        AxisAnchor::Start => 1.0 - position - margin,
        AxisAnchor::End => position - margin,
        AxisAnchor::Middle => {
            if position > 0.5 {
                2.0 * (1.0 - position - margin)
            } else {
                2.0 * (position - margin)
            }
        }
    };
    ratio.max(0.0)
}

/// Extent `[low, high]` of a box of `length` anchored at `point` along one axis
pub fn span(anchor: AxisAnchor, point: f32, length: f32) -> (f32, f32) {
    match anchor {
        AxisAnchor::Start => (point, point + length),
        AxisAnchor::Middle => (point - length / 2.0, point + length / 2.0),
        AxisAnchor::End => (point - length, point),
    }
}

/// Top-left and bottom-right corners of a `width` x `height` box whose
/// anchor sits on (`anchor_x`, `anchor_y`)
pub fn corners(
    anchor_x: f32,
    anchor_y: f32,
    width: f32,
    height: f32,
    anchor: Anchor,
) -> ((f32, f32), (f32, f32)) {
    let (x0, x1) = span(anchor.horizontal, anchor_x, width);
    let (y0, y1) = span(anchor.vertical, anchor_y, height);
    ((x0, y0), (x1, y1))
}

/// Anchor settings of one profile, resolved once per batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPlacement {
    anchor: Anchor,
    position: [f32; 2],
    width_ratio: f32,
    height_ratio: f32,
    relative_height: f32,
}

impl AnchorPlacement {
    pub fn new(profile: &Profile) -> Self {
        let width_ratio = max_ratio(profile.anchor.horizontal, profile.position[0], profile.margin);
        let height_ratio = max_ratio(profile.anchor.vertical, profile.position[1], profile.margin);

        let mut relative_height = profile.relative_height;
        if relative_height > height_ratio {
            debug!("Relative height limited to {}", height_ratio);
            relative_height = height_ratio;
        }

        Self {
            anchor: profile.anchor,
            position: profile.position,
            width_ratio,
            height_ratio,
            relative_height,
        }
    }

    /// Maximum text width and target text height for an image, in pixels
    pub fn target_dimensions(&self, image_width: u32, image_height: u32) -> (f32, f32) {
        let max_width = image_width as f32 * self.width_ratio;
        let target_height = image_height as f32 * self.relative_height;
        (max_width, target_height)
    }

    /// Anchor point in pixels
    pub fn anchor_point(&self, image_width: u32, image_height: u32) -> (f32, f32) {
        (
            image_width as f32 * self.position[0],
            image_height as f32 * self.position[1],
        )
    }

    /// Top-left pixel of a `width` x `height` watermark on this image
    pub fn origin(&self, image_width: u32, image_height: u32, width: u32, height: u32) -> (i64, i64) {
        let (ax, ay) = self.anchor_point(image_width, image_height);
        let ((x0, y0), _) = corners(ax, ay, width as f32, height as f32, self.anchor);
        (x0.round() as i64, y0.round() as i64)
    }

    pub fn width_ratio(&self) -> f32 {
        self.width_ratio
    }

    pub fn height_ratio(&self) -> f32 {
        self.height_ratio
    }

    pub fn relative_height(&self) -> f32 {
        self.relative_height
    }
}
