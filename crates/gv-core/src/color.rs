//! Color and material-parameter values.

use serde::{Deserialize, Serialize};

/// RGB color plus roughness, metalness and opacity, all normalized to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRgbRmo {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
}

impl ColorRgbRmo {
    pub const fn new(r: f32, g: f32, b: f32, roughness: f32, metalness: f32, opacity: f32) -> Self {
        Self {
            r,
            g,
            b,
            roughness,
            metalness,
            opacity,
        }
    }

    /// Replaces the RGB channels, keeping roughness, metalness and opacity.
    pub fn with_rgb(self, rgb: [f32; 3]) -> Self {
        Self {
            r: rgb[0],
            g: rgb[1],
            b: rgb[2],
            ..self
        }
    }

    pub fn rgb(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    /// True when the color is fully opaque.
    pub fn is_opaque(&self) -> bool {
        self.opacity >= 1.0
    }

    /// Packed RGB bytes, padded to four bytes for vertex upload.
    pub fn rgb_bytes(&self) -> [u8; 4] {
        [to_byte(self.r), to_byte(self.g), to_byte(self.b), u8::MAX]
    }

    /// Packed roughness, metalness and opacity bytes, padded to four bytes.
    pub fn rmo_bytes(&self) -> [u8; 4] {
        [
            to_byte(self.roughness),
            to_byte(self.metalness),
            to_byte(self.opacity),
            0,
        ]
    }

    /// Dedupe key `r|g|b|roughness|metalness|opacity`.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.r, self.g, self.b, self.roughness, self.metalness, self.opacity
        )
    }
}

impl Default for ColorRgbRmo {
    fn default() -> Self {
        Self::new(0.8, 0.8, 0.8, 1.0, 0.0, 1.0)
    }
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_packing() {
        let c = ColorRgbRmo::new(1.0, 0.0, 0.5, 0.25, 2.0, -1.0);
        assert_eq!(c.rgb_bytes(), [255, 0, 128, 255]);
        assert_eq!(c.rmo_bytes(), [64, 255, 0, 0]);
    }

    #[test]
    fn test_cache_key() {
        let c = ColorRgbRmo::new(1.0, 0.5, 0.0, 1.0, 0.0, 0.25);
        assert_eq!(c.cache_key(), "1|0.5|0|1|0|0.25");
    }

    #[test]
    fn test_with_rgb_keeps_rmo() {
        let c = ColorRgbRmo::new(0.1, 0.2, 0.3, 0.4, 0.5, 0.6).with_rgb([1.0, 0.0, 0.0]);
        assert_eq!(c, ColorRgbRmo::new(1.0, 0.0, 0.0, 0.4, 0.5, 0.6));
    }
}
