//! Face boxes and name labels drawn onto RGB frames.
//!
//! Labels go through Arabic shaping and bidi reordering and are rasterized
//! with a TrueType font. Without a usable font, or when the font lacks a glyph
//! for the label, a plain 8×8 bitmap font draws the label instead.

use crate::shaping;
use ab_glyph::{Font, FontVec, PxScale};
use facewatch_core::BoundingBox;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const FONT_PX: f32 = 24.0;
/// Label sits this far above the top edge of the face box.
const LABEL_OFFSET: i32 = 40;
/// Padding on each side of the label text.
const LABEL_PAD: u32 = 6;
const BOX_THICKNESS: u32 = 2;
const BITMAP_SCALE: u32 = 2;
const BITMAP_CELL: u32 = 8 * BITMAP_SCALE;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to read font {}: {source}", path.display())]
    FontRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid font data: {0}")]
    InvalidFont(String),
}

pub struct LabelRenderer {
    font: Option<FontVec>,
    scale: PxScale,
}

impl LabelRenderer {
    /// Renderer that only uses the built-in bitmap font.
    pub fn bitmap() -> Self {
        Self {
            font: None,
            scale: PxScale::from(FONT_PX),
        }
    }

    pub fn from_font_bytes(bytes: Vec<u8>) -> Result<Self, RenderError> {
        let font = FontVec::try_from_vec(bytes).map_err(|e| RenderError::InvalidFont(e.to_string()))?;
        Ok(Self {
            font: Some(font),
            scale: PxScale::from(FONT_PX),
        })
    }

    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let bytes = std::fs::read(path).map_err(|source| RenderError::FontRead {
            path: path.to_path_buf(),
            source,
        })?;
        let renderer = Self::from_font_bytes(bytes)?;
        tracing::info!(font = %path.display(), "loaded label font");
        Ok(renderer)
    }

    /// Load the configured font, falling back to the bitmap renderer.
    pub fn from_config(font_path: Option<&Path>) -> Self {
        let Some(path) = font_path else {
            tracing::warn!("no label font configured; using bitmap labels");
            return Self::bitmap();
        };
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "label font unavailable; using bitmap labels");
            Self::bitmap()
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw a 2-px box around `face` and a filled label above it, green for
    /// a known person and red otherwise.
    pub fn draw_face(&self, img: &mut RgbImage, face: &BoundingBox, label: &str, known: bool) {
        let color = if known { MATCH_COLOR } else { UNKNOWN_COLOR };
        let Some(face) = face.clamp_to(img.width(), img.height()) else {
            return;
        };

        for t in 0..BOX_THICKNESS {
            if face.width <= 2 * t || face.height <= 2 * t {
                break;
            }
            let rect = Rect::at((face.x + t) as i32, (face.y + t) as i32)
                .of_size(face.width - 2 * t, face.height - 2 * t);
            draw_hollow_rect_mut(img, rect, color);
        }

        self.draw_label(img, face.x as i32, face.y as i32 - LABEL_OFFSET, label, color);
    }

    /// Draw `text` on a filled `background` box with its top-left near `(x, y)`,
    /// nudged to stay inside the image.
    pub fn draw_label(&self, img: &mut RgbImage, x: i32, y: i32, text: &str, background: Rgb<u8>) {
        if img.width() == 0 || img.height() == 0 {
            return;
        }
        if let Some(font) = &self.font {
            let shown = shaping::display_text(text);
            if covers(font, &shown) {
                let (tw, th) = text_size(self.scale, font, &shown);
                let (bx, by, bw, bh) = place(img, x, y, tw + 2 * LABEL_PAD, th + 2 * LABEL_PAD);
                draw_filled_rect_mut(img, Rect::at(bx, by).of_size(bw, bh), background);
                draw_text_mut(
                    img,
                    TEXT_COLOR,
                    bx + LABEL_PAD as i32,
                    by + LABEL_PAD as i32,
                    self.scale,
                    font,
                    &shown,
                );
                return;
            }
            tracing::debug!(label = text, "font lacks glyphs for label; using bitmap");
        }
        draw_bitmap_label(img, x, y, text, background);
    }
}

/// Whether the font has a glyph for every visible char.
fn covers(font: &FontVec, text: &str) -> bool {
    text.chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .all(|c| font.glyph_id(c).0 != 0)
}

/// Clamp a `w`×`h` box at `(x, y)` into a non-empty image. Returns `(x, y, w, h)`.
fn place(img: &RgbImage, x: i32, y: i32, w: u32, h: u32) -> (i32, i32, u32, u32) {
    let w = w.clamp(1, img.width());
    let h = h.clamp(1, img.height());
    let max_x = (img.width() - w) as i32;
    let max_y = (img.height() - h) as i32;
    (x.clamp(0, max_x), y.clamp(0, max_y), w, h)
}

/// Left-to-right monospaced label; anything outside ASCII shows as `?`.
fn draw_bitmap_label(img: &mut RgbImage, x: i32, y: i32, text: &str, background: Rgb<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let ascii: Vec<char> = text
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    let tw = ascii.len() as u32 * BITMAP_CELL;
    let (bx, by, bw, bh) = place(img, x, y, tw + 2 * LABEL_PAD, BITMAP_CELL + 2 * LABEL_PAD);
    draw_filled_rect_mut(img, Rect::at(bx, by).of_size(bw, bh), background);

    let origin_x = bx + LABEL_PAD as i32;
    let origin_y = by + LABEL_PAD as i32;
    for (n, c) in ascii.iter().enumerate() {
        let Some(rows) = BASIC_FONTS.get(*c) else {
            continue;
        };
        let cell_x = origin_x + (n as u32 * BITMAP_CELL) as i32;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..BITMAP_SCALE {
                    for dx in 0..BITMAP_SCALE {
                        let px = cell_x + (col * BITMAP_SCALE + dx) as i32;
                        let py = origin_y + (row as u32 * BITMAP_SCALE + dy) as i32;
                        if px >= 0 && py >= 0 && (px as u32) < img.width() && (py as u32) < img.height() {
                            img.put_pixel(px as u32, py as u32, TEXT_COLOR);
                        }
                    }
                }
            }
        }
    }
}
