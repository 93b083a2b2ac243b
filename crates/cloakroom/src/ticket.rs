//! Ticket image rendering.
//!
//! A ticket is a 600x360 PNG: dark card, neon frame, the slot number glowing in
//! the middle. Glow is a blurred copy of the shape mask laid under the sharp
//! core. Without a font the number is drawn as seven-segment digits and the
//! caption line is left out.

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage, imageops};

use crate::allocation::SlotId;

const WIDTH: u32 = 600;
const HEIGHT: u32 = 360;

const BACKGROUND: [u8; 3] = [12, 10, 24];
const FRAME_COLOR: [u8; 3] = [255, 45, 149];
const NUMBER_COLOR: [u8; 3] = [0, 229, 255];
const CORE_COLOR: [u8; 3] = [235, 255, 255];

const FRAME_INSET: u32 = 18;
const FRAME_THICKNESS: u32 = 4;
const GLOW_SIGMA: f32 = 9.0;

const CAPTION: &str = "ГАРДЕРОБ";
const CAPTION_PX: f32 = 42.0;
const NUMBER_PX: f32 = 170.0;

// Seven-segment geometry.
const DIGIT_WIDTH: u32 = 72;
const DIGIT_HEIGHT: u32 = 150;
const DIGIT_GAP: u32 = 22;
const SEGMENT: u32 = 15;

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("failed to encode ticket: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Default)]
pub struct TicketRenderer {
    font: Option<FontArc>,
}

impl TicketRenderer {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Load the font at `path`, falling back to seven-segment digits when it
    /// is missing or unreadable.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            tracing::info!("No ticket font configured, using seven-segment digits");
            return Self::default();
        };

        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => {
                tracing::info!(path = %path.display(), "Loaded ticket font");
                Self::new(Some(font))
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "Failed to load ticket font, using seven-segment digits"
                );
                Self::default()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render the ticket for `slot` as PNG bytes.
    pub fn render(&self, slot: SlotId) -> Result<Vec<u8>, TicketError> {
        let number = slot.to_string();

        let mut frame = GrayImage::new(WIDTH, HEIGHT);
        draw_frame(&mut frame);

        let mut shape = GrayImage::new(WIDTH, HEIGHT);
        match &self.font {
            Some(font) => {
                draw_text(&mut frame, font, CAPTION, CAPTION_PX, 42.0);
                let top = (HEIGHT as f32 - NUMBER_PX) / 2.0 + 24.0;
                draw_text(&mut shape, font, &number, NUMBER_PX, top);
            }
            None => draw_segments(&mut shape, &number),
        }

        let image = compose(&frame, &shape);
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

fn compose(frame: &GrayImage, shape: &GrayImage) -> RgbImage {
    let frame_glow = imageops::blur(frame, GLOW_SIGMA);
    let shape_glow = imageops::blur(shape, GLOW_SIGMA);

    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let mut pixel = BACKGROUND.map(f32::from);
        add_light(&mut pixel, FRAME_COLOR, coverage(&frame_glow, x, y) * 1.8);
        add_light(&mut pixel, NUMBER_COLOR, coverage(&shape_glow, x, y) * 1.8);
        mix(&mut pixel, FRAME_COLOR, coverage(frame, x, y));
        mix(&mut pixel, CORE_COLOR, coverage(shape, x, y));
        Rgb(pixel.map(|c| c.clamp(0.0, 255.0) as u8))
    })
}

fn coverage(mask: &GrayImage, x: u32, y: u32) -> f32 {
    f32::from(mask.get_pixel(x, y).0[0]) / 255.0
}

fn add_light(pixel: &mut [f32; 3], color: [u8; 3], amount: f32) {
    let amount = amount.min(1.0);
    for (channel, c) in pixel.iter_mut().zip(color) {
        *channel += f32::from(c) * amount;
    }
}

fn mix(pixel: &mut [f32; 3], color: [u8; 3], amount: f32) {
    for (channel, c) in pixel.iter_mut().zip(color) {
        *channel = *channel * (1.0 - amount) + f32::from(c) * amount;
    }
}

fn fill_rect(mask: &mut GrayImage, x: u32, y: u32, width: u32, height: u32) {
    for py in y..(y + height).min(mask.height()) {
        for px in x..(x + width).min(mask.width()) {
            mask.put_pixel(px, py, Luma([255]));
        }
    }
}

fn draw_frame(mask: &mut GrayImage) {
    let (left, top) = (FRAME_INSET, FRAME_INSET);
    let width = WIDTH - 2 * FRAME_INSET;
    let height = HEIGHT - 2 * FRAME_INSET;
    fill_rect(mask, left, top, width, FRAME_THICKNESS);
    fill_rect(mask, left, top + height - FRAME_THICKNESS, width, FRAME_THICKNESS);
    fill_rect(mask, left, top, FRAME_THICKNESS, height);
    fill_rect(mask, left + width - FRAME_THICKNESS, top, FRAME_THICKNESS, height);
}

/// Draw `text` horizontally centered with its ascent starting at `top`.
fn draw_text(mask: &mut GrayImage, font: &FontArc, text: &str, px: f32, top: f32) {
    let scaled = font.as_scaled(PxScale::from(px));
    let advance: f32 = text
        .chars()
        .map(|c| scaled.h_advance(scaled.glyph_id(c)))
        .sum();
    let baseline = top + scaled.ascent();
    let mut caret = (WIDTH as f32 - advance) / 2.0;

    for c in text.chars() {
        let id = scaled.glyph_id(c);
        let glyph = id.with_scale_and_position(scaled.scale(), point(caret, baseline));
        caret += scaled.h_advance(id);

        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, c| {
            let x = bounds.min.x as i64 + i64::from(gx);
            let y = bounds.min.y as i64 + i64::from(gy);
            if x < 0 || y < 0 || x >= i64::from(WIDTH) || y >= i64::from(HEIGHT) {
                return;
            }
            let pixel = mask.get_pixel_mut(x as u32, y as u32);
            pixel.0[0] = pixel.0[0].max((c.clamp(0.0, 1.0) * 255.0) as u8);
        });
    }
}

/// Segment bits, `a` (top) through `g` (middle), for digits 0-9.
const SEGMENTS: [u8; 10] = [
    0b0111111, 0b0000110, 0b1011011, 0b1001111, 0b1100110, 0b1101101, 0b1111101, 0b0000111,
    0b1111111, 0b1101111,
];

fn draw_segments(mask: &mut GrayImage, number: &str) {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    let count = digits.len() as u32;
    if count == 0 {
        return;
    }

    let total = count * DIGIT_WIDTH + (count - 1) * DIGIT_GAP;
    let top = (HEIGHT - DIGIT_HEIGHT) / 2;
    let mut left = WIDTH.saturating_sub(total) / 2;
    for digit in digits {
        draw_digit(mask, SEGMENTS[digit as usize], left, top);
        left += DIGIT_WIDTH + DIGIT_GAP;
    }
}

fn draw_digit(mask: &mut GrayImage, bits: u8, x: u32, y: u32) {
    let (w, h, t) = (DIGIT_WIDTH, DIGIT_HEIGHT, SEGMENT);
    let half = h / 2;
    let segments = [
        (x, y, w, t),                    // a
        (x + w - t, y, t, half),         // b
        (x + w - t, y + half, t, half),  // c
        (x, y + h - t, w, t),            // d
        (x, y + half, t, half),          // e
        (x, y, t, half),                 // f
        (x, y + half - t / 2, w, t),     // g
    ];
    for (i, (sx, sy, sw, sh)) in segments.into_iter().enumerate() {
        if bits & (1 << i) != 0 {
            fill_rect(mask, sx, sy, sw, sh);
        }
    }
}
