use image::{ImageBuffer, ImageFormat, Rgba};
use std::io::Cursor;
use tiny_skia::{BlendMode, Color, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::error::SyncError;
use crate::model::StrokeSegment;

pub const DEFAULT_STROKE_COLOR: &str = "#10b981";

/// Transparent raster that replays a room's stroke log
pub struct Canvas {
    pixmap: Pixmap,
    width: u32,
    height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self, SyncError> {
        let pixmap = Pixmap::new(width, height).ok_or(SyncError::CanvasSize(width, height))?;
        Ok(Self {
            pixmap,
            width,
            height,
        })
    }

    /// Draw one segment; eraser segments punch through to transparent
    pub fn draw_segment(&mut self, segment: &StrokeSegment) {
        let mut paint = Paint::default();
        paint.anti_alias = true;
        if segment.erase {
            paint.set_color(Color::BLACK);
            paint.blend_mode = BlendMode::DestinationOut;
        } else {
            let color = parse_color(&segment.color)
                .or_else(|| parse_color(DEFAULT_STROKE_COLOR))
                .unwrap_or(Color::BLACK);
            paint.set_color(color);
        }

        let stroke = Stroke {
            width: segment.width.max(0.1),
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Default::default()
        };

        let mut pb = PathBuilder::new();
        if (segment.x0 - segment.x1).abs() < f32::EPSILON
            && (segment.y0 - segment.y1).abs() < f32::EPSILON
        {
            // A tap: a dot as wide as the brush
            pb.push_circle(segment.x0, segment.y0, stroke.width / 2.0);
            if let Some(path) = pb.finish() {
                self.pixmap.fill_path(
                    &path,
                    &paint,
                    tiny_skia::FillRule::Winding,
                    Transform::identity(),
                    None,
                );
            }
            return;
        }

        pb.move_to(segment.x0, segment.y0);
        pb.line_to(segment.x1, segment.y1);
        if let Some(path) = pb.finish() {
            self.pixmap
                .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }

    pub fn replay(&mut self, segments: &[StrokeSegment]) {
        for segment in segments {
            self.draw_segment(segment);
        }
    }

    pub fn clear(&mut self) {
        self.pixmap.fill(Color::TRANSPARENT);
    }

    /// Alpha of one pixel, `None` outside the canvas
    pub fn alpha_at(&self, x: u32, y: u32) -> Option<u8> {
        self.pixmap.pixel(x, y).map(|pixel| pixel.alpha())
    }

    /// Export canvas to PNG bytes
    pub fn to_png(&self) -> Result<Vec<u8>, SyncError> {
        let data = self.pixmap.data();
        let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::new(self.width, self.height);

        for (i, pixel) in img.pixels_mut().enumerate() {
            let offset = i * 4;
            // tiny-skia stores premultiplied RGBA
            let alpha = data[offset + 3];
            if alpha == 0 {
                *pixel = Rgba([0, 0, 0, 0]);
                continue;
            }
            let a = alpha as f32 / 255.0;
            *pixel = Rgba([
                (data[offset] as f32 / a).min(255.0) as u8,
                (data[offset + 1] as f32 / a).min(255.0) as u8,
                (data[offset + 2] as f32 / a).min(255.0) as u8,
                alpha,
            ]);
        }

        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`
pub fn parse_color(hex: &str) -> Option<Color> {
    let digits = hex.strip_prefix('#')?;
    if !digits.is_ascii() {
        return None;
    }
    let byte = |s: &str| u8::from_str_radix(s, 16).ok();
    let (r, g, b, a) = match digits.len() {
        3 => {
            let nibble = |i: usize| byte(&digits[i..i + 1]).map(|v| v * 17);
            (nibble(0)?, nibble(1)?, nibble(2)?, 255)
        }
        6 => (byte(&digits[0..2])?, byte(&digits[2..4])?, byte(&digits[4..6])?, 255),
        8 => (
            byte(&digits[0..2])?,
            byte(&digits[2..4])?,
            byte(&digits[4..6])?,
            byte(&digits[6..8])?,
        ),
        _ => return None,
    };
    Some(Color::from_rgba8(r, g, b, a))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(x0: f32, y0: f32, x1: f32, y1: f32, erase: bool) -> StrokeSegment {
        StrokeSegment {
            x0,
            y0,
            x1,
            y1,
            color: "#ff0000".into(),
            width: 6.0,
            erase,
        }
    }

    #[test]
    fn test_new_canvas_is_transparent() {
        let canvas = Canvas::new(64, 32).unwrap();
        assert_eq!(canvas.width(), 64);
        assert_eq!(canvas.height(), 32);
        assert_eq!(canvas.alpha_at(10, 10), Some(0));
        assert_eq!(canvas.alpha_at(64, 0), None);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        assert!(matches!(Canvas::new(0, 10), Err(SyncError::CanvasSize(0, 10))));
    }

    #[test]
    fn test_eraser_clears_pixels() {
        let mut canvas = Canvas::new(100, 100).unwrap();
        canvas.draw_segment(&segment(10.0, 50.0, 90.0, 50.0, false));
        assert_eq!(canvas.alpha_at(50, 50), Some(255));

        canvas.draw_segment(&segment(10.0, 50.0, 90.0, 50.0, true));
        assert_eq!(canvas.alpha_at(50, 50), Some(0));
    }

    #[test]
    fn test_replay_and_clear() {
        let mut canvas = Canvas::new(100, 100).unwrap();
        canvas.replay(&[
            segment(20.0, 20.0, 20.0, 20.0, false),
            segment(0.0, 80.0, 100.0, 80.0, false),
        ]);
        assert!(canvas.alpha_at(20, 20).unwrap() > 0);
        assert!(canvas.alpha_at(50, 80).unwrap() > 0);

        canvas.clear();
        assert_eq!(canvas.alpha_at(50, 80), Some(0));
    }

    #[test]
    fn test_parse_color() {
        assert!(parse_color("#fff").is_some());
        assert!(parse_color(DEFAULT_STROKE_COLOR).is_some());
        assert!(parse_color("#10b98180").is_some());
        assert!(parse_color("10b981").is_none());
        assert!(parse_color("#12345").is_none());
        assert!(parse_color("#zzzzzz").is_none());
    }

    #[test]
    fn test_export_png() {
        let canvas = Canvas::new(100, 100).unwrap();
        let png = canvas.to_png().unwrap();

        // PNG magic bytes
        assert_eq!(&png[0..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
