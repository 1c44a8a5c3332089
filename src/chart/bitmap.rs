// src/chart/bitmap.rs - RGB framebuffer surface backed by embedded-graphics
use super::{Point, RenderError, Rgb, Surface, TextAlign, CHART_HEIGHT, MAX_PIXEL_RATIO};
use core::convert::Infallible;
use embedded_graphics::{
    mono_font::{MonoFont, MonoTextStyle, iso_8859_1::{FONT_10X20, FONT_6X10}},
    pixelcolor::{Rgb888, RgbColor},
    prelude::{DrawTarget, Drawable, OriginDimensions, Pixel, Primitive, Size},
    primitives::{Line, Polyline, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use std::path::Path;

/// Raw RGB888 pixel store, row-major.
struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Framebuffer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 3],
        }
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * 3)
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Framebuffer {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if let Some(at) = self.offset(coord.x, coord.y) {
                self.pixels[at] = color.r();
                self.pixels[at + 1] = color.g();
                self.pixels[at + 2] = color.b();
            }
        }
        Ok(())
    }
}

fn settle<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

fn rgb888(color: Rgb) -> Rgb888 {
    Rgb888::new(color.0, color.1, color.2)
}

/// Chart surface rendering into an in-memory RGB bitmap. The bitmap is the
/// logical size multiplied by the pixel ratio.
pub struct BitmapSurface {
    width: f64,
    pixel_ratio: f64,
    frame: Framebuffer,
}

impl BitmapSurface {
    /// Ratios above [`MAX_PIXEL_RATIO`] are clamped; invalid ones fall back to 1.
    pub fn new(width: u32, pixel_ratio: f64) -> Self {
        let pixel_ratio = if pixel_ratio > 0.0 && pixel_ratio.is_finite() {
            pixel_ratio.min(MAX_PIXEL_RATIO)
        } else {
            1.0
        };
        let px_width = (width as f64 * pixel_ratio).round().max(1.0) as u32;
        let px_height = (CHART_HEIGHT * pixel_ratio).round() as u32;
        Self {
            width: width as f64,
            pixel_ratio,
            frame: Framebuffer::new(px_width, px_height),
        }
    }

    /// Bitmap dimensions in device pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.frame.width, self.frame.height)
    }

    pub fn pixel_ratio(&self) -> f64 {
        self.pixel_ratio
    }

    /// Color of a device pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        let at = self.frame.offset(x as i32, y as i32)?;
        let p = &self.frame.pixels;
        Some(Rgb(p[at], p[at + 1], p[at + 2]))
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.frame.pixels
    }

    /// Write the current frame as a PNG file.
    pub fn save_png(&self, path: &Path) -> Result<(), RenderError> {
        let image = image::RgbImage::from_raw(self.frame.width, self.frame.height, self.frame.pixels.clone())
            .ok_or_else(|| RenderError::Export("framebuffer size mismatch".to_string()))?;
        image.save(path).map_err(|e| RenderError::Export(e.to_string()))?;
        tracing::debug!("Chart written to {}", path.display());
        Ok(())
    }

    fn device_point(&self, p: Point) -> embedded_graphics::prelude::Point {
        embedded_graphics::prelude::Point::new(
            (p.x * self.pixel_ratio).round() as i32,
            (p.y * self.pixel_ratio).round() as i32,
        )
    }

    fn device_stroke(&self, width: f64) -> u32 {
        (width * self.pixel_ratio).round().max(1.0) as u32
    }

    fn font(&self) -> &'static MonoFont<'static> {
        if self.pixel_ratio >= 2.0 { &FONT_10X20 } else { &FONT_6X10 }
    }
}

impl Surface for BitmapSurface {
    fn width(&self) -> f64 {
        self.width
    }

    fn clear(&mut self, color: Rgb) -> Result<(), RenderError> {
        settle(self.frame.clear(rgb888(color)));
        Ok(())
    }

    fn stroke_line(&mut self, from: Point, to: Point, color: Rgb, width: f64) -> Result<(), RenderError> {
        let style = PrimitiveStyle::with_stroke(rgb888(color), self.device_stroke(width));
        let line = Line::new(self.device_point(from), self.device_point(to)).into_styled(style);
        settle(line.draw(&mut self.frame));
        Ok(())
    }

    fn fill_rect(&mut self, origin: Point, width: f64, height: f64, color: Rgb) -> Result<(), RenderError> {
        let w = (width * self.pixel_ratio).round();
        let h = (height * self.pixel_ratio).round();
        if w < 1.0 || h < 1.0 {
            return Ok(());
        }
        let rect = Rectangle::new(self.device_point(origin), Size::new(w as u32, h as u32))
            .into_styled(PrimitiveStyle::with_fill(rgb888(color)));
        settle(rect.draw(&mut self.frame));
        Ok(())
    }

    fn stroke_polyline(&mut self, points: &[Point], color: Rgb, width: f64) -> Result<(), RenderError> {
        let vertices: Vec<_> = points.iter().map(|p| self.device_point(*p)).collect();
        let style = PrimitiveStyle::with_stroke(rgb888(color), self.device_stroke(width));
        settle(Polyline::new(&vertices).into_styled(style).draw(&mut self.frame));
        Ok(())
    }

    fn fill_text(&mut self, text: &str, at: Point, align: TextAlign, color: Rgb) -> Result<(), RenderError> {
        let alignment = match align {
            TextAlign::Right => Alignment::Right,
            TextAlign::Center => Alignment::Center,
        };
        let layout = TextStyleBuilder::new().alignment(alignment).baseline(Baseline::Middle).build();
        let character_style = MonoTextStyle::new(self.font(), rgb888(color));
        let position = self.device_point(at);
        settle(Text::with_text_style(text, position, character_style, layout).draw(&mut self.frame));
        Ok(())
    }

    fn export_png(&self, path: &Path) -> Result<(), RenderError> {
        self.save_png(path)
    }
}
