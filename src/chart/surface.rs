// src/chart/surface.rs - Drawing surface abstraction for the chart renderer
use super::{Point, RenderError, Rgb, TextAlign, CHART_HEIGHT};
use std::path::Path;

/// A canvas-like target. Coordinates are logical; implementations apply their
/// own pixel ratio.
pub trait Surface: Send {
    /// Logical width of the surface.
    fn width(&self) -> f64;

    /// Logical height of the surface.
    fn height(&self) -> f64 {
        CHART_HEIGHT
    }

    fn clear(&mut self, color: Rgb) -> Result<(), RenderError>;

    fn stroke_line(&mut self, from: Point, to: Point, color: Rgb, width: f64) -> Result<(), RenderError>;

    /// Fill the rectangle whose top-left corner is `origin`.
    fn fill_rect(&mut self, origin: Point, width: f64, height: f64, color: Rgb) -> Result<(), RenderError>;

    fn stroke_polyline(&mut self, points: &[Point], color: Rgb, width: f64) -> Result<(), RenderError>;

    fn fill_text(&mut self, text: &str, at: Point, align: TextAlign, color: Rgb) -> Result<(), RenderError>;

    /// Write the current frame to an image file, when the surface holds pixels.
    fn export_png(&self, path: &Path) -> Result<(), RenderError> {
        Err(RenderError::Export(format!("surface cannot be exported to {}", path.display())))
    }
}

/// A recorded drawing call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Clear(Rgb),
    Line { from: Point, to: Point, color: Rgb, width: f64 },
    Rect { origin: Point, width: f64, height: f64, color: Rgb },
    Polyline { points: Vec<Point>, color: Rgb, width: f64 },
    Text { text: String, at: Point, align: TextAlign, color: Rgb },
}

/// Surface that keeps the display list of the last frame. A `clear` starts a new frame.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    width: f64,
    ops: Vec<DrawOp>,
}

impl RecordingSurface {
    pub fn new(width: f64) -> Self {
        Self { width, ops: Vec::new() }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Horizontal lines in the given color, as their Y coordinate.
    pub fn horizontal_lines(&self, color: Rgb) -> Vec<f64> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Line { from, to, color: c, .. } if *c == color && from.y == to.y => Some(from.y),
                _ => None,
            })
            .collect()
    }

    /// Vertical lines in the given color, as their X coordinate.
    pub fn vertical_lines(&self, color: Rgb) -> Vec<f64> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Line { from, to, color: c, .. } if *c == color && from.x == to.x => Some(from.x),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn rects(&self) -> Vec<(Point, f64, f64)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Rect { origin, width, height, .. } => Some((*origin, *width, *height)),
                _ => None,
            })
            .collect()
    }
}

impl Surface for RecordingSurface {
    fn width(&self) -> f64 {
        self.width
    }

    fn clear(&mut self, color: Rgb) -> Result<(), RenderError> {
        self.ops.clear();
        self.ops.push(DrawOp::Clear(color));
        Ok(())
    }

    fn stroke_line(&mut self, from: Point, to: Point, color: Rgb, width: f64) -> Result<(), RenderError> {
        self.ops.push(DrawOp::Line { from, to, color, width });
        Ok(())
    }

    fn fill_rect(&mut self, origin: Point, width: f64, height: f64, color: Rgb) -> Result<(), RenderError> {
        self.ops.push(DrawOp::Rect { origin, width, height, color });
        Ok(())
    }

    fn stroke_polyline(&mut self, points: &[Point], color: Rgb, width: f64) -> Result<(), RenderError> {
        self.ops.push(DrawOp::Polyline { points: points.to_vec(), color, width });
        Ok(())
    }

    fn fill_text(&mut self, text: &str, at: Point, align: TextAlign, color: Rgb) -> Result<(), RenderError> {
        self.ops.push(DrawOp::Text { text: text.to_string(), at, align, color });
        Ok(())
    }
}
