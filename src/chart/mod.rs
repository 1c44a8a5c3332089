//! Real-time temperature / duty chart.
//!
//! The chart plots the rolling sample window on a fixed-height surface:
//! temperature as a line against a data-driven left axis, heater duty as bars
//! against a fixed 0..100 % scale, both sharing a sample-index X axis.
//! Every call is a full redraw, so the output depends only on the data and the
//! surface size.

pub mod bitmap;
pub mod surface;

pub use bitmap::BitmapSurface;
pub use surface::{DrawOp, RecordingSurface, Surface};

use thiserror::Error;

/// Logical height of the chart surface.
pub const CHART_HEIGHT: f64 = 240.0;
pub const MARGIN_LEFT: f64 = 40.0;
pub const MARGIN_RIGHT: f64 = 40.0;
pub const MARGIN_TOP: f64 = 10.0;
pub const MARGIN_BOTTOM: f64 = 24.0;

/// Horizontal temperature gridlines, `tmin` and `tmax` included.
pub const TEMP_GRID_LINES: usize = 6;
/// Upper bound on vertical gridline intervals.
pub const MAX_INDEX_TICKS: usize = 10;
pub const DUTY_BAR_WIDTH: f64 = 6.0;
pub const DUTY_MAX: f64 = 100.0;
pub const AXIS_CAPTION: &str = "samples";
/// Largest device pixel ratio a bitmap surface is rendered at.
pub const MAX_PIXEL_RATIO: f64 = 4.0;

const LABEL_GAP: f64 = 6.0;
const CAPTION_BASELINE: f64 = 4.0;
const GRID_STROKE: f64 = 1.0;
const TEMP_STROKE: f64 = 2.0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("drawing backend error: {0}")]
    Backend(String),
    #[error("chart export failed: {0}")]
    Export(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub const BACKGROUND: Rgb = Rgb(0x0c, 0x0c, 0x0c);
pub const GRID_COLOR: Rgb = Rgb(0x22, 0x22, 0x22);
pub const LABEL_COLOR: Rgb = Rgb(0xbb, 0xbb, 0xbb);
pub const DUTY_COLOR: Rgb = Rgb(0x1e, 0x88, 0xe5);
pub const TEMP_COLOR: Rgb = Rgb(0x66, 0xbb, 0x6a);

/// A point in logical (pre pixel-ratio) surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Right,
    Center,
}

/// Coordinate mapping for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartGeometry {
    pub x0: f64,
    pub x1: f64,
    /// Bottom of the plot area
    pub y0: f64,
    /// Top of the plot area
    pub y1: f64,
    pub samples: usize,
    pub tmin: f64,
    pub tmax: f64,
}

impl ChartGeometry {
    /// Geometry for `temps` on a surface `width` wide. `None` when there is nothing to plot.
    pub fn new(width: f64, temps: &[f64]) -> Option<Self> {
        if temps.is_empty() {
            return None;
        }
        let min = temps.iter().copied().fold(f64::INFINITY, f64::min);
        let max = temps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            x0: MARGIN_LEFT,
            x1: width - MARGIN_RIGHT,
            y0: CHART_HEIGHT - MARGIN_BOTTOM,
            y1: MARGIN_TOP,
            samples: temps.len(),
            tmin: min.floor(),
            tmax: max.ceil(),
        })
    }

    pub fn plot_width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn plot_height(&self) -> f64 {
        self.y0 - self.y1
    }

    /// Sample index to X.
    pub fn x_for(&self, index: usize) -> f64 {
        let step = self.plot_width() / (self.samples.saturating_sub(1).max(1) as f64);
        self.x0 + index as f64 * step
    }

    /// Temperature to Y on the data-driven left axis. A flat series uses a span of 1.
    pub fn y_for_temp(&self, value: f64) -> f64 {
        let span = (self.tmax - self.tmin).max(1.0);
        self.y0 - ((value - self.tmin) / span) * self.plot_height()
    }

    /// Duty percentage to Y on the fixed right axis.
    pub fn y_for_duty(&self, percent: f64) -> f64 {
        self.y0 - (percent / DUTY_MAX) * self.plot_height()
    }

    /// Values of the horizontal gridlines, bottom to top.
    pub fn temp_grid_values(&self) -> Vec<f64> {
        let intervals = (TEMP_GRID_LINES - 1) as f64;
        (0..TEMP_GRID_LINES)
            .map(|k| self.tmin + k as f64 * (self.tmax - self.tmin) / intervals)
            .collect()
    }

    /// Sample indices carrying a vertical gridline.
    pub fn index_ticks(&self) -> Vec<usize> {
        let last = self.samples.saturating_sub(1);
        let ticks = MAX_INDEX_TICKS.min(last);
        if ticks == 0 {
            return vec![0];
        }
        (0..=ticks)
            .map(|k| ((k * last) as f64 / ticks as f64).round() as usize)
            .collect()
    }
}

/// Label for a temperature gridline.
pub fn temp_label(value: f64) -> String {
    format!("{}°C", value.round() as i64)
}

/// Redraw the whole chart. `temps` and `duties` are index-aligned.
pub fn draw_chart<S: Surface + ?Sized>(surface: &mut S, temps: &[f64], duties: &[f64]) -> Result<(), RenderError> {
    surface.clear(BACKGROUND)?;
    let Some(geo) = ChartGeometry::new(surface.width(), temps) else {
        return Ok(());
    };

    for value in geo.temp_grid_values() {
        let y = geo.y_for_temp(value);
        surface.stroke_line(Point::new(geo.x0, y), Point::new(geo.x1, y), GRID_COLOR, GRID_STROKE)?;
        surface.fill_text(&temp_label(value), Point::new(geo.x0 - LABEL_GAP, y), TextAlign::Right, LABEL_COLOR)?;
    }

    for index in geo.index_ticks() {
        let x = geo.x_for(index);
        surface.stroke_line(Point::new(x, geo.y0), Point::new(x, geo.y1), GRID_COLOR, GRID_STROKE)?;
    }

    for (i, duty) in duties.iter().take(geo.samples).enumerate() {
        let top = geo.y_for_duty(*duty);
        let bar_height = geo.y0 - top;
        if bar_height <= 0.0 {
            continue;
        }
        let left = geo.x_for(i) - DUTY_BAR_WIDTH / 2.0;
        surface.fill_rect(Point::new(left, top), DUTY_BAR_WIDTH, bar_height, DUTY_COLOR)?;
    }

    let line: Vec<Point> = temps
        .iter()
        .enumerate()
        .map(|(i, t)| Point::new(geo.x_for(i), geo.y_for_temp(*t)))
        .collect();
    surface.stroke_polyline(&line, TEMP_COLOR, TEMP_STROKE)?;

    let caption_at = Point::new((geo.x0 + geo.x1) / 2.0, CHART_HEIGHT - CAPTION_BASELINE);
    surface.fill_text(AXIS_CAPTION, caption_at, TextAlign::Center, LABEL_COLOR)?;
    Ok(())
}
