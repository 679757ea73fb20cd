//! Placement geometry on the output canvas.
//!
//! All coordinates are normalized to `[0.0, 1.0]`.

use serde::{Deserialize, Serialize};

/// A rectangle on the output canvas.
///
/// `(0.0, 0.0)` is top-left and `(1.0, 1.0)` is bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge (normalized).
    pub x: f64,
    /// Top edge (normalized).
    pub y: f64,
    /// Width (normalized).
    pub w: f64,
    /// Height (normalized).
    pub h: f64,
}

impl Rect {
    /// The whole canvas.
    pub const FULL: Rect = Rect {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    /// Create a new rect, clamping values to the canvas.
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            w: w.clamp(0.0, 1.0 - x),
            h: h.clamp(0.0, 1.0 - y),
        }
    }

    pub fn right(&self) -> f64 {
        (self.x + self.w).min(1.0)
    }

    pub fn bottom(&self) -> f64 {
        (self.y + self.h).min(1.0)
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    /// Linearly interpolate between two rects.
    pub fn lerp(a: &Rect, b: &Rect, t: f64) -> Rect {
        let t = t.clamp(0.0, 1.0);
        if t >= 1.0 {
            return *b;
        }
        Rect {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
            w: a.w + (b.w - a.w) * t,
            h: a.h + (b.h - a.h) * t,
        }
    }

    /// Map to integer pixel bounds `(x, y, width, height)` on a canvas.
    pub fn to_pixels(&self, canvas_w: u32, canvas_h: u32) -> (u32, u32, u32, u32) {
        let x0 = (self.x * canvas_w as f64).round() as u32;
        let y0 = (self.y * canvas_h as f64).round() as u32;
        let x1 = (self.right() * canvas_w as f64).round() as u32;
        let y1 = (self.bottom() * canvas_h as f64).round() as u32;
        (
            x0.min(canvas_w),
            y0.min(canvas_h),
            x1.saturating_sub(x0),
            y1.saturating_sub(y0),
        )
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Where and how one source is drawn for a given layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub rect: Rect,
    /// Blend opacity `[0.0, 1.0]`.
    pub opacity: f64,
    /// Draw order; higher values are drawn on top.
    pub z_order: u8,
    pub visible: bool,
}

impl Placement {
    pub fn shown(rect: Rect, z_order: u8) -> Self {
        Self {
            rect,
            opacity: 1.0,
            z_order,
            visible: true,
        }
    }

    pub fn hidden(rect: Rect, z_order: u8) -> Self {
        Self {
            rect,
            opacity: 0.0,
            z_order,
            visible: false,
        }
    }

    /// Interpolate geometry and opacity. Visibility follows opacity so a
    /// fading source stays drawn until it reaches zero.
    pub fn lerp(a: &Placement, b: &Placement, t: f64) -> Placement {
        let t = t.clamp(0.0, 1.0);
        if t >= 1.0 {
            return *b;
        }
        let opacity = a.opacity + (b.opacity - a.opacity) * t;
        Placement {
            rect: Rect::lerp(&a.rect, &b.rect, t),
            opacity,
            z_order: a.z_order.max(b.z_order),
            visible: opacity > 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_clamps_to_canvas() {
        let r = Rect::new(0.8, 0.9, 0.5, 0.5);
        assert!((r.right() - 1.0).abs() < 1e-9);
        assert!((r.bottom() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_lerp() {
        let a = Rect::FULL;
        let b = Rect::new(0.5, 0.5, 0.5, 0.5);
        let mid = Rect::lerp(&a, &b, 0.5);
        assert!((mid.x - 0.25).abs() < 1e-9);
        assert!((mid.w - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_to_pixels() {
        let r = Rect::new(0.5, 0.0, 0.5, 1.0);
        assert_eq!(r.to_pixels(1280, 720), (640, 0, 640, 720));
    }

    #[test]
    fn test_fade_out_stays_visible_until_done() {
        let a = Placement::shown(Rect::FULL, 1);
        let b = Placement::hidden(Rect::FULL, 1);
        assert!(Placement::lerp(&a, &b, 0.5).visible);
        assert!(!Placement::lerp(&a, &b, 1.0).visible);
    }
}
