//! Capture rectangles.
//!
//! [`CaptureRegion`] is expressed in virtual desktop coordinates, the way
//! window client areas are reported. Compositor surfaces cover a single
//! output whose top-left sits somewhere in that desktop, so every capture
//! translates the region into a [`SurfaceBox`] local to the surface and
//! checks it fits before any GPU copy is issued.

use crate::error::{CaptureError, CaptureResult};

/// A rectangle in virtual desktop coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CaptureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidRegion(
                "region width and height must be > 0".into(),
            ));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Build a region from inclusive-exclusive desktop edges, as returned
    /// for a window client rectangle.
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> CaptureResult<Self> {
        let width = i64::from(right) - i64::from(left);
        let height = i64::from(bottom) - i64::from(top);
        if width <= 0 || height <= 0 {
            return Err(CaptureError::InvalidRegion(format!(
                "empty rectangle ({left}, {top}) - ({right}, {bottom})"
            )));
        }
        Self::new(left, top, width as u32, height as u32)
    }

    /// Right edge (exclusive) in virtual desktop coordinates.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width as i32)
    }

    /// Bottom edge (exclusive) in virtual desktop coordinates.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height as i32)
    }

    /// Translate into a box local to a surface whose top-left corner sits
    /// at `origin` on the desktop and that is `surface_width x
    /// surface_height` pixels large. Fails when any part of the region
    /// falls outside the surface.
    pub fn to_surface_box(
        &self,
        origin: (i32, i32),
        surface_width: u32,
        surface_height: u32,
    ) -> CaptureResult<SurfaceBox> {
        let left = i64::from(self.x) - i64::from(origin.0);
        let top = i64::from(self.y) - i64::from(origin.1);
        let right = left + i64::from(self.width);
        let bottom = top + i64::from(self.height);

        if left < 0
            || top < 0
            || right > i64::from(surface_width)
            || bottom > i64::from(surface_height)
        {
            return Err(CaptureError::InvalidRegion(format!(
                "{}x{} at ({}, {}) is outside the {}x{} output at ({}, {})",
                self.width,
                self.height,
                self.x,
                self.y,
                surface_width,
                surface_height,
                origin.0,
                origin.1
            )));
        }

        Ok(SurfaceBox {
            left: left as u32,
            top: top as u32,
            right: right as u32,
            bottom: bottom as u32,
        })
    }
}

/// Source box for a GPU sub-resource copy, in surface pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl SurfaceBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}
