//! Frame acquisition.
//!
//! [`FrameSource`] is what the capture loop talks to: give it a desktop
//! region, get back an owned [`RawFrame`]. [`CompositorSource`] implements
//! it on top of any [`Compositor`], the thin seam over a platform desktop
//! duplication handle, and enforces the acquire/release discipline with
//! a [`FrameLease`] guard.

use std::mem::ManuallyDrop;
use std::time::Duration;

use crate::error::{CaptureError, CaptureResult};
use crate::frame::RawFrame;
use crate::region::{CaptureRegion, SurfaceBox};

/// Produces owned CPU copies of a desktop region.
pub trait FrameSource: Send {
    fn capture(&mut self, region: &CaptureRegion) -> CaptureResult<RawFrame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn capture(&mut self, region: &CaptureRegion) -> CaptureResult<RawFrame> {
        (**self).capture(region)
    }
}

/// Platform desktop duplication handle.
///
/// A successful [`acquire_next_frame`](Compositor::acquire_next_frame)
/// must be paired with exactly one
/// [`release_frame`](Compositor::release_frame); callers go through
/// [`FrameLease`] to get that for free.
pub trait Compositor: Send {
    /// GPU reference to the full desktop image of an acquired frame.
    type Surface;
    /// CPU-readable copy target sized to a capture region.
    type Staging;

    /// Poll for a new desktop frame without blocking. `Ok(None)` means the
    /// desktop has not changed since the last acquire.
    fn acquire_next_frame(&mut self) -> CaptureResult<Option<Self::Surface>>;

    fn release_frame(&mut self) -> CaptureResult<()>;

    fn surface_size(&self, surface: &Self::Surface) -> CaptureResult<(u32, u32)>;

    /// Top-left corner of the duplicated output in desktop coordinates.
    fn desktop_origin(&self) -> (i32, i32);

    fn create_staging(&mut self, width: u32, height: u32) -> CaptureResult<Self::Staging>;

    fn copy_region(
        &mut self,
        surface: &Self::Surface,
        staging: &Self::Staging,
        area: &SurfaceBox,
    ) -> CaptureResult<()>;

    /// Map `staging`, copy its rows into `frame`, unmap.
    fn read_staging(&mut self, staging: &Self::Staging, frame: &mut RawFrame)
    -> CaptureResult<()>;

    /// Re-create the duplication after access was lost.
    fn recover(&mut self) -> CaptureResult<()>;
}

/// Scoped ownership of an acquired compositor frame.
///
/// Dropping the lease drops the surface reference first and then releases
/// the frame back to the compositor, on every exit path.
pub struct FrameLease<'a, C: Compositor> {
    compositor: &'a mut C,
    surface: ManuallyDrop<C::Surface>,
}

impl<'a, C: Compositor> FrameLease<'a, C> {
    pub fn new(compositor: &'a mut C, surface: C::Surface) -> Self {
        Self {
            compositor,
            surface: ManuallyDrop::new(surface),
        }
    }

    pub fn surface(&self) -> &C::Surface {
        &self.surface
    }

    /// Borrow the compositor and the leased surface together.
    pub fn parts(&mut self) -> (&mut C, &C::Surface) {
        (&mut *self.compositor, &*self.surface)
    }
}

impl<C: Compositor> Drop for FrameLease<'_, C> {
    fn drop(&mut self) {
        // SAFETY: `surface` is never touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.surface) };
        if let Err(error) = self.compositor.release_frame() {
            tracing::warn!(%error, "failed to release desktop frame");
        }
    }
}

/// [`FrameSource`] backed by a [`Compositor`]. Holds no compositor when
/// creation or access-lost recovery failed, in which case every capture
/// reports [`CaptureError::NotInitialized`].
pub struct CompositorSource<C: Compositor> {
    compositor: Option<C>,
}

impl<C: Compositor> CompositorSource<C> {
    pub fn new(compositor: C) -> Self {
        Self {
            compositor: Some(compositor),
        }
    }

    pub fn uninitialized() -> Self {
        Self { compositor: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.compositor.is_some()
    }

    pub fn compositor(&self) -> Option<&C> {
        self.compositor.as_ref()
    }
}

impl<C: Compositor> FrameSource for CompositorSource<C> {
    fn capture(&mut self, region: &CaptureRegion) -> CaptureResult<RawFrame> {
        let Some(compositor) = self.compositor.as_mut() else {
            return Err(CaptureError::NotInitialized);
        };

        match capture_region(compositor, region) {
            Err(error) if error.requires_backend_reset() => {
                tracing::warn!("desktop duplication access lost, recreating");
                if let Err(recover_error) = compositor.recover() {
                    tracing::error!(error = %recover_error, "desktop duplication recovery failed");
                    self.compositor = None;
                }
                Err(error)
            }
            result => result,
        }
    }
}

fn capture_region<C: Compositor>(
    compositor: &mut C,
    region: &CaptureRegion,
) -> CaptureResult<RawFrame> {
    let Some(surface) = compositor.acquire_next_frame()? else {
        return Err(CaptureError::NoNewFrame);
    };
    let mut lease = FrameLease::new(compositor, surface);

    let frame = {
        let (compositor, surface) = lease.parts();
        let (surface_width, surface_height) = compositor.surface_size(surface)?;
        let area =
            region.to_surface_box(compositor.desktop_origin(), surface_width, surface_height)?;

        let staging = compositor.create_staging(area.width(), area.height())?;
        compositor.copy_region(surface, &staging, &area)?;

        let mut frame = RawFrame::zeroed(area.width(), area.height())?;
        compositor.read_staging(&staging, &mut frame)?;
        frame
    };
    drop(lease);

    if frame.is_degenerate() {
        return Err(CaptureError::EmptyFrame);
    }
    Ok(frame)
}

/// Bounded retry applied by the capture loop around each tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            pause: Duration::from_millis(5),
        }
    }
}

/// Capture with up to `policy.attempts` tries. Only retryable failures
/// are retried; anything else is returned straight away. When every
/// attempt fails the last error is returned.
pub fn capture_with_retry<S: FrameSource + ?Sized>(
    source: &mut S,
    region: &CaptureRegion,
    policy: &RetryPolicy,
) -> CaptureResult<RawFrame> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match source.capture(region) {
            Ok(frame) => return Ok(frame),
            Err(error) if error.is_retryable() && attempt < attempts => {
                tracing::debug!(attempt, %error, "capture attempt failed, retrying");
                if !policy.pause.is_zero() {
                    std::thread::sleep(policy.pause);
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
