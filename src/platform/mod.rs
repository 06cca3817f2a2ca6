use crate::backend::FrameSource;
use crate::error::CaptureResult;
use crate::region::CaptureRegion;
use crate::scheduler::SlotTimer;
use crate::window::WindowInfo;

#[cfg(not(target_os = "windows"))]
use crate::error::CaptureError;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(not(target_os = "windows"))]
fn unsupported_error(what: &str) -> CaptureError {
    CaptureError::BackendUnavailable(format!("{what} is only supported on Windows"))
}

#[cfg(target_os = "windows")]
pub(crate) fn default_slot_timer() -> CaptureResult<Box<dyn SlotTimer>> {
    Ok(Box::new(windows::timer::WaitableTimer::new()?))
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn default_slot_timer() -> CaptureResult<Box<dyn SlotTimer>> {
    Ok(Box::new(crate::scheduler::CondvarTimer))
}

#[cfg(target_os = "windows")]
pub(crate) fn default_frame_source(region: &CaptureRegion) -> CaptureResult<Box<dyn FrameSource>> {
    let compositor = windows::duplication::DxgiCompositor::for_region(region)?;
    Ok(Box::new(crate::backend::CompositorSource::new(compositor)))
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn default_frame_source(
    _region: &CaptureRegion,
) -> CaptureResult<Box<dyn FrameSource>> {
    Err(unsupported_error("desktop duplication"))
}

#[cfg(target_os = "windows")]
pub(crate) fn find_window_by_title(
    partial_title: &str,
    exclude: Option<&str>,
) -> CaptureResult<Option<WindowInfo>> {
    windows::window::find_window_by_title(partial_title, exclude)
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn find_window_by_title(
    _partial_title: &str,
    _exclude: Option<&str>,
) -> CaptureResult<Option<WindowInfo>> {
    Err(unsupported_error("window lookup"))
}
