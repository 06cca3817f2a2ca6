use std::time::{Duration, Instant};

use anyhow::Context;
use windows::Win32::Foundation::{CloseHandle, FALSE, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{
    CreateWaitableTimerExW, SetWaitableTimer, WaitForSingleObject,
};
use windows::core::PCWSTR;

use crate::error::{CaptureError, CaptureResult};
use crate::scheduler::{CancelToken, SlotTimer};

// CREATE_WAITABLE_TIMER_HIGH_RESOLUTION = 0x2
const CREATE_WAITABLE_TIMER_HIGH_RESOLUTION: u32 = 0x0000_0002;
// TIMER_ALL_ACCESS = 0x1F0003
const TIMER_ALL_ACCESS: u32 = 0x001F_0003;
const CANCEL_POLL_MS: u32 = 10;

/// Relative one-shot waitable timer.
///
/// Prefers a high-resolution timer and falls back to a standard one on
/// systems that do not support the flag.
pub(crate) struct WaitableTimer {
    handle: HANDLE,
}

// SAFETY: waitable timer handles are process-wide kernel objects that can
// be armed and waited on from any thread.
unsafe impl Send for WaitableTimer {}

impl WaitableTimer {
    pub(crate) fn new() -> CaptureResult<Self> {
        let high_res = unsafe {
            CreateWaitableTimerExW(
                None,
                PCWSTR::null(),
                CREATE_WAITABLE_TIMER_HIGH_RESOLUTION,
                TIMER_ALL_ACCESS,
            )
        };
        if let Ok(handle) = high_res {
            tracing::debug!("using high-resolution waitable timer");
            return Ok(Self { handle });
        }

        let handle = unsafe { CreateWaitableTimerExW(None, PCWSTR::null(), 0, TIMER_ALL_ACCESS) }
            .context("CreateWaitableTimerExW failed")
            .map_err(CaptureError::Platform)?;
        tracing::warn!("high-resolution timer unavailable, using standard waitable timer");
        Ok(Self { handle })
    }

    fn arm(&self, duration: Duration) -> CaptureResult<()> {
        // Negative due times are relative, in 100 ns units.
        let ticks = i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX);
        let due = -ticks.max(1);
        unsafe { SetWaitableTimer(self.handle, &due, 0, None, None, FALSE) }
            .context("SetWaitableTimer failed")
            .map_err(CaptureError::Platform)
    }
}

impl SlotTimer for WaitableTimer {
    fn wait(&mut self, duration: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_canceled() {
            return false;
        }
        let deadline = Instant::now() + duration;
        if let Err(error) = self.arm(duration) {
            tracing::warn!(%error, "waitable timer unavailable for this slot, sleeping instead");
            return !cancel.wait_timeout(duration);
        }

        loop {
            let status = unsafe { WaitForSingleObject(self.handle, CANCEL_POLL_MS) };
            if status == WAIT_OBJECT_0 {
                return !cancel.is_canceled();
            }
            if cancel.is_canceled() {
                return false;
            }
            if status != WAIT_TIMEOUT {
                tracing::warn!(status = status.0, "waitable timer wait failed, sleeping instead");
                let remaining = deadline.saturating_duration_since(Instant::now());
                return !cancel.wait_timeout(remaining);
            }
        }
    }
}

impl Drop for WaitableTimer {
    fn drop(&mut self) {
        if let Err(error) = unsafe { CloseHandle(self.handle) } {
            tracing::warn!(%error, "failed to close waitable timer");
        }
    }
}
