use anyhow::Context;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT, TRUE};
use windows::Win32::Graphics::Gdi::ClientToScreen;
use windows::Win32::System::Threading::GetCurrentProcessId;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClientRect, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId,
    IsIconic, IsWindowVisible,
};

use crate::error::{CaptureError, CaptureResult};
use crate::region::CaptureRegion;
use crate::window::{WindowId, WindowInfo, title_matches};

struct EnumContext {
    current_process_id: u32,
    candidates: Vec<(HWND, String)>,
}

/// Visible, non-minimized top-level windows of other processes, in
/// Z-order, with their titles.
fn enumerate_titled_windows() -> CaptureResult<Vec<(HWND, String)>> {
    unsafe extern "system" fn enum_windows_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let context = unsafe { &mut *(lparam.0 as *mut EnumContext) };
        if let Some(title) = unsafe { candidate_title(hwnd, context.current_process_id) } {
            context.candidates.push((hwnd, title));
        }
        TRUE
    }

    let mut context = EnumContext {
        current_process_id: unsafe { GetCurrentProcessId() },
        candidates: Vec::new(),
    };
    unsafe {
        EnumWindows(
            Some(enum_windows_proc),
            LPARAM(std::ptr::addr_of_mut!(context) as isize),
        )
    }
    .context("EnumWindows failed")
    .map_err(CaptureError::Platform)?;
    Ok(context.candidates)
}

unsafe fn candidate_title(hwnd: HWND, current_process_id: u32) -> Option<String> {
    unsafe {
        if !IsWindowVisible(hwnd).as_bool() || IsIconic(hwnd).as_bool() {
            return None;
        }

        let mut process_id = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut process_id));
        if process_id == current_process_id {
            return None;
        }

        let title_len = GetWindowTextLengthW(hwnd);
        if title_len <= 0 {
            return None;
        }
        let mut buffer = vec![0u16; title_len as usize + 1];
        let copied = GetWindowTextW(hwnd, &mut buffer);
        if copied <= 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buffer[..copied as usize]))
    }
}

fn client_area(hwnd: HWND) -> CaptureResult<CaptureRegion> {
    let mut rect = RECT::default();
    unsafe { GetClientRect(hwnd, &mut rect) }
        .context("GetClientRect failed")
        .map_err(CaptureError::Platform)?;

    let mut top_left = POINT {
        x: rect.left,
        y: rect.top,
    };
    if !unsafe { ClientToScreen(hwnd, &mut top_left) }.as_bool() {
        return Err(CaptureError::Platform(anyhow::anyhow!(
            "ClientToScreen failed for window {:p}",
            hwnd.0
        )));
    }

    CaptureRegion::from_edges(
        top_left.x,
        top_left.y,
        top_left.x + (rect.right - rect.left),
        top_left.y + (rect.bottom - rect.top),
    )
}

pub(crate) fn find_window_by_title(
    partial_title: &str,
    exclude: Option<&str>,
) -> CaptureResult<Option<WindowInfo>> {
    for (hwnd, title) in enumerate_titled_windows()? {
        if !title_matches(&title, partial_title, exclude) {
            continue;
        }
        let client_area = match client_area(hwnd) {
            Ok(area) => area,
            Err(CaptureError::InvalidRegion(reason)) => {
                tracing::debug!(%title, %reason, "skipping window with an empty client area");
                continue;
            }
            Err(error) => return Err(error),
        };
        return Ok(Some(WindowInfo {
            id: WindowId::from_raw_handle(hwnd.0 as isize),
            title,
            client_area,
        }));
    }
    Ok(None)
}
