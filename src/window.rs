//! Locating the window to capture.

use crate::error::{CaptureError, CaptureResult};
use crate::region::CaptureRegion;

/// Native top-level window handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowId {
    handle: isize,
}

impl WindowId {
    pub const fn from_raw_handle(raw_handle: isize) -> Self {
        Self { handle: raw_handle }
    }

    pub const fn raw_handle(&self) -> isize {
        self.handle
    }

    pub fn stable_id(&self) -> String {
        format!("{:016x}", self.handle as usize as u64)
    }
}

/// A matched window and its client area in desktop coordinates, as
/// resolved at lookup time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    pub client_area: CaptureRegion,
}

/// Find the first visible, non-minimized top-level window of another
/// process whose title contains `partial_title`.
///
/// Windows whose title contains `exclude` are skipped, which keeps the
/// console hosting this program from matching its own command line.
/// Returns `Ok(None)` when nothing matches.
pub fn find_window_by_title(
    partial_title: &str,
    exclude: Option<&str>,
) -> CaptureResult<Option<WindowInfo>> {
    if partial_title.is_empty() {
        return Err(CaptureError::InvalidConfig(
            "window title to search for must not be empty".to_string(),
        ));
    }
    let found = crate::platform::find_window_by_title(partial_title, exclude)?;
    match &found {
        Some(info) => tracing::info!(
            title = %info.title,
            window = %info.id.stable_id(),
            x = info.client_area.x,
            y = info.client_area.y,
            width = info.client_area.width,
            height = info.client_area.height,
            "found capture window"
        ),
        None => tracing::info!(partial_title, "no window title matched"),
    }
    Ok(found)
}

/// Case-sensitive substring match with an optional exclusion.
#[cfg(any(target_os = "windows", test))]
pub(crate) fn title_matches(title: &str, partial_title: &str, exclude: Option<&str>) -> bool {
    if !title.contains(partial_title) {
        return false;
    }
    match exclude {
        Some(exclude) if !exclude.is_empty() => !title.contains(exclude),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_match_is_case_sensitive() {
        assert!(title_matches("Untitled - Notepad", "Notepad", None));
        assert!(!title_matches("Untitled - Notepad", "notepad", None));
    }

    #[test]
    fn exclusion_filters_matching_titles() {
        let console = r"C:\tools\snow-timelapse.exe Notepad";
        assert!(!title_matches(console, "Notepad", Some("snow-timelapse.exe")));
        assert!(title_matches("Notepad", "Notepad", Some("snow-timelapse.exe")));
        assert!(title_matches("Notepad", "Notepad", Some("")));
    }

    #[test]
    fn empty_search_is_rejected() {
        assert!(matches!(
            find_window_by_title("", None),
            Err(CaptureError::InvalidConfig(_))
        ));
    }

    #[test]
    fn stable_id_is_fixed_width_hex() {
        assert_eq!(WindowId::from_raw_handle(0x1a2b).stable_id(), "0000000000001a2b");
    }
}
