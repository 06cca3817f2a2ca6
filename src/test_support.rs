use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use crate::frame::RawFrame;
use crate::scheduler::{CancelToken, Clock, FrameScheduler, SlotTimer};

/// Scratch directory under the system temp dir, removed on drop.
pub(crate) struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub(crate) fn new(label: &str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "snow-timelapse-{label}-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub(crate) fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.path)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Opaque frame whose pixel `i` is `(b=i, g=2i, r=3i, a=255)`.
pub(crate) fn patterned_frame(width: u32, height: u32) -> RawFrame {
    let mut frame = RawFrame::zeroed(width, height).unwrap();
    for (i, px) in frame.as_mut_bgra_bytes().chunks_exact_mut(4).enumerate() {
        px[0] = i as u8;
        px[1] = (i * 2) as u8;
        px[2] = (i * 3) as u8;
        px[3] = 0xFF;
    }
    frame
}

/// Clock shared with a [`SteppingTimer`]; both see the same reading.
#[derive(Clone)]
pub(crate) struct SharedClock {
    pub(crate) now: Arc<Mutex<NaiveDateTime>>,
}

impl Clock for SharedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

/// Timer that returns immediately after moving the shared clock forward
/// by the requested wait plus `oversleep`.
pub(crate) struct SteppingTimer {
    pub(crate) now: Arc<Mutex<NaiveDateTime>>,
    pub(crate) oversleep: Duration,
    pub(crate) waits: Arc<Mutex<Vec<Duration>>>,
}

impl SlotTimer for SteppingTimer {
    fn wait(&mut self, duration: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_canceled() {
            return false;
        }
        self.waits.lock().unwrap().push(duration);
        let step = chrono::Duration::from_std(duration + self.oversleep).unwrap();
        *self.now.lock().unwrap() += step;
        true
    }
}

/// 2024-01-01 12:00:00 plus `ms` milliseconds.
pub(crate) fn noon_plus_millis(ms: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_milli_opt(12, 0, 0, ms)
        .unwrap()
}

/// Scheduler on simulated time. The returned list records every timer
/// wait.
pub(crate) fn simulated_scheduler(
    frame_rate: u32,
    start: NaiveDateTime,
    oversleep: Duration,
) -> (FrameScheduler, Arc<Mutex<Vec<Duration>>>) {
    let now = Arc::new(Mutex::new(start));
    let waits = Arc::new(Mutex::new(Vec::new()));
    let scheduler = FrameScheduler::with_parts(
        frame_rate,
        Box::new(SharedClock { now: now.clone() }),
        Box::new(SteppingTimer {
            now,
            oversleep,
            waits: waits.clone(),
        }),
    )
    .unwrap();
    (scheduler, waits)
}
