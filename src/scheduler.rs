//! Real-time frame pacing.
//!
//! [`FrameScheduler`] splits every wall-clock second into `frame_rate`
//! slots and invokes a tick callback once each time the current
//! `(second, slot)` pair changes. Between ticks it sleeps on a
//! [`SlotTimer`] until the next slot boundary. The wait can be cut short
//! through a [`CancelToken`].

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use crate::error::{CaptureError, CaptureResult};
use crate::timestamp::{self, FrameSlot, MAX_FRAME_RATE, TimestampId};

/// Source of local wall-clock readings.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

/// Local time as reported by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// One-shot relative timer used between slot boundaries.
pub trait SlotTimer: Send {
    /// Block for `duration` or until `cancel` fires. Returns `false` when
    /// the wait ended because of cancellation.
    fn wait(&mut self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Cooperative cancellation signal shared between the scheduler and
/// whoever wants to stop it. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    canceled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut canceled = self
            .inner
            .canceled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *canceled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_canceled(&self) -> bool {
        *self
            .inner
            .canceled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for at most `timeout`. Returns `true` if the token was (or
    /// became) canceled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut canceled = self
            .inner
            .canceled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if *canceled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .inner
                .signal
                .wait_timeout(canceled, deadline.duration_since(now))
                .unwrap_or_else(PoisonError::into_inner);
            canceled = guard;
        }
    }
}

/// Portable timer built on the cancel token's condition variable.
#[derive(Clone, Copy, Debug, Default)]
pub struct CondvarTimer;

impl SlotTimer for CondvarTimer {
    fn wait(&mut self, duration: Duration, cancel: &CancelToken) -> bool {
        !cancel.wait_timeout(duration)
    }
}

/// Why [`FrameScheduler::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerExit {
    /// The cancel token fired.
    Canceled,
    /// The tick callback asked to stop.
    Stopped,
}

pub struct FrameScheduler {
    frame_rate: u32,
    clock: Box<dyn Clock>,
    timer: Box<dyn SlotTimer>,
}

impl FrameScheduler {
    /// Create a scheduler on the local clock and the platform's
    /// high-resolution timer.
    pub fn new(frame_rate: u32) -> CaptureResult<Self> {
        validate_frame_rate(frame_rate)?;
        let timer = crate::platform::default_slot_timer()?;
        Ok(Self {
            frame_rate,
            clock: Box::new(LocalClock),
            timer,
        })
    }

    pub fn with_parts(
        frame_rate: u32,
        clock: Box<dyn Clock>,
        timer: Box<dyn SlotTimer>,
    ) -> CaptureResult<Self> {
        validate_frame_rate(frame_rate)?;
        Ok(Self {
            frame_rate,
            clock,
            timer,
        })
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Drive the tick loop until `on_tick` returns `false` or `cancel`
    /// fires.
    ///
    /// The slot the loop starts in is the baseline and is not delivered;
    /// the first tick fires when the next slot begins. Slots missed
    /// because of latency or clock jumps are not back-filled.
    pub fn run<F>(&mut self, cancel: &CancelToken, mut on_tick: F) -> SchedulerExit
    where
        F: FnMut(&TimestampId) -> bool,
    {
        let frame_rate = self.frame_rate;
        let start = self.clock.now();
        let mut current = slot_key(&start, frame_rate);
        tracing::debug!(
            frame_rate,
            baseline_slot = current.1.index(),
            "frame scheduler started"
        );

        loop {
            if cancel.is_canceled() {
                tracing::debug!("frame scheduler canceled");
                return SchedulerExit::Canceled;
            }

            let now = self.clock.now();
            let key = slot_key(&now, frame_rate);
            if key == current {
                let remaining = timestamp::until_next_slot(&now, key.1, frame_rate);
                if !self.timer.wait(remaining, cancel) {
                    tracing::debug!("frame scheduler canceled during slot wait");
                    return SchedulerExit::Canceled;
                }
                continue;
            }

            current = key;
            let id = TimestampId::new(&now, key.1, frame_rate);
            if !on_tick(&id) {
                tracing::debug!(last_tick = %id, "frame scheduler stopped by tick handler");
                return SchedulerExit::Stopped;
            }
        }
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("frame_rate", &self.frame_rate)
            .finish_non_exhaustive()
    }
}

fn slot_key(time: &NaiveDateTime, frame_rate: u32) -> (NaiveDateTime, FrameSlot) {
    (
        timestamp::truncate_to_second(time),
        FrameSlot::at(time, frame_rate),
    )
}

fn validate_frame_rate(frame_rate: u32) -> CaptureResult<()> {
    if frame_rate == 0 || frame_rate > MAX_FRAME_RATE {
        return Err(CaptureError::InvalidConfig(format!(
            "frame rate must be between 1 and {MAX_FRAME_RATE}, got {frame_rate}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{noon_plus_millis, simulated_scheduler};
    use std::collections::HashSet;

    #[test]
    fn rejects_out_of_range_frame_rates() {
        for rate in [0, MAX_FRAME_RATE + 1] {
            let result = FrameScheduler::with_parts(
                rate,
                Box::new(LocalClock),
                Box::new(CondvarTimer),
            );
            assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
        }
    }

    #[test]
    fn fires_once_per_slot_starting_after_baseline() {
        let (mut scheduler, _) = simulated_scheduler(10, noon_plus_millis(350), Duration::ZERO);
        let mut ids = Vec::new();
        let exit = scheduler.run(&CancelToken::new(), |id| {
            ids.push(id.to_string());
            ids.len() < 12
        });

        assert_eq!(exit, SchedulerExit::Stopped);
        assert_eq!(ids.first().map(String::as_str), Some("20240101_120000_4"));
        assert_eq!(ids[5], "20240101_120000_9");
        assert_eq!(ids[6], "20240101_120001_0");
        assert_eq!(ids.last().map(String::as_str), Some("20240101_120001_5"));

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn waits_target_the_next_boundary() {
        let start = noon_plus_millis(350) + chrono::Duration::microseconds(400);
        let (mut scheduler, waits) = simulated_scheduler(30, start, Duration::ZERO);
        let mut ticks = 0;
        scheduler.run(&CancelToken::new(), |_| {
            ticks += 1;
            ticks < 3
        });

        let waits = waits.lock().unwrap();
        // Slot 10 at 30 fps ends at ceil(11 * 1000 / 30) = 367 ms.
        assert_eq!(waits[0], Duration::from_micros(16_600));
        assert!(waits.iter().all(|wait| *wait <= Duration::from_millis(34)));
    }

    #[test]
    fn late_wakeups_skip_slots_without_duplicates() {
        let (mut scheduler, _) =
            simulated_scheduler(10, noon_plus_millis(0), Duration::from_millis(130));
        let mut seen = Vec::new();
        scheduler.run(&CancelToken::new(), |id| {
            seen.push((id.second(), id.slot()));
            seen.len() < 20
        });

        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), seen.len());
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        let skipped = seen
            .windows(2)
            .any(|pair| pair[0].0 == pair[1].0 && pair[1].1.index() - pair[0].1.index() > 1);
        assert!(skipped);
    }

    #[test]
    fn cancellation_before_run_delivers_nothing() {
        let (mut scheduler, _) = simulated_scheduler(30, noon_plus_millis(0), Duration::ZERO);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut ticks = 0;
        let exit = scheduler.run(&cancel, |_| {
            ticks += 1;
            true
        });
        assert_eq!(exit, SchedulerExit::Canceled);
        assert_eq!(ticks, 0);
    }

    #[test]
    fn cancellation_from_tick_handler_ends_the_loop() {
        let (mut scheduler, _) = simulated_scheduler(60, noon_plus_millis(0), Duration::ZERO);
        let cancel = CancelToken::new();
        let mut ticks = 0;
        let exit = scheduler.run(&cancel, |_| {
            ticks += 1;
            if ticks == 5 {
                cancel.cancel();
            }
            true
        });
        assert_eq!(exit, SchedulerExit::Canceled);
        assert_eq!(ticks, 5);
    }

    #[test]
    fn condvar_timer_wakes_on_cancel() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        let completed = CondvarTimer.wait(Duration::from_secs(30), &cancel);
        canceller.join().unwrap();

        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn condvar_timer_completes_short_waits() {
        let cancel = CancelToken::new();
        let started = Instant::now();
        assert!(CondvarTimer.wait(Duration::from_millis(5), &cancel));
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
