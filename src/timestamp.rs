//! Frame slot arithmetic and timestamp identifiers.
//!
//! A second is split into `frame_rate` equal slots. The slot for a
//! wall-clock reading is `floor(millis * frame_rate / 1000)`, where
//! `millis` is the sub-second part of the reading. A [`TimestampId`]
//! names a fired slot and doubles as the output file stem.

use std::fmt;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};

/// Highest supported frame rate. Slots are derived from whole
/// milliseconds, so faster rates would produce empty slots.
pub const MAX_FRAME_RATE: u32 = 1000;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Index of a sub-second slice, in `0..frame_rate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameSlot(u32);

impl FrameSlot {
    pub fn from_millis(millis: u32, frame_rate: u32) -> Self {
        let millis = u64::from(millis.min(999));
        Self((millis * u64::from(frame_rate) / 1000) as u32)
    }

    /// Slot containing the given wall-clock reading.
    pub fn at(time: &NaiveDateTime, frame_rate: u32) -> Self {
        Self::from_millis(sub_second_millis(time), frame_rate)
    }

    pub const fn index(self) -> u32 {
        self.0
    }

    /// Millisecond offset within the second at which the slot after this
    /// one begins. For the last slot this is `1000`, the next second.
    pub fn next_boundary_millis(self, frame_rate: u32) -> u32 {
        let numerator = (u64::from(self.0) + 1) * 1000;
        numerator.div_ceil(u64::from(frame_rate)).min(1000) as u32
    }
}

/// Sub-second part of a reading in whole milliseconds. Leap-second
/// readings (nanos >= 1e9) clamp to the last millisecond.
pub fn sub_second_millis(time: &NaiveDateTime) -> u32 {
    (time.nanosecond() / NANOS_PER_MILLI as u32).min(999)
}

/// Time left until the slot after `slot` starts, measured from `time`.
pub fn until_next_slot(time: &NaiveDateTime, slot: FrameSlot, frame_rate: u32) -> Duration {
    let boundary_nanos = u64::from(slot.next_boundary_millis(frame_rate)) * NANOS_PER_MILLI;
    let now_nanos = u64::from(time.nanosecond().min(999_999_999));
    Duration::from_nanos(boundary_nanos.saturating_sub(now_nanos))
}

/// Number of decimal digits needed to print the highest slot index.
pub fn slot_digits(frame_rate: u32) -> usize {
    let mut highest = frame_rate.saturating_sub(1);
    let mut digits = 1;
    while highest >= 10 {
        highest /= 10;
        digits += 1;
    }
    digits
}

/// Logical id of a fired tick: `YYYYMMDD_HHMMSS_<slot>`, with the slot
/// zero-padded to the width of `frame_rate - 1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimestampId {
    second: NaiveDateTime,
    slot: FrameSlot,
    slot_width: usize,
}

impl TimestampId {
    pub fn new(time: &NaiveDateTime, slot: FrameSlot, frame_rate: u32) -> Self {
        Self {
            second: truncate_to_second(time),
            slot,
            slot_width: slot_digits(frame_rate),
        }
    }

    /// The wall-clock second the tick fell in.
    pub fn second(&self) -> NaiveDateTime {
        self.second
    }

    pub fn slot(&self) -> FrameSlot {
        self.slot
    }

    pub fn file_name(&self) -> String {
        format!("{self}.png")
    }
}

impl fmt::Display for TimestampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{:0width$}",
            self.second.format("%Y%m%d_%H%M%S"),
            self.slot.index(),
            width = self.slot_width
        )
    }
}

pub(crate) fn truncate_to_second(time: &NaiveDateTime) -> NaiveDateTime {
    time.with_nanosecond(0).unwrap_or(*time)
}
