//! Presence windowing over per-month day bitmasks.
//!
//! Network observations are stored as one row per (triplet, month) with a
//! 31-bit mask recording which days of the month the triplet was seen on.
//! Condition evaluation and list generation ask a narrower question: was the
//! triplet present inside an arbitrary `[start, end)` calendar window that may
//! span several encoded months? `DayBitmask::within_window` answers it by
//! clearing the bits that fall outside the window.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// All 31 day bits. Bit `i - 1` means "seen on day `i` of the month".
///
/// The top bit of the `u32` representation is never used; inputs are masked
/// defensively so a corrupted sign bit can never leak through shifts.
const DAY_BITS: u32 = 0x7FFF_FFFF;

/// Half-open calendar window `[start, end)` used for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl AnalysisWindow {
    /// Creates a window from two dates.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAnalysisWindow` if `start >= end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::InvalidAnalysisWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates the window covering the `lookback_days` days before `end`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAnalysisWindow` if `lookback_days` is
    /// zero or the subtraction leaves the calendar range.
    pub fn lookback(end: NaiveDate, lookback_days: u32) -> Result<Self, ValidationError> {
        let start = end
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .ok_or(ValidationError::InvalidAnalysisWindow { start: end, end })?;
        Self::new(start, end)
    }

    /// Start of the window (inclusive).
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// End of the window (exclusive).
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Check if a date falls within `[start, end)`.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Check if the date span `[first, last]` overlaps this window.
    #[must_use]
    pub fn overlaps_span(&self, first: NaiveDate, last: NaiveDate) -> bool {
        last >= self.start && first < self.end
    }
}

/// Per-month day-presence bitmask. Bit 0 = day 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayBitmask(u32);

impl DayBitmask {
    /// The empty mask: not seen on any day.
    pub const EMPTY: Self = Self(0);

    /// Wraps a raw mask, discarding anything outside the 31 day bits.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw & DAY_BITS)
    }

    /// Builds a mask from 1-based days of month.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DayOutOfRange` for days outside `[1, 31]`.
    pub fn from_days<I>(days: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut mask = Self::EMPTY;
        for day in days {
            mask.set_day(day)?;
        }
        Ok(mask)
    }

    /// Marks a 1-based day of month as seen.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DayOutOfRange` for days outside `[1, 31]`.
    pub fn set_day(&mut self, day: u32) -> Result<(), ValidationError> {
        if !(1..=31).contains(&day) {
            return Err(ValidationError::DayOutOfRange { day });
        }
        self.0 |= 1 << (day - 1);
        Ok(())
    }

    /// Returns true if the 1-based day of month is marked as seen.
    #[must_use]
    pub const fn contains_day(self, day: u32) -> bool {
        day >= 1 && day <= 31 && (self.0 >> (day - 1)) & 1 == 1
    }

    /// Number of days marked as seen.
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Returns true if no day is marked.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Iterates the 1-based days marked as seen, ascending.
    pub fn days(self) -> impl Iterator<Item = u32> {
        (1..=31).filter(move |&day| self.contains_day(day))
    }

    /// Raw 31-bit value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Masks out the days that fall outside `window`.
    ///
    /// `first_seen` and `last_seen` are the first/last calendar dates actually
    /// observed in the month this mask encodes. Four cases, by whether they
    /// fall outside the window on the left and/or right:
    ///
    /// - both inside the window: mask unchanged;
    /// - `first_seen` before the window start: bits for days before the start's
    ///   day-of-month are cleared;
    /// - `last_seen` on/after the window end: bits for days on/after the end's
    ///   day-of-month are cleared;
    /// - both: both clears apply.
    ///
    /// A fully-cleared result is a valid answer: not present in the window.
    /// Windowing an already-windowed mask against the same window returns the
    /// same mask.
    #[must_use]
    pub fn within_window(
        self,
        first_seen: NaiveDate,
        last_seen: NaiveDate,
        window: &AnalysisWindow,
    ) -> Self {
        let mut bits = self.0 & DAY_BITS;
        if first_seen < window.start() {
            // Clear days strictly before the window start's day-of-month.
            bits &= (DAY_BITS << (window.start().day() - 1)) & DAY_BITS;
        }
        if last_seen >= window.end() {
            // Clear days on/after the window end's day-of-month (end exclusive).
            bits &= (1u32 << (window.end().day() - 1)) - 1;
        }
        Self(bits & DAY_BITS)
    }
}

impl std::fmt::Display for DayBitmask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:031b}", self.0)
    }
}
