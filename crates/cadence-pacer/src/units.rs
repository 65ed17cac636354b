//! # Semantic Time and Rate Units
//!
//! Strongly-typed quantities used throughout the pacer: [`Timestamp`],
//! [`TimeDelta`], [`DataSize`] and [`DataRate`]. All four are thin i64
//! newtypes (microseconds or bytes) with plus/minus-infinity sentinels, so
//! scheduling code can express "never" and "immediately" without `Option`
//! plumbing, and unit mistakes (bytes where a rate was meant) fail at
//! compile time instead of at runtime.
//!
//! Cross-type arithmetic is closed over the sentinels and never panics:
//! dividing by a zero rate yields `TimeDelta::plus_infinity()` ("never
//! drains"), products saturate.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

const MICROS_PER_SEC: i64 = 1_000_000;

// ─── TimeDelta ──────────────────────────────────────────────────────────────

/// A signed duration in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDelta(i64);

impl TimeDelta {
    pub const ZERO: TimeDelta = TimeDelta(0);

    pub const fn from_micros(us: i64) -> Self {
        TimeDelta(us)
    }

    pub const fn from_millis(ms: i64) -> Self {
        TimeDelta(ms.saturating_mul(1_000))
    }

    pub const fn from_seconds(s: i64) -> Self {
        TimeDelta(s.saturating_mul(MICROS_PER_SEC))
    }

    pub const fn plus_infinity() -> Self {
        TimeDelta(i64::MAX)
    }

    pub const fn minus_infinity() -> Self {
        TimeDelta(i64::MIN)
    }

    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX && self.0 != i64::MIN
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / 1_000
    }

    /// Clamp negative durations to zero (used for clock regressions).
    pub fn clamped_non_negative(self) -> Self {
        TimeDelta(self.0.max(0))
    }

    pub fn saturating_sub(self, rhs: TimeDelta) -> Self {
        if !self.is_finite() {
            return self;
        }
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Add for TimeDelta {
    type Output = TimeDelta;
    fn add(self, rhs: TimeDelta) -> TimeDelta {
        if !self.is_finite() {
            return self;
        }
        if !rhs.is_finite() {
            return rhs;
        }
        TimeDelta(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for TimeDelta {
    fn add_assign(&mut self, rhs: TimeDelta) {
        *self = *self + rhs;
    }
}

impl Sub for TimeDelta {
    type Output = TimeDelta;
    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        if !self.is_finite() {
            return self;
        }
        if !rhs.is_finite() {
            // Subtracting an infinity flips its sign.
            return TimeDelta(if rhs.0 == i64::MAX { i64::MIN } else { i64::MAX });
        }
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

/// Scale a duration by a dimensionless count (e.g. packets in a queue).
impl Mul<i64> for TimeDelta {
    type Output = TimeDelta;
    fn mul(self, rhs: i64) -> TimeDelta {
        if !self.is_finite() {
            return self;
        }
        TimeDelta(self.0.saturating_mul(rhs))
    }
}

impl Div<i64> for TimeDelta {
    type Output = TimeDelta;
    fn div(self, rhs: i64) -> TimeDelta {
        if !self.is_finite() || rhs == 0 {
            return TimeDelta::plus_infinity();
        }
        TimeDelta(self.0 / rhs)
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_finite() {
            return write!(f, "{}inf", if self.0 < 0 { "-" } else { "+" });
        }
        write!(f, "{}us", self.0)
    }
}

// ─── Timestamp ──────────────────────────────────────────────────────────────

/// An absolute point in time, microseconds since an arbitrary epoch.
///
/// `plus_infinity()` means "never", `minus_infinity()` means "already
/// happened" — both compare correctly against finite timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(us: i64) -> Self {
        Timestamp(us)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Timestamp(ms.saturating_mul(1_000))
    }

    pub const fn zero() -> Self {
        Timestamp(0)
    }

    pub const fn plus_infinity() -> Self {
        Timestamp(i64::MAX)
    }

    pub const fn minus_infinity() -> Self {
        Timestamp(i64::MIN)
    }

    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX && self.0 != i64::MIN
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// `self - rhs`, clamped at zero when `rhs` is in the future.
    pub fn saturating_duration_since(self, rhs: Timestamp) -> TimeDelta {
        (self - rhs).clamped_non_negative()
    }
}

impl Sub for Timestamp {
    type Output = TimeDelta;
    fn sub(self, rhs: Timestamp) -> TimeDelta {
        match (self.is_finite(), rhs.is_finite()) {
            (true, true) => TimeDelta(self.0.saturating_sub(rhs.0)),
            (false, _) => TimeDelta(self.0),
            (_, false) => TimeDelta(if rhs.0 == i64::MAX { i64::MIN } else { i64::MAX }),
        }
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: TimeDelta) -> Timestamp {
        if !self.is_finite() {
            return self;
        }
        if !rhs.is_finite() {
            return Timestamp(rhs.as_micros());
        }
        Timestamp(self.0.saturating_add(rhs.as_micros()))
    }
}

impl Sub<TimeDelta> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: TimeDelta) -> Timestamp {
        if !self.is_finite() {
            return self;
        }
        if !rhs.is_finite() {
            return Timestamp(if rhs.as_micros() == i64::MAX {
                i64::MIN
            } else {
                i64::MAX
            });
        }
        Timestamp(self.0.saturating_sub(rhs.as_micros()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_finite() {
            return write!(f, "{}inf", if self.0 < 0 { "-" } else { "+" });
        }
        write!(f, "t={}us", self.0)
    }
}

// ─── DataSize ───────────────────────────────────────────────────────────────

/// A non-negative byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataSize(i64);

impl DataSize {
    pub const ZERO: DataSize = DataSize(0);

    pub const fn bytes(b: i64) -> Self {
        DataSize(if b < 0 { 0 } else { b })
    }

    pub const fn plus_infinity() -> Self {
        DataSize(i64::MAX)
    }

    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn as_bytes(self) -> i64 {
        self.0
    }

    pub fn saturating_sub(self, rhs: DataSize) -> Self {
        if !self.is_finite() {
            return self;
        }
        DataSize(self.0.saturating_sub(rhs.0).max(0))
    }

    pub fn min(self, rhs: DataSize) -> Self {
        DataSize(self.0.min(rhs.0))
    }

    pub fn max(self, rhs: DataSize) -> Self {
        DataSize(self.0.max(rhs.0))
    }
}

impl Add for DataSize {
    type Output = DataSize;
    fn add(self, rhs: DataSize) -> DataSize {
        if !self.is_finite() || !rhs.is_finite() {
            return DataSize::plus_infinity();
        }
        DataSize(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        *self = *self + rhs;
    }
}

/// `size / delta = rate`. A zero or non-positive duration yields an
/// infinite rate.
impl Div<TimeDelta> for DataSize {
    type Output = DataRate;
    fn div(self, rhs: TimeDelta) -> DataRate {
        if !rhs.is_finite() {
            return DataRate::ZERO;
        }
        if rhs.as_micros() <= 0 || !self.is_finite() {
            return DataRate::plus_infinity();
        }
        let bps = (self.0 as i128 * MICROS_PER_SEC as i128) / rhs.as_micros() as i128;
        DataRate(bps.min(i64::MAX as i128) as i64)
    }
}

/// `size / rate = delta`. A zero rate never drains: the result is
/// `TimeDelta::plus_infinity()`.
impl Div<DataRate> for DataSize {
    type Output = TimeDelta;
    fn div(self, rhs: DataRate) -> TimeDelta {
        if !rhs.is_finite() {
            return TimeDelta::ZERO;
        }
        if rhs.0 == 0 || !self.is_finite() {
            return TimeDelta::plus_infinity();
        }
        let us = (self.0 as i128 * MICROS_PER_SEC as i128) / rhs.0 as i128;
        TimeDelta(us.min(i64::MAX as i128) as i64)
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_finite() {
            return write!(f, "+inf");
        }
        write!(f, "{}B", self.0)
    }
}

// ─── DataRate ───────────────────────────────────────────────────────────────

/// A transmission rate in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(i64);

impl DataRate {
    pub const ZERO: DataRate = DataRate(0);

    pub const fn bytes_per_sec(bps: i64) -> Self {
        DataRate(if bps < 0 { 0 } else { bps })
    }

    pub const fn kilobytes_per_sec(kbps: i64) -> Self {
        DataRate::bytes_per_sec(kbps.saturating_mul(1_000))
    }

    pub const fn plus_infinity() -> Self {
        DataRate(i64::MAX)
    }

    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn as_bytes_per_sec(self) -> i64 {
        self.0
    }

    pub fn min(self, rhs: DataRate) -> Self {
        DataRate(self.0.min(rhs.0))
    }

    pub fn max(self, rhs: DataRate) -> Self {
        DataRate(self.0.max(rhs.0))
    }
}

/// `rate * delta = size`. Negative durations clamp to zero bytes.
impl Mul<TimeDelta> for DataRate {
    type Output = DataSize;
    fn mul(self, rhs: TimeDelta) -> DataSize {
        if rhs.as_micros() <= 0 || self.0 == 0 {
            return DataSize::ZERO;
        }
        if !self.is_finite() || !rhs.is_finite() {
            return DataSize::plus_infinity();
        }
        let bytes = (self.0 as i128 * rhs.as_micros() as i128) / MICROS_PER_SEC as i128;
        DataSize(bytes.min(i64::MAX as i128) as i64)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_finite() {
            return write!(f, "+inf");
        }
        write!(f, "{}B/s", self.0)
    }
}
