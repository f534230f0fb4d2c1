//! Time intervals with optional bounds.
//!
//! An [`Interval`] is a single time span such as "from 2013 to 2014". Either
//! bound may be absent:
//!
//! - a missing `start` behaves as if the span reached infinitely far into the
//!   past,
//! - a missing `end` behaves as if it reached infinitely far into the future.
//!
//! An interval can also be *disabled*, in which case it behaves as fully
//! unbounded regardless of the bounds stored on it. This is how store-wide
//! windows are switched off without losing their configuration.
//!
//! Intersections that would produce `start > end` fail with
//! [`IntervalError::EmptyIntersection`]. Windowed reads treat that error as
//! "no data for this request"; [`Interval::overlap`] performs the conversion.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Errors produced when constructing, mutating or intersecting intervals.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum IntervalError {
    /// Bounds were supplied (or assigned) with `start > end`.
    #[snafu(display("Invalid interval: start {start} is after end {end}"))]
    InvalidOrder {
        /// Offending lower bound.
        start: DateTime<Utc>,
        /// Offending upper bound.
        end: DateTime<Utc>,
    },

    /// The two intervals do not share any instant.
    #[snafu(display("Intervals do not intersect (start {start} is after end {end})"))]
    EmptyIntersection {
        /// Start of the would-be intersection.
        start: DateTime<Utc>,
        /// End of the would-be intersection.
        end: DateTime<Utc>,
    },
}

impl IntervalError {
    /// True for the recoverable "intervals are disjoint" condition.
    pub fn is_empty_intersection(&self) -> bool {
        matches!(self, IntervalError::EmptyIntersection { .. })
    }
}

/// One conjunctive term of a range predicate over the timestamp index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundTerm {
    /// `timestamp >= bound`
    AtOrAfter(DateTime<Utc>),
    /// `timestamp < bound`
    Before(DateTime<Utc>),
}

impl BoundTerm {
    /// Evaluate the term for a single timestamp.
    pub fn matches(&self, ts: DateTime<Utc>) -> bool {
        match *self {
            BoundTerm::AtOrAfter(bound) => ts >= bound,
            BoundTerm::Before(bound) => ts < bound,
        }
    }
}

impl fmt::Display for BoundTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundTerm::AtOrAfter(bound) => write!(f, "index >= {bound}"),
            BoundTerm::Before(bound) => write!(f, "index < {bound}"),
        }
    }
}

/// A time span, possibly open-ended on either side, with an enable flag.
///
/// Equality compares the *effective* bounds, so a disabled interval equals
/// [`Interval::unbounded`] whatever it stores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub struct Interval {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    enabled: bool,
}

impl Interval {
    /// Build an interval, failing if both bounds are set and `start > end`.
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, IntervalError> {
        if let (Some(start), Some(end)) = (start, end) {
            ensure!(start <= end, InvalidOrderSnafu { start, end });
        }
        Ok(Self {
            start,
            end,
            enabled: true,
        })
    }

    /// Build a closed interval `[start, end]`.
    pub fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, IntervalError> {
        Self::new(Some(start), Some(end))
    }

    /// Smallest interval containing both instants, in whichever order given.
    pub fn spanning(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        Self {
            start: Some(a.min(b)),
            end: Some(a.max(b)),
            enabled: true,
        }
    }

    /// The fully unbounded interval.
    pub const fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
            enabled: true,
        }
    }

    /// Interval with only a lower bound.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            ..Self::unbounded()
        }
    }

    /// Interval with only an upper bound.
    pub fn ending_at(end: DateTime<Utc>) -> Self {
        Self {
            end: Some(end),
            ..Self::unbounded()
        }
    }

    /// Effective lower bound (`None` when unset or when disabled).
    pub fn start(&self) -> Option<DateTime<Utc>> {
        if self.enabled { self.start } else { None }
    }

    /// Effective upper bound (`None` when unset or when disabled).
    pub fn end(&self) -> Option<DateTime<Utc>> {
        if self.enabled { self.end } else { None }
    }

    /// Whether the stored bounds are in effect.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Switch the stored bounds on or off without forgetting them.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Replace the lower bound.
    ///
    /// Checked against the upper bound stored on this instance, whether or
    /// not the interval is currently enabled.
    pub fn set_start(&mut self, start: Option<DateTime<Utc>>) -> Result<(), IntervalError> {
        if let (Some(start), Some(end)) = (start, self.end) {
            ensure!(start <= end, InvalidOrderSnafu { start, end });
        }
        self.start = start;
        Ok(())
    }

    /// Replace the upper bound. See [`Interval::set_start`].
    pub fn set_end(&mut self, end: Option<DateTime<Utc>>) -> Result<(), IntervalError> {
        if let (Some(start), Some(end)) = (self.start, end) {
            ensure!(start <= end, InvalidOrderSnafu { start, end });
        }
        self.end = end;
        Ok(())
    }

    /// Unset both bounds.
    pub fn clear(&mut self) {
        self.start = None;
        self.end = None;
    }

    /// True when at least one effective bound is set.
    pub fn is_bounded(&self) -> bool {
        self.start().is_some() || self.end().is_some()
    }

    /// `end - start`, when both effective bounds are set.
    pub fn duration(&self) -> Option<Duration> {
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Half-open membership test: `start <= ts < end`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.query_bounds().iter().all(|term| term.matches(ts))
    }

    /// Intersect with `other`.
    ///
    /// Missing bounds act as -inf / +inf, and a disabled interval contributes
    /// no bounds at all. The result is always enabled.
    pub fn intersect(&self, other: &Interval) -> Result<Interval, IntervalError> {
        let start = match (self.start(), other.start()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end(), other.end()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        if let (Some(start), Some(end)) = (start, end) {
            ensure!(start <= end, EmptyIntersectionSnafu { start, end });
        }

        Ok(Interval {
            start,
            end,
            enabled: true,
        })
    }

    /// Like [`Interval::intersect`], mapping an empty intersection to `None`.
    pub fn overlap(&self, other: &Interval) -> Option<Interval> {
        self.intersect(other).ok()
    }

    /// Predicate terms pushing this interval into a range read.
    ///
    /// Terms are conjunctive; an absent bound contributes no term, so an
    /// unbounded interval yields an empty list.
    pub fn query_bounds(&self) -> Vec<BoundTerm> {
        let mut terms = Vec::with_capacity(2);
        if let Some(start) = self.start() {
            terms.push(BoundTerm::AtOrAfter(start));
        }
        if let Some(end) = self.end() {
            terms.push(BoundTerm::Before(end));
        }
        terms
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        self.start() == other.start() && self.end() == other.end()
    }
}

impl Eq for Interval {}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start() {
            Some(start) => write!(f, "[{}", start.to_rfc3339())?,
            None => write!(f, "(-inf")?,
        }
        match self.end() {
            Some(end) => write!(f, ", {})", end.to_rfc3339()),
            None => write!(f, ", +inf)"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct IntervalRepr {
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<IntervalRepr> for Interval {
    type Error = IntervalError;

    fn try_from(repr: IntervalRepr) -> Result<Self, Self::Error> {
        let mut interval = Interval::new(repr.start, repr.end)?;
        interval.set_enabled(repr.enabled);
        Ok(interval)
    }
}

impl From<Interval> for IntervalRepr {
    fn from(interval: Interval) -> Self {
        IntervalRepr {
            start: interval.start,
            end: interval.end,
            enabled: interval.enabled,
        }
    }
}
