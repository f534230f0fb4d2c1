//! Per-period statistic accumulators.
//!
//! A [`Results`] collects the statistics a stage computes for each chunk.
//! Each entry covers one period and holds named `f64` values drawn from the
//! vocabulary of its [`StatisticKind`]. Entries never overlap and are
//! always ordered by period start.
//!
//! Two periods overlap when they share a start, or when their intersection
//! has a positive length. Periods that only touch at an endpoint, like
//! `[0, 10]` and `[10, 20]`, are accepted: consecutive chunks produce
//! exactly that shape.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use snafu::prelude::*;

use crate::interval::Interval;

/// The closed set of statistic families a stage can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticKind {
    /// Energy in kWh per power type.
    Energy,
    /// Gap count and total gap duration.
    Gaps,
}

impl StatisticKind {
    /// Names accepted in records of this kind.
    pub fn allowed(&self) -> &'static [&'static str] {
        match self {
            StatisticKind::Energy => &["active", "apparent", "reactive"],
            StatisticKind::Gaps => &["gap_count", "gap_seconds"],
        }
    }

    /// True when `name` belongs to this kind's vocabulary.
    pub fn allows(&self, name: &str) -> bool {
        self.allowed().contains(&name)
    }
}

impl fmt::Display for StatisticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatisticKind::Energy => f.write_str("energy"),
            StatisticKind::Gaps => f.write_str("gaps"),
        }
    }
}

/// Errors raised while appending or merging results.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum ResultsError {
    /// A value name is outside the kind's vocabulary.
    #[snafu(display("{name} is not a recognised {kind} statistic"))]
    UnknownStatistic {
        /// Kind of the receiving accumulator.
        kind: StatisticKind,
        /// The rejected name.
        name: String,
    },

    /// The period overlaps one already stored.
    #[snafu(display("Period overlaps existing entry {intersection}"))]
    OverlappingPeriod {
        /// Where the two periods meet.
        intersection: Interval,
    },

    /// The period is missing a start or an end.
    #[snafu(display("Result periods must be bounded on both sides, got {period}"))]
    UnboundedPeriod {
        /// The rejected period.
        period: Interval,
    },

    /// Results of different kinds cannot be merged.
    #[snafu(display("Cannot merge {found} results into {expected} results"))]
    KindMismatch {
        /// Kind of the receiving accumulator.
        expected: StatisticKind,
        /// Kind of the incoming accumulator.
        found: StatisticKind,
    },
}

/// One stored entry: a closed period and its values.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRecord {
    /// Period start.
    pub start: DateTime<Utc>,
    /// Period end.
    pub end: DateTime<Utc>,
    /// Named statistic values.
    pub values: BTreeMap<String, f64>,
}

impl PeriodRecord {
    /// The record's period as an interval.
    pub fn interval(&self) -> Interval {
        Interval::spanning(self.start, self.end)
    }

    /// Shared instants with `[start, end]`. Periods of positive length may
    /// touch at one endpoint; an instant period may not touch anything.
    fn conflict(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Interval> {
        let lo = self.start.max(start);
        let hi = self.end.min(end);
        let instant = self.start == self.end || start == end;
        if self.start == start || lo < hi || (instant && lo == hi) {
            Some(Interval::spanning(lo, hi))
        } else {
            None
        }
    }
}

/// Non-overlapping, start-ordered statistics of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Results {
    kind: StatisticKind,
    periods: BTreeMap<DateTime<Utc>, PeriodRecord>,
}

impl Results {
    /// Empty accumulator of `kind`.
    pub fn new(kind: StatisticKind) -> Self {
        Self {
            kind,
            periods: BTreeMap::new(),
        }
    }

    /// Empty energy accumulator.
    pub fn energy() -> Self {
        Self::new(StatisticKind::Energy)
    }

    /// Empty gaps accumulator.
    pub fn gaps() -> Self {
        Self::new(StatisticKind::Gaps)
    }

    /// Statistic family of this accumulator.
    pub fn kind(&self) -> StatisticKind {
        self.kind
    }

    /// Number of stored periods.
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Store `values` for `period`.
    ///
    /// Fails without modifying `self` if a name is unknown, the period is
    /// not bounded on both sides, or it overlaps a stored period.
    pub fn append<I, K>(&mut self, period: &Interval, values: I) -> Result<(), ResultsError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let (Some(start), Some(end)) = (period.start(), period.end()) else {
            return UnboundedPeriodSnafu { period: *period }.fail();
        };

        let mut checked = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            ensure!(
                self.kind.allows(&name),
                UnknownStatisticSnafu {
                    kind: self.kind,
                    name,
                }
            );
            checked.insert(name, value);
        }

        if let Some(intersection) = self.periods.values().find_map(|r| r.conflict(start, end)) {
            return OverlappingPeriodSnafu { intersection }.fail();
        }

        self.periods.insert(
            start,
            PeriodRecord {
                start,
                end,
                values: checked,
            },
        );
        Ok(())
    }

    /// Append every record of `other`.
    ///
    /// All or nothing: on error `self` is left as it was.
    pub fn update(&mut self, other: &Results) -> Result<(), ResultsError> {
        ensure!(
            self.kind == other.kind,
            KindMismatchSnafu {
                expected: self.kind,
                found: other.kind,
            }
        );

        let mut merged = self.clone();
        for record in other.periods.values() {
            merged.append(
                &record.interval(),
                record.values.iter().map(|(k, v)| (k.as_str(), *v)),
            )?;
        }
        *self = merged;
        Ok(())
    }

    /// Sum of each named value over every period.
    pub fn combined(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for record in self.periods.values() {
            for (name, value) in &record.values {
                *totals.entry(name.clone()).or_insert(0.0) += value;
            }
        }
        totals
    }

    /// Copy of every record, ordered by start.
    pub fn per_period(&self) -> Vec<PeriodRecord> {
        self.periods.values().cloned().collect()
    }

    /// From the first start to the last end.
    pub fn timespan(&self) -> Option<Interval> {
        let first = self.periods.values().next()?;
        let last_end = self.periods.values().map(|r| r.end).max()?;
        Some(Interval::spanning(first.start, last_end))
    }

    /// Total length covered by the stored periods.
    pub fn covered(&self) -> Duration {
        self.periods
            .values()
            .fold(Duration::zero(), |acc, r| acc + (r.end - r.start))
    }
}
