//! Timestamp filtering for range reads.
//!
//! A [`TimeFilter`] is an interval's [`BoundTerm`]s converted into the
//! integer unit of one particular on-disk time column. [`time_mask`] then
//! evaluates it over a timestamp array with Arrow's comparison kernels.
//!
//! Two details matter here:
//!
//! 1. **Unit conversion rounds up.** Both terms are strict on the
//!    sub-unit remainder: `ts >= 10.5s` and `ts < 10.5s` over a seconds
//!    column are exactly `ts >= 11` and `ts < 11`. Rounding both bounds up
//!    keeps half-open semantics exact for coarse units.
//!
//! 2. **Scalar bounds.** Each bound is a 1-element array carrying the
//!    column's timezone, wrapped in `Scalar`, so the kernels broadcast it
//!    instead of comparing against a full-length repeated array.
//!
//! Null timestamps never match.

use arrow::array::{
    Array, BooleanArray, Scalar, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::compute::kernels::{boolean as boolean_kernels, cmp as cmp_kernels};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::error::ArrowError;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::interval::BoundTerm;
use crate::store::error::{StoreResult, TimeConversionOverflowSnafu, UnsupportedTimeTypeSnafu};

/// Interval bounds expressed in a time column's own unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeFilter {
    unit: TimeUnit,
    lower: Option<i64>,
    upper: Option<i64>,
}

impl TimeFilter {
    /// Convert `terms` for a time column of type `datatype`.
    pub(crate) fn new(
        key: &str,
        column: &str,
        datatype: &DataType,
        terms: &[BoundTerm],
    ) -> StoreResult<Self> {
        let unit = match datatype {
            DataType::Timestamp(unit, _) => *unit,
            other => {
                return UnsupportedTimeTypeSnafu {
                    key,
                    column,
                    datatype: other.clone(),
                }
                .fail();
            }
        };

        let mut filter = TimeFilter {
            unit,
            lower: None,
            upper: None,
        };
        for term in terms {
            match *term {
                BoundTerm::AtOrAfter(ts) => filter.lower = Some(to_unit_ceil(key, ts, unit)?),
                BoundTerm::Before(ts) => filter.upper = Some(to_unit_ceil(key, ts, unit)?),
            }
        }
        Ok(filter)
    }

    /// True when no bound applies.
    #[cfg(test)]
    pub(crate) fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }
}

fn to_unit_ceil(key: &str, ts: DateTime<Utc>, unit: TimeUnit) -> StoreResult<i64> {
    let nanos = i128::from(ts.timestamp()) * 1_000_000_000 + i128::from(ts.timestamp_subsec_nanos());
    let per_unit: i128 = match unit {
        TimeUnit::Second => 1_000_000_000,
        TimeUnit::Millisecond => 1_000_000,
        TimeUnit::Microsecond => 1_000,
        TimeUnit::Nanosecond => 1,
    };
    let mut value = nanos.div_euclid(per_unit);
    if nanos.rem_euclid(per_unit) != 0 {
        value += 1;
    }
    i64::try_from(value)
        .ok()
        .context(TimeConversionOverflowSnafu { key, timestamp: ts })
}

/// Build the `lower <= ts < upper` mask for one timestamp array type.
macro_rules! bounds_mask {
    ($array_ty:ty, $column:expr, $filter:expr) => {{
        let ts_arr = $column
            .as_any()
            .downcast_ref::<$array_ty>()
            .ok_or_else(|| {
                ArrowError::CastError(format!(
                    "time column is {}, expected {}",
                    $column.data_type(),
                    stringify!($array_ty)
                ))
            })?;

        // Scalars must carry the column's timezone or the kernels reject them.
        let tz_opt = match ts_arr.data_type() {
            DataType::Timestamp(_, tz_opt) => tz_opt.clone(),
            _ => None,
        };

        let mut mask = boolean_kernels::is_not_null(ts_arr)?;

        if let Some(lower) = $filter.lower {
            let start = Scalar::new(<$array_ty>::from(vec![lower]).with_timezone_opt(tz_opt.clone()));
            let ge_mask = cmp_kernels::gt_eq(ts_arr, &start)?;
            mask = boolean_kernels::and(&mask, &ge_mask)?;
        }

        if let Some(upper) = $filter.upper {
            let end = Scalar::new(<$array_ty>::from(vec![upper]).with_timezone_opt(tz_opt));
            let lt_mask = cmp_kernels::lt(ts_arr, &end)?;
            mask = boolean_kernels::and(&mask, &lt_mask)?;
        }

        Ok::<BooleanArray, ArrowError>(mask)
    }};
}

/// Rows of `column` that fall inside `filter`.
pub(crate) fn time_mask(column: &dyn Array, filter: &TimeFilter) -> Result<BooleanArray, ArrowError> {
    match filter.unit {
        TimeUnit::Second => bounds_mask!(TimestampSecondArray, column, filter),
        TimeUnit::Millisecond => bounds_mask!(TimestampMillisecondArray, column, filter),
        TimeUnit::Microsecond => bounds_mask!(TimestampMicrosecondArray, column, filter),
        TimeUnit::Nanosecond => bounds_mask!(TimestampNanosecondArray, column, filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestResult, secs};
    use chrono::Duration;

    #[test]
    fn bounds_round_up_to_coarser_units() -> TestResult {
        let half = secs(10) + Duration::milliseconds(500);
        let terms = [BoundTerm::AtOrAfter(half), BoundTerm::Before(half)];
        let filter = TimeFilter::new("k", "ts", &DataType::Timestamp(TimeUnit::Second, None), &terms)?;

        let expected = secs(11).timestamp();
        assert_eq!(filter.lower, Some(expected));
        assert_eq!(filter.upper, Some(expected));
        Ok(())
    }

    #[test]
    fn exact_bounds_are_unchanged() -> TestResult {
        let terms = [BoundTerm::AtOrAfter(secs(1))];
        let filter = TimeFilter::new(
            "k",
            "ts",
            &DataType::Timestamp(TimeUnit::Millisecond, None),
            &terms,
        )?;
        assert_eq!(filter.lower, Some(secs(1).timestamp_millis()));
        assert_eq!(filter.upper, None);
        assert!(!filter.is_unbounded());
        Ok(())
    }

    #[test]
    fn rejects_non_timestamp_columns() {
        let err = TimeFilter::new("k", "ts", &DataType::Int64, &[]).expect_err("int time column");
        assert!(matches!(
            err,
            crate::store::StoreError::UnsupportedTimeType { .. }
        ));
    }

    #[test]
    fn nanosecond_overflow_is_reported() {
        let far = DateTime::<Utc>::MAX_UTC;
        let err = TimeFilter::new(
            "k",
            "ts",
            &DataType::Timestamp(TimeUnit::Nanosecond, None),
            &[BoundTerm::Before(far)],
        )
        .expect_err("overflow");
        assert!(matches!(
            err,
            crate::store::StoreError::TimeConversionOverflow { .. }
        ));
    }

    #[test]
    fn mask_is_half_open_and_drops_nulls() -> TestResult {
        let column = TimestampSecondArray::from(vec![
            Some(secs(0).timestamp()),
            Some(secs(1).timestamp()),
            None,
            Some(secs(2).timestamp()),
            Some(secs(3).timestamp()),
        ]);
        let filter = TimeFilter::new(
            "k",
            "ts",
            column.data_type(),
            &[BoundTerm::AtOrAfter(secs(1)), BoundTerm::Before(secs(3))],
        )?;

        let mask = time_mask(&column, &filter)?;
        let kept: Vec<bool> = (0..mask.len()).map(|i| mask.is_valid(i) && mask.value(i)).collect();
        assert_eq!(kept, vec![false, true, false, true, false]);
        assert_eq!(mask.true_count(), 2);

        let unbounded = TimeFilter::new("k", "ts", column.data_type(), &[])?;
        assert!(unbounded.is_unbounded());
        assert_eq!(time_mask(&column, &unbounded)?.true_count(), 4);
        Ok(())
    }
}
