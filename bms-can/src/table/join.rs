//! Backward as-of join on `Date`

use crate::table::{Column, Table};
use crate::types::{BmsError, Result};

/// Row of `right_dates` matched by each left date
///
/// The match is the last right row with `right <= left` and
/// `left - right <= tolerance_us`. `right_dates` must be sorted.
pub fn asof_rows(
    left_dates: &[chrono::NaiveDateTime],
    right_dates: &[chrono::NaiveDateTime],
    tolerance_us: i64,
) -> Vec<Option<usize>> {
    left_dates
        .iter()
        .map(|left| {
            let end = right_dates.partition_point(|right| right <= left);
            let candidate = end.checked_sub(1)?;
            let gap = (*left - right_dates[candidate]).num_microseconds()?;
            (gap <= tolerance_us).then_some(candidate)
        })
        .collect()
}

/// Join every table onto the first one that has the `anchor` column
///
/// Only the sign-less tolerance is used. Columns of right tables whose name
/// is already taken get a `_right` suffix.
pub fn join_asof(tables: Vec<Table>, anchor: &str, tolerance: i64) -> Result<Table> {
    let left_index = tables
        .iter()
        .position(|t| t.has_column(anchor))
        .ok_or_else(|| {
            BmsError::ConfigError(format!(
                "No table contains the column '{}' given as 'join_on'.",
                anchor
            ))
        })?;

    let mut tables = tables;
    let mut left = tables.remove(left_index);
    left.sort_by_date();
    let tolerance_us = tolerance.saturating_abs();

    for mut right in tables {
        right.sort_by_date();
        let rows = asof_rows(&left.dates, &right.dates, tolerance_us);
        log::debug!(
            "Joining '{}' onto '{}': {} of {} rows matched",
            right.name,
            left.name,
            rows.iter().filter(|r| r.is_some()).count(),
            rows.len()
        );

        for column in right.columns {
            let mut name = column.name;
            while left.has_column(&name) {
                name.push_str("_right");
            }
            left.columns.push(Column {
                name,
                values: column.values.take(&rows),
            });
        }
    }

    Ok(left)
}
