//! Tabular joiner
//!
//! Converts the per-message JSON files written by the frame decoder into
//! columnar tables with a wall-clock `Date` column, optionally joins them
//! as-of on `Date`, and writes CSV or Parquet.

pub mod ingest;
pub mod join;
pub mod output;

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::config::{OutputFormat, TableConfig};
use crate::types::{BmsError, Result};

pub use ingest::{ingest_path, read_json_table};
pub use join::join_asof;
pub use output::write_tables;

/// Values of one column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Float(Vec<Option<f32>>),
    Text(Vec<Option<String>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Float(values) => values.len(),
            ColumnValues::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick rows by index; `None` yields a null cell
    pub fn take(&self, rows: &[Option<usize>]) -> ColumnValues {
        match self {
            ColumnValues::Float(values) => ColumnValues::Float(
                rows.iter()
                    .map(|row| row.and_then(|i| values[i]))
                    .collect(),
            ),
            ColumnValues::Text(values) => ColumnValues::Text(
                rows.iter()
                    .map(|row| row.and_then(|i| values[i].clone()))
                    .collect(),
            ),
        }
    }

    /// Cell rendered as text, empty for null
    pub fn cell_text(&self, row: usize) -> String {
        match self {
            ColumnValues::Float(values) => values[row].map(|v| v.to_string()).unwrap_or_default(),
            ColumnValues::Text(values) => values[row].clone().unwrap_or_default(),
        }
    }
}

/// Named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

/// A table keyed by `Date`
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Name of the source file without extension
    pub name: String,
    pub dates: Vec<NaiveDateTime>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn num_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Stable sort of all rows by `Date`
    pub fn sort_by_date(&mut self) {
        if self.dates.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut order: Vec<usize> = (0..self.dates.len()).collect();
        order.sort_by_key(|&i| self.dates[i]);
        let rows: Vec<Option<usize>> = order.iter().map(|&i| Some(i)).collect();

        self.dates = order.iter().map(|&i| self.dates[i]).collect();
        for column in &mut self.columns {
            column.values = column.values.take(&rows);
        }
    }
}

/// Join the ingested tables as the configuration asks
///
/// A single table passes through. Several tables are joined on `join_on`;
/// without it they are only allowed when each one gets its own file.
pub fn combine_tables(tables: Vec<Table>, config: &TableConfig, single_file: bool) -> Result<Vec<Table>> {
    if tables.len() <= 1 {
        return Ok(tables);
    }
    match &config.join_on {
        Some(anchor) => Ok(vec![join_asof(tables, anchor, config.tolerance)?]),
        None if single_file => Err(BmsError::ConfigError(
            "Several tables found but 'join_on' is not defined in the configuration file."
                .to_string(),
        )),
        None => Ok(tables),
    }
}

/// Run the whole pipeline: ingest, join and write
pub fn run_table(data_path: &Path, config: &TableConfig, output: &Path) -> Result<Vec<PathBuf>> {
    let tables = ingest_path(data_path, config)?;
    log::info!("Ingested {} tables from {:?}", tables.len(), data_path);

    let single_file = OutputFormat::from_path(output).is_some();
    let tables = combine_tables(tables, config, single_file)?;
    let written = write_tables(&tables, output, config.output_format)?;
    for path in &written {
        log::info!("Table written to {:?}", path);
    }
    Ok(written)
}
