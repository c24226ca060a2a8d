//! Reading decoder output into tables

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use rayon::prelude::*;
use serde_json::Value;

use crate::config::TableConfig;
use crate::table::{Column, ColumnValues, Table};
use crate::types::{BmsError, Result};

/// Magnitude above which a measurement is treated as an error sentinel
pub const INVALID_MAGNITUDE: f64 = 2e24;

/// Read one JSON-lines file into a table
pub fn read_json_table(path: &Path, config: &TableConfig) -> Result<Table> {
    let file = File::open(path).map_err(|e| BmsError::io_at(path, e))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut dates = Vec::new();
    let mut names: Vec<String> = Vec::new();
    let mut cells: Vec<Vec<Option<Value>>> = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: serde_json::Map<String, Value> = serde_json::from_str(&line).map_err(|e| {
            BmsError::ConfigError(format!(
                "{}:{} is not a JSON object: {}",
                path.display(),
                line_no + 1,
                e
            ))
        })?;

        let timestamp = record
            .get("Timestamp")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                BmsError::ConfigError(format!(
                    "{}:{} has no numeric 'Timestamp'",
                    path.display(),
                    line_no + 1
                ))
            })?;
        let date = offset_date(config, timestamp).ok_or_else(|| {
            BmsError::ConfigError(format!(
                "{}:{} has a 'Timestamp' of {} outside the representable date range",
                path.display(),
                line_no + 1,
                timestamp
            ))
        })?;
        dates.push(date);

        let row = dates.len() - 1;
        for (key, value) in record {
            if key == "Timestamp" {
                continue;
            }
            let index = match names.iter().position(|n| *n == key) {
                Some(index) => index,
                None => {
                    names.push(key);
                    cells.push(vec![None; row]);
                    names.len() - 1
                }
            };
            let column = &mut cells[index];
            column.resize(row, None);
            column.push(if value.is_null() { None } else { Some(value) });
        }
    }

    let columns = names
        .into_iter()
        .zip(cells)
        .map(|(name, mut raw)| {
            raw.resize(dates.len(), None);
            let values = cast_column(&raw).unwrap_or_else(|| {
                log::info!("Column '{}' of {:?} is not numeric, kept as text", name, path);
                ColumnValues::Text(raw.iter().map(|cell| cell.as_ref().map(text_of)).collect())
            });
            Column { name, values }
        })
        .collect();

    log::debug!("Read {} rows from {:?}", dates.len(), path);
    Ok(Table { name, dates, columns })
}

/// `start_date + timestamp * factor` microseconds, `None` if it does not fit
fn offset_date(config: &TableConfig, timestamp: f64) -> Option<NaiveDateTime> {
    let micros = (timestamp * config.timestamp_factor as f64).round();
    if !micros.is_finite() || micros < i64::MIN as f64 || micros >= i64::MAX as f64 {
        return None;
    }
    config
        .start_date
        .checked_add_signed(Duration::microseconds(micros as i64))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Cast a raw column to 32-bit floats; `None` if any cell is not numeric
fn cast_column(raw: &[Option<Value>]) -> Option<ColumnValues> {
    let mut values = Vec::with_capacity(raw.len());
    for cell in raw {
        match cell {
            None => values.push(None),
            Some(value) => {
                let v = numeric(value)?;
                if v.abs() > INVALID_MAGNITUDE || !v.is_finite() {
                    values.push(None);
                } else {
                    values.push(Some(v as f32));
                }
            }
        }
    }
    Some(ColumnValues::Float(values))
}

/// JSON files to ingest: the file itself, or every `*.json` in a directory
fn json_files(data_path: &Path) -> Result<Vec<PathBuf>> {
    if data_path.is_file() {
        return Ok(vec![data_path.to_path_buf()]);
    }
    let entries = std::fs::read_dir(data_path).map_err(|e| BmsError::io_at(data_path, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(BmsError::ConfigError(format!(
            "No JSON files found in {}",
            data_path.display()
        )));
    }
    Ok(files)
}

/// Ingest a file or directory; files are read in parallel, order is kept
pub fn ingest_path(data_path: &Path, config: &TableConfig) -> Result<Vec<Table>> {
    let files = json_files(data_path)?;
    files
        .par_iter()
        .map(|path| read_json_table(path, config))
        .collect()
}
