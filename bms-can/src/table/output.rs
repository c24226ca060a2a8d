//! CSV and Parquet writers

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::data_type::{ByteArray, ByteArrayType, FloatType, Int64Type};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;

use crate::config::OutputFormat;
use crate::table::{ColumnValues, Table};
use crate::types::{BmsError, Result};

/// Text format of the `Date` column in CSV
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

fn csv_error(path: &Path, err: csv::Error) -> BmsError {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => BmsError::io_at(path, e),
        other => BmsError::IoError(std::io::Error::other(format!(
            "{}: {:?}",
            path.display(),
            other
        ))),
    }
}

fn parquet_error(path: &Path, err: ParquetError) -> BmsError {
    BmsError::IoError(std::io::Error::other(format!("{}: {}", path.display(), err)))
}

/// Write a table as CSV with a leading `Date` column
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;

    let mut header = vec!["Date".to_string()];
    header.extend(table.columns.iter().map(|c| c.name.clone()));
    writer.write_record(&header).map_err(|e| csv_error(path, e))?;

    for row in 0..table.num_rows() {
        let mut record = Vec::with_capacity(header.len());
        record.push(table.dates[row].format(DATE_FORMAT).to_string());
        record.extend(table.columns.iter().map(|c| c.values.cell_text(row)));
        writer.write_record(&record).map_err(|e| csv_error(path, e))?;
    }

    writer.flush().map_err(|e| BmsError::io_at(path, e))?;
    Ok(())
}

fn parquet_schema(table: &Table) -> std::result::Result<Type, ParquetError> {
    let mut fields = vec![Arc::new(
        Type::primitive_type_builder("Date", PhysicalType::INT64)
            .with_repetition(Repetition::REQUIRED)
            .with_converted_type(ConvertedType::TIMESTAMP_MICROS)
            .build()?,
    )];
    for column in &table.columns {
        let field = match column.values {
            ColumnValues::Float(_) => Type::primitive_type_builder(&column.name, PhysicalType::FLOAT)
                .with_repetition(Repetition::OPTIONAL)
                .build()?,
            ColumnValues::Text(_) => {
                Type::primitive_type_builder(&column.name, PhysicalType::BYTE_ARRAY)
                    .with_repetition(Repetition::OPTIONAL)
                    .with_converted_type(ConvertedType::UTF8)
                    .build()?
            }
        };
        fields.push(Arc::new(field));
    }
    Type::group_type_builder("schema").with_fields(fields).build()
}

/// Definition levels and the non-null values of an optional column
fn levels<T: Clone>(cells: &[Option<T>]) -> (Vec<i16>, Vec<T>) {
    let defs = cells.iter().map(|c| i16::from(c.is_some())).collect();
    let values = cells.iter().flatten().cloned().collect();
    (defs, values)
}

fn write_parquet_inner(table: &Table, file: File) -> std::result::Result<(), ParquetError> {
    let schema = Arc::new(parquet_schema(table)?);
    let props = Arc::new(WriterProperties::builder().build());
    let mut writer = SerializedFileWriter::new(file, schema, props)?;
    let mut row_group = writer.next_row_group()?;

    let dates: Vec<i64> = table
        .dates
        .iter()
        .map(|d| d.and_utc().timestamp_micros())
        .collect();
    let mut columns = table.columns.iter();
    let mut first = true;

    while let Some(mut column_writer) = row_group.next_column()? {
        if first {
            column_writer
                .typed::<Int64Type>()
                .write_batch(&dates, None, None)?;
            first = false;
        } else if let Some(column) = columns.next() {
            match &column.values {
                ColumnValues::Float(cells) => {
                    let (defs, values) = levels(cells);
                    column_writer
                        .typed::<FloatType>()
                        .write_batch(&values, Some(&defs), None)?;
                }
                ColumnValues::Text(cells) => {
                    let (defs, values) = levels(cells);
                    let values: Vec<ByteArray> =
                        values.iter().map(|s| ByteArray::from(s.as_str())).collect();
                    column_writer
                        .typed::<ByteArrayType>()
                        .write_batch(&values, Some(&defs), None)?;
                }
            }
        }
        column_writer.close()?;
    }

    row_group.close()?;
    writer.close()?;
    Ok(())
}

/// Write a table as Parquet
pub fn write_parquet(table: &Table, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| BmsError::io_at(path, e))?;
    write_parquet_inner(table, file).map_err(|e| parquet_error(path, e))
}

pub fn write_table(table: &Table, path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => write_csv(table, path),
        OutputFormat::Parquet => write_parquet(table, path),
    }
}

/// Write tables to `output`
///
/// An output with a `.csv` or `.parquet` extension is a single file in that
/// format and takes exactly one table. Anything else is a directory that
/// receives `<table>.<format>` per table.
pub fn write_tables(tables: &[Table], output: &Path, format: OutputFormat) -> Result<Vec<PathBuf>> {
    if let Some(file_format) = OutputFormat::from_path(output) {
        let [table] = tables else {
            return Err(BmsError::ConfigError(format!(
                "{} tables cannot be written to the single file {}",
                tables.len(),
                output.display()
            )));
        };
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| BmsError::io_at(parent, e))?;
        }
        write_table(table, output, file_format)?;
        return Ok(vec![output.to_path_buf()]);
    }

    std::fs::create_dir_all(output).map_err(|e| BmsError::io_at(output, e))?;
    let mut written = Vec::with_capacity(tables.len());
    for table in tables {
        let path = output.join(format!("{}.{}", table.name, format.extension()));
        write_table(table, &path, format)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use chrono::{Duration, NaiveDate};

    fn table() -> Table {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        Table {
            name: "BmsState".to_string(),
            dates: vec![start, start + Duration::microseconds(1_500)],
            columns: vec![
                Column {
                    name: "V".to_string(),
                    values: ColumnValues::Float(vec![Some(3.5), None]),
                },
                Column {
                    name: "Mode".to_string(),
                    values: ColumnValues::Text(vec![None, Some("Normal".to_string())]),
                },
            ],
        }
    }

    #[test]
    fn test_csv_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_tables(&[table()], &path, OutputFormat::Parquet).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Date,V,Mode\n2023-01-01T12:00:00.000000,3.5,\n2023-01-01T12:00:00.001500,,Normal\n"
        );
    }

    #[test]
    fn test_parquet_directory_output() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_tables(&[table()], &dir.path().join("tables"), OutputFormat::Parquet).unwrap();

        assert_eq!(written, vec![dir.path().join("tables").join("BmsState.parquet")]);
        let bytes = std::fs::read(&written[0]).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }

    #[test]
    fn test_single_file_takes_one_table() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_tables(&[table(), table()], &dir.path().join("x.csv"), OutputFormat::Csv)
            .unwrap_err();
        assert!(matches!(err, BmsError::ConfigError(_)));
    }
}
