//! Tabular assembly and column selection.
//!
//! Flattens normalized records into a rectangular Polars frame with a fixed
//! leading block (`time`, `announced`, then `lat`/`lon` when any record has
//! them) followed by variable columns in order of first appearance.

use crate::constants::columns;
use crate::error::{Result, ResolutionError};
use crate::models::{ObservationRecord, Value};
use crate::resolver::VariableResolver;
use polars::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// Assembler output
#[derive(Debug, Clone)]
pub struct Assembled {
    pub data: DataFrame,
    /// Records dropped for carrying no finite reading
    pub rows_dropped: usize,
}

/// Variable columns in order of first appearance, flagged true when text
fn variable_layout(records: &[ObservationRecord]) -> Vec<(String, bool)> {
    let mut layout: Vec<(String, bool)> = Vec::new();
    for record in records {
        for (code, value) in &record.values {
            let is_text = matches!(value, Value::Text(_));
            match layout.iter_mut().find(|(name, _)| name == code) {
                Some((_, text)) => *text |= is_text,
                None => layout.push((code.clone(), is_text)),
            }
        }
    }
    layout
}

fn datetime_column(name: &str, millis: Vec<i64>) -> Result<Column> {
    Ok(Column::new(name.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}

fn text_cell(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Text(text) => Some(text.clone()),
        Value::Number(number) if number.is_finite() => Some(number.to_string()),
        Value::Number(_) => None,
    }
}

/// Build the dataset, dropping records whose variables are all missing
pub fn assemble(records: Vec<ObservationRecord>) -> Result<Assembled> {
    let total = records.len();
    let records: Vec<ObservationRecord> = records
        .into_iter()
        .filter(ObservationRecord::has_reading)
        .collect();
    let rows_dropped = total - records.len();

    let layout = variable_layout(&records);
    let mut frame_columns = Vec::with_capacity(layout.len() + 4);

    frame_columns.push(datetime_column(
        columns::TIME,
        records.iter().map(|r| r.time.timestamp_millis()).collect(),
    )?);
    frame_columns.push(datetime_column(
        columns::ANNOUNCED,
        records.iter().map(|r| r.announced.timestamp_millis()).collect(),
    )?);

    if records.iter().any(|r| r.lat.is_some() || r.lon.is_some()) {
        let lat: Vec<Option<f64>> = records.iter().map(|r| r.lat).collect();
        let lon: Vec<Option<f64>> = records.iter().map(|r| r.lon).collect();
        frame_columns.push(Column::new(columns::LAT.into(), lat));
        frame_columns.push(Column::new(columns::LON.into(), lon));
    }

    for (code, is_text) in &layout {
        let column = if *is_text {
            let cells: Vec<Option<String>> =
                records.iter().map(|r| text_cell(r.get(code))).collect();
            Column::new(code.as_str().into(), cells)
        } else {
            let cells: Vec<f64> = records
                .iter()
                .map(|r| r.get(code).and_then(Value::as_f64).unwrap_or(f64::NAN))
                .collect();
            Column::new(code.as_str().into(), cells)
        };
        frame_columns.push(column);
    }

    let data = DataFrame::new(frame_columns)?;
    debug!(
        "Assembled {} rows x {} columns ({} dropped)",
        data.height(),
        data.width(),
        rows_dropped
    );

    Ok(Assembled { data, rows_dropped })
}

/// Project a dataset onto the leading columns plus the resolved variables
pub fn select_variables<S: AsRef<str>>(
    data: &DataFrame,
    queries: &[S],
    resolver: &VariableResolver,
) -> Result<DataFrame> {
    let present: HashSet<String> = data
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut seen = HashSet::new();
    let mut codes = Vec::with_capacity(queries.len());
    for query in queries {
        let code = resolver.resolve(query.as_ref())?;
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }

    let missing: Vec<String> = codes
        .iter()
        .filter(|code| !present.contains(*code))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ResolutionError::MissingColumns { columns: missing }.into());
    }

    let mut selection: Vec<String> = columns::LEADING
        .iter()
        .filter(|name| present.contains(**name))
        .map(|name| name.to_string())
        .collect();
    selection.extend(codes);

    Ok(data.select(selection)?)
}
