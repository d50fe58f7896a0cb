use anyhow::{Context, Result};
use polars::prelude::*;

pub fn ensure_utf8(mut df: DataFrame, cols: &[&str]) -> Result<DataFrame> {
    for col in cols {
        if let Ok(column) = df.column(col)
            && let Some(series) = column.as_series()
            && series.dtype() != &DataType::String
        {
            let mut casted = series.cast(&DataType::String)?;
            casted.rename((*col).into());
            df.with_column(casted.into_column())?;
        }
    }
    Ok(df)
}

pub fn strip_prefix(mut df: DataFrame, col: &str, prefix: &str) -> Result<DataFrame> {
    if df.column(col).is_err() {
        return Ok(df);
    }
    let stripped: StringChunked = df
        .column(col)?
        .as_series()
        .context("series")?
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.strip_prefix(prefix).unwrap_or(s).to_string()))
        .collect();
    let mut series = stripped.into_series();
    series.rename(col.into());
    df.with_column(series.into_column())?;
    Ok(df)
}

pub fn column_strings(df: &DataFrame, col: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(col)
        .with_context(|| format!("column {col}"))?
        .as_series()
        .context("series")?
        .cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec("idx".into(), rows.iter().map(|&r| r as IdxSize).collect());
    Ok(df.take(&idx)?)
}
