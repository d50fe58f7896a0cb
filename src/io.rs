use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use polars::prelude::*;
use tempfile::NamedTempFile;

use crate::df_utils::{ensure_utf8, strip_prefix};

pub fn read_table(path: &Path, string_columns: &[&str]) -> Result<DataFrame> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    if ext == "gz" || ext == "bz2" {
        let tmp = decompress_to_temp(path, &ext)?;
        return read_table_plain(tmp.path(), string_columns);
    }

    read_table_plain(path, string_columns)
}

pub fn read_tabular(path: &Path) -> Result<DataFrame> {
    let df = read_table(path, &["subject", "session"])?;
    let df = ensure_utf8(df, &["subject", "session"])?;
    let df = strip_prefix(df, "subject", "sub-")?;
    strip_prefix(df, "session", "ses-")
}

fn read_table_plain(path: &Path, string_columns: &[&str]) -> Result<DataFrame> {
    let (delimiter, header) = sniff_header(path)?;
    if delimiter == b' ' {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        return read_table_whitespace(BufReader::new(file), string_columns);
    }

    let mut overwrite = Schema::default();
    for name in header.split(delimiter as char).map(str::trim) {
        if string_columns.contains(&name) {
            overwrite.with_column(name.into(), DataType::String);
        }
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(Arc::new(overwrite)))
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(delimiter)
                .with_null_values(Some(NullValues::AllColumns(vec![
                    "".into(),
                    "NA".into(),
                    "n/a".into(),
                    "NaN".into(),
                    ".".into(),
                ])))
                .with_missing_is_null(true),
        )
        .with_ignore_errors(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("read {}", path.display()))?;
    trim_string_columns(df)
}

fn read_table_whitespace<R: Read>(reader: R, string_columns: &[&str]) -> Result<DataFrame> {
    let mut reader = BufReader::new(reader);
    let mut header_line = String::new();
    reader.read_line(&mut header_line)?;
    if header_line.trim().is_empty() {
        return Err(anyhow::anyhow!("empty file"));
    }
    let headers: Vec<String> = header_line.split_whitespace().map(str::to_string).collect();
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        for (i, col) in columns.iter_mut().enumerate() {
            col.push(normalize_missing_token(parts.get(i).copied().unwrap_or("")));
        }
    }

    let cols: Vec<Column> = headers
        .iter()
        .zip(columns)
        .map(|(name, values)| {
            let numeric = !string_columns.contains(&name.as_str())
                && values
                    .iter()
                    .flatten()
                    .all(|v| v.parse::<f64>().is_ok());
            if numeric {
                let parsed: Vec<Option<f64>> = values
                    .iter()
                    .map(|v| v.as_deref().and_then(|s| s.parse().ok()))
                    .collect();
                Series::new(name.as_str().into(), parsed).into_column()
            } else {
                Series::new(name.as_str().into(), values).into_column()
            }
        })
        .collect();
    Ok(DataFrame::new(cols)?)
}

fn sniff_header(path: &Path) -> Result<(u8, String)> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut first = String::new();
    reader.read_line(&mut first)?;
    let first = first.trim_end_matches(['\r', '\n']).to_string();
    if first.contains('\t') {
        return Ok((b'\t', first));
    }
    if first.contains(',') {
        return Ok((b',', first));
    }
    Ok((b' ', first))
}

fn decompress_to_temp(path: &Path, ext: &str) -> Result<NamedTempFile> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut decoder: Box<dyn Read> = match ext {
        "gz" => Box::new(GzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        _ => Box::new(file),
    };
    let mut tmp = NamedTempFile::new()?;
    std::io::copy(&mut decoder, &mut tmp)?;
    Ok(tmp)
}

fn trim_string_columns(mut df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    for name in names {
        if let Ok(column) = df.column(&name)
            && column.dtype() == &DataType::String
        {
            let trimmed: StringChunked = column
                .as_series()
                .context("series")?
                .str()?
                .into_iter()
                .map(|v| v.map(|s| s.trim().to_string()))
                .collect();
            let mut s = trimmed.into_series();
            s.rename(name.clone().into());
            df.with_column(s.into_column())?;
        }
    }
    Ok(df)
}

fn normalize_missing_token(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    if trimmed.is_empty() || upper == "NA" || upper == "N/A" || upper == "NAN" || trimmed == "." {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn write_dataframe(df: &DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut df = df.clone();
    CsvWriter::new(&mut file)
        .with_separator(b'\t')
        .finish(&mut df)?;
    Ok(())
}
