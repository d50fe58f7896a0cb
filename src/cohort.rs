use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::df_utils::{column_strings, ensure_utf8, take_rows};
use crate::error::{NeuroVoxelError, Result};
use crate::types::{ImageRecord, MultiSessionPolicy};

pub const SUBJECT: &str = "subject";
pub const SESSION: &str = "session";

#[derive(Debug, Clone)]
pub struct CohortRecord {
    pub table: DataFrame,
    pub outcome_column: String,
}

impl CohortRecord {
    pub fn n_rows(&self) -> usize {
        self.table.height()
    }

    pub fn image_paths(&self) -> Result<Vec<PathBuf>> {
        let paths = column_strings(&self.table, &self.outcome_column)
            .map_err(NeuroVoxelError::collaborator)?;
        paths
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                p.map(PathBuf::from).ok_or_else(|| {
                    NeuroVoxelError::Collaborator(format!("row {i} has no image path"))
                })
            })
            .collect()
    }

    pub fn filter_rows(&self, rows: &[usize]) -> Result<Self> {
        let table = take_rows(&self.table, rows).map_err(NeuroVoxelError::collaborator)?;
        Ok(Self {
            table,
            outcome_column: self.outcome_column.clone(),
        })
    }
}

pub fn assemble_cohort(
    images: &[ImageRecord],
    table: &DataFrame,
    outcome: &str,
    required: &BTreeSet<String>,
    policy: MultiSessionPolicy,
    seed: u64,
) -> Result<CohortRecord> {
    for key in [SUBJECT, SESSION] {
        if table.column(key).is_err() {
            return Err(NeuroVoxelError::Configuration(format!(
                "covariate table has no `{key}` column"
            )));
        }
    }

    let image_df = image_frame(images, outcome).map_err(NeuroVoxelError::collaborator)?;
    let joined = join_sorted(&image_df, table, outcome, required)
        .map_err(NeuroVoxelError::collaborator)?;
    let rows = select_sessions(&joined, policy, seed).map_err(NeuroVoxelError::collaborator)?;
    let table = take_rows(&joined, &rows).map_err(NeuroVoxelError::collaborator)?;
    info!(
        "Cohort for `{outcome}`: {} images, {} joined rows, {} after `{policy:?}` session policy",
        image_df.height(),
        joined.height(),
        table.height()
    );
    Ok(CohortRecord {
        table,
        outcome_column: outcome.to_string(),
    })
}

fn image_frame(images: &[ImageRecord], outcome: &str) -> anyhow::Result<DataFrame> {
    let mut subjects = Vec::with_capacity(images.len());
    let mut sessions = Vec::with_capacity(images.len());
    let mut paths = Vec::with_capacity(images.len());
    for record in images {
        match (record.subject(), record.session()) {
            (Some(sub), Some(ses)) => {
                subjects.push(sub.to_string());
                sessions.push(ses.to_string());
                paths.push(record.path.to_string_lossy().to_string());
            }
            _ => warn!(
                "Skipping {} without subject/session entities",
                record.path.display()
            ),
        }
    }
    let df = DataFrame::new(vec![
        Series::new(SUBJECT.into(), subjects).into_column(),
        Series::new(SESSION.into(), sessions).into_column(),
        Series::new(outcome.into(), paths).into_column(),
    ])?;
    Ok(df)
}

fn join_sorted(
    image_df: &DataFrame,
    table: &DataFrame,
    outcome: &str,
    required: &BTreeSet<String>,
) -> anyhow::Result<DataFrame> {
    let table = ensure_utf8(table.clone(), &[SUBJECT, SESSION])?;
    let mut selected = vec![col(SUBJECT), col(SESSION)];
    for name in required {
        let name = name.as_str();
        if name == SUBJECT || name == SESSION || name == outcome {
            continue;
        }
        if table.column(name).is_ok() {
            selected.push(col(name));
        }
    }

    let keys = [col(SUBJECT), col(SESSION)];
    let joined = image_df
        .clone()
        .lazy()
        .join(
            table.lazy().select(selected),
            keys.clone(),
            keys,
            JoinArgs::new(JoinType::Inner),
        )
        .sort(
            [SUBJECT, SESSION],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .context("join images with covariate table")?;
    Ok(joined)
}

fn select_sessions(
    joined: &DataFrame,
    policy: MultiSessionPolicy,
    seed: u64,
) -> anyhow::Result<Vec<usize>> {
    let subjects = column_strings(joined, SUBJECT)?;
    let mut groups: Vec<(Option<&str>, Vec<usize>)> = Vec::new();
    for (i, subject) in subjects.iter().enumerate() {
        let subject = subject.as_deref();
        match groups.last_mut() {
            Some((current, rows)) if *current == subject => rows.push(i),
            _ => groups.push((subject, vec![i])),
        }
    }

    let mut kept = Vec::with_capacity(subjects.len());
    for (subject, rows) in groups {
        match policy {
            MultiSessionPolicy::First => kept.push(rows[0]),
            MultiSessionPolicy::Last => kept.push(rows[rows.len() - 1]),
            MultiSessionPolicy::Random => {
                let mut rng = subject_rng(seed, subject.unwrap_or(""));
                kept.push(rows[rng.random_range(0..rows.len())]);
            }
            MultiSessionPolicy::All => kept.extend(rows),
        }
    }
    Ok(kept)
}

// one stream per subject, independent of which other subjects are present
fn subject_rng(seed: u64, subject: &str) -> StdRng {
    StdRng::seed_from_u64(seed ^ fnv1a(subject.as_bytes()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
