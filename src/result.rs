use std::collections::BTreeMap;

use anyhow::Result;
use ndarray::{Array2, ArrayView1};
use polars::prelude::*;

use crate::error::NeuroVoxelError;
use crate::types::StatKind;

pub const SIGNIFICANT_LOG_P: f64 = 1.301_029_995_663_981;

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub outcome: String,
    pub formula: String,
    /// Tested design columns, in design order; row `i` of every map belongs to name `i`.
    pub tested_var_names: Vec<String>,
    pub stats: BTreeMap<StatKind, Array2<f64>>,
    pub cohort: DataFrame,
    pub n_observations: usize,
}

impl AnalysisResult {
    pub fn n_voxels(&self) -> usize {
        self.stats.values().next().map(|m| m.ncols()).unwrap_or(0)
    }

    pub fn stat(&self, kind: StatKind) -> Option<&Array2<f64>> {
        self.stats.get(&kind)
    }

    pub fn stat_row(
        &self,
        kind: StatKind,
        variable: &str,
    ) -> crate::error::Result<ArrayView1<'_, f64>> {
        let row = self
            .tested_var_names
            .iter()
            .position(|name| name == variable)
            .ok_or_else(|| {
                NeuroVoxelError::Configuration(format!(
                    "`{variable}` is not a tested variable (tested: {})",
                    self.tested_var_names.join(", ")
                ))
            })?;
        let map = self.stats.get(&kind).ok_or_else(|| {
            NeuroVoxelError::Configuration(format!("statistic `{kind}` was not computed"))
        })?;
        Ok(map.row(row))
    }

    pub fn summary(&self) -> Result<DataFrame> {
        let mut variables = Vec::new();
        let mut stats = Vec::new();
        let mut mins = Vec::new();
        let mut maxs = Vec::new();
        let mut significant: Vec<Option<u32>> = Vec::new();
        for (kind, map) in &self.stats {
            for (row, name) in self.tested_var_names.iter().enumerate() {
                let values = map.row(row);
                let finite = values.iter().copied().filter(|v| v.is_finite());
                let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
                variables.push(name.clone());
                stats.push(kind.as_str());
                mins.push(lo.is_finite().then_some(lo));
                maxs.push(hi.is_finite().then_some(hi));
                significant.push(kind.is_log_p().then(|| {
                    values.iter().filter(|&&v| v >= SIGNIFICANT_LOG_P).count() as u32
                }));
            }
        }
        Ok(DataFrame::new(vec![
            Series::new("variable".into(), variables).into_column(),
            Series::new("stat".into(), stats).into_column(),
            Series::new("min".into(), mins).into_column(),
            Series::new("max".into(), maxs).into_column(),
            Series::new("n_significant".into(), significant).into_column(),
        ])?)
    }
}
