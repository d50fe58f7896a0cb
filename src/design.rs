use ndarray::{Array2, Axis};
use polars::prelude::DataFrame;
use tracing::debug;
use wilkinson::{INTERCEPT, ModelMatrix, NaAction};

use crate::error::{NeuroVoxelError, Result};

pub trait ModelMatrixBuilder: Sync {
    fn build(&self, rhs: &str, table: &DataFrame) -> Result<ModelMatrix>;
}

#[derive(Debug, Clone, Copy)]
pub struct WilkinsonBuilder {
    pub na_action: NaAction,
}

impl Default for WilkinsonBuilder {
    fn default() -> Self {
        Self {
            na_action: NaAction::Ignore,
        }
    }
}

impl ModelMatrixBuilder for WilkinsonBuilder {
    fn build(&self, rhs: &str, table: &DataFrame) -> Result<ModelMatrix> {
        Ok(wilkinson::model_matrix(rhs, table, self.na_action)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InferenceTerms {
    /// Column names, or term labels standing for every column the term generates.
    Named(Vec<String>),
    #[default]
    AllButIntercept,
}

#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub x: Array2<f64>,
    pub column_names: Vec<String>,
    pub is_tested: Vec<bool>,
}

impl DesignMatrix {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn tested_indices(&self) -> Vec<usize> {
        (0..self.is_tested.len()).filter(|&j| self.is_tested[j]).collect()
    }

    pub fn confound_indices(&self) -> Vec<usize> {
        (0..self.is_tested.len()).filter(|&j| !self.is_tested[j]).collect()
    }

    pub fn tested_names(&self) -> Vec<String> {
        self.tested_indices()
            .into_iter()
            .map(|j| self.column_names[j].clone())
            .collect()
    }

    pub fn tested(&self) -> Array2<f64> {
        self.x.select(Axis(1), &self.tested_indices())
    }

    pub fn confounds(&self) -> Array2<f64> {
        self.x.select(Axis(1), &self.confound_indices())
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(0), rows),
            column_names: self.column_names.clone(),
            is_tested: self.is_tested.clone(),
        }
    }
}

pub fn build_design(
    builder: &dyn ModelMatrixBuilder,
    rhs: &str,
    table: &DataFrame,
    terms: &InferenceTerms,
) -> Result<DesignMatrix> {
    let mm = builder.build(rhs, table)?;
    let is_tested = tested_mask(&mm, terms)?;
    debug!(
        "Design for `{rhs}`: {} rows, columns {:?}, tested {:?}",
        mm.matrix.nrows(),
        mm.column_names,
        is_tested
    );
    Ok(DesignMatrix {
        x: mm.matrix,
        column_names: mm.column_names,
        is_tested,
    })
}

fn tested_mask(mm: &ModelMatrix, terms: &InferenceTerms) -> Result<Vec<bool>> {
    let mut is_tested = vec![false; mm.column_names.len()];
    match terms {
        InferenceTerms::AllButIntercept => {
            for (j, name) in mm.column_names.iter().enumerate() {
                is_tested[j] = name != INTERCEPT;
            }
        }
        InferenceTerms::Named(names) => {
            for requested in names {
                let mut found = false;
                if let Some(j) = mm.column_names.iter().position(|c| c == requested) {
                    is_tested[j] = true;
                    found = true;
                }
                if let Some((_, cols)) = mm.term_columns.iter().find(|(label, _)| label == requested) {
                    for &j in cols {
                        is_tested[j] = true;
                    }
                    found = true;
                }
                if !found {
                    return Err(NeuroVoxelError::Configuration(format!(
                        "inference term `{requested}` matches no design column (columns: {})",
                        mm.column_names.join(", ")
                    )));
                }
            }
        }
    }
    if !is_tested.iter().any(|&t| t) {
        return Err(NeuroVoxelError::Configuration(
            "no design column is selected for inference".to_string(),
        ));
    }
    Ok(is_tested)
}
