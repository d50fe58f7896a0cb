use ndarray::{Array2, Axis};
use tracing::{info, warn};

use crate::design::DesignMatrix;
use crate::error::{NeuroVoxelError, Result};

pub const MIN_OBSERVATIONS: usize = 10;

#[derive(Debug, Clone)]
pub struct GatedData {
    pub design: DesignMatrix,
    pub y: Array2<f64>,
    pub rows: Vec<usize>,
}

pub fn complete_rows(x: &Array2<f64>) -> Vec<usize> {
    x.axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| !row.iter().any(|v| v.is_nan()))
        .map(|(i, _)| i)
        .collect()
}

pub fn apply_missing_gate(formula: &str, design: &DesignMatrix, y: &Array2<f64>) -> Result<GatedData> {
    if design.n_rows() != y.nrows() {
        return Err(NeuroVoxelError::Collaborator(format!(
            "design matrix has {} rows but voxel matrix has {}",
            design.n_rows(),
            y.nrows()
        )));
    }

    let rows = complete_rows(&design.x);
    if rows.len() < MIN_OBSERVATIONS {
        return Err(NeuroVoxelError::InsufficientData(format!(
            "For the specified query {formula}, there are only {} observations in the dataset \
             without any missingness. At least {MIN_OBSERVATIONS} are required for statistical analysis.",
            rows.len()
        )));
    }

    let dropped = design.n_rows() - rows.len();
    if dropped > 0 {
        warn!("Dropped {dropped} observations with missing predictor values");
    }
    info!("{} observations enter the model", rows.len());

    Ok(GatedData {
        design: design.select_rows(&rows),
        y: y.select(Axis(0), &rows),
        rows,
    })
}
