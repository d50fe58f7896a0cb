use ndarray::{Array2, Axis};
use tracing::{info, warn};

use crate::types::{Standardization, ZeroVoxelPolicy};

#[derive(Debug, Clone)]
pub struct PreparedVoxels {
    pub y: Array2<f64>,
    pub excluded: Vec<bool>,
}

impl PreparedVoxels {
    pub fn n_excluded(&self) -> usize {
        self.excluded.iter().filter(|&&e| e).count()
    }
}

pub fn excluded_voxels(y: &Array2<f64>, zero_policy: ZeroVoxelPolicy) -> Vec<bool> {
    y.axis_iter(Axis(1))
        .map(|column| {
            column.iter().any(|v| !v.is_finite())
                || (zero_policy == ZeroVoxelPolicy::Exclude && column.iter().any(|&v| v == 0.0))
        })
        .collect()
}

// Excluded voxels are zeroed, never dropped.
pub fn prepare_voxels(
    mut y: Array2<f64>,
    zero_policy: ZeroVoxelPolicy,
    standardization: Standardization,
) -> PreparedVoxels {
    let excluded = excluded_voxels(&y, zero_policy);
    for (j, mut column) in y.axis_iter_mut(Axis(1)).enumerate() {
        if excluded[j] {
            column.fill(0.0);
        }
    }

    let kept = excluded.iter().filter(|&&e| !e).count();
    let n_entries = kept * y.nrows();
    if standardization != Standardization::None && n_entries > 0 {
        let kept_values = || {
            y.axis_iter(Axis(1))
                .enumerate()
                .filter(|(j, _)| !excluded[*j])
                .flat_map(|(_, column)| column.to_vec())
        };
        let mean = kept_values().sum::<f64>() / n_entries as f64;
        let scale = if standardization == Standardization::Scale {
            let var = kept_values().map(|v| (v - mean).powi(2)).sum::<f64>() / n_entries as f64;
            let sd = var.sqrt();
            if sd > 0.0 && sd.is_finite() {
                Some(sd)
            } else {
                warn!("Voxel values have zero spread; scaling skipped, centering only");
                None
            }
        } else {
            None
        };

        for (j, mut column) in y.axis_iter_mut(Axis(1)).enumerate() {
            if excluded[j] {
                continue;
            }
            column.mapv_inplace(|v| {
                let centered = v - mean;
                match scale {
                    Some(sd) => centered / sd,
                    None => centered,
                }
            });
        }
    }

    let prepared = PreparedVoxels { y, excluded };
    info!(
        "Prepared voxel matrix: {} observations, {} voxels, {} excluded",
        prepared.y.nrows(),
        prepared.y.ncols(),
        prepared.n_excluded()
    );
    prepared
}
