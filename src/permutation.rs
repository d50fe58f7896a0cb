use std::collections::BTreeMap;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::clusters::{cluster_maps, tfce};
use crate::matrix::{has_constant_column, residualize};
use crate::parallel::{resolve_jobs, run_in_pool};
use crate::types::StatKind;

pub type StatMaps = BTreeMap<StatKind, Array2<f64>>;

#[derive(Debug, Clone, Copy)]
pub struct PermutationInput<'a> {
    pub tested: ArrayView2<'a, f64>,
    pub target: ArrayView2<'a, f64>,
    pub confounds: ArrayView2<'a, f64>,
    pub neighbors: Option<&'a [Vec<usize>]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermutationOptions {
    pub n_perm: usize,
    pub n_jobs: Option<usize>,
    pub seed: u64,
    pub tfce: bool,
    pub cluster_threshold: Option<f64>,
}

impl Default for PermutationOptions {
    fn default() -> Self {
        Self {
            n_perm: 1000,
            n_jobs: None,
            seed: 42,
            tfce: false,
            cluster_threshold: None,
        }
    }
}

/// Mass-univariate test with family-wise error control; every returned map is shaped
/// (n_tested, n_voxels).
pub trait PermutationEngine: Sync {
    fn run(&self, input: &PermutationInput<'_>, options: &PermutationOptions) -> Result<StatMaps>;
}

#[derive(Debug, Clone, Copy)]
pub struct PermutedOls {
    pub model_intercept: bool,
}

impl Default for PermutedOls {
    fn default() -> Self {
        Self {
            model_intercept: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PermMax {
    t: f64,
    tfce: f64,
    size: f64,
    mass: f64,
}

struct Residuals<'a> {
    y: Array2<f64>,
    y_sq: Array1<f64>,
    dof: f64,
    neighbors: Option<&'a [Vec<usize>]>,
}

impl Residuals<'_> {
    fn t_scores(&self, x: &Array1<f64>) -> Array1<f64> {
        let x_sq = x.dot(x);
        if x_sq <= f64::EPSILON {
            return Array1::zeros(self.y.ncols());
        }
        let cov = self.y.t().dot(x);
        Array1::from_shape_fn(cov.len(), |j| {
            let beta = cov[j] / x_sq;
            let rss = (self.y_sq[j] - beta * cov[j]).max(0.0);
            let se = (rss / self.dof / x_sq).sqrt();
            if se > 0.0 && se.is_finite() {
                beta / se
            } else {
                0.0
            }
        })
    }
}

impl PermutationEngine for PermutedOls {
    fn run(&self, input: &PermutationInput<'_>, options: &PermutationOptions) -> Result<StatMaps> {
        let n = input.target.nrows();
        let n_voxels = input.target.ncols();
        if input.tested.nrows() != n || input.confounds.nrows() != n {
            return Err(anyhow::anyhow!(
                "row mismatch: tested {}, target {n}, confounds {}",
                input.tested.nrows(),
                input.confounds.nrows()
            ));
        }
        let needs_topology = options.tfce || options.cluster_threshold.is_some();
        if needs_topology {
            match input.neighbors {
                Some(nb) if nb.len() == n_voxels => {}
                Some(nb) => {
                    return Err(anyhow::anyhow!(
                        "voxel adjacency covers {} voxels, target has {n_voxels}",
                        nb.len()
                    ));
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "TFCE and cluster statistics need voxel adjacency from the masker"
                    ));
                }
            }
        }

        let confounds = self.confounds_with_intercept(input.tested, input.confounds);
        let dof = n as f64 - confounds.ncols() as f64 - 1.0;
        if dof < 1.0 {
            return Err(anyhow::anyhow!(
                "{n} observations leave no residual degrees of freedom for {} confounds",
                confounds.ncols()
            ));
        }
        let y = residualize(&input.target.to_owned(), &confounds).context("residualize targets")?;
        let y_sq = y.map_axis(Axis(0), |col| col.dot(&col));
        let residuals = Residuals {
            y,
            y_sq,
            dof,
            neighbors: input.neighbors,
        };

        let mut seeder = StdRng::seed_from_u64(options.seed);
        let seeds: Vec<u64> = (0..options.n_perm).map(|_| seeder.random()).collect();
        let jobs = resolve_jobs(options.n_jobs, options.n_perm);

        let n_tested = input.tested.ncols();
        let mut maps = StatMaps::new();
        let mut insert = |kind: StatKind, row: usize, values: &[f64]| {
            let map = maps
                .entry(kind)
                .or_insert_with(|| Array2::zeros((n_tested, n_voxels)));
            map.row_mut(row).assign(&Array1::from(values.to_vec()));
        };

        for (v, column) in input.tested.axis_iter(Axis(1)).enumerate() {
            // a constant regressor is invariant to row shuffles; flip signs instead
            let sign_flip = is_constant(column.iter().copied());
            let x = residualize(&column.to_owned().insert_axis(Axis(1)), &confounds)
                .context("residualize tested variable")?
                .column(0)
                .to_owned();
            let observed = residuals.t_scores(&x).to_vec();
            let observed_tfce = residuals
                .neighbors
                .filter(|_| options.tfce)
                .map(|nb| tfce(&observed, nb));
            let observed_clusters = residuals
                .neighbors
                .zip(options.cluster_threshold)
                .map(|(nb, thr)| cluster_maps(&observed, nb, thr));

            let maxima = run_in_pool(jobs, "build permutation thread pool", || {
                seeds
                    .par_iter()
                    .map(|&seed| self.permuted_maxima(&residuals, &x, sign_flip, seed, options))
                    .collect::<Vec<_>>()
            })?;
            debug!("Variable {v}: {} permutations done", maxima.len());

            let abs_t: Vec<f64> = observed.iter().map(|t| t.abs()).collect();
            insert(StatKind::T, v, &observed);
            insert(
                StatKind::LogpMaxT,
                v,
                &fwe_log_p(&abs_t, maxima.iter().map(|m| m.t)),
            );
            if let Some(scores) = observed_tfce {
                let abs_scores: Vec<f64> = scores.iter().map(|s| s.abs()).collect();
                insert(
                    StatKind::LogpMaxTfce,
                    v,
                    &fwe_log_p(&abs_scores, maxima.iter().map(|m| m.tfce)),
                );
                insert(StatKind::Tfce, v, &scores);
            }
            if let Some(clusters) = observed_clusters {
                insert(
                    StatKind::LogpMaxSize,
                    v,
                    &fwe_log_p(&clusters.size, maxima.iter().map(|m| m.size)),
                );
                insert(
                    StatKind::LogpMaxMass,
                    v,
                    &fwe_log_p(&clusters.mass, maxima.iter().map(|m| m.mass)),
                );
                insert(StatKind::Size, v, &clusters.size);
                insert(StatKind::Mass, v, &clusters.mass);
            }
        }

        info!(
            "Permuted OLS: {n_tested} tested variables, {n_voxels} voxels, {} permutations, dof {dof}",
            options.n_perm
        );
        Ok(maps)
    }
}

impl PermutedOls {
    fn confounds_with_intercept(
        &self,
        tested: ArrayView2<'_, f64>,
        confounds: ArrayView2<'_, f64>,
    ) -> Array2<f64> {
        let owned = confounds.to_owned();
        if !self.model_intercept
            || has_constant_column(&owned)
            || has_constant_column(&tested.to_owned())
        {
            return owned;
        }
        Array2::from_shape_fn((owned.nrows(), owned.ncols() + 1), |(i, j)| {
            if j == 0 { 1.0 } else { owned[[i, j - 1]] }
        })
    }

    fn permuted_maxima(
        &self,
        residuals: &Residuals<'_>,
        x: &Array1<f64>,
        sign_flip: bool,
        seed: u64,
        options: &PermutationOptions,
    ) -> PermMax {
        let mut rng = StdRng::seed_from_u64(seed);
        let permuted = if sign_flip {
            // flipping the regressor signs equals flipping the target rows
            x.mapv(|v| if rng.random::<bool>() { v } else { -v })
        } else {
            let mut order: Vec<usize> = (0..x.len()).collect();
            order.shuffle(&mut rng);
            Array1::from_shape_fn(x.len(), |i| x[order[i]])
        };
        let t = residuals.t_scores(&permuted).to_vec();

        let mut out = PermMax {
            t: t.iter().fold(0.0f64, |m, v| m.max(v.abs())),
            ..PermMax::default()
        };
        if let Some(nb) = residuals.neighbors {
            if options.tfce {
                out.tfce = tfce(&t, nb).iter().fold(0.0f64, |m, v| m.max(v.abs()));
            }
            if let Some(thr) = options.cluster_threshold {
                let clusters = cluster_maps(&t, nb, thr);
                out.size = clusters.max_size;
                out.mass = clusters.max_mass;
            }
        }
        out
    }
}

fn is_constant(mut values: impl Iterator<Item = f64>) -> bool {
    match values.next() {
        Some(first) if first != 0.0 && first.is_finite() => values.all(|v| v == first),
        _ => false,
    }
}

/// `-log10((#{null max >= observed} + 1) / (n_perm + 1))` per voxel.
pub fn fwe_log_p(observed: &[f64], null_maxima: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut null: Vec<f64> = null_maxima.collect();
    null.sort_by(f64::total_cmp);
    let n_perm = null.len() as f64;
    observed
        .iter()
        .map(|&obs| {
            let below = null.partition_point(|&m| m < obs);
            let exceed = (null.len() - below) as f64;
            -((exceed + 1.0) / (n_perm + 1.0)).log10()
        })
        .collect()
}
