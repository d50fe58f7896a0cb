use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array2, Array3, ArrayView1, Axis};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::nifti_io::{Affine, Volume, apply_affine, compose_affines, invert_affine, scaling_affine};
use crate::parallel::{collect_results, resolve_jobs, run_in_pool};

/// Maps volumes to observations x voxels rows over a fixed voxel set, and back.
pub trait Masker: Sync {
    fn n_voxels(&self) -> usize;

    fn transform(&self, paths: &[PathBuf]) -> Result<Array2<f64>>;

    fn inverse_transform(&self, values: ArrayView1<'_, f64>) -> Result<Volume>;

    fn neighbors(&self) -> Option<Vec<Vec<usize>>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskingParams {
    pub smoothing_fwhm: f64,
    pub voxel_size: f64,
    pub n_jobs: Option<usize>,
}

impl Default for MaskingParams {
    fn default() -> Self {
        Self {
            smoothing_fwhm: 5.0,
            voxel_size: 4.0,
            n_jobs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NiftiMasker {
    params: MaskingParams,
    affine: Affine,
    dims: (usize, usize, usize),
    voxels: Vec<[usize; 3]>,
    index: Array3<Option<usize>>,
}

impl NiftiMasker {
    pub fn new(mask: &Volume, params: MaskingParams) -> Result<Self> {
        let vs = params.voxel_size;
        if vs.is_nan() || vs <= 0.0 {
            return Err(anyhow::anyhow!("voxel size must be positive, got {vs}"));
        }
        let (mx, my, mz) = mask.dims();
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for corner in 0..8usize {
            let ijk = [
                if corner & 1 == 0 { 0.0 } else { mx.saturating_sub(1) as f64 },
                if corner & 2 == 0 { 0.0 } else { my.saturating_sub(1) as f64 },
                if corner & 4 == 0 { 0.0 } else { mz.saturating_sub(1) as f64 },
            ];
            let p = mask.voxel_to_world(ijk);
            for a in 0..3 {
                lo[a] = lo[a].min(p[a]);
                hi[a] = hi[a].max(p[a]);
            }
        }
        let dims = (
            ((hi[0] - lo[0]) / vs).floor() as usize + 1,
            ((hi[1] - lo[1]) / vs).floor() as usize + 1,
            ((hi[2] - lo[2]) / vs).floor() as usize + 1,
        );
        let affine = scaling_affine([vs, vs, vs], lo);

        // target voxel -> mask voxel
        let to_mask = compose_affines(&mask.world_to_voxel()?, &affine);
        let mut voxels = Vec::new();
        let mut index = Array3::from_elem(dims, None);
        for i in 0..dims.0 {
            for j in 0..dims.1 {
                for k in 0..dims.2 {
                    let p = apply_affine(&to_mask, [i as f64, j as f64, k as f64]);
                    let inside = nearest(p, (mx, my, mz))
                        .map(|[a, b, c]| {
                            let v = mask.data[[a, b, c]];
                            v.is_finite() && v != 0.0
                        })
                        .unwrap_or(false);
                    if inside {
                        index[[i, j, k]] = Some(voxels.len());
                        voxels.push([i, j, k]);
                    }
                }
            }
        }
        if voxels.is_empty() {
            return Err(anyhow::anyhow!("mask is empty after resampling to {vs} mm"));
        }
        info!(
            "Mask resampled to {vs} mm grid {:?}: {} voxels",
            dims,
            voxels.len()
        );
        Ok(Self {
            params,
            affine,
            dims,
            voxels,
            index,
        })
    }

    pub fn from_path(mask: &std::path::Path, params: MaskingParams) -> Result<Self> {
        let volume = Volume::load(mask).context("load mask")?;
        Self::new(&volume, params)
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    fn extract(&self, path: &PathBuf) -> Result<Vec<f64>> {
        let image = Volume::load(path)?;
        let mut grid = resample_trilinear(&image, &self.affine, self.dims)?;
        if self.params.smoothing_fwhm > 0.0 {
            smooth_fwhm(&mut grid, self.params.smoothing_fwhm, self.params.voxel_size);
        }
        debug!("Extracted {}", path.display());
        Ok(self.voxels.iter().map(|&[i, j, k]| grid[[i, j, k]]).collect())
    }
}

impl Masker for NiftiMasker {
    fn n_voxels(&self) -> usize {
        self.voxels.len()
    }

    fn transform(&self, paths: &[PathBuf]) -> Result<Array2<f64>> {
        let jobs = resolve_jobs(self.params.n_jobs, paths.len());
        let rows = run_in_pool(jobs, "build masker thread pool", || {
            paths.par_iter().map(|p| self.extract(p)).collect::<Vec<_>>()
        })?;
        let rows = collect_results(rows)?;
        let mut y = Array2::<f64>::zeros((rows.len(), self.voxels.len()));
        for (mut out, row) in y.axis_iter_mut(Axis(0)).zip(rows) {
            out.assign(&ArrayView1::from(&row));
        }
        Ok(y)
    }

    fn inverse_transform(&self, values: ArrayView1<'_, f64>) -> Result<Volume> {
        if values.len() != self.voxels.len() {
            return Err(anyhow::anyhow!(
                "expected {} voxel values, got {}",
                self.voxels.len(),
                values.len()
            ));
        }
        let mut data = Array3::<f64>::zeros(self.dims);
        for (&[i, j, k], &v) in self.voxels.iter().zip(values.iter()) {
            data[[i, j, k]] = v;
        }
        Ok(Volume::new(data, self.affine))
    }

    fn neighbors(&self) -> Option<Vec<Vec<usize>>> {
        let (nx, ny, nz) = self.dims;
        let adjacency = self
            .voxels
            .iter()
            .map(|&[i, j, k]| {
                let mut out = Vec::with_capacity(6);
                let candidates = [
                    (i.checked_sub(1), Some(j), Some(k)),
                    ((i + 1 < nx).then_some(i + 1), Some(j), Some(k)),
                    (Some(i), j.checked_sub(1), Some(k)),
                    (Some(i), (j + 1 < ny).then_some(j + 1), Some(k)),
                    (Some(i), Some(j), k.checked_sub(1)),
                    (Some(i), Some(j), (k + 1 < nz).then_some(k + 1)),
                ];
                for (a, b, c) in candidates {
                    if let (Some(a), Some(b), Some(c)) = (a, b, c)
                        && let Some(n) = self.index[[a, b, c]]
                    {
                        out.push(n);
                    }
                }
                out
            })
            .collect();
        Some(adjacency)
    }
}

fn nearest(p: [f64; 3], dims: (usize, usize, usize)) -> Option<[usize; 3]> {
    let bounds = [dims.0, dims.1, dims.2];
    let mut out = [0usize; 3];
    for a in 0..3 {
        let r = p[a].round();
        if r < 0.0 || r >= bounds[a] as f64 {
            return None;
        }
        out[a] = r as usize;
    }
    Some(out)
}

pub fn resample_trilinear(
    image: &Volume,
    affine: &Affine,
    dims: (usize, usize, usize),
) -> Result<Array3<f64>> {
    let to_source = compose_affines(&invert_affine(&image.affine)?, affine);
    let (sx, sy, sz) = image.dims();
    let src = &image.data;
    let eps = 1e-6;
    Ok(Array3::from_shape_fn(dims, |(i, j, k)| {
        let p = apply_affine(&to_source, [i as f64, j as f64, k as f64]);
        let inside = p[0] > -eps
            && p[1] > -eps
            && p[2] > -eps
            && p[0] < (sx - 1) as f64 + eps
            && p[1] < (sy - 1) as f64 + eps
            && p[2] < (sz - 1) as f64 + eps;
        if !inside {
            return 0.0;
        }
        let base = |v: f64, n: usize| -> (usize, usize, f64) {
            let v = v.clamp(0.0, (n - 1) as f64);
            let f = v.floor() as usize;
            let c = (f + 1).min(n - 1);
            (f, c, v - f as f64)
        };
        let (x0, x1, fx) = base(p[0], sx);
        let (y0, y1, fy) = base(p[1], sy);
        let (z0, z1, fz) = base(p[2], sz);
        let lerp = |a: f64, b: f64, t: f64| if t == 0.0 { a } else { a + (b - a) * t };
        let c00 = lerp(src[[x0, y0, z0]], src[[x1, y0, z0]], fx);
        let c10 = lerp(src[[x0, y1, z0]], src[[x1, y1, z0]], fx);
        let c01 = lerp(src[[x0, y0, z1]], src[[x1, y0, z1]], fx);
        let c11 = lerp(src[[x0, y1, z1]], src[[x1, y1, z1]], fx);
        let c0 = lerp(c00, c10, fy);
        let c1 = lerp(c01, c11, fy);
        lerp(c0, c1, fz)
    }))
}

/// Separable Gaussian smoothing; non-finite voxels are smoothed as 0 and stay NaN.
pub fn smooth_fwhm(data: &mut Array3<f64>, fwhm_mm: f64, voxel_mm: f64) {
    let sigma = fwhm_mm / (8.0 * std::f64::consts::LN_2).sqrt() / voxel_mm;
    if sigma.is_nan() || sigma <= 0.0 {
        return;
    }
    let kernel = gaussian_kernel(sigma);
    let non_finite: Vec<(usize, usize, usize)> = data
        .indexed_iter()
        .filter(|(_, v)| !v.is_finite())
        .map(|(idx, _)| idx)
        .collect();
    for &idx in &non_finite {
        data[idx] = 0.0;
    }
    for axis in 0..3 {
        for mut lane in data.lanes_mut(Axis(axis)) {
            let input = lane.to_vec();
            for (i, out) in lane.iter_mut().enumerate() {
                *out = convolve_reflect(&input, &kernel, i);
            }
        }
    }
    for idx in non_finite {
        data[idx] = f64::NAN;
    }
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma + 0.5) as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-0.5 * (x / sigma).powi(2)).exp()
        })
        .collect();
    let total: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= total;
    }
    kernel
}

fn convolve_reflect(input: &[f64], kernel: &[f64], center: usize) -> f64 {
    let n = input.len() as isize;
    let radius = (kernel.len() / 2) as isize;
    kernel
        .iter()
        .enumerate()
        .map(|(t, w)| {
            let mut pos = center as isize + t as isize - radius;
            // half-sample symmetric reflection
            while pos < 0 || pos >= n {
                pos = if pos < 0 { -pos - 1 } else { 2 * n - pos - 1 };
            }
            w * input[pos as usize]
        })
        .sum()
}
