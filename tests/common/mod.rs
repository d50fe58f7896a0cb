#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use ndarray::{Array2, Array3, ArrayView1};
use neurovoxel::layout::DatasetCatalog;
use neurovoxel::masker::Masker;
use neurovoxel::nifti_io::{Volume, scaling_affine};
use neurovoxel::types::{Entities, ImageRecord};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const OUTCOME: &str = "pib_dvr_mimap";
pub const GRID: (usize, usize, usize) = (10, 10, 1);

pub struct FakeCatalog {
    pub records: Vec<ImageRecord>,
}

impl DatasetCatalog for FakeCatalog {
    fn records(&self) -> &[ImageRecord] {
        &self.records
    }
}

/// Serves precomputed voxel rows keyed by image path on a 10x10x1 grid.
pub struct FakeMasker {
    pub rows: HashMap<PathBuf, Vec<f64>>,
}

impl Masker for FakeMasker {
    fn n_voxels(&self) -> usize {
        GRID.0 * GRID.1 * GRID.2
    }

    fn transform(&self, paths: &[PathBuf]) -> Result<Array2<f64>> {
        let mut y = Array2::zeros((paths.len(), self.n_voxels()));
        for (i, path) in paths.iter().enumerate() {
            let row = self
                .rows
                .get(path)
                .ok_or_else(|| anyhow::anyhow!("no such image {}", path.display()))?;
            for (j, v) in row.iter().enumerate() {
                y[[i, j]] = *v;
            }
        }
        Ok(y)
    }

    fn inverse_transform(&self, values: ArrayView1<'_, f64>) -> Result<Volume> {
        let data = Array3::from_shape_fn(GRID, |(i, j, _)| values[i * GRID.1 + j]);
        Ok(Volume::new(data, scaling_affine([2.0, 2.0, 2.0], [0.0; 3])))
    }

    fn neighbors(&self) -> Option<Vec<Vec<usize>>> {
        let (nx, ny, _) = GRID;
        Some(
            (0..nx * ny)
                .map(|v| {
                    let (i, j) = (v / ny, v % ny);
                    let mut out = Vec::new();
                    if i > 0 {
                        out.push(v - ny);
                    }
                    if i + 1 < nx {
                        out.push(v + ny);
                    }
                    if j > 0 {
                        out.push(v - 1);
                    }
                    if j + 1 < ny {
                        out.push(v + 1);
                    }
                    out
                })
                .collect(),
        )
    }
}

pub fn image_record(subject: &str, session: &str) -> ImageRecord {
    let mut entities = Entities::new();
    entities.insert("subject".into(), subject.into());
    entities.insert("session".into(), session.into());
    entities.insert("datatype".into(), "pet".into());
    entities.insert("desc".into(), "pib".into());
    entities.insert("meas".into(), "dvr".into());
    entities.insert("suffix".into(), "mimap".into());
    entities.insert("extension".into(), "nii.gz".into());
    ImageRecord {
        path: PathBuf::from(format!(
            "derivatives/sub-{subject}/ses-{session}/pet/sub-{subject}_ses-{session}_desc-pib_meas-dvr_mimap.nii.gz"
        )),
        entities,
    }
}

pub struct Study {
    pub catalog: FakeCatalog,
    pub masker: FakeMasker,
    pub table: DataFrame,
}

/// `n` subjects with one session each; voxels 0..10 carry an age effect, the rest noise.
pub fn synthetic_study(n: usize, missing_age: usize) -> Study {
    let mut rng = StdRng::seed_from_u64(7);
    let mut records = Vec::with_capacity(n);
    let mut rows = HashMap::new();
    let mut subjects = Vec::with_capacity(n);
    let mut ages = Vec::with_capacity(n);
    let mut sexes = Vec::with_capacity(n);
    for s in 0..n {
        let subject = format!("{:02}", s + 1);
        let age = 55.0 + (s as f64 * 7.0) % 30.0 + rng.random::<f64>();
        let record = image_record(&subject, "01");
        let row: Vec<f64> = (0..100)
            .map(|v| {
                let noise = rng.random::<f64>() - 0.5;
                if v < 10 { 1.0 + 0.2 * age + noise } else { 1.5 + noise }
            })
            .collect();
        rows.insert(record.path.clone(), row);
        records.push(record);
        subjects.push(subject);
        ages.push(if s < missing_age { None } else { Some(age) });
        sexes.push(if s % 2 == 0 { "F" } else { "M" });
    }
    let sessions = vec!["01"; n];
    let table = df!(
        "subject" => subjects,
        "session" => sessions,
        "age" => ages,
        "sex" => sexes,
    )
    .expect("table");
    Study {
        catalog: FakeCatalog { records },
        masker: FakeMasker { rows },
        table,
    }
}
