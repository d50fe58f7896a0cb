use ndarray::Axis;
use polars::prelude::DataFrame;
use tracing::info;

use crate::cohort::assemble_cohort;
use crate::config::{AnalysisConfig, PathsConfig};
use crate::design::{ModelMatrixBuilder, WilkinsonBuilder, build_design};
use crate::error::{NeuroVoxelError, Result};
use crate::formula::Formula;
use crate::io::read_tabular;
use crate::layout::{
    BidsLayout, DatasetCatalog, EntityNames, apply_labels, image_types, resolve_outcome,
    validate_labels,
};
use crate::masker::{Masker, NiftiMasker};
use crate::matrix::ols_fit;
use crate::missing::apply_missing_gate;
use crate::permutation::{PermutationEngine, PermutationInput, PermutedOls};
use crate::qc::{check_dir_exists, check_file_exists};
use crate::result::AnalysisResult;
use crate::types::StatKind;
use crate::voxels::prepare_voxels;

#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub catalog: &'a dyn DatasetCatalog,
    pub masker: &'a dyn Masker,
    pub engine: &'a dyn PermutationEngine,
    pub model_matrix: &'a dyn ModelMatrixBuilder,
}

pub fn run_analysis(
    config: &AnalysisConfig,
    table: &DataFrame,
    collaborators: &Collaborators<'_>,
) -> Result<AnalysisResult> {
    config.validate()?;

    let formula = Formula::parse(&config.formula)?;
    let mut types = image_types(collaborators.catalog);
    apply_labels(&mut types, &config.image_type_labels)?;
    validate_labels(&types)?;
    let outcome = resolve_outcome(&types, &formula.lhs)?;
    let images = collaborators.catalog.get(&outcome.filter());
    info!(
        "Query `{}`: {} images of type `{}`",
        formula.text,
        images.len(),
        outcome.name
    );

    let required = formula.required_variables()?;
    let cohort = assemble_cohort(
        &images,
        table,
        &formula.lhs,
        &required,
        config.multi_session,
        config.random_seed,
    )?;
    let design = build_design(
        collaborators.model_matrix,
        &formula.rhs,
        &cohort.table,
        &config.inference_terms,
    )?;

    let paths = cohort.image_paths()?;
    let raw = collaborators
        .masker
        .transform(&paths)
        .map_err(NeuroVoxelError::collaborator)?;
    let n_voxels = collaborators.masker.n_voxels();
    if raw.nrows() != cohort.n_rows() || raw.ncols() != n_voxels {
        return Err(NeuroVoxelError::Collaborator(format!(
            "masker returned a {}x{} matrix for {} images and {n_voxels} voxels",
            raw.nrows(),
            raw.ncols(),
            cohort.n_rows()
        )));
    }

    let prepared = prepare_voxels(raw, config.zero_voxels, config.standardization);
    let gated = apply_missing_gate(&formula.text, &design, &prepared.y)?;

    let beta = ols_fit(&gated.design.x, &gated.y).map_err(NeuroVoxelError::collaborator)?;
    let tested_idx = gated.design.tested_indices();
    let tested = gated.design.tested();
    let confounds = gated.design.confounds();
    let neighbors = collaborators.masker.neighbors();
    let input = PermutationInput {
        tested: tested.view(),
        target: gated.y.view(),
        confounds: confounds.view(),
        neighbors: neighbors.as_deref(),
    };
    let mut stats = collaborators
        .engine
        .run(&input, &config.permutation_options())
        .map_err(NeuroVoxelError::collaborator)?;
    stats.insert(StatKind::Beta, beta.select(Axis(0), &tested_idx));

    for (kind, map) in &stats {
        if map.dim() != (tested_idx.len(), n_voxels) {
            return Err(NeuroVoxelError::Collaborator(format!(
                "statistic `{kind}` has shape {:?}, expected ({}, {n_voxels})",
                map.dim(),
                tested_idx.len()
            )));
        }
    }

    let cohort = cohort.filter_rows(&gated.rows)?;
    Ok(AnalysisResult {
        outcome: formula.lhs.clone(),
        formula: formula.text.clone(),
        tested_var_names: gated.design.tested_names(),
        stats,
        n_observations: cohort.n_rows(),
        cohort: cohort.table,
    })
}

pub struct Pipeline {
    pub layout: BidsLayout,
    pub table: DataFrame,
    pub masker: NiftiMasker,
}

impl Pipeline {
    pub fn load(paths: &PathsConfig, config: &AnalysisConfig) -> Result<Self> {
        check_dir_exists(&paths.bids_root, "bids_root")?;
        check_file_exists(&paths.tabular, "tabular")?;
        check_file_exists(&paths.mask, "mask")?;
        let names = match &paths.bids_config {
            Some(path) => {
                check_file_exists(path, "bids_config")?;
                EntityNames::from_config(path).map_err(NeuroVoxelError::collaborator)?
            }
            None => EntityNames::default(),
        };
        let layout = BidsLayout::scan_with(&paths.bids_root, true, &names)
            .map_err(NeuroVoxelError::collaborator)?;
        let table = read_tabular(&paths.tabular).map_err(NeuroVoxelError::collaborator)?;
        let masker = NiftiMasker::from_path(&paths.mask, config.masking_params())
            .map_err(NeuroVoxelError::collaborator)?;
        Ok(Self {
            layout,
            table,
            masker,
        })
    }

    pub fn run(&self, config: &AnalysisConfig) -> Result<AnalysisResult> {
        let engine = PermutedOls::default();
        let builder = WilkinsonBuilder::default();
        let collaborators = Collaborators {
            catalog: &self.layout,
            masker: &self.masker,
            engine: &engine,
            model_matrix: &builder,
        };
        run_analysis(config, &self.table, &collaborators)
    }
}
