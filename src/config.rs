use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::design::InferenceTerms;
use crate::error::{NeuroVoxelError, Result};
use crate::layout::ImageTypeLabel;
use crate::masker::MaskingParams;
use crate::permutation::PermutationOptions;
use crate::qc::{check_max_usize, check_range_f64};
use crate::types::{MultiSessionPolicy, Standardization, ZeroVoxelPolicy};

pub const MAX_PERMUTATIONS: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub formula: String,
    pub inference_terms: InferenceTerms,
    pub smoothing_fwhm: f64,
    pub voxel_size: f64,
    pub n_perm: usize,
    pub n_jobs: Option<usize>, // None: every core
    pub random_seed: u64,
    pub tfce: bool,
    pub cluster_threshold: Option<f64>,
    pub multi_session: MultiSessionPolicy,
    pub zero_voxels: ZeroVoxelPolicy,
    pub standardization: Standardization,
    pub image_type_labels: Vec<ImageTypeLabel>,
}

impl AnalysisConfig {
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            inference_terms: InferenceTerms::AllButIntercept,
            smoothing_fwhm: 5.0,
            voxel_size: 4.0,
            n_perm: 1000,
            n_jobs: None,
            random_seed: 42,
            tfce: false,
            cluster_threshold: None,
            multi_session: MultiSessionPolicy::All,
            zero_voxels: ZeroVoxelPolicy::Keep,
            standardization: Standardization::None,
            image_type_labels: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_range_f64(self.smoothing_fwhm, 0.0, 15.0, "smoothing_fwhm")?;
        check_range_f64(self.voxel_size, 1.0, 10.0, "voxel_size")?;
        check_max_usize(self.n_perm, MAX_PERMUTATIONS, "n_perm")?;
        if let Some(thr) = self.cluster_threshold
            && !(thr.is_finite() && thr > 0.0)
        {
            return Err(NeuroVoxelError::Configuration(format!(
                "cluster_threshold must be a positive number, got {thr}"
            )));
        }
        Ok(())
    }

    pub fn masking_params(&self) -> MaskingParams {
        MaskingParams {
            smoothing_fwhm: self.smoothing_fwhm,
            voxel_size: self.voxel_size,
            n_jobs: self.n_jobs,
        }
    }

    pub fn permutation_options(&self) -> PermutationOptions {
        PermutationOptions {
            n_perm: self.n_perm,
            n_jobs: self.n_jobs,
            seed: self.random_seed,
            tfce: self.tfce,
            cluster_threshold: self.cluster_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub paths: PathsConfig,
    pub analysis: AnalysisSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub bids_root: PathBuf,
    #[serde(default)]
    pub bids_config: Option<PathBuf>,
    pub tabular: PathBuf,
    #[serde(default)]
    pub template: Option<PathBuf>,
    pub mask: PathBuf,
    pub outputdir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSection {
    pub query: String,
    #[serde(default)]
    pub inference_terms: Option<Vec<String>>,
    #[serde(default = "default_smoothing")]
    pub smoothing_fwhm: f64,
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f64,
    #[serde(default = "default_n_perm")]
    pub n_perm: i64,
    #[serde(default)]
    pub n_jobs: Option<i64>,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    #[serde(default)]
    pub tfce: bool,
    #[serde(default)]
    pub cluster_threshold: Option<f64>,
    #[serde(default = "default_sessions")]
    pub handle_multiple_sessions: String,
    #[serde(default = "default_zero_voxels")]
    pub handle_zero_voxels: String,
    #[serde(default = "default_standardization")]
    pub voxelwise_standardization: String,
    #[serde(default)]
    pub image_type_labels: Vec<ImageTypeLabel>,
}

fn default_smoothing() -> f64 {
    5.0
}

fn default_voxel_size() -> f64 {
    4.0
}

fn default_n_perm() -> i64 {
    1000
}

fn default_seed() -> u64 {
    42
}

fn default_sessions() -> String {
    "all".to_string()
}

fn default_zero_voxels() -> String {
    "keep".to_string()
}

fn default_standardization() -> String {
    "none".to_string()
}

impl AnalysisSection {
    pub fn to_config(&self) -> Result<AnalysisConfig> {
        if self.n_perm < 0 {
            return Err(NeuroVoxelError::Configuration(format!(
                "Value of n_perm ({}) should be between 0 and {MAX_PERMUTATIONS}",
                self.n_perm
            )));
        }
        let config = AnalysisConfig {
            formula: self.query.clone(),
            inference_terms: match &self.inference_terms {
                Some(terms) => InferenceTerms::Named(terms.clone()),
                None => InferenceTerms::AllButIntercept,
            },
            smoothing_fwhm: self.smoothing_fwhm,
            voxel_size: self.voxel_size,
            n_perm: self.n_perm as usize,
            n_jobs: self.n_jobs.filter(|&j| j > 0).map(|j| j as usize),
            random_seed: self.random_seed,
            tfce: self.tfce,
            cluster_threshold: self.cluster_threshold,
            multi_session: self.handle_multiple_sessions.parse()?,
            zero_voxels: self.handle_zero_voxels.parse()?,
            standardization: self.voxelwise_standardization.parse()?,
            image_type_labels: self.image_type_labels.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl ConfigFile {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| NeuroVoxelError::Configuration(format!("invalid configuration: {e}")))
    }
}

pub fn load_config(path: &Path) -> Result<(ConfigFile, AnalysisConfig)> {
    let text = fs::read_to_string(path)?;
    let file = ConfigFile::from_json(&text).map_err(|e| match e {
        NeuroVoxelError::Configuration(msg) => {
            NeuroVoxelError::Configuration(format!("{}: {msg}", path.display()))
        }
        other => other,
    })?;
    let config = file.analysis.to_config()?;
    debug!("Loaded configuration from {}: {config:?}", path.display());
    Ok((file, config))
}
