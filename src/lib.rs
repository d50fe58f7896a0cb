//! Voxelwise mass-univariate regression over BIDS-style neuroimaging datasets.

pub mod error;
pub mod logging;
pub mod types;

pub mod config;
pub mod df_utils;
pub mod io;
pub mod matrix;
pub mod parallel;
pub mod qc;

pub mod clusters;
pub mod masker;
pub mod nifti_io;
pub mod permutation;

pub mod analysis;
pub mod cohort;
pub mod design;
pub mod export;
pub mod formula;
pub mod layout;
pub mod missing;
pub mod result;
pub mod voxels;

pub use analysis::{Collaborators, Pipeline, run_analysis};
pub use config::AnalysisConfig;
pub use error::{NeuroVoxelError, Result};
pub use result::AnalysisResult;
