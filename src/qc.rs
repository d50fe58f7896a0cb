use std::path::Path;

use crate::error::{NeuroVoxelError, Result};

pub fn check_range_f64(value: f64, min: f64, max: f64, name: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(NeuroVoxelError::Configuration(format!(
            "Value of {name} should be finite"
        )));
    }
    if value < min || value > max {
        return Err(NeuroVoxelError::Configuration(format!(
            "Value of {name} ({value}) should be between {min} and {max}"
        )));
    }
    Ok(())
}

pub fn check_max_usize(value: usize, max: usize, name: &str) -> Result<()> {
    if value > max {
        return Err(NeuroVoxelError::Configuration(format!(
            "Value of {name} ({value}) should be at most {max}"
        )));
    }
    Ok(())
}

pub fn check_file_exists(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        return Err(NeuroVoxelError::Configuration(format!(
            "File {path:?} passed as {name} does not exist"
        )));
    }
    Ok(())
}

pub fn check_dir_exists(path: &Path, name: &str) -> Result<()> {
    if !path.is_dir() {
        return Err(NeuroVoxelError::Configuration(format!(
            "Directory {path:?} passed as {name} does not exist"
        )));
    }
    Ok(())
}
