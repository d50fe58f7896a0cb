use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{NeuroVoxelError, Result};
use crate::io::write_dataframe;
use crate::masker::Masker;
use crate::result::AnalysisResult;

pub const MAP_EXTENSION: &str = "nii.gz";

/// Keeps only word characters, so `age:sex[T.M]` becomes `agesexTM`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

pub fn map_filename(outcome: &str, variable: &str, stat: &str) -> String {
    format!(
        "{outcome}_contrast-{}_stat-{stat}_map.{MAP_EXTENSION}",
        sanitize_name(variable)
    )
}

pub fn export_maps(
    outdir: &Path,
    result: &AnalysisResult,
    masker: &dyn Masker,
    outcome: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(outdir)?;
    let mut written = Vec::new();
    for (kind, map) in &result.stats {
        for (row, variable) in result.tested_var_names.iter().enumerate() {
            let volume = masker
                .inverse_transform(map.row(row))
                .map_err(NeuroVoxelError::collaborator)?;
            let path = outdir.join(map_filename(outcome, variable, &kind.file_token()));
            volume.save(&path).map_err(NeuroVoxelError::collaborator)?;
            written.push(path);
        }
    }
    info!("Wrote {} statistical maps to {}", written.len(), outdir.display());
    Ok(written)
}

pub fn export_summary(outdir: &Path, result: &AnalysisResult, outcome: &str) -> Result<PathBuf> {
    let path = outdir.join(format!("{outcome}_summary.tsv"));
    let summary = result.summary().map_err(NeuroVoxelError::collaborator)?;
    write_dataframe(&summary, &path).map_err(NeuroVoxelError::collaborator)?;
    Ok(path)
}
