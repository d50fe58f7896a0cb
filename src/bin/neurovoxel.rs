use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use neurovoxel::analysis::Pipeline;
use neurovoxel::config::load_config;
use neurovoxel::design::InferenceTerms;
use neurovoxel::export::{export_maps, export_summary};
use neurovoxel::formula::Formula;
use neurovoxel::layout::{BidsLayout, EntityNames, image_types, image_types_frame};
use neurovoxel::logging::{init_tracing, log_line, open_run_log, warn_line};

#[derive(Parser)]
#[command(name = "neurovoxel")]
#[command(about = "Voxelwise regression with permutation inference", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the image types found in a dataset.
    ImageTypes {
        #[arg(long, required = true)]
        bids_root: PathBuf,
        #[arg(long)]
        bids_config: Option<PathBuf>,
        #[arg(long)]
        no_derivatives: bool,
    },
    /// Run an analysis described by a JSON configuration file.
    Run {
        #[arg(long, required = true)]
        config: PathBuf,
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        inference_terms: Option<String>,
        #[arg(long)]
        n_perm: Option<usize>,
        #[arg(long)]
        n_jobs: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        outdir: Option<PathBuf>,
        #[arg(long)]
        tfce: bool,
    },
}

fn split_string_list(input: String) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::ImageTypes {
            bids_root,
            bids_config,
            no_derivatives,
        } => {
            let names = match bids_config {
                Some(path) => EntityNames::from_config(&path)?,
                None => EntityNames::default(),
            };
            let layout = BidsLayout::scan_with(&bids_root, !no_derivatives, &names)?;
            let types = image_types(&layout);
            println!("{}", image_types_frame(&types)?);
        }
        Command::Run {
            config,
            query,
            inference_terms,
            n_perm,
            n_jobs,
            seed,
            outdir,
            tfce,
        } => {
            let (file, mut analysis) = load_config(&config)?;
            if let Some(query) = query {
                analysis.formula = query;
            }
            if let Some(terms) = inference_terms {
                analysis.inference_terms = InferenceTerms::Named(split_string_list(terms));
            }
            if let Some(n_perm) = n_perm {
                analysis.n_perm = n_perm;
            }
            if n_jobs.is_some() {
                analysis.n_jobs = n_jobs;
            }
            if let Some(seed) = seed {
                analysis.random_seed = seed;
            }
            analysis.tfce |= tfce;
            analysis.validate()?;

            let outdir = outdir.unwrap_or_else(|| file.paths.outputdir.clone());
            let outcome = Formula::parse(&analysis.formula)?.lhs;
            let mut log = open_run_log(&outdir.join(format!("{outcome}.log")))?;
            log_line(&mut log, &format!("Query: {}", analysis.formula), true)?;

            let pipeline = Pipeline::load(&file.paths, &analysis)?;
            let result = match pipeline.run(&analysis) {
                Ok(result) => result,
                Err(err) => {
                    let kind = if err.is_input_error() {
                        "Analysis input rejected"
                    } else {
                        "Analysis failed"
                    };
                    warn_line(&mut log, &format!("{kind}: {err}"))?;
                    return Err(err).context(kind);
                }
            };
            log_line(
                &mut log,
                &format!(
                    "Fitted {} observations; tested {}",
                    result.n_observations,
                    result.tested_var_names.join(", ")
                ),
                true,
            )?;

            let maps = export_maps(&outdir, &result, &pipeline.masker, &outcome)?;
            for path in &maps {
                log_line(&mut log, &format!("Wrote {}", path.display()), false)?;
            }
            let summary = export_summary(&outdir, &result, &outcome)?;
            log_line(
                &mut log,
                &format!(
                    "Wrote {} maps and summary {}",
                    maps.len(),
                    summary.display()
                ),
                true,
            )?;
        }
    }

    Ok(())
}
