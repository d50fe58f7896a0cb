mod common;

use common::{OUTCOME, synthetic_study};
use neurovoxel::analysis::{Collaborators, run_analysis};
use neurovoxel::config::AnalysisConfig;
use neurovoxel::design::{InferenceTerms, WilkinsonBuilder};
use neurovoxel::error::NeuroVoxelError;
use neurovoxel::export::export_maps;
use neurovoxel::layout::ImageTypeLabel;
use neurovoxel::permutation::PermutedOls;
use neurovoxel::types::StatKind;

fn config(formula: &str) -> AnalysisConfig {
    let mut config = AnalysisConfig::new(formula);
    config.n_perm = 50;
    config.n_jobs = Some(2);
    config
}

#[test]
fn age_model_end_to_end() {
    let study = synthetic_study(50, 0);
    let engine = PermutedOls::default();
    let builder = WilkinsonBuilder::default();
    let collaborators = Collaborators {
        catalog: &study.catalog,
        masker: &study.masker,
        engine: &engine,
        model_matrix: &builder,
    };
    let result = run_analysis(
        &config("pib_dvr_mimap ~ age"),
        &study.table,
        &collaborators,
    )
    .expect("analysis");

    assert_eq!(result.tested_var_names, vec!["age".to_string()]);
    assert_eq!(result.n_observations, 50);
    let kinds: Vec<StatKind> = result.stats.keys().copied().collect();
    assert_eq!(kinds, vec![StatKind::Beta, StatKind::T, StatKind::LogpMaxT]);
    for kind in &kinds {
        assert_eq!(result.stats[kind].dim(), (1, 100));
    }

    let beta = result.stat_row(StatKind::Beta, "age").expect("beta");
    assert!((beta[0] - 0.2).abs() < 0.05);
    let logp = result.stat_row(StatKind::LogpMaxT, "age").expect("logp");
    let best = -(1.0f64 / 51.0).log10();
    assert!((logp[0] - best).abs() < 1e-9);
    assert!(logp.iter().all(|&p| (0.0..=best + 1e-9).contains(&p)));

    let outdir = tempfile::tempdir().expect("tempdir");
    let written = export_maps(outdir.path(), &result, &study.masker, OUTCOME).expect("export");
    assert_eq!(written.len(), 3);
    for token in ["beta", "t", "logpmaxt"] {
        let path = outdir
            .path()
            .join(format!("{OUTCOME}_contrast-age_stat-{token}_map.nii.gz"));
        assert!(path.exists(), "missing {}", path.display());
    }

    // re-export overwrites in place
    let again = export_maps(outdir.path(), &result, &study.masker, OUTCOME).expect("export");
    assert_eq!(again, written);
    assert_eq!(std::fs::read_dir(outdir.path()).expect("dir").count(), 3);
}

#[test]
fn missing_age_rows_are_dropped_but_voxels_kept() {
    let study = synthetic_study(50, 5);
    let engine = PermutedOls::default();
    let builder = WilkinsonBuilder::default();
    let collaborators = Collaborators {
        catalog: &study.catalog,
        masker: &study.masker,
        engine: &engine,
        model_matrix: &builder,
    };
    let result = run_analysis(
        &config("pib_dvr_mimap ~ age"),
        &study.table,
        &collaborators,
    )
    .expect("analysis");

    assert_eq!(result.n_observations, 45);
    assert_eq!(result.cohort.height(), 45);
    assert_eq!(result.n_voxels(), 100);
    for map in result.stats.values() {
        assert_eq!(map.ncols(), 100);
    }
}

#[test]
fn interaction_term_expands_and_sanitizes() {
    let study = synthetic_study(40, 0);
    let engine = PermutedOls::default();
    let builder = WilkinsonBuilder::default();
    let collaborators = Collaborators {
        catalog: &study.catalog,
        masker: &study.masker,
        engine: &engine,
        model_matrix: &builder,
    };
    let mut config = config("pib_dvr_mimap ~ age * sex");
    config.inference_terms = InferenceTerms::Named(vec!["age:sex".to_string()]);
    config.tfce = true;
    let result = run_analysis(&config, &study.table, &collaborators).expect("analysis");

    assert_eq!(result.tested_var_names, vec!["age:sex[T.M]".to_string()]);
    assert!(result.stats.contains_key(&StatKind::Tfce));
    assert!(result.stats.contains_key(&StatKind::LogpMaxTfce));

    let outdir = tempfile::tempdir().expect("tempdir");
    let written = export_maps(outdir.path(), &result, &study.masker, OUTCOME).expect("export");
    assert_eq!(written.len(), 5);
    assert!(
        outdir
            .path()
            .join(format!("{OUTCOME}_contrast-agesexTM_stat-tfce_map.nii.gz"))
            .exists()
    );
}

#[test]
fn input_errors_are_classified() {
    let study = synthetic_study(20, 0);
    let engine = PermutedOls::default();
    let builder = WilkinsonBuilder::default();
    let collaborators = Collaborators {
        catalog: &study.catalog,
        masker: &study.masker,
        engine: &engine,
        model_matrix: &builder,
    };
    let run = |formula: &str| run_analysis(&config(formula), &study.table, &collaborators);

    let err = run("pib_dvr_mimap age").expect_err("no tilde");
    assert!(matches!(err, NeuroVoxelError::FormulaSyntax { .. }));
    let err = run("fdg_suvr ~ age").expect_err("unknown outcome");
    assert!(matches!(err, NeuroVoxelError::InvalidOutcome(_)));
    let err = run("pib_dvr_mimap ~ weight").expect_err("unknown column");
    match &err {
        NeuroVoxelError::FormulaMaterialization { formula, .. } => assert_eq!(formula, "weight"),
        other => panic!("unexpected error {other:?}"),
    }
    let err = run("pib_dvr_mimap ~ age +").expect_err("dangling operator");
    assert!(matches!(err, NeuroVoxelError::FormulaSyntax { .. }));
    assert!(err.is_input_error());

    let mut bad_terms = config("pib_dvr_mimap ~ age");
    bad_terms.inference_terms = InferenceTerms::Named(vec!["height".to_string()]);
    let err = run_analysis(&bad_terms, &study.table, &collaborators).expect_err("unknown term");
    assert!(matches!(err, NeuroVoxelError::Configuration(_)));
}

#[test]
fn too_few_complete_rows_fail_with_count() {
    let study = synthetic_study(15, 6);
    let engine = PermutedOls::default();
    let builder = WilkinsonBuilder::default();
    let collaborators = Collaborators {
        catalog: &study.catalog,
        masker: &study.masker,
        engine: &engine,
        model_matrix: &builder,
    };
    let err = run_analysis(&config("pib_dvr_mimap ~ age"), &study.table, &collaborators)
        .expect_err("nine rows");
    match err {
        NeuroVoxelError::InsufficientData(message) => {
            assert!(message.contains("pib_dvr_mimap ~ age"));
            assert!(message.contains(" 9 "));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn intercept_can_be_an_inference_term() {
    let study = synthetic_study(50, 0);
    let engine = PermutedOls::default();
    let builder = WilkinsonBuilder::default();
    let collaborators = Collaborators {
        catalog: &study.catalog,
        masker: &study.masker,
        engine: &engine,
        model_matrix: &builder,
    };
    let mut with_intercept = config("pib_dvr_mimap ~ age");
    with_intercept.inference_terms =
        InferenceTerms::Named(vec!["Intercept".to_string(), "age".to_string()]);
    let result = run_analysis(&with_intercept, &study.table, &collaborators).expect("analysis");

    assert_eq!(
        result.tested_var_names,
        vec!["Intercept".to_string(), "age".to_string()]
    );
    let t = result.stat_row(StatKind::T, "Intercept").expect("t");
    assert!(t.iter().all(|&v| v > 10.0));
    let logp = result.stat_row(StatKind::LogpMaxT, "Intercept").expect("logp");
    let best = -(1.0f64 / 51.0).log10();
    assert!(logp.iter().all(|&p| (p - best).abs() < 1e-9));
}

#[test]
fn relabelled_outcome_is_queryable() {
    let study = synthetic_study(20, 0);
    let engine = PermutedOls::default();
    let builder = WilkinsonBuilder::default();
    let collaborators = Collaborators {
        catalog: &study.catalog,
        masker: &study.masker,
        engine: &engine,
        model_matrix: &builder,
    };
    let mut relabelled = config("amyloid ~ age");
    relabelled.image_type_labels = vec![ImageTypeLabel {
        name: "amyloid".to_string(),
        entities: [("desc".to_string(), "pib".to_string())].into(),
    }];
    let result = run_analysis(&relabelled, &study.table, &collaborators).expect("analysis");
    assert_eq!(result.outcome, "amyloid");
    assert_eq!(result.n_observations, 20);

    let err = run_analysis(&config("amyloid ~ age"), &study.table, &collaborators)
        .expect_err("derived name only");
    assert!(matches!(err, NeuroVoxelError::InvalidOutcome(_)));
}
