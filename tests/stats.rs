use approx::assert_abs_diff_eq;
use ndarray::{Array2, array};
use neurovoxel::clusters::{cluster_maps, label_clusters, tfce};
use neurovoxel::matrix::{ols_fit, pinv, residualize};
use neurovoxel::permutation::{
    PermutationEngine, PermutationInput, PermutationOptions, PermutedOls, fwe_log_p,
};
use neurovoxel::types::StatKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn chain(n: usize) -> Vec<Vec<usize>> {
    (0..n)
        .map(|i| {
            let mut out = Vec::new();
            if i > 0 {
                out.push(i - 1);
            }
            if i + 1 < n {
                out.push(i + 1);
            }
            out
        })
        .collect()
}

#[test]
fn labels_split_on_gaps() {
    let active = [true, true, false, true, false, true, true, true];
    let (labels, sizes) = label_clusters(&active, &chain(active.len()));
    assert_eq!(sizes, vec![2, 1, 3]);
    assert_eq!(labels[2], None);
    assert_eq!(labels[0], labels[1]);
    assert_ne!(labels[1], labels[3]);
}

#[test]
fn tfce_keeps_sign_and_rewards_extent() {
    let stat = [0.0, 3.0, 3.0, 3.0, 0.0, 3.0, 0.0, -3.0];
    let scores = tfce(&stat, &chain(stat.len()));
    assert_eq!(scores[0], 0.0);
    assert!(scores[1] > 0.0);
    assert!(scores[7] < 0.0);
    assert!(scores[2] > scores[5]);
    assert!((scores[5] + scores[7]).abs() < 1e-9);
}

#[test]
fn cluster_mass_sums_excess_over_threshold() {
    let stat = [3.0, 4.0, 0.0, -5.0];
    let maps = cluster_maps(&stat, &chain(stat.len()), 2.0);
    assert_eq!(maps.size, vec![2.0, 2.0, 0.0, 1.0]);
    assert!((maps.mass[0] - 3.0).abs() < 1e-12);
    assert!((maps.mass[3] - 3.0).abs() < 1e-12);
    assert_eq!(maps.max_size, 2.0);
}

#[test]
fn ols_recovers_exact_coefficients() {
    let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
    let y = array![[1.0, 2.0], [3.0, 1.0], [5.0, 0.0], [7.0, -1.0]];
    let beta = ols_fit(&x, &y).expect("fit");
    assert_eq!(beta.dim(), (2, 2));
    assert_abs_diff_eq!(beta[[0, 0]], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(beta[[1, 0]], 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(beta[[0, 1]], 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(beta[[1, 1]], -1.0, epsilon = 1e-9);
}

#[test]
fn pinv_handles_rank_deficiency() {
    let a = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
    let p = pinv(&a).expect("pinv");
    let back = a.dot(&p).dot(&a);
    for (u, v) in back.iter().zip(a.iter()) {
        assert_abs_diff_eq!(*u, *v, epsilon = 1e-9);
    }
    let ones = Array2::<f64>::ones((3, 1));
    let r = residualize(&a, &ones).expect("residualize");
    assert_abs_diff_eq!(r.column(0).sum(), 0.0, epsilon = 1e-9);
}

#[test]
fn log_p_counts_null_maxima_at_or_above() {
    let logp = fwe_log_p(&[0.5, 2.0, 10.0], [1.0, 2.0, 3.0].into_iter());
    assert_abs_diff_eq!(logp[0], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(logp[1], -(3.0f64 / 4.0).log10(), epsilon = 1e-12);
    assert_abs_diff_eq!(logp[2], 4.0f64.log10(), epsilon = 1e-12);
}

fn regression_data() -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(3);
    let n = 30;
    let tested = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
    let confounds = Array2::from_shape_fn((n, 1), |(i, _)| (i % 3) as f64);
    let target = Array2::from_shape_fn((n, 6), |(i, j)| {
        let noise = rng.random::<f64>() - 0.5;
        if j == 0 { 0.3 * i as f64 + 2.0 * (i % 3) as f64 + noise } else { noise }
    });
    (tested, target, confounds)
}

#[test]
fn permuted_ols_flags_the_true_effect() {
    let (tested, target, confounds) = regression_data();
    let input = PermutationInput {
        tested: tested.view(),
        target: target.view(),
        confounds: confounds.view(),
        neighbors: None,
    };
    let options = PermutationOptions {
        n_perm: 99,
        n_jobs: Some(2),
        seed: 5,
        ..PermutationOptions::default()
    };
    let maps = PermutedOls::default().run(&input, &options).expect("run");
    assert_eq!(maps.len(), 2);
    let t = &maps[&StatKind::T];
    let logp = &maps[&StatKind::LogpMaxT];
    assert_eq!(t.dim(), (1, 6));
    assert!(t[[0, 0]] > 10.0);
    assert_abs_diff_eq!(logp[[0, 0]], 2.0, epsilon = 1e-12);
    assert!(logp.row(0).iter().skip(1).all(|&p| p < 2.0));

    // the worker count never changes the permutation draws
    let serial = PermutationOptions {
        n_jobs: Some(1),
        ..options.clone()
    };
    let again = PermutedOls::default().run(&input, &serial).expect("run");
    assert_eq!(again[&StatKind::LogpMaxT], maps[&StatKind::LogpMaxT]);
}

#[test]
fn constant_regressor_is_tested_by_sign_flips() {
    let mut rng = StdRng::seed_from_u64(11);
    let n = 30;
    let tested = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { 1.0 } else { i as f64 });
    let confounds = Array2::zeros((n, 0));
    let target = Array2::from_shape_fn((n, 6), |(_, j)| {
        let noise = rng.random::<f64>() - 0.5;
        if j == 0 { 2.0 + noise } else { noise }
    });
    let input = PermutationInput {
        tested: tested.view(),
        target: target.view(),
        confounds: confounds.view(),
        neighbors: None,
    };
    let options = PermutationOptions {
        n_perm: 99,
        n_jobs: Some(2),
        seed: 9,
        ..PermutationOptions::default()
    };
    let maps = PermutedOls::default().run(&input, &options).expect("run");
    let t = &maps[&StatKind::T];
    let logp = &maps[&StatKind::LogpMaxT];
    assert_eq!(t.dim(), (2, 6));
    assert!(t[[0, 0]] > 10.0);
    assert!(t.row(0).iter().all(|&v| v != 0.0));
    assert_abs_diff_eq!(logp[[0, 0]], 2.0, epsilon = 1e-12);
    assert!(logp.row(0).iter().skip(1).all(|&p| p < 2.0));
}

#[test]
fn topology_statistics_need_adjacency() {
    let (tested, target, confounds) = regression_data();
    let input = PermutationInput {
        tested: tested.view(),
        target: target.view(),
        confounds: confounds.view(),
        neighbors: None,
    };
    let options = PermutationOptions {
        n_perm: 10,
        tfce: true,
        ..PermutationOptions::default()
    };
    assert!(PermutedOls::default().run(&input, &options).is_err());

    let adjacency = chain(6);
    let with_topology = PermutationInput {
        neighbors: Some(adjacency.as_slice()),
        ..input
    };
    let options = PermutationOptions {
        n_perm: 10,
        tfce: true,
        cluster_threshold: Some(2.0),
        ..PermutationOptions::default()
    };
    let maps = PermutedOls::default()
        .run(&with_topology, &options)
        .expect("run");
    let kinds: Vec<StatKind> = maps.keys().copied().collect();
    assert_eq!(
        kinds,
        vec![
            StatKind::T,
            StatKind::Tfce,
            StatKind::Size,
            StatKind::Mass,
            StatKind::LogpMaxT,
            StatKind::LogpMaxTfce,
            StatKind::LogpMaxSize,
            StatKind::LogpMaxMass,
        ]
    );
    assert!(maps[&StatKind::Size][[0, 0]] >= 1.0);
}
