use approx::assert_abs_diff_eq;
use ndarray::{Array2, array};
use neurovoxel::design::DesignMatrix;
use neurovoxel::error::NeuroVoxelError;
use neurovoxel::missing::{MIN_OBSERVATIONS, apply_missing_gate};
use neurovoxel::types::{Standardization, ZeroVoxelPolicy};
use neurovoxel::voxels::prepare_voxels;

fn raw() -> Array2<f64> {
    array![
        [1.0, f64::NAN, 0.0, 4.0],
        [2.0, 5.0, 3.0, 6.0],
        [3.0, 7.0, 2.0, 8.0],
    ]
}

#[test]
fn nan_columns_zeroed_under_any_policy() {
    for policy in [ZeroVoxelPolicy::Keep, ZeroVoxelPolicy::Exclude] {
        let prepared = prepare_voxels(raw(), policy, Standardization::None);
        assert_eq!(prepared.y.ncols(), 4);
        assert!(prepared.y.column(1).iter().all(|&v| v == 0.0));
        assert!(prepared.excluded[1]);
    }
}

#[test]
fn zero_columns_only_excluded_on_request() {
    let kept = prepare_voxels(raw(), ZeroVoxelPolicy::Keep, Standardization::None);
    assert_eq!(kept.y.column(2).to_vec(), vec![0.0, 3.0, 2.0]);
    assert_eq!(kept.n_excluded(), 1);

    let dropped = prepare_voxels(raw(), ZeroVoxelPolicy::Exclude, Standardization::None);
    assert!(dropped.y.column(2).iter().all(|&v| v == 0.0));
    assert_eq!(dropped.n_excluded(), 2);
    assert_eq!(dropped.y.column(3).to_vec(), vec![4.0, 6.0, 8.0]);
}

#[test]
fn scaling_uses_one_global_mean_and_sd() {
    let prepared = prepare_voxels(raw(), ZeroVoxelPolicy::Keep, Standardization::Scale);
    let kept: Vec<f64> = [0usize, 2, 3]
        .iter()
        .flat_map(|&j| prepared.y.column(j).to_vec())
        .collect();
    let n = kept.len() as f64;
    let mean = kept.iter().sum::<f64>() / n;
    let sd = (kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(sd, 1.0, epsilon = 1e-12);

    // a single global statistic, so individual columns keep their own offsets
    let col0: f64 = prepared.y.column(0).sum() / 3.0;
    let col3: f64 = prepared.y.column(3).sum() / 3.0;
    assert!(col3 > col0);
    assert!(prepared.y.column(1).iter().all(|&v| v == 0.0));
}

#[test]
fn centering_leaves_spread() {
    let prepared = prepare_voxels(raw(), ZeroVoxelPolicy::Keep, Standardization::Center);
    // kept entries: 1,2,3, 0,3,2, 4,6,8 -> mean 29/9
    assert_abs_diff_eq!(prepared.y[[0, 0]], 1.0 - 29.0 / 9.0, epsilon = 1e-12);
    assert_abs_diff_eq!(prepared.y[[2, 3]], 8.0 - 29.0 / 9.0, epsilon = 1e-12);
}

fn design(rows: usize, missing: usize) -> DesignMatrix {
    let x = Array2::from_shape_fn((rows, 2), |(i, j)| {
        if j == 0 {
            1.0
        } else if i < missing {
            f64::NAN
        } else {
            i as f64
        }
    });
    DesignMatrix {
        x,
        column_names: vec!["Intercept".to_string(), "age".to_string()],
        is_tested: vec![false, true],
    }
}

#[test]
fn gate_threshold_is_ten() {
    assert_eq!(MIN_OBSERVATIONS, 10);
    let y = Array2::from_shape_fn((12, 5), |(i, j)| (i * 5 + j) as f64);

    let err = apply_missing_gate("img ~ age", &design(12, 3), &y).expect_err("nine rows");
    match err {
        NeuroVoxelError::InsufficientData(message) => {
            assert!(message.contains("img ~ age"));
            assert!(message.contains("only 9 "));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let gated = apply_missing_gate("img ~ age", &design(12, 2), &y).expect("ten rows");
    assert_eq!(gated.rows, (2..12).collect::<Vec<_>>());
    assert_eq!(gated.design.n_rows(), 10);
    assert_eq!(gated.y.dim(), (10, 5));
    // rows stay paired
    assert_eq!(gated.y[[0, 0]], 10.0);
    assert_eq!(gated.design.x[[0, 1]], 2.0);
}

#[test]
fn gate_rejects_misaligned_inputs() {
    let y = Array2::zeros((11, 3));
    let err = apply_missing_gate("img ~ age", &design(12, 0), &y).expect_err("mismatch");
    assert!(matches!(err, NeuroVoxelError::Collaborator(_)));
}

#[test]
fn infinite_columns_do_not_leak_into_centering() {
    let y = array![
        [1.0, f64::INFINITY, 2.0],
        [2.0, 3.0, 4.0],
        [3.0, f64::NEG_INFINITY, 6.0],
    ];
    let prepared = prepare_voxels(y, ZeroVoxelPolicy::Keep, Standardization::Center);
    assert!(prepared.excluded[1]);
    assert!(prepared.y.column(1).iter().all(|&v| v == 0.0));
    assert!(prepared.y.iter().all(|v| v.is_finite()));
    assert_abs_diff_eq!(prepared.y[[0, 0]], 1.0 - 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(prepared.y[[2, 2]], 6.0 - 3.0, epsilon = 1e-12);
}
