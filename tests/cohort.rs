mod common;

use std::collections::BTreeSet;

use common::{OUTCOME, image_record};
use neurovoxel::cohort::assemble_cohort;
use neurovoxel::df_utils::column_strings;
use neurovoxel::error::NeuroVoxelError;
use neurovoxel::types::{ImageRecord, MultiSessionPolicy};
use polars::prelude::*;

fn records() -> Vec<ImageRecord> {
    let mut out = Vec::new();
    for subject in ["01", "02", "03", "04", "05", "06"] {
        for session in ["01", "02", "03"] {
            out.push(image_record(subject, session));
        }
    }
    out
}

fn table() -> DataFrame {
    let mut subjects = Vec::new();
    let mut sessions = Vec::new();
    let mut ages = Vec::new();
    for (s, subject) in ["01", "02", "03", "04", "05", "06"].iter().enumerate() {
        for (t, session) in ["01", "02", "03"].iter().enumerate() {
            subjects.push(subject.to_string());
            sessions.push(session.to_string());
            ages.push(60.0 + s as f64 + t as f64 * 2.0);
        }
    }
    let n = subjects.len();
    df!(
        "subject" => subjects,
        "session" => sessions,
        "age" => ages,
        "bmi" => vec![24.0; n],
    )
    .expect("table")
}

fn required(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn keys(df: &DataFrame) -> Vec<(String, String)> {
    let subjects = column_strings(df, "subject").expect("subject");
    let sessions = column_strings(df, "session").expect("session");
    subjects
        .into_iter()
        .zip(sessions)
        .map(|(a, b)| (a.unwrap_or_default(), b.unwrap_or_default()))
        .collect()
}

fn assemble(images: &[ImageRecord], policy: MultiSessionPolicy, seed: u64) -> DataFrame {
    assemble_cohort(images, &table(), OUTCOME, &required(&["age"]), policy, seed)
        .expect("cohort")
        .table
}

#[test]
fn join_keeps_only_needed_columns() {
    let cohort = assemble_cohort(
        &records(),
        &table(),
        OUTCOME,
        &required(&["age", "height"]),
        MultiSessionPolicy::All,
        0,
    )
    .expect("cohort");
    let names: Vec<String> = cohort
        .table
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names, vec!["subject", "session", OUTCOME, "age"]);
    assert_eq!(cohort.n_rows(), 18);
    assert_eq!(cohort.image_paths().expect("paths").len(), 18);
}

#[test]
fn all_policy_is_sorted_regardless_of_input_order() {
    let forward = assemble(&records(), MultiSessionPolicy::All, 0);
    let mut reversed_records = records();
    reversed_records.reverse();
    let reversed = assemble(&reversed_records, MultiSessionPolicy::All, 0);
    let expected = keys(&forward);
    assert_eq!(keys(&reversed), expected);
    let mut sorted = expected.clone();
    sorted.sort();
    assert_eq!(expected, sorted);
}

#[test]
fn first_and_last_pick_by_session_order() {
    let first = keys(&assemble(&records(), MultiSessionPolicy::First, 0));
    let last = keys(&assemble(&records(), MultiSessionPolicy::Last, 0));
    assert_eq!(first.len(), 6);
    assert!(first.iter().all(|(_, ses)| ses == "01"));
    assert!(last.iter().all(|(_, ses)| ses == "03"));
}

#[test]
fn random_policy_is_reproducible_and_order_independent() {
    let a = keys(&assemble(&records(), MultiSessionPolicy::Random, 11));
    let b = keys(&assemble(&records(), MultiSessionPolicy::Random, 11));
    assert_eq!(a, b);
    assert_eq!(a.len(), 6);

    let mut shuffled = records();
    shuffled.rotate_left(7);
    shuffled.swap(0, 12);
    assert_eq!(keys(&assemble(&shuffled, MultiSessionPolicy::Random, 11)), a);

    // dropping other subjects leaves each remaining pick unchanged
    let subset: Vec<ImageRecord> = records()
        .into_iter()
        .filter(|r| r.subject() != Some("03"))
        .collect();
    let picks = keys(&assemble(&subset, MultiSessionPolicy::Random, 11));
    let expected: Vec<(String, String)> = a.into_iter().filter(|(s, _)| s != "03").collect();
    assert_eq!(picks, expected);
}

#[test]
fn string_keys_distinguish_zero_padding() {
    let images = vec![image_record("1", "01"), image_record("01", "01")];
    let table = df!(
        "subject" => ["01"],
        "session" => ["01"],
        "age" => [70.0],
    )
    .expect("table");
    let cohort = assemble_cohort(
        &images,
        &table,
        OUTCOME,
        &required(&["age"]),
        MultiSessionPolicy::All,
        0,
    )
    .expect("cohort");
    assert_eq!(keys(&cohort.table), vec![("01".to_string(), "01".to_string())]);
}

#[test]
fn images_without_session_are_skipped() {
    let mut orphan = image_record("01", "01");
    orphan.entities.remove("session");
    let images = vec![orphan, image_record("02", "01")];
    let cohort = assemble_cohort(
        &images,
        &table(),
        OUTCOME,
        &required(&["age"]),
        MultiSessionPolicy::All,
        0,
    )
    .expect("cohort");
    assert_eq!(keys(&cohort.table), vec![("02".to_string(), "01".to_string())]);
}

#[test]
fn table_without_keys_is_rejected() {
    let table = df!("age" => [70.0]).expect("table");
    let err = assemble_cohort(
        &records(),
        &table,
        OUTCOME,
        &required(&["age"]),
        MultiSessionPolicy::All,
        0,
    )
    .expect_err("no keys");
    assert!(matches!(err, NeuroVoxelError::Configuration(_)));
}

#[test]
fn policy_strings_parse_or_fail() {
    assert_eq!("Random".parse::<MultiSessionPolicy>().ok(), Some(MultiSessionPolicy::Random));
    let err = "newest".parse::<MultiSessionPolicy>().expect_err("unknown");
    assert!(matches!(err, NeuroVoxelError::Configuration(_)));
}
