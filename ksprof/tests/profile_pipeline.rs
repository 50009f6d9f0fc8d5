//! End-to-end tests over a synthetic cache: worker, dispatcher fault
//! isolation, backend equivalence, and artifact round-trip.

mod helpers;

use helpers::{build_cache, image};
use ksprof::cache::Normalization;
use ksprof::dispatch::{Dispatcher, GroupTask, PoolSpec};
use ksprof::profile::Profiles;
use ksprof_common::{FailureClass, GroupKey};
use std::collections::BTreeMap;

fn group(label: &str) -> GroupKey {
    GroupKey::new(vec![label.to_string()])
}

/// Cache with two features whose values are identical, treatment images
/// 1..=3 carrying [1,2,3] and control images 11..=15 carrying [1,1,2,3,5].
fn seeded_cache(dir: &std::path::Path) {
    let treatment_values = [1.0, 2.0, 3.0];
    let control_values = [1.0, 1.0, 2.0, 3.0, 5.0];
    let mut entries = Vec::new();
    for (offset, value) in treatment_values.iter().enumerate() {
        entries.push((image(1 + offset as i64), "P1", vec![*value, *value]));
    }
    for (offset, value) in control_values.iter().enumerate() {
        entries.push((image(11 + offset as i64), "P1", vec![*value, *value]));
    }
    build_cache(dir, &["f1", "f2"], &entries);
}

fn seeded_task(key: GroupKey) -> GroupTask {
    GroupTask {
        key,
        treatment: (1..=3).map(image).collect(),
        controls: (11..=15).map(image).collect(),
    }
}

#[tokio::test]
async fn profile_computes_assembles_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    seeded_cache(dir.path());

    let dispatcher = Dispatcher::new(dir.path(), Normalization::Raw, PoolSpec::Sequential, None);
    let outcome = dispatcher.run_all(vec![seeded_task(group("G1"))]).await;
    assert!(outcome.failures.is_empty());

    let profiles = Profiles::assemble(
        "compound",
        vec!["f1".into(), "f2".into()],
        outcome.completed,
    )
    .unwrap();
    let row = &profiles.rows()[&group("G1")];
    assert_eq!(row.len(), 2);
    // Extremal ECDF gap at value 3: F_control = 4/5, F_treatment = 1.
    assert!((row[0] - (-0.2)).abs() < 1e-12);
    assert!((row[1] - (-0.2)).abs() < 1e-12);

    let path = dir.path().join("profile.csv");
    profiles.save(&path).unwrap();
    let reloaded = Profiles::load(&path).unwrap();
    let reloaded_row = &reloaded.rows()[&group("G1")];
    assert!((reloaded_row[0] - row[0]).abs() < 1e-6);
    assert!((reloaded_row[1] - row[1]).abs() < 1e-6);
}

#[tokio::test]
async fn one_bad_group_does_not_poison_the_run() {
    let dir = tempfile::tempdir().unwrap();
    seeded_cache(dir.path());

    // G2 has more treatment images than controls, a data-integrity
    // failure; G1 and G3 are sound.
    let tasks = vec![
        seeded_task(group("G1")),
        GroupTask {
            key: group("G2"),
            treatment: vec![image(1), image(2)],
            controls: vec![image(11)],
        },
        seeded_task(group("G3")),
    ];

    let dispatcher = Dispatcher::new(
        dir.path(),
        Normalization::Raw,
        PoolSpec::Local { workers: 2 },
        None,
    );
    let outcome = dispatcher.run_all(tasks).await;

    assert_eq!(outcome.completed.len(), 2);
    assert!(outcome.completed.contains_key(&group("G1")));
    assert!(outcome.completed.contains_key(&group("G3")));

    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.key, group("G2"));
    assert_eq!(failure.class, FailureClass::DataIntegrity);
    assert!(failure.reason.contains("Control sample"));
}

#[tokio::test]
async fn sequential_and_parallel_backends_agree() {
    let dir = tempfile::tempdir().unwrap();
    seeded_cache(dir.path());

    let tasks: Vec<GroupTask> = ["G1", "G2", "G3", "G4"]
        .iter()
        .map(|label| seeded_task(group(label)))
        .collect();

    let sequential = Dispatcher::new(dir.path(), Normalization::Raw, PoolSpec::Sequential, None)
        .run_all(tasks.clone())
        .await;
    let parallel = Dispatcher::new(
        dir.path(),
        Normalization::Raw,
        PoolSpec::Local { workers: 4 },
        None,
    )
    .run_all(tasks)
    .await;

    assert_eq!(sequential.completed, parallel.completed);
    assert!(sequential.failures.is_empty());
    assert!(parallel.failures.is_empty());
}

#[tokio::test]
async fn missing_cache_rows_fail_only_their_group() {
    let dir = tempfile::tempdir().unwrap();
    seeded_cache(dir.path());

    let tasks = vec![
        seeded_task(group("G1")),
        GroupTask {
            key: group("G2"),
            treatment: vec![image(99)],
            controls: vec![image(11), image(12)],
        },
    ];
    let dispatcher = Dispatcher::new(dir.path(), Normalization::Raw, PoolSpec::Sequential, None);
    let outcome = dispatcher.run_all(tasks).await;

    assert!(outcome.completed.contains_key(&group("G1")));
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].class, FailureClass::Configuration);
    assert!(outcome.failures[0].reason.contains("0-99"));
}

#[test]
fn failed_groups_are_omitted_from_the_artifact() {
    // Assembly sees only completed rows; a run with failures still
    // yields a dense matrix over the surviving groups.
    let completed = BTreeMap::from([
        (group("G1"), vec![0.1, -0.2]),
        (group("G3"), vec![0.0, 0.4]),
    ]);
    let profiles =
        Profiles::assemble("compound", vec!["f1".into(), "f2".into()], completed).unwrap();
    assert_eq!(profiles.rows().len(), 2);
    assert!(!profiles.rows().contains_key(&group("G2")));
}
