use buildreg::coordinator::{UpdateAction, UpdateCoordinator};
use buildreg::lock::{self, Lease, LeaseLock, LockTiming, MarkerLock};
use buildreg::registry::{self, BuildRecord};
use buildreg::ErrorCode;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn record(version: &str) -> BuildRecord {
    BuildRecord::new(
        version,
        format!("https://chacra.example/r/ceph/{}/centos/9/flavors/default/repo", version),
        format!("quay.example/ceph-ci/ceph:{}", version.replace('.', "")),
    )
}

fn marker_coordinator(path: &Path) -> UpdateCoordinator {
    UpdateCoordinator::new(
        path,
        Box::new(MarkerLock::new()),
        LockTiming::new(Duration::from_secs(10), Duration::from_millis(5)),
    )
}

#[test]
fn newer_builds_replace_older_ones_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("upstream.yaml");
    let coordinator = marker_coordinator(&path);

    let created = coordinator.update("quincy", || Ok(record("17.2.0"))).unwrap();
    assert_eq!(created.action, UpdateAction::Created);

    let older = coordinator.update("quincy", || Ok(record("17.1.9"))).unwrap();
    assert_eq!(older.action, UpdateAction::Skipped);
    assert_eq!(
        registry::load(&path).unwrap().get("quincy").unwrap().version,
        "17.2.0"
    );

    let newer = coordinator.update("quincy", || Ok(record("17.2.1"))).unwrap();
    assert_eq!(newer.action, UpdateAction::Updated);
    assert_eq!(newer.previous.unwrap().version, "17.2.0");
    assert_eq!(
        registry::load(&path).unwrap().get("quincy"),
        Some(&record("17.2.1"))
    );
    assert!(!lock::marker_path(&path).exists());
}

#[test]
fn repeating_the_same_build_leaves_the_file_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("upstream.yaml");
    let coordinator = marker_coordinator(&path);

    coordinator.update("quincy", || Ok(record("17.2.6"))).unwrap();
    let before = fs::read_to_string(&path).unwrap();
    let modified = fs::metadata(&path).unwrap().modified().unwrap();

    thread::sleep(Duration::from_millis(20));
    let outcome = coordinator.update("quincy", || Ok(record("17.2.6"))).unwrap();

    assert_eq!(outcome.action, UpdateAction::Skipped);
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
}

#[test]
fn other_branches_are_not_disturbed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("upstream.yaml");
    fs::write(
        &path,
        "\
reef:
  ceph-version: 18.2.1-100
  composes: https://chacra.example/r/ceph/reef/abc/repo
  image: quay.example/ceph-ci/ceph:abc
  owner: nightly
",
    )
    .unwrap();

    let coordinator = marker_coordinator(&path);
    coordinator.update("quincy", || Ok(record("17.2.7"))).unwrap();

    let current = registry::load(&path).unwrap();
    let reef = current.get("reef").unwrap();
    assert_eq!(reef.version, "18.2.1-100");
    assert_eq!(reef.artifact_location, "https://chacra.example/r/ceph/reef/abc/repo");
    assert_eq!(reef.extra["owner"].as_str(), Some("nightly"));
    assert_eq!(current.get("quincy"), Some(&record("17.2.7")));
    assert_eq!(current.len(), 2);
}

#[test]
fn concurrent_jobs_converge_on_the_newest_build() {
    let dir = tempdir().unwrap();
    let path = Arc::new(dir.path().join("upstream.yaml"));
    let versions = ["17.2.3", "17.2.8", "17.2.1", "17.2.5", "17.2.7", "17.2.2"];
    let barrier = Arc::new(Barrier::new(versions.len()));

    let handles: Vec<_> = versions
        .iter()
        .map(|version| {
            let path = Arc::clone(&path);
            let barrier = Arc::clone(&barrier);
            let version = version.to_string();
            thread::spawn(move || {
                let coordinator = marker_coordinator(&path);
                barrier.wait();
                // The unlocked read may land on a write in progress.
                loop {
                    match coordinator.update("quincy", || Ok(record(&version))) {
                        Ok(outcome) => return outcome.action,
                        Err(err) if err.code == ErrorCode::RegistryInvalidFormat => continue,
                        Err(err) => panic!("update {} failed: {}", version, err.message),
                    }
                }
            })
        })
        .collect();

    let actions: Vec<UpdateAction> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(actions.iter().filter(|a| **a == UpdateAction::Created).count() <= 1);
    let current = registry::load(&path).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current.get("quincy"), Some(&record("17.2.8")));
    assert!(!lock::marker_path(&path).exists());
}

#[test]
fn held_lock_times_out_without_writing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("upstream.yaml");
    let marker = lock::marker_path(&path);
    fs::write(&marker, "").unwrap();

    let coordinator = UpdateCoordinator::new(
        &path,
        Box::new(MarkerLock::new()),
        LockTiming::new(Duration::from_millis(60), Duration::from_millis(20)),
    );
    let err = coordinator.update("quincy", || Ok(record("17.2.0"))).unwrap_err();

    assert_eq!(err.code, ErrorCode::LockTimeout);
    assert!(!path.exists());
    assert!(marker.exists(), "someone else's marker must be left alone");
}

#[test]
fn expired_lease_is_taken_over() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("upstream.yaml");
    let marker = lock::marker_path(&path);

    let mut stale = Lease::new(Duration::from_secs(60));
    stale.acquired_at -= chrono::Duration::hours(2);
    fs::write(&marker, serde_json::to_vec(&stale).unwrap()).unwrap();

    let coordinator = UpdateCoordinator::new(
        &path,
        Box::new(LeaseLock::new(Duration::from_secs(60))),
        LockTiming::new(Duration::from_secs(5), Duration::from_millis(10)),
    );
    let outcome = coordinator.update("reef", || Ok(record("18.2.0"))).unwrap();

    assert_eq!(outcome.action, UpdateAction::Created);
    assert!(outcome.lock_release_error.is_none());
    assert!(!marker.exists());
}

#[test]
fn live_lease_blocks_until_timeout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("upstream.yaml");
    let marker = lock::marker_path(&path);

    let live = Lease::new(Duration::from_secs(3600));
    fs::write(&marker, serde_json::to_vec(&live).unwrap()).unwrap();

    let coordinator = UpdateCoordinator::new(
        &path,
        Box::new(LeaseLock::new(Duration::from_secs(3600))),
        LockTiming::new(Duration::from_millis(50), Duration::from_millis(10)),
    );
    let err = coordinator.update("reef", || Ok(record("18.2.0"))).unwrap_err();

    assert_eq!(err.code, ErrorCode::LockTimeout);
    assert_eq!(lock::read_lease(&marker), Some(live));
}
