// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dn_core::{CommonConfig, ServerConfig, StagePlan};

fn config(dir: &Path) -> ServerConfig {
    let reports_dir = dir.join("reports");
    std::fs::create_dir_all(&reports_dir).unwrap();
    ServerConfig {
        common: CommonConfig {
            workspace: dir.to_path_buf(),
            reports_dir,
            port: 2040,
            sslcert: dir.join("certfile.crt"),
            sslkey: dir.join("keyfile.key"),
            ciphers: Vec::new(),
            cert_hostname: "dragnet".to_string(),
            secret_key: Vec::new(),
        },
        bind: "127.0.0.1".to_string(),
        targets: dir.join("input-targets"),
        run_dir: dir.join("run"),
        queue_path: dir.join("targets.work"),
        live_targets_path: dir.join("live-targets.work"),
        snapshot_path: dir.join("trace.snap"),
        stages: vec![
            StagePlan {
                name: "discovery".to_string(),
                options: "-sn".to_string(),
            },
            StagePlan {
                name: "stage1".to_string(),
                options: "-sV".to_string(),
            },
        ],
    }
}

fn populated_context(dir: &Path) -> Context {
    let cfg = config(dir);
    std::fs::write(&cfg.queue_path, "10.0.0.0/24\n10.0.1.0/24\n10.0.2.0/24\n").unwrap();
    let mut ctx = Context::new(&cfg);
    ctx.pop("a:1").unwrap();
    ctx.pop("b:2").unwrap();
    ctx.interrupted("a:1");
    ctx
}

#[test]
fn round_trip_preserves_the_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("trace.snap");
    let mut ctx = populated_context(dir.path());
    let before_pending: Vec<_> = ctx.pending.iter().cloned().collect();
    ctx.snapshot(&snap).unwrap();

    let restored = load(&snap).unwrap();
    assert_eq!(restored.stage_total, 2);
    assert_eq!(restored.current.as_deref(), Some("discovery"));
    assert_eq!(restored.reports_dir, ctx.reports_dir);
    assert!(restored.active.is_empty());

    // One interrupted before the snapshot, one flipped by it.
    assert_eq!(restored.pending.len(), 2);
    assert_eq!(restored.pending[0], before_pending[0]);
    assert!(restored
        .pending
        .iter()
        .all(|t| t.status() == dn_core::TaskStatus::Interrupted));

    // One stage not yet started, one active with its cursor two lines in.
    assert_eq!(restored.stages.len(), 1);
    assert_eq!(restored.active_stages.len(), 1);
    let discovery = &restored.active_stages["discovery"];
    assert_eq!(discovery.target_count(), 3);
    assert_eq!(
        discovery.state().cursor.offset,
        "10.0.0.0/24\n10.0.1.0/24\n".len() as u64
    );
}

#[test]
fn save_is_atomic_and_resumable() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("run").join("trace.snap");
    assert!(!resumable(&snap));

    let mut ctx = populated_context(dir.path());
    ctx.snapshot(&snap).unwrap();
    assert!(resumable(&snap));
    assert!(!snap.with_extension("tmp").exists());
}

#[test]
fn zero_size_snapshot_means_fresh_start() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("trace.snap");
    std::fs::write(&snap, b"").unwrap();
    assert!(!resumable(&snap));
}

#[test]
fn bad_magic_is_rejected() {
    let err = decode(b"NOPE\x01\x00rest").unwrap_err();
    assert!(matches!(err, SnapshotError::BadMagic));
}

#[test]
fn unknown_version_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&9u16.to_le_bytes());
    let err = decode(&bytes).unwrap_err();
    assert!(matches!(err, SnapshotError::UnsupportedVersion(9)));
}

#[test]
fn truncated_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("trace.snap");
    let mut ctx = populated_context(dir.path());
    ctx.snapshot(&snap).unwrap();

    let bytes = std::fs::read(&snap).unwrap();
    for cut in [3, 6, 10, bytes.len() - 1] {
        let err = decode(&bytes[..cut]).unwrap_err();
        assert!(
            matches!(err, SnapshotError::Truncated | SnapshotError::BadMagic),
            "cut at {cut} gave {err:?}"
        );
    }
}

#[test]
fn unknown_task_status_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("trace.snap");
    let mut ctx = populated_context(dir.path());
    ctx.snapshot(&snap).unwrap();

    let mut bytes = std::fs::read(&snap).unwrap();
    // The final byte is the last pending task's status code.
    *bytes.last_mut().unwrap() = 9;
    let err = decode(&bytes).unwrap_err();
    assert!(matches!(err, SnapshotError::Corrupt(_)));
}
