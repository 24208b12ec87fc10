// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dn_core::{CommonConfig, ServerConfig, StagePlan};
use dn_engine::Context;
use std::path::Path;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

const PEER: &str = "127.0.0.1:4242";
const SECRET: &[u8] = b"0f9a8b7c6d5e4f30f9a8b7c6d5e4f30f";

fn server_config(dir: &Path, stages: &[(&str, &str)]) -> ServerConfig {
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
            secret_key: SECRET.to_vec(),
        },
        bind: "127.0.0.1".to_string(),
        targets: dir.join("input-targets"),
        run_dir: dir.join("run"),
        queue_path: dir.join("targets.work"),
        live_targets_path: dir.join("live-targets.work"),
        snapshot_path: dir.join("trace.snap"),
        stages: stages
            .iter()
            .map(|(name, options)| StagePlan {
                name: name.to_string(),
                options: options.to_string(),
            })
            .collect(),
    }
}

fn single_stage_ctx(dir: &Path, targets: &str) -> SharedContext {
    let cfg = server_config(dir, &[("stage1", "-sV")]);
    std::fs::write(&cfg.live_targets_path, targets).unwrap();
    Context::new(&cfg).into_shared()
}

fn spawn_session(
    ctx: SharedContext,
) -> (
    DuplexStream,
    CancellationToken,
    JoinHandle<Result<(), SessionError>>,
) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let terminate = CancellationToken::new();
    let shared = Arc::new(SessionCtx {
        ctx,
        secret_key: SECRET.to_vec(),
        terminate: terminate.clone(),
    });
    let handle = tokio::spawn(Session::new(server, PEER.to_string(), shared).run());
    (client, terminate, handle)
}

async fn authenticate(client: &mut DuplexStream) -> Vec<u8> {
    let message = dn_core::message::read_message(client).await.unwrap();
    let dn_core::Message::Auth(challenge) = message else {
        panic!("expected AUTH challenge, got {message:?}");
    };
    assert_eq!(challenge.len(), 128);
    let digest = dn_core::auth::challenge_digest(SECRET, &challenge);
    dn_core::message::write_message(client, &dn_core::Message::Auth(digest))
        .await
        .unwrap();
    let status = dn_core::message::read_status(client).await.unwrap();
    assert_eq!(status, dn_core::Status::Success);
    challenge
}

async fn send_ready(client: &mut DuplexStream) -> dn_core::Message {
    dn_core::message::write_message(
        client,
        &dn_core::Message::Ready {
            uid: 0,
            alias: "QWERTY".to_string(),
        },
    )
    .await
    .unwrap();
    dn_core::message::read_message(client).await.unwrap()
}

#[tokio::test]
async fn auth_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n");
    let (mut client, _terminate, handle) = spawn_session(Arc::clone(&ctx));

    authenticate(&mut client).await;
    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn auth_failure_replies_unauthorized_and_leaves_context_alone() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n");
    let (mut client, _terminate, handle) = spawn_session(Arc::clone(&ctx));

    let message = dn_core::message::read_message(&mut client).await.unwrap();
    assert!(matches!(message, dn_core::Message::Auth(_)));
    // Wrong digest: right length, wrong bytes.
    let digest = vec![b'0'; 128];
    dn_core::message::write_message(&mut client, &dn_core::Message::Auth(digest))
        .await
        .unwrap();

    let status = dn_core::message::read_status(&mut client).await.unwrap();
    assert_eq!(status, dn_core::Status::Unauthorized);
    handle.await.unwrap().unwrap();

    let ctx = ctx.lock();
    assert!(ctx.tasks_status().is_empty());
    assert!(!ctx.is_finished());
}

#[tokio::test]
async fn ready_dispenses_a_command_and_marks_running() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n10.0.0.2/32\n");
    let (mut client, _terminate, _handle) = spawn_session(Arc::clone(&ctx));

    authenticate(&mut client).await;
    let command = send_ready(&mut client).await;
    assert_eq!(
        command,
        dn_core::Message::Command {
            target: "10.0.0.1/32".to_string(),
            options: "-sV".to_string(),
        }
    );

    dn_core::message::write_status(&mut client, dn_core::Status::Success)
        .await
        .unwrap();
    // The running transition races our status write; poll the ledger.
    for _ in 0..50 {
        if ctx.lock().tasks_status().first().map(|r| r.2.clone()) == Some("running".into()) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("task never marked running");
}

#[tokio::test]
async fn failed_start_requeues_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n");
    let (mut client, _terminate, handle) = spawn_session(Arc::clone(&ctx));

    authenticate(&mut client).await;
    send_ready(&mut client).await;
    dn_core::message::write_status(&mut client, dn_core::Status::Failed)
        .await
        .unwrap();
    handle.await.unwrap().unwrap();

    // The task went back on the queue and is redelivered to someone else.
    assert_eq!(ctx.lock().pop("other:1").unwrap().0, "10.0.0.1/32");
}

#[tokio::test]
async fn disconnect_mid_task_requeues_it() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n");
    let (mut client, _terminate, handle) = spawn_session(Arc::clone(&ctx));

    authenticate(&mut client).await;
    send_ready(&mut client).await;
    dn_core::message::write_status(&mut client, dn_core::Status::Success)
        .await
        .unwrap();
    drop(client);
    handle.await.unwrap().unwrap();

    assert_eq!(ctx.lock().pop("other:1").unwrap().0, "10.0.0.1/32");
}

#[tokio::test]
async fn discovery_gate_sends_unfinished() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = server_config(dir.path(), &[("discovery", "-sn"), ("stage1", "-sV")]);
    std::fs::write(&cfg.queue_path, "10.0.0.0/30\n").unwrap();
    let ctx = Context::new(&cfg).into_shared();
    // Another agent holds the only discovery target.
    ctx.lock().pop("other:1").unwrap();

    let (mut client, _terminate, _handle) = spawn_session(Arc::clone(&ctx));
    authenticate(&mut client).await;
    let reply = send_ready(&mut client).await;
    assert_eq!(reply, dn_core::Message::Status(dn_core::Status::Unfinished));

    // The session keeps serving: a later READY is still answered.
    let reply = send_ready(&mut client).await;
    assert_eq!(reply, dn_core::Message::Status(dn_core::Status::Unfinished));
}

#[tokio::test]
async fn finished_scan_winds_the_session_down() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n");
    // Another agent holds the only target while this session starts.
    ctx.lock().pop("other:1").unwrap();

    let (mut client, terminate, handle) = spawn_session(Arc::clone(&ctx));
    authenticate(&mut client).await;
    let reply = send_ready(&mut client).await;
    assert_eq!(reply, dn_core::Message::Status(dn_core::Status::Unfinished));

    // The scan finishes elsewhere. The session either answers the next
    // READY with an empty command or notices the finish and closes; both
    // end with the listener told to stop.
    ctx.lock().completed("other:1");
    assert!(ctx.lock().is_finished());

    dn_core::message::write_message(
        &mut client,
        &dn_core::Message::Ready {
            uid: 0,
            alias: "QWERTY".to_string(),
        },
    )
    .await
    .unwrap();
    if let Ok(reply) = dn_core::message::read_message(&mut client).await {
        assert_eq!(
            reply,
            dn_core::Message::Command {
                target: String::new(),
                options: String::new(),
            }
        );
    }
    handle.await.unwrap().unwrap();
    assert!(terminate.is_cancelled());
}

async fn transfer_report(
    client: &mut DuplexStream,
    payload: &[u8],
    hash: String,
) -> dn_core::Status {
    use tokio::io::AsyncWriteExt;

    dn_core::message::write_message(
        client,
        &dn_core::Message::Report {
            filename: "10.0.0.1-32.xml".to_string(),
            hash,
            size: payload.len() as u32,
        },
    )
    .await
    .unwrap();
    for chunk in payload.chunks(1024) {
        client.write_all(chunk).await.unwrap();
    }
    client.flush().await.unwrap();
    dn_core::message::read_status(client).await.unwrap()
}

#[tokio::test]
async fn verified_report_completes_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n");
    let (mut client, _terminate, _handle) = spawn_session(Arc::clone(&ctx));

    authenticate(&mut client).await;
    send_ready(&mut client).await;
    dn_core::message::write_status(&mut client, dn_core::Status::Success)
        .await
        .unwrap();

    let payload = vec![0x5au8; 2500];
    let hash = hex::encode(sha2::Sha512::digest(&payload));
    let status = transfer_report(&mut client, &payload, hash).await;
    assert_eq!(status, dn_core::Status::Success);

    // Stored under the stage-prefixed name, byte for byte.
    let stored = std::fs::read(
        dir.path()
            .join("reports")
            .join("stage1-10.0.0.1-32.xml"),
    )
    .unwrap();
    assert_eq!(stored, payload);
    assert!(ctx.lock().is_finished());
}

#[tokio::test]
async fn report_hash_mismatch_fails_without_completing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = single_stage_ctx(dir.path(), "10.0.0.1/32\n");
    let (mut client, _terminate, handle) = spawn_session(Arc::clone(&ctx));

    authenticate(&mut client).await;
    send_ready(&mut client).await;
    dn_core::message::write_status(&mut client, dn_core::Status::Success)
        .await
        .unwrap();

    let payload = vec![0x5au8; 24];
    let wrong = hex::encode(sha2::Sha512::digest(b"something else"));
    let status = transfer_report(&mut client, &payload, wrong).await;
    assert_eq!(status, dn_core::Status::Failed);

    // Not completed: the task is still out with this agent, mid-download.
    {
        let ctx = ctx.lock();
        assert!(!ctx.is_finished());
        let tasks = ctx.tasks_status();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].2, "downloading");
    }

    // The session drop converts it to interrupted for redelivery.
    drop(client);
    handle.await.unwrap().unwrap();
    assert_eq!(ctx.lock().pop("other:1").unwrap().0, "10.0.0.1/32");
}
