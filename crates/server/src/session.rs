// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection agent session.
//!
//! State machine: authenticate first (challenge-response over the shared
//! certificate secret), then serve READY/REPORT until the peer drops, the
//! scan finishes, or shutdown is requested. A session failure never
//! propagates past the connection; the task the agent held goes back on
//! the pending queue.

use rand::RngCore;
use sha2::{Digest, Sha512};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dn_core::message::{
    read_message, read_status, write_message, write_status, CHALLENGE_LEN, REPORT_CHUNK,
};
use dn_core::{auth, Message, ProtocolError, Status};
use dn_engine::SharedContext;

/// How long to wait for the AUTH reply and for bare status bytes.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a report payload may stall between chunks.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// State shared by every session of one coordinator run.
pub struct SessionCtx {
    pub ctx: SharedContext,
    pub secret_key: Vec<u8>,
    pub terminate: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// One authenticated agent connection.
pub struct Session<S> {
    stream: S,
    /// Agent identifier: the peer `ip:port`.
    peer: String,
    shared: Arc<SessionCtx>,
    authenticated: bool,
    connected: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, peer: String, shared: Arc<SessionCtx>) -> Self {
        Self {
            stream,
            peer,
            shared,
            authenticated: false,
            connected: true,
        }
    }

    /// Drive the session to completion. The stream closes on drop.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(peer = %self.peer, "agent connected");
        let result = self.serve().await;

        if self.shared.ctx.lock().is_finished() {
            // Last one out stops the listener.
            self.shared.terminate.cancel();
        }
        match result {
            Err(SessionError::Protocol(ProtocolError::ConnectionClosed)) => {
                debug!(peer = %self.peer, "agent disconnected");
                Ok(())
            }
            other => other,
        }
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        self.authenticate().await?;
        if !self.authenticated {
            return Ok(());
        }

        let terminate = self.shared.terminate.clone();
        while self.connected
            && !terminate.is_cancelled()
            && !self.shared.ctx.lock().is_finished()
        {
            let message = tokio::select! {
                message = read_message(&mut self.stream) => message,
                _ = terminate.cancelled() => break,
            };
            match message {
                Ok(Message::Ready { uid, alias }) => self.handle_ready(uid, &alias).await?,
                Ok(Message::Report {
                    filename,
                    hash,
                    size,
                }) => self.handle_report(&filename, &hash, size).await?,
                Ok(other) => {
                    warn!(peer = %self.peer, message = ?other, "unexpected message");
                    write_status(&mut self.stream, Status::Failed).await?;
                }
                Err(e) => {
                    info!(peer = %self.peer, error = %e, "agent dropped");
                    self.shared.ctx.lock().interrupted(&self.peer);
                    self.connected = false;
                }
            }
        }
        Ok(())
    }

    /// Challenge-response handshake. Replies with a bare status byte:
    /// `SUCCESS` on a matching digest, `UNAUTHORIZED` otherwise.
    async fn authenticate(&mut self) -> Result<(), SessionError> {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::rng().fill_bytes(&mut challenge);
        write_message(&mut self.stream, &Message::Auth(challenge.to_vec())).await?;

        let reply = tokio::time::timeout(REPLY_TIMEOUT, read_message(&mut self.stream))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)??;
        let Message::Auth(digest) = reply else {
            warn!(peer = %self.peer, "expected AUTH reply");
            write_status(&mut self.stream, Status::Unauthorized).await?;
            return Ok(());
        };

        if auth::verify_digest(&self.shared.secret_key, &challenge, &digest) {
            info!(peer = %self.peer, "agent authenticated");
            self.authenticated = true;
            write_status(&mut self.stream, Status::Success).await?;
        } else {
            warn!(peer = %self.peer, "authentication failed");
            write_status(&mut self.stream, Status::Unauthorized).await?;
        }
        Ok(())
    }

    /// Dispense a task, or tell the agent to back off / wind down.
    async fn handle_ready(&mut self, uid: u8, alias: &str) -> Result<(), SessionError> {
        info!(peer = %self.peer, alias, uid, "agent ready");
        if uid != 0 {
            warn!(peer = %self.peer, uid, "agent is not running as root");
        }

        let task = self.shared.ctx.lock().pop(&self.peer);
        let Some((target, options)) = task else {
            if self.shared.ctx.lock().is_finished() {
                // Empty command: nothing left, the agent can exit.
                write_message(
                    &mut self.stream,
                    &Message::Command {
                        target: String::new(),
                        options: String::new(),
                    },
                )
                .await?;
                self.connected = false;
            } else {
                // Discovery still in flight on other agents.
                write_message(&mut self.stream, &Message::Status(Status::Unfinished)).await?;
            }
            return Ok(());
        };

        write_message(&mut self.stream, &Message::Command { target, options }).await?;
        let started = tokio::time::timeout(REPLY_TIMEOUT, read_status(&mut self.stream)).await;
        match started {
            Ok(Ok(Status::Success)) => self.shared.ctx.lock().running(&self.peer),
            _ => {
                info!(peer = %self.peer, "scan did not start");
                self.shared.ctx.lock().interrupted(&self.peer);
                self.connected = false;
            }
        }
        Ok(())
    }

    /// Receive one report payload, verifying its SHA-512 along the way.
    async fn handle_report(
        &mut self,
        filename: &str,
        hash: &str,
        size: u32,
    ) -> Result<(), SessionError> {
        info!(peer = %self.peer, filename, size, "report transfer");
        let mut sink = {
            let mut ctx = self.shared.ctx.lock();
            let sink = ctx.get_report(&self.peer, filename);
            ctx.downloading(&self.peer);
            sink
        };

        let mut hasher = Sha512::new();
        let mut remaining = size as usize;
        let mut chunk = [0u8; REPORT_CHUNK];
        while remaining > 0 {
            let want = remaining.min(REPORT_CHUNK);
            let read = tokio::time::timeout(
                CHUNK_TIMEOUT,
                self.stream.read_exact(&mut chunk[..want]),
            )
            .await;
            match read {
                Ok(Ok(_)) => {}
                _ => {
                    info!(peer = %self.peer, "report transfer aborted");
                    self.shared.ctx.lock().interrupted(&self.peer);
                    self.connected = false;
                    return Ok(());
                }
            }
            hasher.update(&chunk[..want]);
            if let Some(file) = sink.as_mut() {
                use std::io::Write;
                if let Err(e) = file.write_all(&chunk[..want]) {
                    warn!(peer = %self.peer, error = %e, "report sink write failed");
                    sink = None;
                }
            }
            remaining -= want;
        }
        if let Some(file) = sink.as_mut() {
            use std::io::Write;
            let _ = file.flush();
        }

        let digest = hex::encode(hasher.finalize());
        let verified: bool = digest.as_bytes().ct_eq(hash.as_bytes()).into();
        if verified && sink.is_some() {
            self.shared.ctx.lock().completed(&self.peer);
            write_status(&mut self.stream, Status::Success).await?;
        } else {
            // The agent retries; the task stays in Downloading until the
            // retry lands or the session drops.
            warn!(peer = %self.peer, filename, "report integrity check failed");
            write_status(&mut self.stream, Status::Failed).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
