// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dn-agent: the worker side of the scan fleet.
//!
//! A long-lived outbound peer: connect over TLS, authenticate with the
//! certificate-derived secret, then loop requesting targets, running nmap
//! locally, and streaming reports back. Connection losses are retried up
//! to three times before the agent gives up.

pub mod scan;

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dn_core::message::{read_message, read_status, write_message, write_status, REPORT_CHUNK};
use dn_core::tls::{self, TlsError};
use dn_core::{auth, AgentConfig, Message, ProtocolError, Status};

use scan::{Report, ScanRunner};

/// Connection attempts (and report-transfer attempts) before giving up.
const MAX_RETRIES: u32 = 3;

/// Back-off while the coordinator's Discovery stage is still in flight.
const UNFINISHED_BACKOFF: Duration = Duration::from_secs(5);

/// Pause between reconnection attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("invalid certificate hostname {0:?}")]
    BadHostname(String),

    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("authentication rejected by coordinator")]
    Unauthorized,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a connected session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The coordinator signalled the scan is over.
    Finished,
    /// Shutdown was requested locally.
    Stopped,
}

/// The worker client.
pub struct Agent {
    config: AgentConfig,
    scanner: ScanRunner,
    terminate: CancellationToken,
    retries: u32,
}

impl Agent {
    pub fn new(config: AgentConfig, terminate: CancellationToken) -> Self {
        let scanner = ScanRunner::new(&config.common.reports_dir);
        Self {
            config,
            scanner,
            terminate,
            retries: 0,
        }
    }

    /// Connect, serve, and reconnect until the scan finishes, shutdown is
    /// requested, or the retry budget runs out.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        let connector = self.connector()?;
        let addr = format!("{}:{}", self.config.server, self.config.common.port);
        let server_name = rustls::pki_types::ServerName::try_from(
            self.config.common.cert_hostname.clone(),
        )
        .map_err(|_| AgentError::BadHostname(self.config.common.cert_hostname.clone()))?;

        self.retries = 0;
        while self.retries < MAX_RETRIES && !self.terminate.is_cancelled() {
            match self.session(&connector, &addr, server_name.clone()).await {
                Ok(SessionEnd::Finished) => {
                    info!("scan finished, agent exiting");
                    return Ok(());
                }
                Ok(SessionEnd::Stopped) => return Ok(()),
                Err(AgentError::Unauthorized) => return Err(AgentError::Unauthorized),
                Err(e) => {
                    self.retries += 1;
                    warn!(
                        error = %e,
                        attempt = self.retries,
                        "connection lost, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                        _ = self.terminate.cancelled() => return Ok(()),
                    }
                }
            }
        }
        Ok(())
    }

    /// One connection: TLS, auth, then the ready/scan/report loop.
    async fn session(
        &mut self,
        connector: &TlsConnector,
        addr: &str,
        server_name: rustls::pki_types::ServerName<'static>,
    ) -> Result<SessionEnd, AgentError> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|source| AgentError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let mut stream =
            connector
                .connect(server_name, tcp)
                .await
                .map_err(|source| AgentError::Connect {
                    addr: addr.to_string(),
                    source,
                })?;
        info!(addr, "connected to coordinator");
        let end = self.serve(&mut stream).await;
        let _ = stream.shutdown().await;
        end
    }

    /// The protocol loop, generic over the transport for testability.
    async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut S,
    ) -> Result<SessionEnd, AgentError> {
        self.authenticate(stream).await?;
        // A successful handshake resets the retry budget.
        self.retries = 0;

        let alias = session_alias();
        let uid = current_uid();
        info!(alias = %alias, "agent ready");
        loop {
            if self.terminate.is_cancelled() {
                return Ok(SessionEnd::Stopped);
            }
            write_message(
                stream,
                &Message::Ready {
                    uid,
                    alias: alias.clone(),
                },
            )
            .await?;

            let message = tokio::select! {
                message = read_message(stream) => message?,
                _ = self.terminate.cancelled() => return Ok(SessionEnd::Stopped),
            };
            match message {
                Message::Status(Status::Finished) => {
                    self.retries = MAX_RETRIES;
                    return Ok(SessionEnd::Finished);
                }
                Message::Status(Status::Unfinished) => {
                    info!("discovery still in flight, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(UNFINISHED_BACKOFF) => {}
                        _ = self.terminate.cancelled() => return Ok(SessionEnd::Stopped),
                    }
                }
                Message::Command { target, options: _ } if target.is_empty() => {
                    // Empty command: nothing left for us.
                    self.retries = MAX_RETRIES;
                    return Ok(SessionEnd::Finished);
                }
                Message::Command { target, options } => {
                    if let Some(end) = self.execute(stream, &target, &options).await? {
                        return Ok(end);
                    }
                }
                other => {
                    warn!(message = ?other, "unexpected message from coordinator");
                    return Err(ProtocolError::ConnectionClosed.into());
                }
            }
        }
    }

    async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut S,
    ) -> Result<(), AgentError> {
        let message = read_message(stream).await?;
        let Message::Auth(challenge) = message else {
            warn!("expected AUTH challenge");
            return Err(ProtocolError::ConnectionClosed.into());
        };
        let digest = auth::challenge_digest(&self.config.common.secret_key, &challenge);
        write_message(stream, &Message::Auth(digest)).await?;

        match read_status(stream).await? {
            Status::Success => {
                info!("authenticated");
                Ok(())
            }
            status => {
                error!(%status, "authentication rejected");
                Err(AgentError::Unauthorized)
            }
        }
    }

    /// Run one scan. Reports `SUCCESS` as soon as the scanner starts and
    /// `FAILED` when it cannot; a finished scan streams its report back.
    async fn execute<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut S,
        target: &str,
        options: &str,
    ) -> Result<Option<SessionEnd>, AgentError> {
        let running = match self.scanner.spawn(target, options).await {
            Ok(running) => running,
            Err(e) => {
                error!(target, error = %e, "scan failed to start");
                write_status(stream, Status::Failed).await?;
                return Ok(None);
            }
        };
        write_status(stream, Status::Success).await?;

        let report = tokio::select! {
            report = running.wait() => report,
            _ = self.terminate.cancelled() => return Ok(Some(SessionEnd::Stopped)),
        };
        match report {
            Ok(report) => {
                if self.send_report(stream, &report).await? {
                    info!(report = %report.filename, "report transfer successful");
                } else {
                    error!(report = %report.filename, "report transfer unsuccessful");
                }
                Ok(None)
            }
            Err(e) => {
                error!(target, error = %e, "scan failed");
                write_status(stream, Status::Failed).await?;
                Ok(None)
            }
        }
    }

    /// Stream the report, retrying the transfer up to three times.
    async fn send_report<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut S,
        report: &Report,
    ) -> Result<bool, AgentError> {
        let path = self.config.common.reports_dir.join(&report.filename);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path = %path.display(), error = %e, "report vanished");
                return Ok(false);
            }
        };

        for attempt in 1..=MAX_RETRIES {
            write_message(
                stream,
                &Message::Report {
                    filename: report.filename.clone(),
                    hash: report.hash.clone(),
                    size: report.size,
                },
            )
            .await?;
            for chunk in bytes.chunks(REPORT_CHUNK) {
                stream.write_all(chunk).await?;
            }
            stream.flush().await?;

            match read_status(stream).await? {
                Status::Success => return Ok(true),
                status => warn!(%status, attempt, "report transfer rejected"),
            }
        }
        Ok(false)
    }

    /// Client-side TLS: pin the shared certificate as the only trust root,
    /// cipher suites from config.
    fn connector(&self) -> Result<TlsConnector, AgentError> {
        let provider = Arc::new(tls::provider(&self.config.common.ciphers)?);
        let roots = tls::pinned_roots(&self.config.common.sslcert)?;
        let tls_config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(tls_config)))
    }
}

/// Six upper-case letters identifying this session in the coordinator log.
fn session_alias() -> String {
    let mut rng = rand::rng();
    (0..6).map(|_| rng.random_range('A'..='Z')).collect()
}

/// Numeric uid advertised in READY, clamped to the wire field. The
/// coordinator warns when an agent is not running as root.
#[cfg(target_os = "linux")]
fn current_uid() -> u8 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self")
        .map(|m| m.uid().min(u32::from(u8::MAX)) as u8)
        .unwrap_or(u8::MAX)
}

#[cfg(not(target_os = "linux"))]
fn current_uid() -> u8 {
    u8::MAX
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
