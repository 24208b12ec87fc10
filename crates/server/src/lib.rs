// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dn-server: the coordinator's TLS listener.
//!
//! The listener accepts agent connections and spawns one [`Session`] task
//! per connection, all sharing a single scheduling [`Context`]. A session
//! dying never takes the listener down.
//!
//! [`Context`]: dn_engine::Context

pub mod session;

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dn_core::tls::{self, TlsError};
use dn_core::ServerConfig;
use dn_engine::SharedContext;

pub use session::{Session, SessionCtx};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// The coordinator's accept loop.
pub struct Server {
    config: ServerConfig,
    shared: Arc<SessionCtx>,
}

impl Server {
    pub fn new(config: ServerConfig, ctx: SharedContext, terminate: CancellationToken) -> Self {
        let shared = Arc::new(SessionCtx {
            ctx,
            secret_key: config.common.secret_key.clone(),
            terminate,
        });
        Self { config, shared }
    }

    /// Accept connections until the terminate signal fires. Sessions run on
    /// their own tasks and share the scheduling context.
    pub async fn run(self) -> Result<(), ServerError> {
        let acceptor = build_acceptor(&self.config)?;
        let addr = format!("{}:{}", self.config.bind, self.config.common.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(addr, "coordinator listening");

        let terminate = self.shared.terminate.clone();
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = terminate.cancelled() => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let acceptor = acceptor.clone();
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls) => {
                                let session = Session::new(tls, peer.to_string(), shared);
                                if let Err(e) = session.run().await {
                                    warn!(peer = %peer, error = %e, "session error");
                                }
                            }
                            Err(e) => warn!(peer = %peer, error = %e, "TLS handshake failed"),
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
        info!("listener stopped");
        Ok(())
    }
}

/// Server-side TLS: our certificate, no client certs (agents authenticate
/// with the HMAC challenge), cipher suites from config.
fn build_acceptor(config: &ServerConfig) -> Result<TlsAcceptor, ServerError> {
    let provider = Arc::new(tls::provider(&config.common.ciphers)?);
    let certs = tls::load_certs(&config.common.sslcert)?;
    let key = tls::load_private_key(&config.common.sslkey)?;
    let tls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
