// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TLS material loading and cipher-suite selection.
//!
//! Both roles share one self-signed certificate: the server presents it,
//! the agent pins it as its only trust root. The cipher-suite list comes
//! from config; names are matched against the provider's suite names
//! (e.g. `TLS13_AES_256_GCM_SHA384`).

use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{RootCertStore, SupportedCipherSuite};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("unknown cipher suite: {0}")]
    UnknownCipherSuite(String),

    #[error("invalid certificate: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Load all certificates from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = std::fs::File::open(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = std::fs::File::open(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Build a trust store containing only the shared certificate.
pub fn pinned_roots(cert_path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(cert_path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Crypto provider restricted to the configured cipher suites.
///
/// An empty list keeps the provider defaults. Every configured name must
/// match a supported suite; a typo fails startup instead of silently
/// weakening or emptying the suite list.
pub fn provider(cipher_names: &[String]) -> Result<CryptoProvider, TlsError> {
    let mut provider = aws_lc_rs::default_provider();
    if cipher_names.is_empty() {
        return Ok(provider);
    }

    for name in cipher_names {
        if !provider
            .cipher_suites
            .iter()
            .any(|s| name.eq_ignore_ascii_case(&suite_name(s)))
        {
            return Err(TlsError::UnknownCipherSuite(name.clone()));
        }
    }
    provider
        .cipher_suites
        .retain(|s| cipher_names.iter().any(|n| n.eq_ignore_ascii_case(&suite_name(s))));
    Ok(provider)
}

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

#[cfg(test)]
#[path = "tls_tests.rs"]
mod tests;
