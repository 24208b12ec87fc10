// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_cipher_list_keeps_provider_defaults() {
    let default_len = aws_lc_rs::default_provider().cipher_suites.len();
    let provider = provider(&[]).unwrap();
    assert_eq!(provider.cipher_suites.len(), default_len);
    assert!(!provider.cipher_suites.is_empty());
}

#[test]
fn cipher_list_restricts_suites() {
    let names = vec!["TLS13_AES_256_GCM_SHA384".to_string()];
    let provider = provider(&names).unwrap();
    assert_eq!(provider.cipher_suites.len(), 1);
    assert_eq!(
        format!("{:?}", provider.cipher_suites[0].suite()),
        "TLS13_AES_256_GCM_SHA384"
    );
}

#[test]
fn cipher_names_match_case_insensitively() {
    let names = vec!["tls13_aes_128_gcm_sha256".to_string()];
    let provider = provider(&names).unwrap();
    assert_eq!(provider.cipher_suites.len(), 1);
}

#[test]
fn unknown_cipher_name_fails_startup() {
    let names = vec!["TLS13_ROT13_WITH_QUANTUM".to_string()];
    let err = provider(&names).unwrap_err();
    assert!(matches!(err, TlsError::UnknownCipherSuite(_)));
}

#[test]
fn pem_without_certificates_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.crt");
    std::fs::write(&path, "not a pem\n").unwrap();
    assert!(matches!(
        load_certs(&path).unwrap_err(),
        TlsError::NoCertificates(_)
    ));
    assert!(matches!(
        load_private_key(&path).unwrap_err(),
        TlsError::NoPrivateKey(_)
    ));
}

#[test]
fn missing_file_reports_path() {
    let err = load_certs(std::path::Path::new("/nonexistent/certfile.crt")).unwrap_err();
    assert!(matches!(err, TlsError::Io { .. }));
}
