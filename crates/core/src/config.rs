// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration.
//!
//! The config file is an INI-style document (`[section]` / `key = value`)
//! parsed with toml. All relative paths resolve against the workspace
//! directory (`--name`). The `[nmap-scan]` section lists one option string
//! per stage, in file order; the `discovery` key marks the Discovery stage.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::auth;

/// Name of the stage whose results feed the live-target list.
pub const DISCOVERY_STAGE: &str = "discovery";

/// Errors raised while loading configuration. All of them are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing [server] section")]
    MissingServerSection,

    #[error("no stages configured under [nmap-scan]")]
    NoStages,

    #[error("failed to read certificate {path}: {source}")]
    Certificate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    base: RawBase,
    server: Option<RawServer>,
    certs: RawCerts,
    #[serde(rename = "nmap-scan", default)]
    scan: IndexMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawBase {
    reports: String,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    stats: String,
    targets: String,
    #[serde(rename = "live-targets")]
    live_targets: String,
    trace: String,
}

#[derive(Debug, Deserialize)]
struct RawCerts {
    sslcert: String,
    sslkey: String,
    #[serde(default)]
    ciphers: String,
    #[serde(rename = "cert-hostname")]
    cert_hostname: String,
}

/// Fields shared by both roles.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub workspace: PathBuf,
    pub reports_dir: PathBuf,
    pub port: u16,
    pub sslcert: PathBuf,
    pub sslkey: PathBuf,
    /// Cipher-suite names from config, already split; empty means provider
    /// defaults.
    pub ciphers: Vec<String>,
    /// Hostname the agent uses for SNI / certificate verification.
    pub cert_hostname: String,
    /// Derived from the certificate file; see [`crate::auth`].
    pub secret_key: Vec<u8>,
}

/// One configured scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub name: String,
    pub options: String,
}

impl StagePlan {
    pub fn is_discovery(&self) -> bool {
        self.name == DISCOVERY_STAGE
    }
}

/// Coordinator-side configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub common: CommonConfig,
    /// Address to bind the listener to.
    pub bind: String,
    /// Raw target list supplied on the command line.
    pub targets: PathBuf,
    /// Run directory for coordinator state.
    pub run_dir: PathBuf,
    /// Optimized target queue consumed by the Discovery stage.
    pub queue_path: PathBuf,
    /// Live-target list written by Discovery, consumed by later stages.
    pub live_targets_path: PathBuf,
    /// Context snapshot file; non-empty means resume.
    pub snapshot_path: PathBuf,
    /// Stages in file order.
    pub stages: Vec<StagePlan>,
}

/// Worker-side configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub common: CommonConfig,
    /// Coordinator host to connect to.
    pub server: String,
}

/// Runtime configuration, tagged by role.
#[derive(Debug, Clone)]
pub enum Config {
    Server(ServerConfig),
    Agent(AgentConfig),
}

impl Config {
    pub fn common(&self) -> &CommonConfig {
        match self {
            Config::Server(cfg) => &cfg.common,
            Config::Agent(cfg) => &cfg.common,
        }
    }
}

fn read_raw(workspace: &Path, config_file: &Path) -> Result<RawConfig, ConfigError> {
    let path = workspace.join(config_file);
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

fn build_common(
    workspace: &Path,
    raw: &RawConfig,
    port: u16,
) -> Result<CommonConfig, ConfigError> {
    let reports_dir = workspace.join(&raw.base.reports);
    std::fs::create_dir_all(&reports_dir).map_err(|source| ConfigError::CreateDir {
        path: reports_dir.clone(),
        source,
    })?;

    let sslcert = workspace.join(&raw.certs.sslcert);
    let sslkey = workspace.join(&raw.certs.sslkey);
    let secret_key =
        auth::derive_secret_key(&sslcert).map_err(|source| ConfigError::Certificate {
            path: sslcert.clone(),
            source,
        })?;

    let ciphers = raw
        .certs
        .ciphers
        .split([':', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Ok(CommonConfig {
        workspace: workspace.to_path_buf(),
        reports_dir,
        port,
        sslcert,
        sslkey,
        ciphers,
        cert_hostname: raw.certs.cert_hostname.clone(),
        secret_key,
    })
}

impl ServerConfig {
    /// Load coordinator configuration from `workspace/config_file`.
    pub fn load(
        workspace: &Path,
        config_file: &Path,
        bind: String,
        port: u16,
        targets: PathBuf,
    ) -> Result<Self, ConfigError> {
        let raw = read_raw(workspace, config_file)?;
        let common = build_common(workspace, &raw, port)?;
        let server = raw.server.as_ref().ok_or(ConfigError::MissingServerSection)?;

        if raw.scan.is_empty() {
            return Err(ConfigError::NoStages);
        }
        let stages = raw
            .scan
            .iter()
            .map(|(name, options)| StagePlan {
                name: name.clone(),
                options: options.clone(),
            })
            .collect();

        let run_dir = workspace.join(&server.stats);
        std::fs::create_dir_all(&run_dir).map_err(|source| ConfigError::CreateDir {
            path: run_dir.clone(),
            source,
        })?;

        Ok(Self {
            common,
            bind,
            targets,
            run_dir,
            queue_path: workspace.join(&server.targets),
            live_targets_path: workspace.join(&server.live_targets),
            snapshot_path: workspace.join(&server.trace),
            stages,
        })
    }
}

impl AgentConfig {
    /// Load worker configuration from `workspace/config_file`.
    pub fn load(
        workspace: &Path,
        config_file: &Path,
        server: String,
        port: u16,
    ) -> Result<Self, ConfigError> {
        let raw = read_raw(workspace, config_file)?;
        let common = build_common(workspace, &raw, port)?;
        Ok(Self { common, server })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
