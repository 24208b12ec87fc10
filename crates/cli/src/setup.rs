// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace initialization.
//!
//! `dn config` creates the workspace directory, writes the default config
//! templates, and generates a self-signed certificate pair with the
//! system `openssl`. The certificate doubles as the authentication
//! secret, so the same workspace files are shipped to every agent.

use anyhow::{bail, Context as _, Result};
use clap::Args;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

const SERVER_TEMPLATE: &str = r#"[base]
reports = "reports"

[server]
stats = "run"
targets = "targets.work"
live-targets = "live-targets.work"
trace = "trace.snap"

[certs]
sslcert = "certfile.crt"
sslkey = "keyfile.key"
ciphers = ""
cert-hostname = "dragnet"

[nmap-scan]
discovery = "-n -sn -PE -PP"
stage1 = "-sV -Pn --top-ports 1000"
"#;

const AGENT_TEMPLATE: &str = r#"[base]
reports = "reports"

[certs]
sslcert = "certfile.crt"
sslkey = "keyfile.key"
ciphers = ""
cert-hostname = "dragnet"
"#;

/// Certificate subject fields.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub email: String,

    /// Common name; must match `cert-hostname` in the config
    #[arg(long, default_value = "dragnet")]
    pub cn: String,

    #[arg(long)]
    pub country: String,

    #[arg(long)]
    pub state: String,

    #[arg(long)]
    pub locality: String,

    #[arg(long)]
    pub org: String,

    #[arg(long = "org-unit")]
    pub org_unit: String,

    #[arg(long, default_value_t = 3650)]
    pub days: u32,
}

/// Create the workspace: templates plus a fresh RSA-2048 self-signed pair.
pub async fn create_workspace(workspace: &Path, args: &ConfigArgs) -> Result<()> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    std::fs::write(workspace.join("dragnet.conf"), SERVER_TEMPLATE)?;
    std::fs::write(workspace.join("agent.conf"), AGENT_TEMPLATE)?;

    let subject = format!(
        "/C={}/ST={}/L={}/O={}/OU={}/CN={}/emailAddress={}",
        args.country, args.state, args.locality, args.org, args.org_unit, args.cn, args.email
    );
    let keyfile = workspace.join("keyfile.key");
    let certfile = workspace.join("certfile.crt");
    debug!(subject, "generating certificate pair");

    let output = Command::new("openssl")
        .arg("req")
        .args(["-newkey", "rsa:2048", "-nodes"])
        .arg("-keyout")
        .arg(&keyfile)
        .arg("-x509")
        .args(["-days", &args.days.to_string()])
        .arg("-out")
        .arg(&certfile)
        .args(["-subj", &subject])
        .output()
        .await
        .context("failed to run openssl")?;
    if !output.status.success() {
        bail!(
            "openssl failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    println!("workspace ready: {}", workspace.display());
    println!("  config:      {}", workspace.join("dragnet.conf").display());
    println!("  agent conf:  {}", workspace.join("agent.conf").display());
    println!("  certificate: {}", certfile.display());
    println!("  private key: {}", keyfile.display());
    Ok(())
}

#[cfg(test)]
#[path = "setup_tests.rs"]
mod tests;
