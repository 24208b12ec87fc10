// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live-host extraction from collected discovery reports.
//!
//! Only the pieces Discovery needs are read from the nmap XML: per-host
//! status and IPv4 address. Everything else in the reports is opaque to
//! the coordinator.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use tracing::{debug, warn};

/// Collect the IPv4 addresses of hosts reported up across every
/// `<stage>-*.xml` report in the directory. Unreadable or malformed
/// reports are logged and skipped.
pub fn hosts_up(reports_dir: &Path, stage: &str) -> Vec<String> {
    let entries = match std::fs::read_dir(reports_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %reports_dir.display(), error = %e, "cannot read reports directory");
            return Vec::new();
        }
    };

    let prefix = format!("{stage}-");
    let mut hosts = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) || !name.ends_with(".xml") {
            continue;
        }
        match parse_report(&entry.path()) {
            Ok(mut found) => {
                debug!(report = name, hosts = found.len(), "parsed discovery report");
                hosts.append(&mut found);
            }
            Err(e) => warn!(report = name, error = %e, "error parsing report"),
        }
    }
    hosts
}

fn parse_report(path: &Path) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_file(path)?;
    reader.config_mut().trim_text(true);

    let mut hosts = Vec::new();
    let mut up = false;
    let mut addr: Option<String> = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                b"host" => {
                    up = false;
                    addr = None;
                }
                b"status" => {
                    if attribute(e, b"state").as_deref() == Some("up") {
                        up = true;
                    }
                }
                b"address" => {
                    // Hosts can also carry a MAC address element.
                    if attribute(e, b"addrtype").as_deref() == Some("ipv4") {
                        addr = attribute(e, b"addr");
                    }
                }
                _ => {}
            },
            Event::End(ref e) if e.name().as_ref() == b"host" => {
                if up {
                    if let Some(addr) = addr.take() {
                        hosts.push(addr);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(hosts)
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    let attr = element.try_get_attribute(name).ok()??;
    let value = attr.unescape_value().ok()?;
    Some(value.into_owned())
}

#[cfg(test)]
#[path = "reports_tests.rs"]
mod tests;
