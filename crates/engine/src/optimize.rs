// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target-list optimizer.
//!
//! Takes raw targets (IPv4 addresses, CIDR blocks, `a.b.c.d-e` ranges) and
//! writes the queue file the stages consume: CIDR input is collapsed into
//! a minimal covering set and anything wider than /24 is split into /24
//! lines; loose addresses are grouped into consecutive runs and written
//! either as one CIDR line or in the `a.b.c.d-e` form nmap accepts
//! directly.

use ipnetwork::Ipv4Network;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("empty target list")]
    EmptyTargets,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes the optimized target queue for one scan.
#[derive(Debug)]
pub struct TargetOptimizer {
    path: PathBuf,
}

impl TargetOptimizer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Optimize `targets` and write the queue file. Unparseable entries are
    /// logged and skipped; an empty input list is an error.
    pub fn save(&self, targets: &[String]) -> Result<(), OptimizeError> {
        if targets.is_empty() {
            return Err(OptimizeError::EmptyTargets);
        }

        let mut nets: Vec<(u64, u64)> = Vec::new();
        let mut addrs: Vec<u64> = Vec::new();
        for target in targets {
            let target = target.trim();
            if target.is_empty() {
                continue;
            }
            if target.contains('/') {
                match target.parse::<Ipv4Network>() {
                    Ok(net) => nets.push(net_range(&net)),
                    Err(e) => warn!(entry = target, error = %e, "skipping unparseable target"),
                }
            } else if let Some((first, last_octet)) = target.split_once('-') {
                match parse_range(first, last_octet) {
                    Some((start, end)) => addrs.extend(start..=end),
                    None => warn!(entry = target, "skipping unparseable range"),
                }
            } else {
                match target.parse::<Ipv4Addr>() {
                    Ok(ip) => addrs.push(u64::from(u32::from(ip))),
                    Err(e) => warn!(entry = target, error = %e, "skipping unparseable target"),
                }
            }
        }

        let io_err = |source| OptimizeError::Io {
            path: self.path.clone(),
            source,
        };
        let file = std::fs::File::create(&self.path).map_err(io_err)?;
        let mut out = BufWriter::new(file);

        for (start, end) in merge_ranges(nets) {
            for (addr, prefix) in summarize(start, end) {
                write_block(&mut out, addr, prefix).map_err(io_err)?;
            }
        }

        addrs.sort_unstable();
        addrs.dedup();
        for (start, end) in consecutive_runs(&addrs) {
            let blocks = summarize(start, end);
            if let [(addr, prefix)] = blocks.as_slice() {
                writeln!(out, "{}/{}", addr, prefix).map_err(io_err)?;
            } else {
                // Covering the run needs several blocks; the glob form is
                // shorter and nmap takes it as-is.
                writeln!(out, "{}-{}", Ipv4Addr::from(start as u32), end & 0xff)
                    .map_err(io_err)?;
            }
        }

        out.flush().map_err(io_err)
    }
}

fn net_range(net: &Ipv4Network) -> (u64, u64) {
    let start = u64::from(u32::from(net.network()));
    let size = 1u64 << (32 - net.prefix());
    (start, start + size - 1)
}

fn parse_range(first: &str, last_octet: &str) -> Option<(u64, u64)> {
    let start: Ipv4Addr = first.parse().ok()?;
    let last: u8 = last_octet.parse().ok()?;
    let start = u64::from(u32::from(start));
    let end = (start & !0xff) | u64::from(last);
    (end >= start).then_some((start, end))
}

/// Merge sorted inclusive ranges, joining overlapping and adjacent ones.
fn merge_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, prev_end)) if start <= *prev_end + 1 => *prev_end = (*prev_end).max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Cover an inclusive address range with the minimal list of CIDR blocks.
fn summarize(mut start: u64, end: u64) -> Vec<(Ipv4Addr, u8)> {
    let mut blocks = Vec::new();
    while start <= end {
        let align = (start as u32).trailing_zeros();
        let remaining = end - start + 1;
        let fit = 63 - remaining.leading_zeros();
        let bits = align.min(fit);
        blocks.push((Ipv4Addr::from(start as u32), (32 - bits) as u8));
        start += 1u64 << bits;
    }
    blocks
}

/// Group sorted deduplicated addresses into runs of consecutive values.
fn consecutive_runs(addrs: &[u64]) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for &addr in addrs {
        match runs.last_mut() {
            Some((_, end)) if addr == *end + 1 => *end = addr,
            _ => runs.push((addr, addr)),
        }
    }
    runs
}

/// Write one covering block, splitting anything wider than /24.
fn write_block<W: Write>(out: &mut W, addr: Ipv4Addr, prefix: u8) -> std::io::Result<()> {
    if prefix >= 24 {
        return writeln!(out, "{}/{}", addr, prefix);
    }
    let base = u32::from(addr);
    let subnets = 1u32 << (24 - prefix);
    for i in 0..subnets {
        writeln!(out, "{}/24", Ipv4Addr::from(base + (i << 8)))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "optimize_tests.rs"]
mod tests;
