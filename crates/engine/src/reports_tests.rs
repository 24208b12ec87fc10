// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const REPORT_TWO_UP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sn 192.168.10.0/24">
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="192.168.10.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="192.168.10.7" addrtype="ipv4"/>
  </host>
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="192.168.10.44" addrtype="ipv4"/>
  </host>
</nmaprun>
"#;

const REPORT_ONE_UP: &str = r#"<?xml version="1.0"?>
<nmaprun>
  <host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/></host>
</nmaprun>
"#;

#[test]
fn collects_up_hosts_across_matching_reports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("discovery-a.xml"), REPORT_TWO_UP).unwrap();
    std::fs::write(dir.path().join("discovery-b.xml"), REPORT_ONE_UP).unwrap();
    // Non-discovery reports and other files are ignored.
    std::fs::write(dir.path().join("stage1-a.xml"), REPORT_ONE_UP).unwrap();
    std::fs::write(dir.path().join("discovery-notes.txt"), "n/a").unwrap();

    let mut hosts = hosts_up(dir.path(), "discovery");
    hosts.sort();
    assert_eq!(hosts, ["10.0.0.5", "192.168.10.1", "192.168.10.44"]);
}

#[test]
fn down_hosts_are_excluded() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("discovery-a.xml"), REPORT_TWO_UP).unwrap();
    let hosts = hosts_up(dir.path(), "discovery");
    assert!(!hosts.contains(&"192.168.10.7".to_string()));
}

#[test]
fn malformed_reports_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("discovery-bad.xml"), "<nmaprun><host>").unwrap();
    std::fs::write(dir.path().join("discovery-good.xml"), REPORT_ONE_UP).unwrap();

    let hosts = hosts_up(dir.path(), "discovery");
    assert_eq!(hosts, ["10.0.0.5"]);
}

#[test]
fn missing_directory_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = hosts_up(&dir.path().join("nope"), "discovery");
    assert!(hosts.is_empty());
}
