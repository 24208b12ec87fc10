// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal status display.
//!
//! Polls the context once per second and redraws three tables: the scan
//! summary, the activated stages, and the per-agent task ledger.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use dn_engine::SharedContext;

const CLEAR_SCREEN: &str = "\x1bc";
const TITLE: &str = "Distributed Scan Status";

const CTX_HEADERS: [&str; 3] = ["Stages Left", "Pending Tasks", "Completion %"];
const STAGE_HEADERS: [&str; 4] = ["Stage", "Targets", "Finished", "Completion %"];
const TASK_HEADERS: [&str; 4] = ["Agent", "Stage", "Task Status", "Target"];

/// Redraw until the scan finishes or shutdown is requested.
pub async fn show_loop(ctx: SharedContext, terminate: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = terminate.cancelled() => break,
        }
        let (frame, finished) = {
            let ctx = ctx.lock();
            (render_frame(&ctx), ctx.is_finished())
        };
        print!("{frame}");
        if finished {
            break;
        }
    }
}

fn render_frame(ctx: &dn_engine::Context) -> String {
    let (stages_left, pending, pct) = ctx.ctx_status();
    let ctx_rows = vec![vec![
        stages_left.to_string(),
        pending.to_string(),
        format!("{pct:.2}"),
    ]];

    let stage_rows: Vec<Vec<String>> = ctx
        .active_stages_status()
        .into_iter()
        .map(|(name, targets, finished, pct)| {
            vec![
                name,
                targets.to_string(),
                finished.to_string(),
                format!("{pct:.2}"),
            ]
        })
        .collect();

    let task_rows: Vec<Vec<String>> = ctx
        .tasks_status()
        .into_iter()
        .map(|(agent, stage, status, target)| vec![agent, stage, status, target])
        .collect();

    let mut frame = String::new();
    frame.push_str(CLEAR_SCREEN);
    frame.push_str(&format!("\n\n{TITLE}\n{}\n\n", "=".repeat(TITLE.len())));
    frame.push_str(&format_table(&CTX_HEADERS, &ctx_rows));
    frame.push_str(&format_table(&STAGE_HEADERS, &stage_rows));
    frame.push_str(&format_table(&TASK_HEADERS, &task_rows));
    frame
}

/// Left-justified columns separated by two spaces, with dashed rules
/// above and below the header.
fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let mut lines = Vec::with_capacity(rows.len() + 3);
    lines.push(format_row(&rule, &widths));
    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    lines.push(format_row(&header_cells, &widths));
    lines.push(format_row(&rule, &widths));
    for row in rows {
        lines.push(format_row(row, &widths));
    }
    format!("{}\n\n", lines.join("\n"))
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    padded.join("  ").trim_end().to_string()
}

#[cfg(test)]
#[path = "display_tests.rs"]
mod tests;
