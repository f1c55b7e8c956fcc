use std::fmt::Write;

use serde::Serialize;

use crate::error::Result;
use crate::sources::Task;
use crate::summary::DashboardSummary;

const HEADERS: [&str; 4] = ["SOURCE", "ID", "STATE", "TITLE"];

#[derive(Serialize)]
struct JsonReport<'a> {
    service_tree: &'a str,
    tasks: &'a [Task],
    summary: DashboardSummary,
}

pub fn render_json(service_tree: &str, tasks: &[Task]) -> Result<String> {
    let report = JsonReport {
        service_tree,
        tasks,
        summary: DashboardSummary::from_tasks(tasks),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Plain-text table followed by the summary line.
pub fn render_table(service_tree: &str, tasks: &[Task]) -> String {
    let rows: Vec<[&str; 4]> = tasks
        .iter()
        .map(|t| [t.source.as_str(), t.id.as_str(), t.state.as_str(), t.title.as_str()])
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&HEADERS).chain(rows.iter()) {
        let line = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = writeln!(out, "{}", line.trim_end());
    }

    let summary = DashboardSummary::from_tasks(tasks);
    let _ = writeln!(
        out,
        "\n{} tasks for {service_tree}: {} open issues, {} alerts",
        tasks.len(),
        summary.open_issues,
        summary.alerts
    );
    out
}
