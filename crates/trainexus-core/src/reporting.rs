use anyhow::{Context, Result};
use std::path::Path;

use crate::regression::{RegressionReport, RegressionRow};

pub const CSV_HEADER: &str = "tag,version,persona,status,verdict,aggregate_score,baseline_score,delta,flaky,execution_error,passes,fails,inconclusive,errors,detail";

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn score(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_default()
}

fn csv_row(row: &RegressionRow) -> String {
    [
        csv_field(&row.tag),
        row.version.map(|v| v.to_string()).unwrap_or_default(),
        csv_field(row.persona.as_deref().unwrap_or_default()),
        row.status.as_str().to_string(),
        row.verdict.map(|v| v.as_str().to_string()).unwrap_or_default(),
        score(row.aggregate_score),
        score(row.baseline_score),
        score(row.delta),
        row.flaky.to_string(),
        row.execution_error.to_string(),
        row.passes.to_string(),
        row.fails.to_string(),
        row.inconclusive.to_string(),
        row.errors.to_string(),
        csv_field(row.detail.as_deref().unwrap_or_default()),
    ]
    .join(",")
}

/// Render the report as CSV, one line per row after the header.
pub fn render_csv(report: &RegressionReport) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for row in &report.rows {
        out.push_str(&csv_row(row));
        out.push('\n');
    }
    out
}

/// Write the report as CSV.
pub fn write_report_csv(path: &Path, report: &RegressionReport) -> Result<()> {
    std::fs::write(path, render_csv(report)).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Write the report in pretty JSON format.
pub fn write_report_json(path: &Path, report: &RegressionReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize regression report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render markdown summary for terminal or PR output.
pub fn render_summary_md(report: &RegressionReport) -> String {
    let mut out = String::new();
    out.push_str("# Regression Summary\n\n");
    out.push_str(&format!(
        "- run: {}\n- pass: {}\n- fail: {}\n- inconclusive: {}\n- execution errors: {}\n\n",
        report.run_id,
        report.counts.pass,
        report.counts.fail,
        report.counts.inconclusive,
        report.counts.execution_error
    ));

    out.push_str("| tag | version | persona | status | score | baseline | delta | flaky |\n");
    out.push_str("|---|---|---|---|---|---|---|---|\n");
    for row in &report.rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
            row.tag,
            row.version.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            row.persona.as_deref().unwrap_or("-"),
            row.status.as_str(),
            score(row.aggregate_score),
            score(row.baseline_score),
            score(row.delta),
            if row.flaky { "yes" } else { "" }
        ));
    }

    let problems: Vec<&RegressionRow> = report.rows.iter().filter(|r| r.detail.is_some()).collect();
    if !problems.is_empty() {
        out.push_str("\n## Details\n");
        for row in problems {
            let label = match (&row.persona, row.version) {
                (Some(persona), Some(v)) => format!("{}@{v} ({persona})", row.tag),
                (Some(persona), None) => format!("{} ({persona})", row.tag),
                (None, Some(v)) => format!("{}@{v}", row.tag),
                (None, None) => row.tag.clone(),
            };
            out.push_str(&format!(
                "- `{}`: {}\n",
                label,
                row.detail.as_deref().unwrap_or_default()
            ));
        }
    }
    out
}
