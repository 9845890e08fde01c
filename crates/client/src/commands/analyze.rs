// `codesync analyze`: run AI analysis on the live document.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use codesync_common::types::{Severity, Suggestion};

use super::RoomArgs;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    room: RoomArgs,

    /// Apply every suggestion that carries a fix, as the ghost agent.
    #[arg(long)]
    apply: bool,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct AnalyzeResult {
    document_id: String,
    suggestions: Vec<Suggestion>,
    applied: Vec<usize>,
}

pub async fn run(args: AnalyzeArgs) -> Result<()> {
    let format = OutputFormat::detect(args.json);
    let (session, _) = args.room.open().await?;

    let report = session
        .analyze()
        .await
        .with_context(|| format!("analysis of document {} failed", session.document_id()));
    let report = match report {
        Ok(report) => report,
        Err(error) => {
            output::print_error(format, "ANALYSIS_FAILED", &format!("{error:#}"));
            session.close().await;
            return Err(error);
        }
    };

    let mut applied = Vec::new();
    if args.apply {
        let ghost = session.ghost_agent();
        match ghost.apply_suggestions(&report) {
            Ok(fixes) => applied = fixes.applied,
            Err(error) => output::print_error(format, "FIX_FAILED", &error.to_string()),
        }
    }
    let result = AnalyzeResult {
        document_id: session.document_id().to_string(),
        suggestions: report.suggestions,
        applied,
    };
    session.close().await;

    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &AnalyzeResult) -> String {
    if result.suggestions.is_empty() {
        return format!("document {}: no suggestions", result.document_id);
    }
    let mut lines = Vec::with_capacity(result.suggestions.len() + 1);
    lines.push(format!("document {}: {} suggestion(s)", result.document_id, result.suggestions.len()));
    for suggestion in &result.suggestions {
        let severity = match suggestion.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        let location = suggestion.line.map(|line| format!("line {line}")).unwrap_or_default();
        let fixed = if result.applied.iter().any(|line| Some(*line) == suggestion.line) {
            " (fixed)"
        } else {
            ""
        };
        lines.push(format!("  [{severity}] {location} {}{fixed}", suggestion.message));
    }
    lines.join("\n")
}
