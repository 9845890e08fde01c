// `codesync fix`: apply line fixes as the ghost agent.
//
// Fixes are given as `LINE=TEXT` and applied as one batch, highest line first.

use anyhow::{anyhow, Result};
use clap::Args;
use serde::Serialize;

use codesync_common::types::LineFix;

use super::RoomArgs;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct FixArgs {
    #[command(flatten)]
    room: RoomArgs,

    /// Replacement for one line, as `LINE=TEXT` (repeatable).
    #[arg(long = "fix", value_name = "LINE=TEXT", required = true, value_parser = parse_fix)]
    fixes: Vec<LineFix>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct FixResult {
    document_id: String,
    applied: Vec<usize>,
    rejected: Vec<usize>,
    line_count: usize,
}

pub async fn run(args: FixArgs) -> Result<()> {
    let format = OutputFormat::detect(args.json);
    let (session, _) = args.room.open().await?;
    let ghost = session.ghost_agent();
    session.presence().publish(ghost.presence());

    let report = match ghost.apply_multiple_fixes(&args.fixes) {
        Ok(report) => report,
        Err(error) => {
            output::print_error(format, "FIX_FAILED", &error.to_string());
            session.close().await;
            return Err(error.into());
        }
    };
    let result = FixResult {
        document_id: session.document_id().to_string(),
        applied: report.applied.clone(),
        rejected: report.rejected.iter().map(|(fix, _)| fix.line).collect(),
        line_count: ghost.line_count(),
    };
    session.close().await;

    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &FixResult) -> String {
    let mut out = format!("applied {} fix(es) to document {}", result.applied.len(), result.document_id);
    for line in &result.rejected {
        out.push_str(&format!("\nskipped line {line}: document has {} lines", result.line_count));
    }
    out
}

fn parse_fix(value: &str) -> Result<LineFix> {
    let (line, text) = value.split_once('=').ok_or_else(|| anyhow!("expected LINE=TEXT"))?;
    let line = line.trim().parse::<usize>().map_err(|_| anyhow!("`{line}` is not a line number"))?;
    Ok(LineFix::new(line, text))
}
