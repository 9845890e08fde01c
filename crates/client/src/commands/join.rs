// `codesync join`: follow a room live.
//
// Prints the document once synced, then every change and presence update.
// Lines typed on stdin are appended to the document. Ctrl-C leaves the room;
// so does a relay that refuses the session.

use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use codesync_common::delta::ChangeSource;

use super::RoomArgs;
use crate::output::{print_error, print_event, OutputFormat, RoomEvent};

#[derive(Debug, Args)]
pub struct JoinArgs {
    #[command(flatten)]
    room: RoomArgs,

    /// Emit one JSON event per line.
    #[arg(long)]
    json: bool,
}

pub async fn run(args: JoinArgs) -> Result<()> {
    let format = OutputFormat::detect(args.json);
    let (mut session, outcome) = args.room.open().await?;
    session.publish_presence(None);
    let text = session.snapshot();
    print_event(
        format,
        &RoomEvent::Joined { room_key: session.room_key(), bootstrap: outcome.as_str(), text: &text },
    )?;

    let mut changes = session.subscribe_changes();
    let mut presence = session.presence().subscribe();
    let mut analysis = session.take_analysis_outcomes();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut status = session.watch_status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(change) if change.source == ChangeSource::Remote => {
                    let text = session.snapshot();
                    print_event(format, &RoomEvent::Changed { origin: change.origin.to_string(), text: &text })?;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            Ok(()) = presence.changed() => {
                let records = presence.borrow_and_update().clone();
                let participants = records.iter().map(|record| record.display_name.as_str()).collect();
                print_event(format, &RoomEvent::Presence { participants })?;
            }
            Some(outcome) = async {
                match analysis.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                let event = match outcome.result {
                    Ok(report) => RoomEvent::Analysis { suggestions: report.suggestions.len() },
                    Err(error) => RoomEvent::AnalysisFailed { error: error.to_string() },
                };
                print_event(format, &event)?;
            }
            Err(_) = status.changed() => {
                let reason = session.failure().unwrap_or_else(|| "room session stopped".to_string());
                print_error(format, "SESSION_ENDED", &reason);
                break;
            }
            line = stdin.next_line() => match line? {
                Some(line) => {
                    let end = session.document().len();
                    let text = if end == 0 { line } else { format!("\n{line}") };
                    session.insert(end, &text)?;
                }
                None => break,
            },
        }
    }

    session.close().await;
    Ok(())
}
