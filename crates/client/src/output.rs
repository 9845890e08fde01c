// CLI output: human text on a terminal, JSON lines when piped or with `--json`.
//
// One-shot commands print a single result value. `join` streams `RoomEvent`s,
// one line each.

use std::io::{self, IsTerminal, Write};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn detect(json_flag: bool) -> Self {
        Self::pick(json_flag, io::stdout().is_terminal())
    }

    fn pick(json_flag: bool, stdout_is_tty: bool) -> Self {
        match (json_flag, stdout_is_tty) {
            (false, true) => Self::Human,
            _ => Self::Json,
        }
    }
}

/// Something that happened in a joined room.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoomEvent<'a> {
    Joined { room_key: &'a str, bootstrap: &'a str, text: &'a str },
    Changed { origin: String, text: &'a str },
    Presence { participants: Vec<&'a str> },
    Analysis { suggestions: usize },
    AnalysisFailed { error: String },
}

impl RoomEvent<'_> {
    fn human(&self) -> String {
        match self {
            Self::Joined { room_key, bootstrap, text } => {
                format!("joined {room_key} ({bootstrap})\n{text}")
            }
            Self::Changed { origin, text } => format!("--- {origin} ---\n{text}"),
            Self::Presence { participants } => format!("*** here: {}", participants.join(", ")),
            Self::Analysis { suggestions } => format!("*** analysis: {suggestions} suggestion(s)"),
            Self::AnalysisFailed { error } => format!("*** analysis failed: {error}"),
        }
    }
}

pub fn print_event(format: OutputFormat, event: &RoomEvent<'_>) -> io::Result<()> {
    write_output(&mut io::stdout().lock(), format, event, RoomEvent::human)
}

pub fn print_output<T, F>(format: OutputFormat, value: &T, human: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    write_output(&mut io::stdout().lock(), format, value, human)
}

fn write_output<W, T, F>(out: &mut W, format: OutputFormat, value: &T, human: F) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    if format == OutputFormat::Human {
        return writeln!(out, "{}", human(value));
    }
    serde_json::to_writer(&mut *out, value).map_err(io::Error::other)?;
    writeln!(out)
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

/// Report a failure on stderr.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut stderr = io::stderr().lock();
    let _ = match format {
        OutputFormat::Human => writeln!(stderr, "error: {message}"),
        OutputFormat::Json => write_output(
            &mut stderr,
            format,
            &serde_json::json!({ "error": ErrorBody { code, message } }),
            |_| String::new(),
        ),
    };
}
