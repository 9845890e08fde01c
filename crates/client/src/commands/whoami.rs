// `codesync whoami`: show the participant identity used in every room.

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use codesync_client::config::{global_config_path, ClientConfig};
use codesync_client::identity::{identity_path, Identity};

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct WhoamiArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct WhoamiResult {
    participant_id: String,
    display_name: String,
    color: String,
    relay_url: String,
    api_url: String,
    identity_path: Option<String>,
    config_path: Option<String>,
}

pub fn run(args: WhoamiArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let config = ClientConfig::load();
    let identity = Identity::load_or_create()
        .context("failed to load participant identity")?
        .with_display_name(config.display_name.clone());

    let result = WhoamiResult {
        participant_id: identity.participant_id,
        display_name: identity.display_name,
        color: identity.color,
        relay_url: config.relay_url,
        api_url: config.api_url,
        identity_path: identity_path().map(|p| p.display().to_string()),
        config_path: global_config_path().map(|p| p.display().to_string()),
    };
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &WhoamiResult) -> String {
    format!(
        "{} ({})\ncolor: {}\nrelay: {}\napi:   {}",
        result.display_name, result.participant_id, result.color, result.relay_url, result.api_url
    )
}
