// CLI subcommand dispatch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use codesync_client::bootstrap::BootstrapOutcome;
use codesync_client::config::ClientConfig;
use codesync_client::identity::Identity;
use codesync_client::services::{HttpAnalysisService, HttpDocumentStore};
use codesync_client::transport::WebSocketConnector;
use codesync_client::{RoomSession, SessionOptions};

pub mod analyze;
pub mod fix;
pub mod join;
pub mod whoami;

#[derive(Subcommand)]
pub enum Command {
    /// Join a document room and follow it live
    Join(join::JoinArgs),
    /// Apply line fixes to a document as the ghost agent
    Fix(fix::FixArgs),
    /// Run AI analysis on a document, optionally applying its fixes
    Analyze(analyze::AnalyzeArgs),
    /// Show the local participant identity
    Whoami(whoami::WhoamiArgs),
}

pub async fn run(cmd: Command) -> Result<()> {
    match cmd {
        Command::Join(args) => join::run(args).await,
        Command::Fix(args) => fix::run(args).await,
        Command::Analyze(args) => analyze::run(args).await,
        Command::Whoami(args) => whoami::run(args),
    }
}

/// Connection flags shared by every command that joins a room.
#[derive(Debug, Args)]
pub struct RoomArgs {
    /// Document id (the room is `codesync-{id}`).
    pub document_id: String,

    /// Relay URL; overrides the config file.
    #[arg(long)]
    pub relay_url: Option<String>,

    /// Document/AI API URL; overrides the config file.
    #[arg(long)]
    pub api_url: Option<String>,

    /// Display name shown to other participants.
    #[arg(long)]
    pub name: Option<String>,

    /// Seconds to wait for the first sync.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

impl RoomArgs {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::load();
        if let Some(relay_url) = &self.relay_url {
            config.relay_url = relay_url.clone();
        }
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        if self.name.is_some() {
            config.display_name = self.name.clone();
        }
        config
    }

    /// Open the room and wait until it is synced and bootstrapped.
    pub async fn open(&self) -> Result<(RoomSession, BootstrapOutcome)> {
        let config = self.config();
        let identity = Identity::load_or_create().context("failed to load participant identity")?;
        let connector = WebSocketConnector::new(&config.relay_url)?;
        let session = RoomSession::open(
            self.document_id.clone(),
            SessionOptions::from_config(&config, identity),
            Arc::new(connector),
            Arc::new(HttpDocumentStore::new(config.api_url.clone())),
            Arc::new(HttpAnalysisService::new(config.api_url.clone())),
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(self.timeout),
            session.wait_bootstrapped(),
        )
        .await
        .with_context(|| {
            format!("room `{}` did not sync within {}s", session.room_key(), self.timeout)
        })??;
        Ok((session, outcome))
    }
}
