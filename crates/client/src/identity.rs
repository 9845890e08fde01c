// Participant identity shared by every session of one user.
//
// Stored at `~/.codesync/identity.toml` and created on first use, so two
// tabs or processes of the same user publish presence under the same id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use codesync_common::crdt::Author;
use codesync_common::types::{AwarenessRecord, CursorPosition};

use crate::config::{global_dir, ConfigError};

const PALETTE: &[&str] =
    &["#E06C75", "#98C379", "#E5C07B", "#61AFEF", "#C678DD", "#56B6C2", "#D19A66", "#BE5046"];

pub fn identity_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("identity.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub participant_id: String,
    pub display_name: String,
    pub color: String,
}

impl Identity {
    pub fn generate(display_name: impl Into<String>) -> Self {
        let participant_id = Uuid::new_v4().to_string();
        let color = color_for(&participant_id).to_string();
        Self { participant_id, display_name: display_name.into(), color }
    }

    /// Load `~/.codesync/identity.toml`, creating it on first use.
    pub fn load_or_create() -> Result<Self, ConfigError> {
        let path = identity_path().ok_or(ConfigError::NoHomeDir)?;
        Self::load_or_create_at(&path)
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            return Ok(toml::from_str(&contents)?);
        }

        let identity = Self::generate(default_display_name());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(&identity)?)?;
        info!(
            participant_id = %identity.participant_id,
            path = %path.display(),
            "created participant identity"
        );
        Ok(identity)
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        if let Some(name) = display_name {
            self.display_name = name;
        }
        self
    }

    pub fn author(&self) -> Author {
        Author::human(self.participant_id.clone())
    }

    pub fn presence(&self, cursor: Option<CursorPosition>) -> AwarenessRecord {
        AwarenessRecord {
            participant_id: self.participant_id.clone(),
            display_name: self.display_name.clone(),
            color: self.color.clone(),
            cursor,
            is_agent: false,
        }
    }
}

/// Stable palette color for a participant id.
pub fn color_for(participant_id: &str) -> &'static str {
    let digest = Sha256::digest(participant_id.as_bytes());
    PALETTE[digest[0] as usize % PALETTE.len()]
}

fn default_display_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "Anonymous".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn identity_is_created_once_and_reused() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(".codesync").join("identity.toml");

        let first = Identity::load_or_create_at(&path).expect("identity should be created");
        let second = Identity::load_or_create_at(&path).expect("identity should load");
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first.participant_id).is_ok());
    }

    #[test]
    fn color_is_stable_and_from_the_palette() {
        let color = color_for("participant-1");
        assert_eq!(color, color_for("participant-1"));
        assert!(PALETTE.contains(&color));
    }

    #[test]
    fn presence_carries_identity_fields() {
        let identity = Identity::generate("Ada").with_display_name(Some("Ada L.".into()));
        let record = identity.presence(Some(CursorPosition { line: 3, column: 1 }));
        assert_eq!(record.participant_id, identity.participant_id);
        assert_eq!(record.display_name, "Ada L.");
        assert_eq!(record.color, identity.color);
        assert!(!record.is_agent);
    }
}
