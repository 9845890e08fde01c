use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    #[default]
    Human,
    Agent,
}

impl fmt::Display for AuthorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => f.write_str("human"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

/// Who is editing through a replica: the participant id plus whether it is a
/// person or the ghost agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub kind: AuthorType,
}

impl Author {
    pub fn human(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: AuthorType::Human }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self { id: id.into(), kind: AuthorType::Agent }
    }

    /// Stamp this author with the current wall-clock time.
    pub fn origin_now(&self) -> EditOrigin {
        EditOrigin { author_id: self.id.clone(), author_type: self.kind, timestamp: Utc::now() }
    }
}

/// Attribution carried by every operation and change event.
///
/// The timestamp is diagnostic only; merge ordering never looks at it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditOrigin {
    pub author_id: String,
    pub author_type: AuthorType,
    pub timestamp: DateTime<Utc>,
}

impl EditOrigin {
    pub fn author(&self) -> Author {
        Author { id: self.author_id.clone(), kind: self.author_type }
    }

    pub fn is_agent(&self) -> bool {
        self.author_type == AuthorType::Agent
    }
}

impl fmt::Display for EditOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.author_type, self.author_id, self.timestamp.to_rfc3339())
    }
}
