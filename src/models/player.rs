//! Roster player model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A roster entry as written in configuration: a numeric id or a username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerRef {
    Id(u64),
    Name(String),
}

impl PlayerRef {
    /// Path segment for the users endpoint. Usernames are prefixed with `@`
    /// so that numeric-looking names are not mistaken for ids.
    pub fn lookup_key(&self) -> String {
        match self {
            PlayerRef::Id(id) => id.to_string(),
            PlayerRef::Name(name) => format!("@{}", name),
        }
    }
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerRef::Id(id) => write!(f, "{}", id),
            PlayerRef::Name(name) => f.write_str(name),
        }
    }
}

/// A resolved player. Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: u64,

    #[serde(rename = "username")]
    pub name: String,

    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Player {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            avatar_url: None,
        }
    }

    /// Public profile URL on the osu! website.
    pub fn profile_url(&self) -> String {
        format!("https://osu.ppy.sh/users/{}", self.id)
    }
}
