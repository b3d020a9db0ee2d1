//! Game mode (ruleset) model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the four osu! rulesets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Osu,
    Taiko,
    Fruits,
    Mania,
}

impl GameMode {
    /// Every mode, in the order a sweep visits them.
    pub const ALL: [GameMode; 4] = [
        GameMode::Osu,
        GameMode::Taiko,
        GameMode::Fruits,
        GameMode::Mania,
    ];

    /// Number of modes polled per player.
    pub const COUNT: usize = Self::ALL.len();

    /// Wire and storage name (`osu`, `taiko`, `fruits`, `mania`).
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Osu => "osu",
            GameMode::Taiko => "taiko",
            GameMode::Fruits => "fruits",
            GameMode::Mania => "mania",
        }
    }

    /// Human-readable label used in notification footers.
    pub fn label(&self) -> &'static str {
        match self {
            GameMode::Osu => "osu!standard",
            GameMode::Taiko => "osu!taiko",
            GameMode::Fruits => "osu!catch",
            GameMode::Mania => "osu!mania",
        }
    }

    /// Numeric ruleset id used by the osu! API.
    pub fn ruleset_id(&self) -> u8 {
        match self {
            GameMode::Osu => 0,
            GameMode::Taiko => 1,
            GameMode::Fruits => 2,
            GameMode::Mania => 3,
        }
    }

    pub fn from_ruleset_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.ruleset_id() == id)
    }

    /// Mania scores every judgement bucket and renders them individually.
    pub fn is_mania_family(&self) -> bool {
        matches!(self, GameMode::Mania)
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "osu" | "standard" => Ok(GameMode::Osu),
            "taiko" => Ok(GameMode::Taiko),
            "fruits" | "catch" | "ctb" => Ok(GameMode::Fruits),
            "mania" => Ok(GameMode::Mania),
            other => Err(format!("Unknown game mode: {}", other)),
        }
    }
}
