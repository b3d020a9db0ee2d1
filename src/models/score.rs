//! Play result models.
//!
//! `RawResult` mirrors the osu! API v2 score payload (API version 20220705)
//! with every field that upstream may omit held as an `Option`. Normalization
//! into `NormalizedResult` happens in [`crate::calculate`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GameMode, Player};

/// Ranked status of a beatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeatmapStatus {
    Graveyard,
    Wip,
    Pending,
    Ranked,
    Approved,
    Qualified,
    Loved,
    #[serde(other)]
    Unknown,
}

impl BeatmapStatus {
    /// Whether plays on this beatmap award performance points.
    pub fn is_ranked(&self) -> bool {
        matches!(self, BeatmapStatus::Ranked | BeatmapStatus::Approved)
    }
}

/// The difficulty a result was set on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beatmap {
    pub id: u64,

    /// Difficulty name
    pub version: String,

    pub status: BeatmapStatus,

    #[serde(default)]
    pub difficulty_rating: f64,

    #[serde(default)]
    pub url: Option<String>,
}

impl Beatmap {
    /// Link to the beatmap page, derived from the id when upstream omits it.
    pub fn link(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("https://osu.ppy.sh/b/{}", self.id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatmapsetCovers {
    #[serde(default)]
    pub list: Option<String>,
}

/// The song a beatmap belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beatmapset {
    pub artist: String,
    pub title: String,

    #[serde(default)]
    pub covers: BeatmapsetCovers,
}

/// A modifier applied to a play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMod {
    pub acronym: String,
}

impl GameMod {
    pub fn new(acronym: impl Into<String>) -> Self {
        Self {
            acronym: acronym.into(),
        }
    }
}

/// Judgement counters as sent upstream. Any bucket may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStatistics {
    #[serde(default)]
    pub miss: Option<u32>,
    #[serde(default)]
    pub meh: Option<u32>,
    #[serde(default)]
    pub ok: Option<u32>,
    #[serde(default)]
    pub good: Option<u32>,
    #[serde(default)]
    pub great: Option<u32>,
    #[serde(default)]
    pub perfect: Option<u32>,
}

/// Judgement counters with every bucket defaulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCounts {
    pub miss: u32,
    pub meh: u32,
    pub ok: u32,
    pub good: u32,
    pub great: u32,
    pub perfect: u32,
}

impl From<&RawStatistics> for HitCounts {
    fn from(raw: &RawStatistics) -> Self {
        Self {
            miss: raw.miss.unwrap_or(0),
            meh: raw.meh.unwrap_or(0),
            ok: raw.ok.unwrap_or(0),
            good: raw.good.unwrap_or(0),
            great: raw.great.unwrap_or(0),
            perfect: raw.perfect.unwrap_or(0),
        }
    }
}

/// One play as returned by the recent scores endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// Stable upstream score id
    pub id: u64,

    /// Owning player
    pub user_id: u64,

    #[serde(rename = "ruleset_id", with = "ruleset_id")]
    pub mode: GameMode,

    pub beatmap: Beatmap,
    pub beatmapset: Beatmapset,

    #[serde(default)]
    pub statistics: RawStatistics,

    /// Fraction in `0.0..=1.0`
    #[serde(default)]
    pub accuracy: Option<f64>,

    #[serde(default)]
    pub total_score: u64,

    /// Only populated for scores imported from the legacy score system
    #[serde(default)]
    pub legacy_total_score: Option<u64>,

    #[serde(default)]
    pub pp: Option<f64>,

    /// Letter grade (`XH`, `X`, `SH`, `S`, `A`, `B`, `C`, `D`, `F`)
    pub rank: String,

    #[serde(default)]
    pub mods: Vec<GameMod>,

    #[serde(default)]
    pub max_combo: u32,

    pub ended_at: DateTime<Utc>,

    #[serde(default)]
    pub user: Option<Player>,
}

/// Where the accuracy of a normalized result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracySource {
    Upstream,
    Computed,
}

/// A result ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResult {
    pub id: u64,
    pub user_id: u64,
    pub mode: GameMode,
    pub beatmap: Beatmap,
    pub beatmapset: Beatmapset,
    pub statistics: HitCounts,

    /// Fraction in `0.0..=1.0`, always finite
    pub accuracy: f64,
    pub accuracy_source: AccuracySource,

    /// `total_score`, or the legacy total when the former is zero
    pub display_score: u64,

    pub pp: Option<f64>,
    pub rank: String,
    pub mods: Vec<String>,
    pub max_combo: u32,
    pub ended_at: DateTime<Utc>,
    pub user: Option<Player>,
}

/// Grade palette entries. Silver variants share the entry of their base grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grade {
    X,
    S,
    A,
    B,
    C,
    D,
}

impl Grade {
    pub const ALL: [Grade; 6] = [Grade::X, Grade::S, Grade::A, Grade::B, Grade::C, Grade::D];

    /// Parse an upstream rank string. Returns `None` outside the palette.
    pub fn parse(rank: &str) -> Option<Self> {
        match rank.trim().to_ascii_uppercase().as_str() {
            "X" | "XH" | "SS" | "SSH" => Some(Grade::X),
            "S" | "SH" => Some(Grade::S),
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::X => "X",
            Grade::S => "S",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod ruleset_id {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::models::GameMode;

    pub fn serialize<S: Serializer>(mode: &GameMode, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(mode.ruleset_id())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<GameMode, D::Error> {
        let id = u8::deserialize(d)?;
        GameMode::from_ruleset_id(id)
            .ok_or_else(|| de::Error::custom(format!("unknown ruleset id {}", id)))
    }
}
