//! Notification rendering.
//!
//! Turns a `NormalizedResult` into a Discord-style embed. Rendering is pure:
//! the same result and configuration always give the same payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Grade, NormalizedResult};

/// Shown in place of the modifier list for a no-mod play.
pub const NO_MODS: &str = "No Mods";

/// Shown in place of the pp value on beatmaps that award none.
pub const UNRANKED: &str = "Unranked";

/// Errors that can occur during rendering.
#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("Unknown grade: {0:?}")]
    UnknownGrade(String),
}

/// Colour and icon for one grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeStyle {
    pub color: u32,
    pub icon: &'static str,
}

/// Palette lookup. Total over `Grade`; unknown strings never reach here.
pub fn grade_style(grade: Grade) -> GradeStyle {
    match grade {
        Grade::X => GradeStyle {
            color: 0xF2D646,
            icon: "grade-x.png",
        },
        Grade::S => GradeStyle {
            color: 0xF0A431,
            icon: "grade-s.png",
        },
        Grade::A => GradeStyle {
            color: 0x4FC35B,
            icon: "grade-a.png",
        },
        Grade::B => GradeStyle {
            color: 0x3D8EDB,
            icon: "grade-b.png",
        },
        Grade::C => GradeStyle {
            color: 0xA548C9,
            icon: "grade-c.png",
        },
        Grade::D => GradeStyle {
            color: 0xD83B3B,
            icon: "grade-d.png",
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// A rendered notification, serialized as a Discord embed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub url: String,

    /// Modifier list or [`NO_MODS`]
    pub description: String,

    pub color: u32,
    pub fields: Vec<EmbedField>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,

    /// Grade icon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,

    pub footer: EmbedFooter,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    /// Look up a field value by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Renderer configuration.
#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    /// Base URL that grade and mode icons are served from. Icons are left
    /// out of the embed when unset.
    pub asset_base_url: Option<String>,
}

/// Notification renderer.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    fn asset(&self, file: &str) -> Option<String> {
        self.config
            .asset_base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), file))
    }

    /// Render a result. Fails only on a grade outside the palette.
    pub fn render(&self, result: &NormalizedResult) -> Result<NotificationPayload, RenderError> {
        let grade =
            Grade::parse(&result.rank).ok_or_else(|| RenderError::UnknownGrade(result.rank.clone()))?;
        let style = grade_style(grade);

        let mut fields = vec![
            EmbedField::inline("Score", result.display_score.to_string()),
            EmbedField::inline("Accuracy", format_accuracy(result.accuracy)),
            EmbedField::inline("Max Combo", format!("{}x", result.max_combo)),
        ];

        if result.mode.is_mania_family() {
            let hits = &result.statistics;
            fields.extend([
                EmbedField::inline("MAX", hits.perfect.to_string()),
                EmbedField::inline("300", hits.great.to_string()),
                EmbedField::inline("200", hits.good.to_string()),
                EmbedField::inline("100", hits.ok.to_string()),
                EmbedField::inline("50", hits.meh.to_string()),
                EmbedField::inline("Miss", hits.miss.to_string()),
            ]);
        }

        let author = result.user.as_ref().map(|player| EmbedAuthor {
            name: player.name.clone(),
            url: player.profile_url(),
            icon_url: player.avatar_url.clone(),
        });

        Ok(NotificationPayload {
            title: render_title(result),
            url: result.beatmap.link(),
            description: render_mods(&result.mods),
            color: style.color,
            fields,
            author,
            thumbnail: self.asset(style.icon).map(|url| EmbedImage { url }),
            image: result
                .beatmapset
                .covers
                .list
                .clone()
                .map(|url| EmbedImage { url }),
            footer: EmbedFooter {
                text: format!(
                    "{} • {:.2}★",
                    result.mode.label(),
                    result.beatmap.difficulty_rating
                ),
                icon_url: self.asset(&format!("mode-{}.png", result.mode.as_str())),
            },
            timestamp: result.ended_at,
        })
    }
}

/// `Artist - Title [Difficulty] [123pp]`, or `[Unranked]` on unranked maps.
pub fn render_title(result: &NormalizedResult) -> String {
    let chart = format!(
        "{} - {} [{}]",
        result.beatmapset.artist, result.beatmapset.title, result.beatmap.version
    );

    if result.beatmap.status.is_ranked() {
        let pp = result.pp.unwrap_or(0.0).round() as i64;
        format!("{} [{}pp]", chart, pp)
    } else {
        format!("{} [{}]", chart, UNRANKED)
    }
}

/// `+HDDT`, or [`NO_MODS`].
pub fn render_mods(mods: &[String]) -> String {
    if mods.is_empty() {
        NO_MODS.to_string()
    } else {
        format!("+{}", mods.concat())
    }
}

/// Accuracy fraction as a percentage with two decimals.
pub fn format_accuracy(accuracy: f64) -> String {
    format!("{:.2}%", accuracy * 100.0)
}
