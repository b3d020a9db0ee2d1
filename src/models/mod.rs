//! Core data models for score-watch.

mod mode;
mod player;
mod score;

pub use mode::*;
pub use player::*;
pub use score::*;

#[cfg(test)]
pub(crate) use score::fixtures;
