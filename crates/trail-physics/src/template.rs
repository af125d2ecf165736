//! Trail line template: how long each line remembers and how many lines fit
//! one draw call.

use crate::constants::{DEFAULT_HISTORY_LENGTH, INDEX_BUDGET, MAX_HISTORY_LENGTH, MIN_HISTORY_LENGTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("history length {0} is outside [{min}, {max}]", min = MIN_HISTORY_LENGTH, max = MAX_HISTORY_LENGTH)]
    HistoryLengthOutOfRange(u32),
}

#[derive(Serialize, Deserialize)]
struct TemplateDef {
    history_length: u32,
}

/// Segment layout of the trail lines.
///
/// The geometry itself is generated by the renderer from the vertex index,
/// so this only carries the numbers both sides agree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TemplateDef", into = "TemplateDef")]
pub struct TrailTemplate {
    history_length: u32,
}

impl TrailTemplate {
    pub fn new(history_length: u32) -> Result<Self, TemplateError> {
        if !(MIN_HISTORY_LENGTH..=MAX_HISTORY_LENGTH).contains(&history_length) {
            return Err(TemplateError::HistoryLengthOutOfRange(history_length));
        }
        Ok(Self { history_length })
    }

    /// Frames of history kept per line (buffer height)
    pub fn history_length(&self) -> u32 {
        self.history_length
    }

    /// Lines that fit one draw call: two vertices per history step.
    pub fn line_count(&self) -> u32 {
        INDEX_BUDGET / (2 * self.history_length)
    }

    /// Vertices emitted by a non-indexed ribbon draw (two triangles per segment)
    pub fn ribbon_vertex_count(&self) -> u32 {
        self.line_count() * (self.history_length - 1) * 6
    }
}

impl Default for TrailTemplate {
    fn default() -> Self {
        Self {
            history_length: DEFAULT_HISTORY_LENGTH,
        }
    }
}

impl TryFrom<TemplateDef> for TrailTemplate {
    type Error = TemplateError;

    fn try_from(def: TemplateDef) -> Result<Self, Self::Error> {
        Self::new(def.history_length)
    }
}

impl From<TrailTemplate> for TemplateDef {
    fn from(template: TrailTemplate) -> Self {
        Self {
            history_length: template.history_length,
        }
    }
}
