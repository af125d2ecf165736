//! Trail settings and the TOML configuration file

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use trail_physics::{LineWidth, TrailTemplate};

/// Runtime parameters of one trail controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailSettings {
    /// Maximum distance a vertex may travel per step
    pub speed_limit: f32,
    /// Exponential drag coefficient (`exp(-drag * dt)`)
    pub drag: f32,
    /// Speed below which a segment has zero width
    pub cutoff_speed: f32,
    pub speed_to_width: f32,
    pub max_width: f32,
    /// Changing the seed resets the simulation
    pub random_seed: u32,
}

impl Default for TrailSettings {
    fn default() -> Self {
        Self {
            speed_limit: 0.4,
            drag: 5.0,
            cutoff_speed: 0.0,
            speed_to_width: 0.02,
            max_width: 0.05,
            random_seed: 0,
        }
    }
}

impl TrailSettings {
    /// Clamp the width parameters to non-negative values
    pub fn sanitized(mut self) -> Self {
        self.cutoff_speed = self.cutoff_speed.max(0.0);
        self.speed_to_width = self.speed_to_width.max(0.0);
        self.max_width = self.max_width.max(0.0);
        self
    }

    pub fn line_width(&self) -> LineWidth {
        LineWidth {
            max_width: self.max_width,
            cutoff_speed: self.cutoff_speed,
            speed_to_width: self.speed_to_width,
        }
    }
}

/// Contents of `skinner.toml`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinnerConfig {
    pub template: TrailTemplate,
    pub trail: TrailSettings,
}

fn env_override<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = env::var(name) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => log::warn!("Ignoring {name}={value:?}: not a valid value"),
        }
    }
}

impl SkinnerConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        let config: Self = toml::from_str(content)?;
        Ok(config.sanitized())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigurationError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigurationError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigurationError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override trail settings from `SKINNER_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        env_override("SKINNER_SPEED_LIMIT", &mut self.trail.speed_limit);
        env_override("SKINNER_DRAG", &mut self.trail.drag);
        env_override("SKINNER_CUTOFF_SPEED", &mut self.trail.cutoff_speed);
        env_override("SKINNER_SPEED_TO_WIDTH", &mut self.trail.speed_to_width);
        env_override("SKINNER_MAX_WIDTH", &mut self.trail.max_width);
        env_override("SKINNER_RANDOM_SEED", &mut self.trail.random_seed);

        let mut history_length = self.template.history_length();
        env_override("SKINNER_HISTORY_LENGTH", &mut history_length);
        if history_length != self.template.history_length() {
            match TrailTemplate::new(history_length) {
                Ok(template) => self.template = template,
                Err(e) => log::warn!("Ignoring SKINNER_HISTORY_LENGTH: {e}"),
            }
        }
        self.trail = self.trail.sanitized();
    }

    fn sanitized(mut self) -> Self {
        let trail = self.trail.sanitized();
        if trail != self.trail {
            log::warn!("Negative width parameters in settings were clamped to zero");
        }
        self.trail = trail;
        self
    }
}
