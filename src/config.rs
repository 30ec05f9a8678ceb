use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::engine::progress::{Goal, GoalKind};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_review_cap")]
    pub review_cap: f64,
    #[serde(default = "default_easy_max_completed")]
    pub easy_max_completed: u32,
    #[serde(default = "default_medium_max_completed")]
    pub medium_max_completed: u32,
    #[serde(default = "default_regeneration_interval")]
    pub regeneration_interval: u32,
    #[serde(default = "default_mastery_threshold")]
    pub mastery_threshold: f64,
    #[serde(default = "default_review_cooldown_minutes")]
    pub review_cooldown_minutes: u64,
    #[serde(default = "default_mastery_half_life_days")]
    pub mastery_half_life_days: f64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_low_priority_factor")]
    pub low_priority_factor: u32,
    #[serde(default = "default_restore_window_minutes")]
    pub restore_window_minutes: u64,
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_category")]
    pub default_category: String,
    #[serde(default = "default_goals")]
    pub goals: Vec<Goal>,
}

/// One year.
const MAX_WINDOW_MINUTES: u64 = 525_600;
const MAX_DEBOUNCE_MS: u64 = 3_600_000;
const MAX_LOW_PRIORITY_FACTOR: u32 = 100;

fn minutes_to_ms(minutes: u64) -> i64 {
    i64::try_from(minutes.saturating_mul(60_000)).unwrap_or(i64::MAX)
}

fn default_batch_size() -> usize {
    20
}
fn default_review_cap() -> f64 {
    0.6
}
fn default_easy_max_completed() -> u32 {
    50
}
fn default_medium_max_completed() -> u32 {
    100
}
fn default_regeneration_interval() -> u32 {
    10
}
fn default_mastery_threshold() -> f64 {
    0.8
}
fn default_review_cooldown_minutes() -> u64 {
    10
}
fn default_mastery_half_life_days() -> f64 {
    14.0
}
fn default_debounce_ms() -> u64 {
    1000
}
fn default_low_priority_factor() -> u32 {
    3
}
fn default_restore_window_minutes() -> u64 {
    30
}
fn default_data_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vocabr")
        .to_string_lossy()
        .to_string()
}
fn default_category() -> String {
    "animals".to_string()
}
fn default_goals() -> Vec<Goal> {
    vec![
        Goal {
            kind: GoalKind::Daily,
            target: 20,
            is_active: true,
        },
        Goal {
            kind: GoalKind::Weekly,
            target: 100,
            is_active: true,
        },
        Goal {
            kind: GoalKind::Monthly,
            target: 400,
            is_active: false,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            review_cap: default_review_cap(),
            easy_max_completed: default_easy_max_completed(),
            medium_max_completed: default_medium_max_completed(),
            regeneration_interval: default_regeneration_interval(),
            mastery_threshold: default_mastery_threshold(),
            review_cooldown_minutes: default_review_cooldown_minutes(),
            mastery_half_life_days: default_mastery_half_life_days(),
            debounce_ms: default_debounce_ms(),
            low_priority_factor: default_low_priority_factor(),
            restore_window_minutes: default_restore_window_minutes(),
            shuffle_seed: None,
            data_dir: default_data_dir(),
            default_category: default_category(),
            goals: default_goals(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.validate();
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vocabr")
            .join("config.toml")
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn review_cooldown_ms(&self) -> i64 {
        minutes_to_ms(self.review_cooldown_minutes)
    }

    pub fn restore_window_ms(&self) -> i64 {
        minutes_to_ms(self.restore_window_minutes)
    }

    /// Clamp values that would break scheduling or persistence back into range.
    /// Call after deserialization or CLI overrides.
    pub fn validate(&mut self) {
        self.batch_size = self.batch_size.clamp(1, 200);
        if !self.review_cap.is_finite() {
            self.review_cap = default_review_cap();
        }
        self.review_cap = self.review_cap.clamp(0.0, 1.0);
        if self.medium_max_completed < self.easy_max_completed {
            self.medium_max_completed = self.easy_max_completed;
        }
        self.regeneration_interval = self.regeneration_interval.max(1);
        if !self.mastery_threshold.is_finite() {
            self.mastery_threshold = default_mastery_threshold();
        }
        self.mastery_threshold = self.mastery_threshold.clamp(0.0, 1.0);
        if !(self.mastery_half_life_days.is_finite() && self.mastery_half_life_days > 0.0) {
            self.mastery_half_life_days = default_mastery_half_life_days();
        }
        self.review_cooldown_minutes = self.review_cooldown_minutes.min(MAX_WINDOW_MINUTES);
        self.restore_window_minutes = self.restore_window_minutes.min(MAX_WINDOW_MINUTES);
        self.debounce_ms = self.debounce_ms.min(MAX_DEBOUNCE_MS);
        self.low_priority_factor = self.low_priority_factor.clamp(1, MAX_LOW_PRIORITY_FACTOR);
        if self.default_category.trim().is_empty() {
            self.default_category = default_category();
        }
        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
    }
}
