pub mod dictionary;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use dictionary::StaticCatalog;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyTier {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl DifficultyTier {
    pub fn as_str(self) -> &'static str {
        match self {
            DifficultyTier::Easy => "easy",
            DifficultyTier::Medium => "medium",
            DifficultyTier::Hard => "hard",
        }
    }
}

impl fmt::Display for DifficultyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable catalog entry. Id `0` is reserved as "no word".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordItem {
    pub id: u32,
    pub text: String,
    pub category: String,
    pub difficulty: DifficultyTier,
}

/// Read-only word source. The scheduler never mutates it.
pub trait WordCatalog: Send + Sync {
    fn words_by_category(&self, category: &str) -> Vec<WordItem>;

    fn categories(&self) -> Vec<String>;

    fn all_words(&self) -> Vec<WordItem>;

    fn word(&self, id: u32) -> Option<WordItem> {
        self.all_words().into_iter().find(|w| w.id == id)
    }
}
