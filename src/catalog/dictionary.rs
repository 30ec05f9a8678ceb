use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::catalog::{WordCatalog, WordItem};

const CATALOG_EN: &str = include_str!("../../assets/catalog.json");

/// In-memory catalog. The bundled word list is compiled in; tests build their
/// own with [`StaticCatalog::from_words`].
pub struct StaticCatalog {
    words: Vec<WordItem>,
    by_id: HashMap<u32, usize>,
}

impl StaticCatalog {
    pub fn load() -> Self {
        let words: Vec<WordItem> = match serde_json::from_str(CATALOG_EN) {
            Ok(words) => words,
            Err(err) => {
                warn!(%err, "bundled catalog failed to parse, starting empty");
                Vec::new()
            }
        };
        Self::from_words(words)
    }

    /// Build a catalog, dropping reserved ids, blank words and duplicate ids
    /// (first occurrence wins).
    pub fn from_words(words: Vec<WordItem>) -> Self {
        let mut seen = HashSet::new();
        let words: Vec<WordItem> = words
            .into_iter()
            .filter(|w| w.id != 0 && !w.text.trim().is_empty() && seen.insert(w.id))
            .collect();
        let by_id = words.iter().enumerate().map(|(i, w)| (w.id, i)).collect();
        Self { words, by_id }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl WordCatalog for StaticCatalog {
    fn words_by_category(&self, category: &str) -> Vec<WordItem> {
        self.words
            .iter()
            .filter(|w| w.category == category)
            .cloned()
            .collect()
    }

    fn categories(&self) -> Vec<String> {
        let unique: BTreeSet<&str> = self.words.iter().map(|w| w.category.as_str()).collect();
        unique.into_iter().map(str::to_string).collect()
    }

    fn all_words(&self) -> Vec<WordItem> {
        self.words.clone()
    }

    fn word(&self, id: u32) -> Option<WordItem> {
        self.by_id.get(&id).map(|&i| self.words[i].clone())
    }
}
