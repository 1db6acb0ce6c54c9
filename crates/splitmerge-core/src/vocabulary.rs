//! # Category Vocabulary
//!
//! Maps treebank category labels to dense ids. The vocabulary is an explicit
//! object handed to everything that needs category ids; a checkpoint carries
//! a copy and [`CategoryVocabulary::restore`] reinstates it on load.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{GrammarError, Result};

/// Label given to the outermost node of every tree.
pub const DEFAULT_ROOT_LABEL: &str = "ROOT";

/// Dense, insertion-ordered table of category labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryVocabulary {
    labels: Vec<String>,
    root_label: String,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl CategoryVocabulary {
    /// Create an empty vocabulary whose root category is `root_label`.
    pub fn new(root_label: impl Into<String>) -> Self {
        Self {
            labels: Vec::new(),
            root_label: root_label.into(),
            index: HashMap::new(),
        }
    }

    /// Return the id of `label`, assigning the next free id if it is new.
    pub fn intern(&mut self, label: &str) -> usize {
        if let Some(&id) = self.index.get(label) {
            return id;
        }
        let id = self.labels.len();
        self.labels.push(label.to_string());
        self.index.insert(label.to_string(), id);
        id
    }

    /// Look up the id of an already known label.
    pub fn id(&self, label: &str) -> Result<usize> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| GrammarError::UnknownCategory(label.to_string()))
    }

    /// Label of category `id`, if any.
    pub fn label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    /// The root label, whether or not it has been interned yet.
    pub fn root_label(&self) -> &str {
        &self.root_label
    }

    /// Id of the root category once it has been seen.
    pub fn root(&self) -> Option<usize> {
        self.index.get(&self.root_label).copied()
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate `(id, label)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().enumerate().map(|(i, l)| (i, l.as_str()))
    }

    /// Replace this vocabulary wholesale with the table stored in a checkpoint.
    ///
    /// Must run before any tree is built against a reloaded model, since
    /// category ids are only meaningful relative to this table.
    pub fn restore(&mut self, stored: &CategoryVocabulary) {
        self.labels = stored.labels.clone();
        self.root_label = stored.root_label.clone();
        self.reindex();
    }

    /// Rebuild the label index after deserialization.
    pub(crate) fn reindex(&mut self) {
        self.index = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect();
    }
}

impl Default for CategoryVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_assigns_dense_ids_in_order() {
        let mut vocab = CategoryVocabulary::default();
        assert_eq!(vocab.intern("ROOT"), 0);
        assert_eq!(vocab.intern("NP"), 1);
        assert_eq!(vocab.intern("ROOT"), 0);
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.label(1), Some("NP"));
        assert_eq!(vocab.root(), Some(0));
    }

    #[test]
    fn unknown_label_is_an_error() {
        let vocab = CategoryVocabulary::default();
        assert!(matches!(
            vocab.id("VP"),
            Err(GrammarError::UnknownCategory(_))
        ));
    }

    #[test]
    fn restore_replaces_content_and_index() {
        let mut stored = CategoryVocabulary::default();
        stored.intern("ROOT");
        stored.intern("S");

        let mut vocab = CategoryVocabulary::new("TOP");
        vocab.intern("X");
        vocab.restore(&stored);

        assert_eq!(vocab.root_label(), "ROOT");
        assert_eq!(vocab.id("S").unwrap(), 1);
        assert!(vocab.id("X").is_err());
    }

    #[test]
    fn serde_round_trip_needs_reindex() {
        let mut vocab = CategoryVocabulary::default();
        vocab.intern("ROOT");
        vocab.intern("VP");
        let json = serde_json::to_string(&vocab).unwrap();
        let mut back: CategoryVocabulary = serde_json::from_str(&json).unwrap();
        back.reindex();
        assert_eq!(back, vocab);
        assert_eq!(back.id("VP").unwrap(), 1);
    }
}
