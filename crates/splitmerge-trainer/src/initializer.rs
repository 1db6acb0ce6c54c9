//! # Substate Initialization
//!
//! Builds the category vocabulary, the starting substate-count vector and
//! the maximum-likelihood starting model.

use oorandom::Rand64;
use splitmerge_core::{
    CategoryVocabulary, Grammar, GrammarAccumulator, Lexicon, LexiconAccumulator, LexiconParams,
    Tree, TreeSet, is_second_half,
};
use tracing::info;

/// Assigns the initial number of latent substates per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstateInitializer {
    initial: usize,
    baseline: bool,
}

impl SubstateInitializer {
    /// `initial` substates for every category; in `baseline` mode every
    /// category gets one regardless.
    pub fn new(initial: usize, baseline: bool) -> Self {
        Self { initial, baseline }
    }

    /// Register every category of `train` and `validation` in `vocab`,
    /// preterminal tags first. Validation trees only contribute categories.
    pub fn register_categories(
        &self,
        vocab: &mut CategoryVocabulary,
        train: &[Tree],
        validation: &[Tree],
    ) {
        let trees = || train.iter().chain(validation);
        for tree in trees() {
            for_each_preterminal(tree, &mut |label| {
                vocab.intern(label);
            });
        }
        for tree in trees() {
            tree.for_each_category(&mut |label| {
                vocab.intern(label);
            });
        }
    }

    /// Substate counts for the categories in `vocab`: the root gets 1,
    /// wherever it sits, and everything else the initial count.
    pub fn substates(&self, vocab: &CategoryVocabulary) -> Vec<usize> {
        let count = if self.baseline { 1 } else { self.initial };
        let root = vocab.root();
        let substates: Vec<usize> = (0..vocab.len())
            .map(|state| if Some(state) == root { 1 } else { count })
            .collect();
        info!(categories = substates.len(), baseline = self.baseline, "initialized substates");
        substates
    }

    /// [`Self::register_categories`] followed by [`Self::substates`].
    pub fn initialize(
        &self,
        vocab: &mut CategoryVocabulary,
        train: &[Tree],
        validation: &[Tree],
    ) -> Vec<usize> {
        self.register_categories(vocab, train, validation);
        self.substates(vocab)
    }
}

fn for_each_preterminal<F: FnMut(&str)>(tree: &Tree, f: &mut F) {
    if tree.is_preterminal() {
        f(&tree.label);
        return;
    }
    for child in &tree.children {
        for_each_preterminal(child, f);
    }
}

/// Settings of the maximum-likelihood starting model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialModelSettings {
    pub root: usize,
    pub lexicon: LexiconParams,
    /// Rule pruning threshold.
    pub filter: f64,
    /// Percent of noise on substate weights and rule counts.
    pub randomness: f64,
    pub rare_threshold: f64,
}

/// Estimate the starting grammar and lexicon from `trees`.
///
/// A throwaway lexicon trained on randomized uniform substate weights
/// provides the substate weights of the real lexicon; the grammar counts
/// every rule once in every substate combination. Only the scratch pass
/// restricts unknown-word statistics to the second half of the corpus.
/// Rare word statistics are tied before both are normalized, the grammar
/// with `randomness` percent of noise.
pub fn initial_model(
    trees: &TreeSet,
    settings: &InitialModelSettings,
    rng: &mut Rand64,
) -> (Grammar, Lexicon) {
    let substates = trees.substates();
    let len = trees.len();

    let mut scratch = LexiconAccumulator::new(substates, settings.root, settings.lexicon);
    for (index, tree) in trees.iter().enumerate() {
        scratch.tally_initial(
            tree,
            settings.randomness,
            None,
            is_second_half(index, len),
            settings.rare_threshold,
            rng,
        );
    }
    let scratch = scratch.optimize();

    // unknown-word statistics of the real lexicon cover every tree
    let mut lexicon = LexiconAccumulator::new(substates, settings.root, settings.lexicon);
    let mut grammar = GrammarAccumulator::new(substates, settings.root, settings.filter);
    for tree in trees {
        lexicon.tally_initial(
            tree,
            settings.randomness,
            Some(&scratch),
            true,
            settings.rare_threshold,
            rng,
        );
        grammar.tally_uninitialized(tree);
    }
    lexicon.tie_rare_word_stats(settings.rare_threshold);
    let lexicon = lexicon.optimize();
    let grammar = grammar.optimize(settings.randomness, rng);
    info!(
        rules = grammar.num_rules(),
        substates = grammar.total_substates(),
        "estimated starting model"
    );
    (grammar, lexicon)
}
