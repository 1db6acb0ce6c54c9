//! # EM Step
//!
//! The expectation half of an EM iteration: score every training tree with
//! inside-outside under the previous model and pour the expected counts
//! into fresh accumulators. Turning the accumulators into a model is a
//! separate `optimize` call.

use anyhow::Result;
use oorandom::Rand64;
use splitmerge_core::{
    Grammar, GrammarAccumulator, Lexicon, LexiconAccumulator, TreeScorer, TreeSet,
    is_second_half,
};
use tracing::debug;

/// Summary of one E-step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EStepOutcome {
    /// Training log-likelihood of the previous model over the finite trees.
    pub log_likelihood: f64,
    pub scored: usize,
    pub unparsable: usize,
}

/// Runs E-steps over a training tree set.
#[derive(Debug, Clone, Copy)]
pub struct EmStepEngine {
    rare_threshold: f64,
}

impl EmStepEngine {
    /// `rare_threshold`: words seen fewer times feed the unknown-word model.
    pub fn new(rare_threshold: f64) -> Self {
        Self { rare_threshold }
    }

    /// Accumulate expected counts of `trees` under `grammar`/`lexicon`.
    ///
    /// With `grammar_acc` set to `None` only the lexicon is accumulated.
    pub fn do_one_e_step(
        &self,
        grammar: &Grammar,
        lexicon: &Lexicon,
        mut grammar_acc: Option<&mut GrammarAccumulator>,
        lexicon_acc: &mut LexiconAccumulator,
        trees: &mut TreeSet,
    ) -> Result<EStepOutcome> {
        let scorer = TreeScorer::new(grammar, lexicon);
        let len = trees.len();
        let mut outcome = EStepOutcome::default();
        for (index, tree) in trees.iter_mut().enumerate() {
            scorer.score_inside_outside(tree)?;
            let ll = tree.log_likelihood();
            if !ll.is_finite() {
                debug!(
                    tree = index,
                    likelihood = ll,
                    root_scale = tree.root().inside_scale,
                    "training tree is unparsable under the previous model"
                );
                outcome.unparsable += 1;
                continue;
            }
            lexicon_acc.tally_tree(tree, is_second_half(index, len), self.rare_threshold);
            if let Some(acc) = grammar_acc.as_deref_mut() {
                acc.tally_tree(tree, grammar);
            }
            outcome.log_likelihood += ll;
            outcome.scored += 1;
        }
        lexicon_acc.tie_rare_word_stats(self.rare_threshold);
        Ok(outcome)
    }

    /// A full EM iteration: E-step from `grammar`/`lexicon`, then M-step.
    pub fn em_iteration(
        &self,
        grammar: &Grammar,
        lexicon: &Lexicon,
        trees: &mut TreeSet,
        rng: &mut Rand64,
    ) -> Result<(Grammar, Lexicon, EStepOutcome)> {
        let mut grammar_acc = GrammarAccumulator::wrap(grammar);
        let mut lexicon_acc = LexiconAccumulator::wrap(lexicon);
        let outcome =
            self.do_one_e_step(grammar, lexicon, Some(&mut grammar_acc), &mut lexicon_acc, trees)?;
        Ok((grammar_acc.optimize(0.0, rng), lexicon_acc.optimize(), outcome))
    }

    /// Re-estimate only the lexicon of a model, keeping its grammar.
    pub fn retrain_lexicon(
        &self,
        grammar: &Grammar,
        lexicon: &Lexicon,
        trees: &mut TreeSet,
    ) -> Result<(Lexicon, EStepOutcome)> {
        let mut lexicon_acc = LexiconAccumulator::wrap(lexicon);
        let outcome = self.do_one_e_step(grammar, lexicon, None, &mut lexicon_acc, trees)?;
        Ok((lexicon_acc.optimize(), outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::LikelihoodEvaluator;
    use crate::test_support::{small_model, small_trees};

    #[test]
    fn training_likelihood_matches_evaluator() {
        let (grammar, lexicon, mut trees) = small_model(2);
        let engine = EmStepEngine::new(20.0);
        let mut grammar_acc = GrammarAccumulator::wrap(&grammar);
        let mut lexicon_acc = LexiconAccumulator::wrap(&lexicon);
        let outcome = engine
            .do_one_e_step(
                &grammar,
                &lexicon,
                Some(&mut grammar_acc),
                &mut lexicon_acc,
                &mut trees,
            )
            .unwrap();
        let evaluation = LikelihoodEvaluator::new(&grammar, &lexicon)
            .evaluate(&mut trees)
            .unwrap();
        assert_eq!(outcome.scored, evaluation.scored);
        assert!((outcome.log_likelihood - evaluation.log_likelihood).abs() < 1e-9);
    }

    #[test]
    fn em_iteration_keeps_substates() {
        let (grammar, lexicon, mut trees) = small_model(2);
        let engine = EmStepEngine::new(20.0);
        let mut rng = Rand64::new(1);
        let (g1, l1, outcome) = engine
            .em_iteration(&grammar, &lexicon, &mut trees, &mut rng)
            .unwrap();
        assert_eq!(g1.substates(), grammar.substates());
        assert_eq!(l1.substates(), lexicon.substates());
        assert_eq!(outcome.unparsable, 0);
        let after = LikelihoodEvaluator::new(&g1, &l1).evaluate(&mut trees).unwrap();
        assert_eq!(after.scored, trees.len());
        assert!(after.log_likelihood.is_finite());
    }

    #[test]
    fn lexicon_only_step_keeps_grammar() {
        let (grammar, lexicon, mut trees) = small_model(2);
        let engine = EmStepEngine::new(20.0);
        let (retrained, outcome) = engine
            .retrain_lexicon(&grammar, &lexicon, &mut trees)
            .unwrap();
        assert_eq!(outcome.scored, trees.len());
        assert_eq!(retrained.substates(), lexicon.substates());
        assert_eq!(retrained.total_tokens(), lexicon.total_tokens());
    }

    #[test]
    fn unparsable_trees_are_counted_and_skipped() {
        let (grammar, lexicon, _) = small_model(1);
        let parsable = "(ROOT (S (NP (DT the) (NN dog)) (VP (VBZ barks))))";
        // "VP -> NP" never occurs in training
        let odd = "(ROOT (S (NP (DT a) (NN cat)) (VP (NP (NN cat)))))";
        let mut trees = small_trees(&format!("{parsable} {odd}"), grammar.substates());
        let mut alone = small_trees(parsable, grammar.substates());
        let expected = LikelihoodEvaluator::new(&grammar, &lexicon)
            .evaluate(&mut alone)
            .unwrap();

        let engine = EmStepEngine::new(20.0);
        let mut grammar_acc = GrammarAccumulator::wrap(&grammar);
        let mut lexicon_acc = LexiconAccumulator::wrap(&lexicon);
        let outcome = engine
            .do_one_e_step(
                &grammar,
                &lexicon,
                Some(&mut grammar_acc),
                &mut lexicon_acc,
                &mut trees,
            )
            .unwrap();

        assert_eq!(outcome.scored, 1);
        assert_eq!(outcome.unparsable, 1);
        assert!((outcome.log_likelihood - expected.log_likelihood).abs() < 1e-9);
        assert!(outcome.log_likelihood.is_finite());
        let retrained = lexicon_acc.optimize();
        assert_eq!(retrained.total_tokens(), 3.0);
        assert!(retrained.is_known("barks"));
        assert!(!retrained.is_known("a"));
    }
}
