//! # Likelihood Evaluation
//!
//! Total log-likelihood of a tree set under a fixed model, from inside
//! scores only.

use anyhow::Result;
use splitmerge_core::{Grammar, Lexicon, TreeScorer, TreeSet};

/// Summary of one pass over a tree set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluation {
    /// Sum over the trees with a finite likelihood.
    pub log_likelihood: f64,
    pub scored: usize,
    /// Trees the model gives no mass to.
    pub unparsable: usize,
}

/// Scores tree sets against one model without modifying it.
#[derive(Debug, Clone, Copy)]
pub struct LikelihoodEvaluator<'a> {
    grammar: &'a Grammar,
    lexicon: &'a Lexicon,
}

impl<'a> LikelihoodEvaluator<'a> {
    pub fn new(grammar: &'a Grammar, lexicon: &'a Lexicon) -> Self {
        Self { grammar, lexicon }
    }

    /// Writes only to the trees' score storage; calling it twice gives the
    /// same result.
    pub fn evaluate(&self, trees: &mut TreeSet) -> Result<Evaluation> {
        let scorer = TreeScorer::new(self.grammar, self.lexicon);
        let mut evaluation = Evaluation::default();
        for tree in trees.iter_mut() {
            scorer.score_inside(tree)?;
            let ll = tree.log_likelihood();
            if ll.is_finite() {
                evaluation.log_likelihood += ll;
                evaluation.scored += 1;
            } else {
                evaluation.unparsable += 1;
            }
        }
        Ok(evaluation)
    }
}
