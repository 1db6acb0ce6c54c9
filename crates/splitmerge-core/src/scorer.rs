//! # Tree Scorer
//!
//! Inside and outside passes over a fixed tree. Only the latent substates
//! are marginalized; the tree's shape and categories are given, so a pass
//! is linear in the number of nodes.

use crate::annotated::{AnnotatedTree, LOG_SCALE};
use crate::error::{GrammarError, Result};
use crate::grammar::{Grammar, RuleKey};
use crate::lexicon::Lexicon;

/// Fills the score vectors of annotated trees under one grammar/lexicon pair.
///
/// The scorer only ever borrows the model immutably.
#[derive(Debug, Clone, Copy)]
pub struct TreeScorer<'a> {
    grammar: &'a Grammar,
    lexicon: &'a Lexicon,
}

impl<'a> TreeScorer<'a> {
    pub fn new(grammar: &'a Grammar, lexicon: &'a Lexicon) -> Self {
        Self { grammar, lexicon }
    }

    /// Compute inside scores bottom-up.
    pub fn score_inside(&self, tree: &mut AnnotatedTree) -> Result<()> {
        self.check_dimensions(tree)?;
        let positions = word_positions(tree);
        for index in (0..tree.nodes().len()).rev() {
            let (values, scale) = {
                let nodes = tree.nodes();
                let node = &nodes[index];
                match node.children.as_slice() {
                    [] => {
                        let word = node.word.as_deref().ok_or_else(|| {
                            GrammarError::MalformedTree("leaf node without a word".into())
                        })?;
                        (self.lexicon.score(word, node.state, positions[index]), 0)
                    }
                    [c] => {
                        let child = &nodes[*c];
                        let key = RuleKey::Unary {
                            parent: node.state,
                            child: child.state,
                        };
                        let mut values = vec![0.0; node.substates()];
                        if let Some(rule) = self.grammar.rule(&key) {
                            for (i, v) in values.iter_mut().enumerate() {
                                *v = child
                                    .inside
                                    .iter()
                                    .enumerate()
                                    .map(|(j, ic)| rule.get(i, j, 0) * ic)
                                    .sum();
                            }
                        }
                        (values, child.inside_scale)
                    }
                    [l, r] => {
                        let (left, right) = (&nodes[*l], &nodes[*r]);
                        let key = RuleKey::Binary {
                            parent: node.state,
                            left: left.state,
                            right: right.state,
                        };
                        let mut values = vec![0.0; node.substates()];
                        if let Some(rule) = self.grammar.rule(&key) {
                            for (i, v) in values.iter_mut().enumerate() {
                                let mut sum = 0.0;
                                for (j, il) in left.inside.iter().enumerate() {
                                    if *il == 0.0 {
                                        continue;
                                    }
                                    for (k, ir) in right.inside.iter().enumerate() {
                                        sum += rule.get(i, j, k) * il * ir;
                                    }
                                }
                                *v = sum;
                            }
                        }
                        (values, left.inside_scale + right.inside_scale)
                    }
                    _ => {
                        return Err(GrammarError::MalformedTree(
                            "node with more than two children".into(),
                        ));
                    }
                }
            };
            let node = &mut tree.nodes_mut()[index];
            node.inside = values;
            node.inside_scale = scale;
            rescale(&mut node.inside, &mut node.inside_scale);
        }
        Ok(())
    }

    /// Compute inside scores, then outside scores top-down.
    pub fn score_inside_outside(&self, tree: &mut AnnotatedTree) -> Result<()> {
        self.score_inside(tree)?;
        {
            let root = &mut tree.nodes_mut()[0];
            root.outside.iter_mut().for_each(|o| *o = 1.0);
            root.outside_scale = 0;
        }
        for index in 0..tree.nodes().len() {
            let updates: Vec<(usize, Vec<f64>, i32)> = {
                let nodes = tree.nodes();
                let node = &nodes[index];
                match node.children.as_slice() {
                    [c] => {
                        let child = &nodes[*c];
                        let key = RuleKey::Unary {
                            parent: node.state,
                            child: child.state,
                        };
                        let mut values = vec![0.0; child.substates()];
                        if let Some(rule) = self.grammar.rule(&key) {
                            for (i, op) in node.outside.iter().enumerate() {
                                if *op == 0.0 {
                                    continue;
                                }
                                for (j, v) in values.iter_mut().enumerate() {
                                    *v += op * rule.get(i, j, 0);
                                }
                            }
                        }
                        vec![(*c, values, node.outside_scale)]
                    }
                    [l, r] => {
                        let (left, right) = (&nodes[*l], &nodes[*r]);
                        let key = RuleKey::Binary {
                            parent: node.state,
                            left: left.state,
                            right: right.state,
                        };
                        let mut left_out = vec![0.0; left.substates()];
                        let mut right_out = vec![0.0; right.substates()];
                        if let Some(rule) = self.grammar.rule(&key) {
                            for (i, op) in node.outside.iter().enumerate() {
                                if *op == 0.0 {
                                    continue;
                                }
                                for (j, il) in left.inside.iter().enumerate() {
                                    for (k, ir) in right.inside.iter().enumerate() {
                                        let p = op * rule.get(i, j, k);
                                        left_out[j] += p * ir;
                                        right_out[k] += p * il;
                                    }
                                }
                            }
                        }
                        vec![
                            (*l, left_out, node.outside_scale + right.inside_scale),
                            (*r, right_out, node.outside_scale + left.inside_scale),
                        ]
                    }
                    _ => Vec::new(),
                }
            };
            for (child, values, scale) in updates {
                let node = &mut tree.nodes_mut()[child];
                node.outside = values;
                node.outside_scale = scale;
                rescale(&mut node.outside, &mut node.outside_scale);
            }
        }
        Ok(())
    }

    fn check_dimensions(&self, tree: &AnnotatedTree) -> Result<()> {
        for node in tree.nodes() {
            let model = self.grammar.substates().get(node.state).copied().unwrap_or(0);
            if node.substates() != model {
                return Err(GrammarError::SubstateMismatch {
                    state: node.state,
                    tree: node.substates(),
                    model,
                });
            }
        }
        Ok(())
    }
}

fn word_positions(tree: &AnnotatedTree) -> Vec<usize> {
    let mut position = 0;
    tree.nodes()
        .iter()
        .map(|n| {
            let p = position;
            if n.is_preterminal() {
                position += 1;
            }
            p
        })
        .collect()
}

/// Keep the largest entry of `values` within `[e^-LOG_SCALE, e^LOG_SCALE]`,
/// moving the difference into `scale`.
fn rescale(values: &mut [f64], scale: &mut i32) {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max == 0.0 || !max.is_finite() {
        return;
    }
    let steps = (max.ln() / LOG_SCALE).trunc() as i32;
    if steps == 0 {
        return;
    }
    let factor = (-f64::from(steps) * LOG_SCALE).exp();
    values.iter_mut().for_each(|v| *v *= factor);
    *scale += steps;
}

#[cfg(test)]
mod tests {
    use oorandom::Rand64;

    use super::*;
    use crate::annotated::TreeSet;
    use crate::grammar::GrammarAccumulator;
    use crate::lexicon::{LexiconAccumulator, LexiconParams};
    use crate::tree::read_trees;
    use crate::vocabulary::CategoryVocabulary;

    fn model(n: usize, randomness: f64) -> (Grammar, Lexicon, TreeSet) {
        let raw = read_trees(
            "(ROOT (S (NP (DT the) (NN dog)) (VP (VBZ barks)))) \
             (ROOT (S (NP (DT a) (NN cat)) (VP (VBZ sleeps))))",
            "ROOT",
        )
        .unwrap();
        let mut vocab = CategoryVocabulary::default();
        for t in &raw {
            t.for_each_category(&mut |l| {
                vocab.intern(l);
            });
        }
        let mut substates = vec![n; vocab.len()];
        substates[0] = 1;
        let trees = TreeSet::build(raw, &substates, &vocab).unwrap();
        let mut rng = Rand64::new(11);
        let mut grammar = GrammarAccumulator::new(&substates, 0, 0.0);
        let mut lexicon = LexiconAccumulator::new(&substates, 0, LexiconParams::default());
        for tree in &trees {
            grammar.tally_uninitialized(tree);
            lexicon.tally_initial(tree, randomness, None, false, 20.0, &mut rng);
        }
        (
            grammar.optimize(randomness, &mut rng),
            lexicon.optimize(),
            trees,
        )
    }

    #[test]
    fn inside_likelihood_is_finite_and_negative() {
        let (grammar, lexicon, mut trees) = model(2, 1.0);
        let scorer = TreeScorer::new(&grammar, &lexicon);
        for tree in trees.iter_mut() {
            scorer.score_inside(tree).unwrap();
            let ll = tree.log_likelihood();
            assert!(ll.is_finite());
            assert!(ll < 0.0);
        }
    }

    #[test]
    fn posteriors_sum_to_one_at_every_node() {
        let (grammar, lexicon, mut trees) = model(2, 5.0);
        let scorer = TreeScorer::new(&grammar, &lexicon);
        for tree in trees.iter_mut() {
            scorer.score_inside_outside(tree).unwrap();
            for index in 0..tree.nodes().len() {
                let total: f64 = tree.posterior(index).iter().sum();
                assert!((total - 1.0).abs() < 1e-9, "node {index}: {total}");
            }
        }
    }

    #[test]
    fn mismatched_substates_are_rejected() {
        let (grammar, lexicon, trees) = model(1, 0.0);
        let mut wider = trees.rebuild(&[1, 2, 2, 2, 2, 2, 2]);
        let scorer = TreeScorer::new(&grammar, &lexicon);
        let tree = wider.iter_mut().next().unwrap();
        assert!(matches!(
            scorer.score_inside(tree),
            Err(GrammarError::SubstateMismatch { .. })
        ));
    }

    #[test]
    fn rescale_moves_magnitude_into_exponent() {
        let mut values = vec![(250.0_f64).exp(), 1.0];
        let mut scale = 0;
        rescale(&mut values, &mut scale);
        assert_eq!(scale, 2);
        assert!((values[0].ln() - 50.0).abs() < 1e-9);

        let mut tiny = vec![(-150.0_f64).exp()];
        let mut scale = 0;
        rescale(&mut tiny, &mut scale);
        assert_eq!(scale, -1);
        assert!((tiny[0].ln() + 50.0).abs() < 1e-9);
    }
}
