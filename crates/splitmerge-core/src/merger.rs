//! # Merge Advisor
//!
//! Decides which split substates to collapse again. Every pair of sibling
//! substates is a candidate; for each, the loss in training likelihood that
//! merging it would cause is approximated node by node, and the pairs that
//! cost least are merged.

use crate::annotated::TreeSet;
use crate::error::Result;
use crate::grammar::Grammar;
use crate::lexicon::Lexicon;
use crate::scorer::TreeScorer;

/// A candidate merge of two sibling substates of one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeCandidate {
    pub state: usize,
    pub pair: (usize, usize),
    /// Approximate change in training log-likelihood from merging the pair.
    /// Larger is a cheaper merge.
    pub delta: f64,
}

/// Merge weights, loss estimates and merge application for one model.
#[derive(Debug, Clone, Copy)]
pub struct GrammarMerger<'a> {
    grammar: &'a Grammar,
    lexicon: &'a Lexicon,
}

impl<'a> GrammarMerger<'a> {
    pub fn new(grammar: &'a Grammar, lexicon: &'a Lexicon) -> Self {
        Self { grammar, lexicon }
    }

    /// Expected number of visits to each substate over `trees`.
    pub fn compute_merge_weights(&self, trees: &mut TreeSet) -> Result<Vec<Vec<f64>>> {
        let scorer = TreeScorer::new(self.grammar, self.lexicon);
        let mut weights: Vec<Vec<f64>> = self
            .grammar
            .substates()
            .iter()
            .map(|&n| vec![0.0; n])
            .collect();
        for tree in trees.iter_mut() {
            scorer.score_inside_outside(tree)?;
            if !tree.log_likelihood().is_finite() {
                continue;
            }
            for index in 0..tree.nodes().len() {
                let state = tree.nodes()[index].state;
                for (w, p) in weights[state].iter_mut().zip(tree.posterior(index)) {
                    *w += p;
                }
            }
        }
        Ok(weights)
    }

    /// Estimated likelihood change of merging each sibling pair.
    ///
    /// At every node the pair's substates are replaced by their
    /// weight-averaged inside score and summed outside score while every
    /// other substate keeps its scores; the log-ratio of the node's total
    /// to its original total is summed over the corpus.
    pub fn compute_deltas(
        &self,
        trees: &mut TreeSet,
        weights: &[Vec<f64>],
    ) -> Result<Vec<MergeCandidate>> {
        let root = self.grammar.root();
        let mut candidates: Vec<MergeCandidate> = self
            .grammar
            .lineage()
            .iter()
            .enumerate()
            .filter(|(state, _)| *state != root)
            .flat_map(|(state, lineage)| {
                lineage.sibling_pairs().into_iter().map(move |pair| MergeCandidate {
                    state,
                    pair,
                    delta: 0.0,
                })
            })
            .collect();
        let mut by_state: Vec<Vec<usize>> = vec![Vec::new(); self.grammar.num_states()];
        for (i, c) in candidates.iter().enumerate() {
            by_state[c.state].push(i);
        }

        let scorer = TreeScorer::new(self.grammar, self.lexicon);
        for tree in trees.iter_mut() {
            scorer.score_inside_outside(tree)?;
            if !tree.log_likelihood().is_finite() {
                continue;
            }
            for node in tree.nodes() {
                let io: Vec<f64> = node
                    .inside
                    .iter()
                    .zip(&node.outside)
                    .map(|(i, o)| i * o)
                    .collect();
                let total: f64 = io.iter().sum();
                if total <= 0.0 {
                    continue;
                }
                for &c in &by_state[node.state] {
                    let (a, b) = candidates[c].pair;
                    let (wa, wb) = (weights[node.state][a], weights[node.state][b]);
                    let (pa, pb) = if wa + wb > 0.0 {
                        (wa / (wa + wb), wb / (wa + wb))
                    } else {
                        (0.5, 0.5)
                    };
                    let merged_inside = pa * node.inside[a] + pb * node.inside[b];
                    let merged_outside = node.outside[a] + node.outside[b];
                    let merged = total - io[a] - io[b] + merged_inside * merged_outside;
                    if merged > 0.0 {
                        candidates[c].delta += (merged / total).ln();
                    }
                }
            }
        }
        Ok(candidates)
    }

    /// Keep the `percentage` of candidates with the smallest loss. With
    /// `separate` set, lexical and phrasal categories are budgeted
    /// separately; `lexical[state]` tells them apart.
    pub fn determine_merge_pairs(
        candidates: &[MergeCandidate],
        separate: bool,
        percentage: f64,
        lexical: &[bool],
    ) -> Vec<MergeCandidate> {
        if !separate {
            return select_cheapest(candidates.to_vec(), percentage);
        }
        let (lex, phrasal): (Vec<_>, Vec<_>) = candidates
            .iter()
            .copied()
            .partition(|c| lexical.get(c.state).copied().unwrap_or(false));
        let mut selected = select_cheapest(lex, percentage);
        selected.extend(select_cheapest(phrasal, percentage));
        selected
    }

    /// Merge the selected pairs in both grammar and lexicon.
    pub fn apply_merges(
        &self,
        selections: &[MergeCandidate],
        weights: &[Vec<f64>],
    ) -> (Grammar, Lexicon) {
        let mappings = merge_mappings(self.grammar.substates(), selections);
        log_merge_statistics(self.grammar.substates(), &mappings);
        (
            self.grammar.merge_states(&mappings, weights),
            self.lexicon.merge_states(&mappings),
        )
    }
}

fn select_cheapest(mut candidates: Vec<MergeCandidate>, percentage: f64) -> Vec<MergeCandidate> {
    let keep = (candidates.len() as f64 * percentage.clamp(0.0, 1.0)).floor() as usize;
    candidates.sort_by(|a, b| b.delta.total_cmp(&a.delta));
    candidates.truncate(keep);
    candidates
}

/// `mappings[state][old]` = new substate index after merging `selections`.
pub fn merge_mappings(substates: &[usize], selections: &[MergeCandidate]) -> Vec<Vec<usize>> {
    substates
        .iter()
        .enumerate()
        .map(|(state, &n)| {
            let mut target: Vec<usize> = (0..n).collect();
            for c in selections.iter().filter(|c| c.state == state) {
                let (a, b) = c.pair;
                target[a.max(b)] = a.min(b);
            }
            let mut mapping = vec![0; n];
            let mut next = 0;
            for s in 0..n {
                if target[s] == s {
                    mapping[s] = next;
                    next += 1;
                } else {
                    mapping[s] = mapping[target[s]];
                }
            }
            mapping
        })
        .collect()
}

fn log_merge_statistics(substates: &[usize], mappings: &[Vec<usize>]) {
    let mut removed_total = 0;
    for (state, (&before, mapping)) in substates.iter().zip(mappings).enumerate() {
        let after = mapping.iter().max().map_or(0, |&x| x + 1);
        if after < before {
            tracing::debug!(state, before, after, "merged substates");
            removed_total += before - after;
        }
    }
    tracing::info!(
        removed = removed_total,
        before = substates.iter().sum::<usize>(),
        "merge statistics"
    );
}

#[cfg(test)]
mod tests {
    use oorandom::Rand64;

    use super::*;
    use crate::grammar::GrammarAccumulator;
    use crate::lexicon::{LexiconAccumulator, LexiconParams};
    use crate::tree::read_trees;
    use crate::vocabulary::CategoryVocabulary;

    fn split_model() -> (Grammar, Lexicon, TreeSet) {
        let raw = read_trees(
            "(ROOT (S (NP (DT the) (NN dog)) (VP (VBZ barks)))) \
             (ROOT (S (NP (DT a) (NN cat)) (VP (VBZ sleeps)))) \
             (ROOT (S (NP (DT the) (NN cat)) (VP (VBZ barks)))) \
             (ROOT (S (NP (DT a) (NN dog)) (VP (VBZ sleeps))))",
            "ROOT",
        )
        .unwrap();
        let mut vocab = CategoryVocabulary::default();
        for t in &raw {
            t.for_each_category(&mut |l| {
                vocab.intern(l);
            });
        }
        let substates = vec![1; vocab.len()];
        let trees = TreeSet::build(raw, &substates, &vocab).unwrap();
        let mut rng = Rand64::new(4);
        let mut grammar = GrammarAccumulator::new(&substates, 0, 0.0);
        let mut lexicon = LexiconAccumulator::new(&substates, 0, LexiconParams::default());
        for tree in &trees {
            grammar.tally_uninitialized(tree);
            lexicon.tally_initial(tree, 0.0, None, false, 20.0, &mut rng);
        }
        let grammar = grammar.optimize(0.0, &mut rng);
        let lexicon = lexicon.optimize();
        let counts = trees.symbol_counts(grammar.num_states());
        let grammar = grammar.split_all_states(10.0, &counts, false, &mut rng);
        let lexicon = lexicon.split_all_states(10.0, &counts, false, &mut rng);
        let trees = trees.rebuild(grammar.substates());
        (grammar, lexicon, trees)
    }

    #[test]
    fn mappings_collapse_selected_pairs() {
        let sel = [MergeCandidate {
            state: 1,
            pair: (2, 3),
            delta: -0.1,
        }];
        let m = merge_mappings(&[1, 4], &sel);
        assert_eq!(m[0], vec![0]);
        assert_eq!(m[1], vec![0, 1, 2, 2]);
    }

    #[test]
    fn weights_cover_every_substate() {
        let (grammar, lexicon, mut trees) = split_model();
        let merger = GrammarMerger::new(&grammar, &lexicon);
        let weights = merger.compute_merge_weights(&mut trees).unwrap();
        // each tree visits the root once
        assert!((weights[0][0] - 4.0).abs() < 1e-9);
        for (state, w) in weights.iter().enumerate() {
            assert_eq!(w.len(), grammar.substates()[state]);
        }
    }

    #[test]
    fn deltas_cover_sibling_pairs_outside_root() {
        let (grammar, lexicon, mut trees) = split_model();
        let merger = GrammarMerger::new(&grammar, &lexicon);
        let weights = merger.compute_merge_weights(&mut trees).unwrap();
        let deltas = merger.compute_deltas(&mut trees, &weights).unwrap();
        assert!(!deltas.is_empty());
        assert!(deltas.iter().all(|c| c.state != grammar.root()));
        assert!(deltas.iter().all(|c| c.delta.is_finite()));
        assert!(deltas.iter().all(|c| c.pair.0 + 1 == c.pair.1));
    }

    #[test]
    fn selection_keeps_cheapest_share() {
        let c = |state, delta| MergeCandidate {
            state,
            pair: (0, 1),
            delta,
        };
        let all = [c(1, -5.0), c(2, -0.1), c(3, -1.0), c(4, -0.2)];
        let picked = GrammarMerger::determine_merge_pairs(&all, false, 0.5, &[]);
        let states: Vec<_> = picked.iter().map(|c| c.state).collect();
        assert_eq!(states, vec![2, 4]);

        let lexical = [false, true, true, false, false];
        let picked = GrammarMerger::determine_merge_pairs(&all, true, 0.5, &lexical);
        let states: Vec<_> = picked.iter().map(|c| c.state).collect();
        assert_eq!(states, vec![2, 4]);

        assert!(GrammarMerger::determine_merge_pairs(&all, false, 0.0, &[]).is_empty());
    }

    #[test]
    fn applying_merges_shrinks_by_accepted_pairs() {
        let (grammar, lexicon, mut trees) = split_model();
        let merger = GrammarMerger::new(&grammar, &lexicon);
        let weights = merger.compute_merge_weights(&mut trees).unwrap();
        let deltas = merger.compute_deltas(&mut trees, &weights).unwrap();
        let lexical = trees.lexical_states(grammar.num_states());
        let selected = GrammarMerger::determine_merge_pairs(&deltas, false, 0.5, &lexical);
        let (merged, merged_lex) = merger.apply_merges(&selected, &weights);
        for state in 0..grammar.num_states() {
            let accepted = selected.iter().filter(|c| c.state == state).count();
            assert_eq!(merged.substates()[state], grammar.substates()[state] - accepted);
        }
        assert_eq!(merged.substates()[0], 1);
        assert_eq!(merged_lex.substates(), merged.substates());
    }
}
