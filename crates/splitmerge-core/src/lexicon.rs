//! # Lexicon
//!
//! Emission model from category substates to words. Like the grammar it has
//! an accumulating form ([`LexiconAccumulator`]) and a finalized form
//! ([`Lexicon`]). Words seen rarely are additionally counted under their
//! signature (a coarse shape class such as `UNK-CAP-ed`) so that unknown
//! words in held-out data still receive probability mass.

use std::collections::HashMap;
use std::sync::OnceLock;

use oorandom::Rand64;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::annotated::AnnotatedTree;
use crate::grammar::{perturb, split_factors};
use crate::smoothing::{Lineage, Smoother};

/// Words seen more often than this are scored from their own counts only.
pub const DEFAULT_SMOOTHING_CUTOFF: f64 = 10.0;

/// Which emission estimator to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LexiconKind {
    /// Tag-given-word estimates smoothed towards signature statistics
    /// gathered from rare words in the second half of the corpus.
    #[default]
    Sophisticated,
    /// Relative frequencies; rare training words are replaced by their
    /// signature before training.
    Simple,
}

/// Lexicon hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LexiconParams {
    pub kind: LexiconKind,
    /// Weight of the signature estimate for seen words (`sm1`).
    pub word_smoothing: f64,
    /// Weight of the tag prior for signatures (`sm2`).
    pub signature_smoothing: f64,
    pub smoothing_cutoff: f64,
    /// Emission scores below this are pruned to zero.
    pub threshold: f64,
}

impl Default for LexiconParams {
    fn default() -> Self {
        Self {
            kind: LexiconKind::Sophisticated,
            word_smoothing: 0.5,
            signature_smoothing: 0.1,
            smoothing_cutoff: DEFAULT_SMOOTHING_CUTOFF,
            threshold: 1.0e-30,
        }
    }
}

fn suffix_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(ing|ion|ed|er|est|ly|ity|al|y|s)$").ok())
        .as_ref()
}

/// Shape class of an unknown word.
pub fn signature(word: &str, position: usize) -> String {
    let mut sig = String::from("UNK");
    let mut chars = word.chars();
    let first_upper = chars.next().is_some_and(char::is_uppercase);
    let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
    if !letters.is_empty() && letters.iter().all(|c| c.is_uppercase()) {
        sig.push_str("-CAPS");
    } else if first_upper && position == 0 {
        sig.push_str("-INITC");
    } else if first_upper {
        sig.push_str("-CAP");
    } else if word.chars().any(char::is_uppercase) {
        sig.push_str("-LC");
    }
    if word.chars().any(|c| c.is_ascii_digit()) {
        sig.push_str("-NUM");
    }
    if word.contains('-') {
        sig.push_str("-DASH");
    }
    let lower = word.to_lowercase();
    if lower.chars().count() >= 3 {
        if let Some(m) = suffix_pattern().and_then(|p| p.find(&lower)) {
            sig.push('-');
            sig.push_str(m.as_str());
        }
    }
    sig
}

/// Sufficient statistics shared by both lexicon forms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct EmissionStats {
    tag_counts: Vec<Vec<f64>>,
    word_counts: Vec<HashMap<String, Vec<f64>>>,
    word_totals: HashMap<String, f64>,
    total_tokens: f64,
    unseen_tag_counts: Vec<Vec<f64>>,
    unseen_signature_counts: Vec<HashMap<String, Vec<f64>>>,
    unseen_signature_totals: HashMap<String, f64>,
    unseen_total: f64,
}

impl EmissionStats {
    fn empty(substates: &[usize]) -> Self {
        Self {
            tag_counts: substates.iter().map(|&n| vec![0.0; n]).collect(),
            word_counts: vec![HashMap::new(); substates.len()],
            unseen_tag_counts: substates.iter().map(|&n| vec![0.0; n]).collect(),
            unseen_signature_counts: vec![HashMap::new(); substates.len()],
            ..Default::default()
        }
    }

    /// Rebuild per-tag totals from the per-word counts.
    fn recompute_tag_totals(&mut self) {
        for (state, words) in self.word_counts.iter().enumerate() {
            let totals = &mut self.tag_counts[state];
            totals.iter_mut().for_each(|t| *t = 0.0);
            for counts in words.values() {
                for (t, c) in totals.iter_mut().zip(counts) {
                    *t += c;
                }
            }
        }
        for (state, sigs) in self.unseen_signature_counts.iter().enumerate() {
            let totals = &mut self.unseen_tag_counts[state];
            totals.iter_mut().for_each(|t| *t = 0.0);
            for counts in sigs.values() {
                for (t, c) in totals.iter_mut().zip(counts) {
                    *t += c;
                }
            }
        }
    }

    /// Apply `f(old_counts) -> new_counts` to every per-substate vector.
    fn remap<F>(&self, substates: &[usize], mut f: F) -> Self
    where
        F: FnMut(usize, &[f64]) -> Vec<f64>,
    {
        let mut out = Self::empty(substates);
        for (state, words) in self.word_counts.iter().enumerate() {
            for (word, counts) in words {
                out.word_counts[state].insert(word.clone(), f(state, counts));
            }
        }
        for (state, sigs) in self.unseen_signature_counts.iter().enumerate() {
            for (sig, counts) in sigs {
                out.unseen_signature_counts[state].insert(sig.clone(), f(state, counts));
            }
        }
        out.word_totals = self.word_totals.clone();
        out.total_tokens = self.total_tokens;
        out.unseen_signature_totals = self.unseen_signature_totals.clone();
        out.unseen_total = self.unseen_total;
        out.recompute_tag_totals();
        out
    }
}

/// A finalized lexicon, ready for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lexicon {
    substates: Vec<usize>,
    root: usize,
    params: LexiconParams,
    stats: EmissionStats,
    smoother: Smoother,
    lineage: Vec<Lineage>,
}

impl Lexicon {
    pub fn substates(&self) -> &[usize] {
        &self.substates
    }

    pub fn params(&self) -> &LexiconParams {
        &self.params
    }

    pub fn smoother(&self) -> Smoother {
        self.smoother
    }

    /// Install a smoother; it applies to every score computed from now on.
    pub fn set_smoother(&mut self, smoother: Smoother) {
        self.smoother = smoother;
    }

    pub fn lineage(&self) -> &[Lineage] {
        &self.lineage
    }

    /// Number of training tokens the lexicon was estimated from.
    pub fn total_tokens(&self) -> f64 {
        self.stats.total_tokens
    }

    /// Whether `word` occurred in training.
    pub fn is_known(&self, word: &str) -> bool {
        self.stats.word_totals.contains_key(word)
    }

    /// `P(word | state_s)` for every substate `s` of `state`.
    pub fn score(&self, word: &str, state: usize, position: usize) -> Vec<f64> {
        let n = self.substates[state];
        let mut scores = match self.params.kind {
            LexiconKind::Sophisticated => self.score_sophisticated(word, state, position),
            LexiconKind::Simple => self.score_simple(word, state, position),
        };
        debug_assert_eq!(scores.len(), n);
        self.smoother.smooth(&self.lineage[state], &mut scores);
        for s in &mut scores {
            if *s < self.params.threshold {
                *s = 0.0;
            }
        }
        scores
    }

    fn score_sophisticated(&self, word: &str, state: usize, position: usize) -> Vec<f64> {
        let stats = &self.stats;
        let n = self.substates[state];
        if stats.total_tokens <= 0.0 {
            return vec![0.0; n];
        }
        let sig = signature(word, position);
        let word_total = stats.word_totals.get(word).copied().unwrap_or(0.0);
        let sig_total = stats
            .unseen_signature_totals
            .get(&sig)
            .copied()
            .unwrap_or(0.0);
        let word_counts = stats.word_counts[state].get(word);
        let sig_counts = stats.unseen_signature_counts[state].get(&sig);
        let p_word = if word_total > 0.0 {
            word_total / stats.total_tokens
        } else {
            1.0 / (stats.total_tokens + 1.0)
        };
        let sm1 = self.params.word_smoothing;
        let sm2 = self.params.signature_smoothing;

        (0..n)
            .map(|s| {
                let p_tag = stats.tag_counts[state][s] / stats.total_tokens;
                if p_tag <= 0.0 {
                    return 0.0;
                }
                let p_tag_unseen = if stats.unseen_total > 0.0 {
                    stats.unseen_tag_counts[state][s] / stats.unseen_total
                } else {
                    p_tag
                };
                let c_sig = sig_counts.map_or(0.0, |c| c[s]);
                let p_tag_given_sig = (c_sig + sm2 * p_tag_unseen) / (sig_total + sm2);
                let c_word = word_counts.map_or(0.0, |c| c[s]);
                let p_tag_given_word = if word_total > self.params.smoothing_cutoff {
                    c_word / word_total
                } else if word_total > 0.0 {
                    (c_word + sm1 * p_tag_given_sig) / (word_total + sm1)
                } else {
                    p_tag_given_sig
                };
                p_tag_given_word * p_word / p_tag
            })
            .collect()
    }

    fn score_simple(&self, word: &str, state: usize, position: usize) -> Vec<f64> {
        let stats = &self.stats;
        let n = self.substates[state];
        let key = if stats.word_totals.contains_key(word) {
            word.to_string()
        } else {
            signature(word, position)
        };
        let types = stats.word_totals.len() as f64;
        let sm = self.params.word_smoothing;
        let counts = stats.word_counts[state].get(&key);
        (0..n)
            .map(|s| {
                let tag_total = stats.tag_counts[state][s];
                if tag_total <= 0.0 {
                    return 0.0;
                }
                let c = counts.map_or(0.0, |c| c[s]);
                (c + sm / (types + 1.0)) / (tag_total + sm)
            })
            .collect()
    }

    /// Double every substate but the root's, copying emission counts into
    /// both halves with `randomness` percent of noise. Uses the same split
    /// decisions as [`crate::grammar::Grammar::split_all_states`].
    pub fn split_all_states(
        &self,
        randomness: f64,
        counts: &[usize],
        allow_more_substates_than_counts: bool,
        rng: &mut Rand64,
    ) -> Lexicon {
        let factors = split_factors(
            &self.substates,
            self.root,
            counts,
            allow_more_substates_than_counts,
        );
        let substates: Vec<usize> = self
            .substates
            .iter()
            .zip(&factors)
            .map(|(n, f)| n * f)
            .collect();
        let stats = self.stats.remap(&substates, |state, old| {
            let f = factors[state];
            (0..old.len() * f)
                .map(|s| old[s / f] / f as f64 * perturb(rng, randomness))
                .collect()
        });
        let lineage = self
            .lineage
            .iter()
            .zip(&factors)
            .map(|(l, &f)| if f == 2 { l.split() } else { l.unsplit() })
            .collect();
        Lexicon {
            substates,
            root: self.root,
            params: self.params,
            stats,
            smoother: Smoother::None,
            lineage,
        }
    }

    /// Collapse substates; `mappings[state][old]` is the new index. Counts of
    /// merged substates are summed.
    pub fn merge_states(&self, mappings: &[Vec<usize>]) -> Lexicon {
        let substates: Vec<usize> = mappings
            .iter()
            .map(|m| m.iter().max().map_or(0, |&x| x + 1))
            .collect();
        let stats = self.stats.remap(&substates, |state, old| {
            let mut new = vec![0.0; substates[state]];
            for (s, &c) in old.iter().enumerate() {
                new[mappings[state][s]] += c;
            }
            new
        });
        let lineage = self
            .lineage
            .iter()
            .zip(mappings.iter().zip(&substates))
            .map(|(l, (m, &n))| l.merge(m, n))
            .collect();
        Lexicon {
            substates,
            root: self.root,
            params: self.params,
            stats,
            smoother: self.smoother,
            lineage,
        }
    }
}

/// Emission counts being accumulated for the next [`Lexicon`].
#[derive(Debug, Clone)]
pub struct LexiconAccumulator {
    substates: Vec<usize>,
    root: usize,
    params: LexiconParams,
    stats: EmissionStats,
    smoother: Smoother,
    lineage: Vec<Lineage>,
}

impl LexiconAccumulator {
    pub fn new(substates: &[usize], root: usize, params: LexiconParams) -> Self {
        Self {
            substates: substates.to_vec(),
            root,
            params,
            stats: EmissionStats::empty(substates),
            smoother: Smoother::None,
            lineage: substates.iter().map(|&n| Lineage::uniform(n)).collect(),
        }
    }

    /// Fresh, empty accumulator carrying over the configuration of `previous`.
    pub fn wrap(previous: &Lexicon) -> Self {
        Self {
            substates: previous.substates.clone(),
            root: previous.root,
            params: previous.params,
            stats: EmissionStats::empty(&previous.substates),
            smoother: previous.smoother,
            lineage: previous.lineage.clone(),
        }
    }

    pub fn substates(&self) -> &[usize] {
        &self.substates
    }

    /// Add the posterior-weighted emissions of a tree whose inside and
    /// outside scores have been computed.
    pub fn tally_tree(&mut self, tree: &AnnotatedTree, second_half: bool, rare_threshold: f64) {
        if tree.root().inside[0] <= 0.0 {
            return;
        }
        let mut position = 0;
        for (index, node) in tree.nodes().iter().enumerate() {
            let Some(word) = node.word.as_deref() else {
                continue;
            };
            let weights = tree.posterior(index);
            self.add(node.state, word, position, &weights, second_half, rare_threshold);
            position += 1;
        }
    }

    /// Add the emissions of an unscored tree. Substate weights follow the
    /// `reference` lexicon's scores when given, and are uniform otherwise;
    /// either way perturbed by `randomness` percent.
    pub fn tally_initial(
        &mut self,
        tree: &AnnotatedTree,
        randomness: f64,
        reference: Option<&Lexicon>,
        second_half: bool,
        rare_threshold: f64,
        rng: &mut Rand64,
    ) {
        for (position, node) in tree.preterminals().enumerate() {
            let Some(word) = node.word.as_deref() else {
                continue;
            };
            let n = self.substates[node.state];
            let mut weights = match reference {
                Some(lex) => lex.score(word, node.state, position),
                None => vec![1.0; n],
            };
            for w in &mut weights {
                *w *= perturb(rng, randomness);
            }
            let total: f64 = weights.iter().sum();
            if total > 0.0 {
                weights.iter_mut().for_each(|w| *w /= total);
            } else {
                weights = vec![1.0 / n as f64; n];
            }
            self.add(node.state, word, position, &weights, second_half, rare_threshold);
        }
    }

    fn add(
        &mut self,
        state: usize,
        word: &str,
        position: usize,
        weights: &[f64],
        second_half: bool,
        rare_threshold: f64,
    ) {
        let stats = &mut self.stats;
        let seen = stats.word_totals.get(word).copied().unwrap_or(0.0);
        let n = weights.len();

        let counts = stats.word_counts[state]
            .entry(word.to_string())
            .or_insert_with(|| vec![0.0; n]);
        for (c, w) in counts.iter_mut().zip(weights) {
            *c += w;
        }
        for (t, w) in stats.tag_counts[state].iter_mut().zip(weights) {
            *t += w;
        }
        *stats.word_totals.entry(word.to_string()).or_default() += 1.0;
        stats.total_tokens += 1.0;

        if second_half && seen < rare_threshold {
            let sig = signature(word, position);
            let counts = stats.unseen_signature_counts[state]
                .entry(sig.clone())
                .or_insert_with(|| vec![0.0; n]);
            for (c, w) in counts.iter_mut().zip(weights) {
                *c += w;
            }
            for (t, w) in stats.unseen_tag_counts[state].iter_mut().zip(weights) {
                *t += w;
            }
            *stats.unseen_signature_totals.entry(sig).or_default() += 1.0;
            stats.unseen_total += 1.0;
        }
    }

    /// For words seen fewer than `threshold` times, spread each tag's count
    /// over its substates in proportion to the substates' share of the
    /// unknown-word statistics. Tags without unknown-word statistics keep
    /// their counts.
    pub fn tie_rare_word_stats(&mut self, threshold: f64) {
        let stats = &mut self.stats;
        for (state, words) in stats.word_counts.iter_mut().enumerate() {
            let unseen = &stats.unseen_tag_counts[state];
            let unseen_total: f64 = unseen.iter().sum();
            if unseen_total <= 0.0 {
                continue;
            }
            for (word, counts) in words.iter_mut() {
                let seen = stats.word_totals.get(word).copied().unwrap_or(0.0);
                if seen >= threshold {
                    continue;
                }
                let total: f64 = counts.iter().sum();
                for (c, u) in counts.iter_mut().zip(unseen) {
                    *c = total * u / unseen_total;
                }
            }
        }
    }

    /// Finalize the counts (M-step).
    pub fn optimize(self) -> Lexicon {
        Lexicon {
            substates: self.substates,
            root: self.root,
            params: self.params,
            stats: self.stats,
            smoother: self.smoother,
            lineage: self.lineage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotated::TreeSet;
    use crate::tree::read_trees;
    use crate::vocabulary::CategoryVocabulary;

    fn trees(n: usize) -> (TreeSet, CategoryVocabulary) {
        let raw = read_trees(
            "(ROOT (S (NP (NN dogs)) (VP (VBZ bark)))) \
             (ROOT (S (NP (NN cats)) (VP (VBZ sleep)))) \
             (ROOT (S (NP (NN dogs)) (VP (VBZ sleep))))",
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
        (TreeSet::build(raw, &substates, &vocab).unwrap(), vocab)
    }

    fn trained(n: usize, randomness: f64) -> (Lexicon, CategoryVocabulary) {
        let (set, vocab) = trees(n);
        let mut acc = LexiconAccumulator::new(set.substates(), 0, LexiconParams::default());
        let mut rng = Rand64::new(5);
        let len = set.len();
        for (i, tree) in set.iter().enumerate() {
            let second = crate::annotated::is_second_half(i, len);
            acc.tally_initial(tree, randomness, None, second, 20.0, &mut rng);
        }
        acc.tie_rare_word_stats(20.0);
        (acc.optimize(), vocab)
    }

    #[test]
    fn signatures_capture_shape() {
        assert_eq!(signature("Walked", 0), "UNK-INITC-ed");
        assert_eq!(signature("Walked", 3), "UNK-CAP-ed");
        assert_eq!(signature("IBM", 2), "UNK-CAPS");
        assert_eq!(signature("1990s", 1), "UNK-NUM-s");
        assert_eq!(signature("well-known", 1), "UNK-DASH");
    }

    #[test]
    fn known_word_scores_higher_under_its_tag() {
        let (lex, vocab) = trained(1, 0.0);
        let nn = vocab.id("NN").unwrap();
        let vbz = vocab.id("VBZ").unwrap();
        assert!(lex.score("dogs", nn, 0)[0] > 0.0);
        assert!(lex.score("dogs", nn, 0)[0] > lex.score("dogs", vbz, 1)[0]);
    }

    #[test]
    fn unknown_words_still_get_mass() {
        let (lex, vocab) = trained(1, 0.0);
        let nn = vocab.id("NN").unwrap();
        assert!(!lex.is_known("birds"));
        assert!(lex.score("birds", nn, 0)[0] > 0.0);
    }

    #[test]
    fn tying_spreads_rare_words_like_unknown_words() {
        let (lex, vocab) = trained(2, 5.0);
        let nn = vocab.id("NN").unwrap();
        let unseen = &lex.stats.unseen_tag_counts[nn];
        let tags = &lex.stats.tag_counts[nn];
        for word in ["dogs", "cats"] {
            let counts = &lex.stats.word_counts[nn][word];
            assert!((unseen[0] / unseen[1] - counts[0] / counts[1]).abs() < 1e-9);
        }
        // only the last tree fed the unknown-word statistics
        assert!((unseen.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((unseen[0] / unseen[1] - tags[0] / tags[1]).abs() > 1e-6);
    }

    #[test]
    fn tags_without_unknown_words_keep_their_counts() {
        let (set, _) = trees(2);
        let mut acc = LexiconAccumulator::new(set.substates(), 0, LexiconParams::default());
        let mut rng = Rand64::new(5);
        for tree in &set {
            acc.tally_initial(tree, 5.0, None, false, 20.0, &mut rng);
        }
        let before = acc.stats.word_counts.clone();
        acc.tie_rare_word_stats(20.0);
        assert_eq!(acc.stats.word_counts, before);
    }

    #[test]
    fn split_then_merge_restores_counts() {
        let (lex, _) = trained(1, 0.0);
        let counts = vec![10; lex.substates().len()];
        let mut rng = Rand64::new(2);
        let split = lex.split_all_states(0.0, &counts, false, &mut rng);
        assert_eq!(split.substates()[0], 1);
        assert!(split.substates()[1..].iter().all(|&n| n == 2));
        let mappings: Vec<Vec<usize>> = split.substates().iter().map(|&n| vec![0; n]).collect();
        let merged = split.merge_states(&mappings);
        assert_eq!(merged.substates(), lex.substates());
        for (a, b) in merged.stats.tag_counts.iter().zip(&lex.stats.tag_counts) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn simple_lexicon_falls_back_to_signature() {
        let (set, vocab) = trees(1);
        let params = LexiconParams {
            kind: LexiconKind::Simple,
            ..LexiconParams::default()
        };
        let mut acc = LexiconAccumulator::new(set.substates(), 0, params);
        let mut rng = Rand64::new(0);
        for tree in &set {
            acc.tally_initial(tree, 0.0, None, false, 20.0, &mut rng);
        }
        let lex = acc.optimize();
        let nn = vocab.id("NN").unwrap();
        assert!(lex.score("dogs", nn, 0)[0] > lex.score("zebras", nn, 0)[0]);
        assert!(lex.score("zebras", nn, 0)[0] > 0.0);
    }
}
