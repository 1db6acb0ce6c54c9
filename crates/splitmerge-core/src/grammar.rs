//! # Grammar
//!
//! Rule probabilities over latent substates. A [`GrammarAccumulator`]
//! collects (expected) rule counts; [`GrammarAccumulator::optimize`] turns it
//! into a normalized [`Grammar`]. The two never share a type, so a grammar
//! that is still being filled can not be used for scoring by accident.

use std::collections::BTreeMap;

use oorandom::Rand64;
use serde::{Deserialize, Serialize};

use crate::annotated::{AnnotatedNode, AnnotatedTree, scale_factor};
use crate::smoothing::{Lineage, Smoother};

/// Identifies a rule by the categories involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleKey {
    Unary { parent: usize, child: usize },
    Binary { parent: usize, left: usize, right: usize },
}

impl RuleKey {
    pub fn parent(&self) -> usize {
        match *self {
            RuleKey::Unary { parent, .. } | RuleKey::Binary { parent, .. } => parent,
        }
    }

    /// Child categories, left to right.
    pub fn children(&self) -> Vec<usize> {
        match *self {
            RuleKey::Unary { child, .. } => vec![child],
            RuleKey::Binary { left, right, .. } => vec![left, right],
        }
    }

    /// The rule that expands `node` in an annotated tree, if it is not a preterminal.
    pub fn of_node(node: &AnnotatedNode, tree: &AnnotatedTree) -> Option<Self> {
        let nodes = tree.nodes();
        match node.children.as_slice() {
            [child] => Some(RuleKey::Unary {
                parent: node.state,
                child: nodes[*child].state,
            }),
            [left, right] => Some(RuleKey::Binary {
                parent: node.state,
                left: nodes[*left].state,
                right: nodes[*right].state,
            }),
            _ => None,
        }
    }

    fn dims(&self, substates: &[usize]) -> (usize, usize, usize) {
        match *self {
            RuleKey::Unary { parent, child } => (substates[parent], substates[child], 1),
            RuleKey::Binary {
                parent,
                left,
                right,
            } => (substates[parent], substates[left], substates[right]),
        }
    }
}

/// Dense scores indexed `[parent][left][right]`; unary rules use a right
/// dimension of 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScores {
    dims: (usize, usize, usize),
    data: Vec<f64>,
}

impl RuleScores {
    pub fn zeros(dims: (usize, usize, usize)) -> Self {
        Self {
            dims,
            data: vec![0.0; dims.0 * dims.1 * dims.2],
        }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    #[inline]
    fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.dims.1 + j) * self.dims.2 + k
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.offset(i, j, k)]
    }

    #[inline]
    pub fn add(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let at = self.offset(i, j, k);
        self.data[at] += value;
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let at = self.offset(i, j, k);
        self.data[at] = value;
    }

    /// Sum of the scores of parent substate `i`.
    pub fn parent_total(&self, i: usize) -> f64 {
        let width = self.dims.1 * self.dims.2;
        self.data[i * width..(i + 1) * width].iter().sum()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.data.iter_mut()
    }
}

mod rule_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{RuleKey, RuleScores};

    pub fn serialize<S: Serializer>(
        rules: &BTreeMap<RuleKey, RuleScores>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(rules.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<RuleKey, RuleScores>, D::Error> {
        let list: Vec<(RuleKey, RuleScores)> = Vec::deserialize(deserializer)?;
        Ok(list.into_iter().collect())
    }
}

/// Multiplicative noise of `randomness` percent.
pub(crate) fn perturb(rng: &mut Rand64, randomness: f64) -> f64 {
    1.0 + randomness / 100.0 * (rng.rand_float() * 2.0 - 1.0)
}

/// A normalized latent-annotation grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grammar {
    substates: Vec<usize>,
    root: usize,
    #[serde(with = "rule_list")]
    rules: BTreeMap<RuleKey, RuleScores>,
    smoother: Smoother,
    threshold: f64,
    lineage: Vec<Lineage>,
}

impl Grammar {
    pub fn substates(&self) -> &[usize] {
        &self.substates
    }

    pub fn num_states(&self) -> usize {
        self.substates.len()
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn total_substates(&self) -> usize {
        self.substates.iter().sum()
    }

    pub fn rule(&self, key: &RuleKey) -> Option<&RuleScores> {
        self.rules.get(key)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&RuleKey, &RuleScores)> {
        self.rules.iter()
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    pub fn smoother(&self) -> Smoother {
        self.smoother
    }

    /// Install a smoother; it takes effect at the next [`GrammarAccumulator::optimize`].
    pub fn set_smoother(&mut self, smoother: Smoother) {
        self.smoother = smoother;
    }

    /// Rules with a probability below this are pruned when optimizing.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn lineage(&self) -> &[Lineage] {
        &self.lineage
    }

    /// Double the substates of every category but the root.
    ///
    /// `counts` are the corpus occurrences per category; unless
    /// `allow_more_substates_than_counts` is set, a category is left unsplit
    /// when it would end up with more substates than observations. Each new
    /// cell receives its share of the old probability with `randomness`
    /// percent of noise. The result is deliberately not renormalized.
    pub fn split_all_states(
        &self,
        randomness: f64,
        counts: &[usize],
        allow_more_substates_than_counts: bool,
        rng: &mut Rand64,
    ) -> Grammar {
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

        let mut rules = BTreeMap::new();
        for (key, old) in &self.rules {
            let fp = factors[key.parent()];
            let (fl, fr) = match *key {
                RuleKey::Unary { child, .. } => (factors[child], 1),
                RuleKey::Binary { left, right, .. } => (factors[left], factors[right]),
            };
            let dims = key.dims(&substates);
            let share = (fl * fr) as f64;
            let mut new = RuleScores::zeros(dims);
            for i in 0..dims.0 {
                for j in 0..dims.1 {
                    for k in 0..dims.2 {
                        let base = old.get(i / fp, j / fl, k / fr) / share;
                        new.set(i, j, k, base * perturb(rng, randomness));
                    }
                }
            }
            rules.insert(*key, new);
        }

        let lineage = self
            .lineage
            .iter()
            .zip(&factors)
            .map(|(l, &f)| if f == 2 { l.split() } else { l.unsplit() })
            .collect();

        Grammar {
            substates,
            root: self.root,
            rules,
            smoother: Smoother::None,
            threshold: self.threshold,
            lineage,
        }
    }

    /// Collapse substates. `mappings[state][old]` is the new index of an old
    /// substate; `weights[state][old]` is its relative frequency. Parent
    /// distributions are averaged by weight, child substates are summed.
    pub fn merge_states(&self, mappings: &[Vec<usize>], weights: &[Vec<f64>]) -> Grammar {
        let substates: Vec<usize> = mappings
            .iter()
            .map(|m| m.iter().max().map_or(0, |&x| x + 1))
            .collect();
        let parent_weights: Vec<Vec<f64>> = mappings
            .iter()
            .zip(weights)
            .map(|(m, w)| group_weights(m, w))
            .collect();

        let mut rules = BTreeMap::new();
        for (key, old) in &self.rules {
            let p = key.parent();
            let children = key.children();
            let dims = key.dims(&substates);
            let (op, ol, or) = old.dims();
            let mut new = RuleScores::zeros(dims);
            for i in 0..op {
                let ni = mappings[p][i];
                let w = parent_weights[p][i];
                for j in 0..ol {
                    let nj = mappings[children[0]][j];
                    for k in 0..or {
                        let nk = match children.get(1) {
                            Some(&right) => mappings[right][k],
                            None => 0,
                        };
                        new.add(ni, nj, nk, w * old.get(i, j, k));
                    }
                }
            }
            rules.insert(*key, new);
        }

        let lineage = self
            .lineage
            .iter()
            .zip(mappings.iter().zip(&substates))
            .map(|(l, (m, &n))| l.merge(m, n))
            .collect();

        Grammar {
            substates,
            root: self.root,
            rules,
            smoother: self.smoother,
            threshold: self.threshold,
            lineage,
        }
    }
}

pub(crate) fn split_factors(
    substates: &[usize],
    root: usize,
    counts: &[usize],
    allow_more_substates_than_counts: bool,
) -> Vec<usize> {
    substates
        .iter()
        .enumerate()
        .map(|(state, &n)| {
            if state == root {
                1
            } else if !allow_more_substates_than_counts
                && counts.get(state).copied().unwrap_or(0) < 2 * n
            {
                1
            } else {
                2
            }
        })
        .collect()
}

/// Per old substate, its weight relative to the other substates it merges with.
pub(crate) fn group_weights(mapping: &[usize], weights: &[f64]) -> Vec<f64> {
    let groups = mapping.iter().max().map_or(0, |&x| x + 1);
    let mut totals = vec![0.0; groups];
    let mut sizes = vec![0usize; groups];
    for (old, &new) in mapping.iter().enumerate() {
        totals[new] += weights.get(old).copied().unwrap_or(0.0);
        sizes[new] += 1;
    }
    mapping
        .iter()
        .enumerate()
        .map(|(old, &new)| {
            if totals[new] > 0.0 {
                weights.get(old).copied().unwrap_or(0.0) / totals[new]
            } else {
                1.0 / sizes[new] as f64
            }
        })
        .collect()
}

/// Rule counts being accumulated for the next [`Grammar`].
#[derive(Debug, Clone)]
pub struct GrammarAccumulator {
    substates: Vec<usize>,
    root: usize,
    rules: BTreeMap<RuleKey, RuleScores>,
    smoother: Smoother,
    threshold: f64,
    lineage: Vec<Lineage>,
}

impl GrammarAccumulator {
    /// Start an accumulator from nothing, as for the first MLE grammar.
    pub fn new(substates: &[usize], root: usize, threshold: f64) -> Self {
        Self {
            substates: substates.to_vec(),
            root,
            rules: BTreeMap::new(),
            smoother: Smoother::None,
            threshold,
            lineage: substates.iter().map(|&n| Lineage::uniform(n)).collect(),
        }
    }

    /// Fresh, empty accumulator carrying over the configuration of `previous`.
    pub fn wrap(previous: &Grammar) -> Self {
        Self {
            substates: previous.substates.clone(),
            root: previous.root,
            rules: previous
                .rules
                .iter()
                .map(|(k, s)| (*k, RuleScores::zeros(s.dims())))
                .collect(),
            smoother: previous.smoother,
            threshold: previous.threshold,
            lineage: previous.lineage.clone(),
        }
    }

    pub fn substates(&self) -> &[usize] {
        &self.substates
    }

    /// Count every rule of `tree` once in every substate combination.
    pub fn tally_uninitialized(&mut self, tree: &AnnotatedTree) {
        for node in tree.nodes() {
            let Some(key) = RuleKey::of_node(node, tree) else {
                continue;
            };
            let dims = key.dims(&self.substates);
            let scores = self
                .rules
                .entry(key)
                .or_insert_with(|| RuleScores::zeros(dims));
            for value in scores.values_mut() {
                *value += 1.0;
            }
        }
    }

    /// Add the expected rule counts of `tree`, whose inside and outside
    /// scores were computed under `previous`.
    pub fn tally_tree(&mut self, tree: &AnnotatedTree, previous: &Grammar) {
        let nodes = tree.nodes();
        let root = tree.root();
        let root_inside = root.inside[0];
        if root_inside <= 0.0 {
            return;
        }
        for node in nodes {
            let Some(key) = RuleKey::of_node(node, tree) else {
                continue;
            };
            let Some(probs) = previous.rule(&key) else {
                continue;
            };
            let dims = probs.dims();
            let counts = self
                .rules
                .entry(key)
                .or_insert_with(|| RuleScores::zeros(dims));
            match node.children.as_slice() {
                [c] => {
                    let child = &nodes[*c];
                    let factor = scale_factor(
                        node.outside_scale + child.inside_scale - root.inside_scale,
                    ) / root_inside;
                    for i in 0..dims.0 {
                        let o = node.outside[i] * factor;
                        if o == 0.0 {
                            continue;
                        }
                        for j in 0..dims.1 {
                            counts.add(i, j, 0, o * probs.get(i, j, 0) * child.inside[j]);
                        }
                    }
                }
                [l, r] => {
                    let (left, right) = (&nodes[*l], &nodes[*r]);
                    let factor = scale_factor(
                        node.outside_scale + left.inside_scale + right.inside_scale
                            - root.inside_scale,
                    ) / root_inside;
                    for i in 0..dims.0 {
                        let o = node.outside[i] * factor;
                        if o == 0.0 {
                            continue;
                        }
                        for j in 0..dims.1 {
                            let ol = o * left.inside[j];
                            if ol == 0.0 {
                                continue;
                            }
                            for k in 0..dims.2 {
                                counts.add(i, j, k, ol * probs.get(i, j, k) * right.inside[k]);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Normalize counts into probabilities (M-step).
    ///
    /// With `randomness > 0` every count is first perturbed by up to that
    /// many percent. Probabilities under the pruning threshold are zeroed and
    /// the installed smoother is applied across sibling parent substates.
    pub fn optimize(mut self, randomness: f64, rng: &mut Rand64) -> Grammar {
        if randomness > 0.0 {
            for scores in self.rules.values_mut() {
                for value in scores.values_mut() {
                    *value *= perturb(rng, randomness);
                }
            }
        }

        let mut totals: Vec<Vec<f64>> = self.substates.iter().map(|&n| vec![0.0; n]).collect();
        for (key, scores) in &self.rules {
            let p = key.parent();
            for (i, total) in totals[p].iter_mut().enumerate() {
                *total += scores.parent_total(i);
            }
        }

        for (key, scores) in self.rules.iter_mut() {
            let p = key.parent();
            let (np, nl, nr) = scores.dims();
            for i in 0..np {
                let total = totals[p][i];
                for j in 0..nl {
                    for k in 0..nr {
                        let prob = if total > 0.0 {
                            scores.get(i, j, k) / total
                        } else {
                            0.0
                        };
                        let prob = if prob < self.threshold { 0.0 } else { prob };
                        scores.set(i, j, k, prob);
                    }
                }
            }
            if self.smoother.is_enabled() {
                let mut column = vec![0.0; np];
                for j in 0..nl {
                    for k in 0..nr {
                        for (i, c) in column.iter_mut().enumerate() {
                            *c = scores.get(i, j, k);
                        }
                        self.smoother.smooth(&self.lineage[p], &mut column);
                        for (i, &c) in column.iter().enumerate() {
                            scores.set(i, j, k, c);
                        }
                    }
                }
            }
        }

        Grammar {
            substates: self.substates,
            root: self.root,
            rules: self.rules,
            smoother: self.smoother,
            threshold: self.threshold,
            lineage: self.lineage,
        }
    }
}
