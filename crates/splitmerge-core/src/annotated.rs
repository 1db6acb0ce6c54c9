//! # Annotated Trees
//!
//! Binarized trees over category ids, each node carrying one inside and one
//! outside score per latent substate. Scores are stored as a mantissa vector
//! plus an integer exponent in units of e^[`LOG_SCALE`] so that long
//! sentences stay within floating-point range.
//!
//! Annotated trees are tied to one substate-count vector. Whenever the
//! vector changes the whole [`TreeSet`] is rebuilt with [`TreeSet::rebuild`].

use std::collections::HashMap;

use crate::error::{GrammarError, Result};
use crate::tree::Tree;
use crate::vocabulary::CategoryVocabulary;

/// Natural-log size of one rescaling step.
pub const LOG_SCALE: f64 = 100.0;

/// Turn a scale exponent into a multiplier.
#[inline]
pub fn scale_factor(exponent: i32) -> f64 {
    (f64::from(exponent) * LOG_SCALE).exp()
}

/// One node of an [`AnnotatedTree`].
#[derive(Debug, Clone)]
pub struct AnnotatedNode {
    /// Category id.
    pub state: usize,
    /// The emitted word, on preterminals only.
    pub word: Option<String>,
    /// Indices of the one or two children, empty on preterminals.
    pub children: Vec<usize>,
    pub inside: Vec<f64>,
    pub outside: Vec<f64>,
    pub inside_scale: i32,
    pub outside_scale: i32,
}

impl AnnotatedNode {
    fn new(state: usize, substates: usize, word: Option<String>) -> Self {
        Self {
            state,
            word,
            children: Vec::new(),
            inside: vec![0.0; substates],
            outside: vec![0.0; substates],
            inside_scale: 0,
            outside_scale: 0,
        }
    }

    pub fn substates(&self) -> usize {
        self.inside.len()
    }

    pub fn is_preterminal(&self) -> bool {
        self.word.is_some()
    }
}

/// A binarized tree with per-substate score storage.
///
/// Nodes are stored in pre-order, so every child index is larger than its
/// parent's and node 0 is the root.
#[derive(Debug, Clone)]
pub struct AnnotatedTree {
    nodes: Vec<AnnotatedNode>,
}

impl AnnotatedTree {
    /// Annotate a binarized raw tree for the given substate-count vector.
    pub fn from_tree(tree: &Tree, substates: &[usize], vocab: &CategoryVocabulary) -> Result<Self> {
        let mut nodes = Vec::new();
        push_node(tree, substates, vocab, &mut nodes)?;
        Ok(Self { nodes })
    }

    pub fn root(&self) -> &AnnotatedNode {
        &self.nodes[0]
    }

    pub fn nodes(&self) -> &[AnnotatedNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [AnnotatedNode] {
        &mut self.nodes
    }

    /// Preterminal nodes, left to right.
    pub fn preterminals(&self) -> impl Iterator<Item = &AnnotatedNode> {
        self.nodes.iter().filter(|n| n.is_preterminal())
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|n| n.word.as_deref())
    }

    /// Log-likelihood of the tree from the root inside score, undoing the
    /// rescaling. Non-finite when the model gives the tree zero mass.
    pub fn log_likelihood(&self) -> f64 {
        let root = self.root();
        root.inside[0].ln() + f64::from(root.inside_scale) * LOG_SCALE
    }

    /// Posterior probability of each substate at node `index`, given the
    /// whole tree. Requires inside and outside scores.
    pub fn posterior(&self, index: usize) -> Vec<f64> {
        let root = self.root();
        let node = &self.nodes[index];
        if root.inside[0] <= 0.0 {
            return vec![0.0; node.substates()];
        }
        let factor = scale_factor(node.inside_scale + node.outside_scale - root.inside_scale)
            / root.inside[0];
        node.inside
            .iter()
            .zip(&node.outside)
            .map(|(i, o)| i * o * factor)
            .collect()
    }

    /// Same shape and yield, fresh score storage sized for `substates`.
    pub fn rebuild(&self, substates: &[usize]) -> Self {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                let mut node = AnnotatedNode::new(n.state, substates[n.state], n.word.clone());
                node.children = n.children.clone();
                node
            })
            .collect();
        Self { nodes }
    }
}

fn push_node(
    tree: &Tree,
    substates: &[usize],
    vocab: &CategoryVocabulary,
    nodes: &mut Vec<AnnotatedNode>,
) -> Result<usize> {
    let state = vocab.id(&tree.label)?;
    let count = *substates.get(state).ok_or_else(|| {
        GrammarError::MalformedTree(format!("no substate count for category {}", tree.label))
    })?;
    let index = nodes.len();
    if tree.is_preterminal() {
        nodes.push(AnnotatedNode::new(state, count, Some(tree.children[0].label.clone())));
        return Ok(index);
    }
    if tree.children.is_empty() || tree.children.len() > 2 {
        return Err(GrammarError::MalformedTree(format!(
            "{} has {} children; trees must be binarized",
            tree.label,
            tree.children.len()
        )));
    }
    if tree.children.iter().any(Tree::is_leaf) {
        return Err(GrammarError::MalformedTree(format!(
            "{} mixes words and constituents",
            tree.label
        )));
    }
    nodes.push(AnnotatedNode::new(state, count, None));
    let mut children = Vec::with_capacity(tree.children.len());
    for child in &tree.children {
        children.push(push_node(child, substates, vocab, nodes)?);
    }
    nodes[index].children = children;
    Ok(index)
}

/// Whether tree `index` of `len` belongs to the second half of the corpus.
pub fn is_second_half(index: usize, len: usize) -> bool {
    index as f64 > len as f64 / 2.0
}

/// A corpus of annotated trees sharing one substate-count vector.
#[derive(Debug, Clone)]
pub struct TreeSet {
    trees: Vec<AnnotatedTree>,
    substates: Vec<usize>,
}

impl TreeSet {
    /// Annotate `raw` trees. The raw trees are consumed and dropped.
    pub fn build(raw: Vec<Tree>, substates: &[usize], vocab: &CategoryVocabulary) -> Result<Self> {
        let trees = raw
            .iter()
            .map(|t| AnnotatedTree::from_tree(t, substates, vocab))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            trees,
            substates: substates.to_vec(),
        })
    }

    /// A new tree set over the same trees, sized for `substates`.
    pub fn rebuild(&self, substates: &[usize]) -> Self {
        Self {
            trees: self.trees.iter().map(|t| t.rebuild(substates)).collect(),
            substates: substates.to_vec(),
        }
    }

    pub fn substates(&self) -> &[usize] {
        &self.substates
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnnotatedTree> {
        self.trees.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, AnnotatedTree> {
        self.trees.iter_mut()
    }

    /// Number of nodes labelled with each category.
    pub fn symbol_counts(&self, num_states: usize) -> Vec<usize> {
        let mut counts = vec![0; num_states];
        for node in self.trees.iter().flat_map(|t| t.nodes()) {
            counts[node.state] += 1;
        }
        counts
    }

    /// Categories that occur as preterminals.
    pub fn lexical_states(&self, num_states: usize) -> Vec<bool> {
        let mut lexical = vec![false; num_states];
        for node in self.trees.iter().flat_map(|t| t.preterminals()) {
            lexical[node.state] = true;
        }
        lexical
    }

    /// Replace every word seen fewer than `threshold` times by the
    /// signature `signature(word, position)` computes for it.
    pub fn replace_rare_words<F>(&mut self, threshold: usize, signature: F)
    where
        F: Fn(&str, usize) -> String,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in self.trees.iter().flat_map(|t| t.words()) {
            *counts.entry(word.to_string()).or_default() += 1;
        }
        for tree in &mut self.trees {
            let mut position = 0;
            for node in tree.nodes_mut() {
                if let Some(word) = node.word.as_mut() {
                    if counts.get(word.as_str()).copied().unwrap_or(0) < threshold {
                        *word = signature(word, position);
                    }
                    position += 1;
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a TreeSet {
    type Item = &'a AnnotatedTree;
    type IntoIter = std::slice::Iter<'a, AnnotatedTree>;

    fn into_iter(self) -> Self::IntoIter {
        self.trees.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::read_trees;

    fn sample() -> (Vec<Tree>, CategoryVocabulary) {
        let trees =
            read_trees("(ROOT (S (NP (DT the) (NN dog)) (VP (VBZ barks))))", "ROOT").unwrap();
        let mut vocab = CategoryVocabulary::default();
        for tree in &trees {
            tree.for_each_category(&mut |l| {
                vocab.intern(l);
            });
        }
        (trees, vocab)
    }

    #[test]
    fn nodes_are_in_preorder() {
        let (trees, vocab) = sample();
        let substates = vec![1, 2, 2, 2, 2, 2, 2];
        let tree = AnnotatedTree::from_tree(&trees[0], &substates, &vocab).unwrap();
        for (i, node) in tree.nodes().iter().enumerate() {
            assert!(node.children.iter().all(|&c| c > i));
        }
        assert_eq!(tree.root().substates(), 1);
        assert_eq!(tree.words().collect::<Vec<_>>(), vec!["the", "dog", "barks"]);
    }

    #[test]
    fn rebuild_resizes_scores_and_keeps_shape() {
        let (trees, vocab) = sample();
        let set = TreeSet::build(trees, &vec![1; vocab.len()], &vocab).unwrap();
        let wider = vec![1, 4, 4, 4, 4, 4, 4];
        let rebuilt = set.rebuild(&wider);
        assert_eq!(rebuilt.substates(), wider.as_slice());
        let before = set.iter().next().unwrap();
        let after = rebuilt.iter().next().unwrap();
        assert_eq!(before.nodes().len(), after.nodes().len());
        assert_eq!(after.nodes()[1].substates(), 4);
        assert_eq!(after.root().substates(), 1);
    }

    #[test]
    fn unbinarized_trees_are_rejected() {
        let trees = read_trees("(ROOT (NP (DT a) (JJ b) (NN c)))", "ROOT").unwrap();
        let mut vocab = CategoryVocabulary::default();
        trees[0].for_each_category(&mut |l| {
            vocab.intern(l);
        });
        assert!(matches!(
            AnnotatedTree::from_tree(&trees[0], &vec![1; vocab.len()], &vocab),
            Err(GrammarError::MalformedTree(_))
        ));
    }

    #[test]
    fn symbol_counts_and_lexical_states() {
        let (trees, vocab) = sample();
        let set = TreeSet::build(trees, &vec![1; vocab.len()], &vocab).unwrap();
        let counts = set.symbol_counts(vocab.len());
        assert_eq!(counts.iter().sum::<usize>(), 7);
        let lexical = set.lexical_states(vocab.len());
        assert!(lexical[vocab.id("DT").unwrap()]);
        assert!(!lexical[vocab.id("NP").unwrap()]);
    }

    #[test]
    fn second_half_boundary() {
        assert!(!is_second_half(2, 4));
        assert!(is_second_half(3, 4));
        assert!(!is_second_half(0, 1));
    }

    #[test]
    fn rare_words_become_signatures() {
        let (trees, vocab) = sample();
        let mut set = TreeSet::build(trees, &vec![1; vocab.len()], &vocab).unwrap();
        set.replace_rare_words(2, |_, pos| format!("UNK-{pos}"));
        let words: Vec<_> = set.iter().next().unwrap().words().map(str::to_string).collect();
        assert_eq!(words, vec!["UNK-0", "UNK-1", "UNK-2"]);
    }
}
