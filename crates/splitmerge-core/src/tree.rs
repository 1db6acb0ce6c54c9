//! # Treebank Trees
//!
//! Raw labelled trees as read from a Penn-style bracketed treebank, plus the
//! binarizer that turns them into the binary/unary shape the grammar scores.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GrammarError, Result};

/// Separator between a category and its parent annotation (`NP^S`).
pub const PARENT_ANNOTATION: char = '^';

/// Prefix of categories introduced by binarization (`@NP->_DT`).
pub const INTERMEDIATE_PREFIX: char = '@';

/// A labelled ordered tree. Leaves carry words, every other node a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub label: String,
    pub children: Vec<Tree>,
}

impl Tree {
    pub fn leaf(word: impl Into<String>) -> Self {
        Self {
            label: word.into(),
            children: Vec::new(),
        }
    }

    pub fn node(label: impl Into<String>, children: Vec<Tree>) -> Self {
        Self {
            label: label.into(),
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// A node whose only child is a word.
    pub fn is_preterminal(&self) -> bool {
        self.children.len() == 1 && self.children[0].is_leaf()
    }

    /// Words at the leaves, left to right.
    pub fn words(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_words(&mut out);
        out
    }

    fn collect_words<'a>(&'a self, out: &mut Vec<&'a str>) {
        if self.is_leaf() {
            out.push(&self.label);
        } else {
            for child in &self.children {
                child.collect_words(out);
            }
        }
    }

    /// Visit every non-leaf label in pre-order.
    pub fn for_each_category<F: FnMut(&str)>(&self, f: &mut F) {
        if self.is_leaf() {
            return;
        }
        f(&self.label);
        for child in &self.children {
            child.for_each_category(f);
        }
    }

    fn lowercase_words(&mut self) {
        if self.is_leaf() {
            self.label = self.label.to_lowercase();
        } else {
            for child in &mut self.children {
                child.lowercase_words();
            }
        }
    }
}

impl std::fmt::Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_leaf() {
            return write!(f, "{}", self.label);
        }
        write!(f, "({}", self.label)?;
        for child in &self.children {
            write!(f, " {child}")?;
        }
        write!(f, ")")
    }
}

/// Parse every bracketed tree in `text`.
///
/// An empty outermost label (`( (S ...) )`) becomes `root_label`; a tree
/// whose top label is anything else is wrapped in a new `root_label` node.
/// Function tags (`NP-SBJ`) and indices (`NP=2`) are stripped and empty
/// `-NONE-` elements are removed.
pub fn read_trees(text: &str, root_label: &str) -> Result<Vec<Tree>> {
    parse_trees(text, root_label, false)
}

fn parse_trees(text: &str, root_label: &str, keep_function_labels: bool) -> Result<Vec<Tree>> {
    let pattern = Regex::new(r"\(|\)|[^\s()]+")?;
    let tokens: Vec<&str> = pattern.find_iter(text).map(|m| m.as_str()).collect();
    let mut pos = 0;
    let mut trees = Vec::new();
    while pos < tokens.len() {
        let raw = parse_node(&tokens, &mut pos, keep_function_labels)?;
        let tree = if raw.label.is_empty() || raw.label == root_label {
            Tree::node(root_label, raw.children)
        } else {
            Tree::node(root_label, vec![raw])
        };
        if let Some(tree) = prune_empty(tree) {
            trees.push(tree);
        }
    }
    Ok(trees)
}

fn parse_node(tokens: &[&str], pos: &mut usize, keep_function_labels: bool) -> Result<Tree> {
    if tokens.get(*pos) != Some(&"(") {
        return Err(GrammarError::TreebankSyntax {
            position: *pos,
            message: "expected '('".into(),
        });
    }
    *pos += 1;
    let label = match tokens.get(*pos) {
        Some(&"(") => String::new(),
        Some(&")") => {
            return Err(GrammarError::TreebankSyntax {
                position: *pos,
                message: "empty constituent".into(),
            });
        }
        Some(tok) => {
            *pos += 1;
            clean_label(tok, keep_function_labels)
        }
        None => {
            return Err(GrammarError::TreebankSyntax {
                position: *pos,
                message: "unexpected end of input".into(),
            });
        }
    };
    let mut children = Vec::new();
    loop {
        match tokens.get(*pos) {
            Some(&")") => {
                *pos += 1;
                break;
            }
            Some(&"(") => children.push(parse_node(tokens, pos, keep_function_labels)?),
            Some(word) => {
                children.push(Tree::leaf(*word));
                *pos += 1;
            }
            None => {
                return Err(GrammarError::TreebankSyntax {
                    position: *pos,
                    message: "unbalanced parentheses".into(),
                });
            }
        }
    }
    Ok(Tree::node(label, children))
}

/// Drop the index of `label`, and its function tags unless
/// `keep_function_labels` is set. `-NONE-` style labels are left alone.
fn clean_label(label: &str, keep_function_labels: bool) -> String {
    if label.starts_with('-') {
        return label.to_string();
    }
    let separators: &[char] = if keep_function_labels { &['='] } else { &['-', '='] };
    label.split(separators).next().unwrap_or(label).to_string()
}

fn prune_empty(tree: Tree) -> Option<Tree> {
    if tree.is_leaf() {
        return Some(tree);
    }
    if tree.label == "-NONE-" {
        return None;
    }
    let children: Vec<Tree> = tree.children.into_iter().filter_map(prune_empty).collect();
    if children.is_empty() {
        return None;
    }
    Some(Tree::node(tree.label, children))
}

/// Options applied when loading a treebank file.
#[derive(Debug, Clone)]
pub struct TreebankOptions {
    pub root_label: String,
    /// Drop sentences with more words than this.
    pub max_sentence_length: usize,
    /// Keep only this leading fraction of the file's trees.
    pub fraction_to_keep: f64,
    pub lowercase: bool,
    /// Keep function tags (`NP-SBJ`) as part of the category.
    pub keep_function_labels: bool,
}

impl Default for TreebankOptions {
    fn default() -> Self {
        Self {
            root_label: crate::vocabulary::DEFAULT_ROOT_LABEL.to_string(),
            max_sentence_length: 10_000,
            fraction_to_keep: 1.0,
            lowercase: false,
            keep_function_labels: false,
        }
    }
}

/// Read and filter a bracketed treebank file.
pub fn load_treebank<P: AsRef<Path>>(path: P, options: &TreebankOptions) -> Result<Vec<Tree>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| GrammarError::io(e, path))?;
    let mut trees = parse_trees(&text, &options.root_label, options.keep_function_labels)?;

    let keep = ((trees.len() as f64) * options.fraction_to_keep.clamp(0.0, 1.0)).ceil() as usize;
    trees.truncate(keep);
    trees.retain(|t| t.words().len() <= options.max_sentence_length);
    if options.lowercase {
        for tree in &mut trees {
            tree.lowercase_words();
        }
    }
    tracing::info!(path = %path.display(), trees = trees.len(), "loaded treebank");
    Ok(trees)
}

/// Direction in which n-ary constituents are binarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Binarization {
    Left,
    #[default]
    Right,
}

/// Binarize `tree` with the given markovization orders.
///
/// `vertical` = 1 leaves labels alone, 2 annotates each phrasal category
/// with its parent (`NP^S`), and so on. `horizontal` is the number of
/// already generated siblings remembered in intermediate labels.
pub fn binarize(tree: &Tree, vertical: usize, horizontal: usize, binarization: Binarization) -> Tree {
    let root_children = tree
        .children
        .iter()
        .map(|c| annotate(c, &[tree.label.as_str()], vertical))
        .collect();
    let annotated = Tree::node(tree.label.clone(), root_children);
    split_nary(&annotated, horizontal, binarization)
}

fn annotate(tree: &Tree, ancestors: &[&str], vertical: usize) -> Tree {
    if tree.is_leaf() || tree.is_preterminal() {
        return tree.clone();
    }
    let mut label = tree.label.clone();
    for parent in ancestors.iter().rev().take(vertical.saturating_sub(1)) {
        label.push(PARENT_ANNOTATION);
        label.push_str(parent);
    }
    let mut chain = ancestors.to_vec();
    chain.push(tree.label.as_str());
    let children = tree
        .children
        .iter()
        .map(|c| annotate(c, &chain, vertical))
        .collect();
    Tree::node(label, children)
}

fn split_nary(tree: &Tree, horizontal: usize, binarization: Binarization) -> Tree {
    if tree.is_leaf() || tree.is_preterminal() {
        return tree.clone();
    }
    let children: Vec<Tree> = tree
        .children
        .iter()
        .map(|c| split_nary(c, horizontal, binarization))
        .collect();
    if children.len() <= 2 {
        return Tree::node(tree.label.clone(), children);
    }
    let base = tree.label.clone();
    match binarization {
        Binarization::Right => Tree::node(base.clone(), right_spine(&base, children, horizontal)),
        Binarization::Left => Tree::node(base.clone(), left_spine(&base, children, horizontal)),
    }
}

fn intermediate_label(base: &str, history: &[&Tree], horizontal: usize) -> String {
    let mut label = format!("{INTERMEDIATE_PREFIX}{base}->");
    let start = history.len().saturating_sub(horizontal);
    for sibling in &history[start..] {
        label.push('_');
        label.push_str(&sibling.label);
    }
    label
}

fn right_spine(base: &str, children: Vec<Tree>, horizontal: usize) -> Vec<Tree> {
    let mut rest = children;
    let mut node: Option<Tree> = None;
    while let Some(child) = rest.pop() {
        if rest.is_empty() {
            return std::iter::once(child).chain(node).collect();
        }
        node = Some(match node {
            None => child,
            Some(right) => {
                let history: Vec<&Tree> = rest.iter().collect();
                Tree::node(intermediate_label(base, &history, horizontal), vec![child, right])
            }
        });
    }
    node.into_iter().collect()
}

fn left_spine(base: &str, children: Vec<Tree>, horizontal: usize) -> Vec<Tree> {
    // nearest unattached sibling last
    let mut rest: Vec<Tree> = children.into_iter().rev().collect();
    let Some(mut left) = rest.pop() else {
        return Vec::new();
    };
    while rest.len() > 1 {
        let Some(right) = rest.pop() else { break };
        let outside: Vec<&Tree> = rest.iter().collect();
        left = Tree::node(
            intermediate_label(base, &outside, horizontal),
            vec![left, right],
        );
    }
    std::iter::once(left).chain(rest).collect()
}
