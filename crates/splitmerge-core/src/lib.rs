//! # Splitmerge Core
//!
//! Data model and building blocks of a latent-annotation PCFG trainer:
//! treebank reading and binarization, annotated trees with per-substate
//! score storage, grammars and lexicons in accumulating and normalized
//! form, inside/outside scoring, merge selection and checkpoints.
//!
//! ## Quick Start
//!
//! ```rust
//! use splitmerge_core::{CategoryVocabulary, TreeSet, read_trees};
//!
//! let raw = read_trees("(ROOT (S (NP (NN dogs)) (VP (VBZ bark))))", "ROOT").unwrap();
//! let mut vocab = CategoryVocabulary::default();
//! raw[0].for_each_category(&mut |label| {
//!     vocab.intern(label);
//! });
//! let trees = TreeSet::build(raw, &vec![1; vocab.len()], &vocab).unwrap();
//!
//! assert_eq!(trees.len(), 1);
//! assert_eq!(vocab.root(), Some(0));
//! ```
pub mod annotated;
pub mod checkpoint;
pub mod error;
pub mod grammar;
pub mod lexicon;
pub mod merger;
pub mod scorer;
pub mod smoothing;
pub mod tree;
pub mod vocabulary;

// Re-export primary API
pub use annotated::{AnnotatedNode, AnnotatedTree, LOG_SCALE, TreeSet, is_second_half};
pub use checkpoint::Checkpoint;
pub use error::{GrammarError, Result};
pub use grammar::{Grammar, GrammarAccumulator, RuleKey, RuleScores};
pub use lexicon::{Lexicon, LexiconAccumulator, LexiconKind, LexiconParams, signature};
pub use merger::{GrammarMerger, MergeCandidate};
pub use scorer::TreeScorer;
pub use smoothing::{Lineage, Smoother};
pub use tree::{Binarization, Tree, TreebankOptions, binarize, load_treebank, read_trees};
pub use vocabulary::{CategoryVocabulary, DEFAULT_ROOT_LABEL};
