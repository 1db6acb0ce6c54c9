//! # Splitmerge
//!
//! Facade over [`splitmerge_core`] (trees, grammars, lexicons, scoring,
//! checkpoints) and [`splitmerge_trainer`] (the split/merge/smooth loop).

pub use splitmerge_core as core;
pub use splitmerge_trainer as trainer;

pub use splitmerge_core::{
    Binarization, CategoryVocabulary, Checkpoint, Grammar, GrammarError, Lexicon, LexiconKind,
    Tree, TreeSet, binarize, load_treebank, read_trees,
};
pub use splitmerge_trainer::{
    Corpus, SmoothingMode, TrainingConfig, TrainingOrchestrator, TrainingReport, run_training,
};
