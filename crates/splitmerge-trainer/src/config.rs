//! # Training Configuration
//!
//! Every knob of a training run. [`TrainingConfig::default`] carries the
//! same defaults as the `train` command line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use splitmerge_core::{Binarization, LexiconKind, LexiconParams, Smoother};

use crate::convergence::IterationBounds;
use crate::error::TrainerError;

/// Strength of the grammar smoother installed by the SMOOTH phase.
pub const GRAMMAR_SMOOTHING: f64 = 0.01;
/// Strength of the lexicon smoother installed by the SMOOTH phase.
pub const LEXICON_SMOOTHING: f64 = 0.1;

/// Smoothing applied in the SMOOTH phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmoothingMode {
    /// Pull sibling substates (same split parent) towards each other.
    #[default]
    AcrossParentBits,
    /// Skip every SMOOTH phase.
    None,
}

impl SmoothingMode {
    pub fn grammar_smoother(self) -> Smoother {
        match self {
            SmoothingMode::AcrossParentBits => Smoother::across_parent_bits(GRAMMAR_SMOOTHING),
            SmoothingMode::None => Smoother::None,
        }
    }

    pub fn lexicon_smoother(self) -> Smoother {
        match self {
            SmoothingMode::AcrossParentBits => Smoother::across_parent_bits(LEXICON_SMOOTHING),
            SmoothingMode::None => Smoother::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Base path of every checkpoint written. Required.
    pub output: Option<PathBuf>,
    pub train_path: Option<PathBuf>,
    /// Held-out treebank; the training trees are used when absent.
    pub validation_path: Option<PathBuf>,
    /// Continue from this checkpoint instead of the MLE baseline.
    pub resume: Option<PathBuf>,
    /// Number of split/merge/smooth cycles.
    pub rounds: usize,
    /// Share of candidate merges to accept; 0 disables merging.
    pub merge_percentage: f64,
    /// Budget merges of lexical and phrasal categories separately.
    pub separate_merge_threshold: bool,
    pub split_max_iterations: usize,
    pub split_min_iterations: usize,
    pub merge_max_iterations: usize,
    pub merge_min_iterations: usize,
    /// Both the minimum and the maximum for SMOOTH phases.
    pub smooth_max_iterations: usize,
    /// Non-improving iterations tolerated before an inner loop stops.
    pub patience: usize,
    pub smoothing: SmoothingMode,
    /// Initial substates per category (the root always has one).
    pub substates: usize,
    pub vertical_markovization: usize,
    pub horizontal_markovization: usize,
    pub binarization: Binarization,
    pub seed: u64,
    /// Percent of noise added when splitting and initializing.
    pub randomization: f64,
    /// Rule and emission probabilities under this are pruned.
    pub filter: f64,
    /// Words seen fewer times feed the unknown-word model.
    pub rare_word_threshold: usize,
    /// Words seen more often than this skip signature smoothing.
    pub really_rare_threshold: usize,
    pub word_smoothing: f64,
    pub signature_smoothing: f64,
    pub lexicon: LexiconKind,
    pub max_sentence_length: usize,
    pub train_fraction: f64,
    /// Append the validation trees to the training set.
    pub train_on_dev: bool,
    pub lowercase: bool,
    /// Keep function tags (`NP-SBJ`) as distinct categories.
    pub keep_function_labels: bool,
    /// Train only the one-substate MLE grammar.
    pub baseline: bool,
    /// Skip every SPLIT phase.
    pub no_split: bool,
    pub allow_more_substates_than_counts: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output: None,
            train_path: None,
            validation_path: None,
            resume: None,
            rounds: 6,
            merge_percentage: 0.5,
            separate_merge_threshold: false,
            split_max_iterations: 50,
            split_min_iterations: 50,
            merge_max_iterations: 20,
            merge_min_iterations: 20,
            smooth_max_iterations: 10,
            patience: 6,
            smoothing: SmoothingMode::AcrossParentBits,
            substates: 1,
            vertical_markovization: 1,
            horizontal_markovization: 0,
            binarization: Binarization::Right,
            seed: 2,
            randomization: 1.0,
            filter: 1.0e-30,
            rare_word_threshold: 20,
            really_rare_threshold: 10,
            word_smoothing: 0.5,
            signature_smoothing: 0.1,
            lexicon: LexiconKind::Sophisticated,
            max_sentence_length: 10_000,
            train_fraction: 1.0,
            train_on_dev: false,
            lowercase: false,
            keep_function_labels: false,
            baseline: false,
            no_split: false,
            allow_more_substates_than_counts: false,
        }
    }
}

impl TrainingConfig {
    /// Check the invariants a run depends on.
    pub fn validate(&self) -> Result<(), TrainerError> {
        if self.output.as_ref().is_none_or(|p| p.as_os_str().is_empty()) {
            return Err(TrainerError::InvalidConfig(
                "an output path is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.merge_percentage) {
            return Err(TrainerError::InvalidConfig(format!(
                "merge percentage ({}) must lie in [0, 1]",
                self.merge_percentage
            )));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(TrainerError::InvalidConfig(format!(
                "train fraction ({}) must lie in (0, 1]",
                self.train_fraction
            )));
        }
        if self.substates == 0 {
            return Err(TrainerError::InvalidConfig(
                "initial substate count must be at least 1".into(),
            ));
        }
        if self.vertical_markovization == 0 {
            return Err(TrainerError::InvalidConfig(
                "vertical markovization order must be at least 1".into(),
            ));
        }
        if self.randomization < 0.0 {
            return Err(TrainerError::InvalidConfig(format!(
                "randomization ({}) must not be negative",
                self.randomization
            )));
        }
        Ok(())
    }

    /// Noise used for initialization and splits; zero in baseline mode.
    pub fn effective_randomization(&self) -> f64 {
        if self.baseline { 0.0 } else { self.randomization }
    }

    pub fn lexicon_params(&self) -> LexiconParams {
        LexiconParams {
            kind: self.lexicon,
            word_smoothing: self.word_smoothing,
            signature_smoothing: self.signature_smoothing,
            smoothing_cutoff: self.really_rare_threshold as f64,
            threshold: self.filter,
        }
    }

    pub fn split_bounds(&self) -> IterationBounds {
        IterationBounds {
            min: self.split_min_iterations,
            max: self.split_max_iterations,
            patience: self.patience,
            single_pass: false,
        }
    }

    pub fn merge_bounds(&self) -> IterationBounds {
        IterationBounds {
            min: self.merge_min_iterations,
            max: self.merge_max_iterations,
            patience: self.patience,
            single_pass: false,
        }
    }

    pub fn smooth_bounds(&self) -> IterationBounds {
        IterationBounds {
            min: self.smooth_max_iterations,
            max: self.smooth_max_iterations,
            patience: self.patience,
            single_pass: false,
        }
    }

    pub fn baseline_bounds(&self) -> IterationBounds {
        IterationBounds {
            min: 0,
            max: 1,
            patience: self.patience,
            single_pass: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_output() -> TrainingConfig {
        TrainingConfig {
            output: Some(PathBuf::from("grammar")),
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn defaults_validate_once_output_is_set() {
        assert!(with_output().validate().is_ok());
    }

    #[test]
    fn missing_output_is_rejected() {
        let err = TrainingConfig::default().validate().unwrap_err();
        assert!(matches!(
            err,
            TrainerError::InvalidConfig(message) if message.contains("output path")
        ));
        let empty = TrainingConfig {
            output: Some(PathBuf::new()),
            ..TrainingConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn merge_percentage_out_of_range_is_rejected() {
        let cfg = TrainingConfig {
            merge_percentage: 1.5,
            ..with_output()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn baseline_disables_randomization() {
        let cfg = TrainingConfig {
            baseline: true,
            ..with_output()
        };
        assert_eq!(cfg.effective_randomization(), 0.0);
        assert_eq!(with_output().effective_randomization(), 1.0);
    }

    #[test]
    fn smooth_phase_uses_cap_for_both_bounds() {
        let bounds = with_output().smooth_bounds();
        assert_eq!(bounds.min, 10);
        assert_eq!(bounds.max, 10);
    }

    #[test]
    fn config_serializes() {
        let json = serde_json::to_string(&with_output()).unwrap();
        let back: TrainingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, with_output());
    }
}
