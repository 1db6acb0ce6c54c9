//! # Training Orchestrator
//!
//! Drives the split/merge/smooth cycle. Slots run in the order SPLIT,
//! MERGE, SMOOTH, once per round. Each phase transforms the best model so
//! far, the tree sets are rebuilt for the new substate vector, and an inner
//! EM loop reconverges the model against held-out likelihood. A checkpoint
//! is written after every phase and once more at the end.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use oorandom::Rand64;
use serde::Serialize;
use splitmerge_core::{
    CategoryVocabulary, Checkpoint, Grammar, GrammarMerger, Lexicon, LexiconKind, Tree,
    TreeSet, TreebankOptions, binarize, load_treebank, signature,
};
use tracing::{info, warn};

use crate::config::{SmoothingMode, TrainingConfig};
use crate::convergence::{IterationBounds, Reestimator, StopReason, run_to_convergence};
use crate::em::EmStepEngine;
use crate::error::TrainerError;
use crate::initializer::{InitialModelSettings, SubstateInitializer, initial_model};
use crate::likelihood::LikelihoodEvaluator;

/// The three phase kinds, in slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Split,
    Merge,
    Smooth,
}

impl Phase {
    pub fn of_slot(slot: usize) -> Self {
        match slot % 3 {
            0 => Phase::Split,
            1 => Phase::Merge,
            _ => Phase::Smooth,
        }
    }

    /// Name used in checkpoint file names.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Split => "splitting",
            Phase::Merge => "merging",
            Phase::Smooth => "smoothing",
        }
    }
}

/// A grammar and the lexicon trained with it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub grammar: Grammar,
    pub lexicon: Lexicon,
}

impl TrainedModel {
    pub fn substates(&self) -> &[usize] {
        self.grammar.substates()
    }
}

/// Outcome of one phase and its inner loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// `splitting`, `merging`, `smoothing` or `baseline`.
    pub stage: String,
    pub round: usize,
    pub substates: Vec<usize>,
    /// Held-out likelihood right after the phase transform.
    pub initial_likelihood: f64,
    pub best_likelihood: f64,
    pub iterations: usize,
    pub stop: StopReason,
    pub checkpoint: Option<PathBuf>,
    pub saved: bool,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub stages: Vec<StageReport>,
    pub final_likelihood: f64,
    pub substates: Vec<usize>,
    pub output: PathBuf,
    pub saved: bool,
}

/// Binarized training and validation trees.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub train: Vec<Tree>,
    pub validation: Vec<Tree>,
}

impl Corpus {
    /// Binarize raw trees with the configured markovization.
    pub fn from_raw(config: &TrainingConfig, train: Vec<Tree>, validation: Vec<Tree>) -> Self {
        let bin = |trees: Vec<Tree>| -> Vec<Tree> {
            trees
                .iter()
                .map(|t| {
                    binarize(
                        t,
                        config.vertical_markovization,
                        config.horizontal_markovization,
                        config.binarization,
                    )
                })
                .collect()
        };
        let mut train = bin(train);
        let validation = bin(validation);
        if config.train_on_dev {
            info!(trees = validation.len(), "adding validation trees to the training set");
            train.extend(validation.iter().cloned());
        }
        Self { train, validation }
    }

    /// Read the treebanks named in `config`.
    pub fn load(config: &TrainingConfig) -> Result<Self> {
        let train_path = config
            .train_path
            .as_ref()
            .ok_or_else(|| TrainerError::InvalidConfig("a training treebank is required".into()))?;
        let options = TreebankOptions {
            max_sentence_length: config.max_sentence_length,
            fraction_to_keep: config.train_fraction,
            lowercase: config.lowercase,
            keep_function_labels: config.keep_function_labels,
            ..TreebankOptions::default()
        };
        let train = load_treebank(train_path, &options)
            .with_context(|| format!("reading training treebank {}", train_path.display()))?;
        if train.is_empty() {
            return Err(TrainerError::EmptyTreebank(train_path.display().to_string()).into());
        }
        let validation = match &config.validation_path {
            Some(path) => {
                let options = TreebankOptions {
                    fraction_to_keep: 1.0,
                    ..options
                };
                load_treebank(path, &options)
                    .with_context(|| format!("reading validation treebank {}", path.display()))?
            }
            None => {
                info!("no validation treebank given, validating on the training trees");
                train.clone()
            }
        };
        Ok(Self::from_raw(config, train, validation))
    }
}

/// Re-estimates models against the orchestrator's tree sets.
struct CorpusReestimator<'a> {
    engine: EmStepEngine,
    train: &'a mut TreeSet,
    validation: &'a mut TreeSet,
    rng: &'a mut Rand64,
}

impl Reestimator for CorpusReestimator<'_> {
    type Model = TrainedModel;

    fn validation_likelihood(&mut self, model: &TrainedModel) -> Result<f64> {
        let evaluation =
            LikelihoodEvaluator::new(&model.grammar, &model.lexicon).evaluate(self.validation)?;
        Ok(evaluation.log_likelihood)
    }

    fn reestimate(&mut self, model: &TrainedModel) -> Result<TrainedModel> {
        let (grammar, lexicon, outcome) =
            self.engine
                .em_iteration(&model.grammar, &model.lexicon, self.train, self.rng)?;
        info!(
            training = outcome.log_likelihood,
            unparsable = outcome.unparsable,
            "E-step done"
        );
        Ok(TrainedModel { grammar, lexicon })
    }
}

/// Owns the run state: vocabulary, tree sets, the best model so far and the
/// latest unevaluated candidate.
#[derive(Debug)]
pub struct TrainingOrchestrator {
    config: TrainingConfig,
    output: PathBuf,
    vocabulary: CategoryVocabulary,
    train: TreeSet,
    validation: TreeSet,
    best: TrainedModel,
    best_likelihood: f64,
    candidate: TrainedModel,
    start_slot: usize,
    engine: EmStepEngine,
    rng: Rand64,
}

impl TrainingOrchestrator {
    /// Prepare a run: build or restore the vocabulary, annotate the corpus
    /// and estimate (or load) the starting model.
    pub fn new(config: TrainingConfig, corpus: Corpus) -> Result<Self> {
        config.validate()?;
        let output = config
            .output
            .clone()
            .ok_or_else(|| TrainerError::InvalidConfig("an output path is required".into()))?;
        let mut rng = Rand64::new(u128::from(config.seed));
        info!(seed = config.seed, output = %output.display(), "starting training run");

        let mut vocabulary = CategoryVocabulary::default();
        let (substates, resumed, start_slot) = match &config.resume {
            Some(path) => {
                let checkpoint = Checkpoint::load(path)
                    .with_context(|| format!("loading checkpoint {}", path.display()))?;
                vocabulary.restore(&checkpoint.vocabulary);
                info!(path = %path.display(), substates = checkpoint.grammar.total_substates(), "resuming from checkpoint");
                let start_slot = if config.no_split {
                    info!("will not split the loaded grammar");
                    1
                } else {
                    0
                };
                (
                    checkpoint.grammar.substates().to_vec(),
                    Some(TrainedModel {
                        grammar: checkpoint.grammar,
                        lexicon: checkpoint.lexicon,
                    }),
                    start_slot,
                )
            }
            None => {
                let initializer = SubstateInitializer::new(config.substates, config.baseline);
                let substates =
                    initializer.initialize(&mut vocabulary, &corpus.train, &corpus.validation);
                (substates, None, 0)
            }
        };
        let root = vocabulary
            .root()
            .ok_or_else(|| anyhow!("no tree is rooted in {}", vocabulary.root_label()))?;

        let mut train = TreeSet::build(corpus.train, &substates, &vocabulary)
            .context("annotating training trees")?;
        let validation = TreeSet::build(corpus.validation, &substates, &vocabulary)
            .context("annotating validation trees")?;
        info!(train = train.len(), validation = validation.len(), categories = vocabulary.len(), "annotated corpus");

        if config.lexicon == LexiconKind::Simple {
            info!(threshold = config.rare_word_threshold, "replacing rare training words by their signature");
            train.replace_rare_words(config.rare_word_threshold, signature);
        }

        let model = match resumed {
            Some(model) => model,
            None => {
                let settings = InitialModelSettings {
                    root,
                    lexicon: config.lexicon_params(),
                    filter: config.filter,
                    randomness: config.effective_randomization(),
                    rare_threshold: config.rare_word_threshold as f64,
                };
                let (grammar, lexicon) = initial_model(&train, &settings, &mut rng);
                TrainedModel { grammar, lexicon }
            }
        };

        Ok(Self {
            engine: EmStepEngine::new(config.rare_word_threshold as f64),
            config,
            output,
            vocabulary,
            train,
            validation,
            candidate: model.clone(),
            best: model,
            best_likelihood: f64::NEG_INFINITY,
            start_slot,
            rng,
        })
    }

    pub fn vocabulary(&self) -> &CategoryVocabulary {
        &self.vocabulary
    }

    pub fn best(&self) -> &TrainedModel {
        &self.best
    }

    /// Run every phase, then the final evaluation and save.
    pub fn run(mut self) -> Result<TrainingReport> {
        let mut stages = Vec::new();
        let slots = if self.config.baseline { 0 } else { self.config.rounds * 3 };

        for slot in self.start_slot..slots {
            let phase = Phase::of_slot(slot);
            let round = slot / 3 + 1;
            let bounds = match phase {
                Phase::Split => {
                    if self.config.no_split {
                        continue;
                    }
                    self.split();
                    self.config.split_bounds()
                }
                Phase::Merge => {
                    if self.config.merge_percentage == 0.0 {
                        continue;
                    }
                    self.merge()?;
                    self.config.merge_bounds()
                }
                Phase::Smooth => {
                    if self.config.smoothing == SmoothingMode::None {
                        continue;
                    }
                    self.smooth();
                    self.config.smooth_bounds()
                }
            };
            let path = phase_checkpoint_path(&self.output, round, phase);
            let mut stage = self.converge(phase.name(), round, &bounds)?;
            stage.saved = self.save(&self.best, &path);
            stage.checkpoint = Some(path);
            stages.push(stage);
        }

        if self.config.baseline {
            let bounds = self.config.baseline_bounds();
            stages.push(self.converge("baseline", 0, &bounds)?);
        }

        self.finish(stages)
    }

    /// Double every category's substates, the root excepted.
    fn split(&mut self) {
        info!(substates = self.best.grammar.total_substates(), "splitting");
        let counts = self.train.symbol_counts(self.best.grammar.num_states());
        let randomness = self.config.effective_randomization();
        let allow = self.config.allow_more_substates_than_counts;
        let grammar = self
            .best
            .grammar
            .split_all_states(randomness, &counts, allow, &mut self.rng);
        let lexicon = self
            .best
            .lexicon
            .split_all_states(randomness, &counts, allow, &mut self.rng);
        self.best = TrainedModel { grammar, lexicon };
        info!(
            substates = self.best.grammar.total_substates(),
            "split done; rule probabilities are not renormalized, so the first iteration may score lower"
        );
    }

    /// Merge back the cheapest share of sibling substates, then re-estimate
    /// the lexicon once against the merged model.
    fn merge(&mut self) -> Result<()> {
        let before = self.best.grammar.total_substates();
        let (grammar, lexicon) = {
            let merger = GrammarMerger::new(&self.best.grammar, &self.best.lexicon);
            let weights = merger.compute_merge_weights(&mut self.train)?;
            let deltas = merger.compute_deltas(&mut self.train, &weights)?;
            let lexical = self.train.lexical_states(self.best.grammar.num_states());
            let selected = GrammarMerger::determine_merge_pairs(
                &deltas,
                self.config.separate_merge_threshold,
                self.config.merge_percentage,
                &lexical,
            );
            info!(candidates = deltas.len(), merging = selected.len(), "selected merges");
            merger.apply_merges(&selected, &weights)
        };
        self.train = self.train.rebuild(grammar.substates());
        let (lexicon, outcome) = self
            .engine
            .retrain_lexicon(&grammar, &lexicon, &mut self.train)?;
        info!(
            before,
            after = grammar.total_substates(),
            training = outcome.log_likelihood,
            "merge done"
        );
        self.best = TrainedModel { grammar, lexicon };
        Ok(())
    }

    /// Install sibling smoothing on grammar and lexicon.
    fn smooth(&mut self) {
        info!("setting smoother for grammar and lexicon");
        self.best
            .grammar
            .set_smoother(self.config.smoothing.grammar_smoother());
        self.best
            .lexicon
            .set_smoother(self.config.smoothing.lexicon_smoother());
    }

    fn rebuild_trees(&mut self, substates: &[usize]) {
        if self.train.substates() != substates {
            self.train = self.train.rebuild(substates);
        }
        if self.validation.substates() != substates {
            self.validation = self.validation.rebuild(substates);
        }
    }

    /// Reconverge the best model with the inner EM loop.
    fn converge(&mut self, stage: &str, round: usize, bounds: &IterationBounds) -> Result<StageReport> {
        let substates = self.best.substates().to_vec();
        self.rebuild_trees(&substates);
        let initial = LikelihoodEvaluator::new(&self.best.grammar, &self.best.lexicon)
            .evaluate(&mut self.validation)?
            .log_likelihood;
        info!(stage, round, validation = initial, "phase transform done");

        let mut reestimator = CorpusReestimator {
            engine: self.engine,
            train: &mut self.train,
            validation: &mut self.validation,
            rng: &mut self.rng,
        };
        let converged = run_to_convergence(&mut reestimator, self.best.clone(), initial, bounds)?;
        info!(
            stage,
            round,
            iterations = converged.iterations,
            best = converged.best_likelihood,
            stop = ?converged.stop,
            "inner loop finished"
        );

        self.best = converged.best;
        self.best_likelihood = converged.best_likelihood;
        self.candidate = converged.candidate;
        Ok(StageReport {
            stage: stage.to_string(),
            round,
            substates,
            initial_likelihood: initial,
            best_likelihood: converged.best_likelihood,
            iterations: converged.iterations,
            stop: converged.stop,
            checkpoint: None,
            saved: false,
        })
    }

    /// Evaluate the last candidate once, keep it if it beats the best, and
    /// write the final checkpoint.
    fn finish(mut self, stages: Vec<StageReport>) -> Result<TrainingReport> {
        let substates = self.candidate.substates().to_vec();
        self.rebuild_trees(&substates);
        let last = LikelihoodEvaluator::new(&self.candidate.grammar, &self.candidate.lexicon)
            .evaluate(&mut self.validation)?
            .log_likelihood;
        info!(validation = last, best = self.best_likelihood, "evaluated final iterate");
        if last > self.best_likelihood {
            self.best_likelihood = last;
            self.best = self.candidate.clone();
        }

        let saved = self.save(&self.best, &self.output);
        info!(
            output = %self.output.display(),
            validation = self.best_likelihood,
            "training finished"
        );
        Ok(TrainingReport {
            stages,
            final_likelihood: self.best_likelihood,
            substates: self.best.substates().to_vec(),
            output: self.output.clone(),
            saved,
        })
    }

    /// Write `model` to `path`; failures are logged and reported, not fatal.
    fn save(&self, model: &TrainedModel, path: &Path) -> bool {
        let checkpoint = Checkpoint {
            lexicon: model.lexicon.clone(),
            grammar: model.grammar.clone(),
            vocabulary: self.vocabulary.clone(),
            substates: model.substates().to_vec(),
            vertical: self.config.vertical_markovization,
            horizontal: self.config.horizontal_markovization,
            binarization: self.config.binarization,
        };
        match checkpoint.save(path) {
            Ok(()) => {
                info!(path = %path.display(), "saved grammar");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "saving grammar failed");
                false
            }
        }
    }
}

/// `<output>_<round>_<phase>`.
pub fn phase_checkpoint_path(output: &Path, round: usize, phase: Phase) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(format!("_{round}_{}", phase.name()));
    PathBuf::from(name)
}

/// Validate `config`, load its treebanks and run the whole training.
pub fn run_training(config: TrainingConfig) -> Result<TrainingReport> {
    config.validate()?;
    let corpus = Corpus::load(&config)?;
    TrainingOrchestrator::new(config, corpus)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_through_phases() {
        let phases: Vec<_> = (0..6).map(Phase::of_slot).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Split,
                Phase::Merge,
                Phase::Smooth,
                Phase::Split,
                Phase::Merge,
                Phase::Smooth
            ]
        );
    }

    #[test]
    fn checkpoint_names_carry_round_and_phase() {
        let path = phase_checkpoint_path(Path::new("/tmp/out/grammar"), 2, Phase::Merge);
        assert_eq!(path, PathBuf::from("/tmp/out/grammar_2_merging"));
        let path = phase_checkpoint_path(Path::new("g"), 1, Phase::Smooth);
        assert_eq!(path, PathBuf::from("g_1_smoothing"));
    }

    #[test]
    fn missing_output_fails_before_training() {
        let err = TrainingOrchestrator::new(TrainingConfig::default(), Corpus::default()).unwrap_err();
        assert!(err.to_string().contains("output path"));
    }
}
