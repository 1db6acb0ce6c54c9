//! # Splitmerge Trainer
//!
//! The split/merge/smooth training loop for latent-annotation grammars.
//! [`TrainingOrchestrator`] alternates model transformations with an inner
//! EM loop ([`convergence`]) built on [`EmStepEngine`] and
//! [`LikelihoodEvaluator`], writing a checkpoint after every phase.

pub mod config;
pub mod convergence;
pub mod em;
pub mod error;
pub mod initializer;
pub mod likelihood;
pub mod orchestrator;

pub use config::{SmoothingMode, TrainingConfig};
pub use convergence::{Converged, IterationBounds, Reestimator, StopReason, run_to_convergence};
pub use em::{EStepOutcome, EmStepEngine};
pub use error::TrainerError;
pub use initializer::{InitialModelSettings, SubstateInitializer, initial_model};
pub use likelihood::{Evaluation, LikelihoodEvaluator};
pub use orchestrator::{
    Corpus, Phase, StageReport, TrainedModel, TrainingOrchestrator, TrainingReport,
    phase_checkpoint_path, run_training,
};
