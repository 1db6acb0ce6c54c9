//! Train a latent-annotation grammar with split/merge/smooth EM.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use splitmerge_core::{Binarization, LexiconKind};
use splitmerge_trainer::{SmoothingMode, TrainingConfig, run_training};
use tracing::Level;

#[derive(Clone, Copy, ValueEnum)]
enum SmoothingArg {
    AcrossParentBits,
    None,
}

#[derive(Clone, Copy, ValueEnum)]
enum BinarizationArg {
    Right,
    Left,
}

#[derive(Clone, Copy, ValueEnum)]
enum LexiconArg {
    Sophisticated,
    Simple,
}

/// CLI arguments
#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Train a split/merge latent-annotation PCFG from a treebank")]
#[command(version)]
struct Cli {
    /// Output grammar base path (phase checkpoints get `_<round>_<phase>`)
    #[arg(short, long)]
    out: PathBuf,

    /// Training treebank (bracketed trees)
    #[arg(short, long)]
    train: PathBuf,

    /// Validation treebank; defaults to the training trees
    #[arg(long)]
    validation: Option<PathBuf>,

    /// Number of split/merge/smooth rounds
    #[arg(long, default_value_t = 6)]
    rounds: usize,

    /// Share of splits to merge back each round
    #[arg(long, default_value_t = 0.5)]
    merge_percentage: f64,

    /// Merge lexical and phrasal categories under separate budgets
    #[arg(long)]
    separate_merge_threshold: bool,

    #[arg(long, default_value_t = 50)]
    split_max_it: usize,

    #[arg(long, default_value_t = 50)]
    split_min_it: usize,

    #[arg(long, default_value_t = 20)]
    merge_max_it: usize,

    #[arg(long, default_value_t = 20)]
    merge_min_it: usize,

    #[arg(long, default_value_t = 10)]
    smooth_max_it: usize,

    /// Iterations without validation improvement before stopping
    #[arg(long, default_value_t = 6)]
    patience: usize,

    #[arg(long, value_enum, default_value = "across-parent-bits")]
    smoothing: SmoothingArg,

    /// Initial number of substates per category
    #[arg(long, default_value_t = 1)]
    substates: usize,

    /// Vertical markovization order
    #[arg(long, default_value_t = 1)]
    vertical: usize,

    /// Horizontal markovization order
    #[arg(long, default_value_t = 0)]
    horizontal: usize,

    #[arg(long, value_enum, default_value = "right")]
    binarization: BinarizationArg,

    #[arg(long, default_value_t = 2)]
    seed: u64,

    /// Percent of noise when splitting
    #[arg(long, default_value_t = 1.0)]
    randomization: f64,

    /// Prune probabilities under this value
    #[arg(long, default_value_t = 1.0e-30)]
    filter: f64,

    /// Words seen fewer times train the unknown-word model
    #[arg(long, default_value_t = 20)]
    rare: usize,

    /// Words seen more often skip signature smoothing
    #[arg(long, default_value_t = 10)]
    really_rare: usize,

    #[arg(long, default_value_t = 0.5)]
    sm1: f64,

    #[arg(long, default_value_t = 0.1)]
    sm2: f64,

    #[arg(long, value_enum, default_value = "sophisticated")]
    lexicon: LexiconArg,

    /// Skip sentences longer than this
    #[arg(long, default_value_t = 10_000)]
    max_length: usize,

    /// Leading fraction of the training treebank to use
    #[arg(long, default_value_t = 1.0)]
    train_fraction: f64,

    /// Also train on the validation trees
    #[arg(long)]
    train_on_dev: bool,

    #[arg(long)]
    lowercase: bool,

    /// Keep function tags (NP-SBJ) instead of stripping them
    #[arg(long)]
    keep_function_labels: bool,

    /// Only estimate the one-substate baseline grammar
    #[arg(long)]
    baseline: bool,

    /// Continue training from this checkpoint
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Never split (useful with --resume)
    #[arg(long)]
    no_split: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl From<Cli> for TrainingConfig {
    fn from(cli: Cli) -> Self {
        Self {
            output: Some(cli.out),
            train_path: Some(cli.train),
            validation_path: cli.validation,
            resume: cli.resume,
            rounds: cli.rounds,
            merge_percentage: cli.merge_percentage,
            separate_merge_threshold: cli.separate_merge_threshold,
            split_max_iterations: cli.split_max_it,
            split_min_iterations: cli.split_min_it,
            merge_max_iterations: cli.merge_max_it,
            merge_min_iterations: cli.merge_min_it,
            smooth_max_iterations: cli.smooth_max_it,
            patience: cli.patience,
            smoothing: match cli.smoothing {
                SmoothingArg::AcrossParentBits => SmoothingMode::AcrossParentBits,
                SmoothingArg::None => SmoothingMode::None,
            },
            substates: cli.substates,
            vertical_markovization: cli.vertical,
            horizontal_markovization: cli.horizontal,
            binarization: match cli.binarization {
                BinarizationArg::Right => Binarization::Right,
                BinarizationArg::Left => Binarization::Left,
            },
            seed: cli.seed,
            randomization: cli.randomization,
            filter: cli.filter,
            rare_word_threshold: cli.rare,
            really_rare_threshold: cli.really_rare,
            word_smoothing: cli.sm1,
            signature_smoothing: cli.sm2,
            lexicon: match cli.lexicon {
                LexiconArg::Sophisticated => LexiconKind::Sophisticated,
                LexiconArg::Simple => LexiconKind::Simple,
            },
            max_sentence_length: cli.max_length,
            train_fraction: cli.train_fraction,
            train_on_dev: cli.train_on_dev,
            lowercase: cli.lowercase,
            keep_function_labels: cli.keep_function_labels,
            baseline: cli.baseline,
            no_split: cli.no_split,
            allow_more_substates_than_counts: false,
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let report = run_training(cli.into())?;
    for stage in &report.stages {
        println!(
            "round {} {:<10} iterations {:>3}  best {:.4}  ({:?})",
            stage.round, stage.stage, stage.iterations, stage.best_likelihood, stage.stop
        );
    }
    println!(
        "final validation log-likelihood {:.4}, {} substates, saved to {}{}",
        report.final_likelihood,
        report.substates.iter().sum::<usize>(),
        report.output.display(),
        if report.saved { "" } else { " (FAILED)" }
    );
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Training failed: {:#}", e);
        std::process::exit(1);
    }
}
