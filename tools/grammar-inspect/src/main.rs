use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use splitmerge_core::{
    CategoryVocabulary, Checkpoint, Smoother, TreeSet, TreebankOptions, binarize, load_treebank,
};
use splitmerge_trainer::LikelihoodEvaluator;

/// Summarize a trained grammar checkpoint
#[derive(Parser)]
#[command(name = "grammar-inspect")]
struct Cli {
    /// Checkpoint written by `train`
    checkpoint: PathBuf,

    /// Score this treebank with the checkpoint
    #[arg(long)]
    treebank: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct CategorySummary {
    id: usize,
    label: String,
    substates: usize,
}

#[derive(Debug, Serialize)]
struct TreebankSummary {
    path: PathBuf,
    trees: usize,
    scored: usize,
    unparsable: usize,
    log_likelihood: f64,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    checkpoint: PathBuf,
    categories: Vec<CategorySummary>,
    total_substates: usize,
    rules: usize,
    smoothing: Option<f64>,
    vertical: usize,
    horizontal: usize,
    treebank: Option<TreebankSummary>,
}

fn strength(smoother: Smoother) -> Option<f64> {
    match smoother {
        Smoother::None => None,
        Smoother::AcrossParentBits { strength } => Some(strength),
    }
}

fn score_treebank(checkpoint: &Checkpoint, path: &Path) -> Result<TreebankSummary> {
    let mut vocabulary = CategoryVocabulary::default();
    vocabulary.restore(&checkpoint.vocabulary);
    let options = TreebankOptions {
        root_label: vocabulary.root_label().to_string(),
        ..TreebankOptions::default()
    };
    let trees: Vec<_> = load_treebank(path, &options)
        .with_context(|| format!("reading treebank {}", path.display()))?
        .iter()
        .map(|t| {
            binarize(
                t,
                checkpoint.vertical,
                checkpoint.horizontal,
                checkpoint.binarization,
            )
        })
        .collect();
    let count = trees.len();
    let mut trees = TreeSet::build(trees, &checkpoint.substates, &vocabulary)
        .context("treebank uses categories the grammar has never seen")?;
    let evaluation = LikelihoodEvaluator::new(&checkpoint.grammar, &checkpoint.lexicon)
        .evaluate(&mut trees)?;
    Ok(TreebankSummary {
        path: path.to_path_buf(),
        trees: count,
        scored: evaluation.scored,
        unparsable: evaluation.unparsable,
        log_likelihood: evaluation.log_likelihood,
    })
}

fn inspect(cli: &Cli) -> Result<InspectOutput> {
    let checkpoint = Checkpoint::load(&cli.checkpoint)
        .with_context(|| format!("loading checkpoint {}", cli.checkpoint.display()))?;
    let categories = checkpoint
        .vocabulary
        .iter()
        .map(|(id, label)| CategorySummary {
            id,
            label: label.to_string(),
            substates: checkpoint.substates.get(id).copied().unwrap_or(0),
        })
        .collect();
    let treebank = match &cli.treebank {
        Some(path) => Some(score_treebank(&checkpoint, path)?),
        None => None,
    };
    Ok(InspectOutput {
        checkpoint: cli.checkpoint.clone(),
        categories,
        total_substates: checkpoint.grammar.total_substates(),
        rules: checkpoint.grammar.num_rules(),
        smoothing: strength(checkpoint.grammar.smoother()),
        vertical: checkpoint.vertical,
        horizontal: checkpoint.horizontal,
        treebank,
    })
}

fn print_table(output: &InspectOutput) {
    println!("{}", output.checkpoint.display());
    println!(
        "  markovization v={} h={}, {} rules, smoothing {}",
        output.vertical,
        output.horizontal,
        output.rules,
        output
            .smoothing
            .map_or_else(|| "off".to_string(), |s| s.to_string())
    );
    for category in &output.categories {
        println!(
            "  {:>4}  {:<24} {:>3}",
            category.id, category.label, category.substates
        );
    }
    println!("  total substates: {}", output.total_substates);
    if let Some(tb) = &output.treebank {
        println!(
            "  {}: {} trees, {} scored, {} unparsable, log-likelihood {:.4}",
            tb.path.display(),
            tb.trees,
            tb.scored,
            tb.unparsable,
            tb.log_likelihood
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();
    let cli = Cli::parse();
    let output = inspect(&cli)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_table(&output);
    }
    Ok(())
}
