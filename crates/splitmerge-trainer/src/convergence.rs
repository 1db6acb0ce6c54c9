//! # Inner EM Loop
//!
//! Re-estimates a model until held-out likelihood stops improving. Each
//! iteration scores the *previous* iterate on held-out data, derives the
//! next candidate from it, and decides whether the previous iterate is the
//! best seen so far. The loop keeps two named slots: the best iterate and
//! the latest, not yet evaluated candidate.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Iteration limits of one inner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationBounds {
    /// The first `min` iterations always accept their iterate as the best.
    pub min: usize,
    pub max: usize,
    /// Stop after this many consecutive iterations without improvement.
    pub patience: usize,
    /// Run exactly one iteration.
    pub single_pass: bool,
}

/// Why an inner loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Patience,
    MaxIterations,
    SinglePass,
}

/// Evaluation and re-estimation of one kind of model.
pub trait Reestimator {
    type Model: Clone;

    /// Held-out log-likelihood of `model`.
    fn validation_likelihood(&mut self, model: &Self::Model) -> Result<f64>;

    /// One E-step and M-step starting from `model`.
    fn reestimate(&mut self, model: &Self::Model) -> Result<Self::Model>;
}

/// Result of [`run_to_convergence`].
#[derive(Debug, Clone)]
pub struct Converged<M> {
    pub best: M,
    pub best_likelihood: f64,
    /// The last re-estimated model, never scored on held-out data.
    pub candidate: M,
    pub iterations: usize,
    pub stop: StopReason,
    /// Held-out likelihood observed at each iteration.
    pub history: Vec<f64>,
}

/// Run the inner loop from `start`, whose held-out likelihood is
/// `initial_likelihood`.
pub fn run_to_convergence<R: Reestimator>(
    reestimator: &mut R,
    start: R::Model,
    initial_likelihood: f64,
    bounds: &IterationBounds,
) -> Result<Converged<R::Model>> {
    let mut best = start.clone();
    let mut best_likelihood = initial_likelihood;
    let mut previous = start;
    let mut dropping = 0;
    let mut completed = 0;
    let mut history = Vec::new();

    let stop = loop {
        let likelihood = reestimator.validation_likelihood(&previous)?;
        history.push(likelihood);
        let candidate = reestimator.reestimate(&previous)?;

        if completed < bounds.min || likelihood >= best_likelihood {
            best_likelihood = likelihood;
            best = std::mem::replace(&mut previous, candidate);
            dropping = 0;
        } else {
            previous = candidate;
            dropping += 1;
        }
        completed += 1;
        info!(
            iteration = completed - 1,
            validation = likelihood,
            best = best_likelihood,
            dropping,
            "finished EM iteration"
        );

        if bounds.single_pass {
            break StopReason::SinglePass;
        }
        if dropping >= bounds.patience && completed >= bounds.min {
            break StopReason::Patience;
        }
        if completed >= bounds.max {
            break StopReason::MaxIterations;
        }
    };

    Ok(Converged {
        best,
        best_likelihood,
        candidate: previous,
        iterations: completed,
        stop,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Iterates are numbered; iterate `k` scores `likelihoods[k]`.
    struct Scripted {
        likelihoods: Vec<f64>,
        steps: usize,
    }

    impl Reestimator for Scripted {
        type Model = usize;

        fn validation_likelihood(&mut self, model: &usize) -> Result<f64> {
            Ok(self.likelihoods.get(*model).copied().unwrap_or(f64::NEG_INFINITY))
        }

        fn reestimate(&mut self, model: &usize) -> Result<usize> {
            self.steps += 1;
            Ok(model + 1)
        }
    }

    fn scripted(likelihoods: &[f64]) -> Scripted {
        Scripted {
            likelihoods: likelihoods.to_vec(),
            steps: 0,
        }
    }

    #[test]
    fn patience_after_minimum_floor() {
        let mut r = scripted(&[10.0, 12.0, 9.0, 8.0, 13.0, 7.0, 6.0, 5.0]);
        let bounds = IterationBounds {
            min: 3,
            max: 10,
            patience: 2,
            single_pass: false,
        };
        let out = run_to_convergence(&mut r, 0, 10.0, &bounds).unwrap();
        assert_eq!(out.iterations, 7);
        assert_eq!(out.stop, StopReason::Patience);
        assert_eq!(out.best, 4);
        assert_eq!(out.best_likelihood, 13.0);
        assert_eq!(out.candidate, 7);
        assert_eq!(out.history, vec![10.0, 12.0, 9.0, 8.0, 13.0, 7.0, 6.0]);
    }

    #[test]
    fn maximum_caps_iterations() {
        let mut r = scripted(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let bounds = IterationBounds {
            min: 0,
            max: 3,
            patience: 2,
            single_pass: false,
        };
        let out = run_to_convergence(&mut r, 0, 1.0, &bounds).unwrap();
        assert_eq!(out.iterations, 3);
        assert_eq!(out.stop, StopReason::MaxIterations);
        assert_eq!(out.best, 2);
        assert_eq!(r.steps, 3);
    }

    #[test]
    fn single_pass_runs_once() {
        let mut r = scripted(&[5.0, 100.0]);
        let bounds = IterationBounds {
            min: 0,
            max: 50,
            patience: 6,
            single_pass: true,
        };
        let out = run_to_convergence(&mut r, 0, 5.0, &bounds).unwrap();
        assert_eq!(out.iterations, 1);
        assert_eq!(out.stop, StopReason::SinglePass);
        assert_eq!(out.best, 0);
        assert_eq!(out.candidate, 1);
    }

    #[test]
    fn ties_count_as_improvement() {
        let mut r = scripted(&[3.0, 3.0, 3.0, 2.0, 1.0]);
        let bounds = IterationBounds {
            min: 0,
            max: 10,
            patience: 2,
            single_pass: false,
        };
        let out = run_to_convergence(&mut r, 0, 3.0, &bounds).unwrap();
        assert_eq!(out.best, 2);
        assert_eq!(out.iterations, 5);
    }

    #[test]
    fn floor_accepts_worse_iterates() {
        let mut r = scripted(&[10.0, 5.0, 1.0, 0.0, 0.0]);
        let bounds = IterationBounds {
            min: 3,
            max: 10,
            patience: 2,
            single_pass: false,
        };
        let out = run_to_convergence(&mut r, 0, 10.0, &bounds).unwrap();
        assert_eq!(out.best, 2);
        assert_eq!(out.best_likelihood, 1.0);
        // 0.0 < 1.0 twice
        assert_eq!(out.iterations, 5);
    }
}
