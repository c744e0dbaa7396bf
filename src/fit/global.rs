//! Population-based global search.
//!
//! Differential evolution (rand/1/bin) over a fully bounded parameter space.
//! The population loop is deterministic given the seed: trial vectors are
//! generated serially from a seeded RNG and only the (expensive) objective
//! evaluations run on the worker pool. The best member is optionally polished
//! with the bounded local optimizer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::fit::refine::{LocalOptimizer, Objective, OptimizationOutcome, RefineConfig};

/// Configuration for the global search.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Population size as a multiple of the parameter count.
    pub popsize: usize,
    pub max_generations: u64,
    /// Convergence: stop once the population's cost spread falls below
    /// `tol * |mean cost|`.
    pub tol: f64,
    /// Mutation factor dither range.
    pub mutation: (f64, f64),
    /// Crossover probability.
    pub recombination: f64,
    pub seed: u64,
    /// Polish the best member with the local optimizer before returning.
    pub polish: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            popsize: 8,
            max_generations: 300,
            tol: 0.01,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            seed: 0,
            polish: true,
        }
    }
}

/// Minimize `objective` over a bounded space with differential evolution.
///
/// Every dimension must be bounded on both sides; there is no coarse stage to
/// confine an unbounded search.
pub fn differential_evolution(
    objective: &dyn Objective,
    bounds: &[(f64, f64)],
    config: &GlobalConfig,
) -> Result<OptimizationOutcome> {
    let dim = bounds.len();
    if dim == 0 {
        return Err(Error::Config("Global search needs at least one parameter.".to_string()));
    }
    for (i, &(lo, hi)) in bounds.iter().enumerate() {
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return Err(Error::Config(format!(
                "Global search requires finite bounds on every parameter; dimension {i} has ({lo}, {hi})."
            )));
        }
    }
    if config.popsize == 0 {
        return Err(Error::Config("Population multiplier must be > 0.".to_string()));
    }
    if !(0.0..=1.0).contains(&config.recombination) {
        return Err(Error::Config(format!(
            "Recombination probability {} must be within [0, 1].",
            config.recombination
        )));
    }
    let (m_lo, m_hi) = config.mutation;
    if !(m_lo.is_finite() && m_hi.is_finite() && m_lo > 0.0 && m_hi >= m_lo && m_hi < 2.0) {
        return Err(Error::Config(format!(
            "Mutation dither range ({m_lo}, {m_hi}) must satisfy 0 < lo <= hi < 2."
        )));
    }

    let np = (config.popsize * dim).max(4);
    let mut rng = StdRng::seed_from_u64(config.seed);

    // Uniform initialization within the boxes.
    let mut population: Vec<Vec<f64>> = (0..np)
        .map(|_| bounds.iter().map(|&(lo, hi)| rng.gen_range(lo..=hi)).collect())
        .collect();
    let mut costs = evaluate_population(objective, &population)?;
    let mut n_fev = np;

    let mut generations = 0;
    let mut converged = false;

    for _ in 0..config.max_generations {
        generations += 1;

        let f = if m_hi > m_lo { rng.gen_range(m_lo..m_hi) } else { m_lo };

        let mut trials = Vec::with_capacity(np);
        for i in 0..np {
            let (a, b, c) = distinct_indices(&mut rng, np, i);
            let j_rand = rng.gen_range(0..dim);

            let mut trial = population[i].clone();
            for j in 0..dim {
                if j == j_rand || rng.gen_range(0.0..1.0) < config.recombination {
                    let v = population[a][j] + f * (population[b][j] - population[c][j]);
                    trial[j] = v.clamp(bounds[j].0, bounds[j].1);
                }
            }
            trials.push(trial);
        }

        let trial_costs = evaluate_population(objective, &trials)?;
        n_fev += np;

        for i in 0..np {
            if trial_costs[i] <= costs[i] {
                population[i] = trials[i].clone();
                costs[i] = trial_costs[i];
            }
        }

        if cost_spread_converged(&costs, config.tol) {
            converged = true;
            break;
        }
    }

    // First minimum wins on ties.
    let mut best = 0;
    for i in 1..np {
        if costs[i] < costs[best] {
            best = i;
        }
    }
    let mut parameters = population[best].clone();
    let mut cost = costs[best];

    let mut n_iter = generations;
    let mut n_gev = 0;
    let mut message = if converged {
        "Population cost spread below tolerance".to_string()
    } else {
        "Reached maximum generations".to_string()
    };

    if config.polish {
        // A failed polish keeps the (valid) population result.
        if let Ok(polished) =
            LocalOptimizer::new(RefineConfig::default()).minimize(objective, &parameters, bounds)
        {
            n_fev += polished.n_fev;
            n_gev += polished.n_gev;
            n_iter += polished.n_iter;
            if polished.cost < cost {
                parameters = polished.parameters;
                cost = polished.cost;
                message = format!("{message}; polished");
            }
        }
    }

    Ok(OptimizationOutcome { parameters, cost, n_iter, n_fev, n_gev, converged, message })
}

fn evaluate_population(objective: &dyn Objective, members: &[Vec<f64>]) -> Result<Vec<f64>> {
    let costs: Vec<f64> = members
        .par_iter()
        .map(|m| objective.eval(m))
        .collect::<Result<Vec<f64>>>()?;
    // Degenerate members never win selection.
    Ok(costs.into_iter().map(|c| if c.is_finite() { c } else { f64::INFINITY }).collect())
}

fn distinct_indices(rng: &mut StdRng, np: usize, exclude: usize) -> (usize, usize, usize) {
    let mut pick = |taken: &[usize]| loop {
        let i = rng.gen_range(0..np);
        if i != exclude && !taken.contains(&i) {
            return i;
        }
    };
    let a = pick(&[]);
    let b = pick(&[a]);
    let c = pick(&[a, b]);
    (a, b, c)
}

fn cost_spread_converged(costs: &[f64], tol: f64) -> bool {
    if costs.iter().any(|c| !c.is_finite()) {
        return false;
    }
    let mean = costs.iter().sum::<f64>() / costs.len() as f64;
    let var = costs.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / costs.len() as f64;
    var.sqrt() <= tol * mean.abs()
}
