// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Parameter Tuning Support

//! Fitness and mutation hooks for an external parameter search.
//!
//! The searcher itself lives outside this crate; it only needs a way to
//! score a parameter vector on a freshly built network and a way to perturb
//! one.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OptimizationParams;
use crate::error::{ConfigError, NetworkError};
use crate::simulation::Simulation;

/// Voltage scale of the drift term in [`objective`].
pub const BASE_VOLTAGE: f64 = 1.0;
/// Power scale of the drift term in [`objective`].
pub const BASE_POWER: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningParameters {
    pub initial_alpha: f64,
    pub alpha_multiplier: f64,
    pub lambda_multiplier: f64,
    pub initial_epsilon: f64,
    pub epsilon_multiplier: f64,
}

impl TuningParameters {
    pub const LEN: usize = 5;

    /// Parameters currently set on the first agent of `simulation`.
    pub fn from_simulation(simulation: &Simulation) -> Option<Self> {
        simulation
            .agents()
            .first()
            .map(|agent| Self::from_params(agent.state().params()))
    }

    pub fn from_params(params: &OptimizationParams) -> Self {
        Self {
            initial_alpha: params.alpha,
            alpha_multiplier: params.alpha_multiplier,
            lambda_multiplier: params.lambda_multiplier,
            initial_epsilon: params.epsilon,
            epsilon_multiplier: params.epsilon_multiplier,
        }
    }

    /// [α₀, αMultiplier, λMultiplier, ε₀, εMultiplier]
    pub fn to_vector(&self) -> [f64; Self::LEN] {
        [
            self.initial_alpha,
            self.alpha_multiplier,
            self.lambda_multiplier,
            self.initial_epsilon,
            self.epsilon_multiplier,
        ]
    }

    pub fn from_vector(values: &[f64]) -> Result<Self, ConfigError> {
        match values {
            &[initial_alpha, alpha_multiplier, lambda_multiplier, initial_epsilon, epsilon_multiplier] => {
                Ok(Self {
                    initial_alpha,
                    alpha_multiplier,
                    lambda_multiplier,
                    initial_epsilon,
                    epsilon_multiplier,
                })
            }
            _ => Err(ConfigError::WrongLength { expected: Self::LEN, found: values.len() }),
        }
    }

    /// Overlay onto `base`, keeping its clamps.
    pub fn apply_to(&self, base: OptimizationParams) -> OptimizationParams {
        OptimizationParams {
            alpha: self.initial_alpha,
            alpha_multiplier: self.alpha_multiplier,
            lambda_multiplier: self.lambda_multiplier,
            epsilon: self.initial_epsilon,
            epsilon_multiplier: self.epsilon_multiplier,
            ..base
        }
    }

    /// Random perturbation kept inside the valid region.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn mutate<R: rand::Rng>(&self, rng: &mut R) -> Self {
        let mut jitter = |scale: f64| (1.0 - 2.0 * rng.gen::<f64>()) * scale;
        Self {
            initial_alpha: (self.initial_alpha + jitter(0.1)).max(1e-6),
            alpha_multiplier: (self.alpha_multiplier + jitter(0.001)).max(1.000001),
            lambda_multiplier: (self.lambda_multiplier + jitter(0.1)).max(1e-3),
            initial_epsilon: (self.initial_epsilon + jitter(0.1)).max(1.0),
            epsilon_multiplier: (self.epsilon_multiplier + jitter(0.01)).min(0.99999),
        }
    }
}

/// Score `params` on a network from `factory` after `iterations` global
/// iterations. Lower is better; `f64::MAX` when the network cannot be built,
/// the parameters are rejected or the run diverges.
pub fn objective<F>(factory: F, params: &TuningParameters, iterations: usize) -> f64
where
    F: Fn() -> Result<Simulation, NetworkError>,
{
    let mut simulation = match factory() {
        Ok(simulation) => simulation,
        Err(err) => {
            debug!(%err, "objective: network factory failed");
            return f64::MAX;
        }
    };
    let base = simulation
        .agents()
        .first()
        .map(|agent| *agent.state().params())
        .unwrap_or_default();
    if let Err(err) = simulation.set_params(params.apply_to(base)) {
        debug!(%err, "objective: parameters rejected");
        return f64::MAX;
    }
    simulation.run(iterations).convergence_score(BASE_VOLTAGE, BASE_POWER)
}
