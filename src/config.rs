// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Configuration

//! Tunables for the optimizer and the simulation driver.
//!
//! Everything here is plain serde data with defaults matching the reference
//! scenarios, so a network description can be round-tripped through JSON.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// OptimizationParams
// ---------------------------------------------------------------------------

/// Per-agent dual and penalty schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationParams {
    /// Initial penalty weight α.
    pub alpha: f64,
    /// Upper clamp on α.
    pub alpha_max: f64,
    /// Growth factor applied to α on every dual step (≥ 1).
    pub alpha_multiplier: f64,
    /// Symmetric clamp on λ±.
    pub lambda_max: f64,
    /// Scale of the dual ascent step λ += m·α·g.
    pub lambda_multiplier: f64,
    /// Initial inner-loop gradient tolerance ε.
    pub epsilon: f64,
    /// Decay applied to ε once per optimization pass, in (0, 1].
    pub epsilon_multiplier: f64,
}

impl Default for OptimizationParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            alpha_max: 1e24,
            alpha_multiplier: 1.0,
            lambda_max: 1000.0,
            lambda_multiplier: 1.0,
            epsilon: 10.0,
            epsilon_multiplier: 0.999,
        }
    }
}

impl OptimizationParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("alpha", self.alpha)?;
        positive("alpha_max", self.alpha_max)?;
        if self.alpha > self.alpha_max {
            return Err(ConfigError::OutOfRange {
                field: "alpha",
                value: self.alpha,
                expected: "at most alpha_max",
            });
        }
        if !(self.alpha_multiplier >= 1.0) || !self.alpha_multiplier.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "alpha_multiplier",
                value: self.alpha_multiplier,
                expected: ">= 1",
            });
        }
        positive("lambda_max", self.lambda_max)?;
        positive("lambda_multiplier", self.lambda_multiplier)?;
        positive("epsilon", self.epsilon)?;
        if !(self.epsilon_multiplier > 0.0 && self.epsilon_multiplier <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "epsilon_multiplier",
                value: self.epsilon_multiplier,
                expected: "in (0, 1]",
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimulationConfig
// ---------------------------------------------------------------------------

/// Driver-wide settings shared by every agent of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Read neighbors from the exchanged cache; `false` evaluates them live.
    pub use_cache: bool,
    /// Completion threshold on the consensus convergence estimate.
    pub convergence_target: f64,
    /// Consensus gain ξ of the convergence gossip.
    pub consensus_gain: f64,
    /// Starting value of h̄ and of the previous raw measure.
    pub initial_convergence_estimate: f64,
    /// Inner descent iterations per axis.
    pub max_axis_iterations: usize,
    /// Inner descent stops once a step moves the state less than this.
    pub min_displacement: f64,
    /// First trial step of the backtracking line search.
    pub initial_step: f64,
    /// Line search gives up once ‖g‖·s drops to this.
    pub min_step: f64,
    /// Dual steps are skipped while both residuals are under max(this, ε).
    pub dual_step_floor: f64,
    /// Quadratic cost coefficient A of voltage sources (cost = A·P²).
    pub voltage_source_cost: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            convergence_target: 1e-3,
            consensus_gain: 0.1,
            initial_convergence_estimate: 1.0,
            max_axis_iterations: 100,
            min_displacement: 1e-6,
            initial_step: 2.0,
            min_step: 1e-24,
            dual_step_floor: 1e-3,
            voltage_source_cost: 0.01,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("convergence_target", self.convergence_target)?;
        if !(self.consensus_gain > 0.0 && self.consensus_gain < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "consensus_gain",
                value: self.consensus_gain,
                expected: "in (0, 1)",
            });
        }
        if !self.initial_convergence_estimate.is_finite() {
            return Err(ConfigError::NotFinite {
                field: "initial_convergence_estimate",
            });
        }
        if self.max_axis_iterations == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_axis_iterations",
                value: 0.0,
                expected: "at least 1",
            });
        }
        positive("min_displacement", self.min_displacement)?;
        positive("initial_step", self.initial_step)?;
        positive("min_step", self.min_step)?;
        positive("dual_step_floor", self.dual_step_floor)?;
        if !(self.voltage_source_cost >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "voltage_source_cost",
                value: self.voltage_source_cost,
                expected: ">= 0",
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NotFinite { field });
    }
    if value <= 0.0 {
        return Err(ConfigError::NonPositive { field, value });
    }
    Ok(())
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        OptimizationParams::default().validate().expect("test: default params");
        SimulationConfig::default().validate().expect("test: default config");
    }

    #[test]
    fn rejects_shrinking_alpha() {
        let params = OptimizationParams { alpha_multiplier: 0.5, ..Default::default() };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::OutOfRange { field: "alpha_multiplier", .. })
        ));
    }

    #[test]
    fn rejects_non_positive_lambda_multiplier() {
        let params = OptimizationParams { lambda_multiplier: 0.0, ..Default::default() };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::NonPositive { field: "lambda_multiplier", .. })
        ));
    }

    #[test]
    fn rejects_nan_tolerance() {
        let config = SimulationConfig { min_step: f64::NAN, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NotFinite { field: "min_step" })));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let params: OptimizationParams =
            serde_json::from_str(r#"{"lambda_multiplier": 0.1}"#).expect("test: parse");
        assert!((params.lambda_multiplier - 0.1).abs() < f64::EPSILON);
        assert!((params.alpha - 0.1).abs() < f64::EPSILON);
        assert!((params.epsilon_multiplier - 0.999).abs() < f64::EPSILON);
    }
}
