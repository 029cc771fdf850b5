// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Trajectory Recording

use serde::{Deserialize, Serialize};

use crate::types::{norm, ProtocolState};

/// Whole-network state after one global iteration. Vectors are laid out
/// agent by agent in network order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSnapshot {
    pub iteration: u64,
    /// [v, v⁻, flow] per agent.
    pub state: Vec<f64>,
    pub lagrangian: f64,
    pub cost: f64,
    /// [g+, g−] per agent, evaluated live.
    pub constraints: Vec<f64>,
    /// Full Lagrangian gradient per agent, evaluated live.
    pub gradient: Vec<f64>,
    /// [λ+, λ−] per agent.
    pub duals: Vec<f64>,
    /// α of the first agent.
    pub alpha: f64,
    pub alphas: Vec<f64>,
    pub epsilons: Vec<f64>,
    /// h̄ per agent.
    pub estimates: Vec<f64>,
    /// Mean of the agents' last raw convergence measures.
    pub mean_measure: f64,
    pub protocol_states: Vec<ProtocolState>,
}

impl IterationSnapshot {
    pub fn constraint_norm(&self) -> f64 {
        norm(&self.constraints)
    }

    pub fn gradient_norm(&self) -> f64 {
        norm(&self.gradient)
    }

    pub fn all_in(&self, state: ProtocolState) -> bool {
        self.protocol_states.iter().all(|s| *s == state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub snapshots: Vec<IterationSnapshot>,
}

impl Trajectory {
    pub fn push(&mut self, snapshot: IterationSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn first(&self) -> Option<&IterationSnapshot> {
        self.snapshots.first()
    }

    pub fn last(&self) -> Option<&IterationSnapshot> {
        self.snapshots.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IterationSnapshot> {
        self.snapshots.iter()
    }

    /// Distance from a settled solution, lower is better:
    /// ‖[drift over the final 20 %, ‖∇L‖/α, ‖g‖]‖ of the last snapshot, with
    /// voltages scaled by `base_voltage` and flows by `base_power`.
    /// `f64::MAX` for an empty or non-finite run.
    pub fn convergence_score(&self, base_voltage: f64, base_power: f64) -> f64 {
        let Some(last) = self.last() else {
            return f64::MAX;
        };
        let reference_index = (self.len() * 4 / 5).min(self.len() - 1);
        let reference = &self.snapshots[reference_index];

        let mut terms: Vec<f64> = last
            .state
            .iter()
            .zip(&reference.state)
            .enumerate()
            .map(|(i, (now, then))| {
                let base = if i % 3 == 2 { base_power } else { base_voltage };
                (now - then) / base
            })
            .collect();
        terms.push(last.gradient_norm() / last.alpha);
        terms.push(last.constraint_norm());

        let score = norm(&terms);
        if score.is_nan() {
            f64::MAX
        } else {
            score
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(iteration: u64, v: f64, g: f64) -> IterationSnapshot {
        IterationSnapshot {
            iteration,
            state: vec![v, 0.0, 20.0],
            lagrangian: 0.0,
            cost: 0.0,
            constraints: vec![g, 0.0],
            gradient: vec![0.0, 0.0, 0.0],
            duals: vec![0.0, 0.0],
            alpha: 0.5,
            alphas: vec![0.5],
            epsilons: vec![1.0],
            estimates: vec![1.0],
            mean_measure: 1.0,
            protocol_states: vec![ProtocolState::SessionExecution],
        }
    }

    #[test]
    fn test_score_of_settled_run_is_residual() {
        let trajectory = Trajectory {
            snapshots: (0..10).map(|k| snapshot(k, 12.0, 0.3)).collect(),
        };
        assert!((trajectory.convergence_score(1.0, 10.0) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_score_counts_late_drift() {
        let mut snapshots: Vec<_> = (0..10).map(|k| snapshot(k, 12.0, 0.0)).collect();
        snapshots[9].state[0] = 12.4;
        let trajectory = Trajectory { snapshots };
        assert!((trajectory.convergence_score(1.0, 10.0) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_score_of_nan_run_is_max() {
        let mut snapshots: Vec<_> = (0..5).map(|k| snapshot(k, 12.0, 0.0)).collect();
        snapshots[4].constraints[0] = f64::NAN;
        let trajectory = Trajectory { snapshots };
        assert_eq!(trajectory.convergence_score(1.0, 10.0), f64::MAX);
        assert_eq!(Trajectory::default().convergence_score(1.0, 10.0), f64::MAX);
    }
}
