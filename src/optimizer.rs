// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Local Optimization Pass

//! One agent's share of a global iteration: coordinate-wise projected
//! descent on the augmented Lagrangian, dual and penalty steps, variable
//! exchange and the convergence gossip.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::agent::Agent;
use crate::config::SimulationConfig;
use crate::convergence::ConvergenceEstimate;
use crate::types::{dot, norm, sub, AgentId, Vec3};

// ─── Lagrangian ──────────────────────────────────────────────────────────────

/// Augmented Lagrangian split into its parts, evaluated live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LagrangianTerms {
    pub cost: f64,
    /// Σ λ+·g+ + λ−·g−
    pub multiplier: f64,
    /// Σ α/2·(g+² + g−²)
    pub penalty: f64,
}

impl LagrangianTerms {
    pub fn total(&self) -> f64 {
        self.cost + self.multiplier + self.penalty
    }
}

pub fn lagrangian(agents: &[Agent]) -> LagrangianTerms {
    agents.iter().fold(LagrangianTerms::default(), |mut acc, agent| {
        let state = agent.state();
        let couplings = state.live_couplings(agents);
        let g_plus = state.g_plus_with(&couplings);
        let g_minus = state.g_minus_with(&couplings);
        let duals = state.duals();
        acc.cost += state.cost();
        acc.multiplier += duals.lambda_plus * g_plus + duals.lambda_minus * g_minus;
        acc.penalty += duals.alpha / 2.0 * (g_plus * g_plus + g_minus * g_minus);
        acc
    })
}

// ─── Descent ─────────────────────────────────────────────────────────────────

/// Gradient of agent `index`, restricted to one axis.
fn masked_gradient(agents: &[Agent], index: usize, axis: usize, config: &SimulationConfig) -> Vec3 {
    let state = agents[index].state();
    let grad = state.gradient_with(&state.couplings(agents, config.use_cache));
    let mut masked = [0.0; 3];
    masked[axis] = grad[axis];
    masked
}

/// Armijo backtracking along −`grad`. The agent's state is restored before
/// returning. Returns 0 when no trial improved on the current Lagrangian.
pub(crate) fn backtrack(agents: &mut [Agent], index: usize, grad: &Vec3, config: &SimulationConfig) -> f64 {
    let origin = agents[index].state().electrical().to_array();
    let baseline = lagrangian(agents).total();
    let grad_sq = dot(grad, grad);
    let grad_norm = grad_sq.sqrt();

    let mut step = config.initial_step;
    let mut trial;
    loop {
        let candidate = [
            origin[0] - step * grad[0],
            origin[1] - step * grad[1],
            origin[2] - step * grad[2],
        ];
        agents[index].state_mut().set_state(candidate);
        trial = lagrangian(agents).total();
        // NaN trials fail the comparison and keep shrinking.
        if trial <= baseline - step * 0.5 * grad_sq || !(grad_norm * step > config.min_step) {
            break;
        }
        step *= 0.5;
    }
    agents[index].state_mut().set_state(origin);

    if trial < baseline {
        step
    } else {
        0.0
    }
}

/// Full optimization pass for agent `index`. Callers check
/// [`Agent::ready_to_optimize`] first.
pub(crate) fn optimize_agent(agents: &mut [Agent], index: usize, config: &SimulationConfig) {
    let previous = agents[index].state().electrical().to_array();
    let epsilon = agents[index].state().duals().epsilon;

    for axis in 0..3 {
        let mut grad = masked_gradient(agents, index, axis, config);
        let mut displacement = f64::INFINITY;
        let mut iterations = 0;
        while norm(&grad) > epsilon
            && displacement > config.min_displacement
            && iterations < config.max_axis_iterations
        {
            iterations += 1;
            let step = backtrack(agents, index, &grad, config);
            let state = agents[index].state_mut();
            let before = state.electrical().to_array();
            state.set_state([
                before[0] - step * grad[0],
                before[1] - step * grad[1],
                before[2] - step * grad[2],
            ]);
            state.project();
            let delta = sub(&state.electrical().to_array(), &before);
            state.patch_neighbor_constraints(&delta);
            displacement = norm(&delta);
            grad = masked_gradient(agents, index, axis, config);
        }
        trace!(agent = %agents[index].name(), axis, iterations, "axis descent done");
    }

    let (g_plus, g_minus) = {
        let state = agents[index].state();
        let couplings = state.couplings(agents, config.use_cache);
        (state.g_plus_with(&couplings), state.g_minus_with(&couplings))
    };
    let floor = config.dual_step_floor.max(epsilon);
    let state = agents[index].state_mut();
    if g_plus.abs() > floor || g_minus.abs() > floor {
        state.step_lambda(g_plus, g_minus);
        state.step_alpha();
    }
    state.step_epsilon();

    exchange_variables(agents, index, config);
    update_convergence(agents, index, &previous, config);
}

/// Synchronous snapshot swap with every discovered neighbor that answers.
pub(crate) fn exchange_variables(agents: &mut [Agent], index: usize, config: &SimulationConfig) {
    let neighbors: Vec<AgentId> = agents[index].protocol().discovered().iter().copied().collect();
    for id in neighbors {
        let request = agents[index].variable_update_request();
        let Some(neighbor) = agents.get_mut(id.index()) else {
            continue;
        };
        if let Some(response) = neighbor.deliver(request, config) {
            agents[index].accept_variable_update(&response, config);
        }
    }
}

fn update_convergence(agents: &mut [Agent], index: usize, previous: &Vec3, config: &SimulationConfig) {
    let agent = &mut agents[index];
    let state = agent.state();
    let couplings = state.couplings(&[], true);
    let measure = ConvergenceEstimate::measure(
        state.g_plus_with(&couplings),
        state.g_minus_with(&couplings),
        &sub(&state.electrical().to_array(), previous),
    );
    let neighbors: Vec<(AgentId, f64)> = agent
        .protocol()
        .discovered()
        .iter()
        .filter_map(|id| state.cache().get(id).map(|n| (*id, n.convergence)))
        .collect();

    let corrections = agent
        .state_mut()
        .convergence_mut()
        .update(measure, &neighbors, config.consensus_gain);
    for (id, correction) in corrections {
        agent.protocol.send_correction(id, correction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkBuilder;
    use crate::scenarios::two_bus;
    use crate::simulation::Simulation;

    fn two_bus_after(iterations: usize) -> Simulation {
        let mut sim = two_bus(-5.0, 1.0)
            .and_then(|b| b.build())
            .expect("test: two-bus network");
        sim.run(iterations);
        sim
    }

    fn live_config() -> SimulationConfig {
        SimulationConfig { use_cache: false, ..Default::default() }
    }

    fn live_gradient(agents: &[Agent], index: usize) -> Vec3 {
        let state = agents[index].state();
        state.gradient_with(&state.live_couplings(agents))
    }

    /// Lagrangian with agent `index` moved to `origin − step·grad`; the
    /// agent is put back afterwards.
    fn lagrangian_at(agents: &mut [Agent], index: usize, origin: Vec3, grad: &Vec3, step: f64) -> f64 {
        agents[index].state_mut().set_state([
            origin[0] - step * grad[0],
            origin[1] - step * grad[1],
            origin[2] - step * grad[2],
        ]);
        let value = lagrangian(agents).total();
        agents[index].state_mut().set_state(origin);
        value
    }

    #[test]
    fn test_accepted_step_satisfies_sufficient_decrease() {
        let mut sim = two_bus_after(5);
        let config = live_config();
        let mut accepted = 0;
        for index in 0..sim.agents.len() {
            let grad = live_gradient(&sim.agents, index);
            let origin = sim.agents[index].state().electrical();
            let baseline = lagrangian(&sim.agents).total();

            let step = backtrack(&mut sim.agents, index, &grad, &config);
            assert_eq!(sim.agents[index].state().electrical(), origin);
            if step > 0.0 {
                accepted += 1;
                let trial = lagrangian_at(&mut sim.agents, index, origin.to_array(), &grad, step);
                assert!(
                    trial <= baseline - step * 0.5 * dot(&grad, &grad),
                    "agent {index}: step {step} gave {trial} from {baseline}"
                );
            }
        }
        assert!(accepted > 0, "no agent found a descent step");
    }

    #[test]
    fn test_non_finite_trials_are_never_adopted() {
        let config = live_config();
        for grad in [[1e200, 0.0, 0.0], [f64::INFINITY, 0.0, 0.0]] {
            let mut sim = two_bus_after(5);
            let origin = sim.agents[0].state().electrical();
            let baseline = lagrangian(&sim.agents).total();

            let step = backtrack(&mut sim.agents, 0, &grad, &config);
            assert_eq!(sim.agents[0].state().electrical(), origin);
            if step != 0.0 {
                let trial = lagrangian_at(&mut sim.agents, 0, origin.to_array(), &grad, step);
                assert!(step.is_finite() && trial.is_finite() && trial < baseline, "{grad:?}: step {step}");
            }
        }
    }

    #[test]
    fn test_ascent_direction_returns_zero_step() {
        let mut sim = two_bus_after(5);
        let config = SimulationConfig { initial_step: 1e-6, ..live_config() };
        let uphill = live_gradient(&sim.agents, 1).map(|g| -g);
        assert!(norm(&uphill) > 0.0);
        let origin = sim.agents[1].state().electrical();

        assert_eq!(backtrack(&mut sim.agents, 1, &uphill, &config), 0.0);
        assert_eq!(sim.agents[1].state().electrical(), origin);
    }

    #[test]
    fn test_zero_gradient_leaves_state_alone() {
        let mut builder = NetworkBuilder::new();
        builder.power_supply("PS1", 150.0).expect("test: agent");
        let mut sim = builder.build().expect("test: build");
        sim.switch_on();
        let config = SimulationConfig::default();
        assert_eq!(live_gradient(&sim.agents, 0), [0.0; 3]);
        let origin = sim.agents[0].state().electrical();

        optimize_agent(&mut sim.agents, 0, &config);
        assert_eq!(sim.agents[0].state().electrical(), origin);
        assert_eq!(sim.agents[0].state().duals().lambda_plus, 0.0);
    }
}
