// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Simulation Core

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wasm_bindgen::prelude::*;

use crate::agent::Agent;
use crate::config::{OptimizationParams, SimulationConfig};
use crate::error::NetworkError;
use crate::optimizer::{self, LagrangianTerms};
use crate::trajectory::{IterationSnapshot, Trajectory};
use crate::types::{AgentId, ProtocolState};

// ─── Disturbances ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DisturbanceAction {
    /// Take the agent offline.
    Pause,
    /// Bring it back in the state it left.
    Resume,
    /// New demand for a fixed load; triggers a fresh session.
    SetLoad(f64),
}

/// An action applied to one agent at the start of a given iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disturbance {
    pub iteration: u64,
    pub agent: String,
    pub action: DisturbanceAction,
}

impl Disturbance {
    pub fn new(iteration: u64, agent: impl Into<String>, action: DisturbanceAction) -> Self {
        Self { iteration, agent: agent.into(), action }
    }
}

// ─── Simulation ──────────────────────────────────────────────────────────────

/// Single-process run of a network: agents act one after another in
/// network order, exchanging messages through their mailboxes.
#[wasm_bindgen]
pub struct Simulation {
    pub(crate) agents: Vec<Agent>,
    pub(crate) names: HashMap<String, AgentId>,
    pub(crate) config: SimulationConfig,
    pub(crate) disturbances: Vec<Disturbance>,
    pub(crate) iteration: u64,
    pub(crate) switched_on: bool,
}

impl Simulation {
    pub(crate) fn new(
        agents: Vec<Agent>,
        names: HashMap<String, AgentId>,
        config: SimulationConfig,
        disturbances: Vec<Disturbance>,
    ) -> Self {
        Self { agents, names, config, disturbances, iteration: 0, switched_on: false }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.names.get(name).map(|id| &self.agents[id.index()])
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut Agent> {
        let id = *self.names.get(name)?;
        self.agents.get_mut(id.index())
    }

    fn require(&mut self, name: &str) -> Result<&mut Agent, NetworkError> {
        self.agent_mut(name)
            .ok_or_else(|| NetworkError::UnknownAgent(name.to_string()))
    }

    // ---- Administration ----

    pub fn pause(&mut self, name: &str) -> Result<(), NetworkError> {
        let iteration = self.iteration;
        let agent = self.require(name)?;
        info!(iteration, agent = name, "agent paused");
        agent.protocol.disable();
        Ok(())
    }

    pub fn resume(&mut self, name: &str) -> Result<(), NetworkError> {
        let iteration = self.iteration;
        let agent = self.require(name)?;
        info!(iteration, agent = name, "agent resumed");
        agent.protocol.enable();
        Ok(())
    }

    /// Change a fixed load's demand and have it ask for a new session.
    pub fn set_load(&mut self, name: &str, value: f64) -> Result<(), NetworkError> {
        let iteration = self.iteration;
        let agent = self.require(name)?;
        if !agent.state().kind().has_fixed_flow() {
            return Err(NetworkError::NotAdjustable(name.to_string()));
        }
        info!(iteration, agent = name, load = value, "load changed");
        agent.state.set_flow(value);
        agent.protocol.request_session();
        Ok(())
    }

    pub fn schedule(&mut self, disturbance: Disturbance) -> Result<(), NetworkError> {
        if !self.names.contains_key(&disturbance.agent) {
            return Err(NetworkError::UnknownAgent(disturbance.agent));
        }
        self.disturbances.push(disturbance);
        Ok(())
    }

    /// Apply one optimization schedule to every agent.
    pub fn set_params(&mut self, params: OptimizationParams) -> Result<(), NetworkError> {
        params.validate()?;
        for agent in &mut self.agents {
            agent.state.set_params(params);
        }
        Ok(())
    }

    fn apply_disturbances(&mut self) {
        let due: Vec<Disturbance> = self
            .disturbances
            .iter()
            .filter(|d| d.iteration == self.iteration)
            .cloned()
            .collect();
        for disturbance in due {
            let outcome = match disturbance.action {
                DisturbanceAction::Pause => self.pause(&disturbance.agent),
                DisturbanceAction::Resume => self.resume(&disturbance.agent),
                DisturbanceAction::SetLoad(value) => self.set_load(&disturbance.agent, value),
            };
            if let Err(err) = outcome {
                debug!(iteration = self.iteration, %err, "disturbance skipped");
            }
        }
    }

    // ---- Driver ----

    /// Project every agent into its bounds and start discovery.
    pub fn switch_on(&mut self) {
        if self.switched_on {
            return;
        }
        for agent in &mut self.agents {
            agent.state.project();
        }
        for agent in &mut self.agents {
            agent.protocol.init();
        }
        self.switched_on = true;
        info!(agents = self.agents.len(), "network switched on");
    }

    /// One global iteration: every agent takes a protocol step and, if in
    /// session with a full cache, an optimization pass; then every mailbox
    /// is flushed once more.
    pub fn step(&mut self) -> IterationSnapshot {
        self.switch_on();
        self.apply_disturbances();

        let config = self.config;
        for index in 0..self.agents.len() {
            self.agents[index].execute(self.iteration, &config);
            if self.agents[index].ready_to_optimize() {
                optimizer::optimize_agent(&mut self.agents, index, &config);
            }
        }
        for agent in &mut self.agents {
            agent.execute(self.iteration, &config);
        }

        self.iteration += 1;
        self.snapshot()
    }

    /// Run `iterations` global iterations. The trajectory starts with the
    /// state before the first one.
    pub fn run(&mut self, iterations: usize) -> Trajectory {
        self.switch_on();
        let mut trajectory = Trajectory::default();
        trajectory.push(self.snapshot());
        for _ in 0..iterations {
            let snapshot = self.step();
            trajectory.push(snapshot);
        }
        info!(
            iterations,
            constraint_norm = ?trajectory.last().map(IterationSnapshot::constraint_norm),
            "run finished"
        );
        trajectory
    }

    // ---- Observation ----

    pub fn lagrangian(&self) -> LagrangianTerms {
        optimizer::lagrangian(&self.agents)
    }

    /// Live view of the whole network.
    pub fn snapshot(&self) -> IterationSnapshot {
        let n = self.agents.len();
        let mut snapshot = IterationSnapshot {
            iteration: self.iteration,
            state: Vec::with_capacity(3 * n),
            lagrangian: 0.0,
            cost: 0.0,
            constraints: Vec::with_capacity(2 * n),
            gradient: Vec::with_capacity(3 * n),
            duals: Vec::with_capacity(2 * n),
            alpha: self.agents.first().map_or(0.0, |a| a.state().duals().alpha),
            alphas: Vec::with_capacity(n),
            epsilons: Vec::with_capacity(n),
            estimates: Vec::with_capacity(n),
            mean_measure: 0.0,
            protocol_states: Vec::with_capacity(n),
        };

        let terms = self.lagrangian();
        snapshot.lagrangian = terms.total();
        snapshot.cost = terms.cost;

        for agent in &self.agents {
            let state = agent.state();
            let couplings = state.live_couplings(&self.agents);
            snapshot.state.extend_from_slice(&state.electrical().to_array());
            snapshot.constraints.push(state.g_plus_with(&couplings));
            snapshot.constraints.push(state.g_minus_with(&couplings));
            snapshot.gradient.extend_from_slice(&state.gradient_with(&couplings));
            snapshot.duals.push(state.duals().lambda_plus);
            snapshot.duals.push(state.duals().lambda_minus);
            snapshot.alphas.push(state.duals().alpha);
            snapshot.epsilons.push(state.duals().epsilon);
            snapshot.estimates.push(state.convergence().estimate());
            snapshot.mean_measure += state.convergence().previous_measure();
            snapshot.protocol_states.push(agent.protocol_state());
        }
        if n > 0 {
            snapshot.mean_measure /= n as f64;
        }
        snapshot
    }

    pub fn protocol_states(&self) -> Vec<ProtocolState> {
        self.agents.iter().map(Agent::protocol_state).collect()
    }
}
