// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Agent State

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::NeighborCache;
use crate::config::{OptimizationParams, SimulationConfig};
use crate::convergence::ConvergenceEstimate;
use crate::neighbor::{Coupling, LiveRef, Neighbor, NeighborView};
use crate::protocol::{ProtocolEngine, ProtocolHost};
use crate::types::*;
use crate::variant::{view_coupling_gradients, Variant, Wrt};

// ─── Duals ───────────────────────────────────────────────────────────────────

/// Time-varying optimization variables of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Duals {
    pub lambda_plus: f64,
    pub lambda_minus: f64,
    pub alpha: f64,
    pub epsilon: f64,
}

impl Duals {
    pub fn from_params(params: &OptimizationParams) -> Self {
        Self {
            lambda_plus: 0.0,
            lambda_minus: 0.0,
            alpha: params.alpha,
            epsilon: params.epsilon,
        }
    }
}

// ─── Agent State ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentState {
    id: AgentId,
    name: String,
    variant: Variant,
    x: Electrical,
    bounds: ElectricalBounds,
    grounded: bool,
    /// Conductance to each physically linked neighbor.
    links: BTreeMap<AgentId, f64>,
    params: OptimizationParams,
    duals: Duals,
    cache: NeighborCache,
    convergence: ConvergenceEstimate,
}

impl AgentState {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        variant: Variant,
        x: Electrical,
        bounds: ElectricalBounds,
        params: OptimizationParams,
        initial_convergence: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            variant,
            x,
            bounds,
            grounded: false,
            links: BTreeMap::new(),
            duals: Duals::from_params(&params),
            params,
            cache: NeighborCache::new(),
            convergence: ConvergenceEstimate::new(initial_convergence),
        }
    }

    pub fn id(&self) -> AgentId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn kind(&self) -> AgentKind { self.variant.kind }
    pub fn variant(&self) -> &Variant { &self.variant }
    pub fn electrical(&self) -> Electrical { self.x }
    pub fn bounds(&self) -> &ElectricalBounds { &self.bounds }
    pub fn is_grounded(&self) -> bool { self.grounded }
    pub fn links(&self) -> &BTreeMap<AgentId, f64> { &self.links }
    pub fn params(&self) -> &OptimizationParams { &self.params }
    pub fn duals(&self) -> &Duals { &self.duals }
    pub fn cache(&self) -> &NeighborCache { &self.cache }
    pub fn convergence(&self) -> &ConvergenceEstimate { &self.convergence }

    pub fn conductance(&self, neighbor: AgentId) -> Option<f64> {
        self.links.get(&neighbor).copied()
    }

    pub(crate) fn set_grounded(&mut self, grounded: bool) {
        self.grounded = grounded;
    }

    pub(crate) fn link(&mut self, neighbor: AgentId, conductance: f64) {
        self.links.insert(neighbor, conductance);
    }

    /// Overwrite [v, v⁻, flow]. The flow of a fixed load is left untouched.
    pub fn set_state(&mut self, x: Vec3) {
        let flow = if self.kind().has_fixed_flow() { self.x.flow } else { x[AXIS_FLOW] };
        self.x = Electrical { v: x[AXIS_V], v_minus: x[AXIS_V_MINUS], flow };
    }

    /// Change the demand of a fixed load.
    pub(crate) fn set_flow(&mut self, flow: f64) {
        self.x.flow = flow;
    }

    /// Replace the schedule and restart α and ε from it. λ± are kept.
    pub fn set_params(&mut self, params: OptimizationParams) {
        self.params = params;
        self.duals.alpha = params.alpha;
        self.duals.epsilon = params.epsilon;
    }

    // ---- Neighbor sets ----

    pub fn cached_couplings(&self) -> Vec<Coupling<Neighbor<'_>>> {
        self.cache
            .iter()
            .filter_map(|(id, snapshot)| {
                self.links.get(id).map(|&conductance| Coupling {
                    neighbor: Neighbor::CachedSnapshot(snapshot),
                    conductance,
                })
            })
            .collect()
    }

    pub fn live_couplings<'a>(&'a self, network: &'a [Agent]) -> Vec<Coupling<Neighbor<'a>>> {
        self.links
            .iter()
            .filter_map(|(id, &conductance)| {
                network.get(id.index()).map(|agent| Coupling {
                    neighbor: Neighbor::LiveRef(LiveRef { state: &agent.state, network }),
                    conductance,
                })
            })
            .collect()
    }

    pub fn couplings<'a>(&'a self, network: &'a [Agent], use_cache: bool) -> Vec<Coupling<Neighbor<'a>>> {
        if use_cache {
            self.cached_couplings()
        } else {
            self.live_couplings(network)
        }
    }

    // ---- Lagrangian terms ----

    pub fn cost(&self) -> f64 {
        self.variant.cost(&self.x)
    }

    pub fn g_plus_with<N: NeighborView>(&self, neighbors: &[Coupling<N>]) -> f64 {
        self.variant.g_plus(&self.x, neighbors)
    }

    pub fn g_minus_with<N: NeighborView>(&self, neighbors: &[Coupling<N>]) -> f64 {
        self.variant.g_minus(&self.x, neighbors)
    }

    /// Gradient of the augmented Lagrangian with respect to this agent's
    /// state: own cost and residual terms plus every neighbor's residual
    /// terms that depend on this agent.
    pub fn gradient_with<N: NeighborView>(&self, neighbors: &[Coupling<N>]) -> Vec3 {
        let x = &self.x;
        let mut grad = self.variant.cost_gradient(x, Wrt::Own);

        let g_plus = self.g_plus_with(neighbors);
        let g_minus = self.g_minus_with(neighbors);
        axpy(
            &mut grad,
            self.duals.lambda_plus + self.duals.alpha * g_plus,
            &self.variant.g_plus_gradient(x, neighbors, Wrt::Own),
        );
        axpy(
            &mut grad,
            self.duals.lambda_minus + self.duals.alpha * g_minus,
            &self.variant.g_minus_gradient(x, neighbors, Wrt::Own),
        );

        for coupling in neighbors {
            let neighbor = &coupling.neighbor;
            let (dp, dm) = view_coupling_gradients(neighbor, coupling.conductance);
            let (wp, wm) = neighbor.weighted_residuals();
            axpy(&mut grad, wp, &dp);
            axpy(&mut grad, wm, &dm);
        }

        if self.grounded {
            grad[AXIS_V_MINUS] = 0.0;
        }
        if self.kind().has_fixed_flow() {
            grad[AXIS_FLOW] = 0.0;
        }
        grad
    }

    /// Clamp onto the box constraints. Returns whether anything moved.
    pub fn project(&mut self) -> bool {
        let before = self.x;
        let b = &self.bounds;
        self.x.v = self.x.v.clamp(b.v_min, b.v_max);
        self.x.v_minus = self.x.v_minus.max(0.0);
        self.x.flow = self.x.flow.clamp(-b.flow_max, b.flow_max);
        self.x != before
    }

    // ---- Dual and penalty schedule ----

    pub fn step_lambda(&mut self, g_plus: f64, g_minus: f64) {
        let step = self.params.lambda_multiplier * self.duals.alpha;
        let max = self.params.lambda_max;
        self.duals.lambda_plus = (self.duals.lambda_plus + step * g_plus).clamp(-max, max);
        self.duals.lambda_minus = (self.duals.lambda_minus + step * g_minus).clamp(-max, max);
    }

    pub fn step_alpha(&mut self) {
        self.duals.alpha = (self.duals.alpha * self.params.alpha_multiplier).min(self.params.alpha_max);
    }

    pub fn step_epsilon(&mut self) {
        self.duals.epsilon *= self.params.epsilon_multiplier;
    }

    // ---- Session support ----

    /// Snapshot for neighbors, with residuals computed from the cache.
    pub fn snapshot(&self) -> AgentSnapshot {
        let couplings = self.cached_couplings();
        AgentSnapshot {
            kind: self.kind(),
            v: self.x.v,
            v_minus: self.x.v_minus,
            flow: self.x.flow,
            lambda_plus: self.duals.lambda_plus,
            lambda_minus: self.duals.lambda_minus,
            alpha: self.duals.alpha,
            g_plus: self.g_plus_with(&couplings),
            g_minus: self.g_minus_with(&couplings),
            convergence: self.convergence.estimate(),
        }
    }

    /// This agent and every cached neighbor report h̄ below `target`.
    pub fn completion_criteria_met(&self, target: f64) -> bool {
        self.convergence.is_below(target)
            && self.cache.iter().all(|(_, n)| n.convergence < target)
    }

    pub(crate) fn patch_neighbor_constraints(&mut self, delta: &Vec3) {
        self.cache.patch_constraints(delta, &self.links);
    }

    pub(crate) fn convergence_mut(&mut self) -> &mut ConvergenceEstimate {
        &mut self.convergence
    }
}

// ─── Protocol Host Adapter ───────────────────────────────────────────────────

struct SessionHost<'a> {
    state: &'a mut AgentState,
    config: &'a SimulationConfig,
}

impl ProtocolHost for SessionHost<'_> {
    fn snapshot(&self) -> AgentSnapshot { self.state.snapshot() }
    fn completion_criteria_met(&self) -> bool {
        self.state.completion_criteria_met(self.config.convergence_target)
    }
    fn cache(&self) -> &NeighborCache { &self.state.cache }
    fn cache_mut(&mut self) -> &mut NeighborCache { &mut self.state.cache }
    fn add_convergence_correction(&mut self, correction: f64) {
        self.state.convergence.add_correction(correction);
    }
    fn begin_session(&mut self) {
        self.state.cache.clear();
        self.state.convergence = ConvergenceEstimate::new(self.config.initial_convergence_estimate);
    }
}

// ─── Agent ───────────────────────────────────────────────────────────────────

/// A network node: optimization state plus its protocol engine.
#[derive(Debug)]
pub struct Agent {
    pub(crate) state: AgentState,
    pub(crate) protocol: ProtocolEngine,
}

impl Agent {
    pub fn new(state: AgentState) -> Self {
        let protocol = ProtocolEngine::new(state.id, state.name.clone());
        Self { state, protocol }
    }

    pub fn id(&self) -> AgentId { self.state.id }
    pub fn name(&self) -> &str { &self.state.name }
    pub fn state(&self) -> &AgentState { &self.state }
    pub fn state_mut(&mut self) -> &mut AgentState { &mut self.state }
    pub fn protocol(&self) -> &ProtocolEngine { &self.protocol }
    pub fn protocol_state(&self) -> ProtocolState { self.protocol.state() }

    /// One protocol step.
    pub fn execute(&mut self, iteration: u64, config: &SimulationConfig) {
        let mut host = SessionHost { state: &mut self.state, config };
        self.protocol.execute(iteration, &mut host);
    }

    /// Deliver a message; synchronous variable updates return the answer.
    pub fn deliver(&mut self, message: Message, config: &SimulationConfig) -> Option<Message> {
        let mut host = SessionHost { state: &mut self.state, config };
        self.protocol.deliver(message, &mut host)
    }

    pub fn variable_update_request(&self) -> Message {
        Message::with_snapshot(self.state.id, MessageKind::VariableUpdate, self.state.snapshot())
    }

    pub fn accept_variable_update(&mut self, response: &Message, config: &SimulationConfig) {
        let mut host = SessionHost { state: &mut self.state, config };
        self.protocol.accept_variable_update(response, &mut host);
    }

    /// In session with a snapshot of every discovered neighbor.
    pub fn ready_to_optimize(&self) -> bool {
        let discovered = self.protocol.discovered();
        self.protocol.state() == ProtocolState::SessionExecution
            && !discovered.is_empty()
            && self.state.cache.len() == discovered.len()
            && self.state.cache.covers(discovered)
    }
}
