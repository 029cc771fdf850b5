// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Network Construction

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{Agent, AgentState};
use crate::config::{OptimizationParams, SimulationConfig};
use crate::error::NetworkError;
use crate::simulation::{Disturbance, Simulation};
use crate::types::{AgentId, AgentKind, Electrical, ElectricalBounds};
use crate::variant::Variant;

/// Cable resistivity in Ω/m used by [`NetworkBuilder::link_length`].
pub const CABLE_RESISTIVITY: f64 = 0.0132;

/// Nominal bus voltage every preset starts at.
pub const NOMINAL_VOLTAGE: f64 = 12.0;

/// Flow limit of the load presets.
pub const LOAD_FLOW_MAX: f64 = 100.0;

// ─── Agent Description ───────────────────────────────────────────────────────

/// Everything needed to create one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub kind: AgentKind,
    /// Initial flow; the fixed demand for loads.
    #[serde(default)]
    pub flow: f64,
    #[serde(default = "nominal_voltage")]
    pub voltage: f64,
    pub bounds: ElectricalBounds,
    #[serde(default)]
    pub grounded: bool,
}

fn nominal_voltage() -> f64 {
    NOMINAL_VOLTAGE
}

impl AgentSpec {
    /// Power supply: 12 V ± 10 %, injecting up to `max_power`.
    pub fn power_supply(name: impl Into<String>, max_power: f64) -> Self {
        Self {
            name: name.into(),
            kind: AgentKind::VoltageSource,
            flow: 0.0,
            voltage: NOMINAL_VOLTAGE,
            bounds: ElectricalBounds { v_min: 10.8, v_max: 13.2, flow_max: max_power },
            grounded: false,
        }
    }

    /// LED driver drawing a fixed current, tolerant of 9–15 V.
    pub fn led(name: impl Into<String>, current: f64) -> Self {
        Self {
            name: name.into(),
            kind: AgentKind::ConstantCurrent,
            flow: current,
            voltage: NOMINAL_VOLTAGE,
            bounds: ElectricalBounds { v_min: 9.0, v_max: 15.0, flow_max: LOAD_FLOW_MAX },
            grounded: false,
        }
    }

    /// Charger drawing a fixed power, tolerant of 10–18 V.
    pub fn charger(name: impl Into<String>, power: f64) -> Self {
        Self {
            name: name.into(),
            kind: AgentKind::ConstantPower,
            flow: power,
            voltage: NOMINAL_VOLTAGE,
            bounds: ElectricalBounds { v_min: 10.0, v_max: 18.0, flow_max: LOAD_FLOW_MAX },
            grounded: false,
        }
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct NetworkBuilder {
    specs: Vec<AgentSpec>,
    index: HashMap<String, AgentId>,
    links: Vec<(AgentId, AgentId, f64)>,
    params: OptimizationParams,
    config: SimulationConfig,
    disturbances: Vec<Disturbance>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimization schedule applied to every agent.
    pub fn params(&mut self, params: OptimizationParams) -> &mut Self {
        self.params = params;
        self
    }

    pub fn config(&mut self, config: SimulationConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn agent(&mut self, spec: AgentSpec) -> Result<&mut Self, NetworkError> {
        if self.index.contains_key(&spec.name) {
            return Err(NetworkError::DuplicateAgent(spec.name));
        }
        if !spec.bounds.is_valid() || !spec.voltage.is_finite() || !spec.flow.is_finite() {
            return Err(NetworkError::InvalidBounds(spec.name));
        }
        let id = AgentId(self.specs.len() as u32);
        self.index.insert(spec.name.clone(), id);
        self.specs.push(spec);
        Ok(self)
    }

    pub fn power_supply(&mut self, name: &str, max_power: f64) -> Result<&mut Self, NetworkError> {
        self.agent(AgentSpec::power_supply(name, max_power))
    }

    pub fn led(&mut self, name: &str, current: f64) -> Result<&mut Self, NetworkError> {
        self.agent(AgentSpec::led(name, current))
    }

    pub fn charger(&mut self, name: &str, power: f64) -> Result<&mut Self, NetworkError> {
        self.agent(AgentSpec::charger(name, power))
    }

    /// `count` chargers named `{prefix}1..={prefix}{count}`.
    pub fn chargers(&mut self, prefix: &str, count: usize, power: f64) -> Result<&mut Self, NetworkError> {
        for i in 1..=count {
            self.charger(&format!("{prefix}{i}"), power)?;
        }
        Ok(self)
    }

    pub fn grounded(&mut self, name: &str, grounded: bool) -> Result<&mut Self, NetworkError> {
        let id = self.id(name)?;
        self.specs[id.index()].grounded = grounded;
        Ok(self)
    }

    pub fn link(&mut self, a: &str, b: &str, conductance: f64) -> Result<&mut Self, NetworkError> {
        let (ia, ib) = (self.id(a)?, self.id(b)?);
        if ia == ib {
            return Err(NetworkError::SelfLink(a.to_string()));
        }
        if !(conductance > 0.0) || !conductance.is_finite() {
            return Err(NetworkError::InvalidConductance {
                a: a.to_string(),
                b: b.to_string(),
                value: conductance,
            });
        }
        self.links.retain(|&(x, y, _)| !((x == ia && y == ib) || (x == ib && y == ia)));
        self.links.push((ia, ib, conductance));
        Ok(self)
    }

    /// Link through a cable of `length` metres.
    pub fn link_length(&mut self, a: &str, b: &str, length: f64) -> Result<&mut Self, NetworkError> {
        self.link(a, b, 1.0 / (CABLE_RESISTIVITY * length))
    }

    pub fn disturbance(&mut self, disturbance: Disturbance) -> Result<&mut Self, NetworkError> {
        self.id(&disturbance.agent)?;
        self.disturbances.push(disturbance);
        Ok(self)
    }

    fn id(&self, name: &str) -> Result<AgentId, NetworkError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| NetworkError::UnknownAgent(name.to_string()))
    }

    pub fn build(&self) -> Result<Simulation, NetworkError> {
        self.params.validate()?;
        self.config.validate()?;

        let mut agents: Vec<Agent> = self
            .specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let mut state = AgentState::new(
                    AgentId(i as u32),
                    spec.name.clone(),
                    Variant::new(spec.kind, self.config.voltage_source_cost),
                    Electrical { v: spec.voltage, v_minus: 0.0, flow: spec.flow },
                    spec.bounds,
                    self.params,
                    self.config.initial_convergence_estimate,
                );
                state.set_grounded(spec.grounded);
                Agent::new(state)
            })
            .collect();

        for &(a, b, conductance) in &self.links {
            agents[a.index()].state.link(b, conductance);
            agents[b.index()].state.link(a, conductance);
            let (mailbox_a, mailbox_b) = (agents[a.index()].protocol.mailbox(), agents[b.index()].protocol.mailbox());
            agents[a.index()].protocol.connect(b, mailbox_b);
            agents[b.index()].protocol.connect(a, mailbox_a);
        }
        debug!(agents = agents.len(), links = self.links.len(), "network built");

        Ok(Simulation::new(agents, self.index.clone(), self.config, self.disturbances.clone()))
    }
}

// ─── Serialized Description ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: String,
    pub b: String,
    pub conductance: f64,
}

/// JSON-friendly form of a whole network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    #[serde(default)]
    pub params: OptimizationParams,
    #[serde(default)]
    pub config: SimulationConfig,
    #[serde(default)]
    pub disturbances: Vec<Disturbance>,
}

impl NetworkDescription {
    pub fn from_json(json: &str) -> Result<Self, NetworkError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, NetworkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn builder(&self) -> Result<NetworkBuilder, NetworkError> {
        let mut builder = NetworkBuilder::new();
        builder.params(self.params).config(self.config);
        for spec in &self.agents {
            builder.agent(spec.clone())?;
        }
        for link in &self.links {
            builder.link(&link.a, &link.b, link.conductance)?;
        }
        for disturbance in &self.disturbances {
            builder.disturbance(disturbance.clone())?;
        }
        Ok(builder)
    }

    pub fn build(&self) -> Result<Simulation, NetworkError> {
        self.builder()?.build()
    }
}
