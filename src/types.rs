// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Type Definitions

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Agent Identity ──────────────────────────────────────────────────────────

/// Position of an agent in its network, assigned at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─── Agent Kind ──────────────────────────────────────────────────────────────

/// Electrical behaviour of a node. Closed set: every dispatch over it is an
/// exhaustive `match`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentKind {
    /// Load drawing a fixed current.
    ConstantCurrent = 0,
    /// Load drawing a fixed power.
    ConstantPower = 1,
    /// Controllable source whose injected power is optimized.
    VoltageSource = 2,
}

impl AgentKind {
    /// Flow is an input for loads and a decision variable for sources.
    pub fn has_fixed_flow(&self) -> bool {
        !matches!(self, Self::VoltageSource)
    }

    /// Constraints scale with the node voltage (power rather than current).
    pub fn is_voltage_scaled(&self) -> bool {
        !matches!(self, Self::ConstantCurrent)
    }
}

// ─── Electrical State ────────────────────────────────────────────────────────

/// Three-component vector over [v, v⁻, flow].
pub type Vec3 = [f64; 3];

pub const AXIS_V: usize = 0;
pub const AXIS_V_MINUS: usize = 1;
pub const AXIS_FLOW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Electrical {
    /// Node voltage.
    pub v: f64,
    /// Return-path voltage, non-negative.
    pub v_minus: f64,
    /// Injected (positive) or drawn (negative) power or current.
    pub flow: f64,
}

impl Electrical {
    pub fn to_array(&self) -> Vec3 {
        [self.v, self.v_minus, self.flow]
    }

    pub fn from_array(x: Vec3) -> Self {
        Self { v: x[AXIS_V], v_minus: x[AXIS_V_MINUS], flow: x[AXIS_FLOW] }
    }
}

/// Box constraints on the electrical state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectricalBounds {
    pub v_min: f64,
    pub v_max: f64,
    /// Symmetric limit on |flow|.
    pub flow_max: f64,
}

impl ElectricalBounds {
    pub fn is_valid(&self) -> bool {
        self.v_min.is_finite()
            && self.v_max.is_finite()
            && self.v_min <= self.v_max
            && self.flow_max >= 0.0
    }

    pub fn contains(&self, x: &Electrical) -> bool {
        x.v >= self.v_min
            && x.v <= self.v_max
            && x.v_minus >= 0.0
            && x.flow.abs() <= self.flow_max
    }
}

// ─── Protocol State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Off,
    Idle,
    SessionInitialisation,
    SessionExecution,
    SessionComplete,
}

impl Default for ProtocolState {
    fn default() -> Self { ProtocolState::Idle }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Off => "OFF",
            Self::Idle => "IDLE",
            Self::SessionInitialisation => "SESSION_INIT",
            Self::SessionExecution => "SESSION_EXEC",
            Self::SessionComplete => "SESSION_COMPLETE",
        };
        f.write_str(s)
    }
}

// ─── Messages ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageKind {
    DiscoverNeighbours,
    IdentifyNeighbour,
    StartSession,
    StartSessionAccepted,
    CancelSession,
    FinishSession,
    FinishSessionAccepted,
    FinishSessionReject,
    VariableUpdate,
    VariableUpdateResponse,
    ConvergenceCorrection,
}

impl MessageKind {
    /// Variable updates bypass the mailbox and are answered in-line.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::VariableUpdate | Self::VariableUpdateResponse)
    }
}

/// Everything a neighbor needs to evaluate this agent's terms of the
/// Lagrangian without asking again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub kind: AgentKind,
    pub v: f64,
    pub v_minus: f64,
    pub flow: f64,
    pub lambda_plus: f64,
    pub lambda_minus: f64,
    pub alpha: f64,
    pub g_plus: f64,
    pub g_minus: f64,
    pub convergence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Empty,
    Snapshot(AgentSnapshot),
    Scalar(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source: AgentId,
    pub kind: MessageKind,
    pub payload: Payload,
}

impl Message {
    pub fn new(source: AgentId, kind: MessageKind) -> Self {
        Self { source, kind, payload: Payload::Empty }
    }

    pub fn with_snapshot(source: AgentId, kind: MessageKind, snapshot: AgentSnapshot) -> Self {
        Self { source, kind, payload: Payload::Snapshot(snapshot) }
    }

    pub fn with_scalar(source: AgentId, kind: MessageKind, value: f64) -> Self {
        Self { source, kind, payload: Payload::Scalar(value) }
    }

    pub fn snapshot(&self) -> Option<&AgentSnapshot> {
        match &self.payload {
            Payload::Snapshot(s) => Some(s),
            _ => None,
        }
    }

    pub fn scalar(&self) -> Option<f64> {
        match self.payload {
            Payload::Scalar(x) => Some(x),
            _ => None,
        }
    }
}

// ─── Vector Helpers ──────────────────────────────────────────────────────────

pub fn norm(xs: &[f64]) -> f64 {
    xs.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// `acc += w * x`
pub fn axpy(acc: &mut Vec3, w: f64, x: &Vec3) {
    for k in 0..3 {
        acc[k] += w * x[k];
    }
}

pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
