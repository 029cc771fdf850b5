// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Neighbor Views

//! Read access to a neighbor's terms of the Lagrangian.
//!
//! The same variant math runs against a neighbor's last exchanged snapshot
//! or against the neighbor itself; callers pick the source through
//! [`SimulationConfig::use_cache`](crate::config::SimulationConfig).

use crate::agent::{Agent, AgentState};
use crate::types::{AgentKind, AgentSnapshot, Electrical};

/// What an agent may know about one of its neighbors.
pub trait NeighborView {
    fn kind(&self) -> AgentKind;
    fn electrical(&self) -> Electrical;
    fn lambda_plus(&self) -> f64;
    fn lambda_minus(&self) -> f64;
    fn alpha(&self) -> f64;
    fn g_plus(&self) -> f64;
    fn g_minus(&self) -> f64;
    fn convergence(&self) -> f64;

    /// Multiplier-weighted residuals (λ+ + α·g+, λ− + α·g−).
    fn weighted_residuals(&self) -> (f64, f64) {
        let alpha = self.alpha();
        (
            self.lambda_plus() + alpha * self.g_plus(),
            self.lambda_minus() + alpha * self.g_minus(),
        )
    }
}

/// A neighbor paired with the conductance of the link to it.
#[derive(Debug, Clone)]
pub struct Coupling<N> {
    pub neighbor: N,
    pub conductance: f64,
}

// ─── Cached Snapshot ─────────────────────────────────────────────────────────

impl NeighborView for AgentSnapshot {
    fn kind(&self) -> AgentKind { self.kind }
    fn electrical(&self) -> Electrical {
        Electrical { v: self.v, v_minus: self.v_minus, flow: self.flow }
    }
    fn lambda_plus(&self) -> f64 { self.lambda_plus }
    fn lambda_minus(&self) -> f64 { self.lambda_minus }
    fn alpha(&self) -> f64 { self.alpha }
    fn g_plus(&self) -> f64 { self.g_plus }
    fn g_minus(&self) -> f64 { self.g_minus }
    fn convergence(&self) -> f64 { self.convergence }
}

// ─── Live Reference ──────────────────────────────────────────────────────────

/// A neighbor read straight from the network. Its residuals are computed
/// against its own live neighbors.
#[derive(Debug, Clone, Copy)]
pub struct LiveRef<'a> {
    pub state: &'a AgentState,
    pub network: &'a [Agent],
}

impl NeighborView for LiveRef<'_> {
    fn kind(&self) -> AgentKind { self.state.kind() }
    fn electrical(&self) -> Electrical { self.state.electrical() }
    fn lambda_plus(&self) -> f64 { self.state.duals().lambda_plus }
    fn lambda_minus(&self) -> f64 { self.state.duals().lambda_minus }
    fn alpha(&self) -> f64 { self.state.duals().alpha }
    fn g_plus(&self) -> f64 {
        self.state.g_plus_with(&self.state.live_couplings(self.network))
    }
    fn g_minus(&self) -> f64 {
        self.state.g_minus_with(&self.state.live_couplings(self.network))
    }
    fn convergence(&self) -> f64 { self.state.convergence().estimate() }

    fn weighted_residuals(&self) -> (f64, f64) {
        let couplings = self.state.live_couplings(self.network);
        let duals = self.state.duals();
        (
            duals.lambda_plus + duals.alpha * self.state.g_plus_with(&couplings),
            duals.lambda_minus + duals.alpha * self.state.g_minus_with(&couplings),
        )
    }
}

// ─── Either ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum Neighbor<'a> {
    LiveRef(LiveRef<'a>),
    CachedSnapshot(&'a AgentSnapshot),
}

impl NeighborView for Neighbor<'_> {
    fn kind(&self) -> AgentKind {
        match self {
            Self::LiveRef(n) => n.kind(),
            Self::CachedSnapshot(n) => n.kind(),
        }
    }
    fn electrical(&self) -> Electrical {
        match self {
            Self::LiveRef(n) => n.electrical(),
            Self::CachedSnapshot(n) => n.electrical(),
        }
    }
    fn lambda_plus(&self) -> f64 {
        match self {
            Self::LiveRef(n) => n.lambda_plus(),
            Self::CachedSnapshot(n) => n.lambda_plus(),
        }
    }
    fn lambda_minus(&self) -> f64 {
        match self {
            Self::LiveRef(n) => n.lambda_minus(),
            Self::CachedSnapshot(n) => n.lambda_minus(),
        }
    }
    fn alpha(&self) -> f64 {
        match self {
            Self::LiveRef(n) => n.alpha(),
            Self::CachedSnapshot(n) => n.alpha(),
        }
    }
    fn g_plus(&self) -> f64 {
        match self {
            Self::LiveRef(n) => n.g_plus(),
            Self::CachedSnapshot(n) => n.g_plus(),
        }
    }
    fn g_minus(&self) -> f64 {
        match self {
            Self::LiveRef(n) => n.g_minus(),
            Self::CachedSnapshot(n) => n.g_minus(),
        }
    }
    fn convergence(&self) -> f64 {
        match self {
            Self::LiveRef(n) => n.convergence(),
            Self::CachedSnapshot(n) => n.convergence(),
        }
    }
    fn weighted_residuals(&self) -> (f64, f64) {
        match self {
            Self::LiveRef(n) => n.weighted_residuals(),
            Self::CachedSnapshot(n) => n.weighted_residuals(),
        }
    }
}
