// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Agent Variants

//! Cost and constraint residuals per agent kind.
//!
//! With S+ = Σ (v + v⁻ − n.v − n.v⁻)·G, S− = Σ (n.v⁻ − v⁻)·G over the
//! neighbors n of an agent:
//!
//! | kind             | g+          | g−          | cost  |
//! |------------------|-------------|-------------|-------|
//! | constant current | S+ − I      | S− − I      | 0     |
//! | constant power   | v·S+ − P    | v·S− − P    | 0     |
//! | voltage source   | v·S+ − P    | v·S− − P    | A·P²  |

use serde::{Deserialize, Serialize};

use crate::neighbor::{Coupling, NeighborView};
use crate::types::{AgentKind, Electrical, Vec3};

/// Party a gradient is taken with respect to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wrt {
    /// The owning agent's own [v, v⁻, flow].
    Own,
    /// A neighbor connected to the owner through `conductance`.
    Neighbor { conductance: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub kind: AgentKind,
    /// A in cost = A·P²; only voltage sources pay it.
    pub cost_coefficient: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct LinkSums {
    plus: f64,
    minus: f64,
    conductance: f64,
}

fn link_sums<N: NeighborView>(x: &Electrical, neighbors: &[Coupling<N>]) -> LinkSums {
    neighbors.iter().fold(LinkSums::default(), |mut acc, c| {
        let n = c.neighbor.electrical();
        acc.plus += (x.v + x.v_minus - n.v - n.v_minus) * c.conductance;
        acc.minus += (n.v_minus - x.v_minus) * c.conductance;
        acc.conductance += c.conductance;
        acc
    })
}

impl Variant {
    pub fn new(kind: AgentKind, cost_coefficient: f64) -> Self {
        Self { kind, cost_coefficient }
    }

    pub fn cost(&self, x: &Electrical) -> f64 {
        match self.kind {
            AgentKind::VoltageSource => self.cost_coefficient * x.flow * x.flow,
            AgentKind::ConstantCurrent | AgentKind::ConstantPower => 0.0,
        }
    }

    pub fn g_plus<N: NeighborView>(&self, x: &Electrical, neighbors: &[Coupling<N>]) -> f64 {
        self.scale(x) * link_sums(x, neighbors).plus - x.flow
    }

    pub fn g_minus<N: NeighborView>(&self, x: &Electrical, neighbors: &[Coupling<N>]) -> f64 {
        self.scale(x) * link_sums(x, neighbors).minus - x.flow
    }

    pub fn cost_gradient(&self, x: &Electrical, wrt: Wrt) -> Vec3 {
        match (self.kind, wrt) {
            (AgentKind::VoltageSource, Wrt::Own) => [0.0, 0.0, 2.0 * self.cost_coefficient * x.flow],
            _ => [0.0; 3],
        }
    }

    pub fn g_plus_gradient<N: NeighborView>(
        &self,
        x: &Electrical,
        neighbors: &[Coupling<N>],
        wrt: Wrt,
    ) -> Vec3 {
        match wrt {
            Wrt::Own => {
                let s = link_sums(x, neighbors);
                match self.kind {
                    AgentKind::ConstantCurrent => [s.conductance, s.conductance, 0.0],
                    AgentKind::ConstantPower | AgentKind::VoltageSource => [
                        s.plus + x.v * s.conductance,
                        x.v * s.conductance,
                        self.flow_sensitivity(),
                    ],
                }
            }
            Wrt::Neighbor { conductance } => coupling_gradients(self.kind, x.v, conductance).0,
        }
    }

    pub fn g_minus_gradient<N: NeighborView>(
        &self,
        x: &Electrical,
        neighbors: &[Coupling<N>],
        wrt: Wrt,
    ) -> Vec3 {
        match wrt {
            Wrt::Own => {
                let s = link_sums(x, neighbors);
                match self.kind {
                    AgentKind::ConstantCurrent => [0.0, -s.conductance, 0.0],
                    AgentKind::ConstantPower | AgentKind::VoltageSource => {
                        [s.minus, -x.v * s.conductance, self.flow_sensitivity()]
                    }
                }
            }
            Wrt::Neighbor { conductance } => coupling_gradients(self.kind, x.v, conductance).1,
        }
    }

    /// Factor in front of the link sums: v for power, 1 for current.
    fn scale(&self, x: &Electrical) -> f64 {
        if self.kind.is_voltage_scaled() {
            x.v
        } else {
            1.0
        }
    }

    fn flow_sensitivity(&self) -> f64 {
        match self.kind {
            AgentKind::VoltageSource => -1.0,
            AgentKind::ConstantCurrent | AgentKind::ConstantPower => 0.0,
        }
    }
}

/// Gradients of an owner's (g+, g−) with respect to one of its neighbors,
/// where `owner_v` is the owner's voltage and `conductance` the link between
/// them. Both residuals are linear in the neighbor's state.
pub fn coupling_gradients(owner: AgentKind, owner_v: f64, conductance: f64) -> (Vec3, Vec3) {
    let w = if owner.is_voltage_scaled() { owner_v * conductance } else { conductance };
    ([-w, -w, 0.0], [0.0, w, 0.0])
}

/// Same as [`coupling_gradients`], reading the owner through a view.
pub fn view_coupling_gradients<N: NeighborView>(owner: &N, conductance: f64) -> (Vec3, Vec3) {
    coupling_gradients(owner.kind(), owner.electrical().v, conductance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentSnapshot;

    fn snapshot(kind: AgentKind, v: f64, v_minus: f64) -> AgentSnapshot {
        AgentSnapshot {
            kind,
            v,
            v_minus,
            flow: 0.0,
            lambda_plus: 0.0,
            lambda_minus: 0.0,
            alpha: 0.1,
            g_plus: 0.0,
            g_minus: 0.0,
            convergence: 1.0,
        }
    }

    fn couple(n: AgentSnapshot, conductance: f64) -> Coupling<AgentSnapshot> {
        Coupling { neighbor: n, conductance }
    }

    #[test]
    fn test_constant_current_residuals() {
        let variant = Variant::new(AgentKind::ConstantCurrent, 0.0);
        let x = Electrical { v: 12.0, v_minus: 0.5, flow: -2.0 };
        let ns = vec![couple(snapshot(AgentKind::VoltageSource, 12.5, 0.0), 4.0)];
        // S+ = (12 + 0.5 - 12.5) * 4 = 0, S- = (0 - 0.5) * 4 = -2
        assert!((variant.g_plus(&x, &ns) - 2.0).abs() < 1e-12);
        assert!((variant.g_minus(&x, &ns) - 0.0).abs() < 1e-12);
        assert_eq!(variant.cost(&x), 0.0);
    }

    #[test]
    fn test_voltage_source_cost_gradient() {
        let variant = Variant::new(AgentKind::VoltageSource, 0.01);
        let x = Electrical { v: 12.0, v_minus: 0.0, flow: 50.0 };
        assert!((variant.cost(&x) - 25.0).abs() < 1e-12);
        assert_eq!(variant.cost_gradient(&x, Wrt::Own), [0.0, 0.0, 1.0]);
        assert_eq!(variant.cost_gradient(&x, Wrt::Neighbor { conductance: 2.0 }), [0.0; 3]);
    }

    #[test]
    fn test_own_gradients_match_finite_difference() {
        let ns = vec![
            couple(snapshot(AgentKind::ConstantPower, 11.7, 0.3), 3.0),
            couple(snapshot(AgentKind::ConstantCurrent, 12.2, 0.1), 1.5),
        ];
        let h = 1e-6;
        for kind in [AgentKind::ConstantCurrent, AgentKind::ConstantPower, AgentKind::VoltageSource] {
            let variant = Variant::new(kind, 0.01);
            let x = Electrical { v: 12.1, v_minus: 0.2, flow: -4.0 };
            let gp = variant.g_plus_gradient(&x, &ns, Wrt::Own);
            let gm = variant.g_minus_gradient(&x, &ns, Wrt::Own);
            for axis in 0..3 {
                let mut up = x.to_array();
                let mut down = x.to_array();
                up[axis] += h;
                down[axis] -= h;
                let (up, down) = (Electrical::from_array(up), Electrical::from_array(down));
                let dp = (variant.g_plus(&up, &ns) - variant.g_plus(&down, &ns)) / (2.0 * h);
                let dm = (variant.g_minus(&up, &ns) - variant.g_minus(&down, &ns)) / (2.0 * h);
                // Flow of a fixed load is not a decision variable.
                let (dp, dm) = if axis == 2 && kind.has_fixed_flow() { (0.0, 0.0) } else { (dp, dm) };
                assert!((gp[axis] - dp).abs() < 1e-5, "{kind:?} g+ axis {axis}: {} vs {dp}", gp[axis]);
                assert!((gm[axis] - dm).abs() < 1e-5, "{kind:?} g- axis {axis}: {} vs {dm}", gm[axis]);
            }
        }
    }

    #[test]
    fn test_neighbor_gradients_match_finite_difference() {
        let h = 1e-6;
        let owner = Electrical { v: 11.9, v_minus: 0.4, flow: -30.0 };
        let conductance = 2.5;
        for kind in [AgentKind::ConstantCurrent, AgentKind::ConstantPower, AgentKind::VoltageSource] {
            let variant = Variant::new(kind, 0.01);
            let (gp, gm) = coupling_gradients(kind, owner.v, conductance);
            for axis in 0..2 {
                let mut up = [12.0, 0.1, 0.0];
                let mut down = up;
                up[axis] += h;
                down[axis] -= h;
                let ns_up = vec![couple(snapshot(AgentKind::ConstantPower, up[0], up[1]), conductance)];
                let ns_down = vec![couple(snapshot(AgentKind::ConstantPower, down[0], down[1]), conductance)];
                let dp = (variant.g_plus(&owner, &ns_up) - variant.g_plus(&owner, &ns_down)) / (2.0 * h);
                let dm = (variant.g_minus(&owner, &ns_up) - variant.g_minus(&owner, &ns_down)) / (2.0 * h);
                assert!((gp[axis] - dp).abs() < 1e-5);
                assert!((gm[axis] - dm).abs() < 1e-5);
            }
            assert_eq!(
                variant.g_plus_gradient::<AgentSnapshot>(&owner, &[], Wrt::Neighbor { conductance }),
                gp
            );
        }
    }

    #[test]
    fn test_isolated_agent_residual_is_flow() {
        let variant = Variant::new(AgentKind::ConstantPower, 0.0);
        let x = Electrical { v: 12.0, v_minus: 0.0, flow: -5.0 };
        let none: Vec<Coupling<AgentSnapshot>> = Vec::new();
        assert!((variant.g_plus(&x, &none) - 5.0).abs() < f64::EPSILON);
        assert!((variant.g_minus(&x, &none) - 5.0).abs() < f64::EPSILON);
    }
}
