// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Convergence Estimate

//! Gossip estimate of the network-wide distance from optimum.
//!
//! Every agent keeps h̄ and nudges it toward each neighbor's value by
//! ξ·(n.h̄ − h̄), sending the opposite nudge to the neighbor. The pairwise
//! corrections cancel, so Σ h̄ tracks Σ h across the component and h̄ settles
//! on the mean raw measure. h̄ is not clamped and may dip below zero.

use crate::types::{norm, AgentId, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceEstimate {
    estimate: f64,
    previous_measure: f64,
    pending_correction: f64,
}

impl ConvergenceEstimate {
    /// Both the estimate and the last raw measure start at `initial` so no
    /// agent looks converged before it has measured anything.
    pub fn new(initial: f64) -> Self {
        Self { estimate: initial, previous_measure: initial, pending_correction: 0.0 }
    }

    /// Current h̄.
    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn previous_measure(&self) -> f64 {
        self.previous_measure
    }

    pub fn pending_correction(&self) -> f64 {
        self.pending_correction
    }

    /// Raw local measure h = ‖[g+, g−]‖ + ‖Δx‖.
    pub fn measure(g_plus: f64, g_minus: f64, displacement: &Vec3) -> f64 {
        norm(&[g_plus, g_minus]) + norm(displacement)
    }

    /// Corrections pushed by neighbors since the last update.
    pub fn add_correction(&mut self, correction: f64) {
        self.pending_correction += correction;
    }

    /// Fold in a new raw measure. Returns the correction to send to each
    /// neighbor in `neighbors` (id, neighbor h̄).
    pub fn update(
        &mut self,
        measure: f64,
        neighbors: &[(AgentId, f64)],
        gain: f64,
    ) -> Vec<(AgentId, f64)> {
        let corrections: Vec<(AgentId, f64)> = neighbors
            .iter()
            .map(|&(id, theirs)| (id, gain * (theirs - self.estimate)))
            .collect();
        let pulled: f64 = corrections.iter().map(|(_, c)| c).sum();
        self.estimate += pulled - self.pending_correction + (measure - self.previous_measure);
        self.pending_correction = 0.0;
        self.previous_measure = measure;
        corrections
    }

    pub fn is_below(&self, target: f64) -> bool {
        self.estimate < target && self.previous_measure < target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unconverged() {
        let est = ConvergenceEstimate::new(1.0);
        assert!(!est.is_below(1e-3));
        assert_eq!(est.pending_correction(), 0.0);
    }

    #[test]
    fn test_single_agent_tracks_measure() {
        let mut est = ConvergenceEstimate::new(1.0);
        est.update(0.4, &[], 0.1);
        assert!((est.estimate() - 0.4).abs() < 1e-12);
        est.update(1e-4, &[], 0.1);
        assert!(est.is_below(1e-3));
    }

    #[test]
    fn test_pairwise_corrections_preserve_sum() {
        let mut a = ConvergenceEstimate::new(1.0);
        let mut b = ConvergenceEstimate::new(1.0);
        let measures = [(2.0, 0.0), (2.0, 0.0), (2.0, 0.0)];
        for _ in 0..200 {
            for &(ha, hb) in &measures {
                let sent = a.update(ha, &[(AgentId(1), b.estimate())], 0.1);
                b.add_correction(sent[0].1);
                let sent = b.update(hb, &[(AgentId(0), a.estimate())], 0.1);
                a.add_correction(sent[0].1);
            }
        }
        // Outstanding corrections close the books.
        let total = a.estimate() - a.pending_correction() + b.estimate() - b.pending_correction();
        assert!((total - 2.0).abs() < 1e-9, "sum drifted to {total}");
        assert!((a.estimate() - 1.0).abs() < 1e-3);
        assert!((b.estimate() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_measure_combines_residuals_and_motion() {
        let h = ConvergenceEstimate::measure(3.0, 4.0, &[0.0, 0.0, 1.0]);
        assert!((h - 6.0).abs() < 1e-12);
    }
}
