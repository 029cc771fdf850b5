// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Reference Networks

//! Reference networks used for regression runs and parameter tuning.

use crate::config::OptimizationParams;
use crate::error::NetworkError;
use crate::network::NetworkBuilder;
use crate::simulation::{Disturbance, DisturbanceAction, Simulation};

/// One grounded power supply feeding one charger over a single link.
pub fn two_bus(load_power: f64, conductance: f64) -> Result<NetworkBuilder, NetworkError> {
    let mut builder = NetworkBuilder::new();
    builder
        .power_supply("PS1", 150.0)?
        .grounded("PS1", true)?
        .charger("CP1", load_power)?
        .link("PS1", "CP1", conductance)?;
    Ok(builder)
}

/// Schedule that keeps the eight-bus line stable.
pub fn eight_bus_params() -> OptimizationParams {
    OptimizationParams {
        alpha: 0.1,
        alpha_max: 1e24,
        alpha_multiplier: 1.001,
        lambda_max: 1000.0,
        lambda_multiplier: 0.1,
        epsilon: 10.0,
        epsilon_multiplier: 0.999,
    }
}

/// Two supplies, four chargers and two LED drivers on a line of 1 m cables:
///
/// ```text
/// CC2 - CC1 - VC1 - VC2 - CP1 - CP2 - CP3 - CP4
/// ```
///
/// VC1 is the grounded reference.
pub fn eight_bus_line() -> Result<NetworkBuilder, NetworkError> {
    let mut builder = NetworkBuilder::new();
    builder
        .params(eight_bus_params())
        .power_supply("VC1", 200.0)?
        .grounded("VC1", true)?
        .power_supply("VC2", 165.0)?
        .chargers("CP", 4, -50.0)?
        .led("CC1", -6.0)?
        .led("CC2", -6.0)?;
    for (a, b) in [
        ("VC1", "CC1"),
        ("CC1", "CC2"),
        ("VC1", "VC2"),
        ("VC2", "CP1"),
        ("CP1", "CP2"),
        ("CP2", "CP3"),
        ("CP3", "CP4"),
    ] {
        builder.link_length(a, b, 1.0)?;
    }
    Ok(builder)
}

/// Eight-bus line where CP1 switches off its load at iteration 700.
pub fn eight_bus_load_change() -> Result<Simulation, NetworkError> {
    eight_bus_line()?
        .disturbance(Disturbance::new(700, "CP1", DisturbanceAction::SetLoad(0.0)))?
        .build()
}

/// Eight-bus line where VC1 drops off the network between iterations 50
/// and 450.
pub fn eight_bus_communication_error() -> Result<Simulation, NetworkError> {
    eight_bus_line()?
        .disturbance(Disturbance::new(50, "VC1", DisturbanceAction::Pause))?
        .disturbance(Disturbance::new(450, "VC1", DisturbanceAction::Resume))?
        .build()
}
