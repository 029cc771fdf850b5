#[cfg(test)]
mod tests {
    use gridmesh_engine::scenarios::{
        eight_bus_communication_error, eight_bus_line, eight_bus_load_change, two_bus,
    };
    use gridmesh_engine::{
        objective, Disturbance, DisturbanceAction, Electrical, ProtocolState, SimulationConfig,
        Simulation, Trajectory, TuningParameters, AXIS_FLOW, AXIS_V_MINUS,
    };

    /// Honours `RUST_LOG` when debugging a failing run.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn two_bus_sim() -> Simulation {
        two_bus(-5.0, 1.0)
            .and_then(|b| b.build())
            .expect("test: two-bus network")
    }

    fn eight_bus_sim() -> Simulation {
        eight_bus_line()
            .and_then(|b| b.build())
            .expect("test: eight-bus network")
    }

    /// Every recorded state of every agent lies inside that agent's box.
    fn assert_within_bounds(sim: &Simulation, trajectory: &Trajectory) {
        for snapshot in trajectory.iter() {
            for (agent, x) in sim.agents().iter().zip(snapshot.state.chunks_exact(3)) {
                let x = Electrical::from_array([x[0], x[1], x[2]]);
                assert!(
                    agent.state().bounds().contains(&x),
                    "{} left its bounds at iteration {}: {:?}",
                    agent.name(),
                    snapshot.iteration,
                    x
                );
            }
        }
    }

    // ========== Convergence ==========

    #[test]
    fn test_two_bus_converges() {
        init_tracing();
        let mut sim = two_bus_sim();
        let trajectory = sim.run(10_000);

        let last = trajectory.last().expect("test: snapshots");
        println!("final constraint norm: {}", last.constraint_norm());
        assert!(last.constraint_norm() < 1e-2, "residual {}", last.constraint_norm());
        assert!(last.constraint_norm() < trajectory.first().expect("test: first").constraint_norm());
        assert_within_bounds(&sim, &trajectory);
        assert!(last.all_in(ProtocolState::Idle), "states: {:?}", last.protocol_states);
    }

    #[test]
    fn test_two_bus_supply_covers_load() {
        let mut sim = two_bus_sim();
        sim.run(10_000);
        let supply = sim.agent("PS1").expect("test: PS1").state().electrical();
        // Line losses come on top of the 5 W demand.
        assert!(supply.flow > 5.0 && supply.flow < 6.0, "supply flow {}", supply.flow);
    }

    #[test]
    fn test_eight_bus_line_reduces_residuals() {
        let mut sim = eight_bus_sim();
        let trajectory = sim.run(2_000);

        for snapshot in trajectory.iter() {
            // VC1 is agent 0 and grounded.
            assert_eq!(snapshot.state[AXIS_V_MINUS], 0.0, "iteration {}", snapshot.iteration);
        }
        let initial = trajectory.first().expect("test: first").constraint_norm();
        let last = trajectory.last().expect("test: last").constraint_norm();
        println!("constraint norm {initial} -> {last}");
        assert!(last.is_finite());
        assert!(initial / last > 10.0, "only reduced from {initial} to {last}");
        assert_within_bounds(&sim, &trajectory);
    }

    #[test]
    fn test_live_mode_matches_cached_direction() {
        let mut builder = two_bus(-5.0, 1.0).expect("test: builder");
        builder.config(SimulationConfig { use_cache: false, ..Default::default() });
        let mut sim = builder.build().expect("test: build");
        let trajectory = sim.run(5_000);
        let initial = trajectory.first().expect("test: first").constraint_norm();
        let last = trajectory.last().expect("test: last").constraint_norm();
        assert!(last < initial / 10.0, "live mode stalled at {last}");
    }

    // ========== Invariants ==========

    #[test]
    fn test_conductance_symmetry_survives_run() {
        let mut sim = eight_bus_sim();
        sim.run(50);
        for agent in sim.agents() {
            for (&neighbor, &g) in agent.state().links() {
                let back = sim.agents()[neighbor.index()]
                    .state()
                    .conductance(agent.id())
                    .expect("test: reverse link");
                assert_eq!(g, back);
            }
        }
    }

    #[test]
    fn test_duals_stay_bounded() {
        let mut sim = eight_bus_sim();
        let trajectory = sim.run(500);
        let params = *sim.agents()[0].state().params();
        for snapshot in trajectory.iter() {
            for lambda in &snapshot.duals {
                assert!(lambda.abs() <= params.lambda_max);
            }
            for alpha in &snapshot.alphas {
                assert!(*alpha > 0.0 && *alpha <= params.alpha_max);
            }
        }
    }

    #[test]
    fn test_fixed_loads_keep_their_demand() {
        let mut sim = eight_bus_sim();
        let trajectory = sim.run(200);
        let last = trajectory.last().expect("test: last");
        // CP1..CP4 are agents 2..=5, CC1 and CC2 are 6 and 7.
        for i in 2..6 {
            assert_eq!(last.state[3 * i + AXIS_FLOW], -50.0);
        }
        for i in 6..8 {
            assert_eq!(last.state[3 * i + AXIS_FLOW], -6.0);
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut sim = eight_bus_sim();
        sim.run(30);
        let h = 1e-6;
        for name in ["VC2", "CP2", "CC1"] {
            let agent = sim.agent(name).expect("test: agent");
            let state = agent.state();
            let analytic = state.gradient_with(&state.live_couplings(sim.agents()));
            let origin = state.electrical().to_array();
            let free_axes = if state.kind().has_fixed_flow() { 2 } else { 3 };

            for axis in 0..free_axes {
                let mut up = origin;
                let mut down = origin;
                up[axis] += h;
                down[axis] -= h;
                sim.agent_mut(name).expect("test: agent").state_mut().set_state(up);
                let l_up = sim.lagrangian().total();
                sim.agent_mut(name).expect("test: agent").state_mut().set_state(down);
                let l_down = sim.lagrangian().total();
                sim.agent_mut(name).expect("test: agent").state_mut().set_state(origin);

                let numeric = (l_up - l_down) / (2.0 * h);
                let tolerance = 1e-4 * numeric.abs().max(1.0);
                assert!(
                    (analytic[axis] - numeric).abs() < tolerance,
                    "{name} axis {axis}: analytic {} numeric {numeric}",
                    analytic[axis]
                );
            }
        }
    }

    // ========== Disturbances ==========

    #[test]
    fn test_permanent_outage_never_completes() {
        let mut builder = eight_bus_line().expect("test: builder");
        builder
            .disturbance(Disturbance::new(50, "VC1", DisturbanceAction::Pause))
            .expect("test: disturbance");
        let mut sim = builder.build().expect("test: build");
        let trajectory = sim.run(1_000);

        for snapshot in trajectory.iter().skip(51) {
            assert_eq!(snapshot.protocol_states[0], ProtocolState::Off);
            assert!(
                !snapshot.protocol_states.contains(&ProtocolState::Idle),
                "iteration {}: {:?}",
                snapshot.iteration,
                snapshot.protocol_states
            );
        }
    }

    #[test]
    fn test_communication_error_freezes_and_recovers() {
        init_tracing();
        let mut sim = eight_bus_communication_error().expect("test: build");
        let trajectory = sim.run(600);

        let frozen = &trajectory.snapshots[51];
        assert_eq!(frozen.protocol_states[0], ProtocolState::Off);
        for snapshot in &trajectory.snapshots[51..=450] {
            assert_eq!(snapshot.protocol_states[0], ProtocolState::Off);
            assert_eq!(snapshot.state[..3], frozen.state[..3]);
        }
        let last = trajectory.last().expect("test: last");
        assert_ne!(last.protocol_states[0], ProtocolState::Off);
        assert!(last.constraint_norm().is_finite());
    }

    #[test]
    fn test_load_change_applies_at_scheduled_iteration() {
        let mut sim = eight_bus_load_change().expect("test: build");
        let trajectory = sim.run(900);
        // CP1 is agent 2.
        let flow_of_cp1 = |k: usize| trajectory.snapshots[k].state[3 * 2 + AXIS_FLOW];
        assert_eq!(flow_of_cp1(700), -50.0);
        assert_eq!(flow_of_cp1(701), 0.0);
        assert_eq!(flow_of_cp1(900), 0.0);
        assert!(trajectory.last().expect("test: last").constraint_norm().is_finite());
    }

    #[test]
    fn test_set_load_rejected_for_supply() {
        let mut sim = two_bus_sim();
        assert!(sim.set_load("PS1", 3.0).is_err());
        assert!(sim.set_load("nobody", 3.0).is_err());
        assert!(sim.set_load("CP1", -3.0).is_ok());
    }

    // ========== Tuning ==========

    #[test]
    fn test_objective_scores_two_bus() {
        let factory = || two_bus(-5.0, 1.0).and_then(|b| b.build());
        let baseline = TuningParameters::from_simulation(&factory().expect("test: build"))
            .expect("test: parameters");
        let short = objective(factory, &baseline, 100);
        let long = objective(factory, &baseline, 5_000);
        assert!(short.is_finite() && long.is_finite());
        assert!(long < short, "longer run scored {long} vs {short}");
    }
}
