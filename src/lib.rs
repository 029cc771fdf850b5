// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine

pub mod types;
pub mod config;
pub mod error;
pub mod variant;
pub mod neighbor;
pub mod cache;
pub mod convergence;
pub mod agent;
pub mod protocol;
pub mod optimizer;
pub mod network;
pub mod trajectory;
pub mod simulation;
pub mod scenarios;
pub mod tuning;

pub use types::*;
pub use agent::{Agent, AgentState, Duals};
pub use config::{OptimizationParams, SimulationConfig};
pub use error::{ConfigError, NetworkError};
pub use network::{AgentSpec, LinkSpec, NetworkBuilder, NetworkDescription};
pub use optimizer::LagrangianTerms;
pub use simulation::{Disturbance, DisturbanceAction, Simulation};
pub use trajectory::{IterationSnapshot, Trajectory};
pub use tuning::{objective, TuningParameters};

use wasm_bindgen::prelude::*;

// ─── WASM Interface ──────────────────────────────────────────────────────────

#[wasm_bindgen]
impl Simulation {
    /// Build from a JSON [`NetworkDescription`].
    #[wasm_bindgen(constructor)]
    pub fn from_description(description: &str) -> Result<Simulation, JsValue> {
        #[cfg(target_arch = "wasm32")]
        std::panic::set_hook(Box::new(console_error_panic_hook::hook));

        NetworkDescription::from_json(description)
            .and_then(|d| d.build())
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    pub fn tick(&mut self) -> JsValue {
        let snapshot = self.step();
        serde_wasm_bindgen::to_value(&snapshot).unwrap_or(JsValue::NULL)
    }

    /// Run N iterations without returning results.
    pub fn run_batch(&mut self, iterations: u32) {
        for _ in 0..iterations {
            self.step();
        }
    }

    pub fn get_snapshot(&self) -> JsValue {
        serde_wasm_bindgen::to_value(&self.snapshot()).unwrap_or(JsValue::NULL)
    }

    pub fn get_agent_names(&self) -> JsValue {
        let names: Vec<&str> = self.agents.iter().map(Agent::name).collect();
        serde_wasm_bindgen::to_value(&names).unwrap_or(JsValue::NULL)
    }

    pub fn pause_agent(&mut self, name: &str) -> bool {
        self.pause(name).is_ok()
    }

    pub fn resume_agent(&mut self, name: &str) -> bool {
        self.resume(name).is_ok()
    }

    pub fn set_agent_load(&mut self, name: &str, value: f64) -> bool {
        self.set_load(name, value).is_ok()
    }
}
