pub mod risk_gate;
pub mod state_store;
