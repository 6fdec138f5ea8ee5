pub mod models;
pub mod registry;
pub mod session_state;
pub mod telemetry;
pub mod wind_stats;
