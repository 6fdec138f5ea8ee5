pub mod api;
pub mod journal;
pub mod legacy_tokens;
pub mod station_socket;
