mod config;
mod error;
mod logging;
mod runtime;
pub mod services;

pub use config::AppConfig;
pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let config = AppConfig::from_env()?;

    tracing::info!(
        http_bind = %config.http_bind,
        data_dir = %config.data_dir,
        filter_stations = config.filter_stations,
        legacy_stations_path = config.legacy_stations_path.as_deref().unwrap_or("-"),
        window_minutes = config.window_minutes,
        stats_window_minutes = config.stats_window_minutes,
        recent_stations_limit = config.recent_stations_limit,
        "application bootstrap initialized"
    );

    runtime::run(config)
}
