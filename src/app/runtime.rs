use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use chrono::{DateTime, Utc};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::journal::FileJournal;
use crate::adapters::legacy_tokens::LegacyTokenDirectory;
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::services::WindService;
use crate::domain::registry::{AllowList, StationAuthorizer, StationRegistry};
use crate::domain::session_state::Clock;

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn build_state(config: &AppConfig) -> Result<ApiState, AppError> {
    let journal = FileJournal::open(&config.data_dir)?;

    let authorizer: Arc<dyn StationAuthorizer> = if config.filter_stations {
        Arc::new(AllowList::only(&config.allowed_station_uuids))
    } else {
        Arc::new(AllowList::allow_all())
    };
    let registry = StationRegistry::new(authorizer, config.recent_stations_limit);

    let service = WindService::new(
        Arc::new(registry),
        Arc::new(journal),
        Arc::new(SystemClock),
        chrono::Duration::minutes(i64::from(config.stats_window_minutes)),
    );

    let legacy_tokens = match config.legacy_stations_path.as_deref() {
        Some(path) => LegacyTokenDirectory::from_file(path)?,
        None => LegacyTokenDirectory::empty(),
    };

    let remembered = service.remember_stations(legacy_tokens.stations())?;
    if remembered > 0 {
        tracing::info!(stations = remembered, "legacy stations listed as offline");
    }

    Ok(ApiState {
        stations: service,
        legacy_tokens: Arc::new(legacy_tokens),
        default_window_minutes: config.window_minutes,
    })
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let api_state = build_state(&config)?;

    if config.filter_stations {
        tracing::info!(
            allowed = config.allowed_station_uuids.len(),
            "station allow-list enabled"
        );
    }
    if !api_state.legacy_tokens.is_empty() {
        tracing::info!(
            stations = api_state.legacy_tokens.len(),
            "legacy push enabled"
        );
    }

    tracing::info!(bind = %config.http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allowed_methods(["GET", "POST"])
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)?
        .run()
        .await
    });

    Ok(server_result?)
}
