use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, get, http::header, post, web};
use serde::{Deserialize, Serialize};

use crate::adapters::legacy_tokens::LegacyTokenDirectory;
use crate::adapters::station_socket::station_socket;
use crate::app::services::{
    IngestHandler, ServiceError, StationDataLookup, StationQueryHandler, WindService,
};
use crate::domain::models::{StationSummary, TelemetrySample, to_iso8601};
use crate::domain::telemetry::decode_message;
use crate::domain::wind_stats::WindStats;

const MAX_WINDOW_MINUTES: u32 = 24 * 60;

#[derive(Clone)]
pub struct ApiState {
    pub stations: WindService,
    pub legacy_tokens: Arc<LegacyTokenDirectory>,
    pub default_window_minutes: u32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct StationResponse {
    pub short_id: String,
    pub station_name: String,
    pub online: bool,
    pub connected_at: String,
    pub lastseen: String,
}

impl From<StationSummary> for StationResponse {
    fn from(station: StationSummary) -> Self {
        Self {
            short_id: station.short_id,
            station_name: station.station_name,
            online: station.online,
            connected_at: to_iso8601(station.connected_at),
            lastseen: to_iso8601(station.lastseen),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct WindResponse {
    pub instantaneous: Option<f64>,
    pub sustained: Option<f64>,
    pub gust: Option<f64>,
}

impl From<WindStats> for WindResponse {
    fn from(wind: WindStats) -> Self {
        Self {
            instantaneous: wind.instantaneous,
            sustained: wind.sustained,
            gust: wind.gust,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StationDataResponse {
    pub station_name: String,
    pub short_id: String,
    pub server_time: String,
    pub online: bool,
    pub samples: Vec<TelemetrySample>,
    pub wind: WindResponse,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub minutes: Option<u32>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(list_stations_endpoint)
        .service(station_data_endpoint)
        .service(push_data_endpoint)
        .service(station_socket);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/v0/stations")]
async fn list_stations_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.stations.list_stations() {
        Ok(stations) => {
            let mapped: Vec<StationResponse> =
                stations.into_iter().map(StationResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => service_error_response(error),
    }
}

#[get("/v0/stations/{station_name}/{short_id}/data")]
async fn station_data_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<(String, String)>,
    query: web::Query<WindowQuery>,
) -> impl Responder {
    let (station_name, short_id) = path.into_inner();
    let minutes = query
        .minutes
        .unwrap_or(state.default_window_minutes)
        .clamp(1, MAX_WINDOW_MINUTES);
    let lookback = chrono::Duration::minutes(i64::from(minutes));

    let service = state.stations.clone();
    let lookup =
        web::block(move || service.station_data(&station_name, &short_id, lookback)).await;

    match lookup {
        Ok(Ok(StationDataLookup::Found(window))) => HttpResponse::Ok().json(StationDataResponse {
            station_name: window.station.station_name,
            short_id: window.station.short_id,
            server_time: to_iso8601(window.server_time),
            online: window.station.online,
            samples: window.samples,
            wind: window.wind.into(),
        }),
        Ok(Ok(StationDataLookup::UnknownStation)) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "Station Not Found" }))
        }
        Ok(Ok(StationDataLookup::NoStorage)) => HttpResponse::NotFound()
            .json(serde_json::json!({ "error": "No data for this station" })),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

#[post("/v0/data")]
async fn push_data_endpoint(
    req: HttpRequest,
    state: web::Data<ApiState>,
    body: web::Bytes,
) -> impl Responder {
    let identity = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| state.legacy_tokens.resolve_header(value))
        .cloned();

    let Some(identity) = identity else {
        tracing::warn!("legacy push rejected: missing or unknown bearer token");
        return HttpResponse::Unauthorized().json(serde_json::json!({ "error": "Unauthorized" }));
    };

    let payload = match decode_message(&body) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::debug!(uuid = %identity.uuid, error = %error, "legacy push body rejected");
            return service_error_response(error.into());
        }
    };

    let service = state.stations.clone();
    let target = identity.clone();
    match web::block(move || service.push_sample(&target, payload)).await {
        Ok(Ok(())) => {
            tracing::debug!(
                uuid = %identity.uuid,
                station_name = %identity.station_name,
                "legacy sample stored"
            );
            HttpResponse::Ok().json(serde_json::json!({ "status": "success" }))
        }
        Ok(Err(error)) => {
            tracing::warn!(uuid = %identity.uuid, error = %error, "legacy push failed");
            service_error_response(error)
        }
        Err(error) => blocking_error_response(error),
    }
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::Parse(error) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("malformed telemetry: {error}")
        })),
        ServiceError::Registry(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("station registry unavailable: {error}")
            }))
        }
        ServiceError::Storage(error) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("journal operation failed: {error}")
            }))
        }
    }
}

fn blocking_error_response(error: actix_web::error::BlockingError) -> HttpResponse {
    tracing::error!(error = %error, "blocking task failed");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "internal task failure"
    }))
}
