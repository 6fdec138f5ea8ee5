use crate::app::AppError;

const DEFAULT_PORT: u16 = 4001;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_bind: String,
    pub data_dir: String,
    pub filter_stations: bool,
    pub allowed_station_uuids: Vec<String>,
    pub legacy_stations_path: Option<String>,
    pub window_minutes: u32,
    pub stats_window_minutes: u32,
    pub recent_stations_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_bind = match non_empty(&lookup, "HTTP_BIND") {
            Some(bind) => bind,
            None => format!(
                "0.0.0.0:{}",
                parse_or_default(&lookup, "PORT", DEFAULT_PORT)?
            ),
        };

        let allowed_station_uuids: Vec<String> = non_empty(&lookup, "FILTER_STATIONS_UUIDS")
            .map(|raw| {
                raw.split(',')
                    .map(|uuid| uuid.trim().to_ascii_lowercase())
                    .filter(|uuid| !uuid.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            http_bind,
            data_dir: non_empty(&lookup, "DATA_DIR").unwrap_or_else(|| "stations".to_string()),
            filter_stations: parse_bool_or_default(&lookup, "FILTER_STATIONS", false)?,
            allowed_station_uuids,
            legacy_stations_path: non_empty(&lookup, "LEGACY_STATIONS_PATH"),
            window_minutes: parse_or_default(&lookup, "WINDOW_MINUTES", 60_u32)?,
            stats_window_minutes: parse_or_default(&lookup, "STATS_WINDOW_MINUTES", 10_u32)?,
            recent_stations_limit: parse_or_default(&lookup, "RECENT_STATIONS_LIMIT", 10_000_usize)?,
        };

        if config.window_minutes == 0 || config.stats_window_minutes == 0 {
            return Err(AppError::config(
                "WINDOW_MINUTES and STATS_WINDOW_MINUTES must be at least 1",
            ));
        }
        if config.recent_stations_limit == 0 {
            return Err(AppError::config("RECENT_STATIONS_LIMIT must be at least 1"));
        }

        Ok(config)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

fn parse_bool_or_default<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key).map(|raw| raw.to_ascii_lowercase()) {
        Some(raw) => match raw.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(AppError::config(format!("{key} must be true or false"))),
        },
        None => Ok(default),
    }
}
