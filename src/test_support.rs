use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::adapters::api::ApiState;
use crate::adapters::journal::FileJournal;
use crate::adapters::legacy_tokens::LegacyTokenDirectory;
use crate::app::services::WindService;
use crate::domain::models::{TelemetrySample, to_iso8601};
use crate::domain::registry::{AllowList, StationRegistry};
use crate::domain::session_state::Clock;

pub fn temp_data_dir(name: &str) -> PathBuf {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join(name);
    std::mem::forget(dir);
    path
}

pub fn sample_at(at: DateTime<Utc>, windspeed_mps: f64) -> TelemetrySample {
    TelemetrySample::new(to_iso8601(at), windspeed_mps)
}

pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock should be available");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock should be available")
    }
}

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("fixed timestamp should be valid")
}

pub const LEGACY_TOKEN: &str = "s3cret";

pub fn api_state(name: &str) -> ApiState {
    api_state_with(temp_data_dir(name), AllowList::allow_all())
}

pub fn api_state_with(data_dir: PathBuf, allow_list: AllowList) -> ApiState {
    let journal = FileJournal::open(data_dir).expect("journal should open");
    let registry = StationRegistry::new(Arc::new(allow_list), 100);
    let legacy_tokens = LegacyTokenDirectory::from_json(
        r#"[{"uuid": "legacy-pier", "station_name": "Legacy Pier", "token": "s3cret"}]"#,
    )
    .expect("token directory should parse");

    ApiState {
        stations: WindService::new(
            Arc::new(registry),
            Arc::new(journal),
            Arc::new(FixedClock::new(noon())),
            Duration::minutes(10),
        ),
        legacy_tokens: Arc::new(legacy_tokens),
        default_window_minutes: 60,
    }
}
