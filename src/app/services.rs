use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::journal::{JournalError, PartitionFormat, TelemetryJournal};
use crate::domain::models::{StationIdentity, StationSummary, TelemetrySample};
use crate::domain::registry::{
    RegistrationOutcome, RegistryError, SampleOutcome, StationRegistry,
};
use crate::domain::session_state::Clock;
use crate::domain::telemetry::{ParseError, sample_from_payload};
use crate::domain::wind_stats::{WindStats, compute_wind_stats, within_window};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("station registry unavailable: {0}")]
    Registry(#[from] RegistryError),
    #[error("journal operation failed: {0}")]
    Storage(#[from] JournalError),
    #[error("malformed telemetry: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowLookup {
    NotFound,
    Found(Vec<TelemetrySample>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationWindow {
    pub station: StationSummary,
    pub server_time: DateTime<Utc>,
    pub samples: Vec<TelemetrySample>,
    pub wind: WindStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StationDataLookup {
    UnknownStation,
    NoStorage,
    Found(StationWindow),
}

pub trait IngestHandler {
    fn register(
        &self,
        identity: &StationIdentity,
        source_addr: &str,
    ) -> Result<RegistrationOutcome, ServiceError>;
    fn record_sample(
        &self,
        uuid: &str,
        session_id: Uuid,
        payload: Value,
    ) -> Result<SampleOutcome, ServiceError>;
    fn close(&self, uuid: &str, session_id: Uuid) -> Result<bool, ServiceError>;
    fn push_sample(&self, identity: &StationIdentity, payload: Value) -> Result<(), ServiceError>;
}

pub trait StationQueryHandler {
    fn list_stations(&self) -> Result<Vec<StationSummary>, ServiceError>;
    fn get_window(
        &self,
        uuid: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<WindowLookup, ServiceError>;
    fn station_data(
        &self,
        station_name: &str,
        public_id: &str,
        lookback: Duration,
    ) -> Result<StationDataLookup, ServiceError>;
}

#[derive(Clone)]
pub struct WindService {
    registry: Arc<StationRegistry>,
    journal: Arc<dyn TelemetryJournal>,
    clock: Arc<dyn Clock>,
    stats_window: Duration,
}

impl WindService {
    pub fn new(
        registry: Arc<StationRegistry>,
        journal: Arc<dyn TelemetryJournal>,
        clock: Arc<dyn Clock>,
        stats_window: Duration,
    ) -> Self {
        Self {
            registry,
            journal,
            clock,
            stats_window,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Lists stations known from configuration before they connect or push.
    pub fn remember_stations<'a, I>(&self, identities: I) -> Result<usize, ServiceError>
    where
        I: IntoIterator<Item = &'a StationIdentity>,
    {
        let now = self.clock.now();
        let mut added = 0;
        for identity in identities {
            if self.registry.remember_offline(identity, now)? {
                added += 1;
            }
        }

        Ok(added)
    }
}

impl IngestHandler for WindService {
    fn register(
        &self,
        identity: &StationIdentity,
        source_addr: &str,
    ) -> Result<RegistrationOutcome, ServiceError> {
        Ok(self
            .registry
            .register(identity, source_addr, self.clock.now())?)
    }

    /// Liveness is updated before the append, so `lastseen` moves even when
    /// the message turns out to be malformed or the write fails.
    fn record_sample(
        &self,
        uuid: &str,
        session_id: Uuid,
        payload: Value,
    ) -> Result<SampleOutcome, ServiceError> {
        let now = self.clock.now();
        let outcome = self.registry.record_sample(uuid, session_id, now)?;
        if outcome != SampleOutcome::Recorded {
            return Ok(outcome);
        }

        let sample = sample_from_payload(payload, now)?;
        self.journal.append(uuid, &sample, now)?;

        Ok(SampleOutcome::Recorded)
    }

    fn close(&self, uuid: &str, session_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.registry.close(uuid, session_id)?)
    }

    fn push_sample(&self, identity: &StationIdentity, payload: Value) -> Result<(), ServiceError> {
        let now = self.clock.now();
        let sample = sample_from_payload(payload, now)?;

        self.journal
            .append_with(PartitionFormat::JsonArray, &identity.uuid, &sample, now)?;
        self.registry.observe_push(identity, now)?;

        Ok(())
    }
}

impl StationQueryHandler for WindService {
    fn list_stations(&self) -> Result<Vec<StationSummary>, ServiceError> {
        Ok(self.registry.list_active()?)
    }

    fn get_window(
        &self,
        uuid: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<WindowLookup, ServiceError> {
        if !self.journal.station_exists(uuid)? {
            return Ok(WindowLookup::NotFound);
        }

        let samples = self.journal.read_range(uuid, now - lookback, now)?;
        Ok(WindowLookup::Found(samples))
    }

    fn station_data(
        &self,
        station_name: &str,
        public_id: &str,
        lookback: Duration,
    ) -> Result<StationDataLookup, ServiceError> {
        let Some(station) = self.registry.find_station(station_name, public_id)? else {
            return Ok(StationDataLookup::UnknownStation);
        };

        let now = self.clock.now();
        let read_span = lookback.max(self.stats_window);
        let WindowLookup::Found(samples) = self.get_window(&station.uuid, now, read_span)? else {
            return Ok(StationDataLookup::NoStorage);
        };

        let wind = compute_wind_stats(&within_window(&samples, now, self.stats_window));
        let samples = if read_span == lookback {
            samples
        } else {
            within_window(&samples, now, lookback)
        };

        Ok(StationDataLookup::Found(StationWindow {
            station,
            server_time: now,
            samples,
            wind,
        }))
    }
}
