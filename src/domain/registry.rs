use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{
    ConnectionInfo, RecentConnectionRecord, StationIdentity, StationSummary, is_valid_station_key,
    short_id,
};

pub trait StationAuthorizer: Send + Sync {
    fn is_authorized(&self, uuid: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    allowed: Option<HashSet<String>>,
}

impl AllowList {
    pub fn allow_all() -> Self {
        Self { allowed: None }
    }

    pub fn only<I, S>(uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: Some(
                uuids
                    .into_iter()
                    .map(|uuid| uuid.as_ref().trim().to_ascii_lowercase())
                    .filter(|uuid| !uuid.is_empty())
                    .collect(),
            ),
        }
    }
}

impl StationAuthorizer for AllowList {
    fn is_authorized(&self, uuid: &str) -> bool {
        match &self.allowed {
            None => true,
            Some(allowed) => allowed.contains(&uuid.to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Unauthorized,
    InvalidIdentity,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::InvalidIdentity => f.write_str("invalid_identity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Accepted {
        session_id: Uuid,
        replaced: Option<Uuid>,
    },
    Rejected(RejectionReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unregistered,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Recorded,
    Dropped(DropReason),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("station registry lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<String, ConnectionInfo>,
    recent: HashMap<String, RecentConnectionRecord>,
}

/// A second registration for a connected uuid replaces the first; the older
/// session's telemetry is dropped as superseded and its close is a no-op.
/// Past `recent_limit` records, the oldest offline record is evicted.
pub struct StationRegistry {
    authorizer: Arc<dyn StationAuthorizer>,
    recent_limit: usize,
    state: Mutex<RegistryState>,
}

impl StationRegistry {
    pub fn new(authorizer: Arc<dyn StationAuthorizer>, recent_limit: usize) -> Self {
        Self {
            authorizer,
            recent_limit: recent_limit.max(1),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn register(
        &self,
        identity: &StationIdentity,
        source_addr: &str,
        now: DateTime<Utc>,
    ) -> Result<RegistrationOutcome, RegistryError> {
        if !is_valid_station_key(&identity.uuid) {
            return Ok(RegistrationOutcome::Rejected(RejectionReason::InvalidIdentity));
        }
        if !self.authorizer.is_authorized(&identity.uuid) {
            return Ok(RegistrationOutcome::Rejected(RejectionReason::Unauthorized));
        }

        let session_id = Uuid::new_v4();
        let mut state = self.lock()?;

        let replaced = state
            .connections
            .insert(
                identity.uuid.clone(),
                ConnectionInfo {
                    identity: identity.clone(),
                    source_addr: source_addr.to_string(),
                    connected_at: now,
                    session_id,
                },
            )
            .map(|previous| previous.session_id);

        state
            .recent
            .entry(identity.uuid.clone())
            .and_modify(|record| {
                record.station_name = identity.station_name.clone();
                record.lastseen = now;
                record.online = true;
            })
            .or_insert_with(|| RecentConnectionRecord {
                station_name: identity.station_name.clone(),
                connected_at: now,
                lastseen: now,
                online: true,
            });
        self.evict_overflow(&mut state);

        Ok(RegistrationOutcome::Accepted {
            session_id,
            replaced,
        })
    }

    pub fn record_sample(
        &self,
        uuid: &str,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SampleOutcome, RegistryError> {
        let mut state = self.lock()?;

        match state.connections.get(uuid) {
            None => return Ok(SampleOutcome::Dropped(DropReason::Unregistered)),
            Some(connection) if connection.session_id != session_id => {
                return Ok(SampleOutcome::Dropped(DropReason::Superseded));
            }
            Some(_) => {}
        }

        if let Some(record) = state.recent.get_mut(uuid) {
            record.lastseen = now;
        }

        Ok(SampleOutcome::Recorded)
    }

    /// Leaves `online` as it is.
    pub fn observe_push(
        &self,
        identity: &StationIdentity,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock()?;

        state
            .recent
            .entry(identity.uuid.clone())
            .and_modify(|record| {
                record.station_name = identity.station_name.clone();
                record.lastseen = now;
            })
            .or_insert_with(|| RecentConnectionRecord {
                station_name: identity.station_name.clone(),
                connected_at: now,
                lastseen: now,
                online: false,
            });
        self.evict_overflow(&mut state);

        Ok(())
    }

    /// Adds an offline record for a station known from configuration. An
    /// existing record is left untouched.
    pub fn remember_offline(
        &self,
        identity: &StationIdentity,
        now: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let mut state = self.lock()?;
        if state.recent.contains_key(&identity.uuid) {
            return Ok(false);
        }

        state.recent.insert(
            identity.uuid.clone(),
            RecentConnectionRecord {
                station_name: identity.station_name.clone(),
                connected_at: now,
                lastseen: now,
                online: false,
            },
        );
        self.evict_overflow(&mut state);

        Ok(true)
    }

    /// Returns `false` when the session no longer owns the connection.
    pub fn close(&self, uuid: &str, session_id: Uuid) -> Result<bool, RegistryError> {
        let mut state = self.lock()?;

        let owns_connection = state
            .connections
            .get(uuid)
            .is_some_and(|connection| connection.session_id == session_id);
        if !owns_connection {
            return Ok(false);
        }

        state.connections.remove(uuid);
        if let Some(record) = state.recent.get_mut(uuid) {
            record.online = false;
        }

        Ok(true)
    }

    pub fn connection(&self, uuid: &str) -> Result<Option<ConnectionInfo>, RegistryError> {
        Ok(self.lock()?.connections.get(uuid).cloned())
    }

    pub fn list_active(&self) -> Result<Vec<StationSummary>, RegistryError> {
        let state = self.lock()?;

        let mut stations: Vec<StationSummary> = state
            .recent
            .iter()
            .map(|(uuid, record)| summarize(uuid, record))
            .collect();
        stations.sort_by(|left, right| {
            left.station_name
                .cmp(&right.station_name)
                .then_with(|| left.short_id.cmp(&right.short_id))
        });

        Ok(stations)
    }

    /// Short ids can collide; the sorted listing order decides.
    pub fn find_station(
        &self,
        station_name: &str,
        public_id: &str,
    ) -> Result<Option<StationSummary>, RegistryError> {
        Ok(self
            .list_active()?
            .into_iter()
            .find(|station| station.station_name == station_name && station.short_id == public_id))
    }

    pub fn recent_count(&self) -> Result<usize, RegistryError> {
        Ok(self.lock()?.recent.len())
    }

    fn evict_overflow(&self, state: &mut RegistryState) {
        while state.recent.len() > self.recent_limit {
            let oldest_offline = state
                .recent
                .iter()
                .filter(|(_, record)| !record.online)
                .min_by_key(|(_, record)| record.lastseen)
                .map(|(uuid, _)| uuid.clone());

            match oldest_offline {
                Some(uuid) => {
                    state.recent.remove(&uuid);
                    tracing::debug!(uuid = %uuid, "evicted offline station from recent records");
                }
                None => break,
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::LockPoisoned)
    }
}

fn summarize(uuid: &str, record: &RecentConnectionRecord) -> StationSummary {
    StationSummary {
        uuid: uuid.to_string(),
        short_id: short_id(uuid),
        station_name: record.station_name.clone(),
        online: record.online,
        connected_at: record.connected_at,
        lastseen: record.lastseen,
    }
}
