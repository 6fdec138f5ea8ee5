use std::collections::HashMap;
use std::fs;
use std::io;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::models::{StationIdentity, is_valid_station_key};

#[derive(Debug, Clone, Deserialize)]
struct TokenEntry {
    uuid: String,
    #[serde(alias = "name")]
    station_name: String,
    token: String,
}

#[derive(Debug, Error)]
pub enum TokenDirectoryError {
    #[error("failed to read station token file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse station token file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid station token entry: {0}")]
    InvalidEntry(String),
}

#[derive(Debug, Clone, Default)]
pub struct LegacyTokenDirectory {
    by_token: HashMap<String, StationIdentity>,
}

impl LegacyTokenDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_file(path: &str) -> Result<Self, TokenDirectoryError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, TokenDirectoryError> {
        let entries: Vec<TokenEntry> = serde_json::from_str(content)?;
        let mut by_token = HashMap::with_capacity(entries.len());

        for entry in entries {
            let token = entry.token.trim().to_string();
            if token.is_empty() {
                return Err(TokenDirectoryError::InvalidEntry(format!(
                    "station {} has an empty token",
                    entry.station_name
                )));
            }
            if !is_valid_station_key(&entry.uuid) {
                return Err(TokenDirectoryError::InvalidEntry(format!(
                    "station {} has an invalid uuid",
                    entry.station_name
                )));
            }

            let identity = StationIdentity::new(entry.uuid, entry.station_name);
            if by_token.insert(token, identity.clone()).is_some() {
                return Err(TokenDirectoryError::InvalidEntry(format!(
                    "token of station {} is not unique",
                    identity.station_name
                )));
            }
        }

        Ok(Self { by_token })
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    pub fn stations(&self) -> impl Iterator<Item = &StationIdentity> {
        self.by_token.values()
    }

    pub fn resolve(&self, token: &str) -> Option<&StationIdentity> {
        self.by_token.get(token.trim())
    }

    pub fn resolve_header(&self, authorization: &str) -> Option<&StationIdentity> {
        let mut parts = authorization.split_whitespace();
        let scheme = parts.next()?;
        let token = parts.next()?;
        if !scheme.eq_ignore_ascii_case("bearer") || parts.next().is_some() {
            return None;
        }

        self.resolve(token)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{LegacyTokenDirectory, TokenDirectoryError};
    use crate::domain::models::StationIdentity;

    const DIRECTORY: &str = r#"[
        {"uuid": "station-pier", "station_name": "Pier", "token": "s3cret"},
        {"uuid": "station-harbour", "name": "Harbour", "token": "other"}
    ]"#;

    #[test]
    fn resolves_bearer_header() {
        let directory = LegacyTokenDirectory::from_json(DIRECTORY).expect("directory parses");

        assert_eq!(directory.len(), 2);
        assert_eq!(
            directory.resolve_header("Bearer s3cret"),
            Some(&StationIdentity::new("station-pier", "Pier"))
        );
        assert_eq!(
            directory.resolve_header("bearer other").map(|id| id.station_name.as_str()),
            Some("Harbour")
        );
    }

    #[test]
    fn rejects_malformed_or_unknown_headers() {
        let directory = LegacyTokenDirectory::from_json(DIRECTORY).expect("directory parses");

        assert_eq!(directory.resolve_header("s3cret"), None);
        assert_eq!(directory.resolve_header("Basic s3cret"), None);
        assert_eq!(directory.resolve_header("Bearer nope"), None);
        assert_eq!(directory.resolve_header("Bearer s3cret extra"), None);
    }

    #[test]
    fn rejects_duplicate_tokens() {
        let result = LegacyTokenDirectory::from_json(
            r#"[
                {"uuid": "a", "station_name": "A", "token": "t"},
                {"uuid": "b", "station_name": "B", "token": "t"}
            ]"#,
        );

        assert!(matches!(result, Err(TokenDirectoryError::InvalidEntry(_))));
    }

    #[test]
    fn rejects_uuid_unusable_as_storage_key() {
        let result = LegacyTokenDirectory::from_json(
            r#"[{"uuid": "../x", "station_name": "X", "token": "t"}]"#,
        );

        assert!(matches!(result, Err(TokenDirectoryError::InvalidEntry(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(DIRECTORY.as_bytes()).expect("write");

        let directory = LegacyTokenDirectory::from_file(
            file.path().to_str().expect("utf-8 temp path"),
        )
        .expect("directory loads");

        assert!(!directory.is_empty());
        let mut names: Vec<&str> = directory
            .stations()
            .map(|identity| identity.station_name.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Harbour", "Pier"]);
        assert!(matches!(
            LegacyTokenDirectory::from_file("/nonexistent/stations.json"),
            Err(TokenDirectoryError::Io(_))
        ));
    }
}
