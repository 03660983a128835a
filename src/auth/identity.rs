//! User records and identity resolution
//!
//! The user directory maps GitHub usernames and emails to capability flags.
//! It is owned by the user-management endpoints; login only reads it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::permissions::CapabilityFlags;
use crate::error::{AppError, Result};
use crate::storage::{JsonArrayFile, read_json_array, write_json_atomic};

/// Normalized user record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub name: String,
    /// Lowercased
    pub email: String,
    /// Lowercased
    pub github_username: String,
    #[serde(flatten)]
    pub flags: CapabilityFlags,
}

impl UserRecord {
    /// Build a record from loosely-typed JSON.
    ///
    /// Text fields are trimmed (email and username lowercased); flags use
    /// truthiness so `1`, `"yes"` and `true` all enable a capability.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let flag = |key: &str| value.get(key).is_some_and(is_truthy);

        Self {
            name: text("name"),
            email: text("email"),
            github_username: text("githubUsername"),
            flags: CapabilityFlags {
                can_edit: flag("canEdit"),
                can_validate: flag("canValidate"),
                can_publish: flag("canPublish"),
            },
        }
        .normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: normalize_identity(Some(&self.email)),
            github_username: normalize_identity(Some(&self.github_username)),
            flags: self.flags,
        }
    }

    fn is_addressable(&self) -> bool {
        !self.email.is_empty() || !self.github_username.is_empty()
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn normalize_identity(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_lowercase()
}

/// Outcome of an identity lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMatch {
    pub flags: CapabilityFlags,
    pub matched: bool,
    pub user: Option<UserRecord>,
}

impl IdentityMatch {
    fn unmatched() -> Self {
        Self {
            flags: CapabilityFlags::default(),
            matched: false,
            user: None,
        }
    }
}

/// User-record collection, optionally backed by a JSON file
pub struct UserDirectory {
    path: Option<PathBuf>,
    records: RwLock<Vec<UserRecord>>,
}

impl UserDirectory {
    /// Load the collection from `path`, creating an empty file if needed.
    ///
    /// Unreadable or corrupt files read as an empty collection.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if matches!(read_json_array(&path).await, JsonArrayFile::Missing) {
            if let Err(error) = write_json_atomic(&path, &Vec::<UserRecord>::new()).await {
                tracing::warn!(%error, path = %path.display(), "Failed to create user file");
            }
        }
        let records = load_records(&path).await;

        tracing::info!(path = %path.display(), users = records.len(), "User directory loaded");

        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    /// Directory without a backing file
    pub fn in_memory(records: Vec<UserRecord>) -> Self {
        Self {
            path: None,
            records: RwLock::new(records),
        }
    }

    pub async fn list(&self) -> Vec<UserRecord> {
        self.current().await
    }

    /// Records as they are now, re-read from the backing file if there is one.
    ///
    /// Edits made to the file out of band apply from the next lookup.
    async fn current(&self) -> Vec<UserRecord> {
        let Some(path) = &self.path else {
            return self.records.read().await.clone();
        };

        let mut records = self.records.write().await;
        *records = load_records(path).await;
        records.clone()
    }

    /// Replace the whole collection.
    ///
    /// Records with neither email nor GitHub username are dropped. The file
    /// is rewritten before the in-memory copy changes.
    pub async fn replace(&self, records: Vec<UserRecord>) -> Result<Vec<UserRecord>> {
        let normalized: Vec<UserRecord> = records
            .into_iter()
            .map(UserRecord::normalized)
            .filter(UserRecord::is_addressable)
            .collect();

        let mut current = self.records.write().await;
        if let Some(path) = &self.path {
            write_json_atomic(path, &normalized)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?;
        }
        *current = normalized.clone();

        tracing::info!(users = normalized.len(), "User directory replaced");
        Ok(normalized)
    }

    /// Capability flags for the first record matching the GitHub username
    /// or the email, compared case-insensitively.
    pub async fn find_capabilities(
        &self,
        github_username: Option<&str>,
        email: Option<&str>,
    ) -> IdentityMatch {
        let username = normalize_identity(github_username);
        let email = normalize_identity(email);

        let records = self.current().await;
        let found = records.iter().find(|record| {
            let by_username = !username.is_empty()
                && !record.github_username.is_empty()
                && record.github_username == username;
            let by_email = !email.is_empty() && !record.email.is_empty() && record.email == email;
            by_username || by_email
        });

        match found {
            Some(record) => IdentityMatch {
                flags: record.flags,
                matched: true,
                user: Some(record.clone()),
            },
            None => IdentityMatch::unmatched(),
        }
    }
}

async fn load_records(path: &Path) -> Vec<UserRecord> {
    match read_json_array(path).await {
        JsonArrayFile::Entries(entries) => entries.iter().map(UserRecord::from_json).collect(),
        JsonArrayFile::Invalid | JsonArrayFile::Missing => Vec::new(),
    }
}
