//! Local JSON file storage
//!
//! Session snapshots and the user-record collection are flat JSON arrays
//! rewritten wholesale. Writes go through a temp file + rename so a crash
//! never leaves a half-written file behind.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Result of reading a JSON array file
#[derive(Debug)]
pub enum JsonArrayFile {
    /// File does not exist yet
    Missing,
    /// File exists but could not be read or parsed as an array
    Invalid,
    /// Raw entries; callers decide which ones to admit
    Entries(Vec<serde_json::Value>),
}

/// Read `path` as a JSON array without failing.
pub async fn read_json_array(path: &Path) -> JsonArrayFile {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return JsonArrayFile::Missing;
        }
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "JSON file unreadable");
            return JsonArrayFile::Invalid;
        }
    };

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Array(entries)) => JsonArrayFile::Entries(entries),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "JSON file is not an array");
            JsonArrayFile::Invalid
        }
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "JSON file corrupt");
            JsonArrayFile::Invalid
        }
    }
}

/// Pretty-print `value` to `path`, creating parent directories.
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
{
    let mut payload = serde_json::to_vec_pretty(value)?;
    payload.push(b'\n');

    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&payload)?;
        file.persist(&path)?;
        Ok(())
    })
    .await??;

    Ok(())
}
