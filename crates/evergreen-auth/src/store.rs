//! File-backed token storage.
//!
//! Tokens are written atomically: the record goes to a uniquely named
//! sibling temp file which is flushed to disk and then renamed over the
//! target. A reader never observes a partially written file, and
//! concurrent writers never share a temp file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info, warn};

use crate::token::TokenRecord;

static TEMP_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Persists a [`TokenRecord`] as JSON at an optional path.
///
/// Without a path the store is a no-op: loads find nothing and saves are
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    path: Option<PathBuf>,
}

impl TokenStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// A store that never touches disk.
    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the stored record.
    ///
    /// Missing, unreadable and unparsable files all yield `None`.
    pub fn load(&self) -> Option<TokenRecord> {
        let Some(path) = self.path.as_deref() else {
            debug!("No token file configured");
            return None;
        };

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "Token file not found");
                return None;
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read token file");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = ?path, error = %e, "Token file is not a valid token record");
                None
            }
        }
    }

    /// Persist `record`, filling in `expires_at` first.
    ///
    /// Failures are logged and swallowed; the in-memory session stays usable.
    pub fn save(&self, record: &TokenRecord) {
        let Some(path) = self.path.as_deref() else {
            debug!("No token file configured, skipping save");
            return;
        };

        match self.try_save(path, &record.clone().normalized()) {
            Ok(()) => info!(path = ?path, "Saved tokens"),
            Err(e) => warn!(path = ?path, error = %e, "Failed to save tokens"),
        }
    }

    fn try_save(&self, path: &Path, record: &TokenRecord) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = write_temp(path, record)?;
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        Ok(())
    }

    /// Delete the stored record. A missing file is not an error.
    pub fn clear(&self) -> io::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => {
                info!(path = ?path, "Removed token file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Write `record` to a fresh temp file next to `path` and fsync it.
///
/// Returns the temp path; the caller renames it into place.
pub(crate) fn write_temp(path: &Path, record: &TokenRecord) -> io::Result<PathBuf> {
    let json = serde_json::to_vec_pretty(record)?;

    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tokens".to_string());
    let tmp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        seq
    ));

    let result = open_private(&tmp_path).and_then(|mut file| {
        file.write_all(&json)?;
        file.sync_all()
    });

    match result {
        Ok(()) => Ok(tmp_path),
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftover_temps(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(Some(dir.path().join("nested/tokens.json")));

        assert!(store.load().is_none());

        let record = TokenRecord::new("at").with_refresh_token("rt").with_expires_in(3600);
        store.save(&record);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "at");
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt"));
        assert!(loaded.expires_at.is_some());
        assert!(leftover_temps(&dir.path().join("nested")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        TokenStore::new(Some(path.clone())).save(&TokenRecord::new("at"));

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_ephemeral_store() {
        let store = TokenStore::ephemeral();
        store.save(&TokenRecord::new("at"));
        assert!(store.load().is_none());
        assert!(store.clear().is_ok());
    }

    #[test]
    fn test_load_garbage_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(TokenStore::new(Some(path.clone())).load().is_none());

        fs::write(&path, r#"{"refresh_token": "rt"}"#).unwrap();
        assert!(TokenStore::new(Some(path)).load().is_none());
    }

    #[test]
    fn test_load_fractional_expires_in() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(
            &path,
            r#"{"access_token": "at", "refresh_token": "rt", "expires_in": 3600.0}"#,
        )
        .unwrap();

        let loaded = TokenStore::new(Some(path)).load().unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt"));
        assert_eq!(loaded.expires_in, Some(3600.0));
    }

    #[test]
    fn test_interrupted_write_leaves_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::new(Some(path.clone()));
        store.save(&TokenRecord::new("old"));

        // crash between temp write and rename
        let tmp = write_temp(&path, &TokenRecord::new("new")).unwrap();
        assert!(tmp.exists());

        assert_eq!(store.load().unwrap().access_token, "old");
    }

    #[test]
    fn test_failed_rename_cleans_up_temp() {
        let dir = TempDir::new().unwrap();
        // target is a non-empty directory, so the rename cannot replace it
        let path = dir.path().join("tokens.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        TokenStore::new(Some(path.clone())).save(&TokenRecord::new("at"));

        assert!(path.is_dir());
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::new(Some(path.clone()));
        store.save(&TokenRecord::new("at"));
        assert!(path.exists());

        store.clear().unwrap();
        assert!(!path.exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_concurrent_saves_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = TokenStore::new(Some(path.clone()));
                std::thread::spawn(move || {
                    for j in 0..10 {
                        // vary lengths so a torn write would be visible
                        let token = format!("token-{}-{}", i, "x".repeat(i * 10 + j));
                        store.save(&TokenRecord::new(token));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = TokenStore::new(Some(path)).load().unwrap();
        assert!(record.access_token.starts_with("token-"));
        assert!(leftover_temps(dir.path()).is_empty());
    }
}
