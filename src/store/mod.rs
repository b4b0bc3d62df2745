//! Durable per-tenant session storage.
//!
//! One JSON document per tenant key, `<key>.json` under the configured data
//! directory. Every read and write takes an exclusive advisory lock on the
//! tenant's file so cooperating processes never interleave a read with a
//! write. Lock acquisition is retried with a bounded budget; exhausting it
//! fails the operation instead of risking a torn write.
//!
//! The locked file section runs on the blocking pool, so an in-flight save
//! runs to completion (or a logged failure) even if the calling future is
//! dropped mid-operation.

use chrono::Utc;
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{CorruptSessionPolicy, StoreConfig};
use crate::error::{Result, StoreError};
use crate::session::migrate::{self, MigrateCtx, MigrateError};
use crate::session::Session;

/// File-backed store mapping tenant keys to session documents.
pub struct DurableStore {
    data_dir: PathBuf,
    default_daily_credits: i64,
    lock_retries: u32,
    lock_retry_delay: Duration,
    on_corrupt: CorruptSessionPolicy,
}

impl DurableStore {
    /// Create a store rooted at the configured data directory.
    ///
    /// The directory is created eagerly; an unwritable data directory is a
    /// startup failure, not something to discover on the first save.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let data_dir = config.resolved_data_dir();
        fs::create_dir_all(&data_dir)
            .map_err(|source| StoreError::io("creating data directory", &data_dir, source))?;

        Ok(Self {
            data_dir,
            default_daily_credits: config.daily_limit_standard,
            lock_retries: config.lock_retries.max(1),
            lock_retry_delay: Duration::from_millis(config.lock_retry_delay_ms),
            on_corrupt: config.on_corrupt,
        })
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Load and migrate the session for `key`; `None` when no record exists.
    ///
    /// An unparseable file follows the configured corrupt-session policy:
    /// `Reset` logs a warning and reports the tenant as absent, `Fail`
    /// surfaces [`StoreError::CorruptSession`].
    pub async fn load(&self, key: &str) -> Result<Option<Session>> {
        let path = self.path_for(key);
        let retries = self.lock_retries;
        let delay = self.lock_retry_delay;
        let on_corrupt = self.on_corrupt;
        let migrate_ctx = MigrateCtx {
            default_daily_credits: self.default_daily_credits,
            now_ms: Utc::now().timestamp_millis(),
        };

        run_blocking(path.clone(), move || {
            load_blocking(&path, retries, delay, on_corrupt, &migrate_ctx)
        })
        .await
    }

    /// Serialize and persist the full session for `key`, overwriting the file.
    pub async fn save(&self, key: &str, session: &Session) -> Result<()> {
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(session)?;
        let retries = self.lock_retries;
        let delay = self.lock_retry_delay;

        run_blocking(path.clone(), move || {
            save_blocking(&path, &json, retries, delay)
        })
        .await
    }
}

/// Run a locked file section on the blocking pool. Detached from the caller:
/// once started it completes even if the awaiting future is dropped.
async fn run_blocking<T: Send + 'static>(
    path: PathBuf,
    work: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|source| StoreError::io("joining storage task", path, std::io::Error::other(source)))?
}

fn load_blocking(
    path: &Path,
    retries: u32,
    delay: Duration,
    on_corrupt: CorruptSessionPolicy,
    migrate_ctx: &MigrateCtx,
) -> Result<Option<Session>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StoreError::io("opening session file", path, source)),
    };

    lock_with_retries(&file, path, retries, delay)?;

    let mut contents = String::new();
    let read_result = BufReader::new(&file).read_to_string(&mut contents);
    let unlock_result = file.unlock();

    read_result.map_err(|source| StoreError::io("reading session file", path, source))?;
    unlock_result.map_err(|source| StoreError::io("unlocking session file", path, source))?;

    let doc: serde_json::Value = match serde_json::from_str(&contents) {
        Ok(doc) => doc,
        Err(e) => return corrupt(path, e.to_string(), on_corrupt),
    };

    let migrated = match migrate::upgrade(migrate_ctx, doc) {
        Ok(migrated) => migrated,
        Err(MigrateError::FutureVersion(found)) => {
            // Never silently discard data written by a newer build.
            return Err(StoreError::UnsupportedSchema {
                path: path.to_path_buf(),
                found,
            });
        }
        Err(e) => return corrupt(path, e.to_string(), on_corrupt),
    };

    match serde_json::from_value::<Session>(migrated) {
        Ok(session) => {
            debug!(path = %path.display(), "loaded session");
            Ok(Some(session))
        }
        Err(e) => corrupt(path, e.to_string(), on_corrupt),
    }
}

fn save_blocking(path: &Path, json: &str, retries: u32, delay: Duration) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| StoreError::io("creating data directory", parent, source))?;
    }

    // Truncation happens after the lock is held, never before.
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .map_err(|source| StoreError::io("opening session file for write", path, source))?;

    lock_with_retries(&file, path, retries, delay)?;

    let write_result = (|| {
        file.set_len(0)?;
        let mut writer = BufWriter::new(&file);
        writer.write_all(json.as_bytes())?;
        writer.flush()
    })();
    let unlock_result = file.unlock();

    write_result.map_err(|source| StoreError::io("writing session file", path, source))?;
    unlock_result.map_err(|source| StoreError::io("unlocking session file", path, source))?;

    debug!(path = %path.display(), bytes = json.len(), "saved session");
    Ok(())
}

fn lock_with_retries(file: &File, path: &Path, retries: u32, delay: Duration) -> Result<()> {
    for attempt in 1..=retries {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "session file locked elsewhere; retrying"
                );
                if attempt < retries {
                    std::thread::sleep(delay);
                }
            }
        }
    }

    Err(StoreError::LockTimeout {
        path: path.to_path_buf(),
        attempts: retries,
    })
}

fn corrupt(
    path: &Path,
    detail: String,
    policy: CorruptSessionPolicy,
) -> Result<Option<Session>> {
    match policy {
        CorruptSessionPolicy::Reset => {
            warn!(
                path = %path.display(),
                detail = %detail,
                "discarding corrupt session file; tenant starts fresh"
            );
            Ok(None)
        }
        CorruptSessionPolicy::Fail => Err(StoreError::CorruptSession {
            path: path.to_path_buf(),
            detail,
        }),
    }
}

/// Keep tenant keys inside the data directory: anything outside
/// `[A-Za-z0-9._-]` maps to `_`.
fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChatMessage, MessageRole, SCHEMA_VERSION};
    use serde_json::json;

    fn store_in(dir: &Path) -> DurableStore {
        let config = StoreConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            ..StoreConfig::default()
        };
        DurableStore::new(&config).unwrap()
    }

    fn store_with(dir: &Path, config: StoreConfig) -> DurableStore {
        let config = StoreConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            ..config
        };
        DurableStore::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let mut session = Session::fresh(5, 1_700_000_000_000);
        session
            .context_mut("default")
            .history
            .push(ChatMessage::new(MessageRole::User, "hello"));
        session.purchased_credits = 9;

        store.save("tenant-1", &session).await.unwrap();
        let loaded = store.load("tenant-1").await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_load_runs_migration_chain() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let legacy = json!({
            "history": [{"role": "user", "content": "old message"}],
            "personality": "Grumpy"
        });
        fs::write(
            store.path_for("old-user"),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let session = store.load("old-user").await.unwrap().unwrap();
        assert_eq!(session.schema_version, SCHEMA_VERSION);
        assert_eq!(session.contexts["default"].history[0].content, "old message");
        assert_eq!(session.contexts["default"].personality, "Grumpy");
        assert_eq!(session.daily_credits, 5);
        assert_eq!(session.total_credits_used, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_reset_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(store.path_for("broken"), "{not json").unwrap();
        assert!(store.load("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_fail_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            dir.path(),
            StoreConfig {
                on_corrupt: CorruptSessionPolicy::Fail,
                ..StoreConfig::default()
            },
        );
        fs::write(store.path_for("broken"), "{not json").unwrap();
        let err = store.load("broken").await.unwrap_err();
        assert!(err.is_corrupt_session());
    }

    #[tokio::test]
    async fn test_future_schema_version_always_fails() {
        let dir = tempfile::tempdir().unwrap();
        // Reset policy must not swallow documents from newer builds.
        let store = store_in(dir.path());
        let doc = json!({"schemaVersion": SCHEMA_VERSION + 1, "contexts": {}});
        fs::write(store.path_for("fromfuture"), doc.to_string()).unwrap();

        let err = store.load("fromfuture").await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchema { found, .. }
            if found == SCHEMA_VERSION + 1));
    }

    #[tokio::test]
    async fn test_lock_contention_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            dir.path(),
            StoreConfig {
                lock_retries: 2,
                lock_retry_delay_ms: 10,
                ..StoreConfig::default()
            },
        );

        let session = Session::fresh(5, 0);
        store.save("busy", &session).await.unwrap();

        // Hold the advisory lock through a separate descriptor.
        let holder = File::open(store.path_for("busy")).unwrap();
        holder.lock_exclusive().unwrap();

        let err = store.load("busy").await.unwrap_err();
        assert!(err.is_lock_timeout());

        holder.unlock().unwrap();
        assert!(store.load("busy").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_key_sanitization_stays_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let path = store.path_for("../../etc/passwd");
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.file_name().unwrap(), ".._.._etc_passwd.json");

        let session = Session::fresh(5, 0);
        store.save("group:42/chat", &session).await.unwrap();
        assert!(store.load("group:42/chat").await.unwrap().is_some());
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("user-1_a.b"), "user-1_a.b");
        assert_eq!(sanitize_key("group/42:chat"), "group_42_chat");
        assert_eq!(sanitize_key(""), "_");
    }

    #[test]
    fn test_unwritable_data_dir_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let config = StoreConfig {
            data_dir: blocker.join("nested").to_string_lossy().into_owned(),
            ..StoreConfig::default()
        };
        assert!(DurableStore::new(&config).is_err());
    }
}
