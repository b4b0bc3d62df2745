//! Per-process session manager.
//!
//! Front door for command handlers: conversation context operations
//! ([`context`]) and the credit ledger ([`ledger`]), both funneling through
//! an in-memory cache over the [`DurableStore`].
//!
//! Concurrency model: the cache map is guarded by a short-lived sync mutex;
//! each tenant entry carries its own async mutex, held across the entire
//! read-mutate-save sequence of an operation. Same-tenant operations are
//! therefore serialized within the process, while operations on different
//! tenants never contend. Cross-process access is serialized separately by
//! the store's advisory file locks.

mod context;
mod ledger;

pub use ledger::{seconds_until_daily_reset, ChargeOutcome, Tier};

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::session::Session;
use crate::store::DurableStore;

#[derive(Default)]
struct Slot {
    session: Option<Session>,
}

/// Cached, file-backed session state for every tenant this process serves.
pub struct SessionManager {
    store: DurableStore,
    config: StoreConfig,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<Slot>>>>,
}

impl SessionManager {
    /// Build a manager over a fresh [`DurableStore`] for `config`.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let store = DurableStore::new(&config)?;
        Ok(Self {
            store,
            config,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Store configuration this manager was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Read-only snapshot of a tenant's full session, for reporting
    /// balances and usage.
    pub async fn get_stats(&self, key: &str) -> Result<Session> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;
        Ok(session.clone())
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<Slot>> {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Cached session for `key`, loading from disk on first touch and
    /// falling back to a fresh default session when no record exists.
    ///
    /// Callers must already hold the tenant's slot lock (the `&mut Slot`
    /// borrow enforces it).
    async fn session_mut<'slot>(
        &self,
        key: &str,
        slot: &'slot mut Slot,
    ) -> Result<&'slot mut Session> {
        let session = match slot.session.take() {
            Some(session) => session,
            None => match self.store.load(key).await? {
                Some(session) => session,
                None => Session::fresh(
                    self.config.daily_limit_standard,
                    Utc::now().timestamp_millis(),
                ),
            },
        };
        Ok(slot.session.insert(session))
    }

    /// Flush the tenant's cached session to disk. One explicit save per
    /// mutation; there is no write-behind buffering.
    ///
    /// A failed save evicts the cached copy: the in-memory state must never
    /// run ahead of what actually landed on disk, so the next operation
    /// reloads the authoritative file.
    async fn persist(&self, key: &str, slot: &mut Slot) -> Result<()> {
        let Some(session) = slot.session.as_ref() else {
            return Ok(());
        };
        match self.store.save(key, session).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(tenant = key, error = %e, "session save failed; evicting cached copy");
                slot.session = None;
                Err(e)
            }
        }
    }
}
