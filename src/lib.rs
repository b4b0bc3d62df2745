//! Multi-tenant conversational-state and metered-usage store for chat
//! assistants.
//!
//! Persists per-tenant conversation history across independent named
//! contexts and enforces a prepaid credit economy: expensive actions are
//! charged up front through [`SessionManager::check_and_charge`], and a
//! failed downstream action is reversed exactly via the
//! [`DeductReceipt`] the charge produced.
//!
//! State lives in one JSON document per tenant under a configured data
//! directory, guarded by per-file advisory locks across processes and
//! per-tenant mutexes within a process. Older on-disk shapes are upgraded
//! transparently through a versioned migration chain.
//!
//! ```no_run
//! use chat_ledger::{ActionKind, ChargeOutcome, MessageRole, SessionManager, StoreConfig, Tier};
//!
//! # async fn run() -> chat_ledger::Result<()> {
//! let manager = SessionManager::new(StoreConfig::default())?;
//!
//! match manager.check_and_charge("user-42", 1, ActionKind::Text, Tier::Standard).await? {
//!     ChargeOutcome::Charged(receipt) => {
//!         manager.add_message("user-42", "default", MessageRole::User, "hello").await?;
//!         // ... call the completion backend; on failure:
//!         // manager.refund_credits("user-42", receipt, ActionKind::Text).await?;
//!         let _ = receipt;
//!     }
//!     ChargeOutcome::InsufficientBalance { balance } => {
//!         println!("out of credits (balance: {balance})");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod session;
pub mod store;

pub use config::{CorruptSessionPolicy, StoreConfig};
pub use error::{Result, StoreError};
pub use manager::{seconds_until_daily_reset, ChargeOutcome, SessionManager, Tier};
pub use session::{
    ActionKind, ChatMessage, ConversationContext, DeductReceipt, MessageRole, Session,
    DEFAULT_SYSTEM_PROMPT,
};
pub use store::DurableStore;
