//! Session schema: conversation contexts, credit buckets, lifetime stats.
//!
//! One [`Session`] per tenant key, serialized camelCase to a JSON document on
//! disk. Credit and reset arithmetic lives here as pure methods so the
//! manager layer stays a thin lock-load-mutate-save shell around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod migrate;

/// System prompt used when a context has no personality override.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Current on-disk schema version. See [`migrate`] for the upgrade chain.
pub const SCHEMA_VERSION: u32 = 3;

/// Message role in a conversation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (summaries, command audit entries)
    System,
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
}

impl MessageRole {
    /// String representation matching the on-disk form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a context's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A named, independent sub-conversation within one tenant's session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// System-prompt override; empty means "use [`DEFAULT_SYSTEM_PROMPT`]".
    #[serde(default)]
    pub personality: String,
}

impl ConversationContext {
    /// Effective system prompt: the override, or the default when unset.
    pub fn system_prompt(&self) -> &str {
        if self.personality.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            &self.personality
        }
    }
}

/// Which lifetime counter a charge or refund touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Text,
    Image,
}

impl ActionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// Record of exactly how a single charge was sourced, so a later refund can
/// reverse precisely those amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductReceipt {
    pub success: bool,
    pub daily_deducted: i64,
    pub purchased_deducted: i64,
}

impl DeductReceipt {
    /// Receipt for a charge that drew nothing.
    pub const fn failure() -> Self {
        Self {
            success: false,
            daily_deducted: 0,
            purchased_deducted: 0,
        }
    }

    /// Total amount this receipt drew across both buckets.
    pub const fn total(&self) -> i64 {
        self.daily_deducted + self.purchased_deducted
    }
}

/// Full persisted state for one tenant key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,

    /// Named contexts, each with its own history and personality.
    #[serde(default)]
    pub contexts: HashMap<String, ConversationContext>,

    /// Credits refreshed to the tier allowance once per UTC calendar day.
    pub daily_credits: i64,
    /// Credits that persist indefinitely and never auto-reset.
    pub purchased_credits: i64,
    /// Epoch milliseconds of the last daily-allowance refresh.
    pub last_daily_reset: i64,

    #[serde(default)]
    pub total_credits_used: i64,
    #[serde(default)]
    pub total_text_messages: i64,
    #[serde(default)]
    pub total_images_generated: i64,
}

fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Session {
    /// Default state for a tenant key with no on-disk record: no contexts,
    /// a full standard daily allowance, nothing purchased, zero stats.
    pub fn fresh(daily_credits: i64, now_ms: i64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            contexts: HashMap::new(),
            daily_credits,
            purchased_credits: 0,
            last_daily_reset: now_ms,
            total_credits_used: 0,
            total_text_messages: 0,
            total_images_generated: 0,
        }
    }

    /// Spendable balance across both buckets.
    pub const fn balance(&self) -> i64 {
        self.daily_credits + self.purchased_credits
    }

    /// Context by name, created empty on first reference.
    pub fn context_mut(&mut self, name: &str) -> &mut ConversationContext {
        self.contexts.entry(name.to_string()).or_default()
    }

    /// Refresh the daily allowance if the UTC calendar date has changed
    /// since the last reset. Returns whether a reset happened.
    ///
    /// `last_daily_reset` only ever moves forward: a stamp in the future
    /// (clock skew, hand-edited file) suppresses the reset rather than
    /// rewinding it.
    pub(crate) fn apply_daily_reset(&mut self, limit: i64, now: DateTime<Utc>) -> bool {
        let stale = match DateTime::<Utc>::from_timestamp_millis(self.last_daily_reset) {
            Some(last) => {
                now.date_naive() != last.date_naive()
                    && now.timestamp_millis() > self.last_daily_reset
            }
            // Unreadable stamp: treat as stale and restamp.
            None => true,
        };

        if stale {
            self.daily_credits = limit;
            self.last_daily_reset = now.timestamp_millis();
        }
        stale
    }

    /// All-or-nothing deduction, daily bucket first. Never leaves either
    /// bucket negative; an unaffordable (or negative) amount draws nothing
    /// and returns a failure receipt.
    pub(crate) fn deduct(&mut self, amount: i64) -> DeductReceipt {
        if amount < 0 || self.balance() < amount {
            return DeductReceipt::failure();
        }

        let daily_deducted = amount.min(self.daily_credits);
        let purchased_deducted = amount - daily_deducted;
        self.daily_credits -= daily_deducted;
        self.purchased_credits -= purchased_deducted;

        DeductReceipt {
            success: true,
            daily_deducted,
            purchased_deducted,
        }
    }

    /// Reverse a prior charge exactly: each bucket gets back what the
    /// receipt recorded, and the lifetime counters are walked back, floored
    /// at zero.
    pub(crate) fn apply_refund(&mut self, receipt: &DeductReceipt, kind: ActionKind) {
        self.daily_credits += receipt.daily_deducted;
        self.purchased_credits += receipt.purchased_deducted;

        self.total_credits_used = (self.total_credits_used - receipt.total()).max(0);
        match kind {
            ActionKind::Text => {
                self.total_text_messages = (self.total_text_messages - 1).max(0);
            }
            ActionKind::Image => {
                self.total_images_generated = (self.total_images_generated - 1).max(0);
            }
        }
    }

    /// Record a successful charge in the lifetime counters.
    pub(crate) fn record_usage(&mut self, cost: i64, kind: ActionKind) {
        self.total_credits_used += cost;
        match kind {
            ActionKind::Text => self.total_text_messages += 1,
            ActionKind::Image => self.total_images_generated += 1,
        }
    }
}
