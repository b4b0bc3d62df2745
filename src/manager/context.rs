//! Conversation context operations: per-tenant, per-named-context message
//! log and personality override. Contexts within one tenant are fully
//! independent; clearing or repersonalizing one never touches another.

use tracing::debug;

use super::SessionManager;
use crate::error::Result;
use crate::session::{ChatMessage, MessageRole};

impl SessionManager {
    /// Message history of a context, oldest first. The context is created
    /// empty on first reference; this never fails for an unknown name.
    pub async fn get_history(&self, key: &str, context: &str) -> Result<Vec<ChatMessage>> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;
        Ok(session.context_mut(context).history.clone())
    }

    /// Append a message, evicting the oldest entry once the history cap is
    /// exceeded.
    pub async fn add_message(
        &self,
        key: &str,
        context: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Result<()> {
        let max_history = self.config().max_history;
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        let ctx = session.context_mut(context);
        ctx.history.push(ChatMessage::new(role, content));
        if ctx.history.len() > max_history {
            ctx.history.remove(0);
        }

        self.persist(key, &mut guard).await
    }

    /// Empty a context's history. Its personality is untouched.
    pub async fn clear_history(&self, key: &str, context: &str) -> Result<()> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        session.context_mut(context).history.clear();
        debug!(tenant = key, context, "cleared context history");

        self.persist(key, &mut guard).await
    }

    /// Set a context's personality override. Blank or whitespace-only text
    /// clears it back to the default assistant prompt.
    pub async fn set_personality(&self, key: &str, context: &str, text: &str) -> Result<()> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        let ctx = session.context_mut(context);
        ctx.personality = if text.trim().is_empty() {
            String::new()
        } else {
            text.to_string()
        };

        self.persist(key, &mut guard).await
    }

    /// Effective system prompt for a context: the personality override, or
    /// the default assistant prompt when none is set.
    pub async fn get_system_prompt(&self, key: &str, context: &str) -> Result<String> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;
        Ok(session.context_mut(context).system_prompt().to_string())
    }
}
