//! Schema versioning and the ordered upgrade chain.
//!
//! Session documents carry an explicit `schemaVersion` tag. Files written
//! before the tag existed get their version inferred from shape once, then
//! flow through the same chain of pure upgrade steps:
//!
//! - v0 → v1: bare `{history, personality}` document wrapped into a single
//!   context named `default`, personality preserved.
//! - v1 → v2: economy fields backfilled (`dailyCredits` to the standard
//!   allowance, `purchasedCredits` to 0, `lastDailyReset` to now).
//! - v2 → v3: lifetime stat counters backfilled to 0.
//!
//! Adding a field to the schema means appending one step here, not branching
//! on field absence at every call site.

use serde_json::{json, Map, Value};
use thiserror::Error;

use super::SCHEMA_VERSION;

/// Inputs the upgrade steps need beyond the document itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MigrateCtx {
    pub default_daily_credits: i64,
    pub now_ms: i64,
}

#[derive(Debug, Error)]
pub(crate) enum MigrateError {
    #[error("session document is not a JSON object")]
    NotAnObject,
    #[error("schemaVersion is not an unsigned integer")]
    BadVersionTag,
    #[error("schema version {0} is newer than this build supports")]
    FutureVersion(u32),
}

type Step = fn(&MigrateCtx, &mut Map<String, Value>);

/// Step `STEPS[n]` upgrades a version-`n` document to version `n + 1`.
const STEPS: &[Step] = &[wrap_contexts, add_economy, add_stats];

/// Upgrade a raw session document to [`SCHEMA_VERSION`].
///
/// Already-current documents pass through unchanged apart from the version
/// tag; each step runs at most once, gated by the version counter.
pub(crate) fn upgrade(ctx: &MigrateCtx, doc: Value) -> Result<Value, MigrateError> {
    let Value::Object(mut map) = doc else {
        return Err(MigrateError::NotAnObject);
    };

    let mut version = detect_version(&map)?;
    if version > SCHEMA_VERSION {
        return Err(MigrateError::FutureVersion(version));
    }

    while (version as usize) < STEPS.len() {
        STEPS[version as usize](ctx, &mut map);
        version += 1;
    }

    map.insert("schemaVersion".to_string(), json!(SCHEMA_VERSION));
    Ok(Value::Object(map))
}

/// Explicit tag when present, otherwise inferred from document shape.
fn detect_version(map: &Map<String, Value>) -> Result<u32, MigrateError> {
    if let Some(tag) = map.get("schemaVersion") {
        return tag
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(MigrateError::BadVersionTag);
    }

    if !map.contains_key("contexts") {
        return Ok(0);
    }
    if !map.contains_key("dailyCredits") {
        return Ok(1);
    }
    if !map.contains_key("totalCreditsUsed") {
        return Ok(2);
    }
    Ok(SCHEMA_VERSION)
}

/// v0 → v1: wrap a bare history document into `contexts.default`.
fn wrap_contexts(_ctx: &MigrateCtx, map: &mut Map<String, Value>) {
    let history = map.remove("history").unwrap_or_else(|| json!([]));
    let personality = map.remove("personality").unwrap_or_else(|| json!(""));

    map.entry("contexts").or_insert_with(|| {
        json!({
            "default": {
                "history": history,
                "personality": personality,
            }
        })
    });
}

/// v1 → v2: backfill the credit economy fields.
fn add_economy(ctx: &MigrateCtx, map: &mut Map<String, Value>) {
    map.entry("dailyCredits")
        .or_insert_with(|| json!(ctx.default_daily_credits));
    map.entry("purchasedCredits").or_insert_with(|| json!(0));
    map.entry("lastDailyReset")
        .or_insert_with(|| json!(ctx.now_ms));
}

/// v2 → v3: backfill the lifetime stat counters.
fn add_stats(_ctx: &MigrateCtx, map: &mut Map<String, Value>) {
    map.entry("totalCreditsUsed").or_insert_with(|| json!(0));
    map.entry("totalTextMessages").or_insert_with(|| json!(0));
    map.entry("totalImagesGenerated").or_insert_with(|| json!(0));
}
