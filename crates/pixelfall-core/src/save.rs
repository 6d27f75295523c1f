//! Save envelope, sanitization, and durable save management.
//!
//! The wire format is JSON: `{ state: { run, eternal, meta },
//! format_version, last_modified }` with big numbers as decimal strings.
//! [`sanitize`] repairs arbitrary partial or corrupt input into a
//! structurally complete, in-domain envelope and runs *before* migration
//! — migration steps rely on that ordering and assume a well-formed
//! shape.
//!
//! [`SaveManager`] layers durability policy over a [`SaveStore`]: a
//! backup copy of the previous blob before every overwrite, a read path
//! that falls back from main to backup to fresh state, a base64
//! export/import surface, and a 24-hour emergency backup written before
//! hard resets and purged lazily once expired.

use crate::achievement::AchievementRecord;
use crate::migration::{MigrationError, MigrationRegistry};
use crate::phase::PhaseSnapshot;
use crate::producer::ProducerRecord;
use crate::resource::ResourceRecord;
use crate::storage::{SaveStore, StorageError};
use crate::upgrade::UpgradeRecord;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Envelope layout version, distinct from the migrated schema version
/// inside `meta`.
pub const FORMAT_VERSION: u32 = 1;

/// Current schema version stamped into fresh saves; the engine's
/// [`MigrationRegistry`] should be built against the same number.
pub const SCHEMA_VERSION: u32 = 1;

/// Emergency backups outlive a hard reset for this long.
pub const EMERGENCY_BACKUP_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveEnvelope {
    pub state: SaveState,
    pub format_version: u32,
    pub last_modified: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub run: RunState,
    pub eternal: EternalState,
    pub meta: SaveMeta,
}

/// Everything that resets on rebirth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub resources: BTreeMap<String, ResourceRecord>,
    pub producers: BTreeMap<String, ProducerRecord>,
    pub upgrades: BTreeMap<String, UpgradeRecord>,
    pub phase: Option<PhaseSnapshot>,
    pub run_time_secs: f64,
}

/// Everything that persists across rebirths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EternalState {
    pub upgrades: BTreeMap<String, UpgradeRecord>,
    pub achievements: BTreeMap<String, AchievementRecord>,
    pub secrets: Vec<String>,
    pub rebirth_count: u32,
    pub total_play_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMeta {
    /// Monotonically increasing schema version; what migration walks.
    pub version: u32,
    pub save_id: String,
    /// The game build that wrote the save, for support and diagnostics.
    pub game_version: String,
    pub created_ms: u64,
    pub updated_ms: u64,
}

impl Default for SaveMeta {
    fn default() -> Self {
        SaveMeta {
            version: 1,
            save_id: "default".to_string(),
            game_version: "0.0.0".to_string(),
            created_ms: 0,
            updated_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Sanitization
// ---------------------------------------------------------------------------

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        // Just replaced with an object above.
        _ => unreachable!(),
    }
}

fn field<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Value {
    map.entry(key.to_string()).or_insert(Value::Null)
}

/// Coerce to a big-number decimal string; anything unparseable becomes
/// `"0"`.
fn fix_bignum(value: &mut Value) {
    let ok = match &*value {
        Value::String(s) => s.parse::<crate::bignum::BigNum>().is_ok(),
        Value::Number(n) => {
            *value = Value::String(n.to_string());
            return fix_bignum(value);
        }
        _ => false,
    };
    if !ok {
        *value = Value::String("0".to_string());
    }
}

/// Coerce to an unsigned integer, flooring negatives and fractions at 0.
fn fix_counter(value: &mut Value) {
    let fixed = match value.as_u64() {
        Some(n) => n,
        None => value.as_f64().map_or(0, |f| f.max(0.0) as u64),
    };
    *value = Value::from(fixed);
}

/// Coerce to a finite non-negative float.
fn fix_secs(value: &mut Value) {
    let fixed = value
        .as_f64()
        .filter(|f| f.is_finite())
        .map_or(0.0, |f| f.max(0.0));
    *value = Value::from(fixed);
}

fn fix_bool(value: &mut Value) {
    if !value.is_boolean() {
        *value = Value::Bool(false);
    }
}

/// Coerce to `null` or an unsigned integer.
fn fix_opt_ms(value: &mut Value) {
    if !value.is_null() {
        match value.as_u64() {
            Some(n) => *value = Value::from(n),
            None => *value = Value::Null,
        }
    }
}

fn fix_clamped_u32(value: &mut Value, min: u32, max: u32) {
    let fixed = value
        .as_u64()
        .map_or(min, |n| (n.min(u32::MAX as u64) as u32).clamp(min, max));
    *value = Value::from(fixed);
}

/// Keep only non-empty strings, first occurrence wins.
fn fix_string_set(value: &mut Value) {
    let mut seen = Vec::new();
    if let Some(items) = value.as_array() {
        for item in items {
            if let Some(s) = item.as_str() {
                if !s.is_empty() && !seen.iter().any(|kept: &String| kept == s) {
                    seen.push(s.to_string());
                }
            }
        }
    }
    *value = Value::Array(seen.into_iter().map(Value::String).collect());
}

fn fix_string_map(value: &mut Value) {
    let map = ensure_object(value);
    map.retain(|key, val| !key.is_empty() && val.is_string());
}

fn sanitize_resource_record(value: &mut Value) {
    let map = ensure_object(value);
    fix_bignum(field(map, "amount"));
    fix_bool(field(map, "unlocked"));
    fix_bignum(field(map, "lifetime_generated"));
    fix_bignum(field(map, "lifetime_spent"));
}

fn sanitize_producer_record(value: &mut Value) {
    let map = ensure_object(value);
    fix_counter(field(map, "level"));
    fix_bool(field(map, "unlocked"));
    fix_bignum(field(map, "lifetime_produced"));
}

fn sanitize_upgrade_record(value: &mut Value) {
    let map = ensure_object(value);
    fix_counter(field(map, "level"));
    fix_bool(field(map, "unlocked"));
    fix_bignum(field(map, "total_spent"));
    fix_opt_ms(field(map, "first_purchase_ms"));
}

fn sanitize_achievement_record(value: &mut Value) {
    let map = ensure_object(value);
    fix_opt_ms(field(map, "unlocked_at_ms"));
}

fn sanitize_record_map(value: &mut Value, fix: fn(&mut Value)) {
    let map = ensure_object(value);
    map.retain(|key, _| !key.is_empty());
    for record in map.values_mut() {
        fix(record);
    }
}

fn sanitize_phase_record(value: &mut Value) {
    let map = ensure_object(value);
    fix_bool(field(map, "entered"));
    fix_bool(field(map, "completed"));
    fix_secs(field(map, "time_in_phase_secs"));
    let best = field(map, "best_completion_secs");
    if !best.is_null() {
        fix_secs(best);
    }
    fix_opt_ms(field(map, "first_entered_ms"));
    fix_opt_ms(field(map, "last_entered_ms"));
    fix_string_map(field(map, "story_choices"));
}

fn sanitize_phase_snapshot(value: &mut Value, max_phase: u32) {
    if value.is_null() {
        return;
    }
    let map = ensure_object(value);
    fix_clamped_u32(field(map, "current"), 1, max_phase);
    fix_clamped_u32(field(map, "highest_unlocked"), 1, max_phase);
    fix_secs(field(map, "elapsed_secs"));
    let records = field(map, "records");
    if !records.is_array() {
        *records = Value::Array(Vec::new());
    }
    if let Some(items) = records.as_array_mut() {
        items.truncate(max_phase as usize);
        for item in items {
            sanitize_phase_record(item);
        }
    }
}

/// Repair arbitrary input into a complete, in-domain save envelope.
/// Never fails; unknown fields are left alone for forward compatibility.
pub fn sanitize(value: &mut Value, max_phase: u32) {
    let envelope = ensure_object(value);
    {
        let fv = field(envelope, "format_version");
        let fixed = fv.as_u64().map_or(FORMAT_VERSION as u64, |n| n.max(1));
        *fv = Value::from(fixed);
    }
    fix_counter(field(envelope, "last_modified"));

    let state = ensure_object(field(envelope, "state"));

    {
        let run = ensure_object(field(state, "run"));
        sanitize_record_map(field(run, "resources"), sanitize_resource_record);
        sanitize_record_map(field(run, "producers"), sanitize_producer_record);
        sanitize_record_map(field(run, "upgrades"), sanitize_upgrade_record);
        fix_secs(field(run, "run_time_secs"));
        sanitize_phase_snapshot(field(run, "phase"), max_phase);
    }

    {
        let eternal = ensure_object(field(state, "eternal"));
        sanitize_record_map(field(eternal, "upgrades"), sanitize_upgrade_record);
        sanitize_record_map(field(eternal, "achievements"), sanitize_achievement_record);
        fix_string_set(field(eternal, "secrets"));
        fix_counter(field(eternal, "rebirth_count"));
        fix_secs(field(eternal, "total_play_secs"));
    }

    {
        let meta = ensure_object(field(state, "meta"));
        {
            let version = field(meta, "version");
            let fixed = version.as_u64().map_or(1, |n| n.max(1));
            *version = Value::from(fixed);
        }
        {
            let save_id = field(meta, "save_id");
            if save_id.as_str().map_or(true, str::is_empty) {
                *save_id = Value::String("default".to_string());
            }
        }
        {
            let game_version = field(meta, "game_version");
            if game_version.as_str().map_or(true, str::is_empty) {
                *game_version = Value::String("0.0.0".to_string());
            }
        }
        fix_counter(field(meta, "created_ms"));
        fix_counter(field(meta, "updated_ms"));
    }
}

// ---------------------------------------------------------------------------
// Save manager
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("save blob is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("import payload is not valid base64: {0}")]
    BadTransfer(#[from] base64::DecodeError),
    #[error("import payload is not UTF-8")]
    NotUtf8,
    #[error("emergency backup is older than its 24-hour window")]
    EmergencyBackupExpired,
    #[error("no emergency backup exists")]
    NoEmergencyBackup,
}

/// Durable save policy over an opaque [`SaveStore`].
pub struct SaveManager<S: SaveStore> {
    store: S,
    migrations: MigrationRegistry,
    namespace: String,
}

impl<S: SaveStore> SaveManager<S> {
    pub fn new(store: S, migrations: MigrationRegistry, namespace: impl Into<String>) -> Self {
        SaveManager {
            store,
            migrations,
            namespace: namespace.into(),
        }
    }

    fn main_key(&self) -> String {
        format!("{}:save", self.namespace)
    }

    fn backup_key(&self) -> String {
        format!("{}:save:backup", self.namespace)
    }

    fn emergency_key(&self) -> String {
        format!("{}:save:emergency", self.namespace)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Persist the envelope, copying the previous blob to the backup
    /// slot first.
    pub fn save(&mut self, envelope: &SaveEnvelope) -> Result<(), SaveError> {
        if let Some(previous) = self.store.get(&self.main_key())? {
            self.store.set(&self.backup_key(), &previous)?;
        }
        let blob = serde_json::to_string(envelope)?;
        self.store.set(&self.main_key(), &blob)?;
        Ok(())
    }

    /// Load, sanitize, and migrate the stored save. A corrupt main blob
    /// falls back to the backup; no save at all yields `None`. A broken
    /// migration chain is fatal and surfaces as an error.
    pub fn load(&mut self, max_phase: u32) -> Result<Option<SaveEnvelope>, SaveError> {
        match self.try_load_key(&self.main_key(), max_phase) {
            Ok(found) => Ok(found),
            Err(SaveError::Migration(err)) => Err(SaveError::Migration(err)),
            Err(err) => {
                log::warn!("main save unreadable ({err}); trying backup");
                match self.try_load_key(&self.backup_key(), max_phase) {
                    Ok(found) => Ok(found),
                    Err(SaveError::Migration(err)) => Err(SaveError::Migration(err)),
                    Err(err) => {
                        log::warn!("backup unreadable too ({err}); starting fresh");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn try_load_key(&self, key: &str, max_phase: u32) -> Result<Option<SaveEnvelope>, SaveError> {
        let Some(blob) = self.store.get(key)? else {
            return Ok(None);
        };
        self.accept_blob(&blob, max_phase).map(Some)
    }

    /// Sanitize → migrate → deserialize one raw blob.
    fn accept_blob(&self, blob: &str, max_phase: u32) -> Result<SaveEnvelope, SaveError> {
        let mut value: Value = serde_json::from_str(blob)?;
        sanitize(&mut value, max_phase);
        self.migrations.migrate(&mut value)?;
        Ok(serde_json::from_value(value)?)
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    /// Base64 transfer string of the stored save, if any.
    pub fn export(&self) -> Result<Option<String>, SaveError> {
        Ok(self
            .store
            .get(&self.main_key())?
            .map(|blob| BASE64.encode(blob.as_bytes())))
    }

    /// Accept a transfer string. Invalid input is rejected before any
    /// stored state changes.
    pub fn import(&mut self, transfer: &str, max_phase: u32) -> Result<SaveEnvelope, SaveError> {
        let bytes = BASE64.decode(transfer.trim())?;
        let blob = String::from_utf8(bytes).map_err(|_| SaveError::NotUtf8)?;
        let envelope = self.accept_blob(&blob, max_phase)?;
        self.save(&envelope)?;
        Ok(envelope)
    }

    // -----------------------------------------------------------------------
    // Emergency backup
    // -----------------------------------------------------------------------

    /// Snapshot the current save ahead of a destructive reset, then
    /// clear main and backup slots.
    pub fn hard_reset(&mut self, now_ms: u64) -> Result<(), SaveError> {
        if let Some(blob) = self.store.get(&self.main_key())? {
            let wrapper = serde_json::json!({ "written_ms": now_ms, "save": blob });
            self.store
                .set(&self.emergency_key(), &wrapper.to_string())?;
        }
        self.store.remove(&self.main_key())?;
        self.store.remove(&self.backup_key())?;
        Ok(())
    }

    /// True while an unexpired emergency backup exists. An expired one
    /// encountered here is purged.
    pub fn has_emergency_backup(&mut self, now_ms: u64) -> Result<bool, SaveError> {
        Ok(self.read_emergency(now_ms)?.is_some())
    }

    /// Restore the emergency backup as the live save. Outside the
    /// 24-hour window the backup is purged and recovery fails.
    pub fn recover_emergency(
        &mut self,
        now_ms: u64,
        max_phase: u32,
    ) -> Result<SaveEnvelope, SaveError> {
        let blob = self
            .read_emergency(now_ms)?
            .ok_or(SaveError::NoEmergencyBackup)?;
        let envelope = self.accept_blob(&blob, max_phase)?;
        self.save(&envelope)?;
        self.store.remove(&self.emergency_key())?;
        Ok(envelope)
    }

    fn read_emergency(&mut self, now_ms: u64) -> Result<Option<String>, SaveError> {
        let Some(raw) = self.store.get(&self.emergency_key())? else {
            return Ok(None);
        };
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => {
                self.store.remove(&self.emergency_key())?;
                return Ok(None);
            }
        };
        let written_ms = parsed.get("written_ms").and_then(Value::as_u64).unwrap_or(0);
        if now_ms.saturating_sub(written_ms) > EMERGENCY_BACKUP_WINDOW_MS {
            self.store.remove(&self.emergency_key())?;
            return Ok(None);
        }
        Ok(parsed
            .get("save")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
