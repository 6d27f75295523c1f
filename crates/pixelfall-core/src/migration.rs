//! Versioned save migration.
//!
//! Migrations operate on the raw JSON shape, never on live managers, so
//! a registry can walk any historical save forward step by step. Each
//! registered step upgrades saves *to* its target version; `migrate`
//! applies the steps in strictly increasing order and stamps the version
//! after each one. A gap in the chain is unrecoverable and fails hard;
//! a save newer than the engine is returned untouched with a warning
//! rather than downgraded.
//!
//! Input is expected to be sanitized first — see
//! [`crate::save::sanitize`] — so steps can assume a well-formed shape.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub type MigrationFn = Box<dyn Fn(&mut Value) -> Result<(), MigrationError>>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("a migration to version {version} is already registered")]
    DuplicateStep { version: u32 },
    #[error("migration target {version} must be in 2..={current}")]
    TargetOutOfRange { version: u32, current: u32 },
    #[error("no migration step to version {version}; save cannot be upgraded")]
    MissingStep { version: u32 },
    #[error("migration to version {version} failed: {reason}")]
    StepFailed { version: u32, reason: String },
}

/// What `migrate` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyCurrent,
    /// The save was written by a newer engine; left untouched.
    NewerThanEngine { version: u32 },
    Migrated { from: u32, to: u32 },
}

pub struct MigrationRegistry {
    current_version: u32,
    steps: BTreeMap<u32, MigrationFn>,
}

impl MigrationRegistry {
    pub fn new(current_version: u32) -> Self {
        MigrationRegistry {
            current_version,
            steps: BTreeMap::new(),
        }
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Register the step that upgrades saves to `target_version`.
    /// Registering a version twice is a structural error.
    pub fn register(
        &mut self,
        target_version: u32,
        step: MigrationFn,
    ) -> Result<(), MigrationError> {
        if target_version < 2 || target_version > self.current_version {
            return Err(MigrationError::TargetOutOfRange {
                version: target_version,
                current: self.current_version,
            });
        }
        if self.steps.contains_key(&target_version) {
            return Err(MigrationError::DuplicateStep {
                version: target_version,
            });
        }
        self.steps.insert(target_version, step);
        Ok(())
    }

    /// Walk `data` forward to the current version in place.
    pub fn migrate(&self, data: &mut Value) -> Result<MigrationOutcome, MigrationError> {
        let from = read_version(data).unwrap_or(1);
        if from == self.current_version {
            return Ok(MigrationOutcome::AlreadyCurrent);
        }
        if from > self.current_version {
            log::warn!(
                "save version {from} is newer than engine version {}; leaving it untouched",
                self.current_version
            );
            return Ok(MigrationOutcome::NewerThanEngine { version: from });
        }

        for version in (from + 1)..=self.current_version {
            let step = self
                .steps
                .get(&version)
                .ok_or(MigrationError::MissingStep { version })?;
            step(data)?;
            write_version(data, version);
        }
        Ok(MigrationOutcome::Migrated {
            from,
            to: self.current_version,
        })
    }
}

fn read_version(data: &Value) -> Option<u32> {
    data.get("state")?
        .get("meta")?
        .get("version")?
        .as_u64()
        .map(|v| v as u32)
}

fn write_version(data: &mut Value, version: u32) {
    if let Some(meta) = data
        .get_mut("state")
        .and_then(|s| s.get_mut("meta"))
        .and_then(Value::as_object_mut)
    {
        meta.insert("version".to_string(), Value::from(version));
    }
}

// ===========================================================================
// Tests
// ===========================================================================
