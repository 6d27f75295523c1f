//! Shared helpers for unit and integration tests.
//!
//! Compiled for the crate's own tests and, behind the `test-utils`
//! feature, for downstream test crates.

use crate::bignum::BigNum;
use crate::condition::EvalContext;
use crate::id::{AchievementId, ProducerId, ResourceId, UpgradeId};
use std::collections::HashMap;

/// A freely configurable [`EvalContext`] for exercising conditions and
/// the pipeline without a full engine.
#[derive(Default)]
pub struct StubCtx {
    pub amounts: HashMap<ResourceId, BigNum>,
    pub phase: u32,
    pub completed_phases: Vec<u32>,
    pub run_time_secs: f64,
    pub producer_counts: HashMap<ProducerId, u32>,
    pub upgrade_levels: HashMap<UpgradeId, u32>,
    pub achievements: Vec<AchievementId>,
    pub story_choices: HashMap<String, String>,
}

impl StubCtx {
    pub fn with_amount(mut self, resource: ResourceId, amount: BigNum) -> Self {
        self.amounts.insert(resource, amount);
        self
    }

    pub fn with_phase(mut self, phase: u32) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_run_time(mut self, secs: f64) -> Self {
        self.run_time_secs = secs;
        self
    }
}

impl EvalContext for StubCtx {
    fn resource_amount(&self, resource: ResourceId) -> BigNum {
        self.amounts.get(&resource).copied().unwrap_or(BigNum::ZERO)
    }

    fn current_phase(&self) -> u32 {
        self.phase
    }

    fn phase_completed(&self, phase: u32) -> bool {
        self.completed_phases.contains(&phase)
    }

    fn run_time_secs(&self) -> f64 {
        self.run_time_secs
    }

    fn producer_count(&self, producer: ProducerId) -> u32 {
        self.producer_counts.get(&producer).copied().unwrap_or(0)
    }

    fn upgrade_level(&self, upgrade: UpgradeId) -> u32 {
        self.upgrade_levels.get(&upgrade).copied().unwrap_or(0)
    }

    fn has_achievement(&self, achievement: AchievementId) -> bool {
        self.achievements.contains(&achievement)
    }

    fn story_choice(&self, key: &str) -> Option<String> {
        self.story_choices.get(key).cloned()
    }
}
