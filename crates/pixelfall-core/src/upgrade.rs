//! Upgrades: purchasable levels with declarative effects.
//!
//! Effects never execute themselves. After any change to upgrade levels
//! the caller runs [`UpgradeManager::sync_pipeline`], which rebuilds the
//! pipeline's upgrade-sourced entries from scratch in one exhaustive
//! dispatch over the effect variants. Unlock effects are surfaced as a
//! target list for the engine to apply, and click effects fold into
//! [`UpgradeManager::click_power`].
//!
//! Click bonuses deliberately combine differently from production
//! bonuses: `(base + Σ additive×level) × Π multiplier^level`. Click
//! multipliers compound per level where production multipliers scale
//! linearly, which keeps click upgrades rare but dramatic.

use crate::bignum::BigNum;
use crate::condition::{self, EvalContext};
use crate::event::GameEvent;
use crate::id::{ResourceId, UpgradeId};
use crate::pipeline::{BonusEntry, BonusSource, ProductionPipeline, StackMode};
use crate::registry::{EffectScaling, GameData, UnlockTarget, UpgradeEffect, UpgradeTier};
use crate::resource::{ResourceManager, SpendError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct UpgradeState {
    level: u32,
    unlocked: bool,
    total_spent: BigNum,
    first_purchase_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub level: u32,
    pub unlocked: bool,
    pub total_spent: BigNum,
    pub first_purchase_ms: Option<u64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum UpgradeError {
    #[error("upgrade {upgrade:?} is locked")]
    Locked { upgrade: UpgradeId },
    #[error("upgrade {upgrade:?} is already at max level {max}")]
    MaxLevel { upgrade: UpgradeId, max: u32 },
    #[error(transparent)]
    Funds(#[from] SpendError),
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct UpgradeManager {
    states: Vec<UpgradeState>,
}

impl UpgradeManager {
    pub fn new(data: &GameData) -> Self {
        let states = data
            .upgrade_ids()
            .map(|id| UpgradeState {
                level: 0,
                unlocked: data.upgrade(id).unlock_conditions.is_empty(),
                total_spent: BigNum::ZERO,
                first_purchase_ms: None,
            })
            .collect();
        UpgradeManager { states }
    }

    pub fn level(&self, id: UpgradeId) -> u32 {
        self.states[id.0 as usize].level
    }

    pub fn is_unlocked(&self, id: UpgradeId) -> bool {
        self.states[id.0 as usize].unlocked
    }

    pub fn total_spent(&self, id: UpgradeId) -> BigNum {
        self.states[id.0 as usize].total_spent
    }

    pub fn first_purchase_ms(&self, id: UpgradeId) -> Option<u64> {
        self.states[id.0 as usize].first_purchase_ms
    }

    pub fn next_cost(&self, data: &GameData, id: UpgradeId) -> BigNum {
        let def = data.upgrade(id);
        def.base_cost * BigNum::from_f64(def.cost_growth).powi(self.level(id) as i64)
    }

    /// Buy one level. Fails without mutation when locked, capped, or
    /// short of funds.
    pub fn purchase(
        &mut self,
        id: UpgradeId,
        data: &GameData,
        resources: &mut ResourceManager,
        now_ms: u64,
        events: &mut Vec<GameEvent>,
    ) -> Result<u32, UpgradeError> {
        if !self.is_unlocked(id) {
            return Err(UpgradeError::Locked { upgrade: id });
        }
        let def = data.upgrade(id);
        if let Some(max) = def.max_level {
            if self.level(id) >= max {
                return Err(UpgradeError::MaxLevel { upgrade: id, max });
            }
        }
        let cost = self.next_cost(data, id);
        resources.spend(def.cost_resource, cost, events)?;
        let state = &mut self.states[id.0 as usize];
        state.level += 1;
        state.total_spent = state.total_spent + cost;
        state.first_purchase_ms.get_or_insert(now_ms);
        events.push(GameEvent::UpgradePurchased {
            upgrade: id,
            level: state.level,
            cost,
        });
        Ok(state.level)
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    fn scaled(value: f64, scaling: EffectScaling, level: u32) -> BigNum {
        match scaling {
            EffectScaling::Constant => BigNum::from_f64(value),
            EffectScaling::Linear => BigNum::from_f64(value) * BigNum::from_u32(level),
            EffectScaling::Exponential => BigNum::from_f64(value).powi(level as i64),
        }
    }

    /// Rebuild every upgrade-sourced pipeline entry from current levels.
    pub fn sync_pipeline(&self, data: &GameData, pipeline: &mut ProductionPipeline) {
        pipeline.remove_by_source(BonusSource::Upgrade);
        for id in data.upgrade_ids() {
            let level = self.level(id);
            if level == 0 {
                continue;
            }
            let def = data.upgrade(id);
            for (idx, effect) in def.effects.iter().enumerate() {
                let (mode, target, value) = match effect {
                    UpgradeEffect::Multiplier {
                        target,
                        value,
                        scaling,
                    } => (
                        StackMode::Multiplicative,
                        *target,
                        Self::scaled(*value, *scaling, level),
                    ),
                    UpgradeEffect::Additive {
                        target,
                        value,
                        scaling,
                    } => (
                        StackMode::Additive,
                        *target,
                        Self::scaled(*value, *scaling, level),
                    ),
                    // Handled by unlock_targets / click_power /
                    // starting_bonuses.
                    _ => continue,
                };
                pipeline.add_or_update(BonusEntry {
                    id: format!("upgrade:{}:{idx}", def.name),
                    value,
                    source: BonusSource::Upgrade,
                    mode,
                    target,
                    priority: 0,
                    active: true,
                    gate: None,
                });
            }
        }
    }

    /// Unlock targets granted by every owned upgrade. The caller applies
    /// them idempotently.
    pub fn unlock_targets(&self, data: &GameData) -> Vec<UnlockTarget> {
        let mut targets = Vec::new();
        for id in data.upgrade_ids() {
            if self.level(id) == 0 {
                continue;
            }
            for effect in &data.upgrade(id).effects {
                if let UpgradeEffect::Unlock { target } = effect {
                    targets.push(*target);
                }
            }
        }
        targets
    }

    /// Per-run starting grants from owned upgrades.
    pub fn starting_bonuses(&self, data: &GameData) -> Vec<(ResourceId, BigNum)> {
        let mut grants = Vec::new();
        for id in data.upgrade_ids() {
            if self.level(id) == 0 {
                continue;
            }
            for effect in &data.upgrade(id).effects {
                if let UpgradeEffect::StartingBonus { resource, amount } = effect {
                    grants.push((*resource, *amount));
                }
            }
        }
        grants
    }

    /// Effective click power: `(base + Σ additive×level) × Π mult^level`.
    pub fn click_power(&self, data: &GameData, base: BigNum) -> BigNum {
        let mut additive = BigNum::ZERO;
        let mut multiplier = BigNum::ONE;
        for id in data.upgrade_ids() {
            let level = self.level(id);
            if level == 0 {
                continue;
            }
            for effect in &data.upgrade(id).effects {
                match effect {
                    UpgradeEffect::ClickAdditive { value } => {
                        additive =
                            additive + BigNum::from_f64(*value) * BigNum::from_u32(level);
                    }
                    UpgradeEffect::ClickMultiplier { value } => {
                        multiplier = multiplier * BigNum::from_f64(*value).powi(level as i64);
                    }
                    _ => {}
                }
            }
        }
        (base + additive) * multiplier
    }

    // -----------------------------------------------------------------------
    // Unlocks / rebirth
    // -----------------------------------------------------------------------

    pub fn pending_unlocks(&self, data: &GameData, ctx: &dyn EvalContext) -> Vec<UpgradeId> {
        data.upgrade_ids()
            .filter(|&id| {
                !self.states[id.0 as usize].unlocked
                    && condition::evaluate_all(ctx, &data.upgrade(id).unlock_conditions)
            })
            .collect()
    }

    pub fn unlock(&mut self, id: UpgradeId) {
        self.states[id.0 as usize].unlocked = true;
    }

    /// Run-tier upgrades reset; eternal and secret tiers persist, as do
    /// lifetime spend totals.
    pub fn rebirth(&mut self, data: &GameData) {
        for id in data.upgrade_ids() {
            let def = data.upgrade(id);
            if def.tier == UpgradeTier::Run {
                let state = &mut self.states[id.0 as usize];
                state.level = 0;
                state.unlocked = def.unlock_conditions.is_empty();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, data: &GameData, tier_filter: TierFilter) -> BTreeMap<String, UpgradeRecord> {
        data.upgrade_ids()
            .filter(|&id| tier_filter.includes(data.upgrade(id).tier))
            .map(|id| {
                let state = &self.states[id.0 as usize];
                (
                    data.upgrade(id).name.clone(),
                    UpgradeRecord {
                        level: state.level,
                        unlocked: state.unlocked,
                        total_spent: state.total_spent,
                        first_purchase_ms: state.first_purchase_ms,
                    },
                )
            })
            .collect()
    }

    pub fn restore(&mut self, data: &GameData, records: &BTreeMap<String, UpgradeRecord>) {
        for id in data.upgrade_ids() {
            if let Some(record) = records.get(&data.upgrade(id).name) {
                let state = &mut self.states[id.0 as usize];
                state.level = record.level;
                state.unlocked = record.unlocked;
                state.total_spent = record.total_spent;
                state.first_purchase_ms = record.first_purchase_ms;
            }
        }
    }
}

/// Which upgrade tiers a snapshot covers; run and eternal state live in
/// different halves of the save envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierFilter {
    RunOnly,
    EternalOnly,
    All,
}

impl TierFilter {
    fn includes(self, tier: UpgradeTier) -> bool {
        match self {
            TierFilter::RunOnly => tier == UpgradeTier::Run,
            TierFilter::EternalOnly => tier != UpgradeTier::Run,
            TierFilter::All => true,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
