//! Static game content: resource, producer, upgrade, phase, and
//! achievement definitions.
//!
//! Content is assembled through [`GameDataBuilder`] and frozen into an
//! immutable [`GameData`] by [`GameDataBuilder::build`], which validates
//! every cross-reference up front. Managers hold ids into the frozen
//! tables and never see a dangling reference at runtime.

use crate::bignum::BigNum;
use crate::condition::Condition;
use crate::id::{AchievementId, ProducerId, ResourceId, UpgradeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDef {
    pub name: String,
    pub start_amount: BigNum,
    /// Survives rebirth instead of resetting to `start_amount`.
    pub persists_on_rebirth: bool,
    /// ANDed; empty means unlocked from the start.
    pub unlock_conditions: Vec<Condition>,
    pub display_order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerDef {
    pub name: String,
    /// Resource this producer generates.
    pub output: ResourceId,
    pub cost_resource: ResourceId,
    pub base_cost: BigNum,
    /// Per-level cost multiplier; next cost = base × growth^level.
    pub cost_growth: f64,
    /// Output per second per level before bonuses.
    pub base_rate: BigNum,
    pub unlock_conditions: Vec<Condition>,
    pub display_order: u32,
}

/// Lifetime class of an upgrade; decides rebirth persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeTier {
    /// Reset on rebirth.
    Run,
    /// Persists forever.
    Eternal,
    /// Persists forever, hidden until unlocked.
    Secret,
}

/// How an effect value grows with upgrade level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EffectScaling {
    /// Same value at every level.
    #[default]
    Constant,
    /// value × level.
    Linear,
    /// value ^ level.
    Exponential,
}

/// What an unlock effect opens up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockTarget {
    Resource(ResourceId),
    Producer(ProducerId),
    Upgrade(UpgradeId),
}

/// One declarative upgrade effect. `target: None` applies globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpgradeEffect {
    Multiplier {
        target: Option<ResourceId>,
        value: f64,
        scaling: EffectScaling,
    },
    Additive {
        target: Option<ResourceId>,
        value: f64,
        scaling: EffectScaling,
    },
    Unlock {
        target: UnlockTarget,
    },
    /// Flat addition to click power, per level.
    ClickAdditive {
        value: f64,
    },
    /// Click power factor, compounding per level.
    ClickMultiplier {
        value: f64,
    },
    /// Granted to the named resource at the start of each run.
    StartingBonus {
        resource: ResourceId,
        amount: BigNum,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeDef {
    pub name: String,
    pub tier: UpgradeTier,
    pub cost_resource: ResourceId,
    pub base_cost: BigNum,
    pub cost_growth: f64,
    /// `None` means unbounded.
    pub max_level: Option<u32>,
    pub effects: Vec<UpgradeEffect>,
    pub unlock_conditions: Vec<Condition>,
    pub display_order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDef {
    pub name: String,
    /// ANDed to gate `advance()` out of this phase.
    pub transition_conditions: Vec<Condition>,
    /// Advance automatically once eligible.
    pub auto_advance: bool,
    pub transition_duration_secs: f64,
    /// Sub-stage timer durations; must sum to the transition duration.
    /// Empty means a single stage covering the whole duration.
    pub transition_stages: Vec<f64>,
    // Mode flags stored for downstream consumers; the state machine only
    // carries them.
    pub boss: bool,
    pub meditation: bool,
    pub clicking_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDef {
    pub name: String,
    pub tier: u32,
    /// ANDed.
    pub conditions: Vec<Condition>,
    pub secret: bool,
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("content must define at least one phase")]
    NoPhases,
    #[error("{context}: unknown resource {id:?}")]
    UnknownResource { id: ResourceId, context: String },
    #[error("{context}: unknown producer {id:?}")]
    UnknownProducer { id: ProducerId, context: String },
    #[error("{context}: unknown upgrade {id:?}")]
    UnknownUpgrade { id: UpgradeId, context: String },
    #[error("{context}: unknown achievement {id:?}")]
    UnknownAchievement {
        id: AchievementId,
        context: String,
    },
    #[error("{context}: phase {phase} out of range 1..={max}")]
    PhaseOutOfRange {
        phase: u32,
        max: u32,
        context: String,
    },
    #[error("{context}: cost growth {growth} must be positive")]
    InvalidCostGrowth { growth: f64, context: String },
    #[error("phase {phase}: transition stages sum to {actual}, expected {expected}")]
    TransitionTimingMismatch {
        phase: u32,
        actual: f64,
        expected: f64,
    },
}

// ---------------------------------------------------------------------------
// Frozen data
// ---------------------------------------------------------------------------

/// Immutable, validated content tables. Ids index into the tables
/// directly.
#[derive(Debug, Clone)]
pub struct GameData {
    resources: Vec<ResourceDef>,
    producers: Vec<ProducerDef>,
    upgrades: Vec<UpgradeDef>,
    phases: Vec<PhaseDef>,
    achievements: Vec<AchievementDef>,
}

impl GameData {
    pub fn resource(&self, id: ResourceId) -> &ResourceDef {
        &self.resources[id.0 as usize]
    }

    pub fn producer(&self, id: ProducerId) -> &ProducerDef {
        &self.producers[id.0 as usize]
    }

    pub fn upgrade(&self, id: UpgradeId) -> &UpgradeDef {
        &self.upgrades[id.0 as usize]
    }

    /// Phases are numbered from 1.
    pub fn phase(&self, number: u32) -> &PhaseDef {
        &self.phases[(number - 1) as usize]
    }

    pub fn achievement(&self, id: AchievementId) -> &AchievementDef {
        &self.achievements[id.0 as usize]
    }

    pub fn resource_count(&self) -> u32 {
        self.resources.len() as u32
    }

    pub fn producer_count(&self) -> u32 {
        self.producers.len() as u32
    }

    pub fn upgrade_count(&self) -> u32 {
        self.upgrades.len() as u32
    }

    pub fn phase_count(&self) -> u32 {
        self.phases.len() as u32
    }

    pub fn achievement_count(&self) -> u32 {
        self.achievements.len() as u32
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = ResourceId> {
        (0..self.resources.len() as u32).map(ResourceId)
    }

    pub fn producer_ids(&self) -> impl Iterator<Item = ProducerId> {
        (0..self.producers.len() as u32).map(ProducerId)
    }

    pub fn upgrade_ids(&self) -> impl Iterator<Item = UpgradeId> {
        (0..self.upgrades.len() as u32).map(UpgradeId)
    }

    pub fn achievement_ids(&self) -> impl Iterator<Item = AchievementId> {
        (0..self.achievements.len() as u32).map(AchievementId)
    }

    /// Look up a resource id by definition name.
    pub fn resource_by_name(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|def| def.name == name)
            .map(|idx| ResourceId(idx as u32))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates definitions, then validates and freezes them.
#[derive(Debug, Default)]
pub struct GameDataBuilder {
    resources: Vec<ResourceDef>,
    producers: Vec<ProducerDef>,
    upgrades: Vec<UpgradeDef>,
    phases: Vec<PhaseDef>,
    achievements: Vec<AchievementDef>,
}

impl GameDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&mut self, def: ResourceDef) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(def);
        id
    }

    pub fn add_producer(&mut self, def: ProducerDef) -> ProducerId {
        let id = ProducerId(self.producers.len() as u32);
        self.producers.push(def);
        id
    }

    pub fn add_upgrade(&mut self, def: UpgradeDef) -> UpgradeId {
        let id = UpgradeId(self.upgrades.len() as u32);
        self.upgrades.push(def);
        id
    }

    /// Phases are numbered in insertion order, starting at 1.
    pub fn add_phase(&mut self, def: PhaseDef) -> u32 {
        self.phases.push(def);
        self.phases.len() as u32
    }

    pub fn add_achievement(&mut self, def: AchievementDef) -> AchievementId {
        let id = AchievementId(self.achievements.len() as u32);
        self.achievements.push(def);
        id
    }

    /// Validate every cross-reference and freeze.
    pub fn build(self) -> Result<GameData, DataError> {
        if self.phases.is_empty() {
            return Err(DataError::NoPhases);
        }

        for def in &self.resources {
            let context = format!("resource {:?}", def.name);
            for cond in &def.unlock_conditions {
                self.check_condition(cond, &context)?;
            }
        }

        for def in &self.producers {
            let context = format!("producer {:?}", def.name);
            self.check_resource(def.output, &context)?;
            self.check_resource(def.cost_resource, &context)?;
            if def.cost_growth <= 0.0 {
                return Err(DataError::InvalidCostGrowth {
                    growth: def.cost_growth,
                    context,
                });
            }
            for cond in &def.unlock_conditions {
                self.check_condition(cond, &context)?;
            }
        }

        for def in &self.upgrades {
            let context = format!("upgrade {:?}", def.name);
            self.check_resource(def.cost_resource, &context)?;
            if def.cost_growth <= 0.0 {
                return Err(DataError::InvalidCostGrowth {
                    growth: def.cost_growth,
                    context,
                });
            }
            for effect in &def.effects {
                self.check_effect(effect, &context)?;
            }
            for cond in &def.unlock_conditions {
                self.check_condition(cond, &context)?;
            }
        }

        for (idx, def) in self.phases.iter().enumerate() {
            let number = (idx + 1) as u32;
            let context = format!("phase {number}");
            for cond in &def.transition_conditions {
                self.check_condition(cond, &context)?;
            }
            if !def.transition_stages.is_empty() {
                let actual: f64 = def.transition_stages.iter().sum();
                if (actual - def.transition_duration_secs).abs() > 1e-6 {
                    return Err(DataError::TransitionTimingMismatch {
                        phase: number,
                        actual,
                        expected: def.transition_duration_secs,
                    });
                }
            }
        }

        for def in &self.achievements {
            let context = format!("achievement {:?}", def.name);
            for cond in &def.conditions {
                self.check_condition(cond, &context)?;
            }
        }

        Ok(GameData {
            resources: self.resources,
            producers: self.producers,
            upgrades: self.upgrades,
            phases: self.phases,
            achievements: self.achievements,
        })
    }

    // -----------------------------------------------------------------------
    // Reference checks
    // -----------------------------------------------------------------------

    fn check_resource(&self, id: ResourceId, context: &str) -> Result<(), DataError> {
        if (id.0 as usize) < self.resources.len() {
            Ok(())
        } else {
            Err(DataError::UnknownResource {
                id,
                context: context.to_string(),
            })
        }
    }

    fn check_producer(&self, id: ProducerId, context: &str) -> Result<(), DataError> {
        if (id.0 as usize) < self.producers.len() {
            Ok(())
        } else {
            Err(DataError::UnknownProducer {
                id,
                context: context.to_string(),
            })
        }
    }

    fn check_upgrade(&self, id: UpgradeId, context: &str) -> Result<(), DataError> {
        if (id.0 as usize) < self.upgrades.len() {
            Ok(())
        } else {
            Err(DataError::UnknownUpgrade {
                id,
                context: context.to_string(),
            })
        }
    }

    fn check_achievement(&self, id: AchievementId, context: &str) -> Result<(), DataError> {
        if (id.0 as usize) < self.achievements.len() {
            Ok(())
        } else {
            Err(DataError::UnknownAchievement {
                id,
                context: context.to_string(),
            })
        }
    }

    fn check_phase(&self, phase: u32, context: &str) -> Result<(), DataError> {
        if phase >= 1 && (phase as usize) <= self.phases.len() {
            Ok(())
        } else {
            Err(DataError::PhaseOutOfRange {
                phase,
                max: self.phases.len() as u32,
                context: context.to_string(),
            })
        }
    }

    fn check_effect(&self, effect: &UpgradeEffect, context: &str) -> Result<(), DataError> {
        match effect {
            UpgradeEffect::Multiplier {
                target: Some(id), ..
            }
            | UpgradeEffect::Additive {
                target: Some(id), ..
            } => self.check_resource(*id, context),
            UpgradeEffect::StartingBonus { resource, .. } => {
                self.check_resource(*resource, context)
            }
            UpgradeEffect::Unlock { target } => match target {
                UnlockTarget::Resource(id) => self.check_resource(*id, context),
                UnlockTarget::Producer(id) => self.check_producer(*id, context),
                UnlockTarget::Upgrade(id) => self.check_upgrade(*id, context),
            },
            _ => Ok(()),
        }
    }

    fn check_condition(&self, cond: &Condition, context: &str) -> Result<(), DataError> {
        match cond {
            Condition::ResourceThreshold { resource, .. } => {
                self.check_resource(*resource, context)
            }
            Condition::PhaseReached { phase } | Condition::PhaseCompleted { phase } => {
                self.check_phase(*phase, context)
            }
            Condition::ProducerCount { producer, .. } => self.check_producer(*producer, context),
            Condition::UpgradeLevel { upgrade, .. } => self.check_upgrade(*upgrade, context),
            Condition::AchievementUnlocked { achievement } => {
                self.check_achievement(*achievement, context)
            }
            Condition::All(children) | Condition::Any(children) => {
                for child in children {
                    self.check_condition(child, context)?;
                }
                Ok(())
            }
            Condition::Not(inner) => self.check_condition(inner, context),
            _ => Ok(()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
