//! Resource ownership: amounts, rates, unlock flags, lifetime totals.
//!
//! Amounts move only through [`ResourceManager::add`] and
//! [`ResourceManager::spend`], both of which emit a change event, so
//! every observer sees every mutation. Unlock checks are two-phase:
//! callers collect pending ids against a read-only context, then commit
//! them, which keeps evaluation free of side effects.

use crate::bignum::BigNum;
use crate::condition::{self, EvalContext};
use crate::event::{ChangeSource, GameEvent};
use crate::id::ResourceId;
use crate::registry::GameData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ResourceState {
    amount: BigNum,
    /// Effective production per second, recomputed each tick.
    rate: BigNum,
    unlocked: bool,
    lifetime_generated: BigNum,
    lifetime_spent: BigNum,
}

/// Per-resource serialized record, keyed by definition name in saves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub amount: BigNum,
    pub unlocked: bool,
    pub lifetime_generated: BigNum,
    pub lifetime_spent: BigNum,
}

#[derive(Debug, Error, PartialEq)]
pub enum SpendError {
    #[error("resource {resource:?} is locked")]
    Locked { resource: ResourceId },
    #[error("need {need} of {resource:?}, have {have}")]
    InsufficientFunds {
        resource: ResourceId,
        need: BigNum,
        have: BigNum,
    },
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ResourceManager {
    states: Vec<ResourceState>,
}

impl ResourceManager {
    pub fn new(data: &GameData) -> Self {
        let states = data
            .resource_ids()
            .map(|id| {
                let def = data.resource(id);
                ResourceState {
                    amount: def.start_amount,
                    rate: BigNum::ZERO,
                    unlocked: def.unlock_conditions.is_empty(),
                    lifetime_generated: BigNum::ZERO,
                    lifetime_spent: BigNum::ZERO,
                }
            })
            .collect();
        ResourceManager { states }
    }

    pub fn amount(&self, id: ResourceId) -> BigNum {
        self.states[id.0 as usize].amount
    }

    pub fn rate(&self, id: ResourceId) -> BigNum {
        self.states[id.0 as usize].rate
    }

    pub fn is_unlocked(&self, id: ResourceId) -> bool {
        self.states[id.0 as usize].unlocked
    }

    pub fn lifetime_generated(&self, id: ResourceId) -> BigNum {
        self.states[id.0 as usize].lifetime_generated
    }

    pub fn lifetime_spent(&self, id: ResourceId) -> BigNum {
        self.states[id.0 as usize].lifetime_spent
    }

    pub fn can_afford(&self, id: ResourceId, cost: BigNum) -> bool {
        self.states[id.0 as usize].amount >= cost
    }

    pub fn set_rate(&mut self, id: ResourceId, rate: BigNum) {
        self.states[id.0 as usize].rate = rate;
    }

    /// Credit `delta` to the resource. A zero delta is a no-op and emits
    /// nothing.
    pub fn add(
        &mut self,
        id: ResourceId,
        delta: BigNum,
        source: ChangeSource,
        events: &mut Vec<GameEvent>,
    ) {
        if delta == BigNum::ZERO {
            return;
        }
        let state = &mut self.states[id.0 as usize];
        let previous = state.amount;
        state.amount = state.amount + delta;
        state.lifetime_generated = state.lifetime_generated + delta;
        events.push(GameEvent::ResourceChanged {
            resource: id,
            previous,
            amount: state.amount,
            delta,
            source,
        });
    }

    /// Debit `cost`, failing without mutation when locked or short.
    pub fn spend(
        &mut self,
        id: ResourceId,
        cost: BigNum,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), SpendError> {
        let state = &mut self.states[id.0 as usize];
        if !state.unlocked {
            return Err(SpendError::Locked { resource: id });
        }
        if state.amount < cost {
            return Err(SpendError::InsufficientFunds {
                resource: id,
                need: cost,
                have: state.amount,
            });
        }
        let previous = state.amount;
        state.amount = state.amount - cost;
        state.lifetime_spent = state.lifetime_spent + cost;
        events.push(GameEvent::ResourceChanged {
            resource: id,
            previous,
            amount: state.amount,
            delta: cost,
            source: ChangeSource::Spend,
        });
        Ok(())
    }

    /// Locked resources whose unlock conditions now hold.
    pub fn pending_unlocks(&self, data: &GameData, ctx: &dyn EvalContext) -> Vec<ResourceId> {
        data.resource_ids()
            .filter(|&id| {
                !self.states[id.0 as usize].unlocked
                    && condition::evaluate_all(ctx, &data.resource(id).unlock_conditions)
            })
            .collect()
    }

    pub fn unlock(&mut self, id: ResourceId) {
        self.states[id.0 as usize].unlocked = true;
    }

    /// Reset run-scoped state. Amounts flagged persistent survive;
    /// lifetime totals always survive.
    pub fn rebirth(&mut self, data: &GameData) {
        for id in data.resource_ids() {
            let def = data.resource(id);
            let state = &mut self.states[id.0 as usize];
            if !def.persists_on_rebirth {
                state.amount = def.start_amount;
                state.unlocked = def.unlock_conditions.is_empty();
            }
            state.rate = BigNum::ZERO;
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, data: &GameData) -> BTreeMap<String, ResourceRecord> {
        data.resource_ids()
            .map(|id| {
                let state = &self.states[id.0 as usize];
                (
                    data.resource(id).name.clone(),
                    ResourceRecord {
                        amount: state.amount,
                        unlocked: state.unlocked,
                        lifetime_generated: state.lifetime_generated,
                        lifetime_spent: state.lifetime_spent,
                    },
                )
            })
            .collect()
    }

    /// Restore from a save map. Records for names the content no longer
    /// defines are dropped; missing names keep their initial state.
    pub fn restore(&mut self, data: &GameData, records: &BTreeMap<String, ResourceRecord>) {
        for id in data.resource_ids() {
            if let Some(record) = records.get(&data.resource(id).name) {
                let state = &mut self.states[id.0 as usize];
                state.amount = record.amount;
                state.unlocked = record.unlocked;
                state.lifetime_generated = record.lifetime_generated;
                state.lifetime_spent = record.lifetime_spent;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
