//! Producers: levelled generators that feed resources every tick.
//!
//! A producer's next purchase cost follows an exponential curve,
//! `base_cost × growth^level`, and its raw output is `base_rate × level`
//! before the bonus pipeline applies. Rate computation is split from
//! application: [`ProducerManager::compute_rates`] reads immutable state
//! and returns per-resource rates, which the caller then credits, so the
//! evaluation context is never read and written in the same pass.

use crate::bignum::BigNum;
use crate::condition::{self, EvalContext};
use crate::event::GameEvent;
use crate::id::{ProducerId, ResourceId};
use crate::pipeline::ProductionPipeline;
use crate::registry::GameData;
use crate::resource::{ResourceManager, SpendError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ProducerState {
    level: u32,
    unlocked: bool,
    lifetime_produced: BigNum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerRecord {
    pub level: u32,
    pub unlocked: bool,
    pub lifetime_produced: BigNum,
}

/// Output of [`ProducerManager::compute_rates`], per second.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionPlan {
    pub by_resource: BTreeMap<ResourceId, BigNum>,
    pub by_producer: Vec<(ProducerId, BigNum)>,
}

#[derive(Debug, Error, PartialEq)]
pub enum PurchaseError {
    #[error("producer {producer:?} is locked")]
    Locked { producer: ProducerId },
    #[error(transparent)]
    Funds(#[from] SpendError),
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ProducerManager {
    states: Vec<ProducerState>,
}

impl ProducerManager {
    pub fn new(data: &GameData) -> Self {
        let states = data
            .producer_ids()
            .map(|id| ProducerState {
                level: 0,
                unlocked: data.producer(id).unlock_conditions.is_empty(),
                lifetime_produced: BigNum::ZERO,
            })
            .collect();
        ProducerManager { states }
    }

    pub fn level(&self, id: ProducerId) -> u32 {
        self.states[id.0 as usize].level
    }

    pub fn is_unlocked(&self, id: ProducerId) -> bool {
        self.states[id.0 as usize].unlocked
    }

    pub fn lifetime_produced(&self, id: ProducerId) -> BigNum {
        self.states[id.0 as usize].lifetime_produced
    }

    /// Cost of the next level: `base_cost × growth^level`.
    pub fn next_cost(&self, data: &GameData, id: ProducerId) -> BigNum {
        let def = data.producer(id);
        def.base_cost * BigNum::from_f64(def.cost_growth).powi(self.level(id) as i64)
    }

    /// Raw output per second before bonuses: `base_rate × level`.
    pub fn base_production(&self, data: &GameData, id: ProducerId) -> BigNum {
        data.producer(id).base_rate * BigNum::from_u32(self.level(id))
    }

    /// Buy one level, debiting the cost resource. Emits the purchase
    /// event on success; fails without mutation otherwise.
    pub fn purchase(
        &mut self,
        id: ProducerId,
        data: &GameData,
        resources: &mut ResourceManager,
        events: &mut Vec<GameEvent>,
    ) -> Result<u32, PurchaseError> {
        if !self.is_unlocked(id) {
            return Err(PurchaseError::Locked { producer: id });
        }
        let cost = self.next_cost(data, id);
        resources.spend(data.producer(id).cost_resource, cost, events)?;
        let state = &mut self.states[id.0 as usize];
        state.level += 1;
        events.push(GameEvent::ProducerPurchased {
            producer: id,
            level: state.level,
            cost,
        });
        Ok(state.level)
    }

    /// Effective per-second output of every unlocked producer, both
    /// per producer and summed per output resource. Pure with respect to
    /// `ctx`; the caller applies the plan afterwards.
    pub fn compute_rates(
        &self,
        data: &GameData,
        pipeline: &ProductionPipeline,
        ctx: &dyn EvalContext,
    ) -> ProductionPlan {
        let mut plan = ProductionPlan::default();
        for id in data.producer_ids() {
            let state = &self.states[id.0 as usize];
            if !state.unlocked || state.level == 0 {
                continue;
            }
            let def = data.producer(id);
            let rate = pipeline.calculate(def.output, self.base_production(data, id), ctx);
            let slot = plan.by_resource.entry(def.output).or_insert(BigNum::ZERO);
            *slot = *slot + rate;
            plan.by_producer.push((id, rate));
        }
        plan
    }

    /// Credit lifetime totals after the caller has applied a tick's
    /// production.
    pub fn record_production(&mut self, id: ProducerId, produced: BigNum) {
        let state = &mut self.states[id.0 as usize];
        state.lifetime_produced = state.lifetime_produced + produced;
    }

    pub fn pending_unlocks(&self, data: &GameData, ctx: &dyn EvalContext) -> Vec<ProducerId> {
        data.producer_ids()
            .filter(|&id| {
                !self.states[id.0 as usize].unlocked
                    && condition::evaluate_all(ctx, &data.producer(id).unlock_conditions)
            })
            .collect()
    }

    pub fn unlock(&mut self, id: ProducerId) {
        self.states[id.0 as usize].unlocked = true;
    }

    /// Levels and unlock flags reset; lifetime totals survive.
    pub fn rebirth(&mut self, data: &GameData) {
        for id in data.producer_ids() {
            let state = &mut self.states[id.0 as usize];
            state.level = 0;
            state.unlocked = data.producer(id).unlock_conditions.is_empty();
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, data: &GameData) -> BTreeMap<String, ProducerRecord> {
        data.producer_ids()
            .map(|id| {
                let state = &self.states[id.0 as usize];
                (
                    data.producer(id).name.clone(),
                    ProducerRecord {
                        level: state.level,
                        unlocked: state.unlocked,
                        lifetime_produced: state.lifetime_produced,
                    },
                )
            })
            .collect()
    }

    pub fn restore(&mut self, data: &GameData, records: &BTreeMap<String, ProducerRecord>) {
        for id in data.producer_ids() {
            if let Some(record) = records.get(&data.producer(id).name) {
                let state = &mut self.states[id.0 as usize];
                state.level = record.level;
                state.unlocked = record.unlocked;
                state.lifetime_produced = record.lifetime_produced;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
