//! Bonus stacking pipeline.
//!
//! Holds the registry of named bonus entries and computes a resource's
//! effective rate from a base rate:
//!
//! ```text
//! rate = base × Π(multiplicative) × (1 + Σ(additive))
//! ```
//!
//! Multiplicative bonuses always fold before additive ones, so additive
//! percentage bonuses scale with the multiplied total rather than the
//! bare base. Entries are keyed by name with upsert semantics and carry
//! a source category for bulk clearing. An inactive entry, or one whose
//! gate condition currently fails, contributes nothing.

use crate::bignum::BigNum;
use crate::condition::{self, Condition, EvalContext};
use crate::id::ResourceId;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// How an entry folds into the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMode {
    Multiplicative,
    Additive,
}

/// Which subsystem registered an entry; used for bulk clearing and
/// breakdown display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusSource {
    Upgrade,
    Achievement,
    Phase,
    Story,
    Debug,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BonusEntry {
    pub id: String,
    pub value: BigNum,
    pub source: BonusSource,
    pub mode: StackMode,
    /// `None` applies the entry to every resource.
    pub target: Option<ResourceId>,
    /// Display ordering in breakdowns only; folding is commutative.
    pub priority: i32,
    pub active: bool,
    /// Entry only applies while this holds.
    pub gate: Option<Condition>,
}

impl BonusEntry {
    /// Multiplicative entry with defaults for the rarely-set fields.
    pub fn multiplier(id: impl Into<String>, source: BonusSource, value: BigNum) -> Self {
        BonusEntry {
            id: id.into(),
            value,
            source,
            mode: StackMode::Multiplicative,
            target: None,
            priority: 0,
            active: true,
            gate: None,
        }
    }

    /// Additive entry with defaults for the rarely-set fields.
    pub fn additive(id: impl Into<String>, source: BonusSource, value: BigNum) -> Self {
        BonusEntry {
            id: id.into(),
            value,
            source,
            mode: StackMode::Additive,
            target: None,
            priority: 0,
            active: true,
            gate: None,
        }
    }

    pub fn targeting(mut self, resource: ResourceId) -> Self {
        self.target = Some(resource);
        self
    }

    pub fn gated(mut self, gate: Condition) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Intermediate values of one `calculate` call, for debugging and UI.
#[derive(Debug, Clone, PartialEq)]
pub struct RateBreakdown {
    pub base: BigNum,
    pub multiplicative_product: BigNum,
    pub additive_sum: BigNum,
    pub rate: BigNum,
    /// Contributing entries, highest priority first.
    pub entries: Vec<BonusEntry>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ProductionPipeline {
    entries: HashMap<String, BonusEntry>,
}

impl ProductionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert keyed by `entry.id`; a re-registration supersedes the old
    /// entry entirely.
    pub fn add_or_update(&mut self, entry: BonusEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Returns whether the entry existed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Toggle an entry without removing it. Returns whether it existed.
    pub fn set_active(&mut self, id: &str, active: bool) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.active = active;
                true
            }
            None => false,
        }
    }

    /// Drop every entry registered by `source`, returning how many went.
    pub fn remove_by_source(&mut self, source: BonusSource) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.source != source);
        before - self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&BonusEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn applies(entry: &BonusEntry, resource: ResourceId, ctx: &dyn EvalContext) -> bool {
        if !entry.active {
            return false;
        }
        if entry.target.is_some_and(|target| target != resource) {
            return false;
        }
        match &entry.gate {
            Some(gate) => condition::evaluate(ctx, gate),
            None => true,
        }
    }

    /// Effective rate for `resource` from `base`. A non-positive base
    /// short-circuits to zero.
    pub fn calculate(&self, resource: ResourceId, base: BigNum, ctx: &dyn EvalContext) -> BigNum {
        if base <= BigNum::ZERO {
            return BigNum::ZERO;
        }
        let mut product = BigNum::ONE;
        let mut sum = BigNum::ZERO;
        for entry in self.entries.values() {
            if !Self::applies(entry, resource, ctx) {
                continue;
            }
            match entry.mode {
                StackMode::Multiplicative => product = product * entry.value,
                StackMode::Additive => sum = sum + entry.value,
            }
        }
        base * product * (BigNum::ONE + sum)
    }

    /// Same computation as [`calculate`](Self::calculate), exposing the
    /// intermediate folds and the contributing entry list.
    pub fn breakdown(
        &self,
        resource: ResourceId,
        base: BigNum,
        ctx: &dyn EvalContext,
    ) -> RateBreakdown {
        let mut contributing: Vec<BonusEntry> = self
            .entries
            .values()
            .filter(|entry| Self::applies(entry, resource, ctx))
            .cloned()
            .collect();
        contributing.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut product = BigNum::ONE;
        let mut sum = BigNum::ZERO;
        for entry in &contributing {
            match entry.mode {
                StackMode::Multiplicative => product = product * entry.value,
                StackMode::Additive => sum = sum + entry.value,
            }
        }
        let rate = if base <= BigNum::ZERO {
            BigNum::ZERO
        } else {
            base * product * (BigNum::ONE + sum)
        };
        RateBreakdown {
            base,
            multiplicative_product: product,
            additive_sum: sum,
            rate,
            entries: contributing,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
