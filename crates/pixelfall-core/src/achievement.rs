//! Achievements: condition-gated, unlock-once, eternal.
//!
//! Unlocks follow the same two-phase pattern as the other managers:
//! collect eligible ids against a read-only context, then commit them,
//! each commit emitting exactly one unlock event. Achievements never
//! re-lock and survive rebirth.

use crate::condition::{self, EvalContext};
use crate::event::GameEvent;
use crate::id::AchievementId;
use crate::registry::GameData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct AchievementState {
    unlocked: bool,
    unlocked_at_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub unlocked_at_ms: Option<u64>,
}

pub struct AchievementManager {
    states: Vec<AchievementState>,
}

impl AchievementManager {
    pub fn new(data: &GameData) -> Self {
        AchievementManager {
            states: vec![AchievementState::default(); data.achievement_count() as usize],
        }
    }

    pub fn is_unlocked(&self, id: AchievementId) -> bool {
        self.states[id.0 as usize].unlocked
    }

    pub fn unlocked_at_ms(&self, id: AchievementId) -> Option<u64> {
        self.states[id.0 as usize].unlocked_at_ms
    }

    pub fn unlocked_count(&self) -> u32 {
        self.states.iter().filter(|s| s.unlocked).count() as u32
    }

    /// Progress toward an achievement, 1.0 once unlocked.
    pub fn progress(&self, id: AchievementId, data: &GameData, ctx: &dyn EvalContext) -> f64 {
        if self.states[id.0 as usize].unlocked {
            return 1.0;
        }
        condition::evaluate_progress(ctx, &data.achievement(id).conditions)
    }

    /// Locked achievements whose conditions now hold.
    pub fn pending_unlocks(&self, data: &GameData, ctx: &dyn EvalContext) -> Vec<AchievementId> {
        data.achievement_ids()
            .filter(|&id| {
                !self.states[id.0 as usize].unlocked
                    && condition::evaluate_all(ctx, &data.achievement(id).conditions)
            })
            .collect()
    }

    /// Commit an unlock. A second unlock of the same id is a silent
    /// no-op.
    pub fn unlock(
        &mut self,
        id: AchievementId,
        data: &GameData,
        now_ms: u64,
        events: &mut Vec<GameEvent>,
    ) {
        let state = &mut self.states[id.0 as usize];
        if state.unlocked {
            return;
        }
        state.unlocked = true;
        state.unlocked_at_ms = Some(now_ms);
        let def = data.achievement(id);
        events.push(GameEvent::AchievementUnlocked {
            achievement: id,
            name: def.name.clone(),
            tier: def.tier,
        });
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, data: &GameData) -> BTreeMap<String, AchievementRecord> {
        data.achievement_ids()
            .filter(|&id| self.states[id.0 as usize].unlocked)
            .map(|id| {
                (
                    data.achievement(id).name.clone(),
                    AchievementRecord {
                        unlocked_at_ms: self.states[id.0 as usize].unlocked_at_ms,
                    },
                )
            })
            .collect()
    }

    pub fn restore(&mut self, data: &GameData, records: &BTreeMap<String, AchievementRecord>) {
        for id in data.achievement_ids() {
            if let Some(record) = records.get(&data.achievement(id).name) {
                let state = &mut self.states[id.0 as usize];
                state.unlocked = true;
                state.unlocked_at_ms = record.unlocked_at_ms;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
