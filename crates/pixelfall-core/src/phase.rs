//! Staged progression: an ordered finite-state machine over phases.
//!
//! Phases are numbered from 1. Forward transitions are gated by the
//! phase's condition list and play out over a timed sequence of
//! sub-stages driven by [`PhaseManager::tick`]; while the sequence runs,
//! repeated `advance()` calls are rejected by the transitioning guard,
//! which makes per-tick auto-advance naturally idempotent. Reading
//! `can_advance` or `transition_progress` never mutates anything.
//!
//! Completion flags and best times survive rebirth; entry timings and
//! the current phase do not.

use crate::condition::{self, EvalContext};
use crate::event::GameEvent;
use crate::registry::GameData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Progress records
// ---------------------------------------------------------------------------

/// Per-phase history, one record per phase for the lifetime of a save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub entered: bool,
    pub completed: bool,
    /// Cumulative seconds spent in the phase, across visits.
    pub time_in_phase_secs: f64,
    pub best_completion_secs: Option<f64>,
    pub first_entered_ms: Option<u64>,
    pub last_entered_ms: Option<u64>,
    /// Story choices made while in this phase.
    pub story_choices: BTreeMap<String, String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum AdvanceError {
    #[error("a phase transition is already running")]
    AlreadyTransitioning,
    #[error("phase {phase} is terminal")]
    TerminalPhase { phase: u32 },
    #[error("phase {phase} transition conditions not met")]
    ConditionsNotMet { phase: u32 },
}

/// Timed sub-stage sequence of a running transition.
#[derive(Debug, Clone)]
struct TransitionRun {
    /// Remaining sub-stage durations, front first.
    stages: Vec<f64>,
    index: usize,
    elapsed_in_stage: f64,
    to_phase: u32,
}

impl TransitionRun {
    fn new(data: &GameData, from_phase: u32) -> Self {
        let def = data.phase(from_phase);
        let stages = if def.transition_stages.is_empty() {
            vec![def.transition_duration_secs]
        } else {
            def.transition_stages.clone()
        };
        TransitionRun {
            stages,
            index: 0,
            elapsed_in_stage: 0.0,
            to_phase: from_phase + 1,
        }
    }

    /// Advance by `dt` seconds; true once every sub-stage has elapsed.
    fn tick(&mut self, mut dt: f64) -> bool {
        while dt > 0.0 && self.index < self.stages.len() {
            let remaining = self.stages[self.index] - self.elapsed_in_stage;
            if dt >= remaining {
                dt -= remaining;
                self.index += 1;
                self.elapsed_in_stage = 0.0;
            } else {
                self.elapsed_in_stage += dt;
                dt = 0.0;
            }
        }
        self.index >= self.stages.len()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct PhaseManager {
    current: u32,
    /// Highest phase number whose entry has been unlocked.
    highest_unlocked: u32,
    records: Vec<PhaseRecord>,
    transition: Option<TransitionRun>,
    /// Seconds in the current phase since (re)entry.
    elapsed_secs: f64,
}

impl PhaseManager {
    /// Enters phase 1 immediately, announcing it with a synthetic
    /// previous phase of 0.
    pub fn new(data: &GameData, now_ms: u64, events: &mut Vec<GameEvent>) -> Self {
        let mut mgr = PhaseManager {
            current: 0,
            highest_unlocked: 1,
            records: vec![PhaseRecord::default(); data.phase_count() as usize],
            transition: None,
            elapsed_secs: 0.0,
        };
        mgr.enter(1, now_ms, events);
        mgr
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn highest_unlocked(&self) -> u32 {
        self.highest_unlocked
    }

    pub fn record(&self, phase: u32) -> &PhaseRecord {
        &self.records[(phase - 1) as usize]
    }

    pub fn is_completed(&self, phase: u32) -> bool {
        self.records[(phase - 1) as usize].completed
    }

    /// Pure check: could `advance` succeed right now?
    pub fn can_advance(&self, data: &GameData, ctx: &dyn EvalContext) -> bool {
        self.transition.is_none()
            && self.current < data.phase_count()
            && self.conditions_met(data, ctx)
    }

    /// Just the condition part of [`can_advance`](Self::can_advance).
    pub fn conditions_met(&self, data: &GameData, ctx: &dyn EvalContext) -> bool {
        condition::evaluate_all(ctx, &data.phase(self.current).transition_conditions)
    }

    /// Mean progress across the current phase's transition conditions.
    pub fn transition_progress(&self, data: &GameData, ctx: &dyn EvalContext) -> f64 {
        condition::evaluate_progress(ctx, &data.phase(self.current).transition_conditions)
    }

    /// Begin the transition out of the current phase. The new phase
    /// commits only once the timed sequence finishes under `tick`.
    /// `conditions_met` is the caller's pre-evaluated
    /// [`conditions_met`](Self::conditions_met) result.
    pub fn advance(
        &mut self,
        data: &GameData,
        conditions_met: bool,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), AdvanceError> {
        if self.transition.is_some() {
            return Err(AdvanceError::AlreadyTransitioning);
        }
        if self.current >= data.phase_count() {
            return Err(AdvanceError::TerminalPhase { phase: self.current });
        }
        if !conditions_met {
            return Err(AdvanceError::ConditionsNotMet { phase: self.current });
        }
        self.begin_transition(data, events);
        Ok(())
    }

    fn begin_transition(&mut self, data: &GameData, events: &mut Vec<GameEvent>) {
        // Outgoing phase completes now, not when the animation ends.
        let record = &mut self.records[(self.current - 1) as usize];
        record.completed = true;
        let time = self.elapsed_secs;
        record.best_completion_secs = Some(match record.best_completion_secs {
            Some(best) => best.min(time),
            None => time,
        });

        let next = self.current + 1;
        self.highest_unlocked = self.highest_unlocked.max(next);
        events.push(GameEvent::PhaseUnlocked {
            phase: next,
            name: data.phase(next).name.clone(),
        });
        self.transition = Some(TransitionRun::new(data, self.current));
    }

    /// Drive time forward: accumulates phase time, runs any pending
    /// transition, and fires an eligible auto-advance. `advance_eligible`
    /// is the caller's [`can_advance`](Self::can_advance) result, passed
    /// in pre-evaluated so ticking never re-reads live game state while
    /// mutating; while a transition runs it is ignored, which keeps
    /// repeated eligibility an idempotent no-op.
    pub fn tick(
        &mut self,
        dt: f64,
        data: &GameData,
        advance_eligible: bool,
        now_ms: u64,
        events: &mut Vec<GameEvent>,
    ) {
        self.elapsed_secs += dt;
        self.records[(self.current - 1) as usize].time_in_phase_secs += dt;

        if let Some(run) = &mut self.transition {
            if run.tick(dt) {
                let to = run.to_phase;
                self.transition = None;
                self.enter(to, now_ms, events);
            }
            return;
        }

        if data.phase(self.current).auto_advance
            && advance_eligible
            && self.current < data.phase_count()
        {
            self.begin_transition(data, events);
        }
    }

    /// Abandon a running transition without committing the next phase.
    pub fn cancel_transition(&mut self) {
        self.transition = None;
    }

    /// Record a story choice against the current phase.
    pub fn record_story_choice(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.records[(self.current - 1) as usize]
            .story_choices
            .insert(key.into(), value.into());
    }

    /// A story choice looked up across every phase record.
    pub fn story_choice(&self, key: &str) -> Option<String> {
        self.records
            .iter()
            .find_map(|record| record.story_choices.get(key).cloned())
    }

    fn enter(&mut self, phase: u32, now_ms: u64, events: &mut Vec<GameEvent>) {
        let previous = self.current;
        let record = &mut self.records[(phase - 1) as usize];
        let first_time = !record.entered;
        record.entered = true;
        record.first_entered_ms.get_or_insert(now_ms);
        record.last_entered_ms = Some(now_ms);
        self.current = phase;
        self.elapsed_secs = 0.0;
        events.push(GameEvent::PhaseEntered {
            previous,
            phase,
            first_time,
        });
    }

    /// Back to phase 1. Completion flags, best times, and story choices
    /// survive; entry flags, entry timing, and per-run phase time reset.
    pub fn rebirth(&mut self, now_ms: u64, events: &mut Vec<GameEvent>) {
        self.transition = None;
        for record in &mut self.records {
            record.entered = false;
            record.first_entered_ms = None;
            record.last_entered_ms = None;
            record.time_in_phase_secs = 0.0;
        }
        self.current = 0;
        self.highest_unlocked = 1;
        self.enter(1, now_ms, events);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            current: self.current,
            highest_unlocked: self.highest_unlocked,
            elapsed_secs: self.elapsed_secs,
            records: self.records.clone(),
        }
    }

    /// Restore from a save. The record list is resized to the content's
    /// phase count; extra saved records are dropped.
    pub fn restore(&mut self, data: &GameData, snapshot: PhaseSnapshot) {
        let count = data.phase_count();
        self.current = snapshot.current.clamp(1, count);
        self.highest_unlocked = snapshot.highest_unlocked.clamp(1, count);
        self.elapsed_secs = snapshot.elapsed_secs.max(0.0);
        self.records = snapshot.records;
        self.records
            .resize_with(count as usize, PhaseRecord::default);
        self.transition = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub current: u32,
    pub highest_unlocked: u32,
    pub elapsed_secs: f64,
    pub records: Vec<PhaseRecord>,
}

// ===========================================================================
// Tests
// ===========================================================================
