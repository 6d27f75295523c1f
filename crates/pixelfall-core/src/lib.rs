//! Pixelfall Core -- the simulation engine for incremental games.
//!
//! This crate provides resource accounting with arbitrary-magnitude
//! numbers, producers, upgrades with a stacking bonus pipeline, a phase
//! state machine with timed transitions, achievements, an event bus,
//! offline progress, and versioned save handling that every Pixelfall
//! game depends on.
//!
//! # Tick Pipeline
//!
//! Each call to [`engine::Engine::tick`] advances the simulation by one
//! clamped delta through the following steps:
//!
//! 1. **Produce** -- Producer output flows into resources through the
//!    bonus pipeline.
//! 2. **Unlock** -- Resources, producers, and upgrades whose conditions
//!    now hold become visible.
//! 3. **Phase** -- The phase state machine accumulates time, runs any
//!    pending transition, and fires eligible auto-advances.
//! 4. **Actions** -- Deferred work queued since the last tick drains,
//!    one batch per tick.
//! 5. **Achievements** -- Checked last so they observe the settled tick.
//!
//! # Evaluate-Then-Commit
//!
//! State never mutates while conditions are being read. Every step first
//! collects what should happen against a frozen [`condition::EvalContext`]
//! view, then commits; events produced by the commits publish through the
//! bus at the end of the step.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Main simulation engine and tick orchestrator.
//! - [`bignum::BigNum`] -- Mantissa/exponent number for idle-scale
//!   magnitudes.
//! - [`condition::Condition`] -- Composable unlock predicates with
//!   progress reporting.
//! - [`pipeline::ProductionPipeline`] -- Stacking multiplicative and
//!   additive bonuses over base rates.
//! - [`phase::PhaseManager`] -- Linear phase progression with timed,
//!   staged transitions.
//! - [`event::EventBus`] -- Priority-ordered subscriptions with deferred
//!   mutation during dispatch.
//! - [`save::SaveManager`] -- Sanitize-then-migrate persistence over a
//!   pluggable [`storage::SaveStore`].

pub mod achievement;
pub mod bignum;
pub mod condition;
pub mod config;
pub mod engine;
pub mod event;
pub mod game_loop;
pub mod id;
pub mod migration;
pub mod phase;
pub mod pipeline;
pub mod producer;
pub mod registry;
pub mod resource;
pub mod save;
pub mod storage;
pub mod upgrade;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
