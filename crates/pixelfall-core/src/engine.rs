//! Engine orchestration: one tick drives every manager in a fixed order.
//!
//! Per tick: production is applied to resources, then conditional
//! unlocks commit (resources, producers, upgrades), the phase machine
//! runs, the deferred-action queue drains, and achievements check last
//! so they observe the settled state. Every mutation's events are
//! published through the bus at the end of the step.
//!
//! All condition evaluation goes through [`EngineCtx`], a read-only view
//! constructed per query, so reads never interleave with writes: each
//! step first collects what should happen against the frozen view, then
//! commits.

use crate::achievement::AchievementManager;
use crate::bignum::BigNum;
use crate::condition::EvalContext;
use crate::config::{ConfigError, GameConfig};
use crate::event::{ChangeSource, EventBus, GameEvent, PauseReason};
use crate::game_loop::{GameLoop, LoopState};
use crate::id::{AchievementId, ProducerId, ResourceId, UpgradeId};
use crate::phase::{AdvanceError, PhaseManager};
use crate::pipeline::ProductionPipeline;
use crate::producer::{ProducerManager, PurchaseError};
use crate::registry::{GameData, UnlockTarget};
use crate::resource::ResourceManager;
use crate::save::{
    EternalState, RunState, SaveEnvelope, SaveMeta, SaveState, FORMAT_VERSION, SCHEMA_VERSION,
};
use crate::upgrade::{TierFilter, UpgradeError, UpgradeManager};
use std::collections::VecDeque;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Read-only view over live engine state for condition evaluation.
pub struct EngineCtx<'a> {
    resources: &'a ResourceManager,
    producers: &'a ProducerManager,
    upgrades: &'a UpgradeManager,
    phases: &'a PhaseManager,
    achievements: &'a AchievementManager,
    run_time_secs: f64,
}

impl EvalContext for EngineCtx<'_> {
    fn resource_amount(&self, resource: ResourceId) -> BigNum {
        self.resources.amount(resource)
    }

    fn current_phase(&self) -> u32 {
        self.phases.current()
    }

    fn phase_completed(&self, phase: u32) -> bool {
        self.phases.is_completed(phase)
    }

    fn run_time_secs(&self) -> f64 {
        self.run_time_secs
    }

    fn producer_count(&self, producer: ProducerId) -> u32 {
        self.producers.level(producer)
    }

    fn upgrade_level(&self, upgrade: UpgradeId) -> u32 {
        self.upgrades.level(upgrade)
    }

    fn has_achievement(&self, achievement: AchievementId) -> bool {
        self.achievements.is_unlocked(achievement)
    }

    fn story_choice(&self, key: &str) -> Option<String> {
        self.phases.story_choice(key)
    }
}

// ---------------------------------------------------------------------------
// Deferred actions
// ---------------------------------------------------------------------------

/// Work queued for the next tick instead of running re-entrantly. One
/// consequence may queue another; each tick drains only the batch that
/// existed when it started, keeping ordering deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    RecordStoryChoice { key: String, value: String },
    DiscoverSecret { name: String },
    GrantResource { resource: ResourceId, amount: BigNum },
}

// ---------------------------------------------------------------------------
// Errors / reports
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum ClickError {
    #[error("clicking is disabled in the current phase")]
    ClickingDisabled,
}

/// What one engine step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub delta_secs: f64,
    /// The autosave interval has elapsed; the host should persist and
    /// call [`Engine::confirm_saved`].
    pub autosave_due: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    data: GameData,
    config: GameConfig,
    bus: EventBus,
    pipeline: ProductionPipeline,
    resources: ResourceManager,
    producers: ProducerManager,
    upgrades: UpgradeManager,
    phases: PhaseManager,
    achievements: AchievementManager,
    game_loop: GameLoop,
    actions: VecDeque<EngineAction>,
    secrets: Vec<String>,
    run_time_secs: f64,
    total_play_secs: f64,
    rebirth_count: u32,
    meta: SaveMeta,
    autosave_elapsed_secs: f64,
}

impl Engine {
    /// Build a fresh engine and enter phase 1.
    pub fn new(data: GameData, config: GameConfig, now_ms: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut events = Vec::new();
        let resources = ResourceManager::new(&data);
        let producers = ProducerManager::new(&data);
        let upgrades = UpgradeManager::new(&data);
        let phases = PhaseManager::new(&data, now_ms, &mut events);
        let achievements = AchievementManager::new(&data);
        let game_loop = GameLoop::new(config.max_delta_secs);
        let meta = SaveMeta {
            version: SCHEMA_VERSION,
            save_id: "default".to_string(),
            game_version: config.game_version.clone(),
            created_ms: now_ms,
            updated_ms: now_ms,
        };
        let mut engine = Engine {
            data,
            config,
            bus: EventBus::new(),
            pipeline: ProductionPipeline::new(),
            resources,
            producers,
            upgrades,
            phases,
            achievements,
            game_loop,
            actions: VecDeque::new(),
            secrets: Vec::new(),
            run_time_secs: 0.0,
            total_play_secs: 0.0,
            rebirth_count: 0,
            meta,
            autosave_elapsed_secs: 0.0,
        };
        engine.publish_all(events);
        Ok(engine)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn data(&self) -> &GameData {
        &self.data
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn pipeline(&self) -> &ProductionPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut ProductionPipeline {
        &mut self.pipeline
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn producers(&self) -> &ProducerManager {
        &self.producers
    }

    pub fn upgrades(&self) -> &UpgradeManager {
        &self.upgrades
    }

    pub fn phases(&self) -> &PhaseManager {
        &self.phases
    }

    pub fn achievements(&self) -> &AchievementManager {
        &self.achievements
    }

    pub fn loop_state(&self) -> LoopState {
        self.game_loop.state()
    }

    pub fn run_time_secs(&self) -> f64 {
        self.run_time_secs
    }

    pub fn rebirth_count(&self) -> u32 {
        self.rebirth_count
    }

    pub fn secrets(&self) -> &[String] {
        &self.secrets
    }

    fn ctx(&self) -> EngineCtx<'_> {
        EngineCtx {
            resources: &self.resources,
            producers: &self.producers,
            upgrades: &self.upgrades,
            phases: &self.phases,
            achievements: &self.achievements,
            run_time_secs: self.run_time_secs,
        }
    }

    fn publish_all(&mut self, events: Vec<GameEvent>) {
        for event in events {
            self.bus.publish(event);
        }
    }

    // -----------------------------------------------------------------------
    // Loop control
    // -----------------------------------------------------------------------

    pub fn start(&mut self, now_ms: u64) {
        self.game_loop.start(now_ms);
    }

    pub fn stop(&mut self) {
        self.game_loop.stop();
    }

    pub fn pause(&mut self, now_ms: u64) {
        if self.game_loop.pause(now_ms) {
            self.bus.publish(GameEvent::GamePaused {
                reason: PauseReason::Manual,
                at_ms: now_ms,
            });
        }
    }

    pub fn resume(&mut self, now_ms: u64) {
        if let Some(pause_ms) = self.game_loop.resume(now_ms) {
            self.bus.publish(GameEvent::GameResumed {
                pause_ms,
                at_ms: now_ms,
            });
        }
    }

    /// Environment hidden: auto-pause.
    pub fn on_hidden(&mut self, now_ms: u64) {
        let was_running = self.game_loop.state() == LoopState::Running;
        self.game_loop.on_hidden(now_ms);
        if was_running {
            self.bus.publish(GameEvent::GamePaused {
                reason: PauseReason::Hidden,
                at_ms: now_ms,
            });
        }
    }

    /// Environment visible again: auto-resume and grant away-time
    /// production at the configured efficiency.
    pub fn on_visible(&mut self, now_ms: u64) {
        let Some(hidden_ms) = self.game_loop.on_visible(now_ms) else {
            return;
        };
        let credited_secs =
            (hidden_ms as f64 / 1000.0).min(self.config.max_offline_secs);
        let factor = BigNum::from_f64(credited_secs * self.config.offline_efficiency);

        let plan = {
            let ctx = self.ctx();
            self.producers.compute_rates(&self.data, &self.pipeline, &ctx)
        };
        let mut events = Vec::new();
        for (resource, rate) in &plan.by_resource {
            self.resources
                .add(*resource, *rate * factor, ChangeSource::Offline, &mut events);
        }
        for (producer, rate) in &plan.by_producer {
            self.producers.record_production(*producer, *rate * factor);
        }
        events.push(GameEvent::GameResumed {
            pause_ms: hidden_ms,
            at_ms: now_ms,
        });
        self.publish_all(events);
    }

    // -----------------------------------------------------------------------
    // The tick
    // -----------------------------------------------------------------------

    /// Advance the simulation if the loop is running. Host calls this on
    /// its frame/interval cadence with a monotonic clock.
    pub fn tick(&mut self, now_ms: u64) -> Option<TickReport> {
        let tick = self.game_loop.tick(now_ms)?;
        self.step(tick.delta_secs, now_ms);
        self.autosave_elapsed_secs += tick.delta_secs;
        Some(TickReport {
            tick: tick.tick,
            delta_secs: tick.delta_secs,
            autosave_due: self.autosave_elapsed_secs >= self.config.autosave_interval_secs,
        })
    }

    fn step(&mut self, dt: f64, now_ms: u64) {
        self.run_time_secs += dt;
        self.total_play_secs += dt;
        let mut events = Vec::new();

        // 1. Production into resources.
        let plan = {
            let ctx = self.ctx();
            self.producers.compute_rates(&self.data, &self.pipeline, &ctx)
        };
        let dt_num = BigNum::from_f64(dt);
        for (resource, rate) in &plan.by_resource {
            self.resources.set_rate(*resource, *rate);
            self.resources
                .add(*resource, *rate * dt_num, ChangeSource::Production, &mut events);
        }
        for (producer, rate) in &plan.by_producer {
            self.producers.record_production(*producer, *rate * dt_num);
        }

        // 2. Conditional unlocks, two-phase.
        let (resource_unlocks, producer_unlocks, upgrade_unlocks) = {
            let ctx = self.ctx();
            (
                self.resources.pending_unlocks(&self.data, &ctx),
                self.producers.pending_unlocks(&self.data, &ctx),
                self.upgrades.pending_unlocks(&self.data, &ctx),
            )
        };
        for id in resource_unlocks {
            self.resources.unlock(id);
        }
        for id in producer_unlocks {
            self.producers.unlock(id);
        }
        for id in upgrade_unlocks {
            self.upgrades.unlock(id);
        }

        // 3. Phase machine.
        let advance_eligible = {
            let ctx = self.ctx();
            self.phases.can_advance(&self.data, &ctx)
        };
        self.phases
            .tick(dt, &self.data, advance_eligible, now_ms, &mut events);

        // 4. Deferred actions queued up to this tick.
        let batch = self.actions.len();
        for _ in 0..batch {
            if let Some(action) = self.actions.pop_front() {
                self.apply_action(action, &mut events);
            }
        }

        // 5. Achievements observe the settled tick.
        let pending = {
            let ctx = self.ctx();
            self.achievements.pending_unlocks(&self.data, &ctx)
        };
        for id in pending {
            self.achievements.unlock(id, &self.data, now_ms, &mut events);
        }

        self.publish_all(events);
    }

    fn apply_action(&mut self, action: EngineAction, events: &mut Vec<GameEvent>) {
        match action {
            EngineAction::RecordStoryChoice { key, value } => {
                self.phases.record_story_choice(key, value);
            }
            EngineAction::DiscoverSecret { name } => {
                if !name.is_empty() && !self.secrets.contains(&name) {
                    self.secrets.push(name);
                }
            }
            EngineAction::GrantResource { resource, amount } => {
                self.resources
                    .add(resource, amount, ChangeSource::Grant, events);
            }
        }
    }

    /// Queue work for the next tick instead of mutating mid-iteration.
    pub fn queue_action(&mut self, action: EngineAction) {
        self.actions.push_back(action);
    }

    // -----------------------------------------------------------------------
    // Player actions
    // -----------------------------------------------------------------------

    /// Manual click: grants click power to `resource` if the current
    /// phase allows clicking.
    pub fn click(&mut self, resource: ResourceId) -> Result<BigNum, ClickError> {
        if !self.data.phase(self.phases.current()).clicking_enabled {
            return Err(ClickError::ClickingDisabled);
        }
        let power = self
            .upgrades
            .click_power(&self.data, BigNum::from_f64(self.config.base_click_power));
        let mut events = Vec::new();
        self.resources
            .add(resource, power, ChangeSource::Click, &mut events);
        self.publish_all(events);
        Ok(power)
    }

    pub fn purchase_producer(&mut self, id: ProducerId) -> Result<u32, PurchaseError> {
        let mut events = Vec::new();
        let level = self
            .producers
            .purchase(id, &self.data, &mut self.resources, &mut events)?;
        self.publish_all(events);
        Ok(level)
    }

    pub fn purchase_upgrade(&mut self, id: UpgradeId, now_ms: u64) -> Result<u32, UpgradeError> {
        let mut events = Vec::new();
        let level =
            self.upgrades
                .purchase(id, &self.data, &mut self.resources, now_ms, &mut events)?;
        self.apply_upgrade_effects();
        self.publish_all(events);
        Ok(level)
    }

    /// Manual phase advance.
    pub fn advance_phase(&mut self) -> Result<(), AdvanceError> {
        let conditions_met = {
            let ctx = self.ctx();
            self.phases.conditions_met(&self.data, &ctx)
        };
        let mut events = Vec::new();
        let result = self.phases.advance(&self.data, conditions_met, &mut events);
        self.publish_all(events);
        result
    }

    /// Progress toward the current phase's transition, for UI bars.
    pub fn phase_progress(&self) -> f64 {
        let ctx = self.ctx();
        self.phases.transition_progress(&self.data, &ctx)
    }

    /// Re-register upgrade bonuses and apply unlock effects.
    fn apply_upgrade_effects(&mut self) {
        self.upgrades.sync_pipeline(&self.data, &mut self.pipeline);
        for target in self.upgrades.unlock_targets(&self.data) {
            match target {
                UnlockTarget::Resource(id) => self.resources.unlock(id),
                UnlockTarget::Producer(id) => self.producers.unlock(id),
                UnlockTarget::Upgrade(id) => self.upgrades.unlock(id),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rebirth
    // -----------------------------------------------------------------------

    /// Reset run-scoped state, keep eternal state, grant starting
    /// bonuses from persisting upgrades.
    pub fn rebirth(&mut self, now_ms: u64) {
        let mut events = Vec::new();
        self.resources.rebirth(&self.data);
        self.producers.rebirth(&self.data);
        self.upgrades.rebirth(&self.data);
        self.phases.rebirth(now_ms, &mut events);
        self.actions.clear();
        self.run_time_secs = 0.0;
        self.rebirth_count += 1;

        self.apply_upgrade_effects();
        for (resource, amount) in self.upgrades.starting_bonuses(&self.data) {
            self.resources
                .add(resource, amount, ChangeSource::Grant, &mut events);
        }
        events.push(GameEvent::RebirthCompleted {
            rebirth_count: self.rebirth_count,
        });
        self.publish_all(events);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Serialize live state into a save envelope.
    pub fn snapshot(&self, now_ms: u64) -> SaveEnvelope {
        SaveEnvelope {
            state: SaveState {
                run: RunState {
                    resources: self.resources.snapshot(&self.data),
                    producers: self.producers.snapshot(&self.data),
                    upgrades: self.upgrades.snapshot(&self.data, TierFilter::RunOnly),
                    phase: Some(self.phases.snapshot()),
                    run_time_secs: self.run_time_secs,
                },
                eternal: EternalState {
                    upgrades: self.upgrades.snapshot(&self.data, TierFilter::EternalOnly),
                    achievements: self.achievements.snapshot(&self.data),
                    secrets: self.secrets.clone(),
                    rebirth_count: self.rebirth_count,
                    total_play_secs: self.total_play_secs,
                },
                meta: SaveMeta {
                    updated_ms: now_ms,
                    ..self.meta.clone()
                },
            },
            format_version: FORMAT_VERSION,
            last_modified: now_ms,
        }
    }

    /// Replace live state from a (sanitized, migrated) envelope.
    pub fn restore(&mut self, envelope: &SaveEnvelope) {
        let state = &envelope.state;
        self.resources.restore(&self.data, &state.run.resources);
        self.producers.restore(&self.data, &state.run.producers);
        self.upgrades.restore(&self.data, &state.run.upgrades);
        self.upgrades.restore(&self.data, &state.eternal.upgrades);
        self.achievements
            .restore(&self.data, &state.eternal.achievements);
        if let Some(phase) = state.run.phase.clone() {
            self.phases.restore(&self.data, phase);
        }
        self.secrets = state.eternal.secrets.clone();
        self.run_time_secs = state.run.run_time_secs;
        self.total_play_secs = state.eternal.total_play_secs;
        self.rebirth_count = state.eternal.rebirth_count;
        self.meta = state.meta.clone();
        self.actions.clear();
        self.apply_upgrade_effects();
    }

    /// Acknowledge a completed save: publishes the event and resets the
    /// autosave clock.
    pub fn confirm_saved(&mut self, automatic: bool) {
        self.autosave_elapsed_secs = 0.0;
        self.bus.publish(GameEvent::SaveCompleted { automatic });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bignum::BigNum;
    use crate::condition::Condition;
    use crate::registry::{
        AchievementDef, GameDataBuilder, PhaseDef, ProducerDef, ResourceDef, UpgradeDef,
        UpgradeEffect, UpgradeTier,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    fn big(v: f64) -> BigNum {
        BigNum::from_f64(v)
    }

    struct Fixture {
        engine: Engine,
        pixels: ResourceId,
        drip: ProducerId,
    }

    fn fixture() -> Fixture {
        let mut builder = GameDataBuilder::new();
        let pixels = builder.add_resource(ResourceDef {
            name: "pixels".to_string(),
            start_amount: BigNum::ZERO,
            persists_on_rebirth: false,
            unlock_conditions: Vec::new(),
            display_order: 0,
        });
        let drip = builder.add_producer(ProducerDef {
            name: "drip".to_string(),
            output: pixels,
            cost_resource: pixels,
            base_cost: big(10.0),
            cost_growth: 1.5,
            base_rate: big(1.0),
            unlock_conditions: Vec::new(),
            display_order: 0,
        });
        builder.add_phase(PhaseDef {
            name: "Spark".to_string(),
            transition_conditions: vec![Condition::resource_at_least(pixels, big(100.0))],
            auto_advance: false,
            transition_duration_secs: 1.0,
            transition_stages: Vec::new(),
            boss: false,
            meditation: false,
            clicking_enabled: true,
        });
        builder.add_phase(PhaseDef {
            name: "Glow".to_string(),
            transition_conditions: Vec::new(),
            auto_advance: false,
            transition_duration_secs: 1.0,
            transition_stages: Vec::new(),
            boss: false,
            meditation: true,
            clicking_enabled: false,
        });
        builder.add_achievement(AchievementDef {
            name: "First Hundred".to_string(),
            tier: 1,
            conditions: vec![Condition::resource_at_least(pixels, big(100.0))],
            secret: false,
        });
        let data = builder.build().unwrap();
        let engine = Engine::new(data, GameConfig::default(), 0).unwrap();
        Fixture {
            engine,
            pixels,
            drip,
        }
    }

    fn grant(engine: &mut Engine, resource: ResourceId, amount: BigNum) {
        engine.queue_action(EngineAction::GrantResource { resource, amount });
    }

    // -----------------------------------------------------------------------
    // Test 1: Ticks apply producer output scaled by the delta
    // -----------------------------------------------------------------------
    #[test]
    fn tick_applies_production() {
        let mut f = fixture();
        grant(&mut f.engine, f.pixels, big(10.0));
        f.engine.start(0);
        f.engine.tick(100).unwrap(); // drains the grant
        f.engine.purchase_producer(f.drip).unwrap();
        assert_eq!(f.engine.resources().amount(f.pixels), BigNum::ZERO);

        f.engine.tick(600).unwrap(); // 0.5s at 1/s
        assert_eq!(f.engine.resources().amount(f.pixels), big(0.5));
        assert_eq!(f.engine.resources().rate(f.pixels), big(1.0));
        assert_eq!(f.engine.producers().lifetime_produced(f.drip), big(0.5));
    }

    // -----------------------------------------------------------------------
    // Test 2: Clicks respect the phase's clicking flag
    // -----------------------------------------------------------------------
    #[test]
    fn click_respects_phase_flag() {
        let mut f = fixture();
        let power = f.engine.click(f.pixels).unwrap();
        assert_eq!(power, big(1.0));
        assert_eq!(f.engine.resources().amount(f.pixels), big(1.0));
    }

    // -----------------------------------------------------------------------
    // Test 3: Achievements unlock at end of tick and publish events
    // -----------------------------------------------------------------------
    #[test]
    fn achievements_settle_last() {
        let mut f = fixture();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            f.engine.bus_mut().subscribe(
                crate::event::Topic::AchievementUnlocked,
                0,
                Box::new(move |event, _| {
                    if let GameEvent::AchievementUnlocked { name, .. } = event {
                        seen.borrow_mut().push(name.clone());
                    }
                    Ok(())
                }),
            );
        }
        grant(&mut f.engine, f.pixels, big(150.0));
        f.engine.start(0);
        f.engine.tick(100).unwrap();
        assert_eq!(*seen.borrow(), vec!["First Hundred".to_string()]);
    }

    // -----------------------------------------------------------------------
    // Test 4: Manual phase advance, then commit over the next ticks
    // -----------------------------------------------------------------------
    #[test]
    fn phase_advance_flow() {
        let mut f = fixture();
        grant(&mut f.engine, f.pixels, big(100.0));
        f.engine.start(0);
        f.engine.tick(100).unwrap();

        assert_eq!(f.engine.phase_progress(), 1.0);
        f.engine.advance_phase().unwrap();
        assert!(f.engine.phases().is_transitioning());

        f.engine.tick(1_200).unwrap(); // > 1s transition
        assert_eq!(f.engine.phases().current(), 2);
        // Glow disables clicking.
        assert_eq!(
            f.engine.click(f.pixels).unwrap_err(),
            ClickError::ClickingDisabled
        );
    }

    // -----------------------------------------------------------------------
    // Test 5: Rebirth keeps eternal upgrades and grants starting bonuses
    // -----------------------------------------------------------------------
    #[test]
    fn rebirth_round_trip() {
        let mut builder = GameDataBuilder::new();
        let pixels = builder.add_resource(ResourceDef {
            name: "pixels".to_string(),
            start_amount: BigNum::ZERO,
            persists_on_rebirth: false,
            unlock_conditions: Vec::new(),
            display_order: 0,
        });
        let head_start = builder.add_upgrade(UpgradeDef {
            name: "head-start".to_string(),
            tier: UpgradeTier::Eternal,
            cost_resource: pixels,
            base_cost: big(5.0),
            cost_growth: 2.0,
            max_level: Some(1),
            effects: vec![UpgradeEffect::StartingBonus {
                resource: pixels,
                amount: big(25.0),
            }],
            unlock_conditions: Vec::new(),
            display_order: 0,
        });
        builder.add_phase(PhaseDef {
            name: "Spark".to_string(),
            transition_conditions: Vec::new(),
            auto_advance: false,
            transition_duration_secs: 1.0,
            transition_stages: Vec::new(),
            boss: false,
            meditation: false,
            clicking_enabled: true,
        });
        let data = builder.build().unwrap();
        let mut engine = Engine::new(data, GameConfig::default(), 0).unwrap();

        engine.queue_action(EngineAction::GrantResource {
            resource: pixels,
            amount: big(50.0),
        });
        engine.start(0);
        engine.tick(100).unwrap();
        engine.purchase_upgrade(head_start, 100).unwrap();

        engine.rebirth(1_000);
        assert_eq!(engine.rebirth_count(), 1);
        assert_eq!(engine.upgrades().level(head_start), 1);
        assert_eq!(engine.resources().amount(pixels), big(25.0));
        assert_eq!(engine.phases().current(), 1);
        assert_eq!(engine.run_time_secs(), 0.0);
    }

    // -----------------------------------------------------------------------
    // Test 6: Snapshot/restore round trip preserves live state
    // -----------------------------------------------------------------------
    #[test]
    fn snapshot_restore_round_trip() {
        let mut f = fixture();
        grant(&mut f.engine, f.pixels, big(30.0));
        f.engine.start(0);
        f.engine.tick(100).unwrap();
        f.engine.purchase_producer(f.drip).unwrap();

        let envelope = f.engine.snapshot(5_000);
        assert_eq!(envelope.last_modified, 5_000);

        let mut g = fixture();
        g.engine.restore(&envelope);
        assert_eq!(
            g.engine.resources().amount(f.pixels),
            f.engine.resources().amount(f.pixels)
        );
        assert_eq!(g.engine.producers().level(f.drip), 1);
        assert_eq!(g.engine.run_time_secs(), f.engine.run_time_secs());
    }

    // -----------------------------------------------------------------------
    // Test 7: Autosave interval reports due, confirm resets it
    // -----------------------------------------------------------------------
    #[test]
    fn autosave_due() {
        let mut f = fixture();
        f.engine.start(0);
        // Default interval is 30s; max delta 1s per tick.
        let mut due = false;
        for i in 1..=31_000 / 500 {
            if let Some(report) = f.engine.tick(i * 500) {
                due = report.autosave_due;
            }
        }
        assert!(due);

        f.engine.confirm_saved(true);
        let report = f.engine.tick(40_000).unwrap();
        assert!(!report.autosave_due);
    }

    // -----------------------------------------------------------------------
    // Test 8: Offline progress credits capped, discounted away time
    // -----------------------------------------------------------------------
    #[test]
    fn offline_progress() {
        let mut f = fixture();
        grant(&mut f.engine, f.pixels, big(10.0));
        f.engine.start(0);
        f.engine.tick(100).unwrap();
        f.engine.purchase_producer(f.drip).unwrap();

        f.engine.on_hidden(1_000);
        // Away 100s at rate 1/s, efficiency 0.5 → 50 pixels.
        f.engine.on_visible(101_000);
        assert_eq!(f.engine.resources().amount(f.pixels), big(50.0));
        assert_eq!(f.engine.loop_state(), LoopState::Running);
    }

    // -----------------------------------------------------------------------
    // Test 9: Deferred actions drain one batch per tick
    // -----------------------------------------------------------------------
    #[test]
    fn deferred_actions_batched() {
        let mut f = fixture();
        f.engine.queue_action(EngineAction::DiscoverSecret {
            name: "echo".to_string(),
        });
        f.engine.queue_action(EngineAction::DiscoverSecret {
            name: "echo".to_string(),
        });
        f.engine.queue_action(EngineAction::RecordStoryChoice {
            key: "mirror".to_string(),
            value: "keep".to_string(),
        });
        f.engine.start(0);
        f.engine.tick(100).unwrap();

        assert_eq!(f.engine.secrets(), ["echo".to_string()]);
        assert_eq!(
            f.engine.phases().story_choice("mirror"),
            Some("keep".to_string())
        );
    }
}
