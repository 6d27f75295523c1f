//! Headless playthrough tests for the Pixelfall engine.
//!
//! Models a small three-phase idle game end to end: clicking into the
//! first producer, bonus stacking through upgrades, conditional unlocks,
//! auto-advancing phases, offline credit, and a rebirth loop. Every test
//! drives the engine purely through its public API with a synthetic
//! clock, the way a host shell would.

use pixelfall_core::bignum::BigNum;
use pixelfall_core::condition::Condition;
use pixelfall_core::config::GameConfig;
use pixelfall_core::engine::{Engine, EngineAction};
use pixelfall_core::event::{GameEvent, Topic};
use pixelfall_core::id::{ProducerId, ResourceId, UpgradeId};
use pixelfall_core::registry::{
    AchievementDef, EffectScaling, GameData, GameDataBuilder, PhaseDef, ProducerDef, ResourceDef,
    UpgradeDef, UpgradeEffect, UpgradeTier,
};
use std::cell::RefCell;
use std::rc::Rc;

// ===========================================================================
// Shared content: the "Falling Pixels" test game
// ===========================================================================

fn big(v: f64) -> BigNum {
    BigNum::from_f64(v)
}

struct Content {
    data: GameData,
    pixels: ResourceId,
    motes: ResourceId,
    collector: ProducerId,
    condenser: ProducerId,
    brighter_pixels: UpgradeId,
    overflow: UpgradeId,
    echo_memory: UpgradeId,
}

/// Three phases, two resources, two producers, three upgrades, two
/// achievements. Small enough to reason about exactly, big enough to
/// exercise every subsystem.
fn content() -> Content {
    let mut builder = GameDataBuilder::new();

    let pixels = builder.add_resource(ResourceDef {
        name: "pixels".to_string(),
        start_amount: BigNum::ZERO,
        persists_on_rebirth: false,
        unlock_conditions: Vec::new(),
        display_order: 0,
    });
    let motes = builder.add_resource(ResourceDef {
        name: "motes".to_string(),
        start_amount: BigNum::ZERO,
        persists_on_rebirth: true,
        unlock_conditions: vec![Condition::PhaseReached { phase: 2 }],
        display_order: 1,
    });

    let collector = builder.add_producer(ProducerDef {
        name: "collector".to_string(),
        output: pixels,
        cost_resource: pixels,
        base_cost: big(10.0),
        cost_growth: 1.15,
        base_rate: big(1.0),
        unlock_conditions: Vec::new(),
        display_order: 0,
    });
    let condenser = builder.add_producer(ProducerDef {
        name: "condenser".to_string(),
        output: motes,
        cost_resource: pixels,
        base_cost: big(500.0),
        cost_growth: 1.3,
        base_rate: big(0.1),
        unlock_conditions: vec![Condition::PhaseReached { phase: 2 }],
        display_order: 1,
    });

    let brighter_pixels = builder.add_upgrade(UpgradeDef {
        name: "brighter-pixels".to_string(),
        tier: UpgradeTier::Run,
        cost_resource: pixels,
        base_cost: big(50.0),
        cost_growth: 3.0,
        max_level: Some(3),
        effects: vec![UpgradeEffect::Multiplier {
            target: Some(pixels),
            value: 2.0,
            scaling: EffectScaling::Exponential,
        }],
        unlock_conditions: Vec::new(),
        display_order: 0,
    });
    let overflow = builder.add_upgrade(UpgradeDef {
        name: "overflow".to_string(),
        tier: UpgradeTier::Run,
        cost_resource: pixels,
        base_cost: big(100.0),
        cost_growth: 2.0,
        max_level: Some(1),
        effects: vec![UpgradeEffect::Additive {
            target: Some(pixels),
            value: 0.5,
            scaling: EffectScaling::Constant,
        }],
        unlock_conditions: vec![Condition::resource_at_least(pixels, big(75.0))],
        display_order: 1,
    });
    let echo_memory = builder.add_upgrade(UpgradeDef {
        name: "echo-memory".to_string(),
        tier: UpgradeTier::Eternal,
        cost_resource: motes,
        base_cost: big(5.0),
        cost_growth: 10.0,
        max_level: Some(1),
        effects: vec![UpgradeEffect::StartingBonus {
            resource: pixels,
            amount: big(100.0),
        }],
        unlock_conditions: Vec::new(),
        display_order: 2,
    });

    builder.add_phase(PhaseDef {
        name: "First Light".to_string(),
        transition_conditions: vec![Condition::resource_at_least(pixels, big(200.0))],
        auto_advance: true,
        transition_duration_secs: 2.0,
        transition_stages: vec![0.5, 1.5],
        boss: false,
        meditation: false,
        clicking_enabled: true,
    });
    builder.add_phase(PhaseDef {
        name: "Condensation".to_string(),
        transition_conditions: vec![Condition::resource_at_least(motes, big(10.0))],
        auto_advance: false,
        transition_duration_secs: 1.0,
        transition_stages: Vec::new(),
        boss: true,
        meditation: false,
        clicking_enabled: true,
    });
    builder.add_phase(PhaseDef {
        name: "Stillness".to_string(),
        transition_conditions: Vec::new(),
        auto_advance: false,
        transition_duration_secs: 1.0,
        transition_stages: Vec::new(),
        boss: false,
        meditation: true,
        clicking_enabled: false,
    });

    builder.add_achievement(AchievementDef {
        name: "Dim Glow".to_string(),
        tier: 1,
        conditions: vec![Condition::resource_at_least(pixels, big(100.0))],
        secret: false,
    });
    builder.add_achievement(AchievementDef {
        name: "Beyond the Veil".to_string(),
        tier: 2,
        conditions: vec![Condition::PhaseCompleted { phase: 1 }],
        secret: true,
    });

    Content {
        data: builder.build().expect("content validates"),
        pixels,
        motes,
        collector,
        condenser,
        brighter_pixels,
        overflow,
        echo_memory,
    }
}

fn engine(content: &Content) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    Engine::new(content.data.clone(), GameConfig::default(), 0).expect("config validates")
}

/// Drive the engine for `secs` of simulated time in 100ms steps.
fn run_for(engine: &mut Engine, start_ms: u64, secs: f64) -> u64 {
    let steps = (secs * 10.0) as u64;
    let mut now = start_ms;
    for _ in 0..steps {
        now += 100;
        engine.tick(now);
    }
    now
}

/// Collect every event on `topic` into a shared log.
fn record_events(engine: &mut Engine, topic: Topic) -> Rc<RefCell<Vec<GameEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    engine.bus_mut().subscribe(
        topic,
        0,
        Box::new(move |event, _| {
            sink.borrow_mut().push(event.clone());
            Ok(())
        }),
    );
    log
}

// ===========================================================================
// Clicking into the first producer
// ===========================================================================

#[test]
fn clicks_fund_the_first_collector() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    for _ in 0..10 {
        engine.click(content.pixels).unwrap();
    }
    assert_eq!(engine.resources().amount(content.pixels), big(10.0));

    engine.purchase_producer(content.collector).unwrap();
    assert_eq!(engine.resources().amount(content.pixels), BigNum::ZERO);
    assert_eq!(engine.producers().level(content.collector), 1);

    // One collector at 1/s for ten seconds of 100ms steps. The sum of
    // per-tick deltas carries float dust, so compare loosely.
    run_for(&mut engine, 0, 10.0);
    assert!((engine.resources().amount(content.pixels).to_f64() - 10.0).abs() < 1e-6);
    assert_eq!(engine.resources().rate(content.pixels), big(1.0));
}

#[test]
fn producer_costs_grow_geometrically() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(100.0),
    });
    engine.tick(100);

    engine.purchase_producer(content.collector).unwrap();
    let second = engine.producers().next_cost(&content.data, content.collector);
    assert_eq!(second, big(11.5));
    engine.purchase_producer(content.collector).unwrap();
    let third = engine.producers().next_cost(&content.data, content.collector);
    assert!((third.to_f64() - 10.0 * 1.15 * 1.15).abs() < 1e-9);
}

// ===========================================================================
// Upgrades and bonus stacking
// ===========================================================================

#[test]
fn upgrade_bonuses_stack_on_the_rate() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(1000.0),
    });
    engine.tick(100); // grant lands
    engine.tick(200); // unlock pass opens overflow
    for _ in 0..10 {
        engine.purchase_producer(content.collector).unwrap();
    }

    engine.purchase_upgrade(content.brighter_pixels, 300).unwrap();
    engine.purchase_upgrade(content.brighter_pixels, 300).unwrap();
    engine.purchase_upgrade(content.overflow, 300).unwrap();

    // 10 collectors at 1/s, times 2^2, times (1 + 0.5) = 60/s.
    engine.tick(1_200);
    assert_eq!(engine.resources().rate(content.pixels), big(60.0));
}

#[test]
fn upgrade_max_level_is_enforced() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(1_000_000.0),
    });
    engine.tick(100);

    for _ in 0..3 {
        engine.purchase_upgrade(content.brighter_pixels, 200).unwrap();
    }
    assert!(engine.purchase_upgrade(content.brighter_pixels, 200).is_err());
    assert_eq!(engine.upgrades().level(content.brighter_pixels), 3);
}

// ===========================================================================
// Conditional unlocks
// ===========================================================================

#[test]
fn locked_upgrade_opens_at_threshold() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    assert!(!engine.upgrades().is_unlocked(content.overflow));
    assert!(engine.purchase_upgrade(content.overflow, 100).is_err());

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(120.0),
    });
    engine.tick(100); // grant lands
    engine.tick(200); // unlock pass observes it

    assert!(engine.upgrades().is_unlocked(content.overflow));
    engine.purchase_upgrade(content.overflow, 300).unwrap();
}

// ===========================================================================
// Phase progression
// ===========================================================================

#[test]
fn first_phase_auto_advances_through_staged_transition() {
    let content = content();
    let mut engine = engine(&content);
    let entered = record_events(&mut engine, Topic::PhaseEntered);
    let unlocked = record_events(&mut engine, Topic::PhaseUnlocked);
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(250.0),
    });
    let now = run_for(&mut engine, 0, 0.5);
    assert!(engine.phases().is_transitioning());
    assert!(engine.phases().is_completed(1));

    // The 2s staged transition commits phase 2.
    run_for(&mut engine, now, 2.5);
    assert_eq!(engine.phases().current(), 2);

    let entered = entered.borrow();
    assert!(matches!(
        entered.as_slice(),
        [GameEvent::PhaseEntered {
            previous: 1,
            phase: 2,
            first_time: true,
        }]
    ));
    assert!(matches!(
        unlocked.borrow().as_slice(),
        [GameEvent::PhaseUnlocked { phase: 2, .. }]
    ));
}

#[test]
fn phase_two_gates_motes_and_the_condenser() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    assert!(!engine.resources().is_unlocked(content.motes));
    assert!(!engine.producers().is_unlocked(content.condenser));

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(1_000.0),
    });
    let now = run_for(&mut engine, 0, 4.0); // advance + transition
    assert_eq!(engine.phases().current(), 2);

    run_for(&mut engine, now, 0.2); // unlock pass
    assert!(engine.resources().is_unlocked(content.motes));
    assert!(engine.producers().is_unlocked(content.condenser));

    engine.purchase_producer(content.condenser).unwrap();
    assert_eq!(engine.producers().level(content.condenser), 1);
}

#[test]
fn meditation_phase_rejects_clicks() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(1_000.0),
    });
    let now = run_for(&mut engine, 0, 4.0);
    assert_eq!(engine.phases().current(), 2);

    // Manually push into the terminal meditation phase.
    engine.queue_action(EngineAction::GrantResource {
        resource: content.motes,
        amount: big(10.0),
    });
    let now = run_for(&mut engine, now, 0.2);
    engine.advance_phase().unwrap();
    run_for(&mut engine, now, 1.5);
    assert_eq!(engine.phases().current(), 3);

    assert!(engine.click(content.pixels).is_err());
}

// ===========================================================================
// Achievements
// ===========================================================================

#[test]
fn achievements_fire_once_with_tiers() {
    let content = content();
    let mut engine = engine(&content);
    let log = record_events(&mut engine, Topic::AchievementUnlocked);
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(150.0),
    });
    run_for(&mut engine, 0, 1.0);

    let events = log.borrow();
    assert!(matches!(
        events.as_slice(),
        [GameEvent::AchievementUnlocked { tier: 1, .. }]
    ));
    drop(events);

    // Ticking on does not re-fire it.
    run_for(&mut engine, 1_000, 2.0);
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(engine.achievements().unlocked_count(), 1);
}

// ===========================================================================
// Offline credit
// ===========================================================================

#[test]
fn offline_credit_is_discounted_and_capped() {
    let content = content();
    let mut config = GameConfig::default();
    config.max_offline_secs = 100.0;
    let mut engine = Engine::new(content.data.clone(), config, 0).unwrap();
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(10.0),
    });
    engine.tick(100);
    engine.purchase_producer(content.collector).unwrap();

    engine.on_hidden(1_000);
    // Away for 1000s at 1/s; capped to 100s, then halved.
    engine.on_visible(1_001_000);
    assert_eq!(engine.resources().amount(content.pixels), big(50.0));
}

// ===========================================================================
// Rebirth
// ===========================================================================

#[test]
fn rebirth_resets_the_run_but_keeps_the_eternal() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    // Reach phase 2, bank motes, buy the eternal upgrade.
    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(1_000.0),
    });
    let now = run_for(&mut engine, 0, 4.0);
    assert_eq!(engine.phases().current(), 2);
    engine.queue_action(EngineAction::GrantResource {
        resource: content.motes,
        amount: big(20.0),
    });
    let now = run_for(&mut engine, now, 0.2);
    engine.purchase_upgrade(content.echo_memory, now).unwrap();
    engine.purchase_producer(content.collector).unwrap();

    engine.rebirth(now + 1_000);

    // Run state resets; the starting bonus lands immediately.
    assert_eq!(engine.phases().current(), 1);
    assert_eq!(engine.producers().level(content.collector), 0);
    assert_eq!(engine.resources().amount(content.pixels), big(100.0));
    // Eternal state survives: the upgrade, the persistent resource, and
    // phase completion history.
    assert_eq!(engine.upgrades().level(content.echo_memory), 1);
    assert_eq!(engine.resources().amount(content.motes), big(15.0));
    assert!(engine.phases().is_completed(1));
    assert_eq!(engine.rebirth_count(), 1);
}

#[test]
fn secret_achievement_unlocks_from_phase_history_after_rebirth() {
    let content = content();
    let mut engine = engine(&content);
    engine.start(0);

    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(1_000.0),
    });
    let now = run_for(&mut engine, 0, 4.0);
    assert_eq!(engine.phases().current(), 2);

    engine.rebirth(now);
    run_for(&mut engine, now, 0.5);

    // PhaseCompleted(1) still holds after the reset.
    let veil = content
        .data
        .achievement_ids()
        .find(|id| content.data.achievement(*id).name == "Beyond the Veil")
        .unwrap();
    assert!(engine.achievements().is_unlocked(veil));
}
