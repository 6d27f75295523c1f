//! Persistence integration tests: engine snapshots through the save
//! manager and back, across corruption, schema migration, transfer
//! strings, and the emergency backup left behind by a hard reset.

use pixelfall_core::bignum::BigNum;
use pixelfall_core::condition::Condition;
use pixelfall_core::config::GameConfig;
use pixelfall_core::engine::{Engine, EngineAction};
use pixelfall_core::id::{ProducerId, ResourceId};
use pixelfall_core::migration::MigrationRegistry;
use pixelfall_core::registry::{GameData, GameDataBuilder, PhaseDef, ProducerDef, ResourceDef};
use pixelfall_core::save::{SaveManager, EMERGENCY_BACKUP_WINDOW_MS, SCHEMA_VERSION};
use pixelfall_core::storage::{MemoryStore, SaveStore};
use serde_json::json;

fn big(v: f64) -> BigNum {
    BigNum::from_f64(v)
}

struct Content {
    data: GameData,
    pixels: ResourceId,
    collector: ProducerId,
}

fn content() -> Content {
    let mut builder = GameDataBuilder::new();
    let pixels = builder.add_resource(ResourceDef {
        name: "pixels".to_string(),
        start_amount: BigNum::ZERO,
        persists_on_rebirth: false,
        unlock_conditions: Vec::new(),
        display_order: 0,
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
    builder.add_phase(PhaseDef {
        name: "First Light".to_string(),
        transition_conditions: vec![Condition::resource_at_least(pixels, big(200.0))],
        auto_advance: false,
        transition_duration_secs: 1.0,
        transition_stages: Vec::new(),
        boss: false,
        meditation: false,
        clicking_enabled: true,
    });
    Content {
        data: builder.build().unwrap(),
        pixels,
        collector,
    }
}

fn manager() -> SaveManager<MemoryStore> {
    SaveManager::new(
        MemoryStore::new(),
        MigrationRegistry::new(SCHEMA_VERSION),
        "pixelfall",
    )
}

fn played_engine(content: &Content) -> Engine {
    let mut engine = Engine::new(content.data.clone(), GameConfig::default(), 0).unwrap();
    engine.start(0);
    engine.queue_action(EngineAction::GrantResource {
        resource: content.pixels,
        amount: big(100.0),
    });
    engine.tick(100);
    engine.purchase_producer(content.collector).unwrap();
    engine
}

// ===========================================================================
// Round trips
// ===========================================================================

#[test]
fn save_and_load_round_trip_through_storage() {
    let content = content();
    let engine = played_engine(&content);
    let mut manager = manager();

    manager.save(&engine.snapshot(10_000)).unwrap();
    let loaded = manager.load(1).unwrap().expect("a save exists");

    let mut restored = Engine::new(content.data.clone(), GameConfig::default(), 0).unwrap();
    restored.restore(&loaded);
    assert_eq!(
        restored.resources().amount(content.pixels),
        engine.resources().amount(content.pixels)
    );
    assert_eq!(restored.producers().level(content.collector), 1);
}

#[test]
fn second_save_keeps_the_previous_as_backup() {
    let content = content();
    let engine = played_engine(&content);
    let mut manager = manager();

    manager.save(&engine.snapshot(1_000)).unwrap();
    manager.save(&engine.snapshot(2_000)).unwrap();

    let backup = manager.store().get("pixelfall:save:backup").unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&backup).unwrap();
    assert_eq!(value["last_modified"], json!(1_000));
}

// ===========================================================================
// Corruption fallbacks
// ===========================================================================

#[test]
fn corrupt_main_save_falls_back_to_backup() {
    let content = content();
    let engine = played_engine(&content);
    let mut manager = manager();

    manager.save(&engine.snapshot(1_000)).unwrap();
    manager.save(&engine.snapshot(2_000)).unwrap();
    manager
        .store_mut()
        .set("pixelfall:save", "{truncated blob")
        .unwrap();

    let loaded = manager.load(1).unwrap().expect("backup exists");
    assert_eq!(loaded.last_modified, 1_000);
}

#[test]
fn corrupt_main_and_backup_yield_a_fresh_start() {
    let mut manager = manager();
    manager.store_mut().set("pixelfall:save", "...").unwrap();
    manager.store_mut().set("pixelfall:save:backup", "...").unwrap();
    assert!(manager.load(1).unwrap().is_none());
}

#[test]
fn tampered_fields_are_repaired_on_load() {
    let content = content();
    let engine = played_engine(&content);
    let mut manager = manager();

    let mut value = serde_json::to_value(engine.snapshot(1_000)).unwrap();
    value["state"]["run"]["resources"]["pixels"]["amount"] = json!("NaN pixels");
    value["state"]["run"]["run_time_secs"] = json!(-50.0);
    manager
        .store_mut()
        .set("pixelfall:save", &value.to_string())
        .unwrap();

    let loaded = manager.load(1).unwrap().unwrap();
    let mut restored = Engine::new(content.data.clone(), GameConfig::default(), 0).unwrap();
    restored.restore(&loaded);
    assert_eq!(restored.resources().amount(content.pixels), BigNum::ZERO);
    assert_eq!(restored.run_time_secs(), 0.0);
}

// ===========================================================================
// Migration
// ===========================================================================

#[test]
fn old_schema_versions_migrate_on_load() {
    let content = content();
    let engine = played_engine(&content);

    let mut migrations = MigrationRegistry::new(2);
    migrations
        .register(
            2,
            Box::new(|data| {
                // v2 renamed the run timer.
                if let Some(secs) = data["state"]["run"]
                    .as_object_mut()
                    .and_then(|run| run.remove("elapsed"))
                {
                    data["state"]["run"]["run_time_secs"] = secs;
                }
                Ok(())
            }),
        )
        .unwrap();
    let mut manager = SaveManager::new(MemoryStore::new(), migrations, "pixelfall");

    let mut value = serde_json::to_value(engine.snapshot(1_000)).unwrap();
    let run = value["state"]["run"].as_object_mut().unwrap();
    let secs = run.remove("run_time_secs").unwrap();
    run.insert("elapsed".to_string(), secs);
    value["state"]["meta"]["version"] = json!(1);
    manager
        .store_mut()
        .set("pixelfall:save", &value.to_string())
        .unwrap();

    let loaded = manager.load(1).unwrap().unwrap();
    assert_eq!(loaded.state.meta.version, 2);
    assert!(loaded.state.run.run_time_secs > 0.0);
}

// ===========================================================================
// Transfer strings
// ===========================================================================

#[test]
fn export_import_moves_a_save_between_stores() {
    let content = content();
    let engine = played_engine(&content);

    let mut source = manager();
    source.save(&engine.snapshot(1_000)).unwrap();
    let transfer = source.export().unwrap().expect("something to export");

    let mut dest = manager();
    let imported = dest.import(&transfer, 1).unwrap();
    assert_eq!(imported.last_modified, 1_000);
    assert!(dest.load(1).unwrap().is_some());
}

#[test]
fn garbage_transfer_strings_leave_the_store_untouched() {
    let content = content();
    let engine = played_engine(&content);
    let mut manager = manager();
    manager.save(&engine.snapshot(1_000)).unwrap();

    assert!(manager.import("!!! not base64 !!!", 1).is_err());
    let kept = manager.load(1).unwrap().unwrap();
    assert_eq!(kept.last_modified, 1_000);
}

// ===========================================================================
// Hard reset and emergency backup
// ===========================================================================

#[test]
fn hard_reset_leaves_a_recoverable_emergency_backup() {
    let content = content();
    let engine = played_engine(&content);
    let mut manager = manager();

    manager.save(&engine.snapshot(1_000)).unwrap();
    manager.hard_reset(5_000).unwrap();

    assert!(manager.load(1).unwrap().is_none());
    assert!(manager.has_emergency_backup(6_000).unwrap());

    let recovered = manager.recover_emergency(6_000, 1).unwrap();
    assert_eq!(recovered.last_modified, 1_000);
}

#[test]
fn emergency_backup_expires_after_its_window() {
    let content = content();
    let engine = played_engine(&content);
    let mut manager = manager();

    manager.save(&engine.snapshot(1_000)).unwrap();
    manager.hard_reset(5_000).unwrap();

    let later = 5_000 + EMERGENCY_BACKUP_WINDOW_MS + 1;
    assert!(!manager.has_emergency_backup(later).unwrap());
    assert!(manager.recover_emergency(later, 1).is_err());
}
