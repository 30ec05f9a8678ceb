use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use vocabr::analytics::NullSink;
use vocabr::app::{App, StartKind};
use vocabr::catalog::{DifficultyTier, StaticCatalog, WordCatalog, WordItem};
use vocabr::clock::ManualClock;
use vocabr::config::Config;
use vocabr::session::lifecycle::{ReconciliationTrigger, TriggerOutcome};
use vocabr::store::backend::{MemoryBackend, StorageBackend};
use vocabr::store::json_store::JsonFileBackend;
use vocabr::store::schema::{FieldGroup, PersistedSnapshot};

const START_MS: i64 = 1_750_000_000_000;

fn catalog() -> Arc<dyn WordCatalog> {
    let words = (1..=20)
        .map(|id| WordItem {
            id,
            text: format!("word{id}"),
            category: "animals".into(),
            difficulty: DifficultyTier::Easy,
        })
        .chain((21..=40).map(|id| WordItem {
            id,
            text: format!("word{id}"),
            category: "colors".into(),
            difficulty: DifficultyTier::Medium,
        }))
        .collect();
    Arc::new(StaticCatalog::from_words(words))
}

fn config() -> Config {
    Config {
        batch_size: 8,
        default_category: "animals".into(),
        shuffle_seed: Some(42),
        ..Config::default()
    }
}

fn app_with(backend: Box<dyn StorageBackend>, clock: &ManualClock) -> App {
    App::new(
        config(),
        catalog(),
        backend,
        Arc::new(clock.clone()),
        Box::new(NullSink),
    )
}

fn answer_current(app: &mut App, clock: &ManualClock, correct: bool) -> u32 {
    clock.advance(2_000);
    let id = app.current_word().expect("batch has a current word").id;
    app.answer(id, correct).unwrap();
    id
}

fn read_snapshot(dir: &TempDir) -> PersistedSnapshot {
    let raw = fs::read_to_string(dir.path().join("session.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn file_backed_session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(START_MS);

    let mut first = app_with(
        Box::new(JsonFileBackend::with_base_dir(dir.path().to_path_buf()).unwrap()),
        &clock,
    );
    let right = answer_current(&mut first, &clock, true);
    let wrong = answer_current(&mut first, &clock, false);
    assert_eq!(first.shutdown(), TriggerOutcome::Flushed);

    let stored = read_snapshot(&dir);
    assert_eq!(stored.remembered, vec![right]);
    assert_eq!(stored.forgotten, vec![wrong]);
    assert_eq!(stored.cursor, 2);

    clock.advance(5 * 60 * 1000);
    let second = app_with(
        Box::new(JsonFileBackend::with_base_dir(dir.path().to_path_buf()).unwrap()),
        &clock,
    );
    assert_eq!(second.start_kind(), StartKind::Restored);
    assert_eq!(second.cursor(), 2);
    assert!(second.progress().is_remembered(right));
    assert!(second.progress().is_forgotten(wrong));
    assert_eq!(second.history().entry(wrong).times_seen, 1);
}

#[test]
fn corrupt_snapshot_file_starts_fresh_and_is_replaced() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("session.json"), "{\"schemaVersion\": 1, \"remem").unwrap();
    let clock = ManualClock::new(START_MS);

    let mut app = app_with(
        Box::new(JsonFileBackend::with_base_dir(dir.path().to_path_buf()).unwrap()),
        &clock,
    );
    assert_eq!(app.start_kind(), StartKind::Fresh);
    assert_eq!(app.session_number(), 1);
    assert_eq!(app.batch().len(), 8);

    answer_current(&mut app, &clock, true);
    app.shutdown();
    let stored = read_snapshot(&dir);
    assert_eq!(stored.completed_words, 1);
}

#[test]
fn saved_at_strictly_increases_across_writes() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(START_MS);
    let mut app = app_with(
        Box::new(JsonFileBackend::with_base_dir(dir.path().to_path_buf()).unwrap()),
        &clock,
    );

    let mut previous = 0;
    for _ in 0..12 {
        answer_current(&mut app, &clock, true);
        // Rewinding the wall clock must not rewind the snapshot.
        clock.advance(-5_000);
        app.handle_trigger(ReconciliationTrigger::Hidden);
        let saved = read_snapshot(&dir).last_saved_at_ms;
        assert!(saved > previous, "{saved} <= {previous}");
        previous = saved;
    }
}

#[test]
fn focused_tab_catches_up_with_newer_tab() {
    let shared = MemoryBackend::new();
    let clock = ManualClock::new(START_MS);
    let mut tab_a = app_with(Box::new(shared.handle()), &clock);
    let mut tab_b = app_with(Box::new(shared.handle()), &clock);

    // B writes first (T1), then A learns more and writes later (T2 > T1).
    answer_current(&mut tab_b, &clock, true);
    tab_b.handle_trigger(ReconciliationTrigger::Blur);
    let t1 = tab_b.snapshot().last_saved_at_ms;

    for _ in 0..4 {
        answer_current(&mut tab_a, &clock, true);
    }
    tab_a.handle_trigger(ReconciliationTrigger::Hidden);
    let t2 = tab_a.snapshot().last_saved_at_ms;
    assert!(t2 > t1);

    let outcome = tab_b.handle_trigger(ReconciliationTrigger::Focus);
    match outcome {
        TriggerOutcome::Reconciled(groups) => assert!(groups.contains(&FieldGroup::Progress)),
        other => panic!("expected reconciliation, got {other:?}"),
    }
    assert!(tab_b.progress().remembered().len() >= tab_a.progress().remembered().len());
    assert_eq!(tab_b.snapshot().last_saved_at_ms, t2);
}

#[test]
fn storage_change_from_other_writer_is_merged() {
    let shared = MemoryBackend::new();
    let clock = ManualClock::new(START_MS);
    let mut tab_a = app_with(Box::new(shared.handle()), &clock);
    let mut tab_b = app_with(Box::new(shared.handle()), &clock);
    tab_a.shutdown();

    tab_b.select_category("colors").unwrap();
    let outcome = tab_a.handle_trigger(ReconciliationTrigger::StorageChanged);
    assert!(matches!(outcome, TriggerOutcome::Reconciled(_)));
    assert_eq!(tab_a.active_category(), "colors");
    assert_eq!(tab_a.batch(), tab_b.batch());
}

#[test]
fn write_failures_never_lose_in_memory_progress() {
    let shared = MemoryBackend::new();
    let clock = ManualClock::new(START_MS);
    let mut app = app_with(Box::new(shared.handle()), &clock);

    shared.set_fail_writes(true);
    let id = answer_current(&mut app, &clock, true);
    assert_eq!(
        app.handle_trigger(ReconciliationTrigger::Hidden),
        TriggerOutcome::FlushFailed
    );
    assert!(app.progress().is_remembered(id));

    shared.set_fail_writes(false);
    clock.advance(1_000);
    assert_eq!(
        app.handle_trigger(ReconciliationTrigger::Tick),
        TriggerOutcome::Flushed
    );
    let stored: PersistedSnapshot = serde_json::from_str(&shared.raw().unwrap()).unwrap();
    assert_eq!(stored.remembered, vec![id]);
}

#[test]
fn category_of_twenty_is_exhausted_after_one_batch() {
    let shared = MemoryBackend::new();
    let clock = ManualClock::new(START_MS);
    let mut config = config();
    config.batch_size = 20;
    let mut app = App::new(
        config,
        catalog(),
        Box::new(shared.handle()),
        Arc::new(clock.clone()),
        Box::new(NullSink),
    );

    let info = app.session_info().unwrap().clone();
    assert_eq!(app.batch().len(), 20);
    assert_eq!(info.review_word_count, 0);

    let ids: Vec<u32> = app.batch().iter().map(|w| w.id).collect();
    for id in &ids[..19] {
        app.answer(*id, true).unwrap();
    }
    app.answer(ids[19], true).unwrap();
    assert_eq!(app.session_number(), 2);
    assert_eq!(app.exhaustion_level(), 1.0);
}

#[test]
fn reset_in_one_tab_reaches_the_other() {
    let shared = MemoryBackend::new();
    let clock = ManualClock::new(START_MS);
    let mut tab_a = app_with(Box::new(shared.handle()), &clock);
    let mut tab_b = app_with(Box::new(shared.handle()), &clock);

    for _ in 0..3 {
        answer_current(&mut tab_b, &clock, true);
    }
    tab_b.handle_trigger(ReconciliationTrigger::Blur);
    let before_reset = tab_b.snapshot().last_saved_at_ms;

    tab_a.handle_trigger(ReconciliationTrigger::Focus);
    assert_eq!(tab_a.completed_words(), 3);
    tab_a.start_new_session().unwrap();
    assert!(tab_a.snapshot().last_saved_at_ms > before_reset);

    let outcome = tab_b.handle_trigger(ReconciliationTrigger::Focus);
    match outcome {
        TriggerOutcome::Reconciled(groups) => assert!(groups.contains(&FieldGroup::Progress)),
        other => panic!("expected the reset to be merged, got {other:?}"),
    }
    assert_eq!(tab_b.completed_words(), 0);
    assert!(tab_b.progress().remembered().is_empty());
    assert!(tab_b.history().is_empty());
    assert_eq!(tab_b.session_number(), 1);

    tab_b.shutdown();
    let stored: PersistedSnapshot = serde_json::from_str(&shared.raw().unwrap()).unwrap();
    assert_eq!(stored.completed_words, 0);
    assert!(stored.remembered.is_empty());
}
