//! End-to-end pipeline tests: source text in, timed step events out.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_approx_eq::assert_approx_eq;

use patter::engine::Engine;
use patter::lang::{self, analyzer::EmptyContext};
use patter::sink::MemorySink;
use patter::symbols::{DirSource, NullObserver, NullSource, ResolveStatus, SymbolValue};
use patter::{EngineConfig, SampleState, TransportSignal};

fn config() -> EngineConfig {
    EngineConfig {
        bpm: 600,
        tick_ms: 5,
        debounce_ms: 30,
        seed: 42,
        sample_dir: None,
    }
}

fn engine_with_sink(config: &EngineConfig) -> (Engine, std::sync::Arc<std::sync::Mutex<Vec<patter::StepEvent>>>) {
    let sink = MemorySink::new();
    let events = sink.handle();
    let engine = Engine::new(
        config,
        Arc::new(NullSource),
        Arc::new(NullObserver),
        Box::new(sink),
    )
    .unwrap();
    (engine, events)
}

#[test]
fn repeated_sound_cycles_with_its_period() {
    let (mut engine, events) = engine_with_sink(&config());
    let analysis = engine.update_block(0, "x = kick*4 snare");
    assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);

    engine.play();
    thread::sleep(Duration::from_millis(600));
    engine.pause();

    let events = events.lock().unwrap();
    assert!(events.len() >= 5, "got {} events", events.len());
    let sounds: Vec<&str> = events.iter().map(|e| e.step.sound.as_str()).collect();
    assert_eq!(&sounds[..5], &["kick", "kick", "kick", "kick", "snare"]);
}

#[test]
fn choice_statement_honours_even_odds() {
    // Drive the automaton directly; the scheduler adds nothing to the
    // distribution and only slows the sampling down.
    let analysis = lang::analyze_block(0, "kick | snare", &EmptyContext);
    assert!(analysis.errors.is_empty());
    let mut node = lang::build_automaton(&analysis, 7).unwrap();

    let trials = 10_000;
    let mut kicks = 0u32;
    for _ in 0..trials {
        if node.current().sound == "kick" {
            kicks += 1;
        }
        node.advance();
    }
    assert_approx_eq!(kicks as f64 / trials as f64, 0.5, 0.03);
}

#[test]
fn weighted_choice_skews_the_draw() {
    let analysis = lang::analyze_block(0, "kick |(9) snare", &EmptyContext);
    assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
    let mut node = lang::build_automaton(&analysis, 7).unwrap();

    let trials = 10_000;
    let mut snares = 0u32;
    for _ in 0..trials {
        if node.current().sound == "snare" {
            snares += 1;
        }
        node.advance();
    }
    // The weight attaches to the branch the operator introduces.
    assert_approx_eq!(snares as f64 / trials as f64, 0.9, 0.03);
}

#[test]
fn editing_one_block_leaves_the_other_playing() {
    let (mut engine, events) = engine_with_sink(&config());
    engine.update_block(0, "a = kick");
    engine.update_block(1, "b = snare");
    engine.play();
    thread::sleep(Duration::from_millis(200));

    // Break block 0 mid-performance; block 1 must keep emitting.
    let analysis = engine.update_block(0, "a = kick .");
    assert!(!analysis.errors.is_empty());
    events.lock().unwrap().clear();
    thread::sleep(Duration::from_millis(200));
    engine.pause();

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| e.variable == "b"));
    // The previous automaton for `a` keeps running despite the error.
    assert!(events.iter().any(|e| e.variable == "a"));
}

#[test]
fn emptied_statement_reports_and_keeps_the_pattern() {
    let (mut engine, events) = engine_with_sink(&config());
    engine.update_block(0, "x = kick");
    engine.play();
    thread::sleep(Duration::from_millis(100));

    // Deleting the right-hand side mid-performance is flagged, and the
    // previous pattern keeps playing.
    let analysis = engine.update_block(0, "x =");
    assert_eq!(analysis.errors.len(), 1);
    events.lock().unwrap().clear();
    thread::sleep(Duration::from_millis(200));
    engine.pause();
    assert!(events.lock().unwrap().iter().any(|e| e.variable == "x"));
}

#[test]
fn sound_resolution_flows_through_to_playback() {
    let dir = tempfile::tempdir().unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44100,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(dir.path().join("kick.wav"), spec).unwrap();
    writer.write_sample(0.5f32).unwrap();
    writer.finalize().unwrap();

    let sink = MemorySink::new();
    let events = sink.handle();
    let mut engine = Engine::new(
        &config(),
        Arc::new(DirSource::new(dir.path().to_path_buf())),
        Arc::new(NullObserver),
        Box::new(sink),
    )
    .unwrap();

    engine.update_block(0, "x = kick");
    thread::sleep(Duration::from_millis(300));
    let rec = engine.symbol("kick").unwrap();
    assert_eq!(rec.status, ResolveStatus::Available);
    assert!(matches!(rec.value, Some(SymbolValue::Sample(_))));

    engine.play();
    thread::sleep(Duration::from_millis(100));
    engine.pause();
    let events = events.lock().unwrap();
    assert!(!events.is_empty());
    assert!(matches!(events[0].sample, SampleState::Ready(_)));
}

#[test]
fn unresolvable_sound_still_occupies_its_slot() {
    let (mut engine, events) = engine_with_sink(&config());
    engine.update_block(0, "x = kick snare");
    thread::sleep(Duration::from_millis(150));
    assert_eq!(
        engine.symbol("kick").unwrap().status,
        ResolveStatus::Unavailable
    );

    engine.play();
    thread::sleep(Duration::from_millis(300));
    engine.pause();
    let events = events.lock().unwrap();
    assert!(events.len() >= 2);
    // Both steps fire on the grid; the missing sample only silences them.
    assert!(matches!(events[0].sample, SampleState::Missing));
    assert_eq!(events[0].step.sound, "kick");
    assert_eq!(events[1].step.sound, "snare");
}

#[test]
fn rewriting_a_block_cancels_its_pending_resolutions() {
    let mut cfg = config();
    cfg.debounce_ms = 150;
    let (mut engine, _events) = engine_with_sink(&cfg);
    engine.update_block(0, "x = kick");
    // Replace the sound before the debounce window closes.
    engine.update_block(0, "x = snare");
    thread::sleep(Duration::from_millis(400));
    assert!(engine.symbol("kick").is_none());
    assert!(engine.symbol("snare").is_some());
}

#[test]
fn bare_statement_plays_under_an_implicit_variable() {
    let (mut engine, events) = engine_with_sink(&config());
    let analysis = engine.update_block(3, "kick snare");
    assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
    engine.play();
    thread::sleep(Duration::from_millis(150));
    engine.pause();
    let events = events.lock().unwrap();
    assert!(!events.is_empty());
    assert_eq!(events[0].variable, "~3");
}

#[test]
fn transport_record_captures_a_take() {
    let (mut engine, _events) = engine_with_sink(&config());
    engine.update_block(0, "x = kick");
    engine.transport(TransportSignal::Record(true));
    engine.transport(TransportSignal::Play);
    thread::sleep(Duration::from_millis(200));
    engine.transport(TransportSignal::Pause);
    let take = engine.transport(TransportSignal::Record(false)).unwrap();
    assert!(!take.is_empty());
    assert!(take.iter().all(|e| e.step.sound == "kick"));
}

#[test]
fn effect_chain_rides_along_each_step() {
    let (mut engine, events) = engine_with_sink(&config());
    let analysis = engine.update_block(0, "x = kick.gain(amount: 0.5)");
    assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
    engine.play();
    thread::sleep(Duration::from_millis(100));
    engine.pause();
    let events = events.lock().unwrap();
    assert!(!events.is_empty());
    let effects = &events[0].step.effects;
    assert_eq!(effects.len(), 1);
    assert_eq!(effects[0].name, "gain");
    assert_eq!(effects[0].params.get("amount"), Some(&0.5));
}
