//! Audio manager integration tests
//!
//! Drive the manager through its public API over the software backend,
//! with simulated time unless a test exercises the background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use rstest::rstest;
use serial_test::serial;
use soundmgr::audio::{AudioError, AudioManager, ParamKind, Source};
use soundmgr::config::AudioConfig;
use soundmgr::logging::LogLevel;
use soundmgr::sound::backend::{SoftBackend, SourceState};
use soundmgr::sound::AudioFormat;
use soundmgr::time::ManualClock;

fn manager_with(config: AudioConfig, voices: usize) -> (Arc<ManualClock>, AudioManager) {
    let clock = Arc::new(ManualClock::new());
    let backend = SoftBackend::new(clock.clone()).with_max_sources(voices);
    let manager = AudioManager::new(config, Box::new(backend), clock.clone());
    manager.initialize().unwrap();
    (clock, manager)
}

fn manager(voices: usize) -> (Arc<ManualClock>, AudioManager) {
    manager_with(AudioConfig::manual(), voices)
}

fn tick(clock: &ManualClock, manager: &AudioManager, ms: u64) {
    for _ in 0..ms / 10 {
        clock.advance_ms(10);
        manager.run_maintenance().unwrap();
    }
}

#[test]
fn test_full_pool_of_held_voices_rejects_requests() {
    let (_, manager) = manager(128);
    let mut held: Vec<Source> = (0..128)
        .map(|_| manager.try_allocate(1).unwrap())
        .collect();
    assert_eq!(manager.source_count(), 128);

    // Nothing can be evicted while every voice is held.
    assert!(manager.try_allocate(1).is_none());
    assert!(manager.try_allocate(100).is_none());

    let released = held.swap_remove(17);
    let key = released.key();
    drop(released);
    let reused = manager.try_allocate(1).unwrap();
    assert_ne!(reused.key(), key);
    assert_eq!(manager.source_count(), 128);
    assert!(manager.try_allocate(1).is_none());
}

#[test]
fn test_low_priority_sound_is_dropped_when_pool_is_busy() {
    let (clock, manager) = manager(2);
    let buffer = manager.create_buffer();
    buffer.set(&vec![0; 10_000], AudioFormat::Mono16, 1000);

    // Fire and forget two important sounds.
    for _ in 0..2 {
        let source = manager.try_allocate(10).unwrap();
        source.set_buffer(&buffer);
        source.play();
    }
    tick(&clock, &manager, 100);
    assert_eq!(manager.source_count(), 2);

    assert!(manager.try_allocate(5).is_none());
    let urgent = manager.try_allocate(10).unwrap();
    assert_eq!(urgent.state(), SourceState::Initial);
}

#[test]
fn test_finished_voices_are_reclaimed() {
    let (clock, manager) = manager(16);
    let buffer = manager.create_buffer();
    buffer.set(&vec![0; 500], AudioFormat::Mono16, 1000);

    for _ in 0..10 {
        let source = manager.try_allocate(0).unwrap();
        source.set_buffer(&buffer);
        source.play();
    }
    tick(&clock, &manager, 200);
    assert_eq!(manager.source_count(), 10);
    tick(&clock, &manager, 400);
    assert_eq!(manager.source_count(), 0);
}

#[test]
fn test_buffer_outlives_handle_while_playing() {
    let (clock, manager) = manager(8);
    let source = manager.try_allocate(0).unwrap();
    {
        let buffer = manager.create_buffer();
        buffer.set(&vec![0; 2000], AudioFormat::Mono16, 1000);
        source.set_buffer(&buffer);
        source.play();
    }

    tick(&clock, &manager, 1500);
    assert_eq!(manager.buffer_count(), 1);
    assert!(source.is_playing());
    assert!(source.has_buffer());

    tick(&clock, &manager, 600);
    assert_eq!(source.state(), SourceState::Stopped);
    // Stopped voices still report their buffer until it is detached.
    assert_eq!(manager.buffer_count(), 1);
    source.clear();
    tick(&clock, &manager, 10);
    assert_eq!(manager.buffer_count(), 0);
}

#[test]
fn test_gain_fade_over_one_second() {
    let (clock, manager) = manager(8);
    let source = manager.try_allocate(0).unwrap();
    source.set_gain(1.0);
    source.fade_gain(0.0, Duration::from_secs(1));

    tick(&clock, &manager, 250);
    assert!((source.gain() - 0.75).abs() < 0.011);
    tick(&clock, &manager, 250);
    assert!((source.gain() - 0.5).abs() < 0.011);
    tick(&clock, &manager, 500);
    assert_eq!(source.gain(), 0.0);
    assert_eq!(manager.pending_commands(), 0);
}

#[test]
fn test_overlapping_commands_apply_in_submission_order() {
    let (clock, manager) = manager(8);
    let source = manager.try_allocate(0).unwrap();
    source.fade_gain(0.0, Duration::from_secs(1));
    tick(&clock, &manager, 100);
    source.transition_from(ParamKind::Gain, 0.2f32, 0.4f32, Duration::from_millis(200));
    assert_eq!(source.pending_commands(), 2);

    // Both run each pass; the later submission lands last.
    tick(&clock, &manager, 100);
    assert!((source.gain() - 0.3).abs() < 0.011);

    tick(&clock, &manager, 900);
    assert_eq!(source.gain(), 0.0);
    assert_eq!(source.pending_commands(), 0);
}

#[test]
fn test_move_to_interpolates_position() {
    let (clock, manager) = manager(8);
    let source = manager.try_allocate(0).unwrap();
    source.move_to(Vec3::new(10.0, -10.0, 0.0), Duration::from_millis(400));

    tick(&clock, &manager, 200);
    let halfway = source.position();
    assert!((halfway - Vec3::new(5.0, -5.0, 0.0)).length() < 0.3);
    tick(&clock, &manager, 200);
    assert_eq!(source.position(), Vec3::new(10.0, -10.0, 0.0));
}

#[rstest]
#[case(0, 0.5)]
#[case(7, 0.0)]
#[case(31, 2.0)]
fn test_class_gain_leaves_source_gain_alone(#[case] class: usize, #[case] gain: f32) {
    let (clock, manager) = manager(8);
    let source = manager.try_allocate(0).unwrap();
    source.add_class(class);
    manager.set_class_gain(class, gain);
    assert_eq!(manager.class_gain(class), gain);

    source.fade_gain(0.5, Duration::from_millis(100));
    tick(&clock, &manager, 200);
    assert_eq!(source.gain(), 0.5);
    assert_eq!(source.classes(), 1 << class);
}

#[test]
fn test_shut_down_with_outstanding_handles() {
    let (_, manager) = manager(8);
    let buffer = manager.create_buffer();
    let source = manager.try_allocate(0).unwrap();
    let copy = source.clone();

    assert_eq!(
        manager.shut_down(),
        Err(AudioError::HandlesOutstanding {
            buffers: 1,
            sources: 1
        })
    );
    drop(source);
    drop(buffer);
    assert!(manager.shut_down().is_err());
    drop(copy);
    manager.shut_down().unwrap();

    assert!(!manager.active());
    assert!(manager.try_allocate(0).is_none());
}

#[test]
fn test_lock_excludes_other_threads() {
    let (_, manager) = manager(8);
    let manager = Arc::new(manager);
    let finished = Arc::new(AtomicBool::new(false));

    let guard = manager.lock();
    let worker = {
        let manager = manager.clone();
        let finished = finished.clone();
        thread::spawn(move || {
            manager.run_maintenance().unwrap();
            finished.store(true, Ordering::SeqCst);
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!finished.load(Ordering::SeqCst));

    // Nested calls on the holding thread still go through.
    let source = manager.try_allocate(0).unwrap();
    source.set_pitch(1.5);
    drop(guard);

    worker.join().unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(source.pitch(), 1.5);
}

#[test]
fn test_background_thread_runs_commands() {
    let config = AudioConfig {
        maintenance_interval: Duration::from_millis(5),
        ..AudioConfig::default()
    };
    let manager = AudioManager::soft(config);
    manager.initialize().unwrap();
    assert!(manager.maintenance_running());

    let source = manager.try_allocate(0).unwrap();
    source.glide_pitch(2.0, Duration::from_millis(50));

    let deadline = Instant::now() + Duration::from_secs(5);
    while source.pending_commands() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(source.pitch(), 2.0);

    drop(source);
    manager.shut_down().unwrap();
    assert!(!manager.maintenance_running());
}

#[test]
#[serial]
fn test_configured_log_level_is_applied() {
    let config = AudioConfig {
        log_level: Some(LogLevel::Warning),
        ..AudioConfig::manual()
    };
    let (_, manager) = manager_with(config, 8);
    assert_eq!(log::max_level(), log::LevelFilter::Warn);
    manager.shut_down().unwrap();
    log::set_max_level(log::LevelFilter::Off);
}
