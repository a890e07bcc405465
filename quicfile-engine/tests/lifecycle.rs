//! Facade lifecycle across threads: preconditions, re-open, idempotent
//! close, and callback persistence. None of these need a live peer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quicfile_engine::{ConfigKey, ConfigMap, ConfigValue, Engine, EngineError};

#[test]
fn concurrent_writes_before_connect_are_all_rejected() {
    let engine = Arc::new(Engine::new());
    let rejections = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let rejections = rejections.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..100 {
                if matches!(
                    engine.write(b"payload", false),
                    Err(EngineError::NotConnected)
                ) {
                    rejections.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(rejections.load(Ordering::Relaxed), 800);
}

#[test]
fn close_from_another_thread_is_a_safe_no_op() {
    let engine = Arc::new(Engine::new());
    engine.open(ConfigMap::new()).unwrap();

    let other = engine.clone();
    std::thread::spawn(move || other.close(0, "from elsewhere"))
        .join()
        .unwrap();

    assert!(!engine.is_connected());
    assert!(!engine.is_running());
}

#[test]
fn engine_can_be_reopened_after_a_failed_connect() {
    let engine = Engine::new();
    engine.set_event_callback(|_event| {});
    engine.open(ConfigMap::new()).unwrap();

    // Nothing answers on the discard port, so the handshake cannot
    // complete; the attempt times out and the engine ends up closed with
    // its I/O thread joined.
    let err = engine.connect("127.0.0.1", 9, 50).unwrap_err();
    assert!(matches!(err, EngineError::ConnectTimeout(_)));
    assert!(!engine.is_running());
    assert!(!engine.is_connected());

    // Config and callback survive the close; a fresh open makes the
    // engine connect-ready again, so the next failure is resolution,
    // not a missing prerequisite.
    let mut map = ConfigMap::new();
    map.insert(ConfigKey::MaxIdleTimeout, ConfigValue::U64(1_000));
    engine.open(map).unwrap();

    let err = engine.connect("", 1, 10).unwrap_err();
    assert!(matches!(err, EngineError::Resolve { .. }));
}

#[test]
fn last_error_tracks_the_most_recent_failure() {
    let engine = Engine::new();

    let _ = engine.write(b"x", false);
    let first = engine.last_error();
    assert!(!first.is_empty());

    let _ = engine.connect("localhost", 4433, 10);
    let second = engine.last_error();
    assert_ne!(first, second);
}

#[test]
fn stats_snapshots_are_independent_clones() {
    let engine = Engine::new();
    let a = engine.stats();
    let b = engine.stats();
    assert_eq!(a.packets_sent, b.packets_sent);
    assert_eq!(a.rtt, b.rtt);
}

#[test]
fn default_engine_reports_not_running() {
    let engine = Engine::default();
    assert!(!engine.is_running());
    assert!(!engine.is_connected());
    assert!(engine.scid().is_empty());
}
