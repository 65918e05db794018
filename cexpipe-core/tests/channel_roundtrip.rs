//! Channel round-trips under concurrent readers and writers.

use serde_json::{json, Value};
use std::thread;
use std::time::Duration;

use cexpipe_core::channel::{Channel, ChannelKey, RetryPolicy, TAG};
use cexpipe_core::domain::{Exchange, Nonce, Pair};

fn policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        heal_after: 3,
        max_attempts: Some(200),
    }
}

fn key() -> ChannelKey {
    ChannelKey::new(Exchange::Bitfinex, &Pair::new("ETH", "USD"), Nonce::next())
}

// ── Reader before writer ─────────────────────────────────────────────

#[test]
fn reader_waits_for_late_writer() {
    let dir = tempfile::tempdir().unwrap();
    let channel = Channel::new(dir.path(), policy());
    let key = key();
    let payload = json!({"bids": [[1.0, 2.0]], "asks": [], "note": "late"});

    let reader = {
        let channel = channel.clone();
        let key = key.clone();
        thread::spawn(move || channel.read(&key))
    };
    thread::sleep(Duration::from_millis(20));
    channel.write(&key, &payload).unwrap();

    assert_eq!(reader.join().unwrap().unwrap(), payload);
}

#[test]
fn partial_frame_is_not_ready_yet() {
    let dir = tempfile::tempdir().unwrap();
    let channel = Channel::new(dir.path(), policy());
    let key = key();
    std::fs::write(channel.path(&key), format!("{TAG}{{\"price\": 1")).unwrap();

    let reader = {
        let channel = channel.clone();
        let key = key.clone();
        thread::spawn(move || channel.read(&key))
    };
    thread::sleep(Duration::from_millis(20));
    channel.write(&key, &json!({"price": 1.5})).unwrap();

    assert_eq!(reader.join().unwrap().unwrap(), json!({"price": 1.5}));
}

// ── Injected failures ────────────────────────────────────────────────

#[test]
fn vanished_directory_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("channel");
    let channel = Channel::new(&root, policy());
    channel.prepare().unwrap();
    std::fs::remove_dir_all(&root).unwrap();

    let key = key();
    channel.write(&key, &json!([1, 2, 3])).unwrap();
    assert_eq!(channel.read(&key).unwrap(), json!([1, 2, 3]));
    channel.delete(&key).unwrap();
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
}

// ── Many slots at once ───────────────────────────────────────────────

#[test]
fn concurrent_slots_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let channel = Channel::new(dir.path(), policy());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let channel = channel.clone();
            thread::spawn(move || {
                let key = key();
                let payload = json!({"worker": i, "rows": vec![i; i as usize]});
                let writer = {
                    let channel = channel.clone();
                    let key = key.clone();
                    let payload = payload.clone();
                    thread::spawn(move || channel.write(&key, &payload))
                };
                let got: Value = channel.read(&key).unwrap();
                writer.join().unwrap().unwrap();
                channel.delete(&key).unwrap();
                (payload, got)
            })
        })
        .collect();

    for handle in handles {
        let (sent, got) = handle.join().unwrap();
        assert_eq!(sent, got);
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
