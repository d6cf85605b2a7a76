use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use tether_sync::protocol::snapshot_from_value;
use tether_sync::{Frame, GroupState, Location, PartialUpdate, PresenceMap};

const ROSTER: [&str; 5] = ["Me", "Alice", "Bob", "Carol", "Dave"];

fn full_update(name: &str, step: i32) -> PartialUpdate {
    PartialUpdate::named(name)
        .with_hp(80, 99)
        .with_prayer(40, 70)
        .with_world(301)
        .with_ghost_mode(false)
        .with_notes("bank run")
        .with_location(Location::new(3200 + step, 3200 - step, 0))
}

fn bench_frame_encode(c: &mut Criterion) {
    let frame = Frame::Broadcast {
        ack: Some(7),
        data: full_update("Alice", 1),
    };

    c.bench_function("broadcast_frame_encode", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let encoded = Frame::Broadcast {
        ack: None,
        data: full_update("Alice", 1),
    }
    .encode()
    .unwrap();

    c.bench_function("broadcast_frame_decode", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_snapshot_decode(c: &mut Criterion) {
    let body = json!({
        "Alice": {"hp": 50, "maxHp": 99, "world": 302, "location": {"x": 10, "y": 20, "plane": 0}},
        "Bob": {"world": 0, "lastActivity": "IN_SESSION"},
        "Carol": null,
        "Dave": {"notes": "afk", "ghostMode": true},
    });

    c.bench_function("snapshot_decode_4", |b| {
        b.iter(|| black_box(snapshot_from_value(black_box(body.clone())).unwrap()))
    });
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = GroupState::new("bench", ROSTER, "Me").unwrap();
    let updates: Vec<PartialUpdate> = (0..64).map(|i| full_update(ROSTER[1 + i % 4], i as i32)).collect();
    let start = Instant::now();
    let mut tick = 0u32;

    c.bench_function("reconcile_64_updates", |b| {
        b.iter(|| {
            tick += 1;
            let now = start + Duration::from_millis(u64::from(tick) * 600);
            for update in &updates {
                group.reconcile_at(black_box(update), now).unwrap();
            }
        })
    });
}

fn bench_presence_tick(c: &mut Criterion) {
    let mut group = GroupState::new("bench", ROSTER, "Me").unwrap();
    let t0 = Instant::now();
    for (i, name) in ROSTER.iter().enumerate().skip(1) {
        let i = i as i32;
        group.reconcile_at(&full_update(name, 0), t0).unwrap();
        group
            .reconcile_at(&full_update(name, 10 * i), t0 + Duration::from_secs(5))
            .unwrap();
    }
    let mut map = PresenceMap::new(10);

    c.bench_function("presence_tick_4_members", |b| {
        b.iter(|| black_box(map.tick(black_box(&group))))
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_snapshot_decode,
    bench_reconcile,
    bench_presence_tick,
);
criterion_main!(benches);
