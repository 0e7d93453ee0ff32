//! Fanout target resolution benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_core::{BroadcastRouter, ConversationRegistry, SessionRegistry};
use relay_protocol::Message;

fn populate(members: usize, devices: usize) -> (SessionRegistry, ConversationRegistry) {
    let sessions = SessionRegistry::new();
    let conversations = ConversationRegistry::new();

    for m in 0..members {
        let user = format!("user-{m}");
        conversations.join("bench", &user);
        for d in 0..devices {
            sessions.add_connection(&user, &format!("client-{m}-{d}"));
        }
    }

    (sessions, conversations)
}

fn bench_resolve_targets(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_targets");

    for members in [10usize, 100, 1000] {
        let (sessions, conversations) = populate(members, 2);
        let message = Message {
            id: 1,
            message: "benchmark".into(),
            conversation_id: "bench".into(),
            created_at: 0,
            sender_id: "user-0".into(),
            sender_name: "user-0".into(),
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(members),
            &members,
            |b, _| {
                b.iter(|| {
                    BroadcastRouter::resolve_targets(
                        black_box(&sessions),
                        black_box(&conversations),
                        black_box(&message),
                        "client-0-0",
                    )
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_resolve_targets);
criterion_main!(benches);
