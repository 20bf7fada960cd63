use criterion::{black_box, criterion_group, criterion_main, Criterion};
use forum_repair::checkpoint::MemoryStateStore;
use forum_repair::tokenizer::Tokenizer;
use forum_repair::{
    schema, Catalog, MessageCatalog, RepairConfig, RunState, ScanDriver, ScanMode, WordTokenizer,
};
use rusqlite::{params, Connection};

const TOPICS: i64 = 2_000;
const REPLIES: i64 = 4;

/// A forum where every 50th topic has a stale counter and every 100th
/// message points at a missing topic
fn seeded_forum() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    schema::install(&conn).unwrap();
    conn.execute_batch(
        "INSERT INTO categories (id_cat, name) VALUES (1, 'General');
         INSERT INTO boards (id_board, id_cat, name) VALUES (1, 1, 'Lobby');
         INSERT INTO members (id_member, member_name) VALUES (1, 'alice');",
    )
    .unwrap();

    let tx = conn.unchecked_transaction().unwrap();
    let mut id_msg = 0;
    for id_topic in 1..=TOPICS {
        let first = id_msg + 1;
        for _ in 0..=REPLIES {
            id_msg += 1;
            let target = if id_msg % 100 == 0 { id_topic + TOPICS } else { id_topic };
            tx.execute(
                "INSERT INTO messages (id_msg, id_topic, id_board, id_member, subject)
                 VALUES (?1, ?2, 1, 1, ?3)",
                params![id_msg, target, format!("Topic number {id_topic}")],
            )
            .unwrap();
        }
        let replies = if id_topic % 50 == 0 { REPLIES + 3 } else { REPLIES };
        tx.execute(
            "INSERT INTO topics (id_topic, id_board, id_first_msg, id_last_msg, id_member_started, num_replies)
             VALUES (?1, 1, ?2, ?3, 1, ?4)",
            params![id_topic, first, id_msg, replies],
        )
        .unwrap();
        for word in WordTokenizer::default().words(&format!("Topic number {id_topic}")) {
            tx.execute(
                "INSERT OR IGNORE INTO log_search_subjects (word, id_topic) VALUES (?1, ?2)",
                params![word, id_topic],
            )
            .unwrap();
        }
    }
    tx.commit().unwrap();
    conn
}

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    group.sample_size(10);

    let conn = seeded_forum();
    let catalog = Catalog::standard().unwrap();
    let messages = MessageCatalog::english();
    let tokenizer = WordTokenizer::default();

    let unbounded = RepairConfig::unbounded();
    group.bench_function("single_invocation", |b| {
        let driver = ScanDriver::new(&conn, &catalog, &unbounded, &messages, &tokenizer);
        b.iter(|| {
            let mut store = MemoryStateStore::new();
            black_box(
                driver
                    .run_to_completion(ScanMode::Detect, RunState::new(), &mut store, "bench")
                    .unwrap(),
            )
        });
    });

    let bursty = RepairConfig {
        max_queries: 8,
        ..RepairConfig::unbounded()
    };
    group.bench_function("paused_every_8_queries", |b| {
        let driver = ScanDriver::new(&conn, &catalog, &bursty, &messages, &tokenizer);
        b.iter(|| {
            let mut store = MemoryStateStore::new();
            black_box(
                driver
                    .run_to_completion(ScanMode::Detect, RunState::new(), &mut store, "bench")
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_detect);
criterion_main!(benches);
