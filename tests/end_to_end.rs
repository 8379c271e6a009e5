//! End-to-end scenarios from spec.md §8, driven only through the public
//! API (an external crate can't reach the kernel's `pub(crate)` internals,
//! same as any real collaborator above the storage kernel).

mod common;

use blite::engine::btree::{BTreeIndex, Direction};
use blite::engine::{DocumentStore, StorageEngine};
use blite::key::IndexKey;
use blite::EngineConfig;
use common::MemBacking;

fn engine() -> StorageEngine {
    let config = EngineConfig::builder().page_size(4096).build().unwrap();
    StorageEngine::create_new(Box::new(MemBacking::new()), Box::new(MemBacking::new()), config).unwrap()
}

/// Scenario 1: insert, commit, simulate a crash by never calling `close`,
/// reopen against the same bytes, and confirm the document and its index
/// entry both survived — recovering the index's root page id from a real
/// `CollectionCatalog` reload, not from a value captured before the
/// "crash" (the catalog is durable because `commit` persists it, see
/// `StorageEngine::commit`).
#[test]
fn insert_commit_then_read_after_simulated_crash() {
    let main = MemBacking::new();
    let wal = MemBacking::new();
    let config = EngineConfig::builder().page_size(4096).build().unwrap();

    let engine = StorageEngine::create_new(Box::new(main.clone()), Box::new(wal.clone()), config.clone()).unwrap();
    let tx = engine.begin_transaction();
    let mut users = DocumentStore::open(&engine, "users");
    let loc = users.insert(tx, b"{\"_id\":1,\"name\":\"Alice\"}").unwrap();

    let mut index = BTreeIndex::create(&engine, tx, "users_by_id", true).unwrap();
    index.insert(tx, IndexKey::Int32(1), loc).unwrap();
    users.register_secondary_index("users_by_id", "_id", true, index.root_page_id());
    engine.commit(tx).unwrap();
    // `engine` is dropped here without calling `close` — the simulated crash.
    drop(engine);

    let reopened = StorageEngine::open_existing(Box::new(main), Box::new(wal), config).unwrap();
    let users = DocumentStore::open(&reopened, "users");
    let index_root = users
        .secondary_index_root("users_by_id")
        .expect("index root recovered from the reloaded catalog, not smuggled across the crash");
    let index = BTreeIndex::open(&reopened, "users_by_id", index_root, true);
    let found = index.try_find(None, &IndexKey::Int32(1)).unwrap().expect("index entry survives reopen");

    let bytes = users.read(found, None).unwrap();
    assert_eq!(bytes, b"{\"_id\":1,\"name\":\"Alice\"}");
}

/// Scenario 2: a transaction's uncommitted write is invisible to other
/// readers, and stays invisible after a rollback.
#[test]
fn uncommitted_write_is_invisible_to_other_readers_and_stays_so_after_rollback() {
    let engine = engine();
    let page_id = engine.allocate_page(None).unwrap();
    let tx = engine.begin_transaction();
    let mut dirty = vec![0u8; engine.page_size()];
    dirty[0] = 0xFF;
    engine.write_page(page_id, tx, dirty).unwrap();

    assert_ne!(engine.read_page(page_id, None).unwrap()[0], 0xFF);
    engine.rollback(tx).unwrap();
    assert_ne!(engine.read_page(page_id, None).unwrap()[0], 0xFF);
}

/// Scenario 3: a transaction observes its own uncommitted write; after a
/// rollback, any reader observes the pre-transaction image.
#[test]
fn read_your_own_writes_reverts_to_prior_image_on_rollback() {
    let engine = engine();
    let page_id = engine.allocate_page(None).unwrap();
    let tx = engine.begin_transaction();
    let mut dirty = vec![0u8; engine.page_size()];
    dirty[0] = 0xDD;
    engine.write_page(page_id, tx, dirty).unwrap();
    assert_eq!(engine.read_page(page_id, Some(tx)).unwrap()[0], 0xDD);

    engine.rollback(tx).unwrap();
    assert_ne!(engine.read_page(page_id, None).unwrap()[0], 0xDD);
}

/// Scenario 4: forward and backward range scans return the same keys in
/// opposite order.
#[test]
fn btree_range_direction_reverses_order() {
    let engine = engine();
    let tx = engine.begin_transaction();
    let mut index = BTreeIndex::create(&engine, tx, "by_n", true).unwrap();
    for n in [10, 20, 30, 40, 50] {
        index.insert(tx, IndexKey::Int32(n), blite::engine::DocumentLocation::new(1, n as u16)).unwrap();
    }
    engine.commit(tx).unwrap();

    let forward = index.range(None, &IndexKey::Int32(20), &IndexKey::Int32(40), true, true, Direction::Forward).unwrap();
    let forward_keys: Vec<i32> = forward.into_iter().map(|(k, _)| match k {
        IndexKey::Int32(v) => v,
        _ => unreachable!(),
    }).collect();
    assert_eq!(forward_keys, vec![20, 30, 40]);

    let backward = index.range(None, &IndexKey::Int32(20), &IndexKey::Int32(40), true, true, Direction::Backward).unwrap();
    let backward_keys: Vec<i32> = backward.into_iter().map(|(k, _)| match k {
        IndexKey::Int32(v) => v,
        _ => unreachable!(),
    }).collect();
    assert_eq!(backward_keys, vec![40, 30, 20]);
}

/// Scenario 6: after a checkpoint, the WAL is drained and every committed
/// record remains findable.
#[test]
fn checkpoint_truncates_wal_and_keeps_every_record_findable() {
    let engine = engine();
    let tx = engine.begin_transaction();
    let mut store = DocumentStore::open(&engine, "events");
    let mut index = BTreeIndex::create(&engine, tx, "events_by_n", true).unwrap();
    for n in 0..100 {
        let loc = store.insert(tx, format!("event-{n}").as_bytes()).unwrap();
        index.insert(tx, IndexKey::Int32(n), loc).unwrap();
    }
    engine.commit(tx).unwrap();

    engine.force_checkpoint().unwrap();
    assert_eq!(engine.wal_len(), 0);

    for n in 0..100 {
        let loc = index.try_find(None, &IndexKey::Int32(n)).unwrap().unwrap();
        assert_eq!(store.read(loc, None).unwrap(), format!("event-{n}").as_bytes());
    }
}
