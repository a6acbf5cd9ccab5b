//! End-to-end crash and recovery tests.
//!
//! A "crash" drops the `Wal` and the `HeapStore` (losing the page cache)
//! without a checkpoint, then reopens both against the same files.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use pagelog::{HeapPage, HeapPageId, HeapStore, PageStore, TransactionId, Wal, PAGE_SIZE};

struct Db {
    store: Arc<HeapStore>,
    wal: Wal,
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("create temp dir");
    let root = temp_dir.path().to_path_buf();
    (temp_dir, root)
}

fn open_db(root: &PathBuf) -> Db {
    let store = Arc::new(HeapStore::open(&root.join("tables")).expect("open store"));
    let wal = Wal::open(&root.join("wal.log"), store.clone()).expect("open wal");
    Db { store, wal }
}

fn page(pid: HeapPageId, pattern: &str) -> HeapPage {
    let data: Vec<u8> = pattern.bytes().cycle().take(PAGE_SIZE).collect();
    HeapPage::new(pid, data).expect("build page")
}

fn assert_page(store: &HeapStore, pid: HeapPageId, pattern: &str) {
    let expected: Vec<u8> = pattern.bytes().cycle().take(PAGE_SIZE).collect();
    let actual = store.load_page(&pid).expect("load page");
    assert_eq!(
        actual.data(),
        expected.as_slice(),
        "page {pid:?} does not match pattern {pattern:?}"
    );
}

/// Logs an update and buffers the new image, the way a buffer pool would.
fn update(db: &Db, tid: TransactionId, pid: HeapPageId, before: &str, after: &str) {
    db.wal
        .log_update(tid, &page(pid, before), &page(pid, after))
        .expect("log update");
    db.store.put_page(&page(pid, after)).expect("buffer page");
}

#[test]
fn committed_update_survives_crash() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    {
        let db = open_db(&root);
        let t1 = TransactionId::new(1);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AAAA", "BBBB");
        db.wal.log_commit(t1).unwrap();
        // crash: buffered page never reached the table file
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "BBBB");
}

#[test]
fn uncommitted_update_is_undone_after_crash() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AAAA")).unwrap();
        let t1 = TransactionId::new(1);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AAAA", "BBBB");
        db.wal.force().unwrap();
        // The dirty page was evicted to disk ahead of the crash.
        db.store.write_page(&page(p, "BBBB")).unwrap();
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "AAAA");
}

#[test]
fn abort_restores_earliest_before_image() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    let db = open_db(&root);
    db.store.write_page(&page(p, "AA")).unwrap();

    let t1 = TransactionId::new(1);
    db.wal.log_begin(t1).unwrap();
    update(&db, t1, p, "AA", "BB");
    update(&db, t1, p, "BB", "CC");
    db.wal.log_abort(t1).unwrap();

    assert_page(&db.store, p, "AA");
    assert_eq!(db.wal.live_transaction_count(), 0);
}

#[test]
fn loser_is_undone_while_winner_is_redone() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    let q = HeapPageId::new(0, 1);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AA")).unwrap();
        db.store.write_page(&page(q, "xx")).unwrap();

        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_begin(t2).unwrap();
        update(&db, t2, q, "xx", "yy");
        db.wal.log_commit(t2).unwrap();
        // crash before T1 resolves
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "AA");
    assert_page(&db.store, q, "yy");
    assert_eq!(db.wal.live_transaction_count(), 0);
}

#[test]
fn commit_after_checkpoint_survives_crash() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AA")).unwrap();
        let t1 = TransactionId::new(1);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_checkpoint().unwrap();
        db.wal.log_commit(t1).unwrap();
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "BB");
}

#[test]
fn winner_redo_supersedes_loser_undo_on_shared_page() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AA")).unwrap();

        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_begin(t2).unwrap();
        update(&db, t2, p, "BB", "CC");
        db.wal.log_commit(t2).unwrap();
        // crash before T1 commits
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    // Undoing T1 rolls the page to "AA", but T2's committed image wins.
    assert_page(&db.store, p, "CC");
}

#[test]
fn abort_does_not_disturb_later_committed_update() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AA")).unwrap();

        let t1 = TransactionId::new(1);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_abort(t1).unwrap();

        let t2 = TransactionId::new(2);
        db.wal.log_begin(t2).unwrap();
        update(&db, t2, p, "AA", "DD");
        db.wal.log_commit(t2).unwrap();
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "DD");
}

#[test]
fn recovery_is_idempotent() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    let q = HeapPageId::new(0, 1);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AA")).unwrap();
        db.store.write_page(&page(q, "xx")).unwrap();
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_begin(t2).unwrap();
        update(&db, t2, q, "xx", "yy");
        db.wal.log_commit(t2).unwrap();
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "AA");
    assert_page(&db.store, q, "yy");
}

#[test]
fn recovering_an_empty_log_is_harmless() {
    let (_temp, root) = setup_test_env();
    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_eq!(db.wal.live_transaction_count(), 0);

    // And the log still works afterwards.
    let t1 = TransactionId::new(1);
    db.wal.log_begin(t1).unwrap();
    db.wal.log_commit(t1).unwrap();
}

#[test]
fn recovering_a_checkpoint_only_log_is_harmless() {
    let (_temp, root) = setup_test_env();
    {
        let db = open_db(&root);
        db.wal.log_checkpoint().unwrap();
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_eq!(db.wal.live_transaction_count(), 0);
}

#[test]
fn checkpoint_spanning_live_transaction_recovers() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    let q = HeapPageId::new(0, 1);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AA")).unwrap();
        db.store.write_page(&page(q, "xx")).unwrap();

        // T1's BEGIN predates the checkpoint, so truncation keeps the log
        // back to its first record and the checkpoint lists it as live.
        let t1 = TransactionId::new(1);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_checkpoint().unwrap();
        update(&db, t1, q, "xx", "yy");
        // crash with T1 still open
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "AA");
    assert_page(&db.store, q, "xx");
}

#[test]
fn clean_shutdown_needs_no_recovery_work() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    {
        let db = open_db(&root);
        db.store.write_page(&page(p, "AA")).unwrap();
        let t1 = TransactionId::new(1);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_commit(t1).unwrap();
        db.wal.shutdown().unwrap();
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "BB");
}

#[test]
fn appends_work_after_recovery() {
    let (_temp, root) = setup_test_env();
    let p = HeapPageId::new(0, 0);
    {
        let db = open_db(&root);
        let t1 = TransactionId::new(1);
        db.wal.log_begin(t1).unwrap();
        update(&db, t1, p, "AA", "BB");
        db.wal.log_commit(t1).unwrap();
    }

    let db = open_db(&root);
    db.wal.recover().unwrap();

    let t2 = TransactionId::new(2);
    db.wal.log_begin(t2).unwrap();
    update(&db, t2, p, "BB", "CC");
    db.wal.log_commit(t2).unwrap();
    drop(db);

    let db = open_db(&root);
    db.wal.recover().unwrap();
    assert_page(&db.store, p, "CC");
}

#[test]
fn dump_renders_every_record() {
    let (_temp, root) = setup_test_env();
    let db = open_db(&root);
    let p = HeapPageId::new(0, 0);
    let t1 = TransactionId::new(1);
    db.wal.log_begin(t1).unwrap();
    update(&db, t1, p, "AA", "BB");
    db.wal.log_commit(t1).unwrap();

    let mut out = Vec::new();
    db.wal.dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("BEGIN 1"));
    assert!(text.contains("UPDATE 1"));
    assert!(text.contains("COMMIT 1"));
}
