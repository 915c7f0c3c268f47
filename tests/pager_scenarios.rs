//! End-to-end scenarios against the real host-OS VFS, not the in-memory test
//! double the unit tests use.

#![cfg(unix)]

use std::sync::Arc;

use rustql_pager::os::unix::UnixVfs;
use rustql_pager::{
    AccessFlags, CheckpointMode, JournalMode, OpenFlags, Pager, PagerGetFlags, PagerOpenFlags, Vfs,
};

fn open_pager(vfs: Arc<dyn Vfs>, path: &str) -> Pager {
    Pager::open(
        vfs,
        path,
        PagerOpenFlags::empty(),
        OpenFlags::READWRITE | OpenFlags::CREATE,
    )
    .unwrap()
}

#[test]
fn clean_commit_round_trips_through_a_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clean.db");
    let path = path.to_str().unwrap();
    let vfs: Arc<dyn Vfs> = Arc::new(UnixVfs::new());

    {
        let mut pager = open_pager(vfs.clone(), path);
        pager.set_page_size(4096, 0).unwrap();
        pager.begin(false).unwrap();

        for (pgno, content) in [(1u32, b"header+A"), (2, b"page two"), (3, b"page3___")] {
            let page = pager.get(pgno, PagerGetFlags::empty()).unwrap();
            pager.write(page).unwrap();
            unsafe {
                (*page.as_ptr()).data[0..8].copy_from_slice(content);
            }
            pager.release(page);
        }

        pager.commit_phase_one(None).unwrap();
        pager.commit_phase_two().unwrap();
        assert_eq!(pager.page_count(), 3);
    }

    // No journal left behind after a clean commit.
    assert!(!vfs
        .access(&format!("{path}-journal"), AccessFlags::EXISTS)
        .unwrap());

    let mut reopened = open_pager(vfs, path);
    reopened.set_page_size(4096, 0).unwrap();
    reopened.shared_lock().unwrap();
    assert_eq!(reopened.page_count(), 3);
    for (pgno, content) in [(1u32, b"header+A"), (2, b"page two"), (3, b"page3___")] {
        let page = reopened.get(pgno, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page.as_ref().data[0..8], content);
        }
        reopened.release(page);
    }
}

#[test]
fn wal_mode_commit_and_checkpoint_against_real_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wal.db");
    let path = path.to_str().unwrap();
    let vfs: Arc<dyn Vfs> = Arc::new(UnixVfs::new());

    let mut pager = open_pager(vfs.clone(), path);
    pager.set_page_size(4096, 0).unwrap();
    pager.set_journal_mode(JournalMode::Wal).unwrap();

    pager.begin(false).unwrap();
    let page = pager.get(1, PagerGetFlags::empty()).unwrap();
    pager.write(page).unwrap();
    unsafe {
        (*page.as_ptr()).data[0..4].copy_from_slice(b"FRAM");
    }
    pager.release(page);
    pager.commit_phase_one(None).unwrap();
    pager.commit_phase_two().unwrap();

    let (backfilled, _checkpointed) = pager.checkpoint(CheckpointMode::Truncate).unwrap();
    assert!(backfilled >= 1);

    // After checkpoint the page content is visible straight from the main
    // file, independent of the WAL.
    let mut plain_vfs_pager = open_pager(vfs, path);
    plain_vfs_pager.set_page_size(4096, 0).unwrap();
    let page = plain_vfs_pager.get(1, PagerGetFlags::empty()).unwrap();
    unsafe {
        assert_eq!(&page.as_ref().data[0..4], b"FRAM");
    }
    plain_vfs_pager.release(page);
}
