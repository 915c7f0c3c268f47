//! Page cache and pager core of an embedded relational storage engine.
//!
//! This crate implements the subsystem that mediates between a higher-level
//! B-tree index layer and the raw byte-addressable database file: fixed-size
//! page buffers, dirty-page write-back under memory pressure, and the
//! durability protocol (rollback journal or write-ahead log) that guarantees
//! atomic, crash-safe transactions. The SQL tokenizer, parser, query planner,
//! bytecode engine, B-tree cell layout, and CLI surface are external
//! collaborators and live outside this crate; `os::vfs` is the only contract
//! they see.
#![allow(dead_code)]

pub mod config;
pub mod error;
pub mod mem;
pub mod os;
pub mod storage;
pub mod types;
pub mod util;

pub use config::{configure, global_config, initialize, shutdown, ConfigOption, GlobalConfig};
pub use error::{Error, ErrorCode, Result};

pub use mem::{
    sqlite3_free, sqlite3_malloc, sqlite3_memory_highwater, sqlite3_memory_used, sqlite3_msize,
    sqlite3_realloc, sqlite3_soft_heap_limit64, sqlite3_status, sqlite3_status64, StatusOp,
};

pub use os::vfs::{AccessFlags, LockType, OpenFlags, SyncFlags, Vfs, VfsFile};

pub use storage::pager::{
    JournalMode, LockingMode, Pager, PagerFlags, PagerGetFlags, PagerOpenFlags, PagerState,
};
pub use storage::pcache::{CreateFlag, PCache, PGroup, PgHdr};
pub use storage::wal::{CheckpointMode, Wal};

pub use types::{ByteCount, DbOffset, Pgno};
