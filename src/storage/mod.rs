//! Storage layer: page buffer allocator, pager, page cache, WAL.

pub mod pager;
pub mod pcache;
pub mod pgalloc;
pub mod wal;
