//! Core numeric type aliases shared across the pager and page cache.

/// Page number (1-based; 0 is never a valid page).
pub type Pgno = u32;

/// Database file byte offset.
pub type DbOffset = i64;

/// Byte count.
pub type ByteCount = usize;
