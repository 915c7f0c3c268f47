//! Pager: page cache manager, rollback journal and transaction state machine.
//!
//! The Pager sits between the B-tree layer and the VFS. It owns the page
//! cache, the rollback journal (or hands off to WAL), and the lock/state
//! machine that keeps a single writer and many readers from corrupting the
//! database file.

use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::os::vfs::{AccessFlags, LockType, OpenFlags, SyncFlags, Vfs, VfsFile};
use crate::storage::pcache::{CreateFlag, PCache, PgHdr};
use crate::storage::wal::{CheckpointMode, Wal};
use crate::types::Pgno;
use crate::util::bitvec::BitVec;

// ============================================================================
// Constants
// ============================================================================

/// Default maximum size for persistent journal files (-1 = no limit)
pub const DEFAULT_JOURNAL_SIZE_LIMIT: i64 = -1;

/// Journal header magic number
pub const JOURNAL_MAGIC: [u8; 8] = [0xd9, 0xd5, 0x05, 0xf9, 0x20, 0xa1, 0x63, 0xd7];

/// Size of the journal header in bytes
pub const JOURNAL_HEADER_SIZE: usize = 28;

/// Sentinel written into the header's page-count field while the journal is
/// still open for writing: readers recover by scanning until a record fails
/// its checksum or the file runs out, rather than trusting a stale count.
pub const JOURNAL_PAGE_COUNT_UNKNOWN: u32 = 0xFFFF_FFFF;

/// Default page size
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Minimum page size
pub const MIN_PAGE_SIZE: u32 = 512;

/// Maximum page size
pub const MAX_PAGE_SIZE: u32 = 65536;

// ============================================================================
// Pager Flags
// ============================================================================

bitflags! {
    /// Flags for Pager::open()
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PagerOpenFlags: u32 {
        /// Do not use a rollback journal
        const OMIT_JOURNAL = 0x0001;
        /// In-memory database
        const MEMORY = 0x0002;
    }

    /// Flags for Pager::get()
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PagerGetFlags: u8 {
        /// Do not load data from disk
        const NOCONTENT = 0x01;
        /// Read-only page is acceptable
        const READONLY = 0x02;
    }

    /// Flags for Pager::set_flags() - synchronous mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PagerFlags: u32 {
        /// PRAGMA synchronous=OFF
        const SYNCHRONOUS_OFF = 0x01;
        /// PRAGMA synchronous=NORMAL
        const SYNCHRONOUS_NORMAL = 0x02;
        /// PRAGMA synchronous=FULL
        const SYNCHRONOUS_FULL = 0x03;
        /// PRAGMA synchronous=EXTRA
        const SYNCHRONOUS_EXTRA = 0x04;
        /// Mask for synchronous values
        const SYNCHRONOUS_MASK = 0x07;
        /// PRAGMA fullfsync=ON
        const FULLFSYNC = 0x08;
        /// PRAGMA checkpoint_fullfsync=ON
        const CKPT_FULLFSYNC = 0x10;
        /// PRAGMA cache_spill=ON
        const CACHESPILL = 0x20;
    }

    /// Page state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PgFlags: u8 {
        /// Page is clean (unmodified)
        const CLEAN = 0x00;
        /// Page has been modified
        const DIRTY = 0x01;
        /// Do not write this page
        const DONT_WRITE = 0x02;
        /// Page needs sync before commit
        const NEED_SYNC = 0x04;
        /// Page is writeable
        const WRITEABLE = 0x08;
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Pager state machine states, in the order a normal transaction passes
/// through them. `Error` is entered from any state on an unrecoverable I/O
/// failure and is not part of that monotonic chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum PagerState {
    /// No lock held.
    Open = 0,
    /// SHARED lock held; reads allowed, no writes.
    Reader = 1,
    /// RESERVED lock held; a write transaction has started.
    WriterLocked = 2,
    /// Pages have been modified in the cache; nothing written to the db file yet.
    WriterCacheMod = 3,
    /// EXCLUSIVE lock held; dirty pages are being (or have been) written to the db file.
    WriterDbMod = 4,
    /// Db file write-out and sync complete; journal finalization pending.
    WriterFinished = 5,
    /// Unrecoverable error. Only close() or a full rollback can leave this state.
    Error = 6,
}

/// Journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum JournalMode {
    /// Commit by deleting journal file
    Delete = 0,
    /// Commit by zeroing journal header
    Persist = 1,
    /// Journal omitted (unsafe)
    Off = 2,
    /// Commit by truncating journal to zero
    Truncate = 3,
    /// In-memory journal file
    Memory = 4,
    /// Use write-ahead logging
    Wal = 5,
}

impl JournalMode {
    /// Check if this is WAL mode
    pub fn is_wal(&self) -> bool {
        matches!(self, JournalMode::Wal)
    }
}

/// Locking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LockingMode {
    /// Normal locking - release locks after transaction
    Normal = 0,
    /// Exclusive locking - hold exclusive lock
    Exclusive = 1,
}

/// Savepoint operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavepointOp {
    /// Begin a new savepoint
    Begin,
    /// Release (commit) savepoint
    Release,
    /// Rollback to savepoint
    Rollback,
}

// ============================================================================
// Savepoint
// ============================================================================

/// Savepoint state. `bitvec` tracks, for pages that existed when the
/// savepoint opened, whether their pre-image has already been written to
/// the sub-journal — so a page touched under several nested savepoints
/// only gets one sub-journal record.
pub struct Savepoint {
    /// Sub-journal record count when this savepoint was opened.
    pub sub_rec_start: u32,
    /// Database size (in pages) when this savepoint was opened.
    pub orig_db_size: Pgno,
    /// Which of the original pages already have a sub-journal pre-image.
    pub bitvec: BitVec,
}

impl Savepoint {
    pub fn new(sub_rec_start: u32, orig_db_size: Pgno) -> Self {
        Savepoint {
            sub_rec_start,
            orig_db_size,
            bitvec: BitVec::new(orig_db_size as usize),
        }
    }
}

// ============================================================================
// Journal Header
// ============================================================================

/// Rollback journal header (28 bytes)
#[derive(Debug, Clone)]
pub struct JournalHeader {
    /// Magic number (8 bytes)
    pub magic: [u8; 8],
    /// Page count in this segment, or [`JOURNAL_PAGE_COUNT_UNKNOWN`]
    pub page_count: u32,
    /// Random nonce for checksum
    pub nonce: u32,
    /// Initial database page count
    pub initial_pages: u32,
    /// Disk sector size
    pub sector_size: u32,
    /// Page size
    pub page_size: u32,
}

impl JournalHeader {
    /// Create a new journal header. `nonce` must come from the VFS's
    /// randomness source, not a process-local PRNG.
    pub fn new(nonce: u32, initial_pages: u32, sector_size: u32, page_size: u32) -> Self {
        JournalHeader {
            magic: JOURNAL_MAGIC,
            page_count: JOURNAL_PAGE_COUNT_UNKNOWN,
            nonce,
            initial_pages,
            sector_size,
            page_size,
        }
    }

    /// Parse a journal header from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < JOURNAL_HEADER_SIZE {
            return Err(Error::new(ErrorCode::Corrupt));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);

        if magic != JOURNAL_MAGIC {
            return Err(Error::new(ErrorCode::Corrupt));
        }

        Ok(JournalHeader {
            magic,
            page_count: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            nonce: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            initial_pages: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
            sector_size: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
            page_size: u32::from_be_bytes([data[24], data[25], data[26], data[27]]),
        })
    }

    /// Serialize journal header to bytes
    pub fn to_bytes(&self) -> [u8; JOURNAL_HEADER_SIZE] {
        let mut buf = [0u8; JOURNAL_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..12].copy_from_slice(&self.page_count.to_be_bytes());
        buf[12..16].copy_from_slice(&self.nonce.to_be_bytes());
        buf[16..20].copy_from_slice(&self.initial_pages.to_be_bytes());
        buf[20..24].copy_from_slice(&self.sector_size.to_be_bytes());
        buf[24..28].copy_from_slice(&self.page_size.to_be_bytes());
        buf
    }
}

// ============================================================================
// Pager
// ============================================================================

/// Main pager object managing a database file
pub struct Pager {
    vfs: Arc<dyn Vfs>,

    /// Database file handle
    pub fd: Option<Box<dyn VfsFile>>,
    /// Main rollback journal file handle
    pub jfd: Option<Box<dyn VfsFile>>,
    /// Sub-journal (savepoint) file handle
    pub sjfd: Option<Box<dyn VfsFile>>,

    /// Database file path
    pub db_path: String,
    /// Journal file path
    pub journal_path: String,

    /// Current pager state
    pub state: PagerState,
    /// Current lock level
    pub lock: LockType,
    /// Journal mode
    pub journal_mode: JournalMode,
    /// Locking mode
    pub locking_mode: LockingMode,
    /// Error code if in error state
    pub err_code: ErrorCode,
    /// Whether the change counter has already been bumped for the current
    /// EXCLUSIVE lock hold. Only consulted in `LockingMode::Exclusive`: once
    /// set, further commits under the same lock skip the bump (nobody else
    /// can observe the file between them, so re-bumping would just waste a
    /// write). Reset whenever EXCLUSIVE is freshly acquired.
    pub change_count_done: bool,

    /// Database page size
    pub page_size: u32,
    /// Usable bytes per page (page_size - reserved)
    pub usable_size: u32,
    /// Database size in pages
    pub db_size: Pgno,
    /// Original database size (at transaction start)
    pub db_orig_size: Pgno,
    /// Actual file size in pages
    pub db_file_size: Pgno,
    /// Maximum allowed page count
    pub max_page_count: Pgno,

    /// The page cache
    pub cache: PCache,
    /// Page cache size (in pages)
    pub cache_size: i32,
    /// Spill size threshold
    pub spill_size: i32,
    /// Memory-mapped I/O limit
    pub mmap_limit: i64,

    /// Current position in journal
    pub journal_offset: i64,
    /// Start of current journal header
    pub journal_header: i64,
    /// Records in current journal segment
    pub n_rec: u32,
    /// Journal size limit
    pub journal_size_limit: i64,
    /// Total records appended to the sub-journal so far
    pub sub_journal_n_rec: u32,

    /// Pages read from disk
    pub n_read: u32,
    /// Pages written to disk
    pub n_write: u32,
    /// Cache hits
    pub n_hit: u32,
    /// Cache misses
    pub n_miss: u32,

    /// Pager flags (sync mode, etc.)
    pub flags: PagerFlags,
    /// Is this a temp database
    pub temp_file: bool,
    /// Is this an in-memory database
    pub mem_db: bool,
    /// Read-only database
    pub read_only: bool,
    /// Disable syncs (unsafe)
    pub no_sync: bool,

    /// Active savepoints
    pub savepoints: Vec<Savepoint>,

    /// Temporary buffer for page operations
    pub tmp_space: Vec<u8>,

    /// WAL connection. `Some` only while `journal_mode == JournalMode::Wal`
    /// and the log file has been opened (lazily, on first reader or writer).
    pub wal: Option<Wal>,
}

impl Pager {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open a pager on a database file.
    pub fn open(
        vfs: Arc<dyn Vfs>,
        path: &str,
        flags: PagerOpenFlags,
        vfs_flags: OpenFlags,
    ) -> Result<Self> {
        let journal_path = format!("{}-journal", path);
        let mem_db = flags.contains(PagerOpenFlags::MEMORY);

        let fd = if mem_db {
            None
        } else {
            Some(vfs.open(Some(path), vfs_flags | OpenFlags::MAIN_DB)?)
        };

        let read_only = vfs_flags.contains(OpenFlags::READONLY);
        let journal_mode = if flags.contains(PagerOpenFlags::OMIT_JOURNAL) {
            JournalMode::Off
        } else {
            JournalMode::Delete
        };

        Ok(Pager {
            vfs,
            fd,
            jfd: None,
            sjfd: None,
            db_path: path.to_string(),
            journal_path,
            state: PagerState::Open,
            lock: LockType::None,
            journal_mode,
            locking_mode: LockingMode::Normal,
            err_code: ErrorCode::Ok,
            change_count_done: false,
            page_size: DEFAULT_PAGE_SIZE,
            usable_size: DEFAULT_PAGE_SIZE,
            db_size: 0,
            db_orig_size: 0,
            db_file_size: 0,
            max_page_count: 0xFFFF_FFFF,
            cache: PCache::open(DEFAULT_PAGE_SIZE as usize, 0, !mem_db, None),
            cache_size: 2000,
            spill_size: 1,
            mmap_limit: 0,
            journal_offset: 0,
            journal_header: 0,
            n_rec: 0,
            journal_size_limit: DEFAULT_JOURNAL_SIZE_LIMIT,
            sub_journal_n_rec: 0,
            n_read: 0,
            n_write: 0,
            n_hit: 0,
            n_miss: 0,
            flags: PagerFlags::SYNCHRONOUS_FULL,
            temp_file: false,
            mem_db,
            read_only,
            no_sync: false,
            savepoints: Vec::new(),
            tmp_space: vec![0u8; DEFAULT_PAGE_SIZE as usize],
            wal: None,
        })
    }

    /// Close the pager and release resources
    pub fn close(&mut self) -> Result<()> {
        if self.state >= PagerState::WriterLocked {
            let _ = self.rollback();
        }
        let _ = self.unlock(LockType::None);

        if let Some(mut wal) = self.wal.take() {
            let _ = wal.close();
        }

        self.cache.close();
        self.fd = None;
        self.jfd = None;
        self.sjfd = None;
        self.state = PagerState::Open;
        self.change_count_done = false;
        Ok(())
    }

    /// Read the database file header
    pub fn read_file_header(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Some(ref fd) = self.fd {
            let n = fd.read(buf, 0)?;
            if n < buf.len() {
                buf[n..].fill(0);
            }
        } else {
            buf.fill(0);
        }
        Ok(())
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Set the page size
    pub fn set_page_size(&mut self, page_size: u32, reserve: i32) -> Result<()> {
        if page_size < MIN_PAGE_SIZE || page_size > MAX_PAGE_SIZE {
            return Err(Error::new(ErrorCode::Misuse));
        }
        if !page_size.is_power_of_two() {
            return Err(Error::new(ErrorCode::Misuse));
        }
        if self.state != PagerState::Open {
            return Err(Error::new(ErrorCode::Misuse));
        }

        self.page_size = page_size;
        let reserve = reserve.max(0) as u32;
        self.usable_size = page_size - reserve.min(page_size - 480);
        self.tmp_space = vec![0u8; page_size as usize];
        self.cache = PCache::open(page_size as usize, 0, !self.mem_db, None);
        self.cache.set_cache_size(self.cache_size);

        Ok(())
    }

    pub fn get_page_size(&self) -> u32 {
        self.page_size
    }

    pub fn set_max_page_count(&mut self, max: Pgno) -> Pgno {
        if max > 0 {
            self.max_page_count = max;
        }
        self.max_page_count
    }

    pub fn set_cache_size(&mut self, size: i32) {
        self.cache_size = size;
        self.cache.set_cache_size(size);
    }

    pub fn set_spill_size(&mut self, size: i32) -> i32 {
        let old = self.spill_size;
        if size >= 0 {
            self.spill_size = size;
            self.cache.set_spill_size(size);
        }
        old
    }

    pub fn set_mmap_limit(&mut self, limit: i64) {
        self.mmap_limit = limit;
    }

    pub fn set_flags(&mut self, flags: PagerFlags) {
        self.no_sync = flags.intersects(PagerFlags::SYNCHRONOUS_OFF);
        self.flags = flags;
    }

    pub fn locking_mode(&mut self, mode: Option<LockingMode>) -> LockingMode {
        if let Some(m) = mode {
            self.locking_mode = m;
        }
        self.locking_mode
    }

    pub fn set_journal_mode(&mut self, mode: JournalMode) -> Result<JournalMode> {
        if self.state >= PagerState::WriterLocked {
            return Ok(self.journal_mode);
        }
        self.journal_mode = mode;
        Ok(mode)
    }

    pub fn get_journal_mode(&self) -> JournalMode {
        self.journal_mode
    }

    pub fn set_journal_size_limit(&mut self, limit: i64) -> i64 {
        if limit >= -1 {
            self.journal_size_limit = limit;
        }
        self.journal_size_limit
    }

    // ========================================================================
    // Page Acquisition
    // ========================================================================

    /// Get a page, reading from disk on a cache miss.
    pub fn get(&mut self, pgno: Pgno, flags: PagerGetFlags) -> Result<NonNull<PgHdr>> {
        if pgno == 0 {
            return Err(Error::new(ErrorCode::Corrupt));
        }
        if pgno > self.max_page_count {
            return Err(Error::new(ErrorCode::Full));
        }
        if self.state < PagerState::Reader {
            self.shared_lock()?;
        }

        if let Some(page) = self.cache.fetch(pgno, CreateFlag::None) {
            self.n_hit += 1;
            return Ok(page);
        }

        let mut page = match self.cache.fetch(pgno, CreateFlag::IfSpare) {
            Some(page) => page,
            None => {
                // Every resident page is pinned or dirty: spill the oldest
                // synced dirty page to make room, retrying until one fetch
                // succeeds or there's nothing left to spill.
                let mut retried = None;
                while self.spill_one()? {
                    if let Some(page) = self.cache.fetch(pgno, CreateFlag::IfSpare) {
                        retried = Some(page);
                        break;
                    }
                }
                match retried {
                    Some(page) => page,
                    None => self
                        .cache
                        .fetch(pgno, CreateFlag::Force)
                        .ok_or_else(|| Error::new(ErrorCode::NoMem))?,
                }
            }
        };
        self.n_miss += 1;

        if !flags.contains(PagerGetFlags::NOCONTENT) {
            let wal_frame = match self.wal {
                Some(ref wal) => wal.find_frame(pgno).unwrap_or(0),
                None => 0,
            };
            if wal_frame != 0 {
                let wal = self.wal.as_mut().unwrap();
                unsafe {
                    wal.read_frame(wal_frame, &mut page.as_mut().data)?;
                }
                self.n_read += 1;
            } else if let Some(ref fd) = self.fd {
                let offset = ((pgno - 1) as i64) * self.page_size as i64;
                let n = unsafe { fd.read(&mut page.as_mut().data, offset)? };
                unsafe {
                    let buf = &mut page.as_mut().data;
                    if n < buf.len() {
                        buf[n..].fill(0);
                    }
                }
                self.n_read += 1;
            }
        }

        Ok(page)
    }

    /// Get a page only if it's already cached, without pinning a fresh one.
    pub fn lookup(&mut self, pgno: Pgno) -> Option<NonNull<PgHdr>> {
        self.cache.fetch(pgno, CreateFlag::None)
    }

    /// Release a page reference.
    pub fn release(&mut self, page: NonNull<PgHdr>) {
        self.cache.release(page);
    }

    /// Mark a page as writeable, journalling its pre-image first.
    pub fn write(&mut self, mut page: NonNull<PgHdr>) -> Result<()> {
        if self.read_only {
            return Err(Error::new(ErrorCode::ReadOnly));
        }
        if self.state < PagerState::WriterLocked {
            self.begin(false)?;
        }

        let (pgno, already_writeable) = unsafe {
            let p = page.as_ref();
            (p.pgno, p.flags.contains(PgFlags::WRITEABLE))
        };

        // A page already written once this transaction can still need a
        // fresh pre-image for a savepoint opened since: that gate lives on
        // each savepoint's own bitvector, not on `already_writeable`.
        if !self.savepoints.is_empty() {
            let data_copy = unsafe { page.as_ref().data.clone() };
            self.journal_savepoints(pgno, &data_copy)?;
        }

        if !already_writeable {
            // WAL mode never overwrites a page in place, so there is no
            // pre-image to protect with a rollback-journal record.
            if self.journal_mode != JournalMode::Wal {
                self.open_journal()?;
                let data_copy = unsafe { page.as_ref().data.clone() };
                self.journal_page(pgno, &data_copy)?;
                if self.jfd.is_some() {
                    unsafe {
                        page.as_mut().flags.insert(PgFlags::NEED_SYNC);
                    }
                }
            }

            unsafe {
                page.as_mut().flags.insert(PgFlags::WRITEABLE);
            }
            self.cache.make_dirty(page);

            if pgno > self.db_size {
                self.db_size = pgno;
            }
            if self.state < PagerState::WriterCacheMod {
                self.state = PagerState::WriterCacheMod;
            }
        }

        Ok(())
    }

    /// Mark a page as "do not write" (excluded from the next commit).
    pub fn dont_write(&mut self, mut page: NonNull<PgHdr>) {
        unsafe {
            page.as_mut().flags.insert(PgFlags::DONT_WRITE);
        }
    }

    // ========================================================================
    // Transaction Control
    // ========================================================================

    /// Opens (or reopens) the WAL connection the first time it's needed,
    /// replaying any frames a previous writer left behind.
    fn open_wal_if_needed(&mut self) -> Result<()> {
        if self.wal.is_some() || self.mem_db {
            return Ok(());
        }
        let mut wal = Wal::open(self.vfs.clone(), &self.db_path, self.page_size)?;
        wal.recover()?;
        self.wal = Some(wal);
        Ok(())
    }

    /// Acquire a shared lock, detecting and recovering a hot journal first.
    pub fn shared_lock(&mut self) -> Result<()> {
        if self.state >= PagerState::Reader {
            return Ok(());
        }

        self.lock(LockType::Shared)?;

        if self.journal_mode == JournalMode::Wal {
            self.open_wal_if_needed()?;
            if let Some(wal) = self.wal.as_mut() {
                wal.begin_read_transaction()?;
            }
        } else if self.has_hot_journal()? {
            warn!(path = %self.db_path, "hot journal detected, recovering");
            self.lock(LockType::Exclusive)?;
            self.recover_from_hot_journal()?;
            self.unlock(LockType::Shared)?;
        }

        if let Some(ref fd) = self.fd {
            let size = fd.file_size()?;
            self.db_file_size = (size / self.page_size as i64) as Pgno;
        }

        self.db_size = match self.wal {
            Some(ref wal) if !wal.is_empty() => wal.db_size(),
            _ => self.db_file_size,
        };

        self.state = PagerState::Reader;
        Ok(())
    }

    /// Begin a write transaction, acquiring the RESERVED lock (rollback
    /// journal mode) or the WAL write lock (WAL mode).
    pub fn begin(&mut self, exclusive: bool) -> Result<()> {
        if self.state >= PagerState::WriterLocked {
            if exclusive && self.journal_mode != JournalMode::Wal {
                self.lock(LockType::Exclusive)?;
            }
            return Ok(());
        }

        if self.state < PagerState::Reader {
            self.shared_lock()?;
        }
        if self.read_only {
            return Err(Error::new(ErrorCode::ReadOnly));
        }

        if self.journal_mode == JournalMode::Wal {
            self.open_wal_if_needed()?;
            self.wal
                .as_mut()
                .ok_or_else(|| Error::new(ErrorCode::IoErr))?
                .begin_write_transaction()?;
        } else {
            self.lock(LockType::Reserved)?;
        }
        self.db_orig_size = self.db_size;
        self.state = PagerState::WriterLocked;
        debug!(path = %self.db_path, db_size = self.db_size, "write transaction started");

        if exclusive && self.journal_mode != JournalMode::Wal {
            self.lock(LockType::Exclusive)?;
        }

        Ok(())
    }

    /// Commit phase one: bump the change counter, then either append frames
    /// to the WAL or sync the journal and write every dirty page back to the
    /// database file.
    pub fn commit_phase_one(&mut self, _super_journal: Option<&str>) -> Result<()> {
        if self.state < PagerState::WriterCacheMod {
            return Ok(());
        }

        if self.journal_mode != JournalMode::Wal {
            self.lock(LockType::Exclusive)?;
        }

        if self.db_size > 0
            && (self.locking_mode != LockingMode::Exclusive || !self.change_count_done)
        {
            self.bump_change_counter()?;
        }

        if self.journal_mode == JournalMode::Wal {
            self.commit_wal_frames()?;
            self.state = PagerState::WriterFinished;
            return Ok(());
        }

        if let Some(ref jfd) = self.jfd {
            jfd.sync(self.sync_flags())?;
        }

        self.state = PagerState::WriterDbMod;

        self.write_dirty_pages()?;

        if let Some(ref fd) = self.fd {
            fd.truncate((self.db_size as i64) * self.page_size as i64)?;
            if !self.no_sync {
                fd.sync(self.sync_flags())?;
            }
        }

        self.state = PagerState::WriterFinished;
        Ok(())
    }

    /// Appends every dirty page as a WAL frame, the last one marked as the
    /// commit frame, and marks the cache clean.
    fn commit_wal_frames(&mut self) -> Result<()> {
        let mut pages: Vec<(Pgno, Vec<u8>)> = Vec::new();
        let mut current = self.cache.dirty_list();
        while let Some(page) = current {
            unsafe {
                let p = page.as_ref();
                if !p.flags.contains(PgFlags::DONT_WRITE) {
                    pages.push((p.pgno, p.data.clone()));
                }
                current = p.dirty_next;
            }
        }

        let refs: Vec<(Pgno, &[u8])> =
            pages.iter().map(|(pgno, data)| (*pgno, data.as_slice())).collect();
        let page_size = self.page_size;
        let db_size = self.db_size;
        let sync_flags = self.sync_flags();
        let wal = self
            .wal
            .as_mut()
            .ok_or_else(|| Error::new(ErrorCode::IoErr))?;
        wal.begin_write_transaction().ok();
        wal.write_frames(page_size, &refs, db_size, true, sync_flags)?;

        self.cache.clean_all();
        self.n_write += pages.len() as u32;
        Ok(())
    }

    /// Commit phase two: finalize the journal (or end the WAL write
    /// transaction) and drop back to a reader.
    pub fn commit_phase_two(&mut self) -> Result<()> {
        if self.state < PagerState::WriterFinished {
            return Ok(());
        }

        if self.journal_mode == JournalMode::Wal {
            if let Some(wal) = self.wal.as_mut() {
                wal.end_write_transaction()?;
            }
        } else {
            self.end_journal()?;
        }
        self.cache.clear_writable();
        self.savepoints.clear();
        self.sub_journal_n_rec = 0;

        if self.locking_mode == LockingMode::Normal {
            self.unlock(LockType::Shared)?;
        }
        self.state = PagerState::Reader;

        debug!(path = %self.db_path, "transaction committed");
        Ok(())
    }

    /// Roll back the current transaction, restoring the database from the
    /// rollback journal (or discarding unflushed dirty pages in WAL mode,
    /// where nothing was ever written past the cache).
    pub fn rollback(&mut self) -> Result<()> {
        if self.state < PagerState::WriterLocked {
            return Ok(());
        }

        if self.journal_mode == JournalMode::Wal {
            self.cache.discard_all_dirty();
            if let Some(wal) = self.wal.as_mut() {
                wal.undo(|_| Ok(()))?;
                wal.end_write_transaction()?;
            }
        } else if self.jfd.is_some() {
            self.playback_journal()?;
        } else {
            self.cache.clean_all();
        }

        self.db_size = self.db_orig_size;
        self.cache.clear_writable();
        self.savepoints.clear();
        self.sub_journal_n_rec = 0;

        if self.journal_mode != JournalMode::Wal {
            self.end_journal()?;
        }

        if self.locking_mode == LockingMode::Normal {
            self.unlock(LockType::Shared)?;
        }
        self.state = PagerState::Reader;

        warn!(path = %self.db_path, "transaction rolled back");
        Ok(())
    }

    /// Checkpoints the WAL into the main database file. A no-op outside WAL
    /// mode. Returns `(frames in log, frames backfilled)`.
    pub fn checkpoint(&mut self, mode: CheckpointMode) -> Result<(i32, i32)> {
        if self.journal_mode != JournalMode::Wal {
            return Ok((0, 0));
        }
        let fd = self
            .fd
            .as_deref_mut()
            .ok_or_else(|| Error::new(ErrorCode::IoErr))?;
        let wal = self
            .wal
            .as_mut()
            .ok_or_else(|| Error::new(ErrorCode::IoErr))?;
        wal.checkpoint(fd, mode, None)
    }

    /// Sync the database file to disk.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(ref fd) = self.fd {
            fd.sync(self.sync_flags())?;
        }
        Ok(())
    }

    fn sync_flags(&self) -> SyncFlags {
        if self.flags.contains(PagerFlags::FULLFSYNC) {
            SyncFlags::FULL
        } else {
            SyncFlags::NORMAL
        }
    }

    fn write_dirty_pages(&mut self) -> Result<()> {
        let mut current = self.cache.dirty_list();
        while let Some(page) = current {
            unsafe {
                let p = page.as_ref();
                if !p.flags.contains(PgFlags::DONT_WRITE) {
                    if let Some(ref fd) = self.fd {
                        let offset = ((p.pgno - 1) as i64) * self.page_size as i64;
                        fd.write(&p.data, offset)?;
                        self.n_write += 1;
                    }
                }
            }
            let next = unsafe { page.as_ref().dirty_next };
            self.cache.make_clean(page);
            current = next;
        }
        Ok(())
    }

    /// Flushes the oldest synced dirty page to the database file to free a
    /// cache slot, returning whether a page was actually flushed.
    ///
    /// Mirrors the pluggable cache's stress callback without registering one:
    /// [`PCache::fetch`] already retries once a page is made clean, so the
    /// caller just needs something that turns a dirty entry clean. In WAL
    /// mode there is nothing to spill this way (pages only ever leave the
    /// cache via a WAL frame write at commit), so it's a no-op there.
    fn spill_one(&mut self) -> Result<bool> {
        if self.journal_mode == JournalMode::Wal || self.mem_db {
            return Ok(false);
        }
        let Some(victim) = self.cache.synced_page() else {
            return Ok(false);
        };

        // The victim's pre-image (and everything journalled before it) must
        // hit disk before the page itself may overwrite the database file.
        if unsafe { victim.as_ref().flags.contains(PgFlags::NEED_SYNC) } {
            if let Some(ref jfd) = self.jfd {
                jfd.sync(self.sync_flags())?;
            }
            let mut current = self.cache.dirty_list();
            while let Some(mut page) = current {
                unsafe {
                    page.as_mut().flags.remove(PgFlags::NEED_SYNC);
                    current = page.as_ref().dirty_next;
                }
            }
        }

        let (pgno, data) = unsafe {
            let p = victim.as_ref();
            (p.pgno, p.data.clone())
        };
        if unsafe { !victim.as_ref().flags.contains(PgFlags::DONT_WRITE) } {
            if let Some(ref fd) = self.fd {
                let offset = ((pgno - 1) as i64) * self.page_size as i64;
                fd.write(&data, offset)?;
                self.n_write += 1;
            }
        }
        self.cache.make_clean(victim);
        Ok(true)
    }

    /// Increments the 4-byte big-endian change counter at bytes 24..28 of
    /// page 1, journalling its old value like any other write.
    fn bump_change_counter(&mut self) -> Result<()> {
        let mut page = self.get(1, PagerGetFlags::empty())?;
        self.write(page)?;
        unsafe {
            let data = &mut page.as_mut().data;
            if data.len() >= 28 {
                let current = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);
                data[24..28].copy_from_slice(&current.wrapping_add(1).to_be_bytes());
            }
        }
        self.release(page);
        self.change_count_done = true;
        Ok(())
    }

    // ========================================================================
    // Savepoint Operations
    // ========================================================================

    /// Open new savepoints up to the given count.
    pub fn open_savepoint(&mut self, n: i32) -> Result<()> {
        while self.savepoints.len() < n as usize {
            let savepoint = Savepoint::new(self.sub_journal_n_rec, self.db_size);
            self.savepoints.push(savepoint);
        }
        Ok(())
    }

    /// Savepoint operation.
    pub fn savepoint(&mut self, op: SavepointOp, index: i32) -> Result<()> {
        let idx = index as usize;

        match op {
            SavepointOp::Release => {
                if idx < self.savepoints.len() {
                    self.savepoints.truncate(idx);
                }
            }
            SavepointOp::Rollback => {
                if idx < self.savepoints.len() {
                    let sub_rec_start = self.savepoints[idx].sub_rec_start;
                    let orig_db_size = self.savepoints[idx].orig_db_size;
                    self.playback_savepoint(sub_rec_start)?;
                    self.db_size = orig_db_size;
                    self.savepoints.truncate(idx + 1);
                }
            }
            SavepointOp::Begin => {
                self.open_savepoint(index + 1)?;
            }
        }

        Ok(())
    }

    // ========================================================================
    // Lock Management
    // ========================================================================

    fn lock(&mut self, level: LockType) -> Result<()> {
        if level <= self.lock {
            return Ok(());
        }
        let fresh_exclusive = level == LockType::Exclusive && self.lock < LockType::Exclusive;
        if let Some(ref fd) = self.fd {
            if let Err(e) = fd.lock(level) {
                self.state = PagerState::Error;
                self.err_code = e.code;
                return Err(e);
            }
        }
        self.lock = level;
        if fresh_exclusive {
            self.change_count_done = false;
        }
        Ok(())
    }

    /// Releases the lock down to `level`. A failed unlock enters the
    /// `Unknown` lock state rather than guessing at the true OS-held level.
    fn unlock(&mut self, level: LockType) -> Result<()> {
        if level >= self.lock {
            return Ok(());
        }
        if let Some(ref fd) = self.fd {
            if let Err(e) = fd.unlock(level) {
                self.lock = LockType::Unknown;
                self.state = PagerState::Error;
                self.err_code = e.code;
                return Err(e);
            }
        }
        self.lock = level;
        Ok(())
    }

    pub fn exclusive_lock(&mut self) -> Result<()> {
        self.lock(LockType::Exclusive)
    }

    fn sector_size(&self) -> u32 {
        self.fd.as_ref().map(|f| f.sector_size() as u32).unwrap_or(512)
    }

    // ========================================================================
    // Journal Operations
    // ========================================================================

    fn has_hot_journal(&self) -> Result<bool> {
        if self.journal_mode == JournalMode::Off || self.mem_db || self.read_only {
            return Ok(false);
        }
        if !self.vfs.access(&self.journal_path, AccessFlags::EXISTS)? {
            return Ok(false);
        }
        if let Some(ref fd) = self.fd {
            if fd.check_reserved_lock()? {
                // Another connection holds RESERVED/EXCLUSIVE: it's mid-write,
                // not an abandoned journal from a crash.
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn recover_from_hot_journal(&mut self) -> Result<()> {
        let jfd = self
            .vfs
            .open(Some(&self.journal_path), OpenFlags::READWRITE | OpenFlags::MAIN_JOURNAL)?;
        self.jfd = Some(jfd);
        self.playback_journal()?;
        self.end_journal()?;
        Ok(())
    }

    fn open_journal(&mut self) -> Result<()> {
        if self.jfd.is_some() {
            return Ok(());
        }
        if self.journal_mode == JournalMode::Off || self.mem_db {
            return Ok(());
        }

        let open_flags = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_JOURNAL;
        let jfd = self.vfs.open(Some(&self.journal_path), open_flags)?;

        let mut nonce_buf = [0u8; 4];
        self.vfs.randomness(&mut nonce_buf);
        let nonce = u32::from_be_bytes(nonce_buf);

        let header = JournalHeader::new(nonce, self.db_orig_size, self.sector_size(), self.page_size);
        jfd.write(&header.to_bytes(), 0)?;

        self.jfd = Some(jfd);
        self.journal_offset = JOURNAL_HEADER_SIZE as i64;
        self.journal_header = 0;
        self.n_rec = 0;
        Ok(())
    }

    fn journal_page(&mut self, pgno: Pgno, data: &[u8]) -> Result<()> {
        if self.journal_mode == JournalMode::Off || self.jfd.is_none() {
            return Ok(());
        }
        if pgno > self.db_orig_size {
            // Page didn't exist before this transaction; rollback just
            // truncates the file back, nothing to protect here.
            return Ok(());
        }

        let checksum = Self::checksum_data(data);
        if let Some(ref jfd) = self.jfd {
            jfd.write(&pgno.to_be_bytes(), self.journal_offset)?;
            jfd.write(data, self.journal_offset + 4)?;
            jfd.write(&checksum.to_be_bytes(), self.journal_offset + 4 + data.len() as i64)?;
        }
        self.journal_offset += 4 + data.len() as i64 + 4;
        self.n_rec += 1;
        Ok(())
    }

    fn journal_savepoints(&mut self, pgno: Pgno, data: &[u8]) -> Result<()> {
        if self.savepoints.is_empty() {
            return Ok(());
        }

        let mut needs_record = false;
        for sp in self.savepoints.iter_mut() {
            if pgno == 0 || pgno > sp.orig_db_size {
                continue;
            }
            let idx = (pgno - 1) as usize;
            if !sp.bitvec.get(idx) {
                sp.bitvec.set(idx, true);
                needs_record = true;
            }
        }
        if !needs_record {
            return Ok(());
        }

        if self.sjfd.is_none() {
            let sjfd = self
                .vfs
                .open(None, OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::SUBJOURNAL)?;
            self.sjfd = Some(sjfd);
        }

        let record_size = 4 + self.page_size as i64 + 4;
        let offset = self.sub_journal_n_rec as i64 * record_size;
        let checksum = Self::checksum_data(data);
        if let Some(ref sjfd) = self.sjfd {
            sjfd.write(&pgno.to_be_bytes(), offset)?;
            sjfd.write(data, offset + 4)?;
            sjfd.write(&checksum.to_be_bytes(), offset + 4 + data.len() as i64)?;
        }
        self.sub_journal_n_rec += 1;

        Ok(())
    }

    fn end_journal(&mut self) -> Result<()> {
        match self.journal_mode {
            JournalMode::Delete => {
                self.jfd = None;
                if self.vfs.access(&self.journal_path, AccessFlags::EXISTS).unwrap_or(false) {
                    self.vfs.delete(&self.journal_path, !self.no_sync)?;
                }
            }
            JournalMode::Truncate => {
                if let Some(ref jfd) = self.jfd {
                    jfd.truncate(0)?;
                }
            }
            JournalMode::Persist => {
                if let Some(ref jfd) = self.jfd {
                    let zeros = [0u8; JOURNAL_HEADER_SIZE];
                    jfd.write(&zeros, 0)?;
                }
            }
            JournalMode::Memory | JournalMode::Off => {}
            JournalMode::Wal => {}
        }

        self.journal_offset = 0;
        self.journal_header = 0;
        self.n_rec = 0;
        Ok(())
    }

    /// Replays the rollback journal directly onto the database file,
    /// tolerating a torn tail: the first record that fails its checksum (or
    /// a short read) ends recovery without being an error.
    fn playback_journal(&mut self) -> Result<()> {
        let Some(jfd) = self.jfd.as_ref() else {
            self.db_size = self.db_orig_size;
            return Ok(());
        };

        let mut hdr_buf = [0u8; JOURNAL_HEADER_SIZE];
        if jfd.read(&mut hdr_buf, 0).is_err() {
            self.db_size = self.db_orig_size;
            return Ok(());
        }
        let header = match JournalHeader::from_bytes(&hdr_buf) {
            Ok(h) => h,
            Err(_) => {
                self.db_size = self.db_orig_size;
                return Ok(());
            }
        };

        let record_size = 4 + self.page_size as usize + 4;
        let mut offset = JOURNAL_HEADER_SIZE as i64;

        loop {
            let mut rec = vec![0u8; record_size];
            let n = self.jfd.as_ref().unwrap().read(&mut rec, offset).unwrap_or(0);
            if n < record_size {
                break;
            }
            let pgno = u32::from_be_bytes([rec[0], rec[1], rec[2], rec[3]]);
            let data = &rec[4..4 + self.page_size as usize];
            let checksum = u32::from_be_bytes([
                rec[record_size - 4],
                rec[record_size - 3],
                rec[record_size - 2],
                rec[record_size - 1],
            ]);
            if Self::checksum_data(data) != checksum {
                break;
            }

            if let Some(ref fd) = self.fd {
                let db_offset = ((pgno - 1) as i64) * self.page_size as i64;
                fd.write(data, db_offset)?;
            }
            if let Some(mut cached) = self.cache.fetch(pgno, CreateFlag::None) {
                unsafe {
                    cached.as_mut().data.copy_from_slice(data);
                }
                self.cache.make_clean(cached);
                self.cache.release(cached);
            }

            offset += record_size as i64;
        }

        self.db_size = header.initial_pages;
        if let Some(ref fd) = self.fd {
            fd.truncate((self.db_size as i64) * self.page_size as i64)?;
            fd.sync(self.sync_flags())?;
        }
        Ok(())
    }

    /// Replays sub-journal records back to (but not including) `from_rec`,
    /// restoring cached page content for an in-progress transaction.
    fn playback_savepoint(&mut self, from_rec: u32) -> Result<()> {
        if self.sjfd.is_none() {
            self.sub_journal_n_rec = from_rec;
            return Ok(());
        }

        let record_size = 4 + self.page_size as i64 + 4;
        let mut rec_index = self.sub_journal_n_rec;
        while rec_index > from_rec {
            rec_index -= 1;
            let offset = rec_index as i64 * record_size;
            let mut rec = vec![0u8; record_size as usize];
            let n = self.sjfd.as_ref().unwrap().read(&mut rec, offset)?;
            if (n as i64) < record_size {
                continue;
            }
            let pgno = u32::from_be_bytes([rec[0], rec[1], rec[2], rec[3]]);
            let data_len = self.page_size as usize;
            let data = &rec[4..4 + data_len];
            let checksum = u32::from_be_bytes([
                rec[4 + data_len],
                rec[4 + data_len + 1],
                rec[4 + data_len + 2],
                rec[4 + data_len + 3],
            ]);
            if Self::checksum_data(data) != checksum {
                continue;
            }

            if let Some(mut cached) = self.cache.fetch(pgno, CreateFlag::None) {
                unsafe {
                    cached.as_mut().data.copy_from_slice(data);
                }
                self.cache.release(cached);
            }
        }

        self.sub_journal_n_rec = from_rec;
        if let Some(ref sjfd) = self.sjfd {
            sjfd.truncate(from_rec as i64 * record_size)?;
        }
        Ok(())
    }

    /// Opaque integrity check for journal records. The exact algorithm
    /// isn't load-bearing for interoperability: only this pager ever reads
    /// its own journals.
    fn checksum_data(data: &[u8]) -> u32 {
        let mut sum: u32 = 0;
        for (i, &byte) in data.iter().enumerate() {
            sum = sum.wrapping_add((byte as u32) << ((i & 3) * 8));
        }
        sum
    }

    // ========================================================================
    // Query Functions
    // ========================================================================

    pub fn is_readonly(&self) -> bool {
        self.read_only
    }

    pub fn is_memdb(&self) -> bool {
        self.mem_db
    }

    pub fn filename(&self) -> &str {
        &self.db_path
    }

    pub fn journal_name(&self) -> &str {
        &self.journal_path
    }

    pub fn page_count(&self) -> Pgno {
        self.db_size
    }

    pub fn temp_space(&mut self) -> &mut [u8] {
        &mut self.tmp_space
    }

    pub fn refcount(&self) -> i64 {
        self.cache.ref_count()
    }

    pub fn mem_used(&self) -> i32 {
        (self.page_size as i32) * self.cache.page_count()
    }

    /// Truncates the database image to `pgno` pages, discarding any cached
    /// pages beyond it.
    pub fn truncate_image(&mut self, pgno: Pgno) {
        if pgno < self.db_size {
            self.db_size = pgno;
            self.cache.truncate(pgno + 1);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::mem_vfs::MemVfs;

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
    fn test_journal_mode() {
        assert!(JournalMode::Wal.is_wal());
        assert!(!JournalMode::Delete.is_wal());
        assert!(!JournalMode::Persist.is_wal());
    }

    #[test]
    fn test_pager_state_ordering() {
        assert!(PagerState::Open < PagerState::Reader);
        assert!(PagerState::Reader < PagerState::WriterLocked);
        assert!(PagerState::WriterLocked < PagerState::WriterCacheMod);
        assert!(PagerState::WriterCacheMod < PagerState::WriterDbMod);
        assert!(PagerState::WriterDbMod < PagerState::WriterFinished);
    }

    #[test]
    fn test_journal_header_roundtrip() {
        let header = JournalHeader::new(0xdead_beef, 50, 512, 4096);
        let bytes = header.to_bytes();
        let parsed = JournalHeader::from_bytes(&bytes).unwrap();

        assert_eq!(header.nonce, parsed.nonce);
        assert_eq!(header.initial_pages, parsed.initial_pages);
        assert_eq!(header.sector_size, parsed.sector_size);
        assert_eq!(header.page_size, parsed.page_size);
    }

    #[test]
    fn test_pg_flags() {
        let mut flags = PgFlags::CLEAN;
        assert!(!flags.contains(PgFlags::DIRTY));

        flags.insert(PgFlags::DIRTY);
        assert!(flags.contains(PgFlags::DIRTY));

        flags.insert(PgFlags::WRITEABLE);
        assert!(flags.contains(PgFlags::DIRTY));
        assert!(flags.contains(PgFlags::WRITEABLE));
    }

    #[test]
    fn write_then_commit_persists_to_disk() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());
        let mut pager = open_pager(vfs.clone(), "test.db");

        pager.set_page_size(1024, 0).unwrap();
        pager.begin(false).unwrap();
        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        pager.write(page).unwrap();
        unsafe {
            (*page.as_ptr()).data[0..5].copy_from_slice(b"hello");
        }
        pager.release(page);

        pager.commit_phase_one(None).unwrap();
        pager.commit_phase_two().unwrap();

        assert_eq!(pager.state, PagerState::Reader);

        // Reopen and verify persisted content.
        let mut pager2 = open_pager(vfs, "test.db");
        pager2.set_page_size(1024, 0).unwrap();
        let page2 = pager2.get(1, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page2.as_ref().data[0..5], b"hello");
        }
        pager2.release(page2);
    }

    #[test]
    fn rollback_restores_original_content() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());
        let mut pager = open_pager(vfs.clone(), "rb.db");
        pager.set_page_size(1024, 0).unwrap();

        pager.begin(false).unwrap();
        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        pager.write(page).unwrap();
        unsafe {
            (*page.as_ptr()).data[0..3].copy_from_slice(b"AAA");
        }
        pager.release(page);
        pager.commit_phase_one(None).unwrap();
        pager.commit_phase_two().unwrap();

        pager.begin(false).unwrap();
        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        pager.write(page).unwrap();
        unsafe {
            (*page.as_ptr()).data[0..3].copy_from_slice(b"BBB");
        }
        pager.release(page);
        pager.rollback().unwrap();

        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page.as_ref().data[0..3], b"AAA");
        }
        pager.release(page);

        // The on-disk copy must also still read back as "AAA".
        let mut pager2 = open_pager(vfs, "rb.db");
        pager2.set_page_size(1024, 0).unwrap();
        let page2 = pager2.get(1, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page2.as_ref().data[0..3], b"AAA");
        }
        pager2.release(page2);
    }

    #[test]
    fn savepoint_rollback_restores_subset() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());
        let mut pager = open_pager(vfs, "sp.db");
        pager.set_page_size(1024, 0).unwrap();

        pager.begin(false).unwrap();
        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        pager.write(page).unwrap();
        unsafe {
            (*page.as_ptr()).data[0..3].copy_from_slice(b"AAA");
        }
        pager.release(page);

        pager.savepoint(SavepointOp::Begin, 0).unwrap();

        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        pager.write(page).unwrap();
        unsafe {
            (*page.as_ptr()).data[0..3].copy_from_slice(b"BBB");
        }
        pager.release(page);

        pager.savepoint(SavepointOp::Rollback, 0).unwrap();

        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page.as_ref().data[0..3], b"AAA");
        }
        pager.release(page);
    }

    #[test]
    fn dirty_eviction_under_pressure_spills_to_database() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());
        let mut pager = open_pager(vfs.clone(), "pressure.db");
        pager.set_page_size(1024, 0).unwrap();
        pager.set_cache_size(2);

        pager.begin(false).unwrap();

        let page1 = pager.get(1, PagerGetFlags::empty()).unwrap();
        pager.write(page1).unwrap();
        unsafe {
            (*page1.as_ptr()).data[0..3].copy_from_slice(b"ONE");
        }
        pager.release(page1);

        let page2 = pager.get(2, PagerGetFlags::empty()).unwrap();
        pager.write(page2).unwrap();
        unsafe {
            (*page2.as_ptr()).data[0..3].copy_from_slice(b"TWO");
        }
        pager.release(page2);

        // Cache is full of dirty, unpinned pages; fetching a third page must
        // spill one of them to the database file rather than fail.
        let page3 = pager.get(3, PagerGetFlags::empty()).unwrap();
        pager.release(page3);

        assert_eq!(pager.refcount(), 0);

        pager.commit_phase_one(None).unwrap();
        pager.commit_phase_two().unwrap();

        let mut reopened = open_pager(vfs, "pressure.db");
        reopened.set_page_size(1024, 0).unwrap();
        let page1 = reopened.get(1, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page1.as_ref().data[0..3], b"ONE");
        }
        reopened.release(page1);
        let page2 = reopened.get(2, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page2.as_ref().data[0..3], b"TWO");
        }
        reopened.release(page2);
    }

    #[test]
    fn hot_journal_is_recovered_on_open() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());

        // First transaction commits page 1 with known content.
        {
            let mut pager = open_pager(vfs.clone(), "hot.db");
            pager.set_page_size(1024, 0).unwrap();
            pager.begin(false).unwrap();
            let page = pager.get(1, PagerGetFlags::empty()).unwrap();
            pager.write(page).unwrap();
            unsafe {
                (*page.as_ptr()).data[0..3].copy_from_slice(b"ORG");
            }
            pager.release(page);
            pager.commit_phase_one(None).unwrap();
            pager.commit_phase_two().unwrap();
        }

        // Second transaction modifies it but "crashes" before committing:
        // the journal (holding the pre-image "ORG") is left on disk and the
        // reserved lock is never released.
        {
            let mut pager = open_pager(vfs.clone(), "hot.db");
            pager.set_page_size(1024, 0).unwrap();
            pager.begin(false).unwrap();
            let page = pager.get(1, PagerGetFlags::empty()).unwrap();
            pager.write(page).unwrap();
            unsafe {
                (*page.as_ptr()).data[0..3].copy_from_slice(b"NEW");
            }
            pager.release(page);
            std::mem::forget(pager);
        }

        let mut recovered = open_pager(vfs, "hot.db");
        recovered.set_page_size(1024, 0).unwrap();
        let page = recovered.get(1, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page.as_ref().data[0..3], b"ORG");
        }
        recovered.release(page);
    }

    #[test]
    fn wal_commit_is_visible_then_checkpoint_backfills_main_file() {
        let vfs: Arc<dyn Vfs> = Arc::new(MemVfs::new());
        let mut pager = open_pager(vfs.clone(), "wal.db");
        pager.set_page_size(1024, 0).unwrap();
        pager.set_journal_mode(JournalMode::Wal).unwrap();

        pager.begin(false).unwrap();
        let page = pager.get(1, PagerGetFlags::empty()).unwrap();
        pager.write(page).unwrap();
        unsafe {
            (*page.as_ptr()).data[0..3].copy_from_slice(b"WAL");
        }
        pager.release(page);
        pager.commit_phase_one(None).unwrap();
        pager.commit_phase_two().unwrap();

        assert_eq!(pager.state, PagerState::Reader);

        // A fresh pager opened after the commit sees the new content via WAL,
        // without anything having touched the main file yet.
        let mut reader = open_pager(vfs.clone(), "wal.db");
        reader.set_page_size(1024, 0).unwrap();
        reader.set_journal_mode(JournalMode::Wal).unwrap();
        let page = reader.get(1, PagerGetFlags::empty()).unwrap();
        unsafe {
            assert_eq!(&page.as_ref().data[0..3], b"WAL");
        }
        reader.release(page);

        pager.checkpoint(CheckpointMode::Truncate).unwrap();
        assert!(pager.wal.as_ref().unwrap().is_empty());
    }
}
