//! Library-wide configuration (sqlite3_config equivalent), trimmed to the
//! options that drive the pager, page cache and allocator.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::RwLock;

use crate::error::{Error, ErrorCode, Result};
use crate::os::mutex;

/// Threading mode (SQLITE_CONFIG_SINGLETHREAD, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum ThreadingMode {
    /// No mutex support.
    SingleThread = 1,
    /// Each connection used by a single thread.
    MultiThread = 2,
    /// Full mutex support.
    #[default]
    Serialized = 3,
}

/// Global library configuration state.
pub struct GlobalConfig {
    pub is_init: AtomicBool,
    pub in_progress: AtomicBool,
    pub threading_mode: RwLock<ThreadingMode>,
    /// Default page-cache size in pages (negative = KiB of memory).
    pub page_cache_size: AtomicI32,
    /// Default page size in bytes.
    pub page_size: AtomicI32,
    pub mem_status: AtomicBool,
    /// Default mmap size in bytes.
    pub mmap_size: AtomicI64,
    /// Hard ceiling on mmap size.
    pub max_mmap_size: AtomicI64,
    /// Size in bytes of each slab-allocated page buffer slot, 0 disables the slab.
    pub pcache_hdrsz: AtomicI32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            is_init: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            threading_mode: RwLock::new(ThreadingMode::Serialized),
            page_cache_size: AtomicI32::new(-2000),
            page_size: AtomicI32::new(4096),
            mem_status: AtomicBool::new(true),
            mmap_size: AtomicI64::new(0),
            max_mmap_size: AtomicI64::new(0x7fff_0000),
            pcache_hdrsz: AtomicI32::new(0),
        }
    }
}

static GLOBAL_CONFIG: std::sync::OnceLock<GlobalConfig> = std::sync::OnceLock::new();

/// Returns the process-wide configuration singleton.
pub fn global_config() -> &'static GlobalConfig {
    GLOBAL_CONFIG.get_or_init(GlobalConfig::default)
}

/// sqlite3_config option codes relevant to this crate's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConfigOption {
    SingleThread = 1,
    MultiThread = 2,
    Serialized = 3,
    MemStatus = 9,
    MmapSize = 22,
    PCacheHdrSz = 24,
}

/// Apply a single configuration option. Must be called before [`initialize`]
/// or after [`shutdown`], mirroring sqlite3_config's threading contract.
pub fn configure(option: ConfigOption, value: i64) -> Result<()> {
    let cfg = global_config();
    if cfg.is_init.load(Ordering::SeqCst) {
        return Err(Error::new(ErrorCode::Misuse));
    }
    match option {
        ConfigOption::SingleThread => {
            *cfg.threading_mode.write().unwrap() = ThreadingMode::SingleThread;
        }
        ConfigOption::MultiThread => {
            *cfg.threading_mode.write().unwrap() = ThreadingMode::MultiThread;
        }
        ConfigOption::Serialized => {
            *cfg.threading_mode.write().unwrap() = ThreadingMode::Serialized;
        }
        ConfigOption::MemStatus => cfg.mem_status.store(value != 0, Ordering::SeqCst),
        ConfigOption::MmapSize => cfg.mmap_size.store(value, Ordering::SeqCst),
        ConfigOption::PCacheHdrSz => cfg.pcache_hdrsz.store(value as i32, Ordering::SeqCst),
    }
    Ok(())
}

/// Initializes process-wide state (mutex subsystem). Idempotent.
pub fn initialize() -> Result<()> {
    let cfg = global_config();
    if cfg.is_init.load(Ordering::SeqCst) {
        return Ok(());
    }
    let code = mutex::mutex_init();
    if code != ErrorCode::Ok {
        return Err(Error::new(code));
    }
    cfg.is_init.store(true, Ordering::SeqCst);
    Ok(())
}

/// Tears down process-wide state. Idempotent.
pub fn shutdown() -> Result<()> {
    let cfg = global_config();
    if !cfg.is_init.load(Ordering::SeqCst) {
        return Ok(());
    }
    mutex::mutex_end();
    cfg.is_init.store(false, Ordering::SeqCst);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_page_size_is_4096() {
        assert_eq!(global_config().page_size.load(Ordering::SeqCst), 4096);
    }

    #[test]
    fn initialize_then_shutdown_is_idempotent() {
        initialize().unwrap();
        initialize().unwrap();
        shutdown().unwrap();
        shutdown().unwrap();
    }
}
