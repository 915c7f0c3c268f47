//! In-memory VFS.
//!
//! Backs every file with a `Vec<u8>` guarded by a mutex instead of a real
//! file descriptor. Used for temporary databases, transient sub-journals,
//! and tests that want deterministic I/O without touching disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, ErrorCode, Result};
use crate::os::vfs::{
    AccessFlags, DeviceCharacteristics, FileControlOp, LockType, OpenFlags, SyncFlags, Vfs,
    VfsFile,
};

type FileTable = Arc<Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>>;

/// In-memory virtual filesystem.
pub struct MemVfs {
    name: String,
    files: FileTable,
    anon_counter: AtomicU32,
}

impl MemVfs {
    pub fn new() -> Self {
        Self {
            name: "mem".to_string(),
            files: Arc::new(Mutex::new(HashMap::new())),
            anon_counter: AtomicU32::new(0),
        }
    }

    pub fn new_with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: Arc::new(Mutex::new(HashMap::new())),
            anon_counter: AtomicU32::new(0),
        }
    }

    fn anon_path(&self) -> String {
        let n = self.anon_counter.fetch_add(1, Ordering::SeqCst);
        format!("<mem:{}:{}>", self.name, n)
    }
}

impl Default for MemVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs for MemVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> Result<Box<dyn VfsFile>> {
        let path = match path {
            Some(p) => p.to_string(),
            None => self.anon_path(),
        };

        let mut table = self.files.lock().unwrap();
        let data = match table.get(&path) {
            Some(data) => {
                if flags.contains(OpenFlags::EXCLUSIVE) && flags.contains(OpenFlags::CREATE) {
                    return Err(Error::new(ErrorCode::CantOpen));
                }
                data.clone()
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(Error::new(ErrorCode::CantOpen));
                }
                let data = Arc::new(Mutex::new(Vec::new()));
                table.insert(path.clone(), data.clone());
                data
            }
        };
        drop(table);

        Ok(Box::new(MemFile {
            path,
            data,
            files: self.files.clone(),
            lock_type: Mutex::new(LockType::None),
            delete_on_close: flags.contains(OpenFlags::DELETEONCLOSE),
        }))
    }

    fn delete(&self, path: &str, _sync_dir: bool) -> Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn access(&self, path: &str, _flags: AccessFlags) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    fn full_pathname(&self, path: &str) -> Result<String> {
        Ok(path.to_string())
    }

    fn randomness(&self, buf: &mut [u8]) -> i32 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let mut seed = now.as_nanos() as u64 ^ (buf.as_ptr() as u64);
        for byte in buf.iter_mut() {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            *byte = seed as u8;
        }
        buf.len() as i32
    }

    fn sleep(&self, microseconds: i32) -> i32 {
        std::thread::sleep(std::time::Duration::from_micros(microseconds as u64));
        microseconds
    }

    fn current_time(&self) -> f64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        const UNIX_EPOCH_JD: f64 = 2440587.5;
        UNIX_EPOCH_JD + (now.as_secs_f64() / 86400.0)
    }

    fn current_time_i64(&self) -> i64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        const UNIX_EPOCH_JD_MS: i64 = 210866760000000;
        UNIX_EPOCH_JD_MS + (now.as_millis() as i64)
    }

    fn get_last_error(&self) -> (i32, String) {
        (0, String::new())
    }
}

struct MemFile {
    path: String,
    data: Arc<Mutex<Vec<u8>>>,
    files: FileTable,
    lock_type: Mutex<LockType>,
    delete_on_close: bool,
}

impl VfsFile for MemFile {
    fn read(&self, buf: &mut [u8], offset: i64) -> Result<usize> {
        let data = self.data.lock().unwrap();
        let offset = offset as usize;
        if offset >= data.len() {
            buf.fill(0);
            return Ok(0);
        }
        let avail = data.len() - offset;
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        if n < buf.len() {
            buf[n..].fill(0);
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8], offset: i64) -> Result<usize> {
        let mut data = self.data.lock().unwrap();
        let offset = offset as usize;
        let end = offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn truncate(&self, size: i64) -> Result<()> {
        self.data.lock().unwrap().resize(size as usize, 0);
        Ok(())
    }

    fn sync(&self, _flags: SyncFlags) -> Result<()> {
        Ok(())
    }

    fn file_size(&self) -> Result<i64> {
        Ok(self.data.lock().unwrap().len() as i64)
    }

    fn lock(&self, lock_type: LockType) -> Result<()> {
        *self.lock_type.lock().unwrap() = lock_type;
        Ok(())
    }

    fn unlock(&self, lock_type: LockType) -> Result<()> {
        *self.lock_type.lock().unwrap() = lock_type;
        Ok(())
    }

    fn check_reserved_lock(&self) -> Result<bool> {
        Ok(*self.lock_type.lock().unwrap() >= LockType::Reserved)
    }

    fn file_control(&mut self, _op: FileControlOp) -> Result<()> {
        Ok(())
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::ATOMIC
            | DeviceCharacteristics::SAFE_APPEND
            | DeviceCharacteristics::SEQUENTIAL
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        if self.delete_on_close {
            self.files.lock().unwrap().remove(&self.path);
        }
    }
}

/// Registers the in-memory VFS under the name "mem". Not made the default.
pub fn register_mem_vfs() -> Result<()> {
    let vfs = Arc::new(MemVfs::new());
    crate::os::vfs::vfs_register(vfs, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_create_then_reopen_shares_data() {
        let vfs = MemVfs::new();
        let mut f1 = vfs
            .open(Some("a.db"), OpenFlags::READWRITE | OpenFlags::CREATE)
            .unwrap();
        f1.write(b"hello", 0).unwrap();

        let mut f2 = vfs.open(Some("a.db"), OpenFlags::READWRITE).unwrap();
        let mut buf = [0u8; 5];
        f2.read(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn open_without_create_fails_when_missing() {
        let vfs = MemVfs::new();
        assert!(vfs.open(Some("missing.db"), OpenFlags::READWRITE).is_err());
    }

    #[test]
    fn delete_on_close_removes_file() {
        let vfs = MemVfs::new();
        {
            let _f = vfs
                .open(
                    Some("temp.db"),
                    OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::DELETEONCLOSE,
                )
                .unwrap();
        }
        assert!(!vfs.access("temp.db", AccessFlags::EXISTS).unwrap());
    }

    #[test]
    fn read_past_eof_zero_fills() {
        let vfs = MemVfs::new();
        let mut f = vfs
            .open(Some("b.db"), OpenFlags::READWRITE | OpenFlags::CREATE)
            .unwrap();
        f.write(b"ab", 0).unwrap();
        let mut buf = [0xffu8; 4];
        let n = f.read(&mut buf, 0).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf, [b'a', b'b', 0, 0]);
    }

    #[test]
    fn anonymous_files_get_distinct_paths() {
        let vfs = MemVfs::new();
        let _f1 = vfs.open(None, OpenFlags::READWRITE | OpenFlags::CREATE).unwrap();
        let _f2 = vfs.open(None, OpenFlags::READWRITE | OpenFlags::CREATE).unwrap();
        assert_eq!(vfs.files.lock().unwrap().len(), 2);
    }
}
