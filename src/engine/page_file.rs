//! `PageFile` (spec.md §4.1): fixed-size paged storage on a single file,
//! with a mapped write window and a positional read path that bypasses it.
//!
//! Grounded on `engine::disk` + `Stream`/`StreamFactory` pair
//! (`engine/mod.rs`): backing storage sits behind a `Stream` trait so
//! `MemoryStream` (tests/memory_stream) can stand in for a real file.
//! BLite keeps the same shape — a `Backing` trait implemented by
//! `RealFile` (std::fs::File + memmap2::MmapMut) and by a test-only
//! in-memory backing — but trades a fully-async `Stream` for the split
//! spec.md §4.1 actually asks for: a synchronous mapped-write path and a
//! positional read path that the `StorageEngine` drives either
//! synchronously or via `spawn_blocking`.
//!
//! `RealFile` also holds the exclusive advisory lock spec.md §4.4
//! requires at open (via `fs2`); see DESIGN.md for where that grounding
//! comes from.

use crate::config::EngineConfig;
use crate::engine::constants::{FILE_FORMAT_VERSION, FILE_HEADER_USED_SIZE, MAGIC};
use crate::{Error, Result};
use std::sync::Mutex;

/// Anything that can back a `PageFile`: a real file (mmap + positional
/// read) or an in-memory stand-in used by tests.
///
/// `write_mapped`/`flush_mapped` model the mapped write window;
/// `read_positional` models the direct read path. For `RealFile` these are
/// genuinely different I/O routes (spec.md §9's documented hazard: a
/// mapped write is not guaranteed visible to a positional read until
/// `flush_mapped`). The in-memory `Backing` used by tests collapses both
/// onto the same buffer, since there is no OS page cache to desynchronize
/// — the flush-before-read discipline is still exercised by callers, just
/// never actually required to pass.
pub trait Backing: Send + Sync {
    fn len(&self) -> Result<u64>;
    fn set_len(&self, len: u64) -> Result<()>;
    fn write_mapped(&self, offset: u64, buf: &[u8]) -> Result<()>;
    fn flush_mapped(&self) -> Result<()>;
    fn read_positional(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
    fn sync_all(&self) -> Result<()>;

    /// Acquires an exclusive advisory lock on the backing storage (spec.md
    /// §4.4: "acquire an exclusive file lock" before loading header/WAL/
    /// catalog). No-op by default since an in-memory backing has no
    /// cross-process concurrent-open hazard to guard against; `RealFile`
    /// overrides this with a real OS-level lock.
    fn lock_exclusive(&self) -> Result<()> {
        Ok(())
    }

    /// Releases the lock acquired by `lock_exclusive`. No-op by default.
    fn unlock(&self) -> Result<()> {
        Ok(())
    }
}

/// Real-disk backing: a `std::fs::File` plus a `memmap2::MmapMut` kept
/// behind a mutex (remapping on growth requires exclusive access).
pub struct RealFile {
    file: std::fs::File,
    mmap: Mutex<Option<memmap2::MmapMut>>,
}

impl RealFile {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(RealFile {
            file,
            mmap: Mutex::new(None),
        })
    }

    fn ensure_mapped(&self, len: u64) -> Result<()> {
        let mut guard = self.mmap.lock().unwrap();
        let needs_remap = match guard.as_ref() {
            Some(m) => (m.len() as u64) < len,
            None => true,
        };
        if needs_remap {
            self.file.set_len(len)?;
            let mmap = unsafe { memmap2::MmapMut::map_mut(&self.file)? };
            *guard = Some(mmap);
        }
        Ok(())
    }
}

impl Backing for RealFile {
    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.ensure_mapped(len)
    }

    fn write_mapped(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.ensure_mapped(offset + buf.len() as u64)?;
        let mut guard = self.mmap.lock().unwrap();
        let mmap = guard
            .as_mut()
            .ok_or_else(|| Error::other("page file not mapped"))?;
        let start = offset as usize;
        mmap[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush_mapped(&self) -> Result<()> {
        let guard = self.mmap.lock().unwrap();
        if let Some(mmap) = guard.as_ref() {
            mmap.flush()?;
        }
        Ok(())
    }

    fn read_positional(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn lock_exclusive(&self) -> Result<()> {
        use fs2::FileExt;
        self.file
            .try_lock_exclusive()
            .map_err(|e| Error::other(format!("could not acquire exclusive file lock: {e}")))
    }

    fn unlock(&self) -> Result<()> {
        use fs2::FileExt;
        Ok(self.file.unlock()?)
    }
}

/// The on-disk file header (page 0), spec.md §6. `user_version` is a
/// supplemented pass-through field (SPEC_FULL.md F.1): the kernel never
/// interprets it, only preserves it across checkpoint/reopen.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileHeader {
    pub version: u16,
    pub page_size: u16,
    pub flags: u32,
    pub root_catalog_page_id: u32,
    pub dictionary_root_page_id: u32,
    pub first_free_space_map_page_id: u32,
    pub wal_head_lsn: u64,
    pub wal_tail_lsn: u64,
    pub last_tx_id: u64,
    pub user_version: u32,
}

impl FileHeader {
    pub fn new(page_size: u16) -> Self {
        FileHeader {
            version: FILE_FORMAT_VERSION,
            page_size,
            flags: 0,
            root_catalog_page_id: 0,
            dictionary_root_page_id: 0,
            first_free_space_map_page_id: 0,
            wal_head_lsn: 0,
            wal_tail_lsn: 0,
            last_tx_id: 0,
            user_version: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FILE_HEADER_USED_SIZE);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.page_size.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.root_catalog_page_id.to_le_bytes());
        out.extend_from_slice(&self.dictionary_root_page_id.to_le_bytes());
        out.extend_from_slice(&self.first_free_space_map_page_id.to_le_bytes());
        out.extend_from_slice(&self.wal_head_lsn.to_le_bytes());
        out.extend_from_slice(&self.wal_tail_lsn.to_le_bytes());
        out.extend_from_slice(&self.last_tx_id.to_le_bytes());
        out.extend_from_slice(&self.user_version.to_le_bytes());
        out.resize(FILE_HEADER_USED_SIZE, 0);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_USED_SIZE || &bytes[0..8] != MAGIC {
            return Err(Error::incompatible_file("bad magic in file header"));
        }
        let mut at = 8usize;
        let mut read_u16 = || {
            let v = u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap());
            at += 2;
            v
        };
        let version = read_u16();
        let page_size = read_u16();
        let mut read_u32 = |at: &mut usize| {
            let v = u32::from_le_bytes(bytes[*at..*at + 4].try_into().unwrap());
            *at += 4;
            v
        };
        let flags = read_u32(&mut at);
        let root_catalog_page_id = read_u32(&mut at);
        let dictionary_root_page_id = read_u32(&mut at);
        let first_free_space_map_page_id = read_u32(&mut at);
        let mut read_u64 = |at: &mut usize| {
            let v = u64::from_le_bytes(bytes[*at..*at + 8].try_into().unwrap());
            *at += 8;
            v
        };
        let wal_head_lsn = read_u64(&mut at);
        let wal_tail_lsn = read_u64(&mut at);
        let last_tx_id = read_u64(&mut at);
        let user_version = read_u32(&mut at);
        if version != FILE_FORMAT_VERSION {
            return Err(Error::incompatible_file(format!(
                "unsupported file format version {version}"
            )));
        }
        Ok(FileHeader {
            version,
            page_size,
            flags,
            root_catalog_page_id,
            dictionary_root_page_id,
            first_free_space_map_page_id,
            wal_head_lsn,
            wal_tail_lsn,
            last_tx_id,
            user_version,
        })
    }
}

const GROW_CHUNK_PAGES_SMALL: u64 = 64;
const GROW_CAP_BYTES: u64 = 64 * 1024 * 1024;

/// Fixed-size paged storage. Page 0 is the file header; pages are
/// 1-based starting at page 1 (spec.md §3).
pub(crate) struct PageFile {
    backing: Box<dyn Backing>,
    page_size: usize,
    next_page_id: std::sync::atomic::AtomicU32,
}

impl PageFile {
    pub fn create_new(backing: Box<dyn Backing>, config: &EngineConfig) -> Result<Self> {
        backing.set_len(config.initial_file_size.max(config.page_size as u64))?;
        let header = FileHeader::new(config.page_size as u16);
        backing.write_mapped(0, &header.encode())?;
        backing.flush_mapped()?;
        backing.sync_all()?;
        Ok(PageFile {
            backing,
            page_size: config.page_size,
            next_page_id: std::sync::atomic::AtomicU32::new(1),
        })
    }

    pub fn open_existing(backing: Box<dyn Backing>, config: &EngineConfig) -> Result<(Self, FileHeader)> {
        let mut raw = vec![0u8; FILE_HEADER_USED_SIZE];
        backing.read_positional(0, &mut raw)?;
        let header = FileHeader::decode(&raw)?;
        if header.page_size as usize != config.page_size {
            return Err(Error::incompatible_file(format!(
                "page size mismatch: file has {}, config requests {}",
                header.page_size, config.page_size
            )));
        }
        let len = backing.len()?;
        let next_page_id = (len / config.page_size as u64).max(1) as u32;
        let file = PageFile {
            backing,
            page_size: config.page_size,
            next_page_id: std::sync::atomic::AtomicU32::new(next_page_id),
        };
        Ok((file, header))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_header(&self) -> Result<FileHeader> {
        let mut raw = vec![0u8; FILE_HEADER_USED_SIZE];
        self.backing.read_positional(0, &mut raw)?;
        FileHeader::decode(&raw)
    }

    pub fn write_header(&self, header: &FileHeader) -> Result<()> {
        self.backing.write_mapped(0, &header.encode())?;
        Ok(())
    }

    fn page_offset(&self, page_id: u32) -> u64 {
        page_id as u64 * self.page_size as u64
    }

    /// Extends the file by grow-by-doubling chunks up to `GROW_CAP_BYTES`
    /// (spec.md §4.1), then hands back a freshly minted page id.
    pub fn allocate_page(&self) -> Result<u32> {
        let page_id = self
            .next_page_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let required_len = self.page_offset(page_id) + self.page_size as u64;
        let current_len = self.backing.len()?;
        if required_len > current_len {
            let chunk = (current_len.max(self.page_size as u64 * GROW_CHUNK_PAGES_SMALL))
                .min(GROW_CAP_BYTES)
                .max(self.page_size as u64);
            let new_len = (current_len + chunk).max(required_len);
            self.backing.set_len(new_len)?;
        }
        Ok(page_id)
    }

    pub fn write_page_mapped(&self, page_id: u32, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len(), self.page_size);
        self.backing.write_mapped(self.page_offset(page_id), bytes)
    }

    pub fn read_page_positional(&self, page_id: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        self.backing
            .read_positional(self.page_offset(page_id), &mut buf)?;
        Ok(buf)
    }

    /// Drains mapped dirty pages to the OS; callers needing durability
    /// must still call `sync_all` (spec.md §4.1).
    pub fn flush(&self) -> Result<()> {
        self.backing.flush_mapped()
    }

    pub fn sync_all(&self) -> Result<()> {
        self.backing.sync_all()
    }

    pub fn lock_exclusive(&self) -> Result<()> {
        self.backing.lock_exclusive()
    }

    pub fn unlock(&self) -> Result<()> {
        self.backing.unlock()
    }
}

/// In-memory `Backing` for unit tests, grounded on
/// `tests/memory_stream::MemoryStream` (an `Arc<Mutex<Vec<u8>>>` standing
/// in for a real file so WAL/checkpoint/crash-recovery scenarios run
/// without disk I/O). Kept `pub(crate)` and test-only since it is not
/// part of the kernel's public surface; integration tests under
/// `tests/` define their own copy, local to their own `tests/` directory
/// rather than shipped in the library.
#[cfg(test)]
pub(crate) mod test_support {
    use super::Backing;
    use crate::Result;
    use std::sync::Mutex;

    pub(crate) struct MemBacking {
        data: Mutex<Vec<u8>>,
    }

    impl MemBacking {
        pub fn new() -> Self {
            MemBacking {
                data: Mutex::new(Vec::new()),
            }
        }
    }

    impl Backing for MemBacking {
        fn len(&self) -> Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }

        fn set_len(&self, len: u64) -> Result<()> {
            self.data.lock().unwrap().resize(len as usize, 0);
            Ok(())
        }

        fn write_mapped(&self, offset: u64, buf: &[u8]) -> Result<()> {
            let mut data = self.data.lock().unwrap();
            let end = offset as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset as usize..end].copy_from_slice(buf);
            Ok(())
        }

        fn flush_mapped(&self) -> Result<()> {
            Ok(())
        }

        fn read_positional(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
            let data = self.data.lock().unwrap();
            let end = offset as usize + buf.len();
            buf.copy_from_slice(&data[offset as usize..end]);
            Ok(())
        }

        fn sync_all(&self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("blite-lock-test-{label}-{}.db", std::process::id()))
    }

    #[test]
    fn real_file_exclusive_lock_rejects_a_second_lock() {
        let path = temp_path("exclusive");
        let _ = std::fs::remove_file(&path);
        let first = RealFile::open(&path).unwrap();
        first.lock_exclusive().unwrap();

        // A second handle onto the same file cannot also lock it
        // exclusively while `first` holds the lock.
        let second = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        use fs2::FileExt;
        assert!(second.try_lock_exclusive().is_err());

        first.unlock().unwrap();
        second.try_lock_exclusive().unwrap();
        second.unlock().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
