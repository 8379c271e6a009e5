//! In-memory `Backing` for integration tests, mirroring the crate's own
//! `#[cfg(test)]`-only `MemBacking` (which integration tests, living in a
//! separate crate, can't reach). `clone()` shares the same underlying
//! bytes, which lets a second `StorageEngine::open_existing` see whatever
//! the first engine left behind without ever calling `close` — the shape
//! of a crash-then-reopen test (spec.md §8 scenario 1).

use blite::engine::Backing;
use blite::Result;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MemBacking {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemBacking {
    pub fn new() -> Self {
        MemBacking { data: Arc::new(Mutex::new(Vec::new())) }
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
