//! `FreeSpaceMap` (spec.md §3/§4; SPEC_FULL.md F.2): tracks free pages and
//! reclaims them on deallocation. Grounded on the
//! `PAGE_FREE_LIST_SLOTS = 5` constant — LiteDB buckets collection data
//! pages by available-bytes range so an insert finds a page with enough
//! room in O(1) rather than scanning every page in a collection. BLite
//! keeps that bucketing for data pages, plus a flat stack of pages that
//! are entirely free (no live slots at all) and can be handed to any
//! page type on the next allocation.

use crate::engine::constants::FREE_LIST_SLOTS;
use crate::engine::page::PageType;
use crate::engine::page_chain::{read_chain, write_chain};
use crate::engine::page_file::PageFile;
use crate::Result;
use std::sync::Mutex;

struct Inner {
    /// Pages with zero live slots, available for reuse by any page type.
    flat_free: Vec<u32>,
    /// Data pages bucketed by remaining free space, from least (`[0]`) to
    /// most (`[FREE_LIST_SLOTS - 1]`) free.
    buckets: [Vec<u32>; FREE_LIST_SLOTS],
}

pub(crate) struct FreeSpaceMap {
    page_size: usize,
    inner: Mutex<Inner>,
}

/// Maps a free-byte count to one of `FREE_LIST_SLOTS` buckets, evenly
/// dividing `[0, page_size]`.
fn bucket_for(free_bytes: usize, page_size: usize) -> usize {
    let slot_width = (page_size / FREE_LIST_SLOTS).max(1);
    (free_bytes / slot_width).min(FREE_LIST_SLOTS - 1)
}

impl FreeSpaceMap {
    pub fn new(page_size: usize) -> Self {
        FreeSpaceMap {
            page_size,
            inner: Mutex::new(Inner {
                flat_free: Vec::new(),
                buckets: Default::default(),
            }),
        }
    }

    /// Records a page that is entirely free and can be reused for any
    /// page type — what `deallocatePage` feeds into on a completed
    /// delete/overflow-release (spec.md §4.4).
    pub fn push_free_page(&self, page_id: u32) {
        let mut inner = self.inner.lock().unwrap();
        for bucket in inner.buckets.iter_mut() {
            bucket.retain(|&p| p != page_id);
        }
        inner.flat_free.push(page_id);
    }

    /// Takes any fully-free page, if one is available.
    pub fn take_free_page(&self) -> Option<u32> {
        self.inner.lock().unwrap().flat_free.pop()
    }

    /// Records (or re-buckets) a data page's current free-space figure.
    pub fn note_data_page(&self, page_id: u32, free_bytes: usize) {
        let mut inner = self.inner.lock().unwrap();
        for bucket in inner.buckets.iter_mut() {
            bucket.retain(|&p| p != page_id);
        }
        if free_bytes == 0 {
            return;
        }
        let bucket = bucket_for(free_bytes, self.page_size);
        inner.buckets[bucket].push(page_id);
    }

    /// Finds a data page with at least `needed` bytes free, preferring
    /// the tightest-fitting bucket to avoid fragmenting emptier pages.
    pub fn find_page_with_space(&self, needed: usize) -> Option<u32> {
        let start = bucket_for(needed, self.page_size);
        let inner = self.inner.lock().unwrap();
        for bucket in &inner.buckets[start..] {
            if let Some(&page_id) = bucket.last() {
                return Some(page_id);
            }
        }
        None
    }

    pub fn free_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.flat_free.len() + inner.buckets.iter().map(|b| b.len()).sum::<usize>()
    }

    /// Serializes the current state: flat list length + entries, then
    /// each bucket's length + entries, all as little-endian u32s.
    fn encode(&self) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&(inner.flat_free.len() as u32).to_le_bytes());
        for &p in &inner.flat_free {
            out.extend_from_slice(&p.to_le_bytes());
        }
        for bucket in &inner.buckets {
            out.extend_from_slice(&(bucket.len() as u32).to_le_bytes());
            for &p in bucket {
                out.extend_from_slice(&p.to_le_bytes());
            }
        }
        out
    }

    fn decode(page_size: usize, bytes: &[u8]) -> Self {
        let mut at = 0usize;
        let mut read_u32 = || {
            let v = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
            at += 4;
            v
        };
        let flat_len = read_u32() as usize;
        let flat_free = (0..flat_len).map(|_| read_u32()).collect();
        let mut buckets: [Vec<u32>; FREE_LIST_SLOTS] = Default::default();
        for bucket in buckets.iter_mut() {
            let len = read_u32() as usize;
            *bucket = (0..len).map(|_| read_u32()).collect();
        }
        FreeSpaceMap {
            page_size,
            inner: Mutex::new(Inner { flat_free, buckets }),
        }
    }

    /// Persists the map as a chain of `FreeSpaceMap` pages and returns the
    /// new head page id, for storing in the file header.
    pub fn persist(&self, page_file: &PageFile, allocate: impl FnMut() -> Result<u32>) -> Result<u32> {
        write_chain(page_file, allocate, PageType::FreeSpaceMap, &self.encode())
    }

    /// Rebuilds a map from its persisted chain (spec.md §4.4 open()).
    pub fn load(page_file: &PageFile, head_page_id: u32) -> Result<Self> {
        if head_page_id == 0 {
            return Ok(FreeSpaceMap::new(page_file.page_size()));
        }
        let bytes = read_chain(page_file, head_page_id)?;
        Ok(FreeSpaceMap::decode(page_file.page_size(), &bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_free_pages_are_reusable_by_any_type() {
        let fsm = FreeSpaceMap::new(4096);
        fsm.push_free_page(5);
        assert_eq!(fsm.free_count(), 1);
        assert_eq!(fsm.take_free_page(), Some(5));
        assert_eq!(fsm.take_free_page(), None);
    }

    #[test]
    fn buckets_prefer_tightest_fit() {
        let fsm = FreeSpaceMap::new(4000);
        fsm.note_data_page(1, 100); // bucket 0
        fsm.note_data_page(2, 3900); // bucket 4
        assert_eq!(fsm.find_page_with_space(3000), Some(2));
        assert_eq!(fsm.find_page_with_space(50), Some(1));
    }

    #[test]
    fn note_data_page_moves_page_between_buckets() {
        let fsm = FreeSpaceMap::new(4000);
        fsm.note_data_page(7, 100);
        fsm.note_data_page(7, 3900);
        assert_eq!(fsm.find_page_with_space(50), Some(7));
    }
}
