//! Slotted page layout (spec.md §3): a `SlottedPageHeader` followed by a
//! forward-growing slot directory and a backward-growing payload heap.
//! Grounded on `engine::pages::base_page::BasePage`'s slot bookkeeping
//! (`get_free_page_len`, `insert`/`delete`/`update` over an
//! `indexmap`-backed segment list), but rebuilt against a flat byte buffer
//! instead of an in-memory segment map, since BLite pages are read/written
//! whole.

use crate::engine::buffer::{BufferReader, BufferWriter};
use crate::engine::constants::{PAGE_HEADER_SIZE, SLOTTED_PAGE_HEADER_SIZE, SLOT_ENTRY_SIZE};
use crate::engine::page_buffer::PageBuffer;
use crate::{Error, Result};

const FLAG_TOMBSTONE: u8 = 0b0000_0001;
const FLAG_OVERFLOW: u8 = 0b0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotEntry {
    pub offset: u16,
    pub length: u16,
    flags: u8,
}

impl SlotEntry {
    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    pub fn is_overflow(&self) -> bool {
        self.flags & FLAG_OVERFLOW != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct SlottedPageHeader {
    item_count: u16,
    free_space_end: u16,
    tombstone_count: u16,
}

fn header_offset() -> usize {
    PAGE_HEADER_SIZE
}

fn slot_offset(index: u16) -> usize {
    header_offset() + SLOTTED_PAGE_HEADER_SIZE + index as usize * SLOT_ENTRY_SIZE
}

/// A view over one slotted page's directory + heap, operating in place on
/// a caller-owned `PageBuffer`. Does not touch the generic `PageHeader`;
/// callers read/write that separately through `page::PageHeader`.
pub(crate) struct SlottedPage<'a> {
    buf: &'a mut PageBuffer,
}

impl<'a> SlottedPage<'a> {
    pub fn new(buf: &'a mut PageBuffer) -> Self {
        SlottedPage { buf }
    }

    /// Initializes an empty slotted area; `freeSpaceEnd` starts at the end
    /// of the page (the heap grows backward from there).
    pub fn init(buf: &mut PageBuffer) {
        let page_size = buf.len();
        let header = SlottedPageHeader {
            item_count: 0,
            free_space_end: page_size as u16,
            tombstone_count: 0,
        };
        write_header(buf.as_mut_slice(), &header);
    }

    fn header(&self) -> SlottedPageHeader {
        read_header(self.buf.as_slice())
    }

    fn set_header(&mut self, header: &SlottedPageHeader) {
        write_header(self.buf.as_mut_slice(), header);
    }

    pub fn item_count(&self) -> u16 {
        self.header().item_count
    }

    pub fn tombstone_count(&self) -> u16 {
        self.header().tombstone_count
    }

    /// Bytes available for a new slot (entry header + payload), respecting
    /// the invariant `freeSpaceEnd >= header + itemCount * slotEntrySize`.
    pub fn free_space(&self) -> usize {
        let h = self.header();
        let directory_end = header_offset() + SLOTTED_PAGE_HEADER_SIZE
            + h.item_count as usize * SLOT_ENTRY_SIZE;
        (h.free_space_end as usize).saturating_sub(directory_end)
    }

    fn slot_entry(&self, index: u16) -> Option<SlotEntry> {
        if index >= self.header().item_count {
            return None;
        }
        let off = slot_offset(index);
        let mut reader = BufferReader::at(self.buf.as_slice(), off);
        let offset = reader.read_u16();
        let length = reader.read_u16();
        let flags = reader.read_u8();
        Some(SlotEntry {
            offset,
            length,
            flags,
        })
    }

    fn write_slot_entry(&mut self, index: u16, entry: &SlotEntry) {
        let off = slot_offset(index);
        let mut writer = BufferWriter::at(self.buf.as_mut_slice(), off);
        writer.write_u16(entry.offset);
        writer.write_u16(entry.length);
        writer.write_u8(entry.flags);
    }

    /// Appends a new slot holding `payload` (or an overflow stub if
    /// `is_overflow_stub` is set), returning its slot index.
    pub fn insert(&mut self, payload: &[u8], is_overflow_stub: bool) -> Result<u16> {
        let needed = SLOT_ENTRY_SIZE + payload.len();
        if self.free_space() < needed {
            return Err(Error::page_corrupt("insert into slotted page without enough space"));
        }
        let mut header = self.header();
        let new_offset = header.free_space_end as usize - payload.len();
        self.buf.as_mut_slice()[new_offset..new_offset + payload.len()].copy_from_slice(payload);
        let index = header.item_count;
        header.free_space_end = new_offset as u16;
        header.item_count += 1;
        self.set_header(&header);
        let flags = if is_overflow_stub { FLAG_OVERFLOW } else { 0 };
        self.write_slot_entry(
            index,
            &SlotEntry {
                offset: new_offset as u16,
                length: payload.len() as u16,
                flags,
            },
        );
        Ok(index)
    }

    pub fn read(&self, index: u16) -> Result<&[u8]> {
        let entry = self
            .slot_entry(index)
            .ok_or_else(|| Error::not_found(format!("slot {index} out of range")))?;
        if entry.is_tombstone() {
            return Err(Error::not_found(format!("slot {index} is a tombstone")));
        }
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        Ok(&self.buf.as_slice()[start..end])
    }

    pub fn is_overflow(&self, index: u16) -> Result<bool> {
        Ok(self
            .slot_entry(index)
            .ok_or_else(|| Error::not_found(format!("slot {index} out of range")))?
            .is_overflow())
    }

    pub fn slot_len(&self, index: u16) -> Result<u16> {
        Ok(self
            .slot_entry(index)
            .ok_or_else(|| Error::not_found(format!("slot {index} out of range")))?
            .length)
    }

    pub fn is_tombstone(&self, index: u16) -> bool {
        self.slot_entry(index).map(|e| e.is_tombstone()).unwrap_or(true)
    }

    /// Overwrites a slot's payload in place without reallocating the slot
    /// directory entry; caller must have already checked the new payload
    /// fits in the existing slot's length (spec.md §4.6 "overwrite in
    /// place" path of `update`).
    pub fn overwrite_in_place(&mut self, index: u16, payload: &[u8], is_overflow_stub: bool) -> Result<()> {
        let entry = self
            .slot_entry(index)
            .ok_or_else(|| Error::not_found(format!("slot {index} out of range")))?;
        if payload.len() > entry.length as usize {
            return Err(Error::page_corrupt("overwrite_in_place payload too large for slot"));
        }
        let start = entry.offset as usize;
        self.buf.as_mut_slice()[start..start + payload.len()].copy_from_slice(payload);
        let flags = if is_overflow_stub { FLAG_OVERFLOW } else { 0 };
        self.write_slot_entry(
            index,
            &SlotEntry {
                offset: entry.offset,
                length: payload.len() as u16,
                flags,
            },
        );
        Ok(())
    }

    /// Sets the tombstone flag without compacting, so `DocumentLocation`
    /// remains a stable address (spec.md §3).
    pub fn tombstone(&mut self, index: u16) -> Result<()> {
        let mut entry = self
            .slot_entry(index)
            .ok_or_else(|| Error::not_found(format!("slot {index} out of range")))?;
        if entry.is_tombstone() {
            return Ok(());
        }
        entry.flags |= FLAG_TOMBSTONE;
        self.write_slot_entry(index, &entry);
        let mut header = self.header();
        header.tombstone_count += 1;
        self.set_header(&header);
        Ok(())
    }

    /// Iterates live (non-tombstone) slot indices in ascending order, used
    /// by `DocumentStore::scan` (spec.md §4.6).
    pub fn live_slots(&self) -> Vec<u16> {
        (0..self.item_count())
            .filter(|&i| !self.is_tombstone(i))
            .collect()
    }
}

fn read_header(buf: &[u8]) -> SlottedPageHeader {
    let mut reader = BufferReader::at(buf, header_offset());
    SlottedPageHeader {
        item_count: reader.read_u16(),
        free_space_end: reader.read_u16(),
        tombstone_count: reader.read_u16(),
    }
}

fn write_header(buf: &mut [u8], header: &SlottedPageHeader) {
    let mut writer = BufferWriter::at(buf, header_offset());
    writer.write_u16(header.item_count);
    writer.write_u16(header.free_space_end);
    writer.write_u16(header.tombstone_count);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page(page_size: usize) -> PageBuffer {
        let mut buf = PageBuffer::zeroed(1, page_size);
        SlottedPage::init(&mut buf);
        buf
    }

    #[test]
    fn insert_and_read_roundtrips() {
        let mut buf = fresh_page(256);
        let mut page = SlottedPage::new(&mut buf);
        let idx = page.insert(b"hello world", false).unwrap();
        assert_eq!(page.read(idx).unwrap(), b"hello world");
        assert_eq!(page.item_count(), 1);
    }

    #[test]
    fn tombstone_keeps_slot_index_stable_but_hides_payload() {
        let mut buf = fresh_page(256);
        let mut page = SlottedPage::new(&mut buf);
        let idx = page.insert(b"payload", false).unwrap();
        page.tombstone(idx).unwrap();
        assert!(page.read(idx).is_err());
        assert_eq!(page.tombstone_count(), 1);
        assert_eq!(page.item_count(), 1);
    }

    #[test]
    fn overwrite_in_place_shrinks_length() {
        let mut buf = fresh_page(256);
        let mut page = SlottedPage::new(&mut buf);
        let idx = page.insert(b"0123456789", false).unwrap();
        page.overwrite_in_place(idx, b"abc", false).unwrap();
        assert_eq!(page.read(idx).unwrap(), b"abc");
    }

    #[test]
    fn insert_fails_when_page_is_full() {
        let mut buf = fresh_page(64);
        let mut page = SlottedPage::new(&mut buf);
        loop {
            if page.insert(b"0123456789", false).is_err() {
                break;
            }
        }
    }

    #[test]
    fn live_slots_skips_tombstones() {
        let mut buf = fresh_page(256);
        let mut page = SlottedPage::new(&mut buf);
        let a = page.insert(b"a", false).unwrap();
        let _b = page.insert(b"b", false).unwrap();
        page.tombstone(a).unwrap();
        assert_eq!(page.live_slots(), vec![1]);
    }
}
