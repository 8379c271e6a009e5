//! `Cursor` (spec.md §4.5): a stateful walk over one `BTreeIndex`'s leaves.
//! Grounded on `engine::index::IndexCursor` (moveNext/seek over a leaf
//! chain held by page id + in-leaf offset).

use super::node;
use super::BTreeIndex;
use crate::engine::page::PageHeader;
use crate::engine::page_buffer::{DocumentLocation, PageBuffer};
use crate::engine::transaction::Transaction;
use crate::key::IndexKey;
use crate::{Error, Result};

/// Current leaf contents plus the cursor's offset into it. `None` means
/// past-the-end (either direction).
struct Position {
    page_id: u32,
    entries: Vec<(IndexKey, DocumentLocation)>,
    header: PageHeader,
    offset: usize,
}

pub struct Cursor<'a> {
    index: &'a BTreeIndex<'a>,
    tx: Option<Transaction>,
    position: Option<Position>,
}

impl<'a> Cursor<'a> {
    pub(super) fn new(index: &'a BTreeIndex<'a>, tx: Option<Transaction>) -> Self {
        Cursor { index, tx, position: None }
    }

    fn load_leaf(&self, page_id: u32) -> Result<Position> {
        let bytes = self.index.engine.read_page(page_id, self.tx)?;
        let buf = PageBuffer::from_bytes(page_id, bytes);
        let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
        let entries = node::decode_leaf(&buf)?;
        Ok(Position { page_id, entries, header, offset: 0 })
    }

    pub fn move_to_first(&mut self) -> Result<()> {
        let (page_id, _, _) = self.index.first_leaf(self.tx)?;
        let mut pos = self.load_leaf(page_id)?;
        if pos.entries.is_empty() && pos.header.next_page_id != 0 {
            return self.advance_to_next_nonempty_leaf(pos.header.next_page_id);
        }
        pos.offset = 0;
        self.position = if pos.entries.is_empty() { None } else { Some(pos) };
        Ok(())
    }

    pub fn move_to_last(&mut self) -> Result<()> {
        let (page_id, _, _) = self.index.last_leaf(self.tx)?;
        let mut pos = self.load_leaf(page_id)?;
        if pos.entries.is_empty() && pos.header.prev_page_id != 0 {
            return self.retreat_to_prev_nonempty_leaf(pos.header.prev_page_id);
        }
        if pos.entries.is_empty() {
            self.position = None;
        } else {
            pos.offset = pos.entries.len() - 1;
            self.position = Some(pos);
        }
        Ok(())
    }

    fn advance_to_next_nonempty_leaf(&mut self, mut page_id: u32) -> Result<()> {
        loop {
            if page_id == 0 {
                self.position = None;
                return Ok(());
            }
            let pos = self.load_leaf(page_id)?;
            if !pos.entries.is_empty() {
                self.position = Some(pos);
                return Ok(());
            }
            page_id = pos.header.next_page_id;
        }
    }

    fn retreat_to_prev_nonempty_leaf(&mut self, mut page_id: u32) -> Result<()> {
        loop {
            if page_id == 0 {
                self.position = None;
                return Ok(());
            }
            let mut pos = self.load_leaf(page_id)?;
            if !pos.entries.is_empty() {
                pos.offset = pos.entries.len() - 1;
                self.position = Some(pos);
                return Ok(());
            }
            page_id = pos.header.prev_page_id;
        }
    }

    pub fn move_next(&mut self) -> Result<()> {
        let Some(pos) = self.position.take() else {
            return Ok(());
        };
        if pos.offset + 1 < pos.entries.len() {
            let mut pos = pos;
            pos.offset += 1;
            self.position = Some(pos);
            Ok(())
        } else {
            self.advance_to_next_nonempty_leaf(pos.header.next_page_id)
        }
    }

    pub fn move_prev(&mut self) -> Result<()> {
        let Some(pos) = self.position.take() else {
            return Ok(());
        };
        if pos.offset > 0 {
            let mut pos = pos;
            pos.offset -= 1;
            self.position = Some(pos);
            Ok(())
        } else {
            self.retreat_to_prev_nonempty_leaf(pos.header.prev_page_id)
        }
    }

    /// Positions at the least key `>= key`, returning whether it is an
    /// exact match (spec.md §4.5: "seeking a missing key positions at the
    /// least key >= target").
    pub fn seek(&mut self, key: &IndexKey) -> Result<bool> {
        let (page_id, _, _) = self.index.leaf_for(self.tx, key)?;
        let pos = self.load_leaf(page_id)?;
        let offset = node::lower_bound(&pos.entries, key);
        if offset >= pos.entries.len() {
            self.advance_to_next_nonempty_leaf(pos.header.next_page_id)?;
            return Ok(false);
        }
        let exact = pos.entries[offset].0 == *key;
        self.position = Some(Position { offset, ..pos });
        Ok(exact)
    }

    /// Returns the entry at the cursor, or `InvalidState` if past-the-end
    /// (spec.md §4.5).
    pub fn current(&self) -> Result<(IndexKey, DocumentLocation)> {
        let pos = self
            .position
            .as_ref()
            .ok_or_else(|| Error::invalid_state("cursor is past-the-end"))?;
        Ok(pos.entries[pos.offset].clone())
    }
}
