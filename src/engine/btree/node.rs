//! Leaf/internal node encoding for `BTreeIndex` (spec.md §4.5: "leaf and
//! internal pages share a slotted layout"). Entries are kept fully sorted
//! in one contiguous run per page and rewritten whole on every mutation,
//! rather than reusing `SlottedPage`'s append-only directory — a B-tree
//! insert must land a new entry in the middle of the existing order, which
//! an append-only slot directory cannot do without its own compaction
//! pass. Leaf sibling links are carried in the generic `PageHeader`'s
//! `prev_page_id`/`next_page_id` fields, so no extra header is needed.

use crate::engine::buffer::{BufferReader, BufferWriter};
use crate::engine::constants::PAGE_HEADER_SIZE;
use crate::engine::page_buffer::{DocumentLocation, PageBuffer};
use crate::key::IndexKey;
use crate::{Error, Result};

const COUNT_FIELD_SIZE: usize = 2;
const LOCATION_SIZE: usize = 6; // page_id u32 + slot_index u16

/// Bytes usable for entries below `PageHeader` (spec.md §3's per-type
/// overhead budget); leaf/internal both reserve one `count` field.
pub(crate) fn usable_capacity(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE - COUNT_FIELD_SIZE
}

pub(crate) fn leaf_entry_size(key: &IndexKey) -> usize {
    key.encoded_len() + LOCATION_SIZE
}

pub(crate) fn encode_leaf(buf: &mut PageBuffer, entries: &[(IndexKey, DocumentLocation)]) {
    let mut writer = BufferWriter::at(buf.as_mut_slice(), PAGE_HEADER_SIZE);
    writer.write_u16(entries.len() as u16);
    for (key, loc) in entries {
        writer.write_index_key(key);
        writer.write_document_location(*loc);
    }
}

pub(crate) fn decode_leaf(buf: &PageBuffer) -> Result<Vec<(IndexKey, DocumentLocation)>> {
    let mut reader = BufferReader::at(buf.as_slice(), PAGE_HEADER_SIZE);
    let count = reader.read_u16();
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = reader.read_index_key()?;
        let loc = reader.read_document_location();
        out.push((key, loc));
    }
    Ok(out)
}

/// `children.len() == separators.len() + 1` (standard B+tree shape: n
/// separators partition n+1 children).
pub(crate) fn encode_internal(buf: &mut PageBuffer, children: &[u32], separators: &[IndexKey]) {
    debug_assert_eq!(children.len(), separators.len() + 1);
    let mut writer = BufferWriter::at(buf.as_mut_slice(), PAGE_HEADER_SIZE);
    writer.write_u16(separators.len() as u16);
    writer.write_u32(children[0]);
    for (sep, child) in separators.iter().zip(&children[1..]) {
        writer.write_index_key(sep);
        writer.write_u32(*child);
    }
}

pub(crate) fn decode_internal(buf: &PageBuffer) -> Result<(Vec<u32>, Vec<IndexKey>)> {
    let mut reader = BufferReader::at(buf.as_slice(), PAGE_HEADER_SIZE);
    let count = reader.read_u16();
    let mut children = Vec::with_capacity(count as usize + 1);
    let mut separators = Vec::with_capacity(count as usize);
    children.push(reader.read_u32());
    for _ in 0..count {
        separators.push(reader.read_index_key()?);
        children.push(reader.read_u32());
    }
    Ok((children, separators))
}

/// Finds the child index to descend into for `key`: the number of
/// separators `<= key` (spec.md §4.5 ordering: a separator equals the
/// smallest key in its right subtree, so matching keys descend right).
pub(crate) fn child_index_for(separators: &[IndexKey], key: &IndexKey) -> usize {
    separators.partition_point(|s| s <= key)
}

/// Position of the first entry `>= key` (stable insertion point for
/// ascending duplicates and the lower bound for inclusive range scans).
pub(crate) fn lower_bound(entries: &[(IndexKey, DocumentLocation)], key: &IndexKey) -> usize {
    entries.partition_point(|(k, _)| k < key)
}

/// Position just past the last entry `== key` (stable append point for a
/// new duplicate and the lower bound for exclusive range scans).
pub(crate) fn upper_bound(entries: &[(IndexKey, DocumentLocation)], key: &IndexKey) -> usize {
    entries.partition_point(|(k, _)| k <= key)
}

pub(crate) fn assert_leaf_or_internal(page_type: crate::engine::page::PageType) -> Result<()> {
    use crate::engine::page::PageType;
    match page_type {
        PageType::BTreeLeaf | PageType::BTreeInternal => Ok(()),
        other => Err(Error::index_corrupt(format!(
            "expected a B-tree page, found {other:?}"
        ))),
    }
}
