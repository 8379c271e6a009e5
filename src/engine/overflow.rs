//! `OverflowChain` (spec.md §3/§4.6): a linked list of pages holding a
//! single oversize payload, referenced from its owning slot by a 10-byte
//! stub `{ totalLen u32, firstOverflowPageId u32, reserved u16 }`.
//!
//! Grounded on `engine::data_block`/`data_service`'s spill
//! path (records bigger than one page become a chain of `DataBlock`
//! pages), generalized to the tagged slotted-page scheme this kernel
//! uses. Unlike `page_chain` (used for the process-wide FreeSpaceMap /
//! Dictionary / Catalog, which are rewritten whole at checkpoint),
//! overflow pages are written transactionally through the same
//! `StorageEngine::write_page`/`allocate_page` path as any other document
//! page, since a half-written overflow chain must be exactly as
//! invisible-until-commit as any other dirty page.

use crate::engine::constants::{OVERFLOW_STUB_SIZE, PAGE_HEADER_SIZE};
use crate::engine::page::{PageHeader, PageType};
use crate::engine::page_buffer::PageBuffer;
use crate::engine::storage_engine::StorageEngine;
use crate::engine::transaction::Transaction;
use crate::Result;

const CHUNK_LEN_FIELD: usize = 2;

fn payload_capacity(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE - CHUNK_LEN_FIELD
}

pub(crate) struct OverflowChain;

impl OverflowChain {
    /// Encodes the 10-byte stub stored in the owning slot.
    pub fn encode_stub(total_len: u32, first_page_id: u32) -> [u8; OVERFLOW_STUB_SIZE] {
        let mut out = [0u8; OVERFLOW_STUB_SIZE];
        out[0..4].copy_from_slice(&total_len.to_le_bytes());
        out[4..8].copy_from_slice(&first_page_id.to_le_bytes());
        out
    }

    pub fn decode_stub(bytes: &[u8]) -> (u32, u32) {
        let total_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let first_page_id = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        (total_len, first_page_id)
    }

    /// Writes `data` across as many freshly allocated overflow pages as
    /// needed and returns the head page id.
    pub fn write(engine: &StorageEngine, tx: Transaction, data: &[u8]) -> Result<u32> {
        let page_size = engine.page_size();
        let capacity = payload_capacity(page_size);
        let chunks: Vec<&[u8]> = data.chunks(capacity.max(1)).collect();
        let mut page_ids = Vec::with_capacity(chunks.len().max(1));
        for _ in 0..chunks.len().max(1) {
            page_ids.push(engine.allocate_page(Some(tx))?);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            let page_id = page_ids[i];
            let next_page_id = page_ids.get(i + 1).copied().unwrap_or(0);
            let mut buf = PageBuffer::zeroed(page_id, page_size);
            let header = PageHeader {
                page_id,
                page_type: PageType::Overflow,
                flags: 0,
                next_page_id,
                prev_page_id: if i == 0 { 0 } else { page_ids[i - 1] },
                checksum: 0,
            };
            header.write(&mut crate::engine::buffer::BufferWriter::new(buf.as_mut_slice()));
            let mut writer =
                crate::engine::buffer::BufferWriter::at(buf.as_mut_slice(), PAGE_HEADER_SIZE);
            writer.write_u16(chunk.len() as u16);
            writer.write_bytes(chunk);
            engine.write_page(page_id, tx, buf.into_bytes())?;
        }
        Ok(page_ids[0])
    }

    /// Reassembles the payload by walking `nextPageId` links (spec.md §3
    /// invariant: "concatenating the payload of the chain in next-order
    /// yields the logical value exactly").
    pub fn read(engine: &StorageEngine, tx: Option<Transaction>, first_page_id: u32, total_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(total_len);
        let mut page_id = first_page_id;
        while page_id != 0 {
            let bytes = engine.read_page(page_id, tx)?;
            let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(&bytes))?;
            let mut reader = crate::engine::buffer::BufferReader::at(&bytes, PAGE_HEADER_SIZE);
            let len = reader.read_u16() as usize;
            out.extend_from_slice(reader.read_bytes(len));
            page_id = header.next_page_id;
        }
        Ok(out)
    }

    /// Releases every page in the chain back to the free-space map
    /// (spec.md §4.6 `delete`).
    pub fn release(engine: &StorageEngine, tx: Option<Transaction>, first_page_id: u32) -> Result<()> {
        let mut page_id = first_page_id;
        while page_id != 0 {
            let bytes = engine.read_page(page_id, tx)?;
            let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(&bytes))?;
            engine.deallocate_page(page_id)?;
            page_id = header.next_page_id;
        }
        Ok(())
    }
}
