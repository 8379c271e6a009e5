//! Shared chained-page codec used by `FreeSpaceMap`, `Dictionary` and
//! `CollectionCatalog` — all three are, per spec.md §3, "persisted as a
//! chain of pages linked by nextPageId". Grounded on
//! `engine::pages::collection_page`/`header_page`'s pattern of spreading a
//! length-prefixed payload across as many linked pages as it takes.

use crate::engine::constants::PAGE_HEADER_SIZE;
use crate::engine::page::{PageHeader, PageType};
use crate::engine::page_buffer::PageBuffer;
use crate::engine::page_file::PageFile;
use crate::Result;

const CHUNK_LEN_FIELD: usize = 2;

fn payload_capacity(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE - CHUNK_LEN_FIELD
}

/// Serializes `data` across as many linked pages of `page_type` as
/// needed, allocating each page through `allocate`, and returns the head
/// page id.
pub(crate) fn write_chain(
    page_file: &PageFile,
    mut allocate: impl FnMut() -> Result<u32>,
    page_type: PageType,
    data: &[u8],
) -> Result<u32> {
    let page_size = page_file.page_size();
    let capacity = payload_capacity(page_size);
    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![&[]]
    } else {
        data.chunks(capacity).collect()
    };
    let page_ids: Vec<u32> = chunks.iter().map(|_| allocate()).collect::<Result<_>>()?;
    for (i, chunk) in chunks.iter().enumerate() {
        let page_id = page_ids[i];
        let next_page_id = page_ids.get(i + 1).copied().unwrap_or(0);
        let mut buf = PageBuffer::zeroed(page_id, page_size);
        let header = PageHeader {
            page_id,
            page_type,
            flags: 0,
            next_page_id,
            prev_page_id: if i == 0 { 0 } else { page_ids[i - 1] },
            checksum: 0,
        };
        header.write(&mut crate::engine::buffer::BufferWriter::new(buf.as_mut_slice()));
        let mut writer = crate::engine::buffer::BufferWriter::at(buf.as_mut_slice(), PAGE_HEADER_SIZE);
        writer.write_u16(chunk.len() as u16);
        writer.write_bytes(chunk);
        page_file.write_page_mapped(page_id, buf.as_slice())?;
    }
    Ok(page_ids[0])
}

/// Reassembles the payload written by `write_chain`, following
/// `nextPageId` links until it hits 0.
pub(crate) fn read_chain(page_file: &PageFile, head_page_id: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut page_id = head_page_id;
    while page_id != 0 {
        let bytes = page_file.read_page_positional(page_id)?;
        let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(&bytes))?;
        let mut reader = crate::engine::buffer::BufferReader::at(&bytes, PAGE_HEADER_SIZE);
        let len = reader.read_u16() as usize;
        out.extend_from_slice(reader.read_bytes(len));
        page_id = header.next_page_id;
    }
    Ok(out)
}
