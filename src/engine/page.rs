//! `PageHeader` and `PageType` (spec.md §3), grounded on
//! `pages::base_page::BasePage`'s header layout but simplified: `BasePage`
//! keeps a live wrapper with an unsafe dirty-pointer back into its owning
//! buffer (`DirtyFlag`); here a page header is just a plain value read
//! from / written into an owned `PageBuffer` (see `page_buffer.rs`),
//! which keeps the whole engine free of self-referential unsafe plumbing.

use crate::engine::buffer::{BufferReader, BufferWriter};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    FileHeader = 0,
    FreeSpaceMap = 1,
    Dictionary = 2,
    Slotted = 3,
    Overflow = 4,
    BTreeInternal = 5,
    BTreeLeaf = 6,
    CollectionCatalog = 7,
    SchemaHistory = 8,
}

impl PageType {
    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => PageType::FileHeader,
            1 => PageType::FreeSpaceMap,
            2 => PageType::Dictionary,
            3 => PageType::Slotted,
            4 => PageType::Overflow,
            5 => PageType::BTreeInternal,
            6 => PageType::BTreeLeaf,
            7 => PageType::CollectionCatalog,
            8 => PageType::SchemaHistory,
            other => return Err(Error::page_corrupt(format!("unknown page type {other}"))),
        })
    }
}

/// { pageId u32, pageType u8, flags u8, nextPageId u32, prevPageId u32,
/// checksum u32 } packed into `PAGE_HEADER_SIZE` bytes with trailing
/// padding reserved for future use (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_id: u32,
    pub page_type: PageType,
    pub flags: u8,
    pub next_page_id: u32,
    pub prev_page_id: u32,
    pub checksum: u32,
}

const P_PAGE_ID: usize = 0;
const P_PAGE_TYPE: usize = 4;
const P_FLAGS: usize = 5;
const P_NEXT_PAGE_ID: usize = 6;
const P_PREV_PAGE_ID: usize = 10;
const P_CHECKSUM: usize = 14;

impl PageHeader {
    pub fn new(page_id: u32, page_type: PageType) -> Self {
        PageHeader {
            page_id,
            page_type,
            flags: 0,
            next_page_id: 0,
            prev_page_id: 0,
            checksum: 0,
        }
    }

    pub fn read(reader: &mut BufferReader) -> Result<Self> {
        reader.seek(P_PAGE_ID);
        let page_id = reader.read_u32();
        let page_type = PageType::from_u8(reader.read_u8())?;
        let flags = reader.read_u8();
        let next_page_id = reader.read_u32();
        let prev_page_id = reader.read_u32();
        let checksum = reader.read_u32();
        Ok(PageHeader {
            page_id,
            page_type,
            flags,
            next_page_id,
            prev_page_id,
            checksum,
        })
    }

    pub fn write(&self, writer: &mut BufferWriter) {
        writer.seek(P_PAGE_ID);
        writer.write_u32(self.page_id);
        writer.write_u8(self.page_type as u8);
        writer.write_u8(self.flags);
        writer.write_u32(self.next_page_id);
        writer.write_u32(self.prev_page_id);
        writer.write_u32(self.checksum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::{BufferReader, BufferWriter};

    #[test]
    fn header_roundtrips() {
        let mut buf = vec![0u8; 64];
        let header = PageHeader {
            page_id: 7,
            page_type: PageType::Slotted,
            flags: 0b101,
            next_page_id: 9,
            prev_page_id: 3,
            checksum: 0xdead_beef,
        };
        header.write(&mut BufferWriter::new(&mut buf));
        let read_back = PageHeader::read(&mut BufferReader::new(&buf)).unwrap();
        assert_eq!(read_back.page_id, 7);
        assert_eq!(read_back.page_type, PageType::Slotted);
        assert_eq!(read_back.next_page_id, 9);
        assert_eq!(read_back.prev_page_id, 3);
        assert_eq!(read_back.checksum, 0xdead_beef);
    }
}
