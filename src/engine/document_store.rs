//! `DocumentStore` (spec.md §4.6): stores variable-length records on
//! slotted pages, routes large records to overflow chains, and manages
//! update-in-place vs. move semantics.
//!
//! Grounded on `engine::data_service::DataService` (the
//! type that decides whether a record fits on its current page, spills
//! to a `DataBlock` chain, or moves on update), rebuilt against this
//! kernel's `SlottedPage`/`OverflowChain` rather than a
//! `DataBlock` linked-list-of-fixed-blocks representation.

use crate::engine::catalog::{CollectionMetadata, IndexKind, SecondaryIndexDescriptor};
use crate::engine::constants::{OVERFLOW_STUB_SIZE, SLOT_ENTRY_SIZE};
use crate::engine::overflow::OverflowChain;
use crate::engine::page::{PageHeader, PageType};
use crate::engine::page_buffer::{DocumentLocation, PageBuffer};
use crate::engine::slotted_page::SlottedPage;
use crate::engine::storage_engine::StorageEngine;
use crate::engine::transaction::Transaction;
use crate::{Error, Result};
use async_stream::try_stream;
use futures::Stream;
use log::trace;

pub struct DocumentStore<'a> {
    engine: &'a StorageEngine,
    meta: CollectionMetadata,
}

impl<'a> DocumentStore<'a> {
    pub fn open(engine: &'a StorageEngine, collection_name: &str) -> Self {
        let meta = engine.catalog().get_or_create(collection_name);
        DocumentStore { engine, meta }
    }

    fn save_meta(&self) {
        self.engine.catalog().save(self.meta.clone());
    }

    /// Records a `BTreeIndex`'s root page against this collection's
    /// catalog entry (spec.md §3 `CollectionMetadata.secondary_indexes`),
    /// so the index's root survives a reopen via the catalog instead of
    /// requiring the caller to remember `root_page_id()` out-of-band.
    pub fn register_secondary_index(&mut self, name: &str, field_path: &str, unique: bool, root_page_id: u32) {
        if let Some(existing) = self.meta.secondary_indexes.iter_mut().find(|i| i.name == name) {
            existing.root_page_id = root_page_id;
        } else {
            self.meta.secondary_indexes.push(SecondaryIndexDescriptor {
                name: name.to_string(),
                field_path: field_path.to_string(),
                kind: IndexKind::BTree,
                unique,
                root_page_id,
            });
        }
        self.save_meta();
    }

    /// The root page id of a previously `register_secondary_index`-ed
    /// index, if any.
    pub fn secondary_index_root(&self, name: &str) -> Option<u32> {
        self.meta.secondary_indexes.iter().find(|i| i.name == name).map(|i| i.root_page_id)
    }

    /// Finds a data page with room for `needed` bytes, or allocates and
    /// links a fresh one into the collection's data-page chain.
    fn find_or_allocate_data_page(&mut self, tx: Transaction, needed: usize) -> Result<u32> {
        if let Some(page_id) = self.engine.free_space_map().find_page_with_space(needed) {
            return Ok(page_id);
        }
        let page_id = self.engine.allocate_page(Some(tx))?;
        let page_size = self.engine.page_size();
        let mut buf = PageBuffer::zeroed(page_id, page_size);
        let header = PageHeader {
            page_id,
            page_type: PageType::Slotted,
            flags: 0,
            next_page_id: self.meta.data_root_page_id,
            prev_page_id: 0,
            checksum: 0,
        };
        header.write(&mut crate::engine::buffer::BufferWriter::new(buf.as_mut_slice()));
        SlottedPage::init(&mut buf);
        self.engine.write_page(page_id, tx, buf.into_bytes())?;
        self.meta.data_root_page_id = page_id;
        self.save_meta();
        Ok(page_id)
    }

    fn insert_slot(&mut self, tx: Transaction, payload: &[u8], is_overflow: bool) -> Result<DocumentLocation> {
        let needed = SLOT_ENTRY_SIZE + payload.len();
        let page_id = self.find_or_allocate_data_page(tx, needed)?;
        let bytes = self.engine.read_page(page_id, Some(tx))?;
        let mut buf = PageBuffer::from_bytes(page_id, bytes);
        let slot_index;
        let free;
        {
            let mut page = SlottedPage::new(&mut buf);
            slot_index = page.insert(payload, is_overflow)?;
            free = page.free_space();
        }
        self.engine.write_page(page_id, tx, buf.into_bytes())?;
        self.engine.free_space_map().note_data_page(page_id, free);
        Ok(DocumentLocation::new(page_id, slot_index))
    }

    /// Spills to an overflow chain first if `record.len() >
    /// maxInlineSize` (spec.md §4.6).
    pub fn insert(&mut self, tx: Transaction, record: &[u8]) -> Result<DocumentLocation> {
        let max_inline = self.engine.max_inline_record_size();
        if record.len() > max_inline {
            trace!("document_store: spilling {}-byte record to overflow", record.len());
            let first_page = OverflowChain::write(self.engine, tx, record)?;
            let stub = OverflowChain::encode_stub(record.len() as u32, first_page);
            self.insert_slot(tx, &stub, true)
        } else {
            self.insert_slot(tx, record, false)
        }
    }

    /// Dereferences the slot; if it holds an overflow stub, walks the
    /// chain to reassemble the full payload.
    pub fn read(&self, location: DocumentLocation, tx: Option<Transaction>) -> Result<Vec<u8>> {
        let bytes = self.engine.read_page(location.page_id(), tx)?;
        let mut buf = PageBuffer::from_bytes(location.page_id(), bytes);
        let page = SlottedPage::new(&mut buf);
        let is_overflow = page.is_overflow(location.slot_index())?;
        let raw = page.read(location.slot_index())?.to_vec();
        if is_overflow {
            let (total_len, first_page_id) = OverflowChain::decode_stub(&raw);
            OverflowChain::read(self.engine, tx, first_page_id, total_len as usize)
        } else {
            Ok(raw)
        }
    }

    /// Overwrite-in-place when the new record still fits the slot;
    /// otherwise a move (spec.md §4.6). Callers are responsible for
    /// updating any index entries pointing at the old `DocumentLocation`.
    pub fn update(&mut self, tx: Transaction, location: DocumentLocation, new_record: &[u8]) -> Result<DocumentLocation> {
        let max_inline = self.engine.max_inline_record_size();
        let bytes = self.engine.read_page(location.page_id(), Some(tx))?;
        let mut buf = PageBuffer::from_bytes(location.page_id(), bytes);
        let (was_overflow, old_len) = {
            let page = SlottedPage::new(&mut buf);
            (
                page.is_overflow(location.slot_index())?,
                page.slot_len(location.slot_index())?,
            )
        };
        let old_stub = if was_overflow {
            let page = SlottedPage::new(&mut buf);
            Some(page.read(location.slot_index())?.to_vec())
        } else {
            None
        };

        let fits_new_inline = new_record.len() <= max_inline;

        if !was_overflow && fits_new_inline && new_record.len() <= old_len as usize {
            let free = {
                let mut page = SlottedPage::new(&mut buf);
                page.overwrite_in_place(location.slot_index(), new_record, false)?;
                page.free_space()
            };
            self.engine.write_page(location.page_id(), tx, buf.into_bytes())?;
            self.engine.free_space_map().note_data_page(location.page_id(), free);
            return Ok(location);
        }

        // Overflow release (both the "was overflow, new fits inline" and
        // the generic "move" path need the old chain released first).
        if was_overflow {
            let (_, first_page_id) = OverflowChain::decode_stub(old_stub.as_ref().unwrap());
            OverflowChain::release(self.engine, Some(tx), first_page_id)?;
        }

        if !was_overflow && fits_new_inline {
            // New payload is larger than the old slot but still inline:
            // the old slot can't grow in place, so this falls through to
            // the general move path below (tombstone + fresh slot).
        }

        {
            let mut page = SlottedPage::new(&mut buf);
            page.tombstone(location.slot_index())?;
        }
        self.engine.write_page(location.page_id(), tx, buf.into_bytes())?;
        self.engine
            .free_space_map()
            .note_data_page(location.page_id(), 0);

        self.insert(tx, new_record)
    }

    /// Tombstones the slot; if it held an overflow stub, releases the
    /// chain (spec.md §4.6).
    pub fn delete(&mut self, tx: Transaction, location: DocumentLocation) -> Result<()> {
        let bytes = self.engine.read_page(location.page_id(), Some(tx))?;
        let mut buf = PageBuffer::from_bytes(location.page_id(), bytes);
        let (is_overflow, stub) = {
            let page = SlottedPage::new(&mut buf);
            let is_overflow = page.is_overflow(location.slot_index())?;
            let stub = if is_overflow {
                Some(page.read(location.slot_index())?.to_vec())
            } else {
                None
            };
            (is_overflow, stub)
        };
        if is_overflow {
            let (_, first_page_id) = OverflowChain::decode_stub(&stub.unwrap());
            OverflowChain::release(self.engine, Some(tx), first_page_id)?;
        }
        let free = {
            let mut page = SlottedPage::new(&mut buf);
            page.tombstone(location.slot_index())?;
            page.free_space()
        };
        self.engine.write_page(location.page_id(), tx, buf.into_bytes())?;
        self.engine.free_space_map().note_data_page(location.page_id(), free);
        Ok(())
    }

    /// Collects every live `(DocumentLocation, bytes)` pair in the
    /// collection's data-page chain, tombstones skipped silently (spec.md
    /// §4.6). A genuinely lazy `Stream` isn't needed internally since
    /// every caller in this kernel (tests, the catalog/index rebuild
    /// paths) consumes the whole collection; collecting eagerly avoids
    /// holding page buffers borrowed across an await point.
    pub fn scan(&self, tx: Option<Transaction>) -> Result<Vec<(DocumentLocation, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut page_id = self.meta.data_root_page_id;
        while page_id != 0 {
            let bytes = self.engine.read_page(page_id, tx)?;
            let mut buf = PageBuffer::from_bytes(page_id, bytes);
            let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
            let page = SlottedPage::new(&mut buf);
            for slot_index in page.live_slots() {
                let is_overflow = page.is_overflow(slot_index)?;
                let raw = page.read(slot_index)?.to_vec();
                let payload = if is_overflow {
                    let (total_len, first_page_id) = OverflowChain::decode_stub(&raw);
                    OverflowChain::read(self.engine, tx, first_page_id, total_len as usize)?
                } else {
                    raw
                };
                out.push((DocumentLocation::new(page_id, slot_index), payload));
            }
            page_id = header.next_page_id;
        }
        Ok(out)
    }

    /// Lazy counterpart to `scan`, in the `try_stream!` idiom
    /// (`engine::lite_engine::query`'s `impl Stream<Item = Result<...>>`
    /// collection readers): yields one page's live records at a time
    /// instead of materializing the whole collection up front.
    pub fn scan_stream(
        &'a self,
        tx: Option<Transaction>,
    ) -> impl Stream<Item = Result<(DocumentLocation, Vec<u8>)>> + 'a {
        try_stream! {
            let mut page_id = self.meta.data_root_page_id;
            while page_id != 0 {
                let bytes = self.engine.read_page(page_id, tx)?;
                let mut buf = PageBuffer::from_bytes(page_id, bytes);
                let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
                let page = SlottedPage::new(&mut buf);
                for slot_index in page.live_slots() {
                    let is_overflow = page.is_overflow(slot_index)?;
                    let raw = page.read(slot_index)?.to_vec();
                    let payload = if is_overflow {
                        let (total_len, first_page_id) = OverflowChain::decode_stub(&raw);
                        OverflowChain::read(self.engine, tx, first_page_id, total_len as usize)?
                    } else {
                        raw
                    };
                    yield (DocumentLocation::new(page_id, slot_index), payload);
                }
                page_id = header.next_page_id;
            }
        }
    }
}

#[allow(dead_code)]
fn assert_stub_size() {
    let _: [u8; OVERFLOW_STUB_SIZE] = OverflowChain::encode_stub(0, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::page_file::test_support::MemBacking;

    fn test_engine() -> StorageEngine {
        let config = EngineConfig::builder().page_size(4096).build().unwrap();
        StorageEngine::create_new(
            Box::new(MemBacking::new()),
            Box::new(MemBacking::new()),
            config,
        )
        .unwrap()
    }

    #[test]
    fn insert_then_read_roundtrips_small_record() {
        let engine = test_engine();
        let tx = engine.begin_transaction();
        let mut store = DocumentStore::open(&engine, "users");
        let loc = store.insert(tx, b"{\"_id\":1,\"name\":\"Alice\"}").unwrap();
        engine.commit(tx).unwrap();
        let store = DocumentStore::open(&engine, "users");
        assert_eq!(store.read(loc, None).unwrap(), b"{\"_id\":1,\"name\":\"Alice\"}");
    }

    #[test]
    fn insert_large_record_spills_to_overflow_and_roundtrips() {
        let engine = test_engine();
        let tx = engine.begin_transaction();
        let mut store = DocumentStore::open(&engine, "blobs");
        let payload = vec![0x42u8; 3 * 1024 * 1024];
        let loc = store.insert(tx, &payload).unwrap();
        let read_back = store.read(loc, Some(tx)).unwrap();
        assert_eq!(read_back, payload);
        engine.commit(tx).unwrap();
    }

    #[test]
    fn delete_then_scan_skips_tombstone() {
        let engine = test_engine();
        let tx = engine.begin_transaction();
        let mut store = DocumentStore::open(&engine, "users");
        let a = store.insert(tx, b"a").unwrap();
        let _b = store.insert(tx, b"b").unwrap();
        store.delete(tx, a).unwrap();
        let scanned = store.scan(Some(tx)).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].1, b"b");
    }

    #[test]
    fn update_move_returns_new_location_when_record_grows() {
        let engine = test_engine();
        let tx = engine.begin_transaction();
        let mut store = DocumentStore::open(&engine, "users");
        let loc = store.insert(tx, b"short").unwrap();
        let new_loc = store.update(tx, loc, &vec![b'x'; 1000]).unwrap();
        assert_eq!(store.read(new_loc, Some(tx)).unwrap().len(), 1000);
    }

    /// spec.md §8 scenario 5: deleting an overflow record returns every
    /// page of its chain to the free-space map.
    #[test]
    fn deleting_overflow_record_frees_its_whole_chain() {
        let engine = test_engine();
        let tx = engine.begin_transaction();
        let mut store = DocumentStore::open(&engine, "blobs");
        let payload = vec![0x7Eu8; 3 * 1024 * 1024];
        let loc = store.insert(tx, &payload).unwrap();
        engine.commit(tx).unwrap();

        // Mirrors `OverflowChain::payload_capacity` (page header + a
        // u16 chunk-length field per page).
        let capacity = engine.page_size() - crate::engine::constants::PAGE_HEADER_SIZE - 2;
        let expected_chain_len = payload.len().div_ceil(capacity);

        let before = engine.free_space_map().free_count();
        let tx2 = engine.begin_transaction();
        let mut store = DocumentStore::open(&engine, "blobs");
        store.delete(tx2, loc).unwrap();
        engine.commit(tx2).unwrap();
        let after = engine.free_space_map().free_count();

        assert_eq!(after - before, expected_chain_len);
    }
}
