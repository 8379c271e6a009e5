//! `BTreeIndex` (spec.md §4.5): the ordered secondary-index engine mapping
//! `IndexKey -> DocumentLocation`, with split/propagate insert, range scans
//! and a stateful cursor.
//!
//! Grounded on the `engine::pages::index_page` + `engine::index`
//! module pair (binary-search descent over a page tree, split-and-promote
//! on overflow, sibling-linked leaves for range scans), rebuilt around this
//! kernel's `IndexKey`/`StorageEngine` rather than `bson::Value` keys and
//! a `TransactionService`-mediated page cache.

mod node;

pub mod cursor;

use crate::engine::page::{PageHeader, PageType};
use crate::engine::page_buffer::{DocumentLocation, PageBuffer};
use crate::engine::storage_engine::StorageEngine;
use crate::engine::transaction::Transaction;
use crate::key::IndexKey;
use crate::{Error, Result};
use async_stream::try_stream;
use futures::Stream;
use log::trace;

pub use crate::utils::Direction;
pub use cursor::Cursor;

enum InsertOutcome {
    Inserted,
    Split { separator: IndexKey, new_right_page_id: u32 },
}

/// An open handle to one secondary index rooted at `root_page_id`. Callers
/// (the collection layer) own persisting `root_page_id` back into the
/// index's `SecondaryIndexDescriptor` after a mutating call, the same way
/// `DocumentStore` persists `data_root_page_id` after `find_or_allocate_data_page`.
pub struct BTreeIndex<'a> {
    engine: &'a StorageEngine,
    name: String,
    unique: bool,
    root_page_id: u32,
}

impl<'a> BTreeIndex<'a> {
    /// Allocates an empty leaf page and returns a fresh, empty index.
    pub fn create(engine: &'a StorageEngine, tx: Transaction, name: &str, unique: bool) -> Result<Self> {
        let root_page_id = engine.allocate_page(Some(tx))?;
        let mut buf = PageBuffer::zeroed(root_page_id, engine.page_size());
        write_header(&mut buf, root_page_id, PageType::BTreeLeaf, 0, 0);
        node::encode_leaf(&mut buf, &[]);
        engine.write_page(root_page_id, tx, buf.into_bytes())?;
        Ok(BTreeIndex {
            engine,
            name: name.to_string(),
            unique,
            root_page_id,
        })
    }

    pub fn open(engine: &'a StorageEngine, name: &str, root_page_id: u32, unique: bool) -> Self {
        BTreeIndex {
            engine,
            name: name.to_string(),
            unique,
            root_page_id,
        }
    }

    pub fn root_page_id(&self) -> u32 {
        self.root_page_id
    }

    /// Descends to the leaf, inserting in key order; splits and propagates
    /// upward on overflow, minting a new root if the split reaches the top
    /// (spec.md §4.5).
    pub fn insert(&mut self, tx: Transaction, key: IndexKey, location: DocumentLocation) -> Result<()> {
        match self.insert_into(tx, self.root_page_id, &key, location)? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Split { separator, new_right_page_id } => {
                let new_root_id = self.engine.allocate_page(Some(tx))?;
                let mut buf = PageBuffer::zeroed(new_root_id, self.engine.page_size());
                write_header(&mut buf, new_root_id, PageType::BTreeInternal, 0, 0);
                node::encode_internal(&mut buf, &[self.root_page_id, new_right_page_id], &[separator]);
                self.engine.write_page(new_root_id, tx, buf.into_bytes())?;
                trace!("btree[{}]: root split, new root {new_root_id}", self.name);
                self.root_page_id = new_root_id;
                Ok(())
            }
        }
    }

    fn insert_into(&self, tx: Transaction, page_id: u32, key: &IndexKey, location: DocumentLocation) -> Result<InsertOutcome> {
        let bytes = self.engine.read_page(page_id, Some(tx))?;
        let mut buf = PageBuffer::from_bytes(page_id, bytes);
        let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
        node::assert_leaf_or_internal(header.page_type)?;

        match header.page_type {
            PageType::BTreeLeaf => {
                let mut entries = node::decode_leaf(&buf)?;
                let lb = node::lower_bound(&entries, key);
                if self.unique && lb < entries.len() && &entries[lb].0 == key {
                    return Err(Error::duplicate_key(&self.name, key));
                }
                let insert_at = node::upper_bound(&entries, key);
                entries.insert(insert_at, (key.clone(), location));

                let capacity = node::usable_capacity(self.engine.page_size());
                let total: usize = entries.iter().map(|(k, _)| node::leaf_entry_size(k)).sum();
                if total <= capacity {
                    node::encode_leaf(&mut buf, &entries);
                    self.engine.write_page(page_id, tx, buf.into_bytes())?;
                    return Ok(InsertOutcome::Inserted);
                }

                let mid = entries.len() / 2;
                let right_entries = entries.split_off(mid);
                let separator = right_entries[0].0.clone();

                let new_right_id = self.engine.allocate_page(Some(tx))?;
                let old_right_sibling = header.next_page_id;

                let mut left_buf = buf;
                write_header(&mut left_buf, page_id, PageType::BTreeLeaf, header.prev_page_id, new_right_id);
                node::encode_leaf(&mut left_buf, &entries);
                self.engine.write_page(page_id, tx, left_buf.into_bytes())?;

                let mut right_buf = PageBuffer::zeroed(new_right_id, self.engine.page_size());
                write_header(&mut right_buf, new_right_id, PageType::BTreeLeaf, page_id, old_right_sibling);
                node::encode_leaf(&mut right_buf, &right_entries);
                self.engine.write_page(new_right_id, tx, right_buf.into_bytes())?;

                if old_right_sibling != 0 {
                    let sib_bytes = self.engine.read_page(old_right_sibling, Some(tx))?;
                    let mut sib_buf = PageBuffer::from_bytes(old_right_sibling, sib_bytes);
                    let sib_header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(sib_buf.as_slice()))?;
                    write_header(&mut sib_buf, old_right_sibling, PageType::BTreeLeaf, new_right_id, sib_header.next_page_id);
                    self.engine.write_page(old_right_sibling, tx, sib_buf.into_bytes())?;
                }

                Ok(InsertOutcome::Split { separator, new_right_page_id: new_right_id })
            }
            PageType::BTreeInternal => {
                let (mut children, mut separators) = node::decode_internal(&buf)?;
                let idx = node::child_index_for(&separators, key);
                match self.insert_into(tx, children[idx], key, location)? {
                    InsertOutcome::Inserted => Ok(InsertOutcome::Inserted),
                    InsertOutcome::Split { separator, new_right_page_id } => {
                        separators.insert(idx, separator);
                        children.insert(idx + 1, new_right_page_id);

                        let capacity = node::usable_capacity(self.engine.page_size());
                        let total: usize = separators.iter().map(|k| k.encoded_len()).sum::<usize>()
                            + 4 * children.len();
                        if total <= capacity {
                            node::encode_internal(&mut buf, &children, &separators);
                            self.engine.write_page(page_id, tx, buf.into_bytes())?;
                            return Ok(InsertOutcome::Inserted);
                        }

                        let mid = separators.len() / 2;
                        let promoted = separators[mid].clone();
                        let right_separators = separators.split_off(mid + 1);
                        let right_children = children.split_off(mid + 1);
                        separators.pop(); // drop `promoted`, now owned by the parent

                        node::encode_internal(&mut buf, &children, &separators);
                        self.engine.write_page(page_id, tx, buf.into_bytes())?;

                        let new_right_id = self.engine.allocate_page(Some(tx))?;
                        let mut right_buf = PageBuffer::zeroed(new_right_id, self.engine.page_size());
                        write_header(&mut right_buf, new_right_id, PageType::BTreeInternal, 0, 0);
                        node::encode_internal(&mut right_buf, &right_children, &right_separators);
                        self.engine.write_page(new_right_id, tx, right_buf.into_bytes())?;

                        Ok(InsertOutcome::Split { separator: promoted, new_right_page_id: new_right_id })
                    }
                }
            }
            _ => unreachable!("checked above"),
        }
    }

    fn leaf_for(&self, tx: Option<Transaction>, key: &IndexKey) -> Result<(u32, PageBuffer, PageHeader)> {
        let mut page_id = self.root_page_id;
        loop {
            let bytes = self.engine.read_page(page_id, tx)?;
            let buf = PageBuffer::from_bytes(page_id, bytes);
            let header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
            node::assert_leaf_or_internal(header.page_type)?;
            match header.page_type {
                PageType::BTreeLeaf => return Ok((page_id, buf, header)),
                PageType::BTreeInternal => {
                    let (children, separators) = node::decode_internal(&buf)?;
                    let idx = node::child_index_for(&separators, key);
                    page_id = children[idx];
                }
                _ => unreachable!(),
            }
        }
    }

    fn first_leaf(&self, tx: Option<Transaction>) -> Result<(u32, PageBuffer, PageHeader)> {
        self.leaf_for(tx, &IndexKey::MinKey)
    }

    fn last_leaf(&self, tx: Option<Transaction>) -> Result<(u32, PageBuffer, PageHeader)> {
        self.leaf_for(tx, &IndexKey::MaxKey)
    }

    /// Returns the first matching location, if any (spec.md §4.5).
    pub fn try_find(&self, tx: Option<Transaction>, key: &IndexKey) -> Result<Option<DocumentLocation>> {
        let (_, buf, _) = self.leaf_for(tx, key)?;
        let entries = node::decode_leaf(&buf)?;
        let idx = node::lower_bound(&entries, key);
        Ok(entries.get(idx).filter(|(k, _)| k == key).map(|(_, loc)| *loc))
    }

    /// Walks leaf siblings collecting every entry within
    /// `[min, max]`/`(min, max)` per the inclusivity flags (spec.md §4.5).
    /// Eagerly collected; `range_stream` below is the lazy counterpart for
    /// callers that want to suspend between entries instead.
    pub fn range(
        &self,
        tx: Option<Transaction>,
        min: &IndexKey,
        max: &IndexKey,
        min_inclusive: bool,
        max_inclusive: bool,
        direction: Direction,
    ) -> Result<Vec<(IndexKey, DocumentLocation)>> {
        let mut out = Vec::new();
        match direction {
            Direction::Forward => {
                let (mut page_id, mut buf, mut header) = self.leaf_for(tx, min)?;
                loop {
                    let entries = node::decode_leaf(&buf)?;
                    let start = if min_inclusive {
                        node::lower_bound(&entries, min)
                    } else {
                        node::upper_bound(&entries, min)
                    };
                    for (key, loc) in &entries[start..] {
                        let past_max = if max_inclusive { key > max } else { key >= max };
                        if past_max {
                            return Ok(out);
                        }
                        out.push((key.clone(), *loc));
                    }
                    if header.next_page_id == 0 {
                        return Ok(out);
                    }
                    page_id = header.next_page_id;
                    let bytes = self.engine.read_page(page_id, tx)?;
                    buf = PageBuffer::from_bytes(page_id, bytes);
                    header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
                }
            }
            Direction::Backward => {
                let (mut page_id, mut buf, mut header) = self.leaf_for(tx, max)?;
                loop {
                    let entries = node::decode_leaf(&buf)?;
                    let end = if max_inclusive {
                        node::upper_bound(&entries, max)
                    } else {
                        node::lower_bound(&entries, max)
                    };
                    for (key, loc) in entries[..end].iter().rev() {
                        let past_min = if min_inclusive { key < min } else { key <= min };
                        if past_min {
                            return Ok(out);
                        }
                        out.push((key.clone(), *loc));
                    }
                    if header.prev_page_id == 0 {
                        return Ok(out);
                    }
                    page_id = header.prev_page_id;
                    let bytes = self.engine.read_page(page_id, tx)?;
                    buf = PageBuffer::from_bytes(page_id, bytes);
                    header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
                }
            }
        }
    }

    /// Lazy counterpart to `range` (spec.md §4.5: "Lazy iterator: each
    /// suspension point yields one entry"), in the same `try_stream!`
    /// idiom as `DocumentStore::scan_stream`: yields one matching entry at
    /// a time instead of walking every leaf before returning.
    pub fn range_stream(
        &'a self,
        tx: Option<Transaction>,
        min: IndexKey,
        max: IndexKey,
        min_inclusive: bool,
        max_inclusive: bool,
        direction: Direction,
    ) -> impl Stream<Item = Result<(IndexKey, DocumentLocation)>> + 'a {
        try_stream! {
            match direction {
                Direction::Forward => {
                    let (mut page_id, mut buf, mut header) = self.leaf_for(tx, &min)?;
                    loop {
                        let entries = node::decode_leaf(&buf)?;
                        let start = if min_inclusive {
                            node::lower_bound(&entries, &min)
                        } else {
                            node::upper_bound(&entries, &min)
                        };
                        let mut done = false;
                        for (key, loc) in &entries[start..] {
                            let past_max = if max_inclusive { key > &max } else { key >= &max };
                            if past_max {
                                done = true;
                                break;
                            }
                            yield (key.clone(), *loc);
                        }
                        if done || header.next_page_id == 0 {
                            break;
                        }
                        page_id = header.next_page_id;
                        let bytes = self.engine.read_page(page_id, tx)?;
                        buf = PageBuffer::from_bytes(page_id, bytes);
                        header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
                    }
                }
                Direction::Backward => {
                    let (mut page_id, mut buf, mut header) = self.leaf_for(tx, &max)?;
                    loop {
                        let entries = node::decode_leaf(&buf)?;
                        let end = if max_inclusive {
                            node::upper_bound(&entries, &max)
                        } else {
                            node::lower_bound(&entries, &max)
                        };
                        let mut done = false;
                        for (key, loc) in entries[..end].iter().rev() {
                            let past_min = if min_inclusive { key < &min } else { key <= &min };
                            if past_min {
                                done = true;
                                break;
                            }
                            yield (key.clone(), *loc);
                        }
                        if done || header.prev_page_id == 0 {
                            break;
                        }
                        page_id = header.prev_page_id;
                        let bytes = self.engine.read_page(page_id, tx)?;
                        buf = PageBuffer::from_bytes(page_id, bytes);
                        header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
                    }
                }
            }
        }
    }

    pub fn equal(&self, tx: Option<Transaction>, key: &IndexKey) -> Result<Vec<(IndexKey, DocumentLocation)>> {
        self.range(tx, key, key, true, true, Direction::Forward)
    }

    pub fn greater_than(&self, tx: Option<Transaction>, key: &IndexKey, or_equal: bool) -> Result<Vec<(IndexKey, DocumentLocation)>> {
        self.range(tx, key, &IndexKey::MaxKey, or_equal, true, Direction::Forward)
    }

    pub fn less_than(&self, tx: Option<Transaction>, key: &IndexKey, or_equal: bool) -> Result<Vec<(IndexKey, DocumentLocation)>> {
        self.range(tx, &IndexKey::MinKey, key, true, or_equal, Direction::Forward)
    }

    pub fn between(
        &self,
        tx: Option<Transaction>,
        a: &IndexKey,
        b: &IndexKey,
        a_inclusive: bool,
        b_inclusive: bool,
    ) -> Result<Vec<(IndexKey, DocumentLocation)>> {
        self.range(tx, a, b, a_inclusive, b_inclusive, Direction::Forward)
    }

    /// Prefix scan over string keys (spec.md §4.5: "maps to range [prefix,
    /// prefix++) where ++ increments the last byte"). The exclusive bound
    /// is compared against the string's own UTF-8 bytes rather than
    /// through `IndexKey::cmp`, since `increment_string` returns an
    /// `IndexKey::Binary` whose type tag would otherwise always sort after
    /// `String` regardless of byte content (see `key::IndexKey`'s cursor
    /// comment).
    pub fn starts_with(&self, tx: Option<Transaction>, prefix: &str) -> Result<Vec<(IndexKey, DocumentLocation)>> {
        let lower = IndexKey::String(prefix.to_string());
        let (mut page_id, mut buf, mut header) = self.leaf_for(tx, &lower)?;
        let mut out = Vec::new();
        let bound_bytes = match IndexKey::increment_string(prefix) {
            Some(IndexKey::Binary(bytes)) => Some(bytes),
            _ => None,
        };
        loop {
            let entries = node::decode_leaf(&buf)?;
            let start = node::lower_bound(&entries, &lower);
            for (key, loc) in &entries[start..] {
                let s = match key {
                    IndexKey::String(s) => s,
                    _ => return Ok(out),
                };
                if !s.as_bytes().starts_with(prefix.as_bytes()) {
                    if let Some(bound) = &bound_bytes {
                        if s.as_bytes() >= bound.as_slice() {
                            return Ok(out);
                        }
                    } else {
                        return Ok(out);
                    }
                }
                out.push((key.clone(), *loc));
            }
            if header.next_page_id == 0 {
                return Ok(out);
            }
            page_id = header.next_page_id;
            let bytes = self.engine.read_page(page_id, tx)?;
            buf = PageBuffer::from_bytes(page_id, bytes);
            header = PageHeader::read(&mut crate::engine::buffer::BufferReader::new(buf.as_slice()))?;
        }
    }

    /// Looks up every key in `keys`, deduping repeated results by
    /// `DocumentLocation` (spec.md §4.5 `in(keys[])`).
    pub fn in_keys(&self, tx: Option<Transaction>, keys: &[IndexKey]) -> Result<Vec<DocumentLocation>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for key in keys {
            for (_, loc) in self.equal(tx, key)? {
                if seen.insert(loc) {
                    out.push(loc);
                }
            }
        }
        Ok(out)
    }

    pub fn create_cursor(&'a self, tx: Option<Transaction>) -> Cursor<'a> {
        Cursor::new(self, tx)
    }
}

fn write_header(buf: &mut PageBuffer, page_id: u32, page_type: PageType, prev: u32, next: u32) {
    let header = PageHeader {
        page_id,
        page_type,
        flags: 0,
        next_page_id: next,
        prev_page_id: prev,
        checksum: 0,
    };
    header.write(&mut crate::engine::buffer::BufferWriter::new(buf.as_mut_slice()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::page_file::test_support::MemBacking;

    fn test_engine(page_size: usize) -> StorageEngine {
        let config = EngineConfig::builder().page_size(page_size).build().unwrap();
        StorageEngine::create_new(Box::new(MemBacking::new()), Box::new(MemBacking::new()), config).unwrap()
    }

    #[test]
    fn insert_then_find_roundtrips() {
        let engine = test_engine(4096);
        let tx = engine.begin_transaction();
        let mut index = BTreeIndex::create(&engine, tx, "by_email", true).unwrap();
        index.insert(tx, IndexKey::String("a@x.com".into()), DocumentLocation::new(1, 0)).unwrap();
        index.insert(tx, IndexKey::String("b@x.com".into()), DocumentLocation::new(1, 1)).unwrap();
        engine.commit(tx).unwrap();

        let found = index.try_find(None, &IndexKey::String("b@x.com".into())).unwrap();
        assert_eq!(found, Some(DocumentLocation::new(1, 1)));
        assert!(index.try_find(None, &IndexKey::String("c@x.com".into())).unwrap().is_none());
    }

    #[test]
    fn unique_index_rejects_duplicate() {
        let engine = test_engine(4096);
        let tx = engine.begin_transaction();
        let mut index = BTreeIndex::create(&engine, tx, "by_email", true).unwrap();
        index.insert(tx, IndexKey::Int32(1), DocumentLocation::new(1, 0)).unwrap();
        let err = index.insert(tx, IndexKey::Int32(1), DocumentLocation::new(1, 1)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DuplicateKey);
    }

    #[test]
    fn non_unique_index_keeps_insertion_order_for_duplicates() {
        let engine = test_engine(4096);
        let tx = engine.begin_transaction();
        let mut index = BTreeIndex::create(&engine, tx, "by_tag", false).unwrap();
        index.insert(tx, IndexKey::Int32(1), DocumentLocation::new(1, 0)).unwrap();
        index.insert(tx, IndexKey::Int32(1), DocumentLocation::new(1, 1)).unwrap();
        let entries = index.equal(Some(tx), &IndexKey::Int32(1)).unwrap();
        assert_eq!(entries, vec![
            (IndexKey::Int32(1), DocumentLocation::new(1, 0)),
            (IndexKey::Int32(1), DocumentLocation::new(1, 1)),
        ]);
    }

    #[test]
    fn many_inserts_force_a_split_and_range_still_returns_everything_in_order() {
        let engine = test_engine(4096);
        let tx = engine.begin_transaction();
        let mut index = BTreeIndex::create(&engine, tx, "by_n", true).unwrap();
        for n in 0..500 {
            index.insert(tx, IndexKey::Int32(n), DocumentLocation::new(1, (n % 1000) as u16)).unwrap();
        }
        let all = index.range(Some(tx), &IndexKey::MinKey, &IndexKey::MaxKey, true, true, Direction::Forward).unwrap();
        assert_eq!(all.len(), 500);
        for w in all.windows(2) {
            assert!(w[0].0 < w[1].0);
        }
    }

    #[test]
    fn backward_range_returns_descending_order() {
        let engine = test_engine(4096);
        let tx = engine.begin_transaction();
        let mut index = BTreeIndex::create(&engine, tx, "by_n", true).unwrap();
        for n in 0..50 {
            index.insert(tx, IndexKey::Int32(n), DocumentLocation::new(1, n as u16)).unwrap();
        }
        let all = index
            .range(Some(tx), &IndexKey::MinKey, &IndexKey::MaxKey, true, true, Direction::Backward)
            .unwrap();
        for w in all.windows(2) {
            assert!(w[0].0 > w[1].0);
        }
    }

    #[test]
    fn range_stream_yields_the_same_entries_as_range() {
        use futures::StreamExt;

        let engine = test_engine(4096);
        let tx = engine.begin_transaction();
        let mut index = BTreeIndex::create(&engine, tx, "by_n", true).unwrap();
        for n in 0..500 {
            index.insert(tx, IndexKey::Int32(n), DocumentLocation::new(1, (n % 1000) as u16)).unwrap();
        }
        engine.commit(tx).unwrap();

        let eager = index.range(None, &IndexKey::MinKey, &IndexKey::MaxKey, true, true, Direction::Forward).unwrap();

        let stream = index.range_stream(None, IndexKey::MinKey, IndexKey::MaxKey, true, true, Direction::Forward);
        futures::pin_mut!(stream);
        let lazy: Vec<(IndexKey, DocumentLocation)> = futures::executor::block_on(async {
            let mut out = Vec::new();
            while let Some(item) = stream.next().await {
                out.push(item.unwrap());
            }
            out
        });

        assert_eq!(eager, lazy);
    }

    #[test]
    fn starts_with_matches_only_the_prefix() {
        let engine = test_engine(4096);
        let tx = engine.begin_transaction();
        let mut index = BTreeIndex::create(&engine, tx, "by_name", false).unwrap();
        for s in ["apple", "application", "banana", "apex"] {
            index.insert(tx, IndexKey::String(s.into()), DocumentLocation::new(1, 0)).unwrap();
        }
        let matches = index.starts_with(Some(tx), "app").unwrap();
        let names: Vec<String> = matches
            .into_iter()
            .map(|(k, _)| match k {
                IndexKey::String(s) => s,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["apple".to_string(), "application".to_string()]);
    }
}
