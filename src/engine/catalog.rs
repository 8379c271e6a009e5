//! `CollectionCatalog` (spec.md §3/§4.8): collection metadata persisted
//! as length-prefixed entries on a chain of catalog pages rooted in the
//! file header.
//!
//! Grounded on `engine::pages::collection_page` (the page
//! type that lists a database's collections and their root pages) and
//! `engine::collection_index` for the per-collection secondary-index
//! descriptor shape. BLite uses its own length-prefixed encoding rather
//! than BSON (spec.md §1 excludes BSON object mapping from the kernel),
//! but keeps the same field set.

use crate::engine::page::PageType;
use crate::engine::page_chain::{read_chain, write_chain};
use crate::engine::page_file::PageFile;
use crate::Result;
use std::collections::HashMap;
use std::sync::RwLock;

/// What kind of acceleration structure a secondary index is backed by.
/// Only `BTree` is implemented by this kernel; `Vector`/`Spatial` are
/// stored and round-tripped for collaborators that implement them
/// (SPEC_FULL.md F: "no vector/spatial algorithm is implemented").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
    Vector,
    Spatial,
}

impl IndexKind {
    fn to_u8(self) -> u8 {
        match self {
            IndexKind::BTree => 0,
            IndexKind::Vector => 1,
            IndexKind::Spatial => 2,
        }
    }

    fn from_u8(b: u8) -> Self {
        match b {
            1 => IndexKind::Vector,
            2 => IndexKind::Spatial,
            _ => IndexKind::BTree,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecondaryIndexDescriptor {
    pub name: String,
    pub field_path: String,
    pub kind: IndexKind,
    pub unique: bool,
    pub root_page_id: u32,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesConfig {
    pub ts_field: String,
    pub retention_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    pub name: String,
    pub primary_root_page_id: u32,
    pub schema_history_root_page_id: u32,
    /// Head of the collection's slotted data-page chain. Not named
    /// explicitly in spec.md §3's `CollectionMetadata` field list, but
    /// required for `DocumentStore` to find its own pages again after
    /// reopen — the natural place to keep it is alongside the other
    /// per-collection root pointers.
    pub data_root_page_id: u32,
    pub secondary_indexes: Vec<SecondaryIndexDescriptor>,
    pub time_series: Option<TimeSeriesConfig>,
}

impl CollectionMetadata {
    fn new(name: &str) -> Self {
        CollectionMetadata {
            name: name.to_string(),
            primary_root_page_id: 0,
            schema_history_root_page_id: 0,
            data_root_page_id: 0,
            secondary_indexes: Vec::new(),
            time_series: None,
        }
    }
}

struct Writer(Vec<u8>);
impl Writer {
    fn put_str(&mut self, s: &str) {
        self.0.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.0.extend_from_slice(s.as_bytes());
    }
    fn put_u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn put_u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn put_u8(&mut self, v: u8) {
        self.0.push(v);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}
impl<'a> Reader<'a> {
    fn get_str(&mut self) -> String {
        let len = self.get_u32() as usize;
        let s = String::from_utf8_lossy(&self.buf[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        s
    }
    fn get_u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }
    fn get_u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }
    fn get_u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }
}

fn encode_all(collections: &HashMap<String, CollectionMetadata>) -> Vec<u8> {
    let mut w = Writer(Vec::new());
    w.put_u32(collections.len() as u32);
    for meta in collections.values() {
        w.put_str(&meta.name);
        w.put_u32(meta.primary_root_page_id);
        w.put_u32(meta.schema_history_root_page_id);
        w.put_u32(meta.data_root_page_id);
        w.put_u32(meta.secondary_indexes.len() as u32);
        for idx in &meta.secondary_indexes {
            w.put_str(&idx.name);
            w.put_str(&idx.field_path);
            w.put_u8(idx.kind.to_u8());
            w.put_u8(idx.unique as u8);
            w.put_u32(idx.root_page_id);
        }
        match &meta.time_series {
            Some(ts) => {
                w.put_u8(1);
                w.put_str(&ts.ts_field);
                w.put_u64(ts.retention_ms);
            }
            None => w.put_u8(0),
        }
    }
    w.0
}

fn decode_all(bytes: &[u8]) -> HashMap<String, CollectionMetadata> {
    let mut r = Reader { buf: bytes, pos: 0 };
    let mut out = HashMap::new();
    if bytes.is_empty() {
        return out;
    }
    let count = r.get_u32();
    for _ in 0..count {
        let name = r.get_str();
        let mut meta = CollectionMetadata::new(&name);
        meta.primary_root_page_id = r.get_u32();
        meta.schema_history_root_page_id = r.get_u32();
        meta.data_root_page_id = r.get_u32();
        let idx_count = r.get_u32();
        for _ in 0..idx_count {
            let name = r.get_str();
            let field_path = r.get_str();
            let kind = IndexKind::from_u8(r.get_u8());
            let unique = r.get_u8() != 0;
            let root_page_id = r.get_u32();
            meta.secondary_indexes.push(SecondaryIndexDescriptor {
                name,
                field_path,
                kind,
                unique,
                root_page_id,
            });
        }
        if r.get_u8() != 0 {
            meta.time_series = Some(TimeSeriesConfig {
                ts_field: r.get_str(),
                retention_ms: r.get_u64(),
            });
        }
        out.insert(name, meta);
    }
    out
}

pub(crate) struct CollectionCatalog {
    collections: RwLock<HashMap<String, CollectionMetadata>>,
}

impl CollectionCatalog {
    pub fn new() -> Self {
        CollectionCatalog {
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> CollectionMetadata {
        {
            let guard = self.collections.read().unwrap();
            if let Some(meta) = guard.get(name) {
                return meta.clone();
            }
        }
        let mut guard = self.collections.write().unwrap();
        guard
            .entry(name.to_string())
            .or_insert_with(|| CollectionMetadata::new(name))
            .clone()
    }

    pub fn list(&self) -> Vec<CollectionMetadata> {
        self.collections.read().unwrap().values().cloned().collect()
    }

    pub fn drop(&self, name: &str) {
        self.collections.write().unwrap().remove(name);
    }

    pub fn save(&self, meta: CollectionMetadata) {
        self.collections.write().unwrap().insert(meta.name.clone(), meta);
    }

    pub fn persist(&self, page_file: &PageFile, allocate: impl FnMut() -> Result<u32>) -> Result<u32> {
        let encoded = encode_all(&self.collections.read().unwrap());
        write_chain(page_file, allocate, PageType::CollectionCatalog, &encoded)
    }

    pub fn load(page_file: &PageFile, head_page_id: u32) -> Result<Self> {
        if head_page_id == 0 {
            return Ok(CollectionCatalog::new());
        }
        let bytes = read_chain(page_file, head_page_id)?;
        Ok(CollectionCatalog {
            collections: RwLock::new(decode_all(&bytes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let catalog = CollectionCatalog::new();
        let a = catalog.get_or_create("users");
        let b = catalog.get_or_create("users");
        assert_eq!(a.name, b.name);
        assert_eq!(catalog.list().len(), 1);
    }

    #[test]
    fn save_then_encode_decode_roundtrips() {
        let catalog = CollectionCatalog::new();
        let mut meta = catalog.get_or_create("users");
        meta.primary_root_page_id = 7;
        meta.secondary_indexes.push(SecondaryIndexDescriptor {
            name: "by_email".into(),
            field_path: "email".into(),
            kind: IndexKind::BTree,
            unique: true,
            root_page_id: 12,
        });
        catalog.save(meta);

        let encoded = encode_all(&catalog.collections.read().unwrap());
        let decoded = decode_all(&encoded);
        let users = decoded.get("users").unwrap();
        assert_eq!(users.primary_root_page_id, 7);
        assert_eq!(users.secondary_indexes[0].name, "by_email");
        assert!(users.secondary_indexes[0].unique);
    }

    #[test]
    fn drop_removes_collection() {
        let catalog = CollectionCatalog::new();
        catalog.get_or_create("temp");
        catalog.drop("temp");
        assert!(catalog.list().is_empty());
    }
}
