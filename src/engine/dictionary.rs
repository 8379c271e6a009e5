//! `Dictionary` (spec.md §3/§4.7): bidirectional string⇄u16-id intern
//! table used by a BSON writer collaborator to replace field names with
//! 2-byte ids. Ids 0-15 are reserved (spec.md §3; SPEC_FULL.md F.3).
//!
//! Grounded on `shared_mutex`/rwlock-guarded shared tables
//! (e.g. `collection_index` lookups): an `RwLock` over an `indexmap`
//! gives cheap concurrent lookups and a single writer for `intern`.
//!
//! Simplification (recorded in DESIGN.md): spec.md asks for RYOW
//! visibility of in-flight intern calls, which in the source exists
//! because field-name interning happens inline with a document write
//! inside the same transaction. BLite's `DocumentStore` operates on
//! caller-supplied opaque byte records (BSON encoding is an external
//! collaborator, spec.md §1), so nothing inside this crate ever interns a
//! name mid-transaction; `intern` takes effect for all readers as soon as
//! it returns, which trivially satisfies RYOW (the caller's very next
//! read already observes it) without needing a per-transaction overlay.

use indexmap::IndexMap;
use std::sync::RwLock;

pub(crate) const FIRST_UNRESERVED_ID: u16 = 16;

struct Inner {
    by_name: IndexMap<String, u16>,
    by_id: IndexMap<u16, String>,
    next_id: u16,
}

pub(crate) struct Dictionary {
    inner: RwLock<Inner>,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary {
            inner: RwLock::new(Inner {
                by_name: IndexMap::new(),
                by_id: IndexMap::new(),
                next_id: FIRST_UNRESERVED_ID,
            }),
        }
    }

    /// Idempotent: a name already interned returns its existing id.
    pub fn intern(&self, name: &str) -> u16 {
        {
            let inner = self.inner.read().unwrap();
            if let Some(&id) = inner.by_name.get(name) {
                return id;
            }
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&id) = inner.by_name.get(name) {
            return id;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(id, name.to_string());
        id
    }

    pub fn lookup(&self, id: u16) -> Option<String> {
        self.inner.read().unwrap().by_id.get(&id).cloned()
    }

    fn encode(&self) -> Vec<u8> {
        let inner = self.inner.read().unwrap();
        let mut entries: Vec<(&u16, &String)> = inner.by_id.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (id, name) in entries {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let dict = Dictionary::new();
        let mut at = 0usize;
        let count = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        at += 4;
        let mut inner = dict.inner.write().unwrap();
        for _ in 0..count {
            let id = u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap());
            at += 2;
            let len = u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap()) as usize;
            at += 2;
            let name = String::from_utf8_lossy(&bytes[at..at + len]).into_owned();
            at += len;
            inner.by_name.insert(name.clone(), id);
            inner.by_id.insert(id, name);
            inner.next_id = inner.next_id.max(id + 1);
        }
        drop(inner);
        dict
    }

    pub fn persist(
        &self,
        page_file: &crate::engine::page_file::PageFile,
        allocate: impl FnMut() -> crate::Result<u32>,
    ) -> crate::Result<u32> {
        crate::engine::page_chain::write_chain(
            page_file,
            allocate,
            crate::engine::page::PageType::Dictionary,
            &self.encode(),
        )
    }

    pub fn load(
        page_file: &crate::engine::page_file::PageFile,
        head_page_id: u32,
    ) -> crate::Result<Self> {
        if head_page_id == 0 {
            return Ok(Dictionary::new());
        }
        let bytes = crate::engine::page_chain::read_chain(page_file, head_page_id)?;
        Ok(Dictionary::decode(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let dict = Dictionary::new();
        let a = dict.intern("name");
        let b = dict.intern("name");
        assert_eq!(a, b);
        assert!(a >= FIRST_UNRESERVED_ID);
    }

    #[test]
    fn lookup_returns_interned_name() {
        let dict = Dictionary::new();
        let id = dict.intern("_id");
        assert_eq!(dict.lookup(id).as_deref(), Some("_id"));
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let dict = Dictionary::new();
        let a = dict.intern("a");
        let b = dict.intern("b");
        assert_ne!(a, b);
    }
}
