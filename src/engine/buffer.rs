//! Flat-buffer reader/writer over one page, grounded on
//! `engine::buffer_reader`/`engine::buffer_writer` (which read/write
//! little-endian scalars and `PageAddress` values at a cursor position).
//! BLite keeps the same cursor-based API but drops the fragmented
//! (multi-slice) reader variant: overflow payloads are
//! reassembled into one contiguous `Vec<u8>` by `OverflowChain` before a
//! caller ever parses them (see `overflow.rs`), so a single in-page
//! `BufferReader`/`BufferWriter` is all the page layer itself needs.
//!
//! Per spec.md §6, scalar/offset fields inside a page are little-endian;
//! `IndexKey` bytes are always big-endian and are written/read as opaque
//! already-encoded byte runs through `write_index_key`/`read_index_key`.

use crate::engine::DocumentLocation;
use crate::key::IndexKey;
use crate::{Error, Result};

pub(crate) struct BufferReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BufferReader { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        BufferReader { buf, pos }
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take(2).try_into().unwrap())
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take(4).try_into().unwrap())
    }

    pub fn read_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take(8).try_into().unwrap())
    }

    pub fn read_i64(&mut self) -> i64 {
        self.read_u64() as i64
    }

    pub fn read_bytes(&mut self, n: usize) -> &'a [u8] {
        self.take(n)
    }

    pub fn read_document_location(&mut self) -> DocumentLocation {
        let page_id = self.read_u32();
        let slot_index = self.read_u16();
        DocumentLocation::new(page_id, slot_index)
    }

    pub fn read_index_key(&mut self) -> Result<IndexKey> {
        let (key, consumed) = IndexKey::decode(&self.buf[self.pos..])
            .map_err(|_| Error::page_corrupt("invalid index key in page"))?;
        self.pos += consumed;
        Ok(key)
    }
}

pub(crate) struct BufferWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        BufferWriter { buf, pos: 0 }
    }

    pub fn at(buf: &'a mut [u8], pos: usize) -> Self {
        BufferWriter { buf, pos }
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn write_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_u64(v as u64);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }

    pub fn write_document_location(&mut self, loc: DocumentLocation) {
        self.write_u32(loc.page_id());
        self.write_u16(loc.slot_index());
    }

    pub fn write_index_key(&mut self, key: &IndexKey) {
        let mut encoded = Vec::with_capacity(key.encoded_len());
        key.encode(&mut encoded);
        self.put(&encoded);
    }
}
