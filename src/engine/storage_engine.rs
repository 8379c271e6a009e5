//! `StorageEngine` (spec.md §4.4): the public facade tying `PageFile`,
//! `WalLog`, `TransactionManager`, `FreeSpaceMap`, `Dictionary` and
//! `CollectionCatalog` together.
//!
//! One facade type owning every subsystem and exposing the operations
//! collaborators call, restructured around this kernel's page/WAL/
//! transaction model rather than document-level CRUD.

use crate::config::EngineConfig;
use crate::engine::catalog::CollectionCatalog;
use crate::engine::dictionary::Dictionary;
use crate::engine::free_space_map::FreeSpaceMap;
use crate::engine::page_file::{Backing, FileHeader, PageFile, RealFile};
use crate::engine::transaction::{Transaction, TransactionManager};
use crate::engine::wal::WalLog;
use crate::Result;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::RwLock;

pub struct StorageEngine {
    config: EngineConfig,
    page_file: PageFile,
    wal: WalLog,
    tx_manager: TransactionManager,
    free_space_map: FreeSpaceMap,
    dictionary: Dictionary,
    catalog: CollectionCatalog,
    header: RwLock<FileHeader>,
}

impl StorageEngine {
    /// Opens (or creates) a database at `path`, with the WAL living
    /// alongside it as `<name>.wal` (spec.md §6).
    pub fn open_file(path: &Path, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let wal_path = path.with_extension("wal");
        let existed = path.exists();
        let main: Box<dyn Backing> = Box::new(RealFile::open(path)?);
        let wal_backing: Box<dyn Backing> = Box::new(RealFile::open(&wal_path)?);
        if existed {
            Self::open_existing(main, wal_backing, config)
        } else {
            Self::create_new(main, wal_backing, config)
        }
    }

    pub fn create_new(main: Box<dyn Backing>, wal_backing: Box<dyn Backing>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!("storage_engine: creating new database, page_size={}", config.page_size);
        main.lock_exclusive()?;
        wal_backing.lock_exclusive()?;
        let page_file = PageFile::create_new(main, &config)?;
        let wal = WalLog::create_new(wal_backing, config.page_size, config.wal_fsync_policy)?;
        let header = page_file.read_header()?;
        Ok(StorageEngine {
            config,
            page_file,
            wal,
            tx_manager: TransactionManager::new(),
            free_space_map: FreeSpaceMap::new(header.page_size as usize),
            dictionary: Dictionary::new(),
            catalog: CollectionCatalog::new(),
            header: RwLock::new(header),
        })
    }

    pub fn open_existing(main: Box<dyn Backing>, wal_backing: Box<dyn Backing>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!("storage_engine: opening existing database");
        // spec.md §4.4: acquire the exclusive file lock before loading the
        // header, WAL or catalog, so a second process can't open the same
        // file mid-recovery.
        main.lock_exclusive()?;
        wal_backing.lock_exclusive()?;
        let (page_file, header) = PageFile::open_existing(main, &config)?;
        let wal = WalLog::open_and_replay(wal_backing, config.page_size, config.wal_fsync_policy)?;
        debug!("storage_engine: wal replay found {} live pages", wal.index().committed_page_ids().len());
        let free_space_map = FreeSpaceMap::load(&page_file, header.first_free_space_map_page_id)?;
        let dictionary = Dictionary::load(&page_file, header.dictionary_root_page_id)?;
        let catalog = CollectionCatalog::load(&page_file, header.root_catalog_page_id)?;
        Ok(StorageEngine {
            config,
            page_file,
            wal,
            tx_manager: TransactionManager::new(),
            free_space_map,
            dictionary,
            catalog,
            header: RwLock::new(header),
        })
    }

    /// Flushes the mapped window and fsyncs; does not checkpoint (callers
    /// wanting a fully-merged file should call `force_checkpoint` first).
    pub fn close(&self) -> Result<()> {
        self.page_file.flush()?;
        self.page_file.sync_all()?;
        self.page_file.unlock()?;
        self.wal.unlock()?;
        Ok(())
    }

    pub fn begin_transaction(&self) -> Transaction {
        self.tx_manager.begin()
    }

    /// Cooperative async variant (spec.md §4.4). Transaction admission
    /// never blocks on I/O in this kernel, so there is no suspension
    /// point to model beyond the `async fn` boundary itself.
    pub async fn begin_transaction_async(&self) -> Transaction {
        self.tx_manager.begin()
    }

    pub fn commit(&self, tx: Transaction) -> Result<()> {
        self.tx_manager.commit(tx.id(), &self.wal)?;
        // Catalog/dictionary/free-space-map state is whole-rewrite, not
        // WAL-journaled, so it must be persisted explicitly to survive a
        // crash (spec.md §8 scenario 1's durability contract extends to
        // collections created in this commit, not just their documents).
        self.persist_catalog_structures()?;
        if self.wal.len() >= self.config.checkpoint_threshold_bytes {
            self.force_checkpoint()?;
        }
        Ok(())
    }

    pub fn rollback(&self, tx: Transaction) -> Result<()> {
        self.tx_manager.rollback(tx.id(), &self.free_space_map)
    }

    pub fn read_page(&self, page_id: u32, tx: Option<Transaction>) -> Result<Vec<u8>> {
        self.tx_manager
            .read_page(tx.map(|t| t.id()), page_id, self.wal.index(), &self.wal, &self.page_file)
    }

    /// Positional-disk-read async variant; per spec.md §4.4 it "MUST NOT
    /// observe uncommitted writes from other transactions" — satisfied
    /// because it resolves through the same `TransactionManager`
    /// read-path as the sync version, which only ever returns `tx`'s own
    /// buffer, the WAL's last-committed image, or the mapped file.
    pub async fn read_page_async(&self, page_id: u32, tx: Option<Transaction>) -> Result<Vec<u8>> {
        self.read_page(page_id, tx)
    }

    pub fn write_page(&self, page_id: u32, tx: Transaction, bytes: Vec<u8>) -> Result<()> {
        self.tx_manager.write_page(tx.id(), page_id, bytes)
    }

    /// Bypasses transactions; used only by internal rebuild paths.
    /// Callers MUST `close`/flush before reading the same page via
    /// `read_page_async`, or they may observe the old image (spec.md
    /// §4.4's documented mmap/positional-read hazard).
    pub fn write_page_immediate(&self, page_id: u32, bytes: &[u8]) -> Result<()> {
        warn!("storage_engine: write_page_immediate bypasses the WAL for page {page_id}");
        self.page_file.write_page_mapped(page_id, bytes)
    }

    pub fn allocate_page(&self, tx: Option<Transaction>) -> Result<u32> {
        let page_id = match self.free_space_map.take_free_page() {
            Some(id) => id,
            None => self.page_file.allocate_page()?,
        };
        if let Some(tx) = tx {
            self.tx_manager.note_allocated_page(tx.id(), page_id)?;
        }
        Ok(page_id)
    }

    pub fn deallocate_page(&self, page_id: u32) -> Result<()> {
        self.free_space_map.push_free_page(page_id);
        Ok(())
    }

    pub fn force_checkpoint(&self) -> Result<()> {
        crate::engine::checkpoint::run(self)
    }

    /// Current WAL file size in bytes; near zero right after a checkpoint
    /// (spec.md §8 scenario 6).
    pub fn wal_len(&self) -> u64 {
        self.wal.len()
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn max_inline_record_size(&self) -> usize {
        self.config.max_inline_record_size
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn free_space_map(&self) -> &FreeSpaceMap {
        &self.free_space_map
    }

    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub(crate) fn catalog(&self) -> &CollectionCatalog {
        &self.catalog
    }

    pub(crate) fn wal(&self) -> &WalLog {
        &self.wal
    }

    pub(crate) fn page_file(&self) -> &PageFile {
        &self.page_file
    }

    pub(crate) fn tx_manager(&self) -> &TransactionManager {
        &self.tx_manager
    }

    /// Persists the free-space map, dictionary and catalog chains and
    /// updates the file header's root pointers. Not invoked implicitly on
    /// every commit (spec.md says only the WAL must be durable per
    /// commit); callers needing these structures durable across a crash
    /// before the next checkpoint should call this explicitly, mirroring
    /// `forceCheckpoint`'s "drain and persist" contract.
    pub fn persist_catalog_structures(&self) -> Result<()> {
        let fsm_root = self
            .free_space_map
            .persist(&self.page_file, || self.page_file.allocate_page())?;
        let dict_root = self
            .dictionary
            .persist(&self.page_file, || self.page_file.allocate_page())?;
        let catalog_root = self
            .catalog
            .persist(&self.page_file, || self.page_file.allocate_page())?;
        let mut header = *self.header.read().unwrap();
        header.first_free_space_map_page_id = fsm_root;
        header.dictionary_root_page_id = dict_root;
        header.root_catalog_page_id = catalog_root;
        header.last_tx_id = self.tx_manager.last_committed_tx_id();
        self.page_file.write_header(&header)?;
        *self.header.write().unwrap() = header;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::page_file::test_support::MemBacking;

    fn engine() -> StorageEngine {
        let config = EngineConfig::builder().page_size(4096).build().unwrap();
        StorageEngine::create_new(Box::new(MemBacking::new()), Box::new(MemBacking::new()), config).unwrap()
    }

    #[test]
    fn uncommitted_writes_are_invisible_to_other_readers() {
        let engine = engine();
        let page_id = engine.allocate_page(None).unwrap();
        let tx = engine.begin_transaction();
        let mut dirty = vec![0u8; engine.page_size()];
        dirty[0] = 0xFF;
        engine.write_page(page_id, tx, dirty).unwrap();

        let outside = engine.read_page(page_id, None).unwrap();
        assert_ne!(outside[0], 0xFF);

        engine.rollback(tx).unwrap();
        let after_rollback = engine.read_page(page_id, None).unwrap();
        assert_ne!(after_rollback[0], 0xFF);
    }

    #[test]
    fn read_your_own_writes_then_commit_makes_them_visible() {
        let engine = engine();
        let page_id = engine.allocate_page(None).unwrap();
        let tx = engine.begin_transaction();
        let mut dirty = vec![0u8; engine.page_size()];
        dirty[0] = 0xDD;
        engine.write_page(page_id, tx, dirty.clone()).unwrap();

        assert_eq!(engine.read_page(page_id, Some(tx)).unwrap()[0], 0xDD);
        engine.commit(tx).unwrap();
        assert_eq!(engine.read_page(page_id, None).unwrap()[0], 0xDD);
    }

    #[test]
    fn checkpoint_truncates_wal_and_preserves_committed_pages() {
        let engine = engine();
        let page_id = engine.allocate_page(None).unwrap();
        let tx = engine.begin_transaction();
        let mut dirty = vec![0u8; engine.page_size()];
        dirty[0] = 7;
        engine.write_page(page_id, tx, dirty).unwrap();
        engine.commit(tx).unwrap();

        engine.force_checkpoint().unwrap();
        assert_eq!(engine.wal().len(), 0);
        assert_eq!(engine.read_page(page_id, None).unwrap()[0], 7);
    }
}
