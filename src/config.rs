//! Engine configuration (spec.md §6). The kernel exposes no CLI and no
//! environment-variable knobs beyond this struct; there is no external
//! config-file loading layer, per spec.

use crate::{Error, Result};

/// WAL fsync policy (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every record written within a commit group (each page,
    /// then the commit marker), not just once at the end. Strictly more
    /// durable than `Group` against a crash mid-group, at the cost of one
    /// extra sync per page in the group.
    Always,
    /// fsync once, after the commit marker closes the group (the default).
    /// Still satisfies the atomic-group-commit contract in spec.md §4.2:
    /// either the whole group is durable or none of it is, since the
    /// marker (and its own sync) is what makes any of the group's records
    /// visible to `WalIndex` on replay.
    Group,
}

pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;
pub const MIN_PAGE_SIZE: usize = 4 * 1024;
pub const MAX_PAGE_SIZE: usize = 64 * 1024;
pub const DEFAULT_CHECKPOINT_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_INITIAL_FILE_SIZE: u64 = MIN_PAGE_SIZE as u64 * 8;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub page_size: usize,
    pub initial_file_size: u64,
    pub wal_fsync_policy: FsyncPolicy,
    pub checkpoint_threshold_bytes: u64,
    pub max_inline_record_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            page_size: DEFAULT_PAGE_SIZE,
            initial_file_size: DEFAULT_INITIAL_FILE_SIZE,
            wal_fsync_policy: FsyncPolicy::Group,
            checkpoint_threshold_bytes: DEFAULT_CHECKPOINT_THRESHOLD_BYTES,
            max_inline_record_size: (DEFAULT_PAGE_SIZE as f64 * 0.8) as usize,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the invariants the rest of the engine relies on: page size
    /// is a power of two within the documented range, and the inline
    /// threshold fits inside a page.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
            || !self.page_size.is_power_of_two()
        {
            return Err(Error::other(format!(
                "page_size must be a power of two in [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}], got {}",
                self.page_size
            )));
        }
        if self.max_inline_record_size == 0 || self.max_inline_record_size >= self.page_size {
            return Err(Error::other(format!(
                "max_inline_record_size must be > 0 and < page_size ({})",
                self.page_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    inner: Option<EngineConfig>,
}

macro_rules! builder_setter {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.ensure().$name = value;
            self
        }
    };
}

impl EngineConfigBuilder {
    fn ensure(&mut self) -> &mut EngineConfig {
        self.inner.get_or_insert_with(EngineConfig::default)
    }

    builder_setter!(page_size, usize);
    builder_setter!(initial_file_size, u64);
    builder_setter!(wal_fsync_policy, FsyncPolicy);
    builder_setter!(checkpoint_threshold_bytes, u64);

    pub fn max_inline_record_size(mut self, value: usize) -> Self {
        self.ensure().max_inline_record_size = value;
        self
    }

    pub fn build(mut self) -> Result<EngineConfig> {
        let mut config = self.inner.take().unwrap_or_default();
        // re-derive the default inline size if the page size changed but the
        // caller never touched max_inline_record_size explicitly.
        if config.max_inline_record_size == EngineConfig::default().max_inline_record_size
            && config.page_size != DEFAULT_PAGE_SIZE
        {
            config.max_inline_record_size = (config.page_size as f64 * 0.8) as usize;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_page_size() {
        let err = EngineConfig::builder().page_size(5000).build().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Other);
    }

    #[test]
    fn rejects_page_size_out_of_range() {
        assert!(EngineConfig::builder().page_size(1024).build().is_err());
        assert!(
            EngineConfig::builder()
                .page_size(128 * 1024)
                .build()
                .is_err()
        );
    }

    #[test]
    fn builder_rescales_inline_size_with_page_size() {
        let config = EngineConfig::builder().page_size(32 * 1024).build().unwrap();
        assert_eq!(config.max_inline_record_size, (32 * 1024 * 8) / 10);
    }
}
