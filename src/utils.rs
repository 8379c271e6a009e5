//! Small shared helpers used across the engine: a home for cross-cutting
//! enums too small to warrant their own module. BLite's key ordering is
//! fixed (bytewise compare on the tagged encoding from `crate::key`), so
//! there is no locale-sensitive collation to carry; what remains is the
//! scan direction used by range queries and cursors.

/// Direction of a B-tree range scan or cursor walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Formats a byte slice as hex for `ObjectId`/`Guid`'s `Debug` impls.
pub(crate) struct ToHex<'a>(pub &'a [u8]);

impl std::fmt::Debug for ToHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
