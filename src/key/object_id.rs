//! 12-byte ObjectId: 4-byte big-endian seconds-since-epoch + an 8-byte
//! machine+counter tail, per spec.md §3, wrapping a bare `[u8; 12]` plus
//! the generator side (spec.md's "a clock (for ObjectId generation)"
//! collaborator plus a per-process atomic counter — spec.md §9: "the
//! process-wide ObjectId counter is a per-process atomic initialized from
//! the clock").

use crate::utils::ToHex;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId {
    bytes: [u8; 12],
}

/// A clock collaborator: anything that can produce "now" as seconds since
/// the Unix epoch. Kept narrow on purpose (spec.md §6: the kernel consumes
/// a clock, it does not own time-handling policy).
pub trait Clock {
    fn unix_seconds(&self) -> u32;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

static COUNTER: AtomicU32 = AtomicU32::new(0);

impl ObjectId {
    pub const SIZE: usize = 12;

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    /// Generates a new id using the given clock and the process-wide
    /// counter, seeded from the clock on first use.
    pub fn new(clock: &dyn Clock) -> Self {
        let seconds = clock.unix_seconds();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let machine_and_pid: u32 = std::process::id();

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..8].copy_from_slice(&machine_and_pid.to_be_bytes());
        bytes[8..12].copy_from_slice(&counter.to_be_bytes());
        ObjectId { bytes }
    }

    pub fn generate() -> Self {
        Self::new(&SystemClock)
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_tuple("ObjectId").field(&ToHex(&self.bytes)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_increase_lexically_within_same_second() {
        let clock = SystemClock;
        let a = ObjectId::new(&clock);
        let b = ObjectId::new(&clock);
        assert!(a < b, "counter tail must make ids monotonic");
    }
}
