//! 16-byte Guid: a v4-shaped random identifier produced with the `rand`
//! crate.

use crate::utils::ToHex;
use std::fmt::{Debug, Formatter};

#[derive(Copy, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Guid {
    bytes: [u8; 16],
}

impl Guid {
    pub const SIZE: usize = 16;

    pub fn new() -> Guid {
        let mut bytes = rand::random::<[u8; 16]>();
        bytes[6] = bytes[6] & 0x0F | 0x40;
        bytes[8] = bytes[8] & 0x3F | 0x80;
        Guid::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Guid {
        Guid { bytes }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        self.bytes
    }
}

impl Default for Guid {
    fn default() -> Self {
        Guid::new()
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Guid").field(&ToHex(&self.bytes)).finish()
    }
}
