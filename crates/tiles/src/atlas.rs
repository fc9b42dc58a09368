use std::fmt;

mod slots;
mod tier;

pub use slots::AtlasSlotAllocator;
pub use tier::{AtlasLayout, AtlasTier, Pow2U16, SLOTS_PER_EDGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasError {
    OutOfSlots,
    InvalidSlot,
    GenerationMismatch,
}

impl fmt::Display for AtlasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtlasError::OutOfSlots => write!(f, "atlas has no free slot"),
            AtlasError::InvalidSlot => write!(f, "atlas slot index out of range"),
            AtlasError::GenerationMismatch => write!(f, "atlas slot was already released"),
        }
    }
}

impl std::error::Error for AtlasError {}

/// A slot in the shared texture atlas, valid until freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasSlot {
    index: u32,
    generation: u32,
}

impl AtlasSlot {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Where a slot lives inside the atlas texture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileTextureParameters {
    pub page: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}
