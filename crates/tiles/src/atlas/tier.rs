//! Atlas tier-based layout system.
//!
//! Every atlas page is a `TEXTURE_SIZE`² single-channel texture holding a
//! fixed grid of `TILE_SIZE`² slots. Tiers differ only in the number of
//! pages, which is a power of 2.
//!
//! Tier capacity formula: slots_per_edge² × pages
//! - Single8: 16×16 slots × 1 page  = 256 tiles
//! - Double9: 16×16 slots × 2 pages = 512 tiles
//! - Quad10:  16×16 slots × 4 pages = 1,024 tiles
//! - Octo11:  16×16 slots × 8 pages = 2,048 tiles

use model::{TEXTURE_SIZE, TILE_SIZE};
use static_assertions::const_assert;

const_assert!(TEXTURE_SIZE % TILE_SIZE == 0);
const_assert!((TEXTURE_SIZE / TILE_SIZE).is_power_of_two());

/// Number of slots along each edge of an atlas page.
pub const SLOTS_PER_EDGE: u32 = TEXTURE_SIZE / TILE_SIZE;

/// A power-of-2 unsigned 16-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pow2U16(u16);

impl Pow2U16 {
    /// Creates a new Pow2U16, panicking if value is not a power of 2 or is zero.
    pub const fn new(value: u16) -> Self {
        assert!(
            value != 0 && (value & (value - 1)) == 0,
            "value must be a non-zero power of 2"
        );
        Pow2U16(value)
    }

    pub const fn get_u32(self) -> u32 {
        self.0 as u32
    }

    pub const fn log2(self) -> u32 {
        self.0.trailing_zeros()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pages: Pow2U16,
}

impl AtlasLayout {
    pub const fn page_edge_px(self) -> u32 {
        TEXTURE_SIZE
    }

    pub const fn slots_per_page(self) -> u32 {
        SLOTS_PER_EDGE * SLOTS_PER_EDGE
    }

    pub const fn pages(self) -> u32 {
        self.pages.get_u32()
    }

    pub const fn capacity_tiles(self) -> u32 {
        self.slots_per_page() * self.pages()
    }

    /// Page index and texel offset of slot `index`.
    pub const fn slot_origin(self, index: u32) -> (u32, u32, u32) {
        let page = index / self.slots_per_page();
        let within = index % self.slots_per_page();
        let x = (within % SLOTS_PER_EDGE) * TILE_SIZE;
        let y = (within / SLOTS_PER_EDGE) * TILE_SIZE;
        (page, x, y)
    }
}

/// Predefined atlas tiers. The suffix is log2 of the slot capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AtlasTier {
    Single8,
    Double9,
    #[default]
    Quad10,
    Octo11,
}

impl AtlasTier {
    pub const fn layout(self) -> AtlasLayout {
        match self {
            AtlasTier::Single8 => AtlasLayout {
                pages: Pow2U16::new(1),
            },
            AtlasTier::Double9 => AtlasLayout {
                pages: Pow2U16::new(2),
            },
            AtlasTier::Quad10 => AtlasLayout {
                pages: Pow2U16::new(4),
            },
            AtlasTier::Octo11 => AtlasLayout {
                pages: Pow2U16::new(8),
            },
        }
    }

    pub const fn capacity_tiles(self) -> u32 {
        self.layout().capacity_tiles()
    }
}
