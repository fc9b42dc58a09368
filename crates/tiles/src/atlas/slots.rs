use bitvec::prelude::{BitVec, Lsb0};

use super::tier::AtlasLayout;
use super::{AtlasError, AtlasSlot, TileTextureParameters};

/// Hands out atlas slots and detects stale or double frees through
/// per-slot generations.
pub struct AtlasSlotAllocator {
    // generations.len() == occupied.len() == layout.capacity_tiles()
    layout: AtlasLayout,
    pool: FreeSlotPool,
    generations: Box<[u32]>,
    occupied: BitVec<usize, Lsb0>,
}

impl AtlasSlotAllocator {
    pub fn new(layout: AtlasLayout) -> Self {
        let total_slots = layout.capacity_tiles();
        Self {
            layout,
            pool: FreeSlotPool::new(total_slots),
            generations: vec![0; total_slots as usize].into_boxed_slice(),
            occupied: BitVec::repeat(false, total_slots as usize),
        }
    }

    pub fn alloc(&mut self) -> Result<AtlasSlot, AtlasError> {
        let Some(index) = self.pool.alloc() else {
            return Err(AtlasError::OutOfSlots);
        };
        self.occupied.set(index as usize, true);
        Ok(AtlasSlot {
            index,
            generation: self.generations[index as usize],
        })
    }

    pub fn free(&mut self, slot: AtlasSlot) -> Result<(), AtlasError> {
        let index = slot.index as usize;
        let Some(current_generation) = self.generations.get(index).copied() else {
            return Err(AtlasError::InvalidSlot);
        };
        if current_generation != slot.generation || !self.occupied[index] {
            return Err(AtlasError::GenerationMismatch);
        }
        self.generations[index] = current_generation.wrapping_add(1);
        self.occupied.set(index, false);
        self.pool.free(slot.index);
        Ok(())
    }

    pub fn texture_parameters(&self, slot: AtlasSlot) -> TileTextureParameters {
        let (page, offset_x, offset_y) = self.layout.slot_origin(slot.index);
        TileTextureParameters {
            page,
            offset_x,
            offset_y,
        }
    }

    pub fn layout(&self) -> AtlasLayout {
        self.layout
    }

    pub fn occupied_slots(&self) -> usize {
        self.occupied.count_ones()
    }

    pub fn free_slots(&self) -> usize {
        self.occupied.len() - self.occupied_slots()
    }
}

#[derive(Debug, Default)]
struct FreeSlotPool {
    total_slots: u32,
    next_slot: u32,
    freelist: Vec<u32>,
}

impl FreeSlotPool {
    const fn new(total_slots: u32) -> Self {
        Self {
            total_slots,
            next_slot: 0,
            freelist: Vec::new(),
        }
    }

    fn alloc(&mut self) -> Option<u32> {
        if let Some(slot) = self.freelist.pop() {
            return Some(slot);
        }
        if self.next_slot >= self.total_slots {
            return None;
        }
        let slot = self.next_slot;
        self.next_slot = self.next_slot.checked_add(1).expect("slot id overflow");
        Some(slot)
    }

    fn free(&mut self, slot: u32) {
        self.freelist.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasTier;

    #[test]
    fn allocates_until_capacity() {
        let mut allocator = AtlasSlotAllocator::new(AtlasTier::Single8.layout());
        for _ in 0..256 {
            allocator.alloc().unwrap();
        }
        assert_eq!(allocator.alloc().unwrap_err(), AtlasError::OutOfSlots);
        assert_eq!(allocator.free_slots(), 0);
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut allocator = AtlasSlotAllocator::new(AtlasTier::Single8.layout());
        let first = allocator.alloc().unwrap();
        allocator.free(first).unwrap();
        let reused = allocator.alloc().unwrap();
        assert_eq!(reused.index(), first.index());
        assert_eq!(reused.generation(), first.generation().wrapping_add(1));
    }

    #[test]
    fn stale_free_is_rejected() {
        let mut allocator = AtlasSlotAllocator::new(AtlasTier::Single8.layout());
        let slot = allocator.alloc().unwrap();
        allocator.free(slot).unwrap();
        assert_eq!(
            allocator.free(slot).unwrap_err(),
            AtlasError::GenerationMismatch
        );
        assert_eq!(allocator.occupied_slots(), 0);
    }
}
