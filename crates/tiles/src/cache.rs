use std::collections::HashSet;
use std::fmt;

use lru::LruCache;
use tracing::{debug, trace};

use crate::atlas::{AtlasError, AtlasSlotAllocator, AtlasTier};
use crate::{RasterTile, TileCacheKey, TileTextureParameters, TileTextureSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheConfig {
    pub tier: AtlasTier,
    /// Upper bound on tiles still waiting for their first upload.
    pub max_pending_tiles: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            tier: AtlasTier::default(),
            max_pending_tiles: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCacheError {
    NotCached,
    /// Every uploaded tile is pinned by the current pass.
    AtlasExhausted,
    Atlas(AtlasError),
}

impl fmt::Display for TileCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileCacheError::NotCached => write!(f, "tile is not cached"),
            TileCacheError::AtlasExhausted => {
                write!(f, "no atlas slot can be reclaimed during this pass")
            }
            TileCacheError::Atlas(err) => write!(f, "atlas error: {err}"),
        }
    }
}

impl std::error::Error for TileCacheError {}

impl From<AtlasError> for TileCacheError {
    fn from(err: AtlasError) -> Self {
        TileCacheError::Atlas(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileCacheStats {
    pub cached_tiles: usize,
    pub uploaded_tiles: usize,
    pub pending_tiles: usize,
    pub pinned_tiles: usize,
    pub evictions: u64,
}

/// LRU tile store backed by a fixed pool of atlas slots.
pub struct TileCache {
    // pending_tiles == entries without texture slot
    // atlas.occupied_slots() == entries with texture slot
    entries: LruCache<TileCacheKey, RasterTile>,
    atlas: AtlasSlotAllocator,
    pinned: HashSet<TileCacheKey>,
    max_pending_tiles: usize,
    pending_tiles: usize,
    evictions: u64,
}

impl TileCache {
    pub fn new(config: TileCacheConfig) -> Self {
        Self {
            entries: LruCache::unbounded(),
            atlas: AtlasSlotAllocator::new(config.tier.layout()),
            pinned: HashSet::new(),
            max_pending_tiles: config.max_pending_tiles.max(1),
            pending_tiles: 0,
            evictions: 0,
        }
    }

    /// Looks a tile up. A peek leaves recency untouched so placeholder lookups
    /// do not keep stale tiles alive.
    pub fn get(&mut self, key: &TileCacheKey, peek: bool) -> Option<&RasterTile> {
        if peek {
            self.entries.peek(key)
        } else {
            self.entries.get(key)
        }
    }

    pub fn contains(&self, key: &TileCacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Stores a freshly fetched tile, replacing any previous copy.
    pub fn insert(&mut self, key: TileCacheKey, tile: RasterTile) {
        let uploaded = tile.is_uploaded();
        if let Some(previous) = self.entries.put(key, tile) {
            self.forget(previous);
        }
        if !uploaded {
            self.pending_tiles += 1;
            self.trim_pending();
        }
    }

    /// Keeps `key` resident until [`TileCache::end_pass`].
    pub fn pin(&mut self, key: TileCacheKey) {
        self.pinned.insert(key);
    }

    pub fn is_pinned(&self, key: &TileCacheKey) -> bool {
        self.pinned.contains(key)
    }

    pub fn end_pass(&mut self) {
        self.pinned.clear();
    }

    /// Makes sure the tile has an atlas slot, moving its CPU data to `sink`
    /// on first use.
    pub fn upload(
        &mut self,
        key: &TileCacheKey,
        sink: &mut dyn TileTextureSink,
    ) -> Result<TileTextureParameters, TileCacheError> {
        let Some(tile) = self.entries.peek(key) else {
            return Err(TileCacheError::NotCached);
        };
        if let Some(slot) = tile.texture_slot {
            return Ok(self.atlas.texture_parameters(slot));
        }

        let slot = match self.atlas.alloc() {
            Ok(slot) => slot,
            Err(AtlasError::OutOfSlots) => {
                if !self.evict_uploaded(key) {
                    return Err(TileCacheError::AtlasExhausted);
                }
                self.atlas.alloc()?
            }
            Err(err) => return Err(err.into()),
        };
        let parameters = self.atlas.texture_parameters(slot);

        let tile = self
            .entries
            .peek_mut(key)
            .expect("tile survives eviction of other entries");
        if let Some(data) = tile.data.take() {
            sink.upload_tile(parameters, tile.width, tile.height, &data);
        }
        tile.texture_slot = Some(slot);
        self.pending_tiles -= 1;
        trace!(
            file_id = key.file_id,
            tile = key.tile.raw(),
            page = parameters.page,
            "uploaded tile"
        );
        Ok(parameters)
    }

    /// Drops every tile of a closed image.
    pub fn clear_file(&mut self, file_id: i32) -> usize {
        self.remove_where(|key| key.file_id == file_id)
    }

    /// Drops every tile of one channel/Stokes plane of an image.
    pub fn clear_channel(&mut self, file_id: i32, channel: u32, stokes: u32) -> usize {
        self.remove_where(|key| {
            key.file_id == file_id && key.channel == channel && key.stokes == stokes
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity_tiles(&self) -> u32 {
        self.atlas.layout().capacity_tiles()
    }

    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            cached_tiles: self.entries.len(),
            uploaded_tiles: self.atlas.occupied_slots(),
            pending_tiles: self.pending_tiles,
            pinned_tiles: self.pinned.len(),
            evictions: self.evictions,
        }
    }

    fn evict_uploaded(&mut self, keep: &TileCacheKey) -> bool {
        let victim = self
            .entries
            .iter()
            .rev()
            .find(|(key, tile)| {
                tile.is_uploaded() && *key != keep && !self.pinned.contains(*key)
            })
            .map(|(key, _)| *key);
        let Some(victim) = victim else {
            return false;
        };
        if let Some(tile) = self.entries.pop(&victim) {
            self.forget(tile);
        }
        self.evictions += 1;
        debug!(
            file_id = victim.file_id,
            tile = victim.tile.raw(),
            "evicted least recently used tile"
        );
        true
    }

    fn trim_pending(&mut self) {
        while self.pending_tiles > self.max_pending_tiles {
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(key, tile)| !tile.is_uploaded() && !self.pinned.contains(*key))
                .map(|(key, _)| *key);
            let Some(victim) = victim else {
                return;
            };
            if let Some(tile) = self.entries.pop(&victim) {
                self.forget(tile);
            }
            debug!(
                file_id = victim.file_id,
                tile = victim.tile.raw(),
                "dropped tile waiting for upload"
            );
        }
    }

    fn remove_where(&mut self, predicate: impl Fn(&TileCacheKey) -> bool) -> usize {
        let doomed: Vec<TileCacheKey> = self
            .entries
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| predicate(key))
            .collect();
        for key in &doomed {
            if let Some(tile) = self.entries.pop(key) {
                self.forget(tile);
            }
            self.pinned.remove(key);
        }
        doomed.len()
    }

    fn forget(&mut self, tile: RasterTile) {
        match tile.texture_slot {
            Some(slot) => self
                .atlas
                .free(slot)
                .expect("cached slot belongs to this atlas"),
            None => self.pending_tiles -= 1,
        }
    }
}
