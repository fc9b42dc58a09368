use std::collections::HashMap;
use std::sync::Arc;

use model::TileCoordinate;
use rtrb::{Consumer, RingBuffer};
use tiles::{RasterTile, TileCache, TileCacheKey};
use tracing::{debug, warn};

use crate::arrivals::{ArrivalHub, TileArrivalSubscription, TileResponseSender};
use crate::{CompressionType, TileRequest, TileResponse, TileTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileStreamConfig {
    pub ring_capacity: usize,
    pub compression: CompressionType,
    /// Drain passes a request may stay unanswered before its tiles can be
    /// asked for again.
    pub pending_timeout_passes: u64,
}

impl Default for TileStreamConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 512,
            compression: CompressionType::default(),
            pending_timeout_passes: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainSummary {
    pub merged: usize,
    pub rejected: usize,
    /// Pending marks dropped because no response came in time.
    pub expired: usize,
}

/// Render-thread side of the tile stream.
pub struct TileService {
    transport: Box<dyn TileTransport>,
    consumer: Consumer<TileResponse>,
    hub: Arc<ArrivalHub>,
    /// In-flight tiles and the drain pass they were requested in.
    pending: HashMap<TileCacheKey, u64>,
    passes: u64,
    pending_timeout: u64,
    compression: CompressionType,
}

impl TileService {
    /// Builds the service and the sender the connection thread pushes into.
    pub fn new(
        transport: Box<dyn TileTransport>,
        config: TileStreamConfig,
    ) -> (Self, TileResponseSender) {
        let (producer, consumer) = RingBuffer::new(config.ring_capacity.max(1));
        let hub = Arc::new(ArrivalHub::default());
        let sender = TileResponseSender::new(producer, Arc::clone(&hub));
        (
            Self {
                transport,
                consumer,
                hub,
                pending: HashMap::new(),
                passes: 0,
                pending_timeout: config.pending_timeout_passes.max(1),
                compression: config.compression,
            },
            sender,
        )
    }

    pub fn subscribe(&self) -> TileArrivalSubscription {
        self.hub.subscribe()
    }

    /// Asks the backend for the tiles that are neither cached nor already
    /// in flight. Returns how many tiles were requested. On a transport
    /// failure nothing stays marked pending.
    pub fn request_tiles(
        &mut self,
        cache: &TileCache,
        file_id: i32,
        channel: u32,
        stokes: u32,
        tiles: &[TileCoordinate],
    ) -> Result<usize, TransportError> {
        let mut keys = Vec::new();
        for tile in tiles {
            let key = TileCacheKey::new(file_id, channel, stokes, *tile);
            if cache.contains(&key) || self.pending.contains_key(&key) {
                continue;
            }
            self.pending.insert(key, self.passes);
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(0);
        }

        let request = TileRequest {
            file_id,
            channel,
            stokes,
            tiles: keys.iter().map(|key| key.tile).collect(),
            compression: self.compression,
        };
        match self.transport.send_tile_request(request) {
            Ok(()) => {
                debug!(file_id, channel, stokes, count = keys.len(), "requested tiles");
                Ok(keys.len())
            }
            Err(err) => {
                warn!(file_id, channel, stokes, "tile request failed: {err}");
                for key in &keys {
                    self.pending.remove(key);
                }
                Err(err)
            }
        }
    }

    /// Moves every arrived tile into `cache`, then forgets requests left
    /// unanswered for the configured number of passes.
    pub fn drain_into(&mut self, cache: &mut TileCache) -> DrainSummary {
        self.passes += 1;
        let mut summary = DrainSummary::default();
        while let Ok(response) = self.consumer.pop() {
            let key = TileCacheKey {
                file_id: response.file_id,
                channel: response.channel,
                stokes: response.stokes,
                tile: response.tile,
            };
            self.pending.remove(&key);
            match RasterTile::new(response.width, response.height, response.data) {
                Ok(tile) => {
                    cache.insert(key, tile);
                    summary.merged += 1;
                }
                Err(err) => {
                    warn!(
                        file_id = key.file_id,
                        tile = key.tile.raw(),
                        "discarding malformed tile: {err}"
                    );
                    summary.rejected += 1;
                }
            }
        }

        let before = self.pending.len();
        let (passes, timeout) = (self.passes, self.pending_timeout);
        self.pending.retain(|_, requested| passes - *requested < timeout);
        summary.expired = before - self.pending.len();
        if summary.expired > 0 {
            warn!(expired = summary.expired, "tile requests timed out");
        }
        summary
    }

    /// Forgets in-flight requests of a closed image.
    pub fn cancel_file(&mut self, file_id: i32) {
        self.pending.retain(|key, _| key.file_id != file_id);
    }

    pub fn is_pending(&self, key: &TileCacheKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn delivered_count(&self) -> u64 {
        self.hub.pushed()
    }

    pub fn set_compression(&mut self, compression: CompressionType) {
        self.compression = compression;
    }
}
