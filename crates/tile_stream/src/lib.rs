//! Tile fetch client.
//!
//! Requests leave through a [`TileTransport`] and never block. Responses come
//! back on whatever thread owns the connection, travel through a single
//! producer ring into the render thread, and wake subscribers through
//! single-slot channels so a burst of arrivals collapses into one wake-up.

use std::fmt;

mod arrivals;
mod service;

pub use arrivals::{TileArrivalSubscription, TileResponseSender};
pub use service::{DrainSummary, TileService, TileStreamConfig};

use model::EncodedTile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Zfp { quality: u8 },
    Sz { quality: u8 },
}

impl Default for CompressionType {
    fn default() -> Self {
        CompressionType::Zfp { quality: 11 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub file_id: i32,
    pub channel: u32,
    pub stokes: u32,
    pub tiles: Vec<EncodedTile>,
    pub compression: CompressionType,
}

/// One decoded tile as delivered by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TileResponse {
    pub file_id: i32,
    pub channel: u32,
    pub stokes: u32,
    pub tile: EncodedTile,
    pub width: u32,
    pub height: u32,
    pub data: Box<[f32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Disconnected,
    Rejected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Disconnected => write!(f, "backend connection is closed"),
            TransportError::Rejected => write!(f, "backend rejected the request"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outgoing half of the backend connection.
pub trait TileTransport: Send {
    fn send_tile_request(&mut self, request: TileRequest) -> Result<(), TransportError>;
}
