//! In-process stand-in for the image server: analytic images cut into tiles
//! on a worker thread.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use document::{FileInfo, FrameError, PreviewRaster};
use model::{ImageSize, TILE_SIZE, TileCoordinate, tile_image_rect, tile_pixel_size};
use tile_stream::{TileRequest, TileResponse, TileResponseSender, TileTransport, TransportError};
use tracing::{debug, trace, warn};

const FULL_RING_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    /// Round source on a faint background.
    Gaussian {
        x: f64,
        y: f64,
        sigma: f64,
        peak: f32,
    },
    /// Ramp from 0 at the left edge to 1 at the right edge.
    Gradient,
    /// Concentric waves around the image centre.
    Rings { wavelength: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticImage {
    pub file_id: i32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pattern: Pattern,
}

impl SyntheticImage {
    pub fn new(file_id: i32, name: impl Into<String>, width: u32, height: u32, pattern: Pattern) -> Self {
        Self {
            file_id,
            name: name.into(),
            width,
            height,
            pattern,
        }
    }

    pub fn file_info(&self) -> FileInfo {
        FileInfo::new(self.file_id, self.name.clone(), self.width, self.height)
    }

    /// Value at a pixel centre.
    pub fn value(&self, x: f64, y: f64) -> f32 {
        match self.pattern {
            Pattern::Gaussian {
                x: x0,
                y: y0,
                sigma,
                peak,
            } => {
                let r2 = (x - x0).powi(2) + (y - y0).powi(2);
                0.05 + peak * (-r2 / (2.0 * sigma * sigma)).exp() as f32
            }
            Pattern::Gradient => {
                let span = f64::from(self.width.saturating_sub(1).max(1));
                (x / span).clamp(0.0, 1.0) as f32
            }
            Pattern::Rings { wavelength } => {
                let cx = f64::from(self.width) * 0.5;
                let cy = f64::from(self.height) * 0.5;
                let r = (x - cx).hypot(y - cy);
                (0.5 + 0.5 * (TAU * r / wavelength).cos()) as f32
            }
        }
    }

    /// Data block of one tile, lowest image row first. Each texel samples
    /// the centre of the `mip` x `mip` block it stands for.
    pub fn tile(&self, tile: TileCoordinate) -> TileResponse {
        let image = ImageSize::new(self.width, self.height);
        let rect = tile_image_rect(tile, image, TILE_SIZE);
        let (width, height) = tile_pixel_size(tile, image, TILE_SIZE);
        let mip = rect.mip();
        let mut data = Vec::with_capacity((width * height) as usize);
        for row in 0..height {
            let y = rect.y_min() + (f64::from(row) + 0.5) * mip - 0.5;
            for column in 0..width {
                let x = rect.x_min() + (f64::from(column) + 0.5) * mip - 0.5;
                data.push(self.value(x, y));
            }
        }
        TileResponse {
            file_id: self.file_id,
            channel: 0,
            stokes: 0,
            tile: tile.encode(),
            width,
            height,
            data: data.into_boxed_slice(),
        }
    }

    /// Whole-plane preview of `width` x `height` texels.
    pub fn preview(&self, width: u32, height: u32) -> Result<PreviewRaster, FrameError> {
        let step_x = f64::from(self.width) / f64::from(width.max(1));
        let step_y = f64::from(self.height) / f64::from(height.max(1));
        let mut data = Vec::with_capacity((width * height) as usize);
        for row in 0..height {
            let y = (f64::from(row) + 0.5) * step_y - 0.5;
            for column in 0..width {
                let x = (f64::from(column) + 0.5) * step_x - 0.5;
                data.push(self.value(x, y));
            }
        }
        PreviewRaster::new(width, height, Arc::from(data))
    }
}

/// Request path into the synthetic worker.
pub struct ChannelTransport {
    requests: Sender<TileRequest>,
}

impl TileTransport for ChannelTransport {
    fn send_tile_request(&mut self, request: TileRequest) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::Disconnected)
    }
}

pub fn channel_transport() -> (ChannelTransport, Receiver<TileRequest>) {
    let (requests, receiver) = unbounded();
    (ChannelTransport { requests }, receiver)
}

/// Serves requests until the transport is dropped or the viewer stops
/// draining responses.
pub fn spawn_synthetic_backend(
    images: Vec<SyntheticImage>,
    requests: Receiver<TileRequest>,
    mut responses: TileResponseSender,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for request in requests.iter() {
            let Some(image) = images.iter().find(|image| image.file_id == request.file_id) else {
                warn!(file_id = request.file_id, "request for an unknown file");
                continue;
            };
            trace!(
                file_id = request.file_id,
                tiles = request.tiles.len(),
                compression = ?request.compression,
                "serving tiles"
            );
            for encoded in &request.tiles {
                let tile = match encoded.decode() {
                    Ok(tile) => tile,
                    Err(err) => {
                        warn!(tile = encoded.raw(), "undecodable tile request: {err}");
                        continue;
                    }
                };
                let mut response = TileResponse {
                    channel: request.channel,
                    stokes: request.stokes,
                    ..image.tile(tile)
                };
                loop {
                    match responses.push(response) {
                        Ok(()) => break,
                        Err(returned) => {
                            if responses.is_closed() {
                                debug!("viewer gone, synthetic backend stopping");
                                return;
                            }
                            response = returned;
                            thread::sleep(FULL_RING_BACKOFF);
                        }
                    }
                }
            }
        }
        debug!("transport closed, synthetic backend stopping");
    })
}
