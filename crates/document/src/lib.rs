//! Open frames, the references that tie them together, and the per-frame
//! state that decides how each one is drawn.

mod arena;
pub mod compute;
mod frame;
mod render_config;

pub use arena::{ArenaError, ArenaEvent, FrameArena, ReferenceError, ReferenceKind};
pub use compute::{
    ChannelRange, ComputeBackend, ComputeError, ComputeEvent, ComputeKind, ComputeOutcome,
    ComputeRequest, ComputeState, Moment, MomentMask, MomentRequest, PvRequest,
};
pub use frame::{
    FileInfo, Frame, FrameError, MAX_ZOOM, MIN_ZOOM, PIXEL_ASPECT_RANGE, PreviewRaster,
};
pub use model::FrameId;
pub use render_config::{
    DEFAULT_COLORMAP, DEFAULT_SCALING_EXPONENT, RasterStyle, RenderConfig, RenderConfigError,
};

#[cfg(test)]
mod tests;
