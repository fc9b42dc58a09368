//! Colour-blended images: a base frame plus spatially matched frames, each
//! drawn with its own colormap and added together.

use std::fmt;

use document::{ArenaEvent, FrameArena, FrameId};
use render_protocol::{
    CUSTOM_COLORMAP, Color, CustomGradient, colormap_lut, mono_colormap_for_color,
};
use tracing::{debug, warn};

/// Most layers picked up from the matched frames when a store is created.
pub const DEFAULT_LAYER_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColormapSet {
    /// Colours sampled evenly along one gradient colormap.
    Gradient {
        colormap: &'static str,
        inverted: bool,
    },
    /// Colormaps picked evenly from a fixed list.
    Collection(&'static [&'static str]),
}

pub const COLORMAP_SETS: [(&str, ColormapSet); 3] = [
    ("RGB", ColormapSet::Collection(&["Red", "Green", "Blue"])),
    ("CMY", ColormapSet::Collection(&["Magenta", "Yellow", "Cyan"])),
    (
        "Rainbow",
        ColormapSet::Gradient {
            colormap: "rainbow",
            inverted: true,
        },
    ),
];

pub fn colormap_set(name: &str) -> Option<ColormapSet> {
    COLORMAP_SETS
        .iter()
        .find(|(set_name, _)| *set_name == name)
        .map(|(_, set)| *set)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorBlendingError {
    FrameNotMatched(FrameId),
    FrameAlreadySelected(FrameId),
    InvalidLayerIndex(usize),
    InvalidAlpha(f64),
    UnknownColormapSet(String),
}

impl fmt::Display for ColorBlendingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorBlendingError::FrameNotMatched(_) => {
                write!(f, "The selected frame is not matched to the base frame.")
            }
            ColorBlendingError::FrameAlreadySelected(_) => {
                write!(f, "The selected frame is selected in other layers.")
            }
            ColorBlendingError::InvalidLayerIndex(_) => write!(f, "Invalid layer index."),
            ColorBlendingError::InvalidAlpha(_) => write!(f, "Invalid alpha value."),
            ColorBlendingError::UnknownColormapSet(_) => write!(f, "Invalid colormap set name."),
        }
    }
}

impl std::error::Error for ColorBlendingError {}

/// Layer configuration of one colour-blended image.
///
/// Layer 0 is the base frame; `selected_frames` are layers 1.. and
/// `alpha` has one entry per layer.
#[derive(Debug, Clone)]
pub struct ColorBlendingStore {
    id: u32,
    filename: String,
    title_custom_text: String,
    base_frame: FrameId,
    matched_frames: Vec<FrameId>,
    selected_frames: Vec<FrameId>,
    alpha: Vec<f64>,
    raster_visible: bool,
    contour_visible: bool,
    vector_overlay_visible: bool,
}

impl ColorBlendingStore {
    /// Starts with the first matched frames as layers, up to the default
    /// layer limit.
    pub fn new(id: u32, base_frame: FrameId, matched_frames: Vec<FrameId>) -> Self {
        let selected_frames: Vec<FrameId> = matched_frames
            .iter()
            .copied()
            .take(DEFAULT_LAYER_LIMIT - 1)
            .collect();
        let alpha = vec![1.0; selected_frames.len() + 1];
        let filename = format!("Color Blending {}", id + 1);
        Self {
            id,
            title_custom_text: filename.clone(),
            filename,
            base_frame,
            matched_frames,
            selected_frames,
            alpha,
            raster_visible: true,
            contour_visible: true,
            vector_overlay_visible: true,
        }
    }

    pub fn from_arena(id: u32, base_frame: FrameId, arena: &FrameArena) -> Self {
        Self::new(id, base_frame, arena.secondary_spatial_frames(base_frame))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn title(&self) -> &str {
        &self.title_custom_text
    }

    pub fn set_title_custom_text(&mut self, text: impl Into<String>) {
        self.title_custom_text = text.into();
    }

    pub fn base_frame(&self) -> FrameId {
        self.base_frame
    }

    pub fn selected_frames(&self) -> &[FrameId] {
        &self.selected_frames
    }

    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    /// Every layer's frame, base first.
    pub fn frames(&self) -> impl Iterator<Item = FrameId> + '_ {
        std::iter::once(self.base_frame).chain(self.selected_frames.iter().copied())
    }

    /// Frames paired with their alpha, base first.
    pub fn layers(&self) -> impl Iterator<Item = (FrameId, f64)> + '_ {
        self.frames().zip(self.alpha.iter().copied())
    }

    pub fn contains_frame(&self, frame: FrameId) -> bool {
        self.frames().any(|layer| layer == frame)
    }

    pub fn raster_visible(&self) -> bool {
        self.raster_visible
    }

    pub fn contour_visible(&self) -> bool {
        self.contour_visible
    }

    pub fn vector_overlay_visible(&self) -> bool {
        self.vector_overlay_visible
    }

    pub fn toggle_raster_visible(&mut self) {
        self.raster_visible = !self.raster_visible;
    }

    pub fn toggle_contour_visible(&mut self) {
        self.contour_visible = !self.contour_visible;
    }

    pub fn toggle_vector_overlay_visible(&mut self) {
        self.vector_overlay_visible = !self.vector_overlay_visible;
    }

    pub fn add_selected_frame(&mut self, frame: FrameId) -> Result<(), ColorBlendingError> {
        self.validate_frame(frame).inspect_err(log_violation)?;
        self.selected_frames.push(frame);
        self.alpha.push(1.0);
        self.check_invariant();
        Ok(())
    }

    /// Replaces the frame of layer `index + 1`.
    pub fn set_selected_frame(
        &mut self,
        index: usize,
        frame: FrameId,
    ) -> Result<(), ColorBlendingError> {
        self.validate_frame(frame)
            .and_then(|()| self.validate_selected_index(index))
            .inspect_err(log_violation)?;
        self.selected_frames[index] = frame;
        Ok(())
    }

    /// Sets the alpha of layer `index`, counting the base layer as 0.
    pub fn set_alpha(&mut self, index: usize, alpha: f64) -> Result<(), ColorBlendingError> {
        let result = if index >= self.alpha.len() {
            Err(ColorBlendingError::InvalidLayerIndex(index))
        } else if !(0.0..=1.0).contains(&alpha) {
            Err(ColorBlendingError::InvalidAlpha(alpha))
        } else {
            Ok(())
        };
        result.inspect_err(log_violation)?;
        self.alpha[index] = alpha;
        Ok(())
    }

    /// Removes layer `index + 1` and its alpha.
    pub fn delete_selected_frame(&mut self, index: usize) -> Result<(), ColorBlendingError> {
        self.validate_selected_index(index)
            .inspect_err(log_violation)?;
        self.selected_frames.remove(index);
        self.alpha.remove(index + 1);
        self.check_invariant();
        Ok(())
    }

    /// Drops every layer whose frame left the base frame's matched set.
    pub fn sync_matched_frames(&mut self, matched: &[FrameId]) {
        self.matched_frames = matched.to_vec();
        for index in (0..self.selected_frames.len()).rev() {
            if !matched.contains(&self.selected_frames[index]) {
                debug!(store = self.id, frame = ?self.selected_frames[index], "layer unmatched");
                self.selected_frames.remove(index);
                self.alpha.remove(index + 1);
            }
        }
        self.check_invariant();
    }

    /// Reacts to arena events. Returns `false` once the base frame is gone
    /// and the store should be dropped.
    pub fn handle_event(&mut self, event: &ArenaEvent) -> bool {
        match event {
            ArenaEvent::MatchedFramesChanged { base, matched } if *base == self.base_frame => {
                self.sync_matched_frames(matched);
                true
            }
            ArenaEvent::FrameClosed(frame) => *frame != self.base_frame,
            _ => true,
        }
    }

    /// Assigns colormaps from a named set to every layer without a
    /// raster-scaling reference.
    pub fn apply_colormap_set(
        &self,
        name: &str,
        arena: &mut FrameArena,
    ) -> Result<(), ColorBlendingError> {
        let set = colormap_set(name)
            .ok_or_else(|| ColorBlendingError::UnknownColormapSet(name.to_string()))
            .inspect_err(log_violation)?;
        let frames: Vec<FrameId> = self
            .frames()
            .filter(|frame| {
                arena
                    .get(*frame)
                    .is_some_and(|frame| frame.raster_scaling_reference().is_none())
            })
            .collect();
        let count = frames.len();

        match set {
            ColormapSet::Gradient { colormap, inverted } => {
                let lut = colormap_lut(colormap, CustomGradient::default())
                    .expect("colormap sets name known gradients");
                let size = lut.entries().len();
                for (i, frame) in frames.iter().enumerate() {
                    let index = if count == 1 {
                        if inverted { size - 1 } else { 0 }
                    } else {
                        let position = if inverted { count - 1 - i } else { i };
                        ((position * (size - 1)) as f64 / (count - 1) as f64).round() as usize
                    };
                    let [r, g, b, a] = lut.entries()[index];
                    assign_gradient_color(arena, *frame, Color::rgba(r, g, b, a));
                }
            }
            ColormapSet::Collection(colormaps) => {
                for (i, frame) in frames.iter().enumerate() {
                    let index = if count == 1 {
                        0
                    } else {
                        ((i * (colormaps.len() - 1)) as f64 / (count - 1) as f64).round() as usize
                    };
                    arena
                        .update(*frame, |frame| {
                            frame
                                .render_config_mut()
                                .set_colormap(colormaps[index])
                                .expect("colormap sets name known colormaps");
                        })
                        .expect("layers filtered to open frames");
                }
            }
        }
        Ok(())
    }

    fn validate_frame(&self, frame: FrameId) -> Result<(), ColorBlendingError> {
        if !self.matched_frames.contains(&frame) {
            return Err(ColorBlendingError::FrameNotMatched(frame));
        }
        if self.contains_frame(frame) {
            return Err(ColorBlendingError::FrameAlreadySelected(frame));
        }
        Ok(())
    }

    fn validate_selected_index(&self, index: usize) -> Result<(), ColorBlendingError> {
        if index >= self.selected_frames.len() {
            return Err(ColorBlendingError::InvalidLayerIndex(index));
        }
        Ok(())
    }

    fn check_invariant(&self) {
        assert_eq!(
            self.alpha.len(),
            self.selected_frames.len() + 1,
            "one alpha per layer"
        );
    }
}

/// Mono colormap when one is drawn in exactly `color`, else a custom
/// gradient ending at `color`.
fn assign_gradient_color(arena: &mut FrameArena, frame: FrameId, color: Color) {
    arena
        .update(frame, |frame| {
            let config = frame.render_config_mut();
            match mono_colormap_for_color(color) {
                Some(mono) => config.set_colormap(mono).expect("mono colormaps are known"),
                None => {
                    let start = config.custom_gradient().start;
                    config.set_custom_gradient(start, color);
                    debug_assert_eq!(config.colormap(), CUSTOM_COLORMAP);
                }
            }
        })
        .expect("layers filtered to open frames");
}

fn log_violation(err: &ColorBlendingError) {
    warn!("{err}");
}

#[cfg(test)]
mod tests;
