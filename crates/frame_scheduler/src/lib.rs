//! Decides which panels are drawn on a tick.
//!
//! Panels carry a dirty flag. Changed frames dirty the panels showing them,
//! a tile arrival or a layout change dirties every panel, and a tick hands
//! out dirty panels in grid order.

use std::fmt;

use bitvec::prelude::{BitVec, Lsb0};
use model::FrameId;
use smallvec::SmallVec;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerConfig {
    /// Panels drawn per tick; the rest stay dirty for the next one.
    pub max_panels_per_tick: usize,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            max_panels_per_tick: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerInput<'a> {
    pub tick: u64,
    /// Frames whose state changed since the previous tick.
    pub changed_frames: &'a [FrameId],
    pub tiles_arrived: bool,
    pub layout_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulerUpdateReason {
    /// Panels left over from an earlier tick.
    Backlog,
    FramesChanged,
    TilesArrived,
    LayoutChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSchedulerDecision {
    pub tick: u64,
    /// Panel indices to draw, in grid order.
    pub panels: Vec<usize>,
    /// Strongest reason a panel became dirty since the last decision.
    pub update_reason: Option<SchedulerUpdateReason>,
}

impl FrameSchedulerDecision {
    pub fn is_idle(&self) -> bool {
        self.panels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    InvalidPanel { index: usize, panel_count: usize },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::InvalidPanel { index, panel_count } => {
                write!(f, "panel {index} outside a grid of {panel_count}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

#[derive(Debug, Clone)]
pub struct FrameScheduler {
    config: FrameSchedulerConfig,
    /// Frames each panel draws; several for a colour-blended panel.
    panels: Vec<SmallVec<[FrameId; 4]>>,
    dirty: BitVec<usize, Lsb0>,
    pending_reason: Option<SchedulerUpdateReason>,
}

impl FrameScheduler {
    pub fn new(config: FrameSchedulerConfig, panel_count: usize) -> Self {
        assert!(
            config.max_panels_per_tick > 0,
            "invalid frame scheduler config: max_panels_per_tick must be positive"
        );
        Self {
            config,
            panels: vec![SmallVec::new(); panel_count],
            dirty: BitVec::repeat(false, panel_count),
            pending_reason: None,
        }
    }

    pub fn config(&self) -> FrameSchedulerConfig {
        self.config
    }

    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }

    /// Resizes the grid. Assignments of surviving panels are kept; every
    /// panel is dirty afterwards.
    pub fn set_panel_count(&mut self, panel_count: usize) {
        self.panels.resize(panel_count, SmallVec::new());
        self.dirty = BitVec::repeat(true, panel_count);
        self.note(SchedulerUpdateReason::LayoutChanged);
    }

    /// Sets the frames drawn by panel `index` and marks it dirty.
    pub fn assign_panel(
        &mut self,
        index: usize,
        frames: impl IntoIterator<Item = FrameId>,
    ) -> Result<(), SchedulerError> {
        let panel_count = self.panels.len();
        let panel = self
            .panels
            .get_mut(index)
            .ok_or(SchedulerError::InvalidPanel { index, panel_count })?;
        panel.clear();
        panel.extend(frames);
        self.dirty.set(index, true);
        self.note(SchedulerUpdateReason::FramesChanged);
        Ok(())
    }

    pub fn panel_frames(&self, index: usize) -> Option<&[FrameId]> {
        self.panels.get(index).map(|frames| frames.as_slice())
    }

    pub fn mark_dirty(&mut self, index: usize) -> Result<(), SchedulerError> {
        if index >= self.panels.len() {
            return Err(SchedulerError::InvalidPanel {
                index,
                panel_count: self.panels.len(),
            });
        }
        self.dirty.set(index, true);
        self.note(SchedulerUpdateReason::FramesChanged);
        Ok(())
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.get(index).is_some_and(|bit| *bit)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.count_ones()
    }

    pub fn schedule_frame(&mut self, input: FrameSchedulerInput<'_>) -> FrameSchedulerDecision {
        if input.layout_changed {
            self.dirty.fill(true);
            self.note(SchedulerUpdateReason::LayoutChanged);
        } else if input.tiles_arrived {
            self.dirty.fill(true);
            self.note(SchedulerUpdateReason::TilesArrived);
        }
        for frame in input.changed_frames {
            for (index, frames) in self.panels.iter().enumerate() {
                if frames.contains(frame) {
                    self.dirty.set(index, true);
                    self.pending_reason = self
                        .pending_reason
                        .max(Some(SchedulerUpdateReason::FramesChanged));
                }
            }
        }

        let panels: Vec<usize> = self
            .dirty
            .iter_ones()
            .take(self.config.max_panels_per_tick)
            .collect();
        for index in &panels {
            self.dirty.set(*index, false);
        }
        let update_reason = if panels.is_empty() {
            None
        } else {
            self.pending_reason.or(Some(SchedulerUpdateReason::Backlog))
        };
        self.pending_reason = None;
        if !panels.is_empty() {
            trace!(
                tick = input.tick,
                panels = panels.len(),
                left = self.dirty.count_ones(),
                "panels scheduled"
            );
        }
        FrameSchedulerDecision {
            tick: input.tick,
            panels,
            update_reason,
        }
    }

    fn note(&mut self, reason: SchedulerUpdateReason) {
        self.pending_reason = self.pending_reason.max(Some(reason));
    }
}
