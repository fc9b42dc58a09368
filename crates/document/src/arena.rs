use std::collections::HashSet;
use std::fmt;

use model::{FrameId, FrameView, Point2D};
use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::compute::{
    ComputeBackend, ComputeError, ComputeEvent, ComputeKind, ComputeOutcome, ComputeRequest,
    MomentRequest, PvRequest,
};
use crate::frame::{Frame, FrameError};
use crate::render_config::RenderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Spatial,
    Spectral,
    RasterScaling,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 3] = [
        ReferenceKind::Spatial,
        ReferenceKind::Spectral,
        ReferenceKind::RasterScaling,
    ];

    fn of(self, frame: &Frame) -> Option<FrameId> {
        match self {
            ReferenceKind::Spatial => frame.spatial_reference(),
            ReferenceKind::Spectral => frame.spectral_reference(),
            ReferenceKind::RasterScaling => frame.raster_scaling_reference(),
        }
    }

    fn assign(self, frame: &mut Frame, reference: Option<FrameId>) {
        match self {
            ReferenceKind::Spatial => frame.set_spatial_reference(reference),
            ReferenceKind::Spectral => frame.set_spectral_reference(reference),
            ReferenceKind::RasterScaling => frame.set_raster_scaling_reference(reference),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceError {
    UnknownFrame(FrameId),
    SelfReference(FrameId),
    Cycle {
        kind: ReferenceKind,
        frame: FrameId,
        reference: FrameId,
    },
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::UnknownFrame(id) => write!(f, "frame {id:?} does not exist"),
            ReferenceError::SelfReference(id) => {
                write!(f, "frame {id:?} cannot reference itself")
            }
            ReferenceError::Cycle {
                kind,
                frame,
                reference,
            } => write!(
                f,
                "{kind:?} reference {frame:?} -> {reference:?} would create a cycle"
            ),
        }
    }
}

impl std::error::Error for ReferenceError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ArenaError {
    UnknownFrame(FrameId),
    Frame(FrameError),
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaError::UnknownFrame(id) => write!(f, "frame {id:?} does not exist"),
            ArenaError::Frame(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ArenaError {}

impl From<FrameError> for ArenaError {
    fn from(err: FrameError) -> Self {
        ArenaError::Frame(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaEvent {
    MatchedFramesChanged {
        base: FrameId,
        matched: Vec<FrameId>,
    },
    FrameClosed(FrameId),
}

/// Owner of every open frame and of the references between them.
///
/// Mutations go through the arena so that each one records the frames it
/// invalidates.
#[derive(Debug, Default)]
pub struct FrameArena {
    frames: SlotMap<FrameId, Frame>,
    order: Vec<FrameId>,
    changed: HashSet<FrameId>,
    events: Vec<ArenaEvent>,
    revision: u64,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.frames.contains_key(id)
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id)
    }

    /// Frames in the order they were opened.
    pub fn ids(&self) -> &[FrameId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &Frame)> {
        self.order.iter().map(|id| (*id, &self.frames[*id]))
    }

    pub fn find_by_file_id(&self, file_id: i32) -> Option<FrameId> {
        self.iter()
            .find(|(_, frame)| frame.file_id() == file_id)
            .map(|(id, _)| id)
    }

    pub fn insert(&mut self, frame: Frame) -> FrameId {
        let id = self.frames.insert(frame);
        self.order.push(id);
        self.mark_changed(id);
        debug!(?id, "frame opened");
        id
    }

    /// Removes a frame and clears every reference that pointed at it.
    pub fn close(&mut self, id: FrameId) -> Option<Frame> {
        if !self.frames.contains_key(id) {
            return None;
        }
        let matched_before = self.secondary_spatial_frames(id);
        let own_base = self.frames[id].spatial_reference();
        self.mark_changed(id);

        let frame = self.frames.remove(id)?;
        self.order.retain(|other| *other != id);
        self.changed.remove(&id);
        for other in self.order.clone() {
            let other_frame = &mut self.frames[other];
            for kind in ReferenceKind::ALL {
                if kind.of(other_frame) == Some(id) {
                    kind.assign(other_frame, None);
                }
            }
        }

        if !matched_before.is_empty() {
            self.events.push(ArenaEvent::MatchedFramesChanged {
                base: id,
                matched: Vec::new(),
            });
        }
        if let Some(base) = own_base {
            self.push_matched_event(base);
        }
        self.events.push(ArenaEvent::FrameClosed(id));
        debug!(?id, "frame closed");
        Some(frame)
    }

    /// Applies `update` to one frame and records the frame and its
    /// dependents as changed.
    pub fn update<T>(
        &mut self,
        id: FrameId,
        update: impl FnOnce(&mut Frame) -> T,
    ) -> Result<T, ArenaError> {
        let frame = self
            .frames
            .get_mut(id)
            .ok_or(ArenaError::UnknownFrame(id))?;
        let result = update(frame);
        self.mark_changed(id);
        Ok(result)
    }

    pub fn set_center(&mut self, id: FrameId, center: Point2D) -> Result<(), ArenaError> {
        self.update(id, |frame| frame.set_center(center))??;
        Ok(())
    }

    pub fn set_zoom(&mut self, id: FrameId, zoom: f64) -> Result<(), ArenaError> {
        self.update(id, |frame| frame.set_zoom(zoom))??;
        Ok(())
    }

    pub fn set_moving(&mut self, id: FrameId, moving: bool) -> Result<(), ArenaError> {
        self.update(id, |frame| frame.set_moving(moving))
    }

    /// Changes the channel of `id` and of every frame spectrally matched to
    /// it. Matched frames clamp the channel to their own depth.
    pub fn set_channel(
        &mut self,
        id: FrameId,
        channel: u32,
        stokes: u32,
    ) -> Result<(), ArenaError> {
        self.update(id, |frame| frame.set_channel(channel, stokes))??;
        let mut pending = vec![id];
        let mut visited = HashSet::from([id]);
        while let Some(source) = pending.pop() {
            for other in self.order.clone() {
                if self.frames[other].spectral_reference() != Some(source)
                    || !visited.insert(other)
                {
                    continue;
                }
                let frame = &mut self.frames[other];
                let info = frame.info();
                let matched_channel = channel.min(info.depth - 1);
                let matched_stokes = stokes.min(info.stokes - 1);
                frame
                    .set_channel(matched_channel, matched_stokes)
                    .expect("channel clamped to frame depth");
                self.mark_changed(other);
                pending.push(other);
            }
        }
        Ok(())
    }

    pub fn set_spatial_reference(
        &mut self,
        id: FrameId,
        reference: Option<FrameId>,
    ) -> Result<(), ReferenceError> {
        let previous = self.set_reference(ReferenceKind::Spatial, id, reference)?;
        if previous != reference {
            if let Some(base) = previous {
                self.push_matched_event(base);
            }
            if let Some(base) = reference {
                self.push_matched_event(base);
            }
        }
        Ok(())
    }

    pub fn set_spectral_reference(
        &mut self,
        id: FrameId,
        reference: Option<FrameId>,
    ) -> Result<(), ReferenceError> {
        self.set_reference(ReferenceKind::Spectral, id, reference)?;
        if let Some(base) = reference {
            let (channel, stokes) = {
                let base = &self.frames[base];
                (base.channel(), base.stokes())
            };
            let frame = &mut self.frames[id];
            let info = frame.info();
            let channel = channel.min(info.depth - 1);
            let stokes = stokes.min(info.stokes - 1);
            frame
                .set_channel(channel, stokes)
                .expect("channel clamped to frame depth");
        }
        Ok(())
    }

    pub fn set_raster_scaling_reference(
        &mut self,
        id: FrameId,
        reference: Option<FrameId>,
    ) -> Result<(), ReferenceError> {
        self.set_reference(ReferenceKind::RasterScaling, id, reference)?;
        Ok(())
    }

    fn set_reference(
        &mut self,
        kind: ReferenceKind,
        id: FrameId,
        reference: Option<FrameId>,
    ) -> Result<Option<FrameId>, ReferenceError> {
        if !self.frames.contains_key(id) {
            return Err(ReferenceError::UnknownFrame(id));
        }
        if let Some(target) = reference {
            if target == id {
                return Err(ReferenceError::SelfReference(id));
            }
            if !self.frames.contains_key(target) {
                return Err(ReferenceError::UnknownFrame(target));
            }
            if self.reference_chain_reaches(kind, target, id) {
                warn!(?kind, frame = ?id, reference = ?target, "reference cycle rejected");
                return Err(ReferenceError::Cycle {
                    kind,
                    frame: id,
                    reference: target,
                });
            }
        }
        let frame = &mut self.frames[id];
        let previous = kind.of(frame);
        kind.assign(frame, reference);
        self.mark_changed(id);
        Ok(previous)
    }

    fn reference_chain_reaches(&self, kind: ReferenceKind, start: FrameId, goal: FrameId) -> bool {
        let mut current = Some(start);
        let mut steps = 0;
        while let Some(id) = current {
            if id == goal {
                return true;
            }
            steps += 1;
            assert!(steps <= self.frames.len(), "reference chain contains a cycle");
            current = self.frames.get(id).and_then(|frame| kind.of(frame));
        }
        false
    }

    /// Frames spatially matched to `base`, in the order they were opened.
    pub fn secondary_spatial_frames(&self, base: FrameId) -> Vec<FrameId> {
        self.iter()
            .filter(|(_, frame)| frame.spatial_reference() == Some(base))
            .map(|(id, _)| id)
            .collect()
    }

    /// View a frame needs drawn. Spatially matched frames follow their
    /// reference: its view is mapped back through the spatial transform
    /// and the mip shrinks by the transform scale.
    pub fn required_view(&self, id: FrameId) -> Option<FrameView> {
        let frame = self.frames.get(id)?;
        let Some(reference) = frame.spatial_reference() else {
            return Some(frame.own_view());
        };
        let reference_view = self.required_view(reference)?;
        let Some(transform) = frame.spatial_transform() else {
            return Some(reference_view);
        };

        // Transforms act on pixel centres; view bounds are texel edges.
        let corners = [
            Point2D::new(reference_view.x_min(), reference_view.y_min()),
            Point2D::new(reference_view.x_max(), reference_view.y_min()),
            Point2D::new(reference_view.x_min(), reference_view.y_max()),
            Point2D::new(reference_view.x_max(), reference_view.y_max()),
        ]
        .map(|corner| {
            let mapped = transform.apply_inverse(Point2D::new(corner.x - 0.5, corner.y - 0.5));
            Point2D::new(mapped.x + 0.5, mapped.y + 0.5)
        });
        let x_min = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let x_max = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let y_min = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let y_max = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
        FrameView::new(
            x_min,
            x_max,
            y_min,
            y_max,
            reference_view.mip() / transform.scale(),
        )
        .ok()
    }

    /// Render config with value mapping taken from the raster-scaling
    /// reference, when there is one.
    pub fn effective_render_config(&self, id: FrameId) -> Option<RenderConfig> {
        let frame = self.frames.get(id)?;
        let mut config = frame.render_config().clone();
        if let Some(source) = frame
            .raster_scaling_reference()
            .and_then(|reference| self.effective_render_config(reference))
        {
            config.inherit_scaling_from(&source);
        }
        Some(config)
    }

    /// Root of the spatial reference chain of `id`.
    pub fn spatial_root(&self, id: FrameId) -> FrameId {
        let mut current = id;
        while let Some(next) = self.frames.get(current).and_then(Frame::spatial_reference) {
            current = next;
        }
        current
    }

    /// Frames changed since the last drain, in open order.
    pub fn drain_changes(&mut self) -> Vec<FrameId> {
        let changed = std::mem::take(&mut self.changed);
        self.order
            .iter()
            .copied()
            .filter(|id| changed.contains(id))
            .collect()
    }

    pub fn drain_events(&mut self) -> Vec<ArenaEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn request_pv(
        &mut self,
        id: FrameId,
        mut request: PvRequest,
        backend: &mut dyn ComputeBackend,
    ) -> Result<(), ComputeError> {
        let frame = self.frames.get(id).ok_or(ComputeError::UnknownFrame)?;
        if let Some(range) = request.spectral_range {
            request.spectral_range = Some(range.normalized(frame.info().depth));
        }
        self.submit(id, ComputeRequest::Pv(request), backend)
    }

    pub fn request_moments(
        &mut self,
        id: FrameId,
        mut request: MomentRequest,
        backend: &mut dyn ComputeBackend,
    ) -> Result<(), ComputeError> {
        let frame = self.frames.get(id).ok_or(ComputeError::UnknownFrame)?;
        if request.moments.is_empty() {
            return Err(ComputeError::EmptyMomentList);
        }
        request.spectral_range = request.spectral_range.normalized(frame.info().depth);
        self.submit(id, ComputeRequest::Moment(request), backend)
    }

    fn submit(
        &mut self,
        id: FrameId,
        request: ComputeRequest,
        backend: &mut dyn ComputeBackend,
    ) -> Result<(), ComputeError> {
        let kind = request.kind();
        let frame = self.frames.get_mut(id).ok_or(ComputeError::UnknownFrame)?;
        if frame.file_id() != request.file_id() {
            return Err(ComputeError::FileMismatch {
                expected: frame.file_id(),
                actual: request.file_id(),
            });
        }
        if frame.compute().state(kind).is_active() {
            return Err(ComputeError::Busy(kind));
        }
        backend.submit(request)?;
        frame.compute_mut().slot_mut(kind).start(kind)?;
        frame.set_error_message(None);
        self.mark_changed(id);
        Ok(())
    }

    pub fn cancel_compute(
        &mut self,
        id: FrameId,
        kind: ComputeKind,
        backend: &mut dyn ComputeBackend,
    ) -> Result<(), ComputeError> {
        let frame = self.frames.get_mut(id).ok_or(ComputeError::UnknownFrame)?;
        frame.compute_mut().slot_mut(kind).begin_cancel(kind)?;
        backend.cancel(frame.file_id(), kind);
        self.mark_changed(id);
        Ok(())
    }

    /// Routes a backend event to the frame showing its file.
    pub fn apply_compute_event(&mut self, event: &ComputeEvent) -> Result<(), ComputeError> {
        let id = self
            .find_by_file_id(event.file_id())
            .ok_or(ComputeError::UnknownFrame)?;
        let frame = &mut self.frames[id];
        let outcome = frame.compute_mut().slot_mut(event.kind()).apply(event);
        if let Some(ComputeOutcome::Failed(message)) = outcome {
            warn!(file_id = event.file_id(), kind = ?event.kind(), "compute failed: {message}");
            frame.set_error_message(Some(message));
        }
        self.mark_changed(id);
        Ok(())
    }

    fn push_matched_event(&mut self, base: FrameId) {
        if !self.frames.contains_key(base) {
            return;
        }
        let matched = self.secondary_spatial_frames(base);
        self.events
            .push(ArenaEvent::MatchedFramesChanged { base, matched });
    }

    fn mark_changed(&mut self, id: FrameId) {
        self.revision = self
            .revision
            .checked_add(1)
            .expect("arena revision overflow");
        let mut pending = vec![id];
        let mut visited = HashSet::new();
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            self.changed.insert(current);
            for (other, frame) in self.frames.iter() {
                if ReferenceKind::ALL
                    .iter()
                    .any(|kind| kind.of(frame) == Some(current))
                {
                    pending.push(other);
                }
            }
        }
    }
}
