use std::fmt;
use std::time::Duration;

use color_blending::ColorBlendingStore;
use compositor::{
    CompositorError, PanelCompositor, PanelContent, PanelOverlay, PanelReport, PanelScene,
    render_preview,
};
use document::{ArenaError, ArenaEvent, FileInfo, Frame, FrameArena, FrameError, FrameId};
use frame_scheduler::{FrameScheduler, FrameSchedulerInput};
use image::RgbaImage;
use render_protocol::{GridLayout, GridLayoutError, RenderDomain};
use renderer::{RenderBackend, RenderDomains};
use tile_stream::{TileArrivalSubscription, TileResponseSender, TileService, TileTransport};
use tiles::{TileCache, TileCacheStats};
use tracing::{debug, info};

use crate::config::{ConfigError, ViewerConfig};

#[derive(Debug)]
pub enum ViewerError {
    Config(ConfigError),
    Layout(GridLayoutError),
    Frame(FrameError),
    Arena(ArenaError),
    Compositor(CompositorError),
    UnknownFrame(FrameId),
    UnknownStore(usize),
    InvalidPanel(usize),
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerError::Config(err) => err.fmt(f),
            ViewerError::Layout(err) => write!(f, "invalid panel grid: {err}"),
            ViewerError::Frame(err) => write!(f, "frame error: {err}"),
            ViewerError::Arena(err) => write!(f, "arena error: {err}"),
            ViewerError::Compositor(err) => write!(f, "compositor error: {err}"),
            ViewerError::UnknownFrame(frame) => write!(f, "frame {frame:?} is not open"),
            ViewerError::UnknownStore(index) => write!(f, "no colour-blending store {index}"),
            ViewerError::InvalidPanel(index) => write!(f, "no panel {index} in the grid"),
        }
    }
}

impl std::error::Error for ViewerError {}

impl From<ConfigError> for ViewerError {
    fn from(err: ConfigError) -> Self {
        ViewerError::Config(err)
    }
}

impl From<GridLayoutError> for ViewerError {
    fn from(err: GridLayoutError) -> Self {
        ViewerError::Layout(err)
    }
}

impl From<FrameError> for ViewerError {
    fn from(err: FrameError) -> Self {
        ViewerError::Frame(err)
    }
}

impl From<ArenaError> for ViewerError {
    fn from(err: ArenaError) -> Self {
        ViewerError::Arena(err)
    }
}

impl From<CompositorError> for ViewerError {
    fn from(err: CompositorError) -> Self {
        ViewerError::Compositor(err)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub merged_tiles: usize,
    pub panels: Vec<PanelReport>,
    pub requested_tiles: usize,
}

impl TickReport {
    /// Nothing was drawn, merged or requested.
    pub fn is_idle(&self) -> bool {
        self.panels.is_empty() && self.merged_tiles == 0 && self.requested_tiles == 0
    }
}

/// Multi-panel image view driven by [`ImageViewer::tick`].
pub struct ImageViewer {
    config: ViewerConfig,
    arena: FrameArena,
    cache: TileCache,
    tiles: TileService,
    arrivals: TileArrivalSubscription,
    domains: RenderDomains,
    stores: Vec<ColorBlendingStore>,
    next_store_id: u32,
    compositor: PanelCompositor,
    scheduler: FrameScheduler,
    panels: Vec<Option<PanelContent>>,
    tick: u64,
    layout_changed: bool,
}

impl ImageViewer {
    /// Builds the viewer and returns the sender the tile connection pushes
    /// responses into.
    pub fn new(
        config: ViewerConfig,
        transport: Box<dyn TileTransport>,
        main: Box<dyn RenderBackend>,
        preview: Box<dyn RenderBackend>,
    ) -> Result<(Self, TileResponseSender), ViewerError> {
        config.validate()?;
        let layout = config.grid_layout()?;
        let (tiles, responses) = TileService::new(transport, config.tile_stream_config());
        let arrivals = tiles.subscribe();
        let viewer = Self {
            cache: TileCache::new(config.tile_cache_config()),
            tiles,
            arrivals,
            domains: RenderDomains::new(main, preview),
            arena: FrameArena::new(),
            stores: Vec::new(),
            next_store_id: 0,
            compositor: PanelCompositor::new(layout, config.compositor_config()),
            scheduler: FrameScheduler::new(config.scheduler_config(), layout.panel_count()),
            panels: vec![None; layout.panel_count()],
            tick: 0,
            layout_changed: true,
            config,
        };
        info!(
            columns = layout.columns(),
            rows = layout.rows(),
            "image viewer ready"
        );
        Ok((viewer, responses))
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn arena(&self) -> &FrameArena {
        &self.arena
    }

    /// Frame state for changes; every change is picked up by the next tick.
    pub fn arena_mut(&mut self) -> &mut FrameArena {
        &mut self.arena
    }

    pub fn layout(&self) -> &GridLayout {
        self.compositor.layout()
    }

    pub fn cache_stats(&self) -> TileCacheStats {
        self.cache.stats()
    }

    pub fn pending_tiles(&self) -> usize {
        self.tiles.pending_count()
    }

    pub fn panel_content(&self, index: usize) -> Option<PanelContent> {
        self.panels.get(index).copied().flatten()
    }

    pub fn store(&self, index: usize) -> Option<&ColorBlendingStore> {
        self.stores.get(index)
    }

    pub fn add_overlay(&mut self, overlay: Box<dyn PanelOverlay>) {
        self.compositor.add_overlay(overlay);
        self.layout_changed = true;
    }

    /// Opens a frame sized to the panel image area and zoomed to fit.
    pub fn open_frame(&mut self, info: FileInfo) -> Result<FrameId, ViewerError> {
        let mut frame = Frame::new(info)?;
        let (width, height) = self.render_size();
        frame.set_render_size(width, height, self.config.pixel_ratio)?;
        frame.zoom_to_fit();
        let id = self.arena.insert(frame);
        debug!(?id, "frame opened");
        Ok(id)
    }

    /// Closes a frame. Panels showing it go blank; tiles of its file are
    /// dropped once no other frame shows the file.
    pub fn close_frame(&mut self, frame: FrameId) -> Result<(), ViewerError> {
        let closed = self
            .arena
            .close(frame)
            .ok_or(ViewerError::UnknownFrame(frame))?;
        let file_id = closed.file_id();
        if self.arena.find_by_file_id(file_id).is_none() {
            self.tiles.cancel_file(file_id);
            let dropped = self.cache.clear_file(file_id);
            debug!(file_id, dropped, "file tiles released");
        }
        for index in 0..self.panels.len() {
            if self.panels[index] == Some(PanelContent::Frame(frame)) {
                self.blank_panel(index);
            }
        }
        Ok(())
    }

    pub fn show_frame(&mut self, panel: usize, frame: FrameId) -> Result<(), ViewerError> {
        if !self.arena.contains(frame) {
            return Err(ViewerError::UnknownFrame(frame));
        }
        self.assign(panel, PanelContent::Frame(frame))
    }

    /// Shows a new colour-blending store of `base` and its matched frames.
    /// Returns the store index.
    pub fn show_color_blending(
        &mut self,
        panel: usize,
        base: FrameId,
    ) -> Result<usize, ViewerError> {
        if !self.arena.contains(base) {
            return Err(ViewerError::UnknownFrame(base));
        }
        if panel >= self.panels.len() {
            return Err(ViewerError::InvalidPanel(panel));
        }
        let store = ColorBlendingStore::from_arena(self.next_store_id, base, &self.arena);
        self.next_store_id += 1;
        self.stores.push(store);
        let index = self.stores.len() - 1;
        self.assign(panel, PanelContent::ColorBlending(index))?;
        Ok(index)
    }

    /// Edits a colour-blending store and redraws the panels showing it.
    pub fn update_store<T>(
        &mut self,
        index: usize,
        update: impl FnOnce(&mut ColorBlendingStore, &mut FrameArena) -> T,
    ) -> Result<T, ViewerError> {
        let store = self
            .stores
            .get_mut(index)
            .ok_or(ViewerError::UnknownStore(index))?;
        let result = update(store, &mut self.arena);
        self.refresh_store_panels(index);
        Ok(result)
    }

    /// Switches to another grid. Frames keep their zoom and centre and get
    /// the new image area as render size.
    pub fn set_layout(&mut self, layout: GridLayout) -> Result<(), ViewerError> {
        self.compositor.set_layout(layout);
        self.scheduler.set_panel_count(layout.panel_count());
        self.panels.resize(layout.panel_count(), None);
        for index in 0..self.panels.len() {
            if let Some(content) = self.panels[index] {
                self.assign(index, content)?;
            }
        }
        let (width, height) = self.render_size();
        let ratio = self.config.pixel_ratio;
        for frame in self.arena.ids().to_vec() {
            self.arena
                .update(frame, |state| state.set_render_size(width, height, ratio))??;
        }
        self.layout_changed = true;
        Ok(())
    }

    /// Merges arrived tiles, applies frame and store changes, draws the
    /// panels that need it and asks for the tiles they lacked.
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        self.arrivals.try_consume();
        let drained = self.tiles.drain_into(&mut self.cache);
        self.handle_arena_events();
        let changed = self.arena.drain_changes();

        let decision = self.scheduler.schedule_frame(FrameSchedulerInput {
            tick: self.tick,
            changed_frames: &changed,
            tiles_arrived: drained.merged > 0 || drained.expired > 0,
            layout_changed: std::mem::take(&mut self.layout_changed),
        });
        let mut work = Vec::with_capacity(decision.panels.len());
        for index in &decision.panels {
            match self.panels.get(*index).copied().flatten() {
                Some(content) => work.push((*index, content)),
                None => self.compositor.clear_panel(*index),
            }
        }

        let mut scene = PanelScene {
            arena: &self.arena,
            stores: &self.stores,
            cache: &mut self.cache,
        };
        let reports = self.compositor.render_panels(
            &work,
            &mut scene,
            self.domains.get_mut(RenderDomain::Main),
        );

        let mut requested = 0;
        for report in &reports {
            for missing in &report.missing {
                let sent = self.tiles.request_tiles(
                    &self.cache,
                    missing.file_id,
                    missing.channel,
                    missing.stokes,
                    &missing.tiles,
                );
                match sent {
                    Ok(count) => requested += count,
                    Err(_) => {
                        // Nothing is in flight for this panel; draw it again
                        // next tick so its tiles are asked for once more.
                        self.scheduler
                            .mark_dirty(report.index)
                            .expect("rendered panel is inside the grid");
                    }
                }
            }
        }
        if !reports.is_empty() || drained.merged > 0 {
            debug!(
                tick = self.tick,
                reason = ?decision.update_reason,
                panels = reports.len(),
                merged = drained.merged,
                requested,
                "tick"
            );
        }
        TickReport {
            tick: self.tick,
            merged_tiles: drained.merged,
            panels: reports,
            requested_tiles: requested,
        }
    }

    /// Blocks until a tile arrives or `timeout` passes.
    pub fn wait_for_tiles(&self, timeout: Duration) -> bool {
        self.arrivals.wait(timeout)
    }

    /// Ticks until nothing is drawn, merged or in flight, at most
    /// `max_ticks` times. Returns the number of ticks run.
    pub fn settle(&mut self, max_ticks: u32, wait: Duration) -> u32 {
        for tick in 1..=max_ticks {
            let report = self.tick();
            if report.is_idle() && self.pending_tiles() == 0 {
                return tick;
            }
            if self.pending_tiles() > 0 {
                self.wait_for_tiles(wait);
            }
        }
        max_ticks
    }

    /// The whole grid as last drawn.
    pub fn export_image_view(&self) -> RgbaImage {
        self.compositor.export_image_view()
    }

    /// Draws a frame's preview raster in the preview domain.
    pub fn render_preview(&mut self, frame: FrameId) -> Result<RgbaImage, ViewerError> {
        let image = render_preview(
            self.domains.get_mut(RenderDomain::Preview),
            &self.arena,
            frame,
            self.compositor.config(),
        )?;
        Ok(image)
    }

    /// Render size of every frame: the panel image area in logical pixels.
    fn render_size(&self) -> (u32, u32) {
        let (width, height) = self.compositor.image_area();
        let ratio = self.config.pixel_ratio;
        let logical = |device: u32| ((f64::from(device) / ratio).round() as u32).max(1);
        (logical(width), logical(height))
    }

    fn assign(&mut self, panel: usize, content: PanelContent) -> Result<(), ViewerError> {
        let frames: Vec<FrameId> = match content {
            PanelContent::Frame(frame) => vec![frame],
            PanelContent::ColorBlending(index) => self
                .stores
                .get(index)
                .ok_or(ViewerError::UnknownStore(index))?
                .frames()
                .collect(),
        };
        self.scheduler
            .assign_panel(panel, frames)
            .map_err(|_| ViewerError::InvalidPanel(panel))?;
        self.panels[panel] = Some(content);
        Ok(())
    }

    fn blank_panel(&mut self, index: usize) {
        self.panels[index] = None;
        self.compositor.clear_panel(index);
        self.scheduler
            .assign_panel(index, std::iter::empty())
            .expect("blanked panel is inside the grid");
    }

    fn refresh_store_panels(&mut self, store: usize) {
        for index in 0..self.panels.len() {
            if self.panels[index] == Some(PanelContent::ColorBlending(store)) {
                self.assign(index, PanelContent::ColorBlending(store))
                    .expect("store and panel were just looked up");
            }
        }
    }

    fn handle_arena_events(&mut self) {
        for event in self.arena.drain_events() {
            let mut index = 0;
            while index < self.stores.len() {
                if !self.stores[index].handle_event(&event) {
                    self.remove_store(index);
                    continue;
                }
                if let ArenaEvent::MatchedFramesChanged { base, .. } = &event {
                    if self.stores[index].base_frame() == *base {
                        self.refresh_store_panels(index);
                    }
                }
                index += 1;
            }
        }
    }

    fn remove_store(&mut self, store: usize) {
        let removed = self.stores.remove(store);
        debug!(store = removed.id(), "colour-blending store dropped");
        for index in 0..self.panels.len() {
            match self.panels[index] {
                Some(PanelContent::ColorBlending(shown)) if shown == store => {
                    self.blank_panel(index);
                }
                Some(PanelContent::ColorBlending(shown)) if shown > store => {
                    self.panels[index] = Some(PanelContent::ColorBlending(shown - 1));
                }
                _ => {}
            }
        }
    }
}
