use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use compositor::{ColorbarConfig, Padding, PanelContent};
use model::{Point2D, TileCoordinate};
use render_protocol::GridLayout;
use renderer::SoftwareBackend;
use tile_stream::{TileRequest, TileResponseSender, TileTransport, TransportError};

use crate::synthetic::{Pattern, SyntheticImage, channel_transport, spawn_synthetic_backend};
use crate::{ImageViewer, ViewerConfig};

#[derive(Clone, Default)]
struct RecordingTransport {
    requests: Arc<Mutex<Vec<TileRequest>>>,
    down: Arc<AtomicBool>,
}

impl TileTransport for RecordingTransport {
    fn send_tile_request(&mut self, request: TileRequest) -> Result<(), TransportError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

fn config(columns: u32, rows: u32, edge: u32) -> ViewerConfig {
    ViewerConfig {
        grid_columns: columns,
        grid_rows: rows,
        panel_width: edge,
        panel_height: edge,
        padding: Padding::default(),
        colorbar: ColorbarConfig {
            visible: false,
            ..ColorbarConfig::default()
        },
        ..ViewerConfig::default()
    }
}

fn viewer(config: ViewerConfig) -> (ImageViewer, TileResponseSender, RecordingTransport) {
    let transport = RecordingTransport::default();
    let layout = config.grid_layout().unwrap();
    let (viewer, responses) = ImageViewer::new(
        config,
        Box::new(transport.clone()),
        Box::new(SoftwareBackend::new(
            layout.canvas_width(),
            layout.canvas_height(),
        )),
        Box::new(SoftwareBackend::new(1, 1)),
    )
    .unwrap();
    (viewer, responses, transport)
}

fn ramp(file_id: i32) -> SyntheticImage {
    SyntheticImage::new(file_id, "ramp.fits", 256, 256, Pattern::Gradient)
}

#[test]
fn missing_tiles_are_requested_and_drawn_on_arrival() {
    let (mut viewer, mut responses, transport) = viewer(config(1, 1, 64));
    let image = ramp(5);
    let frame = viewer.open_frame(image.file_info()).unwrap();
    viewer.show_frame(0, frame).unwrap();

    let first = viewer.tick();
    assert_eq!(first.panels.len(), 1);
    assert_eq!(first.panels[0].missing[0].tiles, vec![TileCoordinate::ROOT]);
    assert_eq!(first.requested_tiles, 1);
    {
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].file_id, 5);
        assert_eq!(requests[0].tiles, vec![TileCoordinate::ROOT.encode()]);
    }

    // Still in flight: nothing to redraw, nothing asked twice.
    assert!(viewer.tick().is_idle());
    assert_eq!(viewer.pending_tiles(), 1);

    responses.push(image.tile(TileCoordinate::ROOT)).unwrap();
    let second = viewer.tick();
    assert_eq!(second.merged_tiles, 1);
    assert_eq!(second.panels[0].drawn, 1);
    assert!(second.panels[0].missing.is_empty());
    assert_eq!(second.requested_tiles, 0);
    assert!(viewer.tick().is_idle());

    let view = viewer.export_image_view();
    assert!(view.get_pixel(0, 32)[0] < 10);
    assert!(view.get_pixel(63, 32)[0] > 240);
}

#[test]
fn failed_requests_are_retried_on_the_next_tick() {
    let (mut viewer, _responses, transport) = viewer(config(1, 1, 64));
    let frame = viewer.open_frame(ramp(5).file_info()).unwrap();
    viewer.show_frame(0, frame).unwrap();
    transport.down.store(true, Ordering::SeqCst);

    let first = viewer.tick();
    assert_eq!(first.panels.len(), 1);
    assert_eq!(first.requested_tiles, 0);
    assert_eq!(viewer.pending_tiles(), 0);

    let second = viewer.tick();
    assert_eq!(second.panels.len(), 1);
    assert_eq!(second.requested_tiles, 0);

    transport.down.store(false, Ordering::SeqCst);
    let third = viewer.tick();
    assert_eq!(third.panels.len(), 1);
    assert_eq!(third.requested_tiles, 1);
    assert_eq!(transport.requests.lock().unwrap().len(), 1);
    assert!(viewer.tick().is_idle());
}

#[test]
fn lost_responses_are_requested_again() {
    let mut settings = config(1, 1, 64);
    settings.pending_tile_timeout_ticks = 2;
    let (mut viewer, _responses, transport) = viewer(settings);
    let frame = viewer.open_frame(ramp(5).file_info()).unwrap();
    viewer.show_frame(0, frame).unwrap();

    assert_eq!(viewer.tick().requested_tiles, 1);
    assert!(viewer.tick().is_idle());
    assert_eq!(viewer.pending_tiles(), 1);

    let retry = viewer.tick();
    assert_eq!(retry.panels.len(), 1);
    assert_eq!(retry.requested_tiles, 1);
    assert_eq!(transport.requests.lock().unwrap().len(), 2);
}

#[test]
fn frame_changes_redraw_only_their_panels() {
    let (mut viewer, _responses, _transport) = viewer(config(2, 1, 32));
    let left = viewer.open_frame(ramp(1).file_info()).unwrap();
    let right = viewer.open_frame(ramp(2).file_info()).unwrap();
    viewer.show_frame(0, left).unwrap();
    viewer.show_frame(1, right).unwrap();
    assert_eq!(viewer.tick().panels.len(), 2);
    assert!(viewer.tick().is_idle());

    viewer.arena_mut().set_zoom(right, 2.0).unwrap();
    let report = viewer.tick();
    assert_eq!(report.panels.len(), 1);
    assert_eq!(report.panels[0].index, 1);
}

#[test]
fn matched_frames_redraw_with_their_reference() {
    let (mut viewer, _responses, _transport) = viewer(config(2, 1, 32));
    let base = viewer.open_frame(ramp(1).file_info()).unwrap();
    let matched = viewer.open_frame(ramp(2).file_info()).unwrap();
    viewer
        .arena_mut()
        .set_spatial_reference(matched, Some(base))
        .unwrap();
    viewer.show_frame(0, base).unwrap();
    viewer.show_frame(1, matched).unwrap();
    viewer.tick();

    viewer
        .arena_mut()
        .set_center(base, Point2D::new(40.0, 100.0))
        .unwrap();
    let report = viewer.tick();
    let mut panels: Vec<usize> = report.panels.iter().map(|panel| panel.index).collect();
    panels.sort_unstable();
    assert_eq!(panels, vec![0, 1]);
}

#[test]
fn closing_a_frame_blanks_its_panel_and_releases_tiles() {
    let mut settings = config(1, 1, 16);
    settings.background = render_protocol::Color::rgb(0, 0, 80);
    let (mut viewer, mut responses, _transport) = viewer(settings);
    let image = ramp(9);
    let frame = viewer.open_frame(image.file_info()).unwrap();
    viewer.show_frame(0, frame).unwrap();
    viewer.tick();
    responses.push(image.tile(TileCoordinate::ROOT)).unwrap();
    viewer.tick();
    assert_eq!(viewer.cache_stats().cached_tiles, 1);

    viewer.close_frame(frame).unwrap();
    assert_eq!(viewer.panel_content(0), None);
    assert_eq!(viewer.cache_stats().cached_tiles, 0);
    assert_eq!(viewer.pending_tiles(), 0);
    viewer.tick();
    assert_eq!(viewer.export_image_view().get_pixel(8, 8).0, [0, 0, 80, 255]);
    assert!(viewer.close_frame(frame).is_err());
}

#[test]
fn blending_store_tracks_its_frames() {
    let (mut viewer, _responses, _transport) = viewer(config(1, 1, 32));
    let base = viewer.open_frame(ramp(1).file_info()).unwrap();
    let matched = viewer.open_frame(ramp(2).file_info()).unwrap();
    viewer
        .arena_mut()
        .set_spatial_reference(matched, Some(base))
        .unwrap();
    let store = viewer.show_color_blending(0, base).unwrap();
    assert_eq!(viewer.store(store).unwrap().selected_frames(), &[matched]);
    viewer.tick();

    viewer.arena_mut().set_spatial_reference(matched, None).unwrap();
    let report = viewer.tick();
    assert_eq!(report.panels.len(), 1);
    let store_state = viewer.store(store).unwrap();
    assert!(store_state.selected_frames().is_empty());
    assert_eq!(store_state.alpha().len(), 1);

    viewer
        .update_store(store, |store, _| store.set_alpha(0, 0.5))
        .unwrap()
        .unwrap();
    assert_eq!(viewer.tick().panels.len(), 1);

    viewer.close_frame(base).unwrap();
    viewer.tick();
    assert!(viewer.store(store).is_none());
    assert_eq!(viewer.panel_content(0), None);
}

#[test]
fn layout_change_resizes_every_frame() {
    let (mut viewer, _responses, _transport) = viewer(config(1, 1, 64));
    let frame = viewer.open_frame(ramp(1).file_info()).unwrap();
    viewer.show_frame(0, frame).unwrap();
    viewer.tick();

    viewer
        .set_layout(GridLayout::new(2, 1, 128, 96).unwrap())
        .unwrap();
    assert_eq!(viewer.arena().get(frame).unwrap().render_size(), (128, 96));
    assert_eq!(viewer.panel_content(0), Some(PanelContent::Frame(frame)));
    assert_eq!(viewer.panel_content(1), None);
    let report = viewer.tick();
    assert_eq!(report.panels.len(), 1);
    assert_eq!(viewer.export_image_view().dimensions(), (256, 96));
}

#[test]
fn synthetic_backend_fills_the_view() {
    let (transport, requests) = channel_transport();
    let settings = config(1, 1, 128);
    let (mut viewer, responses) = ImageViewer::new(
        settings,
        Box::new(transport),
        Box::new(SoftwareBackend::new(128, 128)),
        Box::new(SoftwareBackend::new(1, 1)),
    )
    .unwrap();
    let image = SyntheticImage::new(
        1,
        "source.fits",
        1024,
        1024,
        Pattern::Gaussian {
            x: 512.0,
            y: 512.0,
            sigma: 200.0,
            peak: 0.9,
        },
    );
    let worker = spawn_synthetic_backend(vec![image.clone()], requests, responses);
    let frame = viewer.open_frame(image.file_info()).unwrap();
    viewer.show_frame(0, frame).unwrap();

    viewer.settle(400, Duration::from_millis(20));
    assert_eq!(viewer.pending_tiles(), 0);
    assert!(viewer.cache_stats().cached_tiles > 0);
    let view = viewer.export_image_view();
    assert!(view.get_pixel(64, 64)[0] > 200);
    assert!(view.get_pixel(0, 0)[0] < view.get_pixel(64, 64)[0]);

    drop(viewer);
    worker.join().unwrap();
}
