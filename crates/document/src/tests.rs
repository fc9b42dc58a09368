use model::Point2D;
use render_protocol::ScalingType;
use view::SpatialTransform;

use super::*;

fn open(arena: &mut FrameArena, file_id: i32, size: u32) -> FrameId {
    let mut info = FileInfo::new(file_id, format!("image-{file_id}.fits"), size, size);
    info.depth = 10;
    let mut frame = Frame::new(info).unwrap();
    frame.set_render_size(size, size, 1.0).unwrap();
    arena.insert(frame)
}

#[derive(Default)]
struct RecordingBackend {
    submitted: Vec<ComputeRequest>,
    cancelled: Vec<(i32, ComputeKind)>,
}

impl ComputeBackend for RecordingBackend {
    fn submit(&mut self, request: ComputeRequest) -> Result<(), ComputeError> {
        self.submitted.push(request);
        Ok(())
    }

    fn cancel(&mut self, file_id: i32, kind: ComputeKind) {
        self.cancelled.push((file_id, kind));
    }
}

fn pv_request(file_id: i32, range: Option<ChannelRange>) -> PvRequest {
    PvRequest {
        file_id,
        region_id: 1,
        width: 3,
        spectral_range: range,
        reverse: false,
        keep: false,
    }
}

#[test]
fn self_and_unknown_references_are_rejected() {
    let mut arena = FrameArena::new();
    let a = open(&mut arena, 0, 100);
    let b = open(&mut arena, 1, 100);
    arena.close(b);

    assert_eq!(
        arena.set_spatial_reference(a, Some(a)),
        Err(ReferenceError::SelfReference(a))
    );
    assert_eq!(
        arena.set_raster_scaling_reference(a, Some(b)),
        Err(ReferenceError::UnknownFrame(b))
    );
    assert_eq!(arena.get(a).unwrap().spatial_reference(), None);
}

#[test]
fn reference_cycles_are_rejected() {
    let mut arena = FrameArena::new();
    let a = open(&mut arena, 0, 100);
    let b = open(&mut arena, 1, 100);
    let c = open(&mut arena, 2, 100);

    arena.set_spectral_reference(b, Some(a)).unwrap();
    arena.set_spectral_reference(c, Some(b)).unwrap();
    assert_eq!(
        arena.set_spectral_reference(a, Some(c)),
        Err(ReferenceError::Cycle {
            kind: ReferenceKind::Spectral,
            frame: a,
            reference: c,
        })
    );
    // Other reference kinds form their own graph.
    arena.set_spatial_reference(a, Some(c)).unwrap();
    arena.set_spectral_reference(c, None).unwrap();
    arena.set_spectral_reference(a, Some(c)).unwrap();
}

#[test]
fn changes_reach_dependents_transitively() {
    let mut arena = FrameArena::new();
    let a = open(&mut arena, 0, 100);
    let b = open(&mut arena, 1, 100);
    let c = open(&mut arena, 2, 100);
    let lone = open(&mut arena, 3, 100);
    arena.set_spatial_reference(b, Some(a)).unwrap();
    arena.set_raster_scaling_reference(c, Some(b)).unwrap();
    arena.drain_changes();

    arena.set_zoom(a, 2.0).unwrap();
    assert_eq!(arena.drain_changes(), vec![a, b, c]);
    assert!(arena.drain_changes().is_empty());

    arena.set_center(lone, Point2D::new(1.0, 1.0)).unwrap();
    assert_eq!(arena.drain_changes(), vec![lone]);
}

#[test]
fn out_of_range_zoom_leaves_the_view_intact() {
    let mut arena = FrameArena::new();
    let base = open(&mut arena, 0, 512);
    let matched = open(&mut arena, 1, 512);
    arena.set_spatial_reference(matched, Some(base)).unwrap();
    let before = arena.required_view(matched).unwrap();

    assert_eq!(
        arena.set_zoom(base, 1e-308),
        Err(ArenaError::Frame(FrameError::InvalidZoom(1e-308)))
    );
    assert_eq!(arena.required_view(base).unwrap().mip(), 1.0);
    assert_eq!(arena.required_view(matched).unwrap(), before);

    arena.set_zoom(base, MIN_ZOOM).unwrap();
    let view = arena.required_view(matched).unwrap();
    assert!(view.width().is_finite() && view.mip().is_finite());
}

#[test]
fn matched_set_changes_emit_events() {
    let mut arena = FrameArena::new();
    let base = open(&mut arena, 0, 100);
    let first = open(&mut arena, 1, 100);
    let second = open(&mut arena, 2, 100);

    arena.set_spatial_reference(second, Some(base)).unwrap();
    arena.set_spatial_reference(first, Some(base)).unwrap();
    assert_eq!(arena.secondary_spatial_frames(base), vec![first, second]);

    let events = arena.drain_events();
    assert_eq!(
        events.last(),
        Some(&ArenaEvent::MatchedFramesChanged {
            base,
            matched: vec![first, second],
        })
    );

    arena.set_spatial_reference(second, None).unwrap();
    assert_eq!(
        arena.drain_events(),
        vec![ArenaEvent::MatchedFramesChanged {
            base,
            matched: vec![first],
        }]
    );
}

#[test]
fn closing_a_frame_clears_references_to_it() {
    let mut arena = FrameArena::new();
    let base = open(&mut arena, 0, 100);
    let matched = open(&mut arena, 1, 100);
    arena.set_spatial_reference(matched, Some(base)).unwrap();
    arena.set_raster_scaling_reference(matched, Some(base)).unwrap();
    arena.drain_events();
    arena.drain_changes();

    assert!(arena.close(base).is_some());
    let frame = arena.get(matched).unwrap();
    assert_eq!(frame.spatial_reference(), None);
    assert_eq!(frame.raster_scaling_reference(), None);
    assert_eq!(arena.drain_changes(), vec![matched]);
    assert_eq!(
        arena.drain_events(),
        vec![
            ArenaEvent::MatchedFramesChanged {
                base,
                matched: Vec::new(),
            },
            ArenaEvent::FrameClosed(base),
        ]
    );
    assert!(arena.close(base).is_none());
}

#[test]
fn matched_frame_follows_reference_view() {
    let mut arena = FrameArena::new();
    let base = open(&mut arena, 0, 100);
    let matched = open(&mut arena, 1, 100);
    arena.set_spatial_reference(matched, Some(base)).unwrap();

    let reference_view = arena.required_view(base).unwrap();
    assert_eq!(arena.required_view(matched), Some(reference_view));

    let shifted = SpatialTransform::new(Point2D::new(10.0, -5.0), Point2D::default(), 0.0, 1.0)
        .unwrap();
    arena
        .update(matched, |frame| frame.set_spatial_transform(Some(shifted)))
        .unwrap();
    let view = arena.required_view(matched).unwrap();
    assert!((view.x_min() - (reference_view.x_min() - 10.0)).abs() < 1e-9);
    assert!((view.y_min() - (reference_view.y_min() + 5.0)).abs() < 1e-9);

    let doubled = SpatialTransform::new(Point2D::default(), Point2D::default(), 0.0, 2.0).unwrap();
    arena
        .update(matched, |frame| frame.set_spatial_transform(Some(doubled)))
        .unwrap();
    let view = arena.required_view(matched).unwrap();
    assert!((view.width() - reference_view.width() / 2.0).abs() < 1e-9);
    assert_eq!(view.mip(), reference_view.mip() / 2.0);
}

#[test]
fn rotated_match_covers_bounding_box() {
    let mut arena = FrameArena::new();
    let base = open(&mut arena, 0, 100);
    let matched = open(&mut arena, 1, 100);
    arena.set_spatial_reference(matched, Some(base)).unwrap();
    let rotated = SpatialTransform::new(
        Point2D::default(),
        Point2D::new(49.5, 49.5),
        std::f64::consts::FRAC_PI_4,
        1.0,
    )
    .unwrap();
    arena
        .update(matched, |frame| frame.set_spatial_transform(Some(rotated)))
        .unwrap();
    let view = arena.required_view(matched).unwrap();
    let diagonal = 100.0 * std::f64::consts::SQRT_2;
    assert!((view.width() - diagonal).abs() < 1e-9);
    assert!((view.height() - diagonal).abs() < 1e-9);
}

#[test]
fn spectral_matching_propagates_channel() {
    let mut arena = FrameArena::new();
    let base = open(&mut arena, 0, 100);
    let mut shallow_info = FileInfo::new(1, "shallow.fits", 100, 100);
    shallow_info.depth = 4;
    let shallow = arena.insert(Frame::new(shallow_info).unwrap());
    let chained = open(&mut arena, 2, 100);

    arena.set_spectral_reference(shallow, Some(base)).unwrap();
    arena.set_spectral_reference(chained, Some(shallow)).unwrap();
    arena.set_channel(base, 7, 0).unwrap();

    assert_eq!(arena.get(base).unwrap().channel(), 7);
    assert_eq!(arena.get(shallow).unwrap().channel(), 3);
    assert_eq!(arena.get(chained).unwrap().channel(), 7);
}

#[test]
fn raster_scaling_reference_shares_value_mapping() {
    let mut arena = FrameArena::new();
    let base = open(&mut arena, 0, 100);
    let matched = open(&mut arena, 1, 100);
    arena
        .update(base, |frame| {
            let config = frame.render_config_mut();
            config.set_scaling(ScalingType::Gamma);
            config.set_scale_limits(-1.0, 5.0).unwrap();
            config.set_colormap("heat").unwrap();
        })
        .unwrap();
    arena
        .update(matched, |frame| frame.render_config_mut().set_colormap("Blue"))
        .unwrap()
        .unwrap();
    arena.set_raster_scaling_reference(matched, Some(base)).unwrap();

    let effective = arena.effective_render_config(matched).unwrap();
    assert_eq!(effective.scaling(), ScalingType::Gamma);
    assert_eq!(effective.scale_max(), 5.0);
    assert_eq!(effective.colormap(), "Blue");
    assert_eq!(
        arena.get(matched).unwrap().render_config().scaling(),
        ScalingType::Linear
    );
}

#[test]
fn pv_request_normalises_spectral_range() {
    let mut arena = FrameArena::new();
    let frame = open(&mut arena, 5, 100);
    let mut backend = RecordingBackend::default();

    arena
        .request_pv(
            frame,
            pv_request(5, Some(ChannelRange::new(6, 2))),
            &mut backend,
        )
        .unwrap();
    let ComputeRequest::Pv(sent) = &backend.submitted[0] else {
        panic!("expected a PV request");
    };
    assert_eq!(sent.spectral_range, Some(ChannelRange::new(2, 6)));
    assert_eq!(
        arena.get(frame).unwrap().compute().state(ComputeKind::Pv),
        ComputeState::Running { progress: 0.0 }
    );
    assert_eq!(
        arena.request_pv(frame, pv_request(5, None), &mut backend),
        Err(ComputeError::Busy(ComputeKind::Pv))
    );
}

#[test]
fn moment_request_needs_moments() {
    let mut arena = FrameArena::new();
    let frame = open(&mut arena, 5, 100);
    let mut backend = RecordingBackend::default();
    let request = MomentRequest {
        file_id: 5,
        region_id: 0,
        moments: Vec::new(),
        spectral_range: ChannelRange::new(0, 9),
        mask: MomentMask::None,
        keep: false,
    };
    assert_eq!(
        arena.request_moments(frame, request.clone(), &mut backend),
        Err(ComputeError::EmptyMomentList)
    );
    let request = MomentRequest {
        moments: vec![Moment::Integrated, Moment::Max],
        ..request
    };
    arena.request_moments(frame, request, &mut backend).unwrap();
    assert_eq!(backend.submitted.len(), 1);
}

#[test]
fn cancelling_persists_until_terminal_event() {
    let mut arena = FrameArena::new();
    let frame = open(&mut arena, 5, 100);
    let mut backend = RecordingBackend::default();
    arena
        .request_pv(frame, pv_request(5, None), &mut backend)
        .unwrap();
    arena
        .cancel_compute(frame, ComputeKind::Pv, &mut backend)
        .unwrap();
    assert_eq!(backend.cancelled, vec![(5, ComputeKind::Pv)]);

    arena
        .apply_compute_event(&ComputeEvent::Progress {
            file_id: 5,
            kind: ComputeKind::Pv,
            progress: 0.75,
        })
        .unwrap();
    let state = arena.get(frame).unwrap().compute().state(ComputeKind::Pv);
    assert_eq!(state, ComputeState::Cancelling { progress: 0.75 });

    arena
        .apply_compute_event(&ComputeEvent::Cancelled {
            file_id: 5,
            kind: ComputeKind::Pv,
        })
        .unwrap();
    let slot = arena.get(frame).unwrap().compute().slot(ComputeKind::Pv).clone();
    assert_eq!(slot.state(), ComputeState::Idle);
    assert_eq!(slot.last_outcome(), Some(&ComputeOutcome::Cancelled));
}

#[test]
fn compute_failure_only_touches_its_frame() {
    let mut arena = FrameArena::new();
    let failing = open(&mut arena, 5, 100);
    let other = open(&mut arena, 6, 100);
    let mut backend = RecordingBackend::default();
    arena
        .request_pv(failing, pv_request(5, None), &mut backend)
        .unwrap();
    arena
        .request_pv(other, pv_request(6, None), &mut backend)
        .unwrap();

    arena
        .apply_compute_event(&ComputeEvent::Failed {
            file_id: 5,
            kind: ComputeKind::Pv,
            message: "region outside image".to_string(),
        })
        .unwrap();
    assert_eq!(
        arena.get(failing).unwrap().error_message(),
        Some("region outside image")
    );
    assert_eq!(arena.get(other).unwrap().error_message(), None);
    assert_eq!(
        arena.get(other).unwrap().compute().state(ComputeKind::Pv),
        ComputeState::Running { progress: 0.0 }
    );
}

#[test]
fn request_for_another_file_is_rejected() {
    let mut arena = FrameArena::new();
    let frame = open(&mut arena, 5, 100);
    let mut backend = RecordingBackend::default();
    assert_eq!(
        arena.request_pv(frame, pv_request(9, None), &mut backend),
        Err(ComputeError::FileMismatch {
            expected: 5,
            actual: 9,
        })
    );
    assert!(backend.submitted.is_empty());
}
