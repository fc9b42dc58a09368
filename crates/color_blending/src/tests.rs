use document::{FileInfo, Frame};
use proptest::prelude::*;
use render_protocol::{CustomGradient, colormap_lut};

use super::*;

struct Scene {
    arena: FrameArena,
    base: FrameId,
    frames: Vec<FrameId>,
}

/// Base frame plus `count` other frames, the first `matched` of them
/// spatially matched to the base.
fn scene(count: usize, matched: usize) -> Scene {
    let mut arena = FrameArena::new();
    let mut open = |file_id: i32| {
        let info = FileInfo::new(file_id, format!("f{file_id}.fits"), 64, 64);
        arena.insert(Frame::new(info).unwrap())
    };
    let base = open(0);
    let frames: Vec<FrameId> = (1..=count as i32).map(&mut open).collect();
    for frame in &frames[..matched] {
        arena.set_spatial_reference(*frame, Some(base)).unwrap();
    }
    Scene {
        arena,
        base,
        frames,
    }
}

fn colormap(arena: &FrameArena, frame: FrameId) -> String {
    arena
        .get(frame)
        .unwrap()
        .render_config()
        .colormap()
        .to_string()
}

#[test]
fn new_store_selects_matched_frames() {
    let Scene {
        arena,
        base,
        frames,
    } = scene(2, 2);
    let store = ColorBlendingStore::from_arena(0, base, &arena);
    assert_eq!(store.filename(), "Color Blending 1");
    assert_eq!(store.title(), "Color Blending 1");
    assert_eq!(store.selected_frames(), frames.as_slice());
    assert_eq!(store.alpha(), &[1.0, 1.0, 1.0]);
    assert!(store.raster_visible() && store.contour_visible() && store.vector_overlay_visible());
}

#[test]
fn initial_selection_respects_layer_limit() {
    let Scene { arena, base, .. } = scene(12, 12);
    let store = ColorBlendingStore::from_arena(3, base, &arena);
    assert_eq!(store.selected_frames().len(), DEFAULT_LAYER_LIMIT - 1);
    assert_eq!(store.alpha().len(), DEFAULT_LAYER_LIMIT);
    assert_eq!(store.filename(), "Color Blending 4");
}

#[test]
fn adding_an_unmatched_frame_is_a_no_op() {
    let Scene { base, frames, .. } = scene(4, 2);
    let mut store = ColorBlendingStore::new(0, base, frames[..2].to_vec());
    assert_eq!(
        store.add_selected_frame(frames[3]),
        Err(ColorBlendingError::FrameNotMatched(frames[3]))
    );
    assert_eq!(store.selected_frames(), &frames[..2]);
    assert_eq!(store.alpha().len(), 3);
}

#[test]
fn adding_a_selected_frame_is_rejected() {
    let Scene { base, frames, .. } = scene(2, 2);
    let mut store = ColorBlendingStore::new(0, base, frames.clone());
    let err = store.add_selected_frame(frames[0]).unwrap_err();
    assert_eq!(err.to_string(), "The selected frame is selected in other layers.");
}

#[test]
fn adding_a_matched_frame_appends_layer() {
    let Scene { base, frames, .. } = scene(3, 3);
    let mut store = ColorBlendingStore::new(0, base, frames[..2].to_vec());
    store.sync_matched_frames(&frames);
    store.add_selected_frame(frames[2]).unwrap();
    assert_eq!(store.selected_frames(), frames.as_slice());
    assert_eq!(store.alpha(), &[1.0; 4]);
}

#[test]
fn setting_a_layer_to_another_layers_frame_is_rejected() {
    let Scene { base, frames, .. } = scene(2, 2);
    let mut store = ColorBlendingStore::new(0, base, frames.clone());
    assert_eq!(
        store.set_selected_frame(1, frames[0]),
        Err(ColorBlendingError::FrameAlreadySelected(frames[0]))
    );
    assert_eq!(store.selected_frames()[1], frames[1]);
}

#[test]
fn setting_a_layer_checks_index() {
    let Scene { base, frames, .. } = scene(3, 3);
    let mut store = ColorBlendingStore::new(0, base, frames.clone());
    store.delete_selected_frame(2).unwrap();
    assert_eq!(
        store.set_selected_frame(2, frames[2]),
        Err(ColorBlendingError::InvalidLayerIndex(2))
    );
    store.set_selected_frame(0, frames[2]).unwrap();
    assert_eq!(store.selected_frames(), &[frames[2], frames[1]]);
}

#[test]
fn alpha_is_validated_over_all_layers() {
    let Scene { base, frames, .. } = scene(1, 1);
    let mut store = ColorBlendingStore::new(0, base, frames);
    store.set_alpha(0, 0.5).unwrap();
    store.set_alpha(1, 0.0).unwrap();
    assert_eq!(
        store.set_alpha(1, 1.5),
        Err(ColorBlendingError::InvalidAlpha(1.5))
    );
    assert_eq!(
        store.set_alpha(2, 0.5),
        Err(ColorBlendingError::InvalidLayerIndex(2))
    );
    assert_eq!(store.alpha(), &[0.5, 0.0]);
}

#[test]
fn deleting_a_layer_drops_its_alpha() {
    let Scene { base, frames, .. } = scene(2, 2);
    let mut store = ColorBlendingStore::new(0, base, frames.clone());
    store.set_alpha(2, 0.2).unwrap();
    store.delete_selected_frame(0).unwrap();
    assert_eq!(store.selected_frames(), &[frames[1]]);
    assert_eq!(store.alpha(), &[1.0, 0.2]);
    assert_eq!(
        store.delete_selected_frame(1),
        Err(ColorBlendingError::InvalidLayerIndex(1))
    );
}

#[test]
fn unmatched_frames_are_removed_on_sync() {
    let Scene {
        mut arena,
        base,
        frames,
    } = scene(3, 2);
    let mut store = ColorBlendingStore::from_arena(0, base, &arena);
    store.set_alpha(1, 0.3).unwrap();

    arena.drain_events();
    arena.set_spatial_reference(frames[1], None).unwrap();
    arena.set_spatial_reference(frames[2], Some(base)).unwrap();
    for event in arena.drain_events() {
        assert!(store.handle_event(&event));
    }

    assert_eq!(store.selected_frames(), &[frames[0]]);
    assert_eq!(store.alpha(), &[1.0, 0.3]);
}

#[test]
fn closing_the_base_frame_retires_the_store() {
    let Scene {
        mut arena,
        base,
        frames,
    } = scene(1, 1);
    let mut store = ColorBlendingStore::from_arena(0, base, &arena);
    arena.drain_events();
    arena.close(base);
    let alive = arena
        .drain_events()
        .iter()
        .fold(true, |alive, event| store.handle_event(event) && alive);
    assert!(!alive);
    assert!(store.selected_frames().is_empty());
    assert!(!store.contains_frame(frames[0]));
}

#[test]
fn rgb_set_spreads_collection_over_layers() {
    let Scene {
        mut arena,
        base,
        frames,
    } = scene(2, 2);
    let store = ColorBlendingStore::from_arena(0, base, &arena);
    store.apply_colormap_set("RGB", &mut arena).unwrap();
    assert_eq!(colormap(&arena, base), "Red");
    assert_eq!(colormap(&arena, frames[0]), "Green");
    assert_eq!(colormap(&arena, frames[1]), "Blue");
}

#[test]
fn cmy_set_with_two_layers_uses_both_ends() {
    let Scene {
        mut arena,
        base,
        frames,
    } = scene(1, 1);
    let store = ColorBlendingStore::from_arena(0, base, &arena);
    store.apply_colormap_set("CMY", &mut arena).unwrap();
    assert_eq!(colormap(&arena, base), "Magenta");
    assert_eq!(colormap(&arena, frames[0]), "Cyan");
}

#[test]
fn rainbow_set_with_one_frame_takes_last_stop() {
    let Scene {
        mut arena, base, ..
    } = scene(0, 0);
    let store = ColorBlendingStore::from_arena(0, base, &arena);
    store.apply_colormap_set("Rainbow", &mut arena).unwrap();
    assert_eq!(colormap(&arena, base), "Red");
}

#[test]
fn rainbow_set_with_three_frames_spans_gradient() {
    let Scene {
        mut arena,
        base,
        frames,
    } = scene(2, 2);
    let store = ColorBlendingStore::from_arena(0, base, &arena);
    store.apply_colormap_set("Rainbow", &mut arena).unwrap();

    let lut = colormap_lut("rainbow", CustomGradient::default()).unwrap();
    let [r, g, b, a] = lut.entries()[128];
    let middle = arena.get(frames[0]).unwrap().render_config();
    assert_eq!(colormap(&arena, base), "Red");
    assert_eq!(middle.colormap(), CUSTOM_COLORMAP);
    assert_eq!(middle.custom_gradient().end, Color::rgba(r, g, b, a));
    assert_eq!(middle.custom_gradient().start, Color::BLACK);
    assert_eq!(colormap(&arena, frames[1]), "Violet");
}

#[test]
fn raster_scaling_matched_frames_keep_their_colormap() {
    let Scene {
        mut arena,
        base,
        frames,
    } = scene(2, 2);
    arena
        .set_raster_scaling_reference(frames[0], Some(base))
        .unwrap();
    let store = ColorBlendingStore::from_arena(0, base, &arena);
    store.apply_colormap_set("RGB", &mut arena).unwrap();
    assert_eq!(colormap(&arena, base), "Red");
    assert_eq!(colormap(&arena, frames[0]), "gray");
    assert_eq!(colormap(&arena, frames[1]), "Blue");
}

#[test]
fn unknown_colormap_set_is_rejected() {
    let Scene {
        mut arena, base, ..
    } = scene(1, 1);
    let store = ColorBlendingStore::from_arena(0, base, &arena);
    assert_eq!(
        store.apply_colormap_set("Pastel", &mut arena),
        Err(ColorBlendingError::UnknownColormapSet("Pastel".to_string()))
    );
    assert_eq!(colormap(&arena, base), "gray");
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Set(usize, usize),
    Delete(usize),
    Alpha(usize, f64),
    Sync(Vec<bool>),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..6usize).prop_map(Op::Add),
        (0..6usize, 0..6usize).prop_map(|(index, frame)| Op::Set(index, frame)),
        (0..6usize).prop_map(Op::Delete),
        (0..6usize, -0.5..1.5f64).prop_map(|(index, alpha)| Op::Alpha(index, alpha)),
        prop::collection::vec(any::<bool>(), 6).prop_map(Op::Sync),
    ]
}

proptest! {
    #[test]
    fn one_alpha_per_layer_after_any_operation(ops in prop::collection::vec(op(), 0..40)) {
        let Scene { base, frames, .. } = scene(6, 6);
        let mut store = ColorBlendingStore::new(0, base, frames[..3].to_vec());
        for op in ops {
            let _ = match op {
                Op::Add(frame) => store.add_selected_frame(frames[frame]),
                Op::Set(index, frame) => store.set_selected_frame(index, frames[frame]),
                Op::Delete(index) => store.delete_selected_frame(index),
                Op::Alpha(index, alpha) => store.set_alpha(index, alpha),
                Op::Sync(keep) => {
                    let matched: Vec<FrameId> = frames
                        .iter()
                        .zip(keep)
                        .filter_map(|(frame, keep)| keep.then_some(*frame))
                        .collect();
                    store.sync_matched_frames(&matched);
                    Ok(())
                }
            };
            prop_assert_eq!(store.alpha().len(), store.selected_frames().len() + 1);
            let mut seen = std::collections::HashSet::new();
            prop_assert!(store.frames().all(|frame| seen.insert(frame)));
        }
    }
}
