use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use astroview::synthetic::{Pattern, SyntheticImage, channel_transport, spawn_synthetic_backend};
use astroview::{ImageViewer, ViewerConfig};
use clap::{Parser, ValueEnum};
use compositor::ColorbarOverlay;
use model::Point2D;
use renderer::{RenderBackend, SoftwareBackend, WgpuBackend};
use tracing::info;
use tracing_subscriber::EnvFilter;
use view::SpatialTransform;

const TILE_WAIT: Duration = Duration::from_millis(50);
const PREVIEW_EDGE: u32 = 128;

#[derive(Parser)]
#[command(author, version, about = "Render a synthetic image grid to PNG")]
struct Arguments {
    /// JSON viewer configuration.
    #[arg(long, short = 'c', value_parser)]
    config: Option<PathBuf>,
    /// PNG written with the composed grid.
    #[arg(long, short = 'o', value_parser, default_value = "astroview.png")]
    output: PathBuf,
    /// PNG written with the preview raster of the first image.
    #[arg(long, value_parser)]
    preview: Option<PathBuf>,
    #[arg(long)]
    columns: Option<u32>,
    #[arg(long)]
    rows: Option<u32>,
    /// Edge length of the synthetic images in pixels.
    #[arg(long, default_value_t = 2048)]
    image_size: u32,
    #[arg(long, value_enum, default_value = "software")]
    backend: BackendKind,
    /// Ticks before giving up on outstanding tiles.
    #[arg(long, default_value_t = 500)]
    max_ticks: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum BackendKind {
    Software,
    Wgpu,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let arguments = Arguments::parse();

    let mut config = match &arguments.config {
        Some(path) => ViewerConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ViewerConfig {
            grid_columns: 2,
            grid_rows: 2,
            ..ViewerConfig::default()
        },
    };
    if let Some(columns) = arguments.columns {
        config.grid_columns = columns;
    }
    if let Some(rows) = arguments.rows {
        config.grid_rows = rows;
    }
    let layout = config.grid_layout().context("panel grid")?;

    let main_backend = create_backend(
        arguments.backend,
        layout.canvas_width(),
        layout.canvas_height(),
        &config,
    )?;
    let preview_backend = create_backend(arguments.backend, PREVIEW_EDGE, PREVIEW_EDGE, &config)?;

    let size = arguments.image_size;
    let center = f64::from(size) * 0.5;
    let images = vec![
        SyntheticImage::new(
            1,
            "source.fits",
            size,
            size,
            Pattern::Gaussian {
                x: center,
                y: center,
                sigma: f64::from(size) / 8.0,
                peak: 0.9,
            },
        ),
        SyntheticImage::new(2, "ramp.fits", size, size, Pattern::Gradient),
        SyntheticImage::new(
            3,
            "rings.fits",
            size,
            size,
            Pattern::Rings {
                wavelength: f64::from(size) / 10.0,
            },
        ),
    ];

    let (transport, requests) = channel_transport();
    let (mut viewer, responses) =
        ImageViewer::new(config, Box::new(transport), main_backend, preview_backend)
            .context("create viewer")?;
    let worker = spawn_synthetic_backend(images.clone(), requests, responses);
    viewer.add_overlay(Box::new(ColorbarOverlay));

    let mut frames = Vec::with_capacity(images.len());
    for image in &images {
        frames.push(
            viewer
                .open_frame(image.file_info())
                .with_context(|| format!("open {}", image.name))?,
        );
    }
    let rotated = SpatialTransform::new(
        Point2D::new(f64::from(size) * 0.05, 0.0),
        Point2D::new(center, center),
        0.3,
        1.2,
    )
    .context("matching transform")?;
    viewer
        .arena_mut()
        .update(frames[2], |frame| frame.set_spatial_transform(Some(rotated)))?;
    for matched in &frames[1..] {
        viewer
            .arena_mut()
            .set_spatial_reference(*matched, Some(frames[0]))?;
    }

    let panel_count = viewer.layout().panel_count();
    for (panel, frame) in frames.iter().enumerate().take(panel_count) {
        viewer.show_frame(panel, *frame)?;
    }
    if panel_count > frames.len() {
        let store = viewer.show_color_blending(frames.len(), frames[0])?;
        viewer.update_store(store, |store, arena| store.apply_colormap_set("RGB", arena))??;
    }

    let ticks = viewer.settle(arguments.max_ticks, TILE_WAIT);
    let stats = viewer.cache_stats();
    info!(
        ticks,
        cached = stats.cached_tiles,
        uploaded = stats.uploaded_tiles,
        pending = viewer.pending_tiles(),
        "scene settled"
    );

    let image = viewer.export_image_view();
    image
        .save(&arguments.output)
        .with_context(|| format!("write {}", arguments.output.display()))?;
    info!(path = %arguments.output.display(), "image view exported");

    if let Some(path) = &arguments.preview {
        let raster = images[0]
            .preview(PREVIEW_EDGE, PREVIEW_EDGE)
            .context("preview raster")?;
        viewer
            .arena_mut()
            .update(frames[0], |frame| frame.set_preview(Some(raster)))?;
        let preview = viewer.render_preview(frames[0]).context("render preview")?;
        preview
            .save(path)
            .with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), "preview exported");
    }

    drop(viewer);
    worker
        .join()
        .map_err(|_| anyhow::anyhow!("synthetic backend panicked"))?;
    Ok(())
}

fn create_backend(
    kind: BackendKind,
    width: u32,
    height: u32,
    config: &ViewerConfig,
) -> Result<Box<dyn RenderBackend>> {
    Ok(match kind {
        BackendKind::Software => Box::new(SoftwareBackend::new(width, height)),
        BackendKind::Wgpu => Box::new(
            WgpuBackend::new_headless(width, height, config.tile_cache_config().tier.layout())
                .context("create wgpu backend")?,
        ),
    })
}
