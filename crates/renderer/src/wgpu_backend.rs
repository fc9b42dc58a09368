//! Offscreen wgpu render backend.
//!
//! Raster values live in an `R32Float` texture array, one layer per atlas
//! page, read with `textureLoad`. The colormap is a 256x1 RGBA8 texture.
//! Draws are batched per panel and submitted when the panel ends or the
//! raster uniforms change, so uniform writes never reorder against draws.

use image::RgbaImage;
use render_protocol::{Color, ColormapLut, LUT_SIZE, RasterUniforms, TileUniforms, Viewport};
use tiles::atlas::AtlasLayout;
use tiles::{TileTextureParameters, TileTextureSink};
use tracing::{debug, trace};

use crate::{RenderBackend, RenderError, check_viewport};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const INITIAL_INSTANCE_CAPACITY: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PanelUniformsGpu {
    raster: RasterUniforms,
    viewport: [f32; 4],
    clear_color: [f32; 4],
}

struct PanelBatch {
    viewport: Viewport,
    clear: Option<Color>,
    uniforms: RasterUniforms,
    tiles: Vec<TileUniforms>,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    width: u32,
    height: u32,
    atlas: wgpu::Texture,
    atlas_view: wgpu::TextureView,
    colormap: wgpu::Texture,
    colormap_view: wgpu::TextureView,
    uniform_buffer: wgpu::Buffer,
    instance_buffer: wgpu::Buffer,
    instance_capacity: usize,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    clear_pipeline: wgpu::RenderPipeline,
    tile_pipeline: wgpu::RenderPipeline,
    batch: Option<PanelBatch>,
}

impl WgpuBackend {
    /// Creates its own device on the best available adapter.
    pub fn new_headless(
        width: u32,
        height: u32,
        layout: AtlasLayout,
    ) -> Result<Self, RenderError> {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|err| RenderError::AdapterUnavailable(err.to_string()))?;
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("renderer.headless"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .map_err(|err| RenderError::DeviceRequest(err.to_string()))
        })?;
        Ok(Self::new(device, queue, width, height, layout))
    }

    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        width: u32,
        height: u32,
        layout: AtlasLayout,
    ) -> Self {
        let (target, target_view) = create_target(&device, width, height);

        let atlas = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("renderer.atlas"),
            size: wgpu::Extent3d {
                width: layout.page_edge_px(),
                height: layout.page_edge_px(),
                depth_or_array_layers: layout.pages(),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let atlas_view = atlas.create_view(&wgpu::TextureViewDescriptor {
            label: Some("renderer.atlas.view"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let colormap = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("renderer.colormap"),
            size: wgpu::Extent3d {
                width: LUT_SIZE as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let colormap_view = colormap.create_view(&wgpu::TextureViewDescriptor::default());

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.panel_uniforms"),
            size: std::mem::size_of::<PanelUniformsGpu>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let instance_buffer = create_instance_buffer(&device, INITIAL_INSTANCE_CAPACITY);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("renderer.raster_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let bind_group = create_bind_group(
            &device,
            &bind_group_layout,
            &uniform_buffer,
            &instance_buffer,
            &atlas_view,
            &colormap_view,
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("renderer.raster"),
            source: wgpu::ShaderSource::Wgsl(include_str!("raster.wgsl").into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("renderer.raster_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let clear_pipeline = create_pipeline(
            &device,
            &pipeline_layout,
            &shader,
            ("vs_clear", "fs_clear"),
            "renderer.clear_pipeline",
        );
        let tile_pipeline = create_pipeline(
            &device,
            &pipeline_layout,
            &shader,
            ("vs_tile", "fs_tile"),
            "renderer.tile_pipeline",
        );

        Self {
            device,
            queue,
            target,
            target_view,
            width,
            height,
            atlas,
            atlas_view,
            colormap,
            colormap_view,
            uniform_buffer,
            instance_buffer,
            instance_capacity: INITIAL_INSTANCE_CAPACITY,
            bind_group_layout,
            bind_group,
            clear_pipeline,
            tile_pipeline,
            batch: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn ensure_instance_capacity(&mut self, required: usize) {
        if required <= self.instance_capacity {
            return;
        }
        let capacity = required.next_power_of_two();
        self.instance_buffer = create_instance_buffer(&self.device, capacity);
        self.instance_capacity = capacity;
        self.bind_group = create_bind_group(
            &self.device,
            &self.bind_group_layout,
            &self.uniform_buffer,
            &self.instance_buffer,
            &self.atlas_view,
            &self.colormap_view,
        );
        debug!(capacity, "grew tile instance buffer");
    }

    /// Submits the clear and draws collected so far for the active panel.
    fn flush(&mut self) {
        let Some(batch) = self.batch.as_ref() else {
            return;
        };
        if batch.clear.is_none() && batch.tiles.is_empty() {
            return;
        }
        let viewport = batch.viewport;
        let clear = batch.clear;
        let instance_count = batch.tiles.len();
        let uniforms = PanelUniformsGpu {
            raster: batch.uniforms,
            viewport: [viewport.width as f32, viewport.height as f32, 0.0, 0.0],
            clear_color: clear.unwrap_or(Color::TRANSPARENT).to_f32(),
        };
        let instances = bytemuck::cast_slice::<TileUniforms, u8>(&batch.tiles).to_vec();

        self.ensure_instance_capacity(instance_count);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
        if !instances.is_empty() {
            self.queue.write_buffer(&self.instance_buffer, 0, &instances);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("renderer.panel"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("renderer.panel_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_viewport(
                viewport.origin_x as f32,
                viewport.origin_y as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            pass.set_scissor_rect(
                viewport.origin_x,
                viewport.origin_y,
                viewport.width,
                viewport.height,
            );
            pass.set_bind_group(0, &self.bind_group, &[]);
            if clear.is_some() {
                pass.set_pipeline(&self.clear_pipeline);
                pass.draw(0..3, 0..1);
            }
            if instance_count > 0 {
                pass.set_pipeline(&self.tile_pipeline);
                pass.draw(0..6, 0..instance_count as u32);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        trace!(?viewport, instance_count, "submitted panel batch");

        let batch = self.batch.as_mut().expect("batch checked above");
        batch.clear = None;
        batch.tiles.clear();
    }

    fn write_colormap(&self, colormap: &ColormapLut) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.colormap,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            colormap.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(LUT_SIZE as u32 * 4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: LUT_SIZE as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl TileTextureSink for WgpuBackend {
    fn upload_tile(
        &mut self,
        parameters: TileTextureParameters,
        width: u32,
        height: u32,
        data: &[f32],
    ) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.atlas,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: parameters.offset_x,
                    y: parameters.offset_y,
                    z: parameters.page,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl RenderBackend for WgpuBackend {
    fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn texture_sink(&mut self) -> &mut dyn TileTextureSink {
        self
    }

    fn resize_canvas(&mut self, width: u32, height: u32) {
        let (target, target_view) = create_target(&self.device, width, height);
        self.target = target;
        self.target_view = target_view;
        self.width = width;
        self.height = height;
    }

    fn begin_panel(&mut self, viewport: Viewport, clear: Option<Color>) -> Result<(), RenderError> {
        if self.batch.is_some() {
            return Err(RenderError::PanelAlreadyActive);
        }
        check_viewport(viewport, self.width, self.height)?;
        self.batch = Some(PanelBatch {
            viewport,
            clear,
            uniforms: RasterUniforms::default(),
            tiles: Vec::new(),
        });
        Ok(())
    }

    fn set_raster_uniforms(
        &mut self,
        uniforms: &RasterUniforms,
        colormap: &ColormapLut,
    ) -> Result<(), RenderError> {
        if self.batch.is_none() {
            return Err(RenderError::NoActivePanel);
        }
        self.flush();
        self.write_colormap(colormap);
        let batch = self.batch.as_mut().expect("batch checked above");
        batch.uniforms = *uniforms;
        Ok(())
    }

    fn draw_tile(&mut self, tile: &TileUniforms) -> Result<(), RenderError> {
        let batch = self.batch.as_mut().ok_or(RenderError::NoActivePanel)?;
        batch.tiles.push(*tile);
        Ok(())
    }

    fn end_panel(&mut self) -> Result<(), RenderError> {
        if self.batch.is_none() {
            return Err(RenderError::NoActivePanel);
        }
        self.flush();
        self.batch = None;
        Ok(())
    }

    fn read_region(&mut self, region: Viewport) -> Result<RgbaImage, RenderError> {
        if self.batch.is_some() {
            return Err(RenderError::PanelAlreadyActive);
        }
        check_viewport(region, self.width, self.height)?;

        let unpadded_row = region.width * 4;
        let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.readback"),
            size: u64::from(padded_row) * u64::from(region.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("renderer.readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.origin_x,
                    y: region.origin_y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(region.height),
                },
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| RenderError::Readback(err.to_string()))?;
        receiver
            .recv()
            .map_err(|err| RenderError::Readback(err.to_string()))?
            .map_err(|err| RenderError::Readback(err.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded_row * region.height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded_row as usize) {
                pixels.extend_from_slice(&row[..unpadded_row as usize]);
            }
        }
        buffer.unmap();
        RgbaImage::from_raw(region.width, region.height, pixels)
            .ok_or_else(|| RenderError::Readback("readback size mismatch".to_owned()))
    }
}

fn create_target(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("renderer.canvas"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_instance_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("renderer.tile_instances"),
        size: (capacity * std::mem::size_of::<TileUniforms>()) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniform_buffer: &wgpu::Buffer,
    instance_buffer: &wgpu::Buffer,
    atlas_view: &wgpu::TextureView,
    colormap_view: &wgpu::TextureView,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("renderer.raster_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: instance_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(atlas_view),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(colormap_view),
            },
        ],
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    (vertex_entry, fragment_entry): (&str, &str),
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(vertex_entry),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}
