//! wgpu implementation of [`GpuContext`].
//!
//! Commands submitted during a frame are kept in order and replayed into
//! render passes when the frame is presented. A pass is opened lazily by the
//! first draw after a target change or clear, so clears become load ops.
//!
//! # Key types
//! - [`WgpuContext`]: device, queue, surface and every created resource

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context as _, anyhow, bail};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::context::{
    AddressMode, BindingState, BufferDescriptor, BufferId, BufferUsage, Command, DepthStencilId,
    DriverType, FilterMode, GpuContext, RenderTarget, SamplerDescriptor, SamplerId,
    ShaderDescriptor, ShaderId, ShaderStage, TextureDescriptor, TextureFormat, TextureId,
    VertexLayout, slot,
};
use crate::data_structures::model::vertex_layouts;
use crate::pipelines::mk_render_pipeline;

/// Adapters are tried in this order.
const DRIVER_TYPES: [DriverType; 3] = [DriverType::Hardware, DriverType::Warp, DriverType::Reference];

/// Device feature sets, richest first. A rejected request is retried with
/// the next entry.
const FEATURE_LEVELS: [wgpu::Features; 2] = [wgpu::Features::FLOAT32_FILTERABLE, wgpu::Features::empty()];

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

const PLACEHOLDER_UNIFORM_SIZE: u64 = 16 * 1024;
const PLACEHOLDER_VERTEX_SIZE: u64 = 64 * 1024;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    usage: BufferUsage,
}

struct GpuTexture {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

struct GpuShader {
    module: wgpu::ShaderModule,
    entry_point: String,
    stage: ShaderStage,
    layout: VertexLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex: ShaderId,
    pixel: ShaderId,
    color_format: wgpu::TextureFormat,
    depth: bool,
}

struct Placeholders {
    uniform: wgpu::Buffer,
    vertex: wgpu::Buffer,
    vertex_size: u64,
    texture: wgpu::TextureView,
    sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
}

#[derive(Default)]
struct PendingClear {
    color: Option<[f32; 4]>,
    depth: Option<f32>,
}

impl PendingClear {
    fn is_empty(&self) -> bool {
        self.color.is_none() && self.depth.is_none()
    }
}

struct DrawArgs {
    index_count: u32,
    instance_count: u32,
    base_index: u32,
    base_vertex: i32,
    base_instance: u32,
}

pub struct WgpuContext {
    pub(crate) window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    driver_type: DriverType,
    float_filterable: bool,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    placeholders: Placeholders,
    buffers: Vec<GpuBuffer>,
    textures: Vec<GpuTexture>,
    samplers: Vec<wgpu::Sampler>,
    depth_stencils: Vec<wgpu::TextureView>,
    shaders: Vec<GpuShader>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    frame: Vec<Command>,
}

impl WgpuContext {
    /// Creates a device for `window`, walking the driver and feature
    /// preference lists until a device is created.
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create the window surface")?;

        let mut selected = None;
        'drivers: for driver_type in DRIVER_TYPES {
            let options = match driver_type {
                DriverType::Hardware => wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                },
                DriverType::Warp => wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: true,
                },
                _ => wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                },
            };
            let adapter = match instance.request_adapter(&options).await {
                Ok(adapter) => adapter,
                Err(e) => {
                    log::debug!("no {:?} adapter: {}", driver_type, e);
                    continue;
                }
            };
            if driver_type == DriverType::Hardware
                && adapter.get_info().device_type == wgpu::DeviceType::Cpu
            {
                continue;
            }
            for features in FEATURE_LEVELS {
                let request = adapter
                    .request_device(&wgpu::DeviceDescriptor {
                        label: Some("lumen device"),
                        required_features: features,
                        required_limits: wgpu::Limits::default(),
                        ..Default::default()
                    })
                    .await;
                match request {
                    Ok((device, queue)) => {
                        selected = Some((driver_type, adapter, device, queue, features));
                        break 'drivers;
                    }
                    Err(e) => log::warn!(
                        "{:?} adapter rejected features {:?}: {}",
                        driver_type,
                        features,
                        e
                    ),
                }
            }
        }
        let (driver_type, adapter, device, queue, features) =
            selected.ok_or_else(|| anyhow!("no adapter could create a device"))?;
        log::info!(
            "using {:?} adapter `{}` ({:?})",
            driver_type,
            adapter.get_info().name,
            adapter.get_info().backend
        );

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("the surface supports no formats"))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let float_filterable = features.contains(wgpu::Features::FLOAT32_FILTERABLE);
        let uniform_layout = uniform_layout(&device);
        let texture_layout = texture_layout(&device, float_filterable);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[Some(&uniform_layout), Some(&texture_layout)],
            immediate_size: 0,
        });
        let placeholders = Placeholders::new(&device, &queue);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            driver_type,
            float_filterable,
            uniform_layout,
            texture_layout,
            pipeline_layout,
            placeholders,
            buffers: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            depth_stencils: Vec::new(),
            shaders: Vec::new(),
            pipelines: HashMap::new(),
            frame: Vec::new(),
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    fn replay(
        &mut self,
        commands: Vec<Command>,
        back_buffer: &wgpu::TextureView,
    ) -> wgpu::CommandEncoder {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        let mut state = BindingState::default();
        let mut pending = PendingClear::default();
        let mut used = HashSet::new();
        let mut pass: Option<wgpu::RenderPass<'static>> = None;

        for command in commands {
            match command {
                Command::UpdateBuffer { buffer, data } => self.write_buffer(buffer, &data, &used),
                Command::ClearRenderTarget { color } => {
                    pass = None;
                    pending.color = Some(color);
                }
                Command::ClearDepth { depth } => {
                    pass = None;
                    pending.depth = Some(depth);
                }
                Command::DrawIndexed {
                    index_count,
                    base_index,
                    base_vertex,
                } => self.replay_draw(
                    &mut encoder,
                    &mut pass,
                    &state,
                    &mut pending,
                    &mut used,
                    back_buffer,
                    DrawArgs {
                        index_count,
                        instance_count: 1,
                        base_index,
                        base_vertex,
                        base_instance: 0,
                    },
                ),
                Command::DrawIndexedInstanced {
                    index_count,
                    instance_count,
                    base_index,
                    base_vertex,
                    base_instance,
                } => self.replay_draw(
                    &mut encoder,
                    &mut pass,
                    &state,
                    &mut pending,
                    &mut used,
                    back_buffer,
                    DrawArgs {
                        index_count,
                        instance_count,
                        base_index,
                        base_vertex,
                        base_instance,
                    },
                ),
                command @ Command::SetRenderTarget { .. } => {
                    pass = None;
                    self.flush_clears(&mut encoder, &state, &mut pending, back_buffer);
                    state.apply(&command);
                }
                command => {
                    state.apply(&command);
                }
            }
        }
        drop(pass);
        self.flush_clears(&mut encoder, &state, &mut pending, back_buffer);
        encoder
    }

    /// Keeps the buffer uploads of a frame that cannot be drawn.
    fn apply_updates(&mut self, commands: Vec<Command>) {
        let used = HashSet::new();
        for command in commands {
            if let Command::UpdateBuffer { buffer, data } = command {
                self.write_buffer(buffer, &data, &used);
            }
        }
    }

    /// Applies clears that no draw consumed by opening an empty pass.
    fn flush_clears(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        state: &BindingState,
        pending: &mut PendingClear,
        back_buffer: &wgpu::TextureView,
    ) {
        if pending.is_empty() {
            return;
        }
        if let Some(pass) = self.begin_pass(encoder, state, pending, back_buffer) {
            drop(pass);
        } else {
            *pending = PendingClear::default();
        }
    }

    fn begin_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        state: &BindingState,
        pending: &mut PendingClear,
        back_buffer: &wgpu::TextureView,
    ) -> Option<wgpu::RenderPass<'static>> {
        let view = match state.target? {
            RenderTarget::BackBuffer => back_buffer,
            RenderTarget::Texture(id) => &self.textures.get(id.index())?.view,
        };
        let depth_view = state
            .depth
            .and_then(|id| self.depth_stencils.get(id.index()));
        let load = match pending.color.take() {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_clear = pending.depth.take();
        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: depth_view.map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: if depth_clear.is_some() {
                            wgpu::LoadOp::Clear(0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        });
        Some(pass.forget_lifetime())
    }

    /// Writes buffer contents. A buffer already read by an earlier draw of
    /// this frame is renamed so that draw keeps the old contents.
    fn write_buffer(&mut self, id: BufferId, data: &[u8], used: &HashSet<BufferId>) {
        let Some(entry) = self.buffers.get_mut(id.index()) else {
            log::warn!("update of unknown buffer {:?}", id);
            return;
        };
        if used.contains(&id) || (data.len() as u64) > entry.buffer.size() {
            entry.buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Renamed Buffer"),
                    contents: data,
                    usage: buffer_usages(entry.usage),
                });
        } else {
            self.queue.write_buffer(&entry.buffer, 0, data);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn replay_draw(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &mut Option<wgpu::RenderPass<'static>>,
        state: &BindingState,
        pending: &mut PendingClear,
        used: &mut HashSet<BufferId>,
        back_buffer: &wgpu::TextureView,
        draw: DrawArgs,
    ) {
        if pass.is_none() {
            *pass = self.begin_pass(encoder, state, pending, back_buffer);
        }
        let Some(render_pass) = pass.as_mut() else {
            log::warn!("draw without a render target, skipping");
            return;
        };
        if let Err(e) = self.encode_draw(render_pass, state, used, &draw) {
            log::warn!("skipping draw: {:#}", e);
        }
    }

    fn encode_draw(
        &mut self,
        pass: &mut wgpu::RenderPass<'static>,
        state: &BindingState,
        used: &mut HashSet<BufferId>,
        draw: &DrawArgs,
    ) -> anyhow::Result<()> {
        let (vertex, pixel) = state.shaders.context("no shaders bound")?;
        let index_buffer = state.index_buffer.context("no index buffer bound")?;
        let color_format = match state.target.context("no render target bound")? {
            RenderTarget::BackBuffer => self.config.format,
            RenderTarget::Texture(id) => self.texture(id)?.format,
        };
        let pipeline = self.pipeline(PipelineKey {
            vertex,
            pixel,
            color_format,
            depth: state.depth.is_some(),
        })?;
        let layout = self.shader(vertex)?.layout;

        let per_instance_bytes =
            (draw.base_instance as u64 + draw.instance_count as u64) * 64;
        self.placeholders.reserve_vertex(&self.device, per_instance_bytes);

        let mut uniform_entries = Vec::with_capacity(slot::constant::COUNT);
        for (binding, bound) in state.constant_buffers.iter().enumerate() {
            let buffer = match bound {
                Some(id) => {
                    used.insert(*id);
                    &self.buffer(*id)?.buffer
                }
                None => &self.placeholders.uniform,
            };
            uniform_entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            });
        }
        let uniforms = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform_bind_group"),
            layout: &self.uniform_layout,
            entries: &uniform_entries,
        });

        let mut texture_entries = Vec::with_capacity(slot::resource::COUNT * 2);
        for resource_slot in 0..slot::resource::COUNT {
            let view = match state.shader_resources[resource_slot] {
                Some(id) if state.reads_target(id) => {
                    log::warn!("texture {:?} is both target and resource", id);
                    &self.placeholders.texture
                }
                Some(id) => &self.texture(id)?.view,
                None => &self.placeholders.texture,
            };
            let unfilterable =
                resource_slot as u32 == slot::resource::SHADOW_MAP && !self.float_filterable;
            let sampler = match state.samplers[resource_slot] {
                _ if unfilterable => &self.placeholders.nearest_sampler,
                Some(id) => self
                    .samplers
                    .get(id.index())
                    .with_context(|| format!("unknown sampler {:?}", id))?,
                None => &self.placeholders.sampler,
            };
            texture_entries.push(wgpu::BindGroupEntry {
                binding: resource_slot as u32 * 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: resource_slot as u32 * 2 + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let textures = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_bind_group"),
            layout: &self.texture_layout,
            entries: &texture_entries,
        });

        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &uniforms, &[]);
        pass.set_bind_group(1, &textures, &[]);
        let slots = vertex_layouts(layout).len();
        for (vertex_slot, bound) in state.vertex_buffers.iter().take(slots).enumerate() {
            let buffer = match bound {
                Some(id) => {
                    used.insert(*id);
                    &self.buffer(*id)?.buffer
                }
                None => &self.placeholders.vertex,
            };
            pass.set_vertex_buffer(vertex_slot as u32, buffer.slice(..));
        }
        used.insert(index_buffer);
        pass.set_index_buffer(
            self.buffer(index_buffer)?.buffer.slice(..),
            wgpu::IndexFormat::Uint32,
        );
        pass.draw_indexed(
            draw.base_index..draw.base_index + draw.index_count,
            draw.base_vertex,
            draw.base_instance..draw.base_instance + draw.instance_count,
        );
        Ok(())
    }

    fn pipeline(&mut self, key: PipelineKey) -> anyhow::Result<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }
        let vertex = self.shader(key.vertex)?;
        let pixel = self.shader(key.pixel)?;
        if vertex.stage != ShaderStage::Vertex || pixel.stage != ShaderStage::Pixel {
            bail!("shaders {:?} and {:?} do not form a vertex/pixel pair", key.vertex, key.pixel);
        }
        let blend = match key.color_format {
            wgpu::TextureFormat::Rgba32Float => None,
            _ => Some(wgpu::BlendState::REPLACE),
        };
        let pipeline = mk_render_pipeline(
            &self.device,
            &self.pipeline_layout,
            key.color_format,
            blend,
            key.depth.then_some(DEPTH_FORMAT),
            &vertex_layouts(vertex.layout),
            (&vertex.module, vertex.entry_point.as_str()),
            (&pixel.module, pixel.entry_point.as_str()),
        );
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn buffer(&self, id: BufferId) -> anyhow::Result<&GpuBuffer> {
        self.buffers
            .get(id.index())
            .with_context(|| format!("unknown buffer {:?}", id))
    }

    fn texture(&self, id: TextureId) -> anyhow::Result<&GpuTexture> {
        self.textures
            .get(id.index())
            .with_context(|| format!("unknown texture {:?}", id))
    }

    fn shader(&self, id: ShaderId) -> anyhow::Result<&GpuShader> {
        self.shaders
            .get(id.index())
            .with_context(|| format!("unknown shader {:?}", id))
    }
}

impl GpuContext for WgpuContext {
    fn driver_type(&self) -> DriverType {
        self.driver_type
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> anyhow::Result<BufferId> {
        // zero-sized buffers are not bindable
        let padded;
        let contents = if desc.contents.is_empty() {
            padded = [0u8; 16];
            &padded[..]
        } else {
            desc.contents
        };
        let device = &self.device;
        let buffer = capture_device_errors(device, desc.label, || {
            Ok(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents,
                usage: buffer_usages(desc.usage),
            }))
        })?;
        self.buffers.push(GpuBuffer {
            buffer,
            usage: desc.usage,
        });
        Ok(BufferId(self.buffers.len() as u32 - 1))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> anyhow::Result<TextureId> {
        let format = texture_format(desc.format);
        let size = wgpu::Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: 1,
        };
        let mut usage = wgpu::TextureUsages::COPY_DST;
        if desc.usage.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if desc.usage.shader_resource {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        let (device, queue) = (&self.device, &self.queue);
        let view = capture_device_errors(device, desc.label, || {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });
            if let Some(data) = desc.data {
                let bytes_per_row = desc.format.bytes_per_pixel() * size.width;
                if (data.len() as u64) < bytes_per_row as u64 * size.height as u64 {
                    bail!("texture `{}` data is smaller than its extent", desc.label);
                }
                queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        aspect: wgpu::TextureAspect::All,
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                    },
                    data,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(bytes_per_row),
                        rows_per_image: Some(size.height),
                    },
                    size,
                );
            }
            Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
        })?;
        self.textures.push(GpuTexture { view, format });
        Ok(TextureId(self.textures.len() as u32 - 1))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor<'_>) -> anyhow::Result<SamplerId> {
        let device = &self.device;
        let sampler = capture_device_errors(device, desc.label, || {
            Ok(create_sampler(device, Some(desc.label), desc.address, desc.filter))
        })?;
        self.samplers.push(sampler);
        Ok(SamplerId(self.samplers.len() as u32 - 1))
    }

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> anyhow::Result<DepthStencilId> {
        let view = depth_stencil_view(&self.device, width, height)?;
        self.depth_stencils.push(view);
        Ok(DepthStencilId(self.depth_stencils.len() as u32 - 1))
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor<'_>) -> anyhow::Result<ShaderId> {
        let device = &self.device;
        let module = capture_device_errors(device, desc.label, || {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });
            let info = futures::executor::block_on(module.get_compilation_info());
            let errors: Vec<String> = info
                .messages
                .iter()
                .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
                .map(|m| m.message.clone())
                .collect();
            if !errors.is_empty() {
                bail!("shader `{}` failed to compile: {}", desc.label, errors.join("; "));
            }
            Ok(module)
        })?;
        self.shaders.push(GpuShader {
            module,
            entry_point: desc.entry_point.to_string(),
            stage: desc.stage,
            layout: desc.layout,
        });
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn submit(&mut self, command: Command) {
        self.frame.push(command);
    }

    fn present(&mut self) -> anyhow::Result<()> {
        let commands = std::mem::take(&mut self.frame);
        let output = match self.surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(output)
            | wgpu::CurrentSurfaceTexture::Suboptimal(output) => output,
            wgpu::CurrentSurfaceTexture::Timeout | wgpu::CurrentSurfaceTexture::Occluded => {
                self.apply_updates(commands);
                return Ok(());
            }
            wgpu::CurrentSurfaceTexture::Outdated | wgpu::CurrentSurfaceTexture::Lost => {
                self.apply_updates(commands);
                self.surface.configure(&self.device, &self.config);
                bail!("the back buffer was lost, the surface has been reconfigured");
            }
            wgpu::CurrentSurfaceTexture::Validation => {
                self.apply_updates(commands);
                bail!("failed to acquire the back buffer");
            }
        };
        let back_buffer = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self.replay(commands, &back_buffer);
        self.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        Ok(())
    }
}

impl Placeholders {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("placeholder uniform"),
            size: PLACEHOLDER_UNIFORM_SIZE,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });
        let vertex = zero_vertex_buffer(device, PLACEHOLDER_VERTEX_SIZE);

        let size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("placeholder texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            &[255, 255, 255, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            size,
        );

        Self {
            uniform,
            vertex,
            vertex_size: PLACEHOLDER_VERTEX_SIZE,
            texture: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            sampler: create_sampler(
                device,
                Some("placeholder sampler"),
                AddressMode::Wrap,
                FilterMode::Linear,
            ),
            nearest_sampler: create_sampler(
                device,
                Some("placeholder nearest sampler"),
                AddressMode::Clamp,
                FilterMode::Nearest,
            ),
        }
    }

    /// Grows the zero vertex buffer so unbound per-instance slots cover
    /// `bytes`.
    fn reserve_vertex(&mut self, device: &wgpu::Device, bytes: u64) {
        if bytes > self.vertex_size {
            self.vertex_size = bytes.next_power_of_two();
            self.vertex = zero_vertex_buffer(device, self.vertex_size);
        }
    }
}

fn zero_vertex_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("placeholder vertex"),
        size,
        usage: wgpu::BufferUsages::VERTEX,
        mapped_at_creation: false,
    })
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    wgpu::BufferUsages::COPY_DST
        | match usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
            BufferUsage::Constant => wgpu::BufferUsages::UNIFORM,
        }
}

/// Runs `create` inside validation and out-of-memory error scopes. An error
/// returned by `create` wins over the one the device reported.
fn capture_device_errors<T>(
    device: &wgpu::Device,
    label: &str,
    create: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let out_of_memory = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let validation = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let created = create();
    let validation_error = futures::executor::block_on(validation.pop());
    let memory_error = futures::executor::block_on(out_of_memory.pop());
    let created = created?;
    match validation_error.or(memory_error) {
        Some(e) => Err(anyhow!("creating `{}` failed: {}", label, e)),
        None => Ok(created),
    }
}

fn depth_stencil_view(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> anyhow::Result<wgpu::TextureView> {
    capture_device_errors(device, "depth_stencil", || {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_stencil"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    })
}

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

fn create_sampler(
    device: &wgpu::Device,
    label: Option<&str>,
    address: AddressMode,
    filter: FilterMode,
) -> wgpu::Sampler {
    let address_mode = match address {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
    };
    let filter = match filter {
        FilterMode::Linear => wgpu::FilterMode::Linear,
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label,
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        ..Default::default()
    })
}

/// Six uniform buffers, one per constant buffer slot.
fn uniform_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..slot::constant::COUNT as u32)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &entries,
        label: Some("uniform_bind_group_layout"),
    })
}

/// A texture and sampler pair per shader resource slot. The shadow map is a
/// 32-bit float texture, which is only filterable with `FLOAT32_FILTERABLE`.
fn texture_layout(device: &wgpu::Device, float_filterable: bool) -> wgpu::BindGroupLayout {
    let mut entries = Vec::with_capacity(slot::resource::COUNT * 2);
    for resource_slot in 0..slot::resource::COUNT as u32 {
        let filterable = resource_slot != slot::resource::SHADOW_MAP || float_filterable;
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: resource_slot * 2,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable },
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: resource_slot * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if filterable {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &entries,
        label: Some("texture_bind_group_layout"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A device on any adapter, or `None` on machines without one.
    fn any_device() -> Option<wgpu::Device> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::new_without_display_handle());
        let adapter = futures::executor::block_on(
            instance.request_adapter(&wgpu::RequestAdapterOptions::default()),
        )
        .ok()?;
        let (device, _queue) = futures::executor::block_on(
            adapter.request_device(&wgpu::DeviceDescriptor::default()),
        )
        .ok()?;
        Some(device)
    }

    #[test]
    fn oversized_depth_stencils_are_reported() {
        let Some(device) = any_device() else {
            return;
        };
        let too_wide = device.limits().max_texture_dimension_2d + 1;
        let err = depth_stencil_view(&device, too_wide, 4).unwrap_err();
        assert!(err.to_string().contains("depth_stencil"));
        assert!(depth_stencil_view(&device, 4, 4).is_ok());
    }

    #[test]
    fn errors_from_the_closure_come_first() {
        let Some(device) = any_device() else {
            return;
        };
        let err = capture_device_errors::<()>(&device, "nothing", || bail!("no data")).unwrap_err();
        assert_eq!(err.to_string(), "no data");
    }
}
