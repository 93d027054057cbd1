//! Headless [`GpuContext`] that records what would have been drawn.
//!
//! Resources only exist as CPU copies. Buffer updates are applied in
//! submission order and every draw stores a snapshot of the constant
//! buffers bound when it was issued, so a frame can be checked draw by draw
//! without a GPU.

use anyhow::{bail, ensure};
use bytemuck::Pod;

use crate::context::{
    BindingState, BufferDescriptor, BufferId, BufferUsage, Command, DepthStencilId, DriverType,
    GpuContext, RenderTarget, SamplerDescriptor, SamplerId, ShaderDescriptor, ShaderId,
    ShaderStage, TextureDescriptor, TextureId, TextureUsage, VertexLayout, slot,
};

/// A draw call together with the state it was issued against.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub target: Option<RenderTarget>,
    pub depth: Option<DepthStencilId>,
    pub shaders: Option<(ShaderId, ShaderId)>,
    pub vertex_buffers: [Option<BufferId>; slot::vertex::COUNT],
    pub index_buffer: Option<BufferId>,
    pub index_count: u32,
    pub instance_count: u32,
    pub base_index: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
    /// Contents of each bound constant buffer at the time of the draw.
    pub constant_buffers: [Option<Vec<u8>>; slot::constant::COUNT],
    pub shader_resources: [Option<TextureId>; slot::resource::COUNT],
    pub samplers: [Option<SamplerId>; slot::resource::COUNT],
}

impl DrawCall {
    /// Reads the constant buffer in `slot` as `T`.
    pub fn constant<T: Pod>(&self, slot: u32) -> Option<T> {
        let bytes = self.constant_buffers.get(slot as usize)?.as_ref()?;
        let size = std::mem::size_of::<T>();
        (bytes.len() >= size).then(|| bytemuck::pod_read_unaligned(&bytes[..size]))
    }
}

/// Everything submitted between two presents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub commands: Vec<Command>,
    pub draws: Vec<DrawCall>,
}

impl Frame {
    pub fn draws_to(&self, target: RenderTarget) -> impl Iterator<Item = &DrawCall> {
        self.draws.iter().filter(move |d| d.target == Some(target))
    }
}

#[derive(Debug)]
struct RecordedBuffer {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Debug)]
struct RecordedTexture {
    label: String,
    usage: TextureUsage,
}

#[derive(Debug)]
struct RecordedShader {
    label: String,
    stage: ShaderStage,
    layout: VertexLayout,
}

#[derive(Debug)]
pub struct RecordingContext {
    size: (u32, u32),
    buffers: Vec<RecordedBuffer>,
    textures: Vec<RecordedTexture>,
    samplers: Vec<String>,
    depth_stencils: Vec<(u32, u32)>,
    shaders: Vec<RecordedShader>,
    state: BindingState,
    current: Frame,
    frames: Vec<Frame>,
    created: usize,
    fail_after: Option<usize>,
}

impl RecordingContext {
    /// A context whose back buffer is `width` by `height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            buffers: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            depth_stencils: Vec::new(),
            shaders: Vec::new(),
            state: BindingState::default(),
            current: Frame::default(),
            frames: Vec::new(),
            created: 0,
            fail_after: None,
        }
    }

    /// Makes every resource creation after the first `count` fail.
    pub fn fail_creation_after(&mut self, count: usize) {
        self.fail_after = Some(count);
    }

    /// Presented frames, oldest first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Commands submitted since the last present.
    pub fn pending(&self) -> &Frame {
        &self.current
    }

    pub fn bindings(&self) -> &BindingState {
        &self.state
    }

    pub fn buffer_data(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id.index()).map(|b| b.data.as_slice())
    }

    pub fn buffer_label(&self, id: BufferId) -> Option<&str> {
        self.buffers.get(id.index()).map(|b| b.label.as_str())
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_label(&self, id: TextureId) -> Option<&str> {
        self.textures.get(id.index()).map(|t| t.label.as_str())
    }

    pub fn texture_usage(&self, id: TextureId) -> Option<TextureUsage> {
        self.textures.get(id.index()).map(|t| t.usage)
    }

    pub fn shader_label(&self, id: ShaderId) -> Option<&str> {
        self.shaders.get(id.index()).map(|s| s.label.as_str())
    }

    pub fn shader_stage(&self, id: ShaderId) -> Option<ShaderStage> {
        self.shaders.get(id.index()).map(|s| s.stage)
    }

    pub fn shader_layout(&self, id: ShaderId) -> Option<VertexLayout> {
        self.shaders.get(id.index()).map(|s| s.layout)
    }

    pub fn depth_stencil_size(&self, id: DepthStencilId) -> Option<(u32, u32)> {
        self.depth_stencils.get(id.index()).copied()
    }

    fn count_creation(&mut self, what: &str, label: &str) -> anyhow::Result<()> {
        if self.fail_after.is_some_and(|limit| self.created >= limit) {
            bail!("simulated device failure creating {} `{}`", what, label);
        }
        self.created += 1;
        Ok(())
    }

    fn record_draw(&mut self, draw: DrawCall) {
        if draw.shaders.is_none() {
            log::warn!("recorded a draw without shaders");
        }
        self.current.draws.push(draw);
    }

    fn snapshot(&self) -> DrawCall {
        let constant_buffers = std::array::from_fn(|i| {
            self.state.constant_buffers[i]
                .and_then(|id| self.buffer_data(id))
                .map(<[u8]>::to_vec)
        });
        DrawCall {
            target: self.state.target,
            depth: self.state.depth,
            shaders: self.state.shaders,
            vertex_buffers: self.state.vertex_buffers,
            index_buffer: self.state.index_buffer,
            index_count: 0,
            instance_count: 1,
            base_index: 0,
            base_vertex: 0,
            base_instance: 0,
            constant_buffers,
            shader_resources: self.state.shader_resources,
            samplers: self.state.samplers,
        }
    }
}

impl GpuContext for RecordingContext {
    fn driver_type(&self) -> DriverType {
        DriverType::Null
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> anyhow::Result<BufferId> {
        self.count_creation("buffer", desc.label)?;
        self.buffers.push(RecordedBuffer {
            label: desc.label.to_string(),
            usage: desc.usage,
            data: desc.contents.to_vec(),
        });
        Ok(BufferId(self.buffers.len() as u32 - 1))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> anyhow::Result<TextureId> {
        self.count_creation("texture", desc.label)?;
        if let Some(data) = desc.data {
            let expected = desc.format.bytes_per_pixel() as usize
                * desc.width as usize
                * desc.height as usize;
            ensure!(
                data.len() >= expected,
                "texture `{}` needs {} bytes, got {}",
                desc.label,
                expected,
                data.len()
            );
        }
        self.textures.push(RecordedTexture {
            label: desc.label.to_string(),
            usage: desc.usage,
        });
        Ok(TextureId(self.textures.len() as u32 - 1))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor<'_>) -> anyhow::Result<SamplerId> {
        self.count_creation("sampler", desc.label)?;
        self.samplers.push(desc.label.to_string());
        Ok(SamplerId(self.samplers.len() as u32 - 1))
    }

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> anyhow::Result<DepthStencilId> {
        self.count_creation("depth stencil", "depth_stencil")?;
        self.depth_stencils.push((width, height));
        Ok(DepthStencilId(self.depth_stencils.len() as u32 - 1))
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor<'_>) -> anyhow::Result<ShaderId> {
        self.count_creation("shader", desc.label)?;
        ensure!(
            desc.source.contains(desc.entry_point),
            "shader `{}` has no entry point `{}`",
            desc.label,
            desc.entry_point
        );
        self.shaders.push(RecordedShader {
            label: desc.label.to_string(),
            stage: desc.stage,
            layout: desc.layout,
        });
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn submit(&mut self, command: Command) {
        match &command {
            Command::UpdateBuffer { buffer, data } => match self.buffers.get_mut(buffer.index()) {
                Some(recorded) => {
                    if recorded.usage == BufferUsage::Constant && data.len() != recorded.data.len() {
                        log::warn!(
                            "constant buffer `{}` resized from {} to {} bytes",
                            recorded.label,
                            recorded.data.len(),
                            data.len()
                        );
                    }
                    recorded.data.clone_from(data);
                }
                None => log::warn!("update of unknown buffer {:?}", buffer),
            },
            Command::DrawIndexed {
                index_count,
                base_index,
                base_vertex,
            } => {
                let draw = DrawCall {
                    index_count: *index_count,
                    base_index: *base_index,
                    base_vertex: *base_vertex,
                    ..self.snapshot()
                };
                self.record_draw(draw);
            }
            Command::DrawIndexedInstanced {
                index_count,
                instance_count,
                base_index,
                base_vertex,
                base_instance,
            } => {
                let draw = DrawCall {
                    index_count: *index_count,
                    instance_count: *instance_count,
                    base_index: *base_index,
                    base_vertex: *base_vertex,
                    base_instance: *base_instance,
                    ..self.snapshot()
                };
                self.record_draw(draw);
            }
            other => {
                self.state.apply(other);
            }
        }
        self.current.commands.push(command);
    }

    fn present(&mut self) -> anyhow::Result<()> {
        let frame = std::mem::take(&mut self.current);
        log::debug!(
            "recorded frame {} with {} draws",
            self.frames.len(),
            frame.draws.len()
        );
        self.frames.push(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{create_constant_buffer, upload};

    #[test]
    fn draws_snapshot_constant_buffers() {
        let mut ctx = RecordingContext::new(8, 8);
        let cb = create_constant_buffer(&mut ctx, "value", &1u32).unwrap();
        ctx.submit(Command::SetConstantBuffer {
            slot: 2,
            buffer: Some(cb),
        });
        ctx.submit(Command::DrawIndexed {
            index_count: 3,
            base_index: 0,
            base_vertex: 0,
        });
        upload(&mut ctx, cb, &2u32);
        ctx.submit(Command::DrawIndexed {
            index_count: 3,
            base_index: 0,
            base_vertex: 0,
        });
        ctx.present().unwrap();

        let frame = ctx.last_frame().unwrap();
        assert_eq!(frame.draws.len(), 2);
        assert_eq!(frame.draws[0].constant::<u32>(2), Some(1));
        assert_eq!(frame.draws[1].constant::<u32>(2), Some(2));
        assert_eq!(ctx.buffer_data(cb), Some(&2u32.to_ne_bytes()[..]));
    }

    #[test]
    fn creation_fails_after_limit() {
        let mut ctx = RecordingContext::new(8, 8);
        ctx.fail_creation_after(1);
        assert!(ctx.create_depth_stencil(8, 8).is_ok());
        let err = ctx.create_depth_stencil(8, 8).unwrap_err();
        assert!(err.to_string().contains("simulated device failure"));
    }

    #[test]
    fn present_starts_a_new_frame() {
        let mut ctx = RecordingContext::new(8, 8);
        ctx.submit(Command::ClearDepth { depth: 1.0 });
        ctx.present().unwrap();
        ctx.present().unwrap();
        assert_eq!(ctx.frames().len(), 2);
        assert_eq!(ctx.frames()[0].commands.len(), 1);
        assert!(ctx.frames()[1].commands.is_empty());
    }
}
