//! The GPU boundary.
//!
//! The renderer never talks to wgpu directly. It creates resources and issues
//! immediate-mode [`Command`]s through a [`GpuContext`], which is passed
//! explicitly into every `initialize`/`render` call. Two contexts exist:
//!
//! - [`native::WgpuContext`] owns the wgpu device, queue and surface and
//!   replays each frame's commands into wgpu render passes on `present`
//! - [`record::RecordingContext`] keeps everything in memory and records
//!   draws, so frames can be inspected without a GPU
//!
//! Resources are referred to by small typed handles that index into the
//! context's own arenas.

pub mod native;
pub mod record;

use bytemuck::Pod;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(
    /// A vertex, index or constant buffer.
    BufferId
);
handle!(
    /// A 2D texture, optionally usable as a render target.
    TextureId
);
handle!(SamplerId);
handle!(
    /// A depth-stencil surface.
    DepthStencilId
);
handle!(
    /// A compiled vertex or pixel shader.
    ShaderId
);

/// Fixed binding slots shared by the renderer and the WGSL sources.
pub mod slot {
    /// Constant buffer slots, `@group(0) @binding(slot)` in WGSL.
    pub mod constant {
        pub const CAMERA: u32 = 0;
        pub const RESIZE: u32 = 1;
        pub const OBJECT: u32 = 2;
        pub const LIGHTS: u32 = 3;
        pub const SKINNING: u32 = 4;
        pub const SHADOW: u32 = 5;
        pub const COUNT: usize = 6;
    }

    /// Shader resource and sampler slots. In WGSL the texture of slot `n`
    /// sits at `@group(1) @binding(2n)` and its sampler at `2n + 1`.
    pub mod resource {
        pub const DIFFUSE: u32 = 0;
        pub const NORMAL: u32 = 1;
        pub const SHADOW_MAP: u32 = 2;
        pub const COUNT: usize = 3;
    }

    /// Vertex buffer slots of the input layout.
    pub mod vertex {
        pub const GEOMETRY: u32 = 0;
        pub const NORMAL_DATA: u32 = 1;
        pub const INSTANCES: u32 = 2;
        pub const BONES: u32 = 3;
        pub const COUNT: usize = 4;
    }
}

/// The kind of device the context ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverType {
    #[default]
    Null,
    Hardware,
    /// Software rasterizer (the fallback adapter).
    Warp,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Constant,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub contents: &'a [u8],
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    /// Four 32-bit float channels, used by the shadow map.
    Rgba32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => 4,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureUsage {
    pub render_target: bool,
    pub shader_resource: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    /// Initial texel data, tightly packed rows.
    pub data: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDescriptor<'a> {
    pub label: &'a str,
    pub address: AddressMode,
    pub filter: FilterMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// Which vertex buffers a vertex shader consumes.
///
/// `Standard` reads slots 0 to 2 (geometry, normal data, instance
/// transforms), `Skinned` additionally reads the bone data in slot 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexLayout {
    #[default]
    Standard,
    Skinned,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderDescriptor<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub entry_point: &'a str,
    pub stage: ShaderStage,
    pub layout: VertexLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    BackBuffer,
    Texture(TextureId),
}

/// One immediate-context operation.
///
/// Indices are always 32 bit and the topology is always a triangle list.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetRenderTarget {
        color: RenderTarget,
        depth: Option<DepthStencilId>,
    },
    ClearRenderTarget {
        color: [f32; 4],
    },
    ClearDepth {
        depth: f32,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: Option<BufferId>,
    },
    SetIndexBuffer {
        buffer: BufferId,
    },
    SetShaders {
        vertex: ShaderId,
        pixel: ShaderId,
    },
    SetConstantBuffer {
        slot: u32,
        buffer: Option<BufferId>,
    },
    SetShaderResource {
        slot: u32,
        texture: Option<TextureId>,
    },
    SetSampler {
        slot: u32,
        sampler: Option<SamplerId>,
    },
    UpdateBuffer {
        buffer: BufferId,
        data: Vec<u8>,
    },
    DrawIndexed {
        index_count: u32,
        base_index: u32,
        base_vertex: i32,
    },
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        base_index: u32,
        base_vertex: i32,
        base_instance: u32,
    },
}

impl Command {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Command::DrawIndexed { .. } | Command::DrawIndexedInstanced { .. }
        )
    }
}

/// Everything currently bound on the immediate context.
///
/// Both contexts track bindings with this so that a draw can be resolved
/// against the state that was current when it was issued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingState {
    pub target: Option<RenderTarget>,
    pub depth: Option<DepthStencilId>,
    pub vertex_buffers: [Option<BufferId>; slot::vertex::COUNT],
    pub index_buffer: Option<BufferId>,
    pub shaders: Option<(ShaderId, ShaderId)>,
    pub constant_buffers: [Option<BufferId>; slot::constant::COUNT],
    pub shader_resources: [Option<TextureId>; slot::resource::COUNT],
    pub samplers: [Option<SamplerId>; slot::resource::COUNT],
}

impl BindingState {
    /// Applies a binding command. Returns `false` if the command does not
    /// touch bindings (clears, uploads, draws).
    pub fn apply(&mut self, command: &Command) -> bool {
        match command {
            Command::SetRenderTarget { color, depth } => {
                self.target = Some(*color);
                self.depth = *depth;
            }
            Command::SetVertexBuffer { slot, buffer } => {
                set_slot(&mut self.vertex_buffers, *slot, *buffer, "vertex buffer")
            }
            Command::SetIndexBuffer { buffer } => self.index_buffer = Some(*buffer),
            Command::SetShaders { vertex, pixel } => self.shaders = Some((*vertex, *pixel)),
            Command::SetConstantBuffer { slot, buffer } => {
                set_slot(&mut self.constant_buffers, *slot, *buffer, "constant buffer")
            }
            Command::SetShaderResource { slot, texture } => {
                set_slot(&mut self.shader_resources, *slot, *texture, "shader resource")
            }
            Command::SetSampler { slot, sampler } => {
                set_slot(&mut self.samplers, *slot, *sampler, "sampler")
            }
            Command::ClearRenderTarget { .. }
            | Command::ClearDepth { .. }
            | Command::UpdateBuffer { .. }
            | Command::DrawIndexed { .. }
            | Command::DrawIndexedInstanced { .. } => return false,
        }
        true
    }

    /// True if `texture` is bound for reading while also being the current
    /// render target.
    pub fn reads_target(&self, texture: TextureId) -> bool {
        self.target == Some(RenderTarget::Texture(texture))
            && self.shader_resources.contains(&Some(texture))
    }
}

fn set_slot<T>(slots: &mut [Option<T>], slot: u32, value: Option<T>, what: &str) {
    match slots.get_mut(slot as usize) {
        Some(entry) => *entry = value,
        None => log::warn!("ignoring {} binding to out-of-range slot {}", what, slot),
    }
}

/// The device plus immediate context, as seen by the engine.
pub trait GpuContext {
    fn driver_type(&self) -> DriverType;

    /// Client-area size of the presentation surface in pixels.
    fn surface_size(&self) -> (u32, u32);

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> anyhow::Result<BufferId>;

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> anyhow::Result<TextureId>;

    fn create_sampler(&mut self, desc: &SamplerDescriptor<'_>) -> anyhow::Result<SamplerId>;

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> anyhow::Result<DepthStencilId>;

    fn create_shader(&mut self, desc: &ShaderDescriptor<'_>) -> anyhow::Result<ShaderId>;

    fn submit(&mut self, command: Command);

    /// Ends the frame and shows the back buffer.
    fn present(&mut self) -> anyhow::Result<()>;
}

/// Creates a constant buffer holding `value`.
pub fn create_constant_buffer<T: Pod>(
    ctx: &mut dyn GpuContext,
    label: &str,
    value: &T,
) -> anyhow::Result<BufferId> {
    ctx.create_buffer(&BufferDescriptor {
        label,
        contents: bytemuck::bytes_of(value),
        usage: BufferUsage::Constant,
    })
}

/// Queues an upload of `value` into `buffer`.
pub fn upload<T: Pod>(ctx: &mut dyn GpuContext, buffer: BufferId, value: &T) {
    ctx.submit(Command::UpdateBuffer {
        buffer,
        data: bytemuck::bytes_of(value).to_vec(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_state_tracks_slots() {
        let mut state = BindingState::default();
        assert!(state.apply(&Command::SetConstantBuffer {
            slot: slot::constant::SHADOW,
            buffer: Some(BufferId(3)),
        }));
        assert_eq!(state.constant_buffers[5], Some(BufferId(3)));

        assert!(!state.apply(&Command::ClearDepth { depth: 1.0 }));
        // out-of-range slots are ignored
        assert!(state.apply(&Command::SetSampler {
            slot: 9,
            sampler: Some(SamplerId(0)),
        }));
        assert_eq!(state.samplers, [None; slot::resource::COUNT]);
    }

    #[test]
    fn detects_target_read_hazard() {
        let mut state = BindingState::default();
        let shadow = TextureId(1);
        state.apply(&Command::SetShaderResource {
            slot: slot::resource::SHADOW_MAP,
            texture: Some(shadow),
        });
        state.apply(&Command::SetRenderTarget {
            color: RenderTarget::Texture(shadow),
            depth: None,
        });
        assert!(state.reads_target(shadow));

        state.apply(&Command::SetShaderResource {
            slot: slot::resource::SHADOW_MAP,
            texture: None,
        });
        assert!(!state.reads_target(shadow));
    }
}
