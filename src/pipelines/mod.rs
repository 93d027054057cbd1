//! Shader programs and render pipeline construction.
//!
//! Drawables refer to shaders by name. The renderer keeps a registry of
//! [`VertexShader`]s and [`PixelShader`]s, initializes them against the
//! context and resolves names to [`ShaderId`]s while recording draws. The
//! backend pairs the two stages into a wgpu pipeline with
//! [`mk_render_pipeline`].
//!
//! Every built-in shader is prefixed with `common.wgsl`, which declares the
//! constant buffer and texture slots.

use crate::context::{GpuContext, ShaderDescriptor, ShaderId, ShaderStage, VertexLayout};
use crate::error::Result;

pub const COMMON: &str = include_str!("common.wgsl");
pub const PHONG: &str = include_str!("phong.wgsl");
pub const VOXEL: &str = include_str!("voxel.wgsl");
pub const SKINNING: &str = include_str!("skinning.wgsl");
pub const SKYBOX: &str = include_str!("skybox.wgsl");
pub const SHADOW: &str = include_str!("shadow.wgsl");

pub const VERTEX_ENTRY_POINT: &str = "vs_main";
pub const PIXEL_ENTRY_POINT: &str = "fs_main";

#[derive(Debug, Clone)]
struct Program {
    name: String,
    source: String,
    entry_point: String,
    id: Option<ShaderId>,
}

impl Program {
    fn new(name: &str, source: impl Into<String>, entry_point: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.into(),
            entry_point: entry_point.to_string(),
            id: None,
        }
    }

    fn initialize(
        &mut self,
        ctx: &mut dyn GpuContext,
        stage: ShaderStage,
        layout: VertexLayout,
    ) -> Result<ShaderId> {
        if let Some(id) = self.id {
            return Ok(id);
        }
        let id = ctx.create_shader(&ShaderDescriptor {
            label: &self.name,
            source: &self.source,
            entry_point: &self.entry_point,
            stage,
            layout,
        })?;
        log::debug!("compiled {:?} shader `{}`", stage, self.name);
        self.id = Some(id);
        Ok(id)
    }
}

#[derive(Debug, Clone)]
pub struct VertexShader {
    program: Program,
    layout: VertexLayout,
}

impl VertexShader {
    pub fn new(
        name: &str,
        source: impl Into<String>,
        entry_point: &str,
        layout: VertexLayout,
    ) -> Self {
        Self {
            program: Program::new(name, source, entry_point),
            layout,
        }
    }

    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    /// The compiled shader, once [`initialize`](Self::initialize) succeeded.
    pub fn id(&self) -> Option<ShaderId> {
        self.program.id
    }

    /// Compiles the shader. Does nothing if it already is.
    pub fn initialize(&mut self, ctx: &mut dyn GpuContext) -> Result<ShaderId> {
        self.program
            .initialize(ctx, ShaderStage::Vertex, self.layout)
    }
}

#[derive(Debug, Clone)]
pub struct PixelShader {
    program: Program,
}

impl PixelShader {
    pub fn new(name: &str, source: impl Into<String>, entry_point: &str) -> Self {
        Self {
            program: Program::new(name, source, entry_point),
        }
    }

    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn id(&self) -> Option<ShaderId> {
        self.program.id
    }

    pub fn initialize(&mut self, ctx: &mut dyn GpuContext) -> Result<ShaderId> {
        self.program
            .initialize(ctx, ShaderStage::Pixel, VertexLayout::Standard)
    }
}

fn with_common(source: &str) -> String {
    format!("{}\n{}", COMMON, source)
}

/// Both stages of a built-in shader file.
pub fn builtin_pair(name: &str, source: &str) -> (VertexShader, PixelShader) {
    let source = with_common(source);
    (
        VertexShader::new(name, source.clone(), VERTEX_ENTRY_POINT, VertexLayout::Standard),
        PixelShader::new(name, source, PIXEL_ENTRY_POINT),
    )
}

pub fn phong() -> (VertexShader, PixelShader) {
    builtin_pair("phong", PHONG)
}

pub fn voxel() -> (VertexShader, PixelShader) {
    builtin_pair("voxel", VOXEL)
}

/// Vertex stage for skinned models, shaded by the phong pixel shader.
pub fn skinning() -> VertexShader {
    VertexShader::new(
        "skinning",
        with_common(SKINNING),
        VERTEX_ENTRY_POINT,
        VertexLayout::Skinned,
    )
}

pub fn skybox() -> (VertexShader, PixelShader) {
    builtin_pair("skybox", SKYBOX)
}

/// The depth-only pair the shadow pass draws every object with.
pub fn shadow() -> (VertexShader, PixelShader) {
    builtin_pair("shadow", SHADOW)
}

#[allow(clippy::too_many_arguments)]
pub fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    depth_format: Option<wgpu::TextureFormat>,
    vertex_layouts: &[wgpu::VertexBufferLayout],
    vertex: (&wgpu::ShaderModule, &str),
    fragment: (&wgpu::ShaderModule, &str),
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some("Render Pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: vertex.0,
            entry_point: Some(vertex.1),
            buffers: vertex_layouts,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment.0,
            entry_point: Some(fragment.1),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            // left-handed, clockwise front faces
            front_face: wgpu::FrontFace::Cw,
            cull_mode: Some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::Less),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::record::RecordingContext;

    #[test]
    fn builtins_carry_the_common_declarations() {
        for (vertex, pixel) in [phong(), voxel(), skybox(), shadow()] {
            assert!(vertex.program.source.starts_with(COMMON));
            assert!(vertex.program.source.contains("fn vs_main"));
            assert!(pixel.program.source.contains("fn fs_main"));
            assert_eq!(vertex.layout(), VertexLayout::Standard);
        }
        assert_eq!(skinning().layout(), VertexLayout::Skinned);
    }

    #[test]
    fn initialize_compiles_once() {
        let mut ctx = RecordingContext::new(4, 4);
        let (mut vertex, mut pixel) = phong();
        assert!(vertex.id().is_none());
        let id = vertex.initialize(&mut ctx).unwrap();
        assert_eq!(vertex.initialize(&mut ctx).unwrap(), id);
        let pixel_id = pixel.initialize(&mut ctx).unwrap();
        assert_eq!(ctx.shader_stage(id), Some(ShaderStage::Vertex));
        assert_eq!(ctx.shader_stage(pixel_id), Some(ShaderStage::Pixel));
        assert_eq!(ctx.shader_label(pixel_id), Some("phong"));
    }

    #[test]
    fn missing_entry_point_fails() {
        let mut ctx = RecordingContext::new(4, 4);
        let mut shader = PixelShader::new("broken", "fn main() {}", PIXEL_ENTRY_POINT);
        assert!(shader.initialize(&mut ctx).is_err());
        assert!(shader.id().is_none());
    }
}
