//! Offscreen color target that is later sampled as a texture.

use crate::context::{
    AddressMode, FilterMode, GpuContext, RenderTarget, SamplerDescriptor, SamplerId,
    TextureDescriptor, TextureFormat, TextureId, TextureUsage,
};
use crate::error::Result;

/// A 32-bit float RGBA texture usable both as render target and shader
/// resource, plus a clamping linear sampler. The renderer uses one as the
/// shadow map.
///
/// The same texture must never be bound as target and resource at once, so
/// it has to be unbound from its resource slot before it is rendered to.
#[derive(Debug, Clone)]
pub struct RenderTexture {
    width: u32,
    height: u32,
    texture: Option<TextureId>,
    sampler: Option<SamplerId>,
}

impl RenderTexture {
    pub const FORMAT: TextureFormat = TextureFormat::Rgba32Float;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texture: None,
            sampler: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn initialize(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        let texture = ctx.create_texture(&TextureDescriptor {
            label: "render texture",
            width: self.width,
            height: self.height,
            format: Self::FORMAT,
            usage: TextureUsage {
                render_target: true,
                shader_resource: true,
            },
            data: None,
        })?;
        let sampler = ctx.create_sampler(&SamplerDescriptor {
            label: "render texture clamp",
            address: AddressMode::Clamp,
            filter: FilterMode::Linear,
        })?;
        self.texture = Some(texture);
        self.sampler = Some(sampler);
        Ok(())
    }

    /// The texture as a draw destination.
    pub fn render_target(&self) -> Option<RenderTarget> {
        self.texture.map(RenderTarget::Texture)
    }

    /// The texture as a shader resource.
    pub fn shader_resource(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn sampler(&self) -> Option<SamplerId> {
        self.sampler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::record::RecordingContext;

    #[test]
    fn creates_a_dual_use_texture() {
        let mut ctx = RecordingContext::new(320, 240);
        let mut target = RenderTexture::new(320, 240);
        assert!(target.render_target().is_none());

        target.initialize(&mut ctx).unwrap();
        let texture = target.shader_resource().unwrap();
        assert_eq!(target.render_target(), Some(RenderTarget::Texture(texture)));
        assert_eq!(
            ctx.texture_usage(texture),
            Some(TextureUsage {
                render_target: true,
                shader_resource: true
            })
        );
        assert!(target.sampler().is_some());
    }

    #[test]
    fn initialize_propagates_device_errors() {
        let mut ctx = RecordingContext::new(320, 240);
        ctx.fail_creation_after(1);
        let mut target = RenderTexture::new(320, 240);
        assert!(target.initialize(&mut ctx).is_err());
    }
}
