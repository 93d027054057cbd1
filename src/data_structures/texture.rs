//! Image textures.
//!
//! A [`Texture`] keeps its decoded RGBA pixels on the CPU until it is
//! initialized against a [`GpuContext`], which uploads it once and creates
//! the sampler it is read with. Textures are shared between materials with
//! `Arc`, so initialization works through `&self`.

use std::sync::OnceLock;

use anyhow::*;
use image::{GenericImageView, ImageFormat, load_from_memory_with_format};

use crate::context::{
    AddressMode, FilterMode, GpuContext, SamplerDescriptor, SamplerId, TextureDescriptor,
    TextureFormat, TextureId, TextureUsage,
};

/// Handles of an uploaded texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: TextureId,
    pub sampler: SamplerId,
}

#[derive(Debug)]
pub struct Texture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Linear for normal maps, sRGB for color maps.
    pub format: TextureFormat,
    rgba: Vec<u8>,
    binding: OnceLock<TextureBinding>,
}

impl Texture {
    /// A 1x1 texture of one color.
    pub fn solid(label: &str, rgba: [u8; 4]) -> Self {
        Self {
            label: label.to_string(),
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            rgba: rgba.to_vec(),
            binding: OnceLock::new(),
        }
    }

    /// Create a default normal map (neutral blue, representing no deformation).
    pub fn default_normal_map() -> Self {
        Self::solid("default normal map", [127, 127, 255, 255])
    }

    /// Load a texture from raw byte data (image file contents).
    ///
    /// # Arguments
    ///
    /// * `bytes` represent raw image file data (PNG, JPEG, etc.)
    /// * `label` is used as a debug name for the GPU resource
    /// * `format`  is an optional file format hint (e.g., "png"). If None, auto-detect.
    /// * `is_normal_map` toggles between sRGB (false) and linear (true) color space
    pub fn from_bytes(
        bytes: &[u8],
        label: &str,
        format: Option<&str>,
        is_normal_map: bool,
    ) -> Result<Self> {
        let img = match format {
            None => image::load_from_memory(bytes)?,
            Some(fmt) => {
                let format = ImageFormat::from_extension(fmt)
                    .with_context(|| format!("unknown image format `{}`", fmt))?;
                load_from_memory_with_format(bytes, format)?
            }
        };
        Ok(Self::from_image(&img, label, is_normal_map))
    }

    pub fn from_image(img: &image::DynamicImage, label: &str, is_normal_map: bool) -> Self {
        let (width, height) = img.dimensions();
        let format = if is_normal_map {
            TextureFormat::Rgba8Unorm
        } else {
            TextureFormat::Rgba8UnormSrgb
        };
        Self {
            label: label.to_string(),
            width,
            height,
            format,
            rgba: img.to_rgba8().into_raw(),
            binding: OnceLock::new(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.rgba
    }

    /// The uploaded handles, if [`initialize`](Self::initialize) ran.
    pub fn binding(&self) -> Option<TextureBinding> {
        self.binding.get().copied()
    }

    /// Uploads the pixels and creates a wrapping linear sampler. Does nothing
    /// if the texture was already uploaded.
    pub fn initialize(&self, ctx: &mut dyn GpuContext) -> Result<TextureBinding> {
        if let Some(binding) = self.binding.get() {
            return Ok(*binding);
        }
        let texture = ctx.create_texture(&TextureDescriptor {
            label: &self.label,
            width: self.width,
            height: self.height,
            format: self.format,
            usage: TextureUsage {
                render_target: false,
                shader_resource: true,
            },
            data: Some(&self.rgba),
        })?;
        let sampler = ctx.create_sampler(&SamplerDescriptor {
            label: &self.label,
            address: AddressMode::Wrap,
            filter: FilterMode::Linear,
        })?;
        let binding = TextureBinding { texture, sampler };
        let _ = self.binding.set(binding);
        log::debug!("uploaded texture `{}` ({}x{})", self.label, self.width, self.height);
        Ok(binding)
    }
}
