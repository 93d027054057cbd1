/**
 * This module contains all logic for loading meshes, textures and scene
 * descriptions from external files. Paths are relative to `./assets`.
 */
pub mod description;
pub mod mesh;
pub mod primitives;
pub mod skinned;
pub mod texture;

use std::io::{BufReader, Cursor};
use std::path::PathBuf;
use std::sync::Arc;

use crate::data_structures::drawable::Drawable;
use crate::data_structures::model::Material;
use crate::data_structures::texture::Texture;
use crate::resources::texture::{load_obj_materials, load_texture};

fn asset_path(file_name: &str) -> PathBuf {
    std::path::Path::new("./").join("assets").join(file_name)
}

pub async fn load_string(file_name: &str) -> anyhow::Result<String> {
    let path = asset_path(file_name);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| anyhow::anyhow!("reading `{}`: {}", path.display(), e))
}

pub async fn load_binary(file_name: &str) -> anyhow::Result<Vec<u8>> {
    let path = asset_path(file_name);
    tokio::fs::read(&path)
        .await
        .map_err(|e| anyhow::anyhow!("reading `{}`: {}", path.display(), e))
}

/// Loads an obj file with its mtl materials as a static renderable named
/// after the file.
pub async fn load_model_obj(file_name: &str) -> anyhow::Result<Drawable> {
    let obj_text = load_string(file_name).await?;
    let obj_cursor = Cursor::new(obj_text);
    let mut obj_reader = BufReader::new(obj_cursor);

    let (models, obj_materials) = tobj::load_obj_buf_async(
        &mut obj_reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |p| async move {
            match load_string(&p).await {
                Ok(mat_text) => tobj::load_mtl_buf(&mut BufReader::new(Cursor::new(mat_text))),
                Err(e) => {
                    log::error!("{:#}", e);
                    Err(tobj::LoadError::OpenFileFailed)
                }
            }
        },
    )
    .await?;

    let materials = match obj_materials {
        Ok(obj_materials) => load_obj_materials(&obj_materials).await,
        Err(e) => {
            log::warn!("`{}` has no usable materials: {}", file_name, e);
            Vec::new()
        }
    };
    let (geometry, mut meshes) = mesh::merge_obj_meshes(&models, file_name);
    let materials = if materials.is_empty() {
        for mesh in &mut meshes {
            mesh.material_index = 0;
        }
        vec![Material::default()]
    } else {
        materials
    };
    log::debug!(
        "loaded `{}`: {} meshes, {} materials",
        file_name,
        meshes.len(),
        materials.len()
    );
    Ok(Drawable::renderable(file_name, geometry).with_materials(materials, meshes))
}

async fn gltf_texture(
    texture: gltf::Texture<'_>,
    buffers: &[Vec<u8>],
    label: &str,
    is_normal_map: bool,
) -> Option<Arc<Texture>> {
    let texture = match texture.source().source() {
        gltf::image::Source::View { view, mime_type } => {
            let start = view.offset();
            let bytes = buffers
                .get(view.buffer().index())
                .and_then(|b| b.get(start..start + view.length()));
            match bytes {
                Some(bytes) => Texture::from_bytes(
                    bytes,
                    label,
                    mime_type.split('/').next_back(),
                    is_normal_map,
                )
                .map(Arc::new),
                None => Err(anyhow::anyhow!("image view out of bounds")),
            }
        }
        gltf::image::Source::Uri { uri, mime_type } => {
            load_texture(
                uri,
                is_normal_map,
                mime_type.and_then(|mt| mt.split('/').next_back()),
            )
            .await
        }
    };
    match texture {
        Ok(texture) => Some(texture),
        Err(e) => {
            log::error!("texture of `{}` could not be loaded: {:#}", label, e);
            None
        }
    }
}

/// Loads a glTF or glb file as a skinned model with its skeleton and
/// animation clips.
pub async fn load_model_gltf(file_name: &str) -> anyhow::Result<Drawable> {
    let gltf_bytes = load_binary(file_name).await?;
    let gltf = gltf::Gltf::from_reader(BufReader::new(Cursor::new(gltf_bytes)))?;

    let mut buffer_data = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => match gltf.blob.as_deref() {
                Some(blob) => buffer_data.push(blob.to_vec()),
                None => anyhow::bail!("`{}` references a missing binary chunk", file_name),
            },
            gltf::buffer::Source::Uri(uri) => buffer_data.push(load_binary(uri).await?),
        }
    }

    let mut materials = Vec::new();
    for material in gltf.materials() {
        let label = material.name().unwrap_or(file_name);
        let diffuse = match material.pbr_metallic_roughness().base_color_texture() {
            Some(info) => gltf_texture(info.texture(), &buffer_data, label, false).await,
            None => None,
        };
        let normal = match material.normal_texture() {
            Some(normal) => gltf_texture(normal.texture(), &buffer_data, label, true).await,
            None => None,
        };
        materials.push(Material::new(label, diffuse, normal));
    }

    skinned::build_skinned_model(file_name, &gltf.document, &buffer_data, materials)
}

/// A sky box sampling an equirectangular image.
pub async fn load_sky_box(file_name: &str) -> anyhow::Result<Drawable> {
    let texture = load_texture(file_name, false, None).await?;
    Ok(Drawable::sky_box(
        file_name,
        primitives::sky_cube(),
        Material::new(file_name, Some(texture), None),
    ))
}
