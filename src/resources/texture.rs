use std::sync::Arc;

use crate::data_structures::model::Material;
use crate::data_structures::texture::Texture;
use crate::resources::load_binary;

pub async fn load_texture(
    file_name: &str,
    is_normal_map: bool,
    format: Option<&str>,
) -> anyhow::Result<Arc<Texture>> {
    let data = load_binary(file_name).await?;
    Ok(Arc::new(Texture::from_bytes(
        &data,
        file_name,
        format,
        is_normal_map,
    )?))
}

/// Loads the textures referenced by an mtl file, all materials at once. A
/// texture that fails to load leaves its slot empty so the renderer falls
/// back to its placeholder.
pub async fn load_obj_materials(obj_materials: &[tobj::Material]) -> Vec<Material> {
    let loads = obj_materials.iter().map(|m| async move {
        let diffuse = match &m.diffuse_texture {
            Some(path) => optional_texture(path, false).await,
            None => {
                log::warn!("material `{}` references no diffuse texture", m.name);
                None
            }
        };
        let normal = match &m.normal_texture {
            Some(path) => optional_texture(path, true).await,
            None => None,
        };
        Material::new(&m.name, diffuse, normal)
    });
    futures::future::join_all(loads).await
}

async fn optional_texture(path: &str, is_normal_map: bool) -> Option<Arc<Texture>> {
    match load_texture(path, is_normal_map, None).await {
        Ok(texture) => Some(texture),
        Err(e) => {
            log::error!("texture `{}` could not be loaded: {:#}", path, e);
            None
        }
    }
}
