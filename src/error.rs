//! Engine-wide error type.
//!
//! Every fallible engine operation reports an [`EngineError`]. Errors coming
//! out of the graphics backend or the asset loaders are carried verbatim in
//! [`EngineError::Device`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a {kind} named `{name}` is already registered")]
    DuplicateName { kind: &'static str, name: String },

    #[error("no {kind} named `{name}` is registered")]
    UnknownName { kind: &'static str, name: String },

    #[error("no main scene has been selected")]
    NoMainScene,

    #[error("main scene `{0}` is not registered")]
    MainSceneNotRegistered(String),

    #[error("light index {index} is out of range, a scene holds {count} lights")]
    LightIndexOutOfRange { index: usize, count: usize },

    #[error("mesh {mesh} references material {material} but only {count} materials exist")]
    InvalidMaterialIndex {
        mesh: usize,
        material: usize,
        count: usize,
    },

    #[error("the shadow map shaders have not been set")]
    MissingShadowShaders,

    #[error("the renderer has not been initialized")]
    NotInitialized,

    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
