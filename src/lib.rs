//! Declarative shader-graph compiler: rendering state in, GLSL programs out.
//!
//! Given the active rendering-state descriptors (material, lights, shadow
//! receivers, textures, skinning/morph targets, billboard flag), the
//! [`Compiler`] synthesizes a matching pair of GLSL ES 1.0 programs with no
//! unused code, no duplicate declarations, and an identical varying
//! interface between the two stages.
//!
//! The crate is organized into several modules:
//! - `types`: Core type definitions (GlslType, ShaderStage)
//! - `state`: Rendering-state descriptors and their uniform maps
//! - `graph`: The node arena and the post-order traversal
//! - `codegen`: Per-node-kind GLSL emission
//! - `compiler`: Stage builders, variable table and assembler
//! - `processor`: Final text pass (version, precision, defines, includes)
//! - `shaderlib`: Built-in GLSL function library
//!
//! The main entry points are:
//! - [`Compiler::compile`]: build both stages from the active state
//! - [`TextProcessor`]: the default include-resolving post-processor
//!
//! ```no_run
//! use glslforge::{Compiler, Light, LightKind, Material, StateAttribute, TextProcessor};
//!
//! let attributes = vec![
//!     StateAttribute::Material(Material::default()),
//!     StateAttribute::Light(Light::new(0, LightKind::Directional)),
//! ];
//! let compiler = Compiler::new(&attributes, &[]);
//! let program = compiler.compile(&TextProcessor::new())?;
//! println!("{}", program.fragment);
//! # anyhow::Ok(())
//! ```

pub mod codegen;
pub mod compiler;
pub mod graph;
pub mod processor;
pub mod shaderlib;
pub mod state;
pub mod types;

pub use compiler::context::{StageContext, VaryingSet};
pub use compiler::{CompiledProgram, Compiler};
pub use processor::{ShaderProcessor, TextProcessor};
pub use state::{
    Light, LightKind, Material, MorphAttribute, ShadowAlgorithm, ShadowReceiver, ShadowTexture,
    SkinningAttribute, StateAttribute, Texture, TextureAttribute, TextureTarget, UniformSpec,
};
pub use types::{GlslType, ShaderStage};
