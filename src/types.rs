//! Core type definitions shared by the graph, the builders and the emitter.

use serde::{Deserialize, Serialize};

/// GLSL value type carried by every variable node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlslType {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
}

impl GlslType {
    /// The GLSL spelling of this type.
    pub fn glsl(self) -> &'static str {
        match self {
            GlslType::Bool => "bool",
            GlslType::Int => "int",
            GlslType::Float => "float",
            GlslType::Vec2 => "vec2",
            GlslType::Vec3 => "vec3",
            GlslType::Vec4 => "vec4",
            GlslType::Mat3 => "mat3",
            GlslType::Mat4 => "mat4",
            GlslType::Sampler2D => "sampler2D",
            GlslType::SamplerCube => "samplerCube",
        }
    }

    /// Component swizzle used when mixing operands of different widths
    /// (`a + b.rgb` style). Scalars and matrices have none.
    pub fn swizzle(self) -> &'static str {
        match self {
            GlslType::Vec2 => ".rg",
            GlslType::Vec3 => ".rgb",
            GlslType::Vec4 => ".rgba",
            _ => "",
        }
    }
}

impl std::fmt::Display for GlslType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.glsl())
    }
}

/// One of the two GLSL program stages produced per compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}
