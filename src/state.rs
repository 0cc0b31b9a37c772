//! Rendering-state descriptors consumed by the compiler.
//!
//! These are the inbound half of the compiler's boundary: each active
//! descriptor describes one rendering feature (material, light, shadow,
//! skinning, morphing, billboarding, bound textures) and exposes the uniform
//! bindings it contributes. The compiler never reads GPU state; it only turns
//! these maps into `Uniform` variable nodes, prefixing the logical keys
//! (`material`, `light`, `shadow`, `shadowTexture`) so several active lights
//! or shadows never collide.

use serde::{Deserialize, Serialize};

use crate::types::GlslType;

/// One uniform contributed by a state descriptor.
///
/// `key` is the logical, unprefixed name the graph builders look inputs up
/// by; `name` is the GLSL identifier that ends up in the emitted declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformSpec {
    pub key: &'static str,
    pub ty: GlslType,
    pub name: String,
    /// Array size for array uniforms (bone palettes), `None` for scalars.
    pub size: Option<usize>,
}

impl UniformSpec {
    pub fn new(key: &'static str, ty: GlslType, name: impl Into<String>) -> Self {
        Self {
            key,
            ty,
            name: name.into(),
            size: None,
        }
    }

    pub fn array(key: &'static str, ty: GlslType, name: impl Into<String>, size: usize) -> Self {
        Self {
            key,
            ty,
            name: name.into(),
            size: Some(size),
        }
    }
}

/// Phong-style surface description.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Material {
    /// When set, the material contributes an emission term that is added to
    /// the lit color.
    #[serde(default)]
    pub emissive: bool,
}

impl Material {
    pub fn uniforms(&self) -> Vec<UniformSpec> {
        let mut out = vec![
            UniformSpec::new("ambient", GlslType::Vec4, "uMaterialAmbient"),
            UniformSpec::new("diffuse", GlslType::Vec4, "uMaterialDiffuse"),
            UniformSpec::new("specular", GlslType::Vec4, "uMaterialSpecular"),
            UniformSpec::new("shininess", GlslType::Float, "uMaterialShininess"),
        ];
        if self.emissive {
            out.push(UniformSpec::new(
                "emission",
                GlslType::Vec4,
                "uMaterialEmission",
            ));
        }
        out
    }
}

/// The shading model a light node compiles down to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightKind {
    Directional,
    Spot,
    Point,
    Hemisphere,
}

/// One active light. `light_number` ties the light to its shadow receiver
/// and shadow textures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Light {
    pub light_number: u32,
    pub kind: LightKind,
}

impl Light {
    pub fn new(light_number: u32, kind: LightKind) -> Self {
        Self { light_number, kind }
    }

    /// The uniform map is identical for every light kind; the per-kind light
    /// nodes simply wire the subset they shade with.
    pub fn uniforms(&self) -> Vec<UniformSpec> {
        let n = self.light_number;
        vec![
            UniformSpec::new("ambient", GlslType::Vec4, format!("uLight{n}_ambient")),
            UniformSpec::new("diffuse", GlslType::Vec4, format!("uLight{n}_diffuse")),
            UniformSpec::new("specular", GlslType::Vec4, format!("uLight{n}_specular")),
            UniformSpec::new("ground", GlslType::Vec4, format!("uLight{n}_ground")),
            UniformSpec::new("position", GlslType::Vec4, format!("uLight{n}_position")),
            UniformSpec::new("direction", GlslType::Vec3, format!("uLight{n}_direction")),
            UniformSpec::new(
                "attenuation",
                GlslType::Vec4,
                format!("uLight{n}_attenuation"),
            ),
            UniformSpec::new("spotCutOff", GlslType::Float, format!("uLight{n}_spotCutOff")),
            UniformSpec::new("spotBlend", GlslType::Float, format!("uLight{n}_spotBlend")),
            UniformSpec::new("matrix", GlslType::Mat4, format!("uLight{n}_matrix")),
            UniformSpec::new("invMatrix", GlslType::Mat4, format!("uLight{n}_invMatrix")),
        ]
    }
}

/// Shadow-map comparison algorithm. Selects both the extra uniforms the
/// receive function consumes and the preprocessor defines compiled in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowAlgorithm {
    #[default]
    Pcf,
    Esm,
    Vsm,
    Evsm,
}

/// Marks a light's contribution as attenuated by a shadow-map test.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShadowReceiver {
    /// Index of the light this shadow belongs to.
    pub light_number: u32,
    #[serde(default)]
    pub algorithm: ShadowAlgorithm,
}

impl ShadowReceiver {
    pub fn new(light_number: u32) -> Self {
        Self {
            light_number,
            algorithm: ShadowAlgorithm::default(),
        }
    }

    pub fn uniforms(&self) -> Vec<UniformSpec> {
        let n = self.light_number;
        let mut out = vec![UniformSpec::new(
            "bias",
            GlslType::Float,
            format!("uShadow{n}_bias"),
        )];
        match self.algorithm {
            ShadowAlgorithm::Pcf => {}
            ShadowAlgorithm::Esm => {
                out.push(UniformSpec::new(
                    "exponent0",
                    GlslType::Float,
                    format!("uShadow{n}_exponent0"),
                ));
                out.push(UniformSpec::new(
                    "exponent1",
                    GlslType::Float,
                    format!("uShadow{n}_exponent1"),
                ));
            }
            ShadowAlgorithm::Vsm => {
                out.push(UniformSpec::new(
                    "epsilonVSM",
                    GlslType::Float,
                    format!("uShadow{n}_epsilonVSM"),
                ));
            }
            ShadowAlgorithm::Evsm => {
                out.push(UniformSpec::new(
                    "epsilonVSM",
                    GlslType::Float,
                    format!("uShadow{n}_epsilonVSM"),
                ));
                out.push(UniformSpec::new(
                    "exponent0",
                    GlslType::Float,
                    format!("uShadow{n}_exponent0"),
                ));
                out.push(UniformSpec::new(
                    "exponent1",
                    GlslType::Float,
                    format!("uShadow{n}_exponent1"),
                ));
            }
        }
        out
    }

    /// Defines forwarded to the post-processor so the receive function can
    /// compile the matching comparison path.
    pub fn defines(&self) -> Vec<String> {
        match self.algorithm {
            ShadowAlgorithm::Pcf => vec!["#define _PCF".into()],
            ShadowAlgorithm::Esm => vec!["#define _ESM".into()],
            ShadowAlgorithm::Vsm => vec!["#define _VSM".into()],
            ShadowAlgorithm::Evsm => vec!["#define _EVSM".into()],
        }
    }

    pub fn extensions(&self) -> Vec<String> {
        match self.algorithm {
            ShadowAlgorithm::Vsm | ShadowAlgorithm::Evsm => {
                vec!["#extension GL_OES_standard_derivatives : enable".into()]
            }
            _ => Vec::new(),
        }
    }
}

/// Sampler flavor of a color texture. Cube maps are sampled with a vec3
/// direction coordinate instead of a vec2 uv.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureTarget {
    #[default]
    Texture2d,
    CubeMap,
}

/// A color texture bound to a texture unit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Texture {
    /// Optional stable name; unnamed textures are named `Texture<unit>` when
    /// registered.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target: TextureTarget,
}

/// A depth/shadow map bound to a texture unit, produced for one light.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShadowTexture {
    /// The light this map was rendered for.
    pub light_unit: u32,
    #[serde(default)]
    pub name: Option<String>,
}

impl ShadowTexture {
    /// Per-unit uniforms, keyed so the `shadowTexture` prefix lines up with
    /// the receive node's input names.
    pub fn uniforms(&self, unit: usize) -> Vec<UniformSpec> {
        vec![
            UniformSpec::new(
                "MapSize",
                GlslType::Vec4,
                format!("uShadowTexture{unit}_mapSize"),
            ),
            UniformSpec::new(
                "ProjectionMatrix",
                GlslType::Mat4,
                format!("uShadowTexture{unit}_projectionMatrix"),
            ),
            UniformSpec::new(
                "ViewMatrix",
                GlslType::Mat4,
                format!("uShadowTexture{unit}_viewMatrix"),
            ),
            UniformSpec::new(
                "DepthRange",
                GlslType::Vec4,
                format!("uShadowTexture{unit}_depthRange"),
            ),
        ]
    }
}

/// Vertex skinning: bone palette carried as a vec4 array uniform,
/// three rows per bone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkinningAttribute {
    pub bone_count: usize,
}

impl SkinningAttribute {
    pub fn bone_uniform_size(&self) -> usize {
        self.bone_count * 3
    }
}

/// Morph targets: which vertex streams have per-target variants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MorphAttribute {
    pub num_targets: usize,
    #[serde(default)]
    pub morphs_normal: bool,
    #[serde(default)]
    pub morphs_tangent: bool,
}

impl MorphAttribute {
    /// Whether the named vertex stream has morph targets.
    pub fn has_target(&self, stream: &str) -> bool {
        if self.num_targets == 0 {
            return false;
        }
        match stream {
            "Vertex" => true,
            "Normal" => self.morphs_normal,
            "Tangent" => self.morphs_tangent,
            _ => false,
        }
    }
}

/// Closed union of the state descriptors the compiler dispatches on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StateAttribute {
    Material(Material),
    Light(Light),
    ShadowReceiver(ShadowReceiver),
    Skinning(SkinningAttribute),
    Morph(MorphAttribute),
    Billboard,
}

/// What is bound on one texture unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TextureAttribute {
    Texture(Texture),
    Shadow(ShadowTexture),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_uniform_names_carry_the_light_number() {
        let light = Light::new(3, LightKind::Spot);
        let uniforms = light.uniforms();
        assert!(uniforms.iter().all(|u| u.name.starts_with("uLight3_")));
        assert!(uniforms.iter().any(|u| u.key == "spotCutOff"));
    }

    #[test]
    fn shadow_algorithm_selects_extra_uniforms() {
        let pcf = ShadowReceiver::new(0);
        assert_eq!(pcf.uniforms().len(), 1);

        let evsm = ShadowReceiver {
            light_number: 0,
            algorithm: ShadowAlgorithm::Evsm,
        };
        let keys: Vec<_> = evsm.uniforms().iter().map(|u| u.key).collect();
        assert_eq!(keys, vec!["bias", "epsilonVSM", "exponent0", "exponent1"]);
    }

    #[test]
    fn descriptors_deserialize_from_json() {
        let attr: StateAttribute = serde_json::from_str(
            r#"{ "Light": { "light_number": 1, "kind": "Point" } }"#,
        )
        .unwrap();
        match attr {
            StateAttribute::Light(l) => assert_eq!(l.light_number, 1),
            other => panic!("unexpected attribute: {other:?}"),
        }
    }
}
