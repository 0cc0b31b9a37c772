//! The shader-graph compiler.
//!
//! [`Compiler`] sorts the active state descriptors into per-feature slots,
//! builds the fragment graph first, assembles it, then builds the vertex
//! graph against the varying interface the fragment stage declared. The
//! assembler runs the traversal passes (defines, extensions, global
//! declarations, functions, body) over one post-order walk and hands the
//! concatenated text to a [`ShaderProcessor`].

pub mod context;
mod fragment;
mod vertex;

use std::collections::{BTreeMap, HashSet};

use anyhow::{Result, bail};

use crate::codegen::{self, DeclSection};
use crate::graph::{NodeId, NodeKind};
use crate::processor::ShaderProcessor;
use crate::state::{
    Light, Material, MorphAttribute, ShadowReceiver, ShadowTexture, SkinningAttribute,
    StateAttribute, Texture, TextureAttribute, TextureTarget,
};
use crate::types::ShaderStage;
use context::StageContext;

/// The two linked sources one compilation produces.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub vertex: String,
    pub fragment: String,
}

struct TextureEntry {
    unit: usize,
    shadow: bool,
    target: TextureTarget,
}

/// One compilation setup. Build it from the active descriptors, tweak the
/// flags, then call [`compile`](Compiler::compile); reuse across different
/// state requires a fresh instance.
pub struct Compiler {
    material: Option<Material>,
    lights: Vec<Light>,
    shadows: Vec<ShadowReceiver>,
    skinning: Option<SkinningAttribute>,
    morph: Option<MorphAttribute>,
    is_billboard: bool,

    textures: Vec<Option<Texture>>,
    shadow_textures: Vec<Option<ShadowTexture>>,
    textures_by_name: BTreeMap<String, TextureEntry>,

    invariant_position: bool,
    custom_fragment_shader: bool,
}

impl Compiler {
    /// `texture_units` is indexed by texture unit; empty slots are `None`.
    pub fn new(attributes: &[StateAttribute], texture_units: &[Option<TextureAttribute>]) -> Self {
        let mut compiler = Self {
            material: None,
            lights: Vec::new(),
            shadows: Vec::new(),
            skinning: None,
            morph: None,
            is_billboard: false,
            textures: vec![None; texture_units.len()],
            shadow_textures: vec![None; texture_units.len()],
            textures_by_name: BTreeMap::new(),
            invariant_position: false,
            custom_fragment_shader: false,
        };
        compiler.init_attributes(attributes);
        compiler.init_texture_attributes(texture_units);
        compiler
    }

    fn init_attributes(&mut self, attributes: &[StateAttribute]) {
        for attribute in attributes {
            match attribute {
                StateAttribute::Material(material) => self.material = Some(material.clone()),
                StateAttribute::Light(light) => self.lights.push(light.clone()),
                StateAttribute::ShadowReceiver(shadow) => self.shadows.push(shadow.clone()),
                StateAttribute::Skinning(skinning) => self.skinning = Some(skinning.clone()),
                StateAttribute::Morph(morph) => self.morph = Some(morph.clone()),
                StateAttribute::Billboard => self.is_billboard = true,
            }
        }
    }

    fn init_texture_attributes(&mut self, texture_units: &[Option<TextureAttribute>]) {
        for (unit, slot) in texture_units.iter().enumerate() {
            match slot {
                Some(TextureAttribute::Texture(texture)) => {
                    let name = texture
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Texture{unit}"));
                    self.textures[unit] = Some(texture.clone());
                    self.textures_by_name.insert(
                        name,
                        TextureEntry {
                            unit,
                            shadow: false,
                            target: texture.target,
                        },
                    );
                }
                Some(TextureAttribute::Shadow(shadow)) => {
                    let name = shadow
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Texture{unit}"));
                    self.shadow_textures[unit] = Some(shadow.clone());
                    self.textures_by_name.insert(
                        name,
                        TextureEntry {
                            unit,
                            shadow: true,
                            target: TextureTarget::Texture2d,
                        },
                    );
                }
                None => {}
            }
        }
    }

    /// Emit `invariant gl_Position;` in the vertex stage.
    pub fn set_invariant_position(&mut self, invariant: bool) {
        self.invariant_position = invariant;
    }

    /// Escape hatch for overriding compilers that build their own fragment
    /// stage: lets the vertex build introduce varyings.
    pub fn set_custom_fragment_shader(&mut self, custom: bool) {
        self.custom_fragment_shader = custom;
    }

    pub(crate) fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub(crate) fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub(crate) fn shadows(&self) -> &[ShadowReceiver] {
        &self.shadows
    }

    pub(crate) fn skinning(&self) -> Option<&SkinningAttribute> {
        self.skinning.as_ref()
    }

    pub(crate) fn morph(&self) -> Option<&MorphAttribute> {
        self.morph.as_ref()
    }

    pub(crate) fn is_billboard(&self) -> bool {
        self.is_billboard
    }

    pub(crate) fn shadow_texture(&self, unit: usize) -> Option<&ShadowTexture> {
        self.shadow_textures.get(unit)?.as_ref()
    }

    /// Units carrying a shadow map rendered for the given light.
    pub(crate) fn shadow_texture_units(
        &self,
        light_number: u32,
    ) -> impl Iterator<Item = usize> + '_ {
        self.shadow_textures
            .iter()
            .enumerate()
            .filter(move |(_, slot)| {
                slot.as_ref()
                    .is_some_and(|texture| texture.light_unit == light_number)
            })
            .map(|(unit, _)| unit)
    }

    pub(crate) fn texture_unit(&self, name: &str) -> Option<usize> {
        self.textures_by_name.get(name).map(|entry| entry.unit)
    }

    pub(crate) fn texture_target(&self, name: &str) -> Option<TextureTarget> {
        self.textures_by_name.get(name).map(|entry| entry.target)
    }

    /// Names of the bound color textures, in name order.
    pub(crate) fn color_texture_names(&self) -> Vec<String> {
        self.textures_by_name
            .iter()
            .filter(|(_, entry)| !entry.shadow)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Name of the color texture on the lowest bound unit, the one whose
    /// alpha channel drives transparency.
    pub(crate) fn first_color_texture_name(&self) -> Option<String> {
        for (unit, slot) in self.textures.iter().enumerate() {
            if let Some(texture) = slot {
                return Some(
                    texture
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Texture{unit}")),
                );
            }
        }
        None
    }

    fn shader_name(&self) -> &'static str {
        if self.material.is_some() {
            "ForgeCompiler"
        } else {
            "NoMaterialForgeCompiler"
        }
    }

    fn shader_name_root(&self, ctx: &mut StageContext) -> NodeId {
        ctx.add_node(NodeKind::Define {
            name: "SHADER_NAME".to_string(),
            value: self.shader_name().to_string(),
        })
    }

    /// Build both programs. Fragment first: its graph decides the varying
    /// interface the vertex build must honor.
    pub fn compile(&self, processor: &dyn ShaderProcessor) -> Result<CompiledProgram> {
        let mut fragment_ctx = StageContext::fragment();
        let mut roots = fragment::build(self, &mut fragment_ctx)?;
        roots.push(self.shader_name_root(&mut fragment_ctx));
        let fragment_source = self.create_shader_from_graphs(&mut fragment_ctx, &roots, processor)?;

        let varyings = fragment_ctx.varying_set();

        let mut vertex_ctx = StageContext::vertex(&varyings, self.custom_fragment_shader);
        let mut roots = vertex::build(self, &mut vertex_ctx)?;
        roots.push(self.shader_name_root(&mut vertex_ctx));
        let vertex_source = self.create_shader_from_graphs(&mut vertex_ctx, &roots, processor)?;

        Ok(CompiledProgram {
            vertex: vertex_source,
            fragment: fragment_source,
        })
    }

    fn create_shader_from_graphs(
        &self,
        ctx: &mut StageContext,
        roots: &[NodeId],
        processor: &dyn ShaderProcessor,
    ) -> Result<String> {
        if roots.is_empty() {
            bail!("shader without any final node output (need at least one)");
        }

        // One walk fixes the order for every pass.
        let mut traversed = HashSet::new();
        let mut order: Vec<NodeId> = Vec::new();
        ctx.graph
            .visit_post_order(roots, &mut traversed, &mut |id| order.push(id));
        for &id in &order {
            ctx.compiled.insert(id);
        }

        // Defines and extensions, one contribution per node kind; the first
        // instance wins, like the function pass below.
        let mut defines: Vec<String> = Vec::new();
        let mut extensions: Vec<String> = Vec::new();
        let mut define_kinds: HashSet<&'static str> = HashSet::new();
        for &id in &order {
            let d = codegen::defines(&ctx.graph, id);
            let e = codegen::extensions(&ctx.graph, id);
            if d.is_none() && e.is_none() {
                continue;
            }
            if !define_kinds.insert(ctx.graph.node(id).kind.tag()) {
                continue;
            }
            defines.extend(d.unwrap_or_default());
            extensions.extend(e.unwrap_or_default());
        }

        // Global declarations, one per node instance, bucketed and sorted.
        let mut sections: BTreeMap<DeclSection, Vec<String>> = BTreeMap::new();
        for &id in &order {
            if let Some((section, text)) = codegen::global_declaration(&ctx.graph, id) {
                sections.entry(section).or_default().push(text);
            }
        }
        for declarations in sections.values_mut() {
            declarations.sort();
        }
        if ctx.stage == ShaderStage::Vertex {
            // The position attribute leads, silencing driver warnings about
            // attribute ordering.
            if let Some(attributes) = sections.get_mut(&DeclSection::Attributes) {
                if let Some(at) = attributes
                    .iter()
                    .position(|decl| decl.ends_with(" Vertex;"))
                {
                    let vertex = attributes.remove(at);
                    attributes.insert(0, vertex);
                }
            }
        }

        // Function bodies, one per node kind.
        let mut function_kinds: HashSet<&'static str> = HashSet::new();
        let mut functions: Vec<String> = Vec::new();
        for &id in &order {
            let tag = ctx.graph.node(id).kind.tag();
            if !function_kinds.insert(tag) {
                continue;
            }
            if let Some(text) = codegen::global_function_declaration(&ctx.graph, id) {
                functions.push(text);
            }
        }

        let mut body: Vec<String> = Vec::new();
        for &id in &order {
            if let Some(statement) = codegen::statement(&ctx.graph, id)? {
                if let Some(comment) = &ctx.graph.node(id).comment {
                    body.push(format!("// {comment}"));
                }
                body.push(statement);
            }
        }

        let mut text = String::from("\n");
        for declarations in sections.values() {
            text.push_str(&declarations.join("\n"));
            text.push_str("\n\n");
        }
        if ctx.stage == ShaderStage::Vertex && self.invariant_position {
            text.push_str("invariant gl_Position;\n\n");
        }
        text.push_str(&functions.join("\n"));
        text.push_str("\nvoid main() {\n");
        let locals = ctx.local_declarations();
        if !locals.is_empty() {
            text.push_str("// vars\n");
            text.push_str(&locals.join("\n"));
            text.push_str("\n// end vars\n");
        }
        text.push_str(&body.join("\n"));
        text.push_str("\n}");

        let shader = processor.process_shader(&text, &defines, &extensions, ctx.stage);

        self.report_unreached(ctx);
        log::debug!("{} shader:\n{shader}", ctx.stage.as_str());

        Ok(shader)
    }

    /// Requested-but-never-wired nodes do not corrupt the program, but they
    /// usually point at a builder bug, so name them.
    fn report_unreached(&self, ctx: &StageContext) {
        let mut unreached: Vec<NodeId> = ctx.active.difference(&ctx.compiled).copied().collect();
        unreached.sort();
        for id in unreached {
            let node = ctx.graph.node(id);
            let what = match &node.kind {
                NodeKind::Variable { ty, name, .. } => format!("Variable {name} ({ty})"),
                other => other.tag().to_string(),
            };
            log::warn!(
                "{} node requested but never compiled: {id:?} {what}",
                ctx.stage.as_str()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::TextProcessor;
    use crate::state::LightKind;

    #[test]
    fn no_material_compiles_to_magenta_placeholder() {
        let compiler = Compiler::new(&[], &[]);
        let program = compiler.compile(&TextProcessor::new()).unwrap();
        assert!(program.fragment.contains("vec4(1.0, 0.0, 1.0, 0.7)"));
        assert!(program.fragment.contains("gl_FragColor"));
        assert!(program.vertex.contains("gl_Position"));
    }

    #[test]
    fn shader_name_reflects_material_presence() {
        let without = Compiler::new(&[], &[]);
        assert_eq!(without.shader_name(), "NoMaterialForgeCompiler");

        let with = Compiler::new(&[StateAttribute::Material(Material::default())], &[]);
        assert_eq!(with.shader_name(), "ForgeCompiler");
    }

    #[test]
    fn attributes_sort_into_feature_slots() {
        let attributes = vec![
            StateAttribute::Light(Light::new(0, LightKind::Directional)),
            StateAttribute::Light(Light::new(1, LightKind::Point)),
            StateAttribute::Material(Material::default()),
            StateAttribute::Billboard,
        ];
        let compiler = Compiler::new(&attributes, &[]);
        assert_eq!(compiler.lights().len(), 2);
        assert!(compiler.material().is_some());
        assert!(compiler.is_billboard());
    }

    #[test]
    fn unnamed_textures_get_unit_names() {
        let units = vec![
            None,
            Some(TextureAttribute::Texture(Texture::default())),
        ];
        let compiler = Compiler::new(&[], &units);
        assert_eq!(compiler.texture_unit("Texture1"), Some(1));
        assert_eq!(compiler.color_texture_names(), vec!["Texture1"]);
        assert_eq!(compiler.first_color_texture_name().as_deref(), Some("Texture1"));
    }
}
