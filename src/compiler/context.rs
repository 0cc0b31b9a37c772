//! Per-stage compilation state: the variable table and the cache sets.
//!
//! A fresh [`StageContext`] is built for each of the two stage builds instead
//! of clearing shared fields, so nothing can leak between stages by accident.
//! The only state that crosses the boundary is the [`VaryingSet`] value the
//! fragment build returns and the vertex build consumes.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Result, bail};

use crate::graph::{NodeGraph, NodeId, NodeKind, VariableScope};
use crate::state::UniformSpec;
use crate::types::{GlslType, ShaderStage};

/// Varying interface declared by the fragment build, keyed by name.
/// Ordered so the vertex build wires them deterministically.
pub type VaryingSet = BTreeMap<String, GlslType>;

/// Uniform nodes created from a state descriptor's uniform map, keyed by the
/// prefixed logical name (`materialdiffuse`, `lightambient`, ...).
pub type UniformNodes = BTreeMap<String, NodeId>;

/// Mutable state of one stage build.
pub struct StageContext {
    pub stage: ShaderStage,
    pub graph: NodeGraph,
    /// Every node requested during this build.
    pub active: HashSet<NodeId>,
    /// Every node whose code was reached by an emission pass.
    pub compiled: HashSet<NodeId>,
    /// Escape hatch for overriding compilers that supply their own fragment
    /// stage: lifts the declared-varying check in the vertex build.
    pub custom_fragment_shader: bool,
    /// Per-stage texel cache, keyed by texture name.
    pub(crate) texture_vars: HashMap<String, NodeId>,

    variables: HashMap<String, NodeId>,
    /// Insertion order of `variables`, which fixes the order of the `main`
    /// declaration block.
    order: Vec<String>,
    varyings: BTreeMap<String, NodeId>,
}

impl StageContext {
    /// Context for the fragment build. Runs first: its graph decides which
    /// varyings exist.
    pub fn fragment() -> Self {
        Self {
            stage: ShaderStage::Fragment,
            graph: NodeGraph::new(),
            active: HashSet::new(),
            compiled: HashSet::new(),
            custom_fragment_shader: false,
            texture_vars: HashMap::new(),
            variables: HashMap::new(),
            order: Vec::new(),
            varyings: BTreeMap::new(),
        }
    }

    /// Context for the vertex build, seeded with the varyings the fragment
    /// build declared. Each persisted varying is recreated as a fresh node
    /// with no wiring, ready to be assigned by the vertex graph.
    pub fn vertex(declared: &VaryingSet, custom_fragment_shader: bool) -> Self {
        let mut ctx = Self {
            stage: ShaderStage::Vertex,
            graph: NodeGraph::new(),
            active: HashSet::new(),
            compiled: HashSet::new(),
            custom_fragment_shader,
            texture_vars: HashMap::new(),
            variables: HashMap::new(),
            order: Vec::new(),
            varyings: BTreeMap::new(),
        };
        for (name, &ty) in declared {
            let id = ctx.add_variable_node(VariableScope::Varying, ty, name.clone(), None);
            ctx.varyings.insert(name.clone(), id);
        }
        ctx
    }

    pub fn is_fragment(&self) -> bool {
        self.stage == ShaderStage::Fragment
    }

    /// Create any node and mark it requested.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = self.graph.add(kind);
        self.active.insert(id);
        id
    }

    fn add_variable_node(
        &mut self,
        scope: VariableScope,
        ty: GlslType,
        name: String,
        size: Option<usize>,
    ) -> NodeId {
        let id = self.add_node(NodeKind::Variable {
            scope,
            ty,
            name: name.clone(),
            size,
        });
        self.variables.insert(name.clone(), id);
        self.order.push(name);
        id
    }

    /// Pure lookup, no creation.
    pub fn get_variable(&self, name: &str) -> Option<NodeId> {
        self.variables.get(name).copied()
    }

    /// The varyings declared so far (fragment) or persisted (vertex).
    pub fn varying_nodes(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.varyings.iter().map(|(name, &id)| (name.as_str(), id))
    }

    /// Snapshot of the varying interface, handed from the fragment build to
    /// the vertex build.
    pub fn varying_set(&self) -> VaryingSet {
        self.varyings
            .iter()
            .map(|(name, &id)| {
                let ty = self
                    .graph
                    .var_type(id)
                    .expect("varying table only holds variable nodes");
                (name.clone(), ty)
            })
            .collect()
    }

    /// Always produces a fresh local. Name collisions get a deepness suffix
    /// (`tmp`, `tmp1`, `tmp2`, ...) rather than erroring: read-only reuse is
    /// only meaningful for uniforms, varyings and samplers, which go through
    /// their own getters.
    pub fn create_variable(&mut self, ty: GlslType, name: Option<&str>) -> NodeId {
        let name = match name {
            None => format!("tmp_{}", self.variables.len()),
            Some(base) if !self.variables.contains_key(base) => base.to_string(),
            Some(base) => {
                let mut deepness = 1usize;
                loop {
                    let candidate = format!("{base}{deepness}");
                    if !self.variables.contains_key(&candidate) {
                        break candidate;
                    }
                    deepness += 1;
                }
            }
        };
        self.add_variable_node(VariableScope::Local, ty, name, None)
    }

    fn check_existing(&self, id: NodeId, ty: GlslType, name: &str, what: &str) -> Result<NodeId> {
        let existing = self.graph.var_type(id);
        if existing != Some(ty) {
            bail!(
                "same {what} `{name}` requested with different type ({ty} vs {})",
                existing.map(GlslType::glsl).unwrap_or("non-variable")
            );
        }
        Ok(id)
    }

    pub fn get_or_create_uniform(&mut self, ty: GlslType, name: &str) -> Result<NodeId> {
        self.get_or_create_uniform_sized(ty, name, None)
    }

    pub fn get_or_create_uniform_sized(
        &mut self,
        ty: GlslType,
        name: &str,
        size: Option<usize>,
    ) -> Result<NodeId> {
        if name.is_empty() {
            bail!("cannot create unnamed uniform");
        }
        if let Some(id) = self.get_variable(name) {
            return self.check_existing(id, ty, name, "uniform");
        }
        Ok(self.add_variable_node(VariableScope::Uniform, ty, name.to_string(), size))
    }

    /// Create the uniform described by a state descriptor's [`UniformSpec`].
    pub fn get_or_create_uniform_spec(&mut self, spec: &UniformSpec) -> Result<NodeId> {
        self.get_or_create_uniform_sized(spec.ty, &spec.name, spec.size)
    }

    /// Turn a descriptor uniform map into nodes, keyed `prefix + key` so
    /// several active lights/shadows/textures never collide.
    pub fn uniforms_from_map(
        &mut self,
        specs: &[UniformSpec],
        prefix: &str,
    ) -> Result<UniformNodes> {
        let mut nodes = UniformNodes::new();
        for spec in specs {
            let id = self.get_or_create_uniform_spec(spec)?;
            nodes.insert(format!("{prefix}{}", spec.key), id);
        }
        Ok(nodes)
    }

    pub fn get_or_create_attribute(&mut self, ty: GlslType, name: &str) -> Result<NodeId> {
        if self.is_fragment() {
            bail!("no vertex attribute in fragment shader (requested `{name}`)");
        }
        if let Some(id) = self.get_variable(name) {
            return self.check_existing(id, ty, name, "attribute");
        }
        Ok(self.add_variable_node(VariableScope::Attribute, ty, name.to_string(), None))
    }

    pub fn get_or_create_sampler(&mut self, ty: GlslType, name: &str) -> Result<NodeId> {
        if name.is_empty() {
            bail!("no name given for sampler of type {ty}");
        }
        if let Some(id) = self.get_variable(name) {
            return self.check_existing(id, ty, name, "sampler");
        }
        Ok(self.add_variable_node(VariableScope::Sampler, ty, name.to_string(), None))
    }

    /// Varyings are the cross-stage contract, so the rules are the strictest:
    /// a name is mandatory (the other stage must be able to retrieve it), and
    /// the vertex stage may only consume varyings the fragment stage
    /// declared, unless the custom-fragment escape is set.
    pub fn get_or_create_varying(&mut self, ty: GlslType, name: &str) -> Result<NodeId> {
        if name.is_empty() {
            bail!("varyings must be named, anonymous varyings cannot be retrieved");
        }
        if let Some(id) = self.get_variable(name) {
            if !self.varyings.contains_key(name) {
                bail!("`{name}` already exists but was not declared as a varying");
            }
            return self.check_existing(id, ty, name, "varying");
        }
        if self.stage == ShaderStage::Vertex && !self.custom_fragment_shader {
            bail!(
                "varying `{name}` ({ty}) was never declared while building the fragment \
                 graph (overriding compilers may set custom_fragment_shader)"
            );
        }
        let id = self.add_variable_node(VariableScope::Varying, ty, name.to_string(), None);
        self.varyings.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get_or_create_constant(&mut self, ty: GlslType, name: Option<&str>) -> Result<NodeId> {
        let name = match name {
            None => format!("tmp_{}", self.variables.len()),
            Some(name) => {
                if let Some(id) = self.get_variable(name) {
                    return self.check_existing(id, ty, name, "constant");
                }
                name.to_string()
            }
        };
        Ok(self.add_variable_node(VariableScope::Constant, ty, name, None))
    }

    /// `const <ty> <ty>White = <ty>(1.0);`
    pub fn constant_one(&mut self, ty: GlslType) -> Result<NodeId> {
        let name = format!("{ty}White");
        let id = self.get_or_create_constant(ty, Some(&name))?;
        self.graph.set_value(id, format!("{ty}(1.0)"));
        Ok(id)
    }

    /// `const <ty> <ty>Black = <ty>(0.0);`
    pub fn constant_zero(&mut self, ty: GlslType) -> Result<NodeId> {
        let name = format!("{ty}Black");
        let id = self.get_or_create_constant(ty, Some(&name))?;
        self.graph.set_value(id, format!("{ty}(0.0)"));
        Ok(id)
    }

    /// Built-in stage output (`gl_Position`, `gl_PointSize`, `gl_FragColor`).
    /// Not registered in the table: built-ins are never declared.
    pub fn output(&mut self, ty: GlslType, name: &str) -> NodeId {
        self.add_node(NodeKind::Variable {
            scope: VariableScope::Output,
            ty,
            name: name.to_string(),
            size: None,
        })
    }

    /// Declarations for the top of `main`, in table insertion order.
    pub fn local_declarations(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|name| {
                let id = self.variables.get(name)?;
                crate::codegen::local_declaration(&self.graph, *id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_identity_is_per_name() {
        let mut ctx = StageContext::fragment();
        let a = ctx.get_or_create_uniform(GlslType::Vec4, "uColor").unwrap();
        let b = ctx.get_or_create_uniform(GlslType::Vec4, "uColor").unwrap();
        assert_eq!(a, b);

        let err = ctx
            .get_or_create_uniform(GlslType::Vec3, "uColor")
            .unwrap_err();
        assert!(err.to_string().contains("different type"));
    }

    #[test]
    fn local_name_collisions_get_deepness_suffixes() {
        let mut ctx = StageContext::fragment();
        let names: Vec<String> = (0..3)
            .map(|_| {
                let id = ctx.create_variable(GlslType::Float, Some("tmp"));
                ctx.graph.var_name(id).to_string()
            })
            .collect();
        assert_eq!(names, vec!["tmp", "tmp1", "tmp2"]);
    }

    #[test]
    fn unnamed_locals_get_fresh_generated_names() {
        let mut ctx = StageContext::fragment();
        let a = ctx.create_variable(GlslType::Float, None);
        let b = ctx.create_variable(GlslType::Float, None);
        let c = ctx.create_variable(GlslType::Float, None);
        let names: Vec<&str> = [a, b, c].iter().map(|&id| ctx.graph.var_name(id)).collect();
        assert_eq!(names, vec!["tmp_0", "tmp_1", "tmp_2"]);
    }

    #[test]
    fn anonymous_varying_is_rejected() {
        let mut ctx = StageContext::fragment();
        assert!(ctx.get_or_create_varying(GlslType::Vec4, "").is_err());
    }

    #[test]
    fn vertex_stage_cannot_invent_varyings() {
        let mut declared = VaryingSet::new();
        declared.insert("vViewNormal".to_string(), GlslType::Vec3);

        let mut ctx = StageContext::vertex(&declared, false);
        assert!(ctx.get_or_create_varying(GlslType::Vec3, "vViewNormal").is_ok());

        let err = ctx
            .get_or_create_varying(GlslType::Vec4, "vInvented")
            .unwrap_err();
        assert!(err.to_string().contains("never declared"));

        // The escape hatch for overriding compilers lifts the check.
        let mut custom = StageContext::vertex(&declared, true);
        assert!(custom.get_or_create_varying(GlslType::Vec4, "vInvented").is_ok());
    }

    #[test]
    fn varying_round_trips_between_contexts() {
        let mut fragment = StageContext::fragment();
        fragment
            .get_or_create_varying(GlslType::Vec4, "vViewVertex")
            .unwrap();
        fragment
            .get_or_create_varying(GlslType::Vec2, "vTexCoord0")
            .unwrap();

        let set = fragment.varying_set();
        let vertex = StageContext::vertex(&set, false);
        assert!(vertex.get_variable("vViewVertex").is_some());
        assert_eq!(
            vertex.graph.var_type(vertex.get_variable("vTexCoord0").unwrap()),
            Some(GlslType::Vec2)
        );
    }

    #[test]
    fn attribute_rejected_in_fragment_stage() {
        let mut ctx = StageContext::fragment();
        assert!(ctx.get_or_create_attribute(GlslType::Vec3, "Vertex").is_err());
    }

    #[test]
    fn local_declarations_follow_insertion_order() {
        let mut ctx = StageContext::fragment();
        let b = ctx.create_variable(GlslType::Vec3, Some("b"));
        ctx.graph.set_value(b, "vec3(0.0)");
        ctx.create_variable(GlslType::Float, Some("a"));
        ctx.constant_one(GlslType::Float).unwrap();

        assert_eq!(
            ctx.local_declarations(),
            vec![
                "vec3 b = vec3(0.0);",
                "float a;",
                "const float floatWhite = float(1.0);"
            ]
        );
    }
}
