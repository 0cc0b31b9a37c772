//! The shader computation graph: an arena of nodes plus the generic
//! post-order traversal every emission pass reuses.
//!
//! Nodes are addressed by [`NodeId`] handles into a [`NodeGraph`] arena, so
//! graphs are acyclic by construction as long as wiring only references
//! already-created nodes. A node either *is* a variable (a named GLSL
//! binding or temporary) or an operation that reads variable inputs and
//! writes variable outputs. Wiring an operation's outputs auto-links the
//! operation as an input of each written variable; that back edge is what
//! the dependency traversal follows.

use std::collections::HashSet;

use crate::state::ShadowAlgorithm;
use crate::types::GlslType;

/// Stable handle to a node inside one [`NodeGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Storage class of a variable node. Decides where (and whether) its
/// declaration is emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableScope {
    /// Scratch temporary declared inside `main`.
    Local,
    /// `const` declared inside `main`.
    Constant,
    Uniform,
    Attribute,
    Varying,
    Sampler,
    /// Built-in output (`gl_Position`, `gl_FragColor`, ...), never declared.
    Output,
}

/// Semantic tag of a node. One variant per GLSL statement/declaration
/// template the compiler can emit.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Variable {
        scope: VariableScope,
        ty: GlslType,
        name: String,
        /// Array size for array uniforms.
        size: Option<usize>,
    },
    /// `out = a + b + ...`
    Add,
    /// `out = a * b * ...`
    Mult,
    /// `out = a;`
    Assign,
    /// `out = matrix * vec4(v.xyz, 1.)` (position) or `..., 0.)` (direction).
    MatrixMult {
        position: bool,
        inverse: bool,
        /// When false and the input is vec4, the input alpha is copied back
        /// into the output after the multiply (tangent handling).
        overwrite_w: bool,
    },
    /// Statement template with `%name` placeholders resolved against the
    /// node's named inputs and outputs.
    InlineCode { code: String },
    /// `out = vec4(color.rgb, alpha);`
    SetAlpha,
    /// `out.rgb = color.rgb * alpha;`
    PreMultAlpha,
    Normalize,
    /// `out = gl_FrontFacing ? n : -n;`
    FrontNormal,
    Morph { targets: usize },
    Skinning,
    Billboard,
    SunLight,
    SpotLight,
    PointLight,
    HemiLight,
    ShadowReceive {
        algorithm: ShadowAlgorithm,
        defines: Vec<String>,
        extensions: Vec<String>,
    },
    /// `out = textureRGBA(sampler, uv.xy);`
    TextureRgba,
    /// `out = textureCubeRGBA(sampler, dir);`
    TextureCubeRgba,
    /// Contributes a `#define NAME value` to the post-processor, no code.
    Define { name: String, value: String },
}

impl NodeKind {
    /// Deduplication tag: passes that must emit once per *kind* (function
    /// declarations, defines, extensions) key off this.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Variable { .. } => "Variable",
            NodeKind::Add => "Add",
            NodeKind::Mult => "Mult",
            NodeKind::Assign => "Assign",
            NodeKind::MatrixMult { position: true, .. } => "MatrixMultPosition",
            NodeKind::MatrixMult { .. } => "MatrixMultDirection",
            NodeKind::InlineCode { .. } => "InlineCode",
            NodeKind::SetAlpha => "SetAlpha",
            NodeKind::PreMultAlpha => "PreMultAlpha",
            NodeKind::Normalize => "Normalize",
            NodeKind::FrontNormal => "FrontNormal",
            NodeKind::Morph { .. } => "Morph",
            NodeKind::Skinning => "Skinning",
            NodeKind::Billboard => "Billboard",
            NodeKind::SunLight => "SunLight",
            NodeKind::SpotLight => "SpotLight",
            NodeKind::PointLight => "PointLight",
            NodeKind::HemiLight => "HemiLight",
            NodeKind::ShadowReceive { .. } => "ShadowReceive",
            NodeKind::TextureRgba => "TextureRgba",
            NodeKind::TextureCubeRgba => "TextureCubeRgba",
            NodeKind::Define { .. } => "Define",
        }
    }
}

/// One node of the computation graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Dependency edges. Operation inputs keep their wiring name so the
    /// emitter can address them; auto-linked producer edges on variables are
    /// unnamed.
    pub inputs: Vec<(Option<String>, NodeId)>,
    pub outputs: Vec<(Option<String>, NodeId)>,
    /// Initialisation expression for local/constant variables.
    pub value: Option<String>,
    /// Optional human-readable comment emitted above the statement.
    pub comment: Option<String>,
}

impl Node {
    pub fn input(&self, name: &str) -> Option<NodeId> {
        self.inputs
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .map(|(_, id)| *id)
    }

    pub fn output(&self, name: &str) -> Option<NodeId> {
        self.outputs
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .map(|(_, id)| *id)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.kind, NodeKind::Variable { .. })
    }
}

/// Arena owning every node of one stage build.
#[derive(Default, Debug)]
pub struct NodeGraph {
    nodes: Vec<Node>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            value: None,
            comment: None,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Initialisation expression for a local/constant variable.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<String>) -> NodeId {
        self.node_mut(id).value = Some(value.into());
        id
    }

    pub fn set_comment(&mut self, id: NodeId, comment: impl Into<String>) {
        self.node_mut(id).comment = Some(comment.into());
    }

    /// Name of a variable node. Operations have no GLSL spelling of their
    /// own, so asking for one is a wiring bug.
    pub fn var_name(&self, id: NodeId) -> &str {
        match &self.node(id).kind {
            NodeKind::Variable { name, .. } => name,
            other => panic!("node {:?} ({}) is not a variable", id, other.tag()),
        }
    }

    pub fn var_type(&self, id: NodeId) -> Option<GlslType> {
        match self.node(id).kind {
            NodeKind::Variable { ty, .. } => Some(ty),
            _ => None,
        }
    }

    fn push_input(&mut self, op: NodeId, name: Option<&str>, input: NodeId) {
        debug_assert!(input != op, "node wired as its own input");
        self.node_mut(op).inputs.push((name.map(String::from), input));
    }

    /// Positional inputs (`Add`, `Mult`, `Assign` operands).
    pub fn wire_inputs(&mut self, op: NodeId, inputs: &[NodeId]) -> NodeId {
        for &input in inputs {
            self.push_input(op, None, input);
        }
        op
    }

    /// Named inputs looked up by the emitter templates.
    pub fn wire_named_inputs(&mut self, op: NodeId, inputs: &[(&str, NodeId)]) -> NodeId {
        for &(name, input) in inputs {
            self.push_input(op, Some(name), input);
        }
        op
    }

    /// Single-output wiring. The written variable gains the operation as an
    /// input, which is the edge the traversal follows.
    pub fn wire_output(&mut self, op: NodeId, output: NodeId) -> NodeId {
        self.node_mut(op).outputs.push((None, output));
        self.push_input(output, None, op);
        op
    }

    pub fn wire_named_outputs(&mut self, op: NodeId, outputs: &[(&str, NodeId)]) -> NodeId {
        for &(name, output) in outputs {
            self.node_mut(op).outputs.push((Some(name.to_string()), output));
            self.push_input(output, None, op);
        }
        op
    }

    /// Post-order dependency walk from `roots`.
    ///
    /// Every input of a node is visited before the node itself, and each node
    /// is visited exactly once per pass regardless of fan-in; `traversed`
    /// carries the once-per-pass guarantee and must be fresh for each pass.
    pub fn visit_post_order(
        &self,
        roots: &[NodeId],
        traversed: &mut HashSet<NodeId>,
        visit: &mut dyn FnMut(NodeId),
    ) {
        for &root in roots {
            self.visit_from(root, traversed, visit);
        }
    }

    fn visit_from(
        &self,
        id: NodeId,
        traversed: &mut HashSet<NodeId>,
        visit: &mut dyn FnMut(NodeId),
    ) {
        if !traversed.insert(id) {
            return;
        }
        // Copy the edge list so the visitor may borrow the graph.
        let inputs: Vec<NodeId> = self.node(id).inputs.iter().map(|(_, c)| *c).collect();
        for child in inputs {
            if child != id {
                self.visit_from(child, traversed, visit);
            }
        }
        visit(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(graph: &mut NodeGraph, name: &str) -> NodeId {
        graph.add(NodeKind::Variable {
            scope: VariableScope::Local,
            ty: GlslType::Float,
            name: name.to_string(),
            size: None,
        })
    }

    #[test]
    fn post_order_visits_inputs_first() {
        let mut graph = NodeGraph::new();
        let a = local(&mut graph, "a");
        let b = local(&mut graph, "b");
        let op = graph.add(NodeKind::Assign);
        graph.wire_inputs(op, &[a]);
        graph.wire_output(op, b);

        let mut order = Vec::new();
        let mut traversed = HashSet::new();
        graph.visit_post_order(&[b], &mut traversed, &mut |id| order.push(id));

        let pos = |id| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(op));
        assert!(pos(op) < pos(b));
    }

    #[test]
    fn diamond_dependency_visited_once() {
        // shared -> (left, right) -> sink
        let mut graph = NodeGraph::new();
        let shared = local(&mut graph, "shared");
        let left = local(&mut graph, "left");
        let right = local(&mut graph, "right");
        let sink = local(&mut graph, "sink");

        for &out in &[left, right] {
            let op = graph.add(NodeKind::Assign);
            graph.wire_inputs(op, &[shared]);
            graph.wire_output(op, out);
        }
        let join = graph.add(NodeKind::Add);
        graph.wire_inputs(join, &[left, right]);
        graph.wire_output(join, sink);

        let mut seen = Vec::new();
        let mut traversed = HashSet::new();
        graph.visit_post_order(&[sink], &mut traversed, &mut |id| seen.push(id));

        assert_eq!(seen.iter().filter(|&&id| id == shared).count(), 1);
    }

    #[test]
    fn named_inputs_are_addressable() {
        let mut graph = NodeGraph::new();
        let v = local(&mut graph, "v");
        let m = local(&mut graph, "m");
        let op = graph.add(NodeKind::MatrixMult {
            position: true,
            inverse: false,
            overwrite_w: true,
        });
        graph.wire_named_inputs(op, &[("vec", v), ("matrix", m)]);

        assert_eq!(graph.node(op).input("vec"), Some(v));
        assert_eq!(graph.node(op).input("matrix"), Some(m));
        assert_eq!(graph.node(op).input("missing"), None);
    }
}
