//! Per-kind GLSL emission.
//!
//! Every node kind maps to at most one statement template, one local or
//! global declaration, one kind-keyed function declaration, and optional
//! defines/extensions. The assembler drives these through the traversal
//! passes; nothing here walks the graph itself.

use anyhow::{Result, bail};

use crate::graph::{Node, NodeGraph, NodeId, NodeKind, VariableScope};
use crate::state::ShadowAlgorithm;
use crate::types::GlslType;

/// Declaration bucket. Global declarations are emitted bucket by bucket in
/// this order, lexically sorted within a bucket, instead of relying on
/// post-hoc string reordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeclSection {
    Attributes,
    Uniforms,
    Samplers,
    Varyings,
}

/// `output = func( a, b, c );`
pub fn call_function(output: &str, func: &str, args: &[String]) -> String {
    format!("{output} = {func}( {} );", args.join(", "))
}

fn named_input(node: &Node, key: &str) -> Result<NodeId> {
    match node.input(key) {
        Some(id) => Ok(id),
        None => bail!(
            "shader node {} validation error: input `{key}` is missing",
            node.kind.tag()
        ),
    }
}

fn named_output(node: &Node, key: &str) -> Result<NodeId> {
    match node.output(key) {
        Some(id) => Ok(id),
        None => bail!(
            "shader node {} validation error: output `{key}` is missing",
            node.kind.tag()
        ),
    }
}

fn single_output(node: &Node) -> Result<NodeId> {
    match node.outputs.first() {
        Some((_, id)) => Ok(*id),
        None => bail!("shader node {} has no output wired", node.kind.tag()),
    }
}

/// Spell an input, narrowing vec4 color-like values to `.rgb`.
fn vec3_arg(graph: &NodeGraph, id: NodeId) -> String {
    let name = graph.var_name(id);
    if graph.var_type(id) == Some(GlslType::Vec4) {
        format!("{name}.rgb")
    } else {
        name.to_string()
    }
}

fn arg(graph: &NodeGraph, id: NodeId) -> String {
    graph.var_name(id).to_string()
}

/// In-main declaration for locals and constants. Everything else declares at
/// file scope or not at all.
pub fn local_declaration(graph: &NodeGraph, id: NodeId) -> Option<String> {
    let node = graph.node(id);
    let NodeKind::Variable { scope, ty, name, .. } = &node.kind else {
        return None;
    };
    match scope {
        VariableScope::Local => Some(match &node.value {
            Some(value) => format!("{ty} {name} = {value};"),
            None => format!("{ty} {name};"),
        }),
        VariableScope::Constant => {
            let value = node.value.as_deref()?;
            Some(format!("const {ty} {name} = {value};"))
        }
        _ => None,
    }
}

/// File-scope declaration, keyed per node instance by the caller.
pub fn global_declaration(graph: &NodeGraph, id: NodeId) -> Option<(DeclSection, String)> {
    let node = graph.node(id);
    let NodeKind::Variable { scope, ty, name, size } = &node.kind else {
        return None;
    };
    match scope {
        VariableScope::Uniform => Some((
            DeclSection::Uniforms,
            match size {
                Some(n) => format!("uniform {ty} {name}[{n}];"),
                None => format!("uniform {ty} {name};"),
            },
        )),
        VariableScope::Attribute => {
            Some((DeclSection::Attributes, format!("attribute {ty} {name};")))
        }
        VariableScope::Varying => Some((DeclSection::Varyings, format!("varying {ty} {name};"))),
        VariableScope::Sampler => Some((DeclSection::Samplers, format!("uniform {ty} {name};"))),
        _ => None,
    }
}

/// File-scope function body or include pragma, keyed per node *kind* by the
/// caller (one emission no matter how many instances exist).
pub fn global_function_declaration(graph: &NodeGraph, id: NodeId) -> Option<String> {
    match &graph.node(id).kind {
        NodeKind::Normalize | NodeKind::FrontNormal => {
            Some("#pragma include \"functions.glsl\"".to_string())
        }
        NodeKind::SunLight | NodeKind::SpotLight | NodeKind::PointLight | NodeKind::HemiLight => {
            Some("#pragma include \"lights.glsl\"".to_string())
        }
        NodeKind::ShadowReceive { .. } => {
            Some("#pragma include \"shadows_receive.glsl\"".to_string())
        }
        NodeKind::TextureRgba | NodeKind::TextureCubeRgba => {
            Some("#pragma include \"textures.glsl\"".to_string())
        }
        NodeKind::Skinning => Some("#pragma include \"skinning.glsl\"".to_string()),
        NodeKind::Billboard => Some("#pragma include \"billboard.glsl\"".to_string()),
        NodeKind::Morph { targets } => Some(morph_function(*targets)),
        _ => None,
    }
}

/// The morph blend function is generated to match the target count.
fn morph_function(targets: usize) -> String {
    let mut sig = String::from(
        "vec3 morphTransform( const in vec4 weights, const in vec3 vertex, const in vec3 target0",
    );
    for i in 1..targets {
        sig.push_str(&format!(", const in vec3 target{i}"));
    }
    sig.push_str(" ) {\n");

    let mut body = String::new();
    if targets == 1 {
        body.push_str("    return mix(vertex, target0, weights[0]);\n");
    } else {
        body.push_str("    vec3 vecOut = vertex * (1.0 - ( weights[0]");
        for i in 1..targets {
            body.push_str(&format!(" + weights[{i}]"));
        }
        body.push_str("));\n");
        for i in 0..targets {
            body.push_str(&format!("    vecOut += target{i} * weights[{i}];\n"));
        }
        body.push_str("    return vecOut;\n");
    }
    format!("{sig}{body}}}\n")
}

pub fn defines(graph: &NodeGraph, id: NodeId) -> Option<Vec<String>> {
    match &graph.node(id).kind {
        NodeKind::Define { name, value } => Some(vec![format!("#define {name} {value}")]),
        NodeKind::ShadowReceive { defines, .. } => Some(defines.clone()),
        _ => None,
    }
}

pub fn extensions(graph: &NodeGraph, id: NodeId) -> Option<Vec<String>> {
    match &graph.node(id).kind {
        NodeKind::ShadowReceive { extensions, .. } => Some(extensions.clone()),
        _ => None,
    }
}

/// The statement a node contributes to `void main()`, in dependency order.
/// Variables and defines contribute none.
pub fn statement(graph: &NodeGraph, id: NodeId) -> Result<Option<String>> {
    let node = graph.node(id);
    let text = match &node.kind {
        NodeKind::Variable { .. } | NodeKind::Define { .. } => return Ok(None),

        NodeKind::Add => operator_statement(graph, node, " + ")?,
        NodeKind::Mult => operator_statement(graph, node, "*")?,
        NodeKind::Assign => operator_statement(graph, node, " + ")?,

        NodeKind::MatrixMult {
            position,
            inverse,
            overwrite_w,
        } => matrix_mult_statement(graph, node, *position, *inverse, *overwrite_w)?,

        NodeKind::InlineCode { code } => inline_code_statement(graph, node, code)?,

        NodeKind::SetAlpha => {
            let color = named_input(node, "color")?;
            let alpha = named_input(node, "alpha")?;
            let out = named_output(node, "color")?;
            let alpha_expr = if graph.var_type(alpha) == Some(GlslType::Float) {
                arg(graph, alpha)
            } else {
                format!("{}.a", graph.var_name(alpha))
            };
            format!(
                "{} = vec4( {}.rgb, {} );",
                graph.var_name(out),
                graph.var_name(color),
                alpha_expr
            )
        }

        NodeKind::PreMultAlpha => {
            let color = named_input(node, "color")?;
            let alpha = node.input("alpha").unwrap_or(color);
            let out = named_output(node, "color")?;
            let alpha_expr = if graph.var_type(alpha) == Some(GlslType::Float) {
                arg(graph, alpha)
            } else {
                format!("{}.a", graph.var_name(alpha))
            };
            format!(
                "{}.rgb = {}.rgb * {};",
                graph.var_name(out),
                graph.var_name(color),
                alpha_expr
            )
        }

        NodeKind::Normalize => {
            let vec = named_input(node, "vec")?;
            let out = named_output(node, "vec")?;
            call_function(graph.var_name(out), "normalize", &[arg(graph, vec)])
        }

        NodeKind::FrontNormal => {
            let normal = named_input(node, "normal")?;
            let out = named_output(node, "normal")?;
            let n = graph.var_name(normal);
            format!("{} = gl_FrontFacing ? {n} : -{n};", graph.var_name(out))
        }

        NodeKind::Morph { targets } => {
            let weights = named_input(node, "weights")?;
            let vertex = named_input(node, "vertex")?;
            let out = named_output(node, "out")?;
            let mut args = vec![arg(graph, weights), vec3_arg(graph, vertex)];
            for i in 0..*targets {
                let target = named_input(node, &format!("target{i}"))?;
                args.push(vec3_arg(graph, target));
            }
            call_function(graph.var_name(out), "morphTransform", &args)
        }

        NodeKind::Skinning => {
            // The bone palette is wired as an input only so its uniform
            // declaration is reachable; the library function reads it by name.
            let weights = named_input(node, "weights")?;
            let bones = named_input(node, "bonesIndex")?;
            named_input(node, "matrixPalette")?;
            let out = named_output(node, "mat4")?;
            call_function(
                graph.var_name(out),
                "skeletalTransform",
                &[arg(graph, weights), arg(graph, bones)],
            )
        }

        NodeKind::Billboard => {
            let vertex = named_input(node, "Vertex")?;
            let model_view = named_input(node, "ModelViewMatrix")?;
            let projection = named_input(node, "ProjectionMatrix")?;
            let out = named_output(node, "vec")?;
            call_function(
                graph.var_name(out),
                "billboard",
                &[
                    arg(graph, vertex),
                    arg(graph, model_view),
                    arg(graph, projection),
                ],
            )
        }

        NodeKind::SunLight => light_statement(
            graph,
            node,
            "computeSunLightShading",
            &["lightposition", "lightmatrix"],
            false,
        )?,
        NodeKind::SpotLight => light_statement(
            graph,
            node,
            "computeSpotLightShading",
            &[
                "lightdirection",
                "lightattenuation",
                "lightposition",
                "lightspotCutOff",
                "lightspotBlend",
                "lightmatrix",
                "lightinvMatrix",
            ],
            true,
        )?,
        NodeKind::PointLight => light_statement(
            graph,
            node,
            "computePointLightShading",
            &["lightposition", "lightattenuation", "lightmatrix"],
            true,
        )?,
        NodeKind::HemiLight => hemi_light_statement(graph, node)?,

        NodeKind::ShadowReceive { algorithm, .. } => {
            shadow_receive_statement(graph, node, *algorithm)?
        }

        NodeKind::TextureRgba => {
            let sampler = named_input(node, "sampler")?;
            let uv = named_input(node, "uv")?;
            let out = named_output(node, "color")?;
            call_function(
                graph.var_name(out),
                "textureRGBA",
                &[arg(graph, sampler), format!("{}.xy", graph.var_name(uv))],
            )
        }

        NodeKind::TextureCubeRgba => {
            let sampler = named_input(node, "sampler")?;
            let dir = named_input(node, "uv")?;
            let out = named_output(node, "color")?;
            call_function(
                graph.var_name(out),
                "textureCubeRGBA",
                &[arg(graph, sampler), arg(graph, dir)],
            )
        }
    };
    Ok(Some(text))
}

/// Shared emission for `Add` / `Mult` / `Assign`: the output type's swizzle
/// reconciles operand widths, float operands excepted.
fn operator_statement(graph: &NodeGraph, node: &Node, operator: &str) -> Result<String> {
    let out = single_output(node)?;
    let swizzle = graph.var_type(out).map(GlslType::swizzle).unwrap_or("");

    // Variable outputs have their producing op auto-linked back; here the op
    // itself only ever holds wired variable operands.
    let mut operands = node.inputs.iter().map(|(_, id)| *id);
    let first = operands
        .next()
        .ok_or_else(|| anyhow::anyhow!("shader node {} has no operand", node.kind.tag()))?;

    let mut text = format!("{} = {}{}", graph.var_name(out), graph.var_name(first), swizzle);
    for input in operands {
        text.push_str(operator);
        text.push_str(graph.var_name(input));
        if graph.var_type(input) != Some(GlslType::Float) {
            text.push_str(swizzle);
        }
    }
    text.push(';');
    Ok(text)
}

fn matrix_mult_statement(
    graph: &NodeGraph,
    node: &Node,
    position: bool,
    inverse: bool,
    overwrite_w: bool,
) -> Result<String> {
    let vec = named_input(node, "vec")?;
    let matrix = named_input(node, "matrix")?;
    let out = named_output(node, "vec")?;

    let vec_name = graph.var_name(vec);
    let matrix_name = graph.var_name(matrix);
    let out_name = graph.var_name(out);
    let in_ty = graph.var_type(vec);
    let out_ty = graph.var_type(out);

    // Directions always rebuild the vec4 so w is forced to zero; positions
    // only cast when the input is not already homogeneous.
    let complement = if position { "1." } else { "0." };
    let casted = if !position || in_ty != Some(GlslType::Vec4) {
        format!("vec4({vec_name}.xyz, {complement})")
    } else {
        vec_name.to_string()
    };

    let product = if inverse {
        format!("{casted}*{matrix_name}")
    } else {
        format!("{matrix_name}*{casted}")
    };

    let mut text = if out_ty != Some(GlslType::Vec4) {
        let cast = out_ty.map(GlslType::glsl).unwrap_or("vec4");
        format!("{out_name} = {cast}({product});")
    } else {
        format!("{out_name} = {product};")
    };

    if !overwrite_w && in_ty == Some(GlslType::Vec4) {
        text.push_str(&format!("\n{out_name}.a = {vec_name}.a;"));
    }
    Ok(text)
}

/// Substitute `%name` placeholders against the node's named inputs and
/// outputs. Longer names first so `%colorA` never matches `%color`.
fn inline_code_statement(graph: &NodeGraph, node: &Node, code: &str) -> Result<String> {
    let mut idents: Vec<&str> = Vec::new();
    let bytes = code.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            if end > start {
                let ident = &code[start..end];
                if !idents.contains(&ident) {
                    idents.push(ident);
                }
            }
            i = end;
        } else {
            i += 1;
        }
    }

    idents.sort_by_key(|ident| std::cmp::Reverse(ident.len()));

    let mut text = code.to_string();
    for ident in idents {
        let id = node
            .input(ident)
            .or_else(|| node.output(ident))
            .ok_or_else(|| {
                anyhow::anyhow!("inline code input `{ident}` not provided for: {code}")
            })?;
        text = text.replace(&format!("%{ident}"), graph.var_name(id));
    }
    Ok(text)
}

/// Sun/spot/point calls share the common material/light argument prefix and
/// intermediate-output suffix; `mid_keys` is the per-kind middle section.
fn light_statement(
    graph: &NodeGraph,
    node: &Node,
    func: &str,
    mid_keys: &[&str],
    has_eye_pos: bool,
) -> Result<String> {
    let out = named_output(node, "color")?;
    let mut args = vec![
        arg(graph, named_input(node, "normal")?),
        arg(graph, named_input(node, "eyeVector")?),
        vec3_arg(graph, named_input(node, "materialambient")?),
        vec3_arg(graph, named_input(node, "materialdiffuse")?),
        vec3_arg(graph, named_input(node, "materialspecular")?),
        arg(graph, named_input(node, "materialshininess")?),
        vec3_arg(graph, named_input(node, "lightambient")?),
        vec3_arg(graph, named_input(node, "lightdiffuse")?),
        vec3_arg(graph, named_input(node, "lightspecular")?),
    ];
    for key in mid_keys {
        args.push(arg(graph, named_input(node, key)?));
    }
    if has_eye_pos {
        args.push(arg(graph, named_input(node, "lightEyePos")?));
    }
    args.push(arg(graph, named_input(node, "lightEyeDir")?));
    args.push(arg(graph, named_input(node, "lightNDL")?));
    args.push(arg(graph, named_input(node, "lighted")?));
    Ok(call_function(graph.var_name(out), func, &args))
}

fn hemi_light_statement(graph: &NodeGraph, node: &Node) -> Result<String> {
    let out = named_output(node, "color")?;
    let args = vec![
        arg(graph, named_input(node, "normal")?),
        arg(graph, named_input(node, "eyeVector")?),
        vec3_arg(graph, named_input(node, "materialdiffuse")?),
        vec3_arg(graph, named_input(node, "materialspecular")?),
        arg(graph, named_input(node, "materialshininess")?),
        vec3_arg(graph, named_input(node, "lightdiffuse")?),
        vec3_arg(graph, named_input(node, "lightground")?),
        arg(graph, named_input(node, "lightposition")?),
        arg(graph, named_input(node, "lightmatrix")?),
        arg(graph, named_input(node, "lightEyeDir")?),
        arg(graph, named_input(node, "lightNDL")?),
        arg(graph, named_input(node, "lighted")?),
    ];
    Ok(call_function(
        graph.var_name(out),
        "computeHemiLightShading",
        &args,
    ))
}

fn shadow_receive_statement(
    graph: &NodeGraph,
    node: &Node,
    algorithm: ShadowAlgorithm,
) -> Result<String> {
    let out = named_output(node, "float")?;
    let mut args = vec![
        arg(graph, named_input(node, "lighted")?),
        arg(graph, named_input(node, "shadowTexture")?),
        arg(graph, named_input(node, "shadowTextureMapSize")?),
        arg(graph, named_input(node, "shadowTextureProjectionMatrix")?),
        arg(graph, named_input(node, "shadowTextureViewMatrix")?),
        arg(graph, named_input(node, "shadowTextureDepthRange")?),
        arg(graph, named_input(node, "lightNDL")?),
        arg(graph, named_input(node, "vertexWorld")?),
        arg(graph, named_input(node, "shadowbias")?),
    ];
    match algorithm {
        ShadowAlgorithm::Pcf => {}
        ShadowAlgorithm::Esm => {
            args.push(arg(graph, named_input(node, "shadowexponent0")?));
            args.push(arg(graph, named_input(node, "shadowexponent1")?));
        }
        ShadowAlgorithm::Vsm => {
            args.push(arg(graph, named_input(node, "shadowepsilonVSM")?));
        }
        ShadowAlgorithm::Evsm => {
            args.push(arg(graph, named_input(node, "shadowepsilonVSM")?));
            args.push(arg(graph, named_input(node, "shadowexponent0")?));
            args.push(arg(graph, named_input(node, "shadowexponent1")?));
        }
    }
    Ok(call_function(graph.var_name(out), "computeShadow", &args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::VariableScope;

    fn var(graph: &mut NodeGraph, ty: GlslType, name: &str) -> NodeId {
        graph.add(NodeKind::Variable {
            scope: VariableScope::Local,
            ty,
            name: name.to_string(),
            size: None,
        })
    }

    #[test]
    fn add_swizzles_by_output_type_and_skips_floats() {
        let mut graph = NodeGraph::new();
        let a = var(&mut graph, GlslType::Vec3, "a");
        let f = var(&mut graph, GlslType::Float, "f");
        let out = var(&mut graph, GlslType::Vec3, "out");
        let op = graph.add(NodeKind::Add);
        graph.wire_inputs(op, &[a, f]);
        graph.wire_output(op, out);

        assert_eq!(
            statement(&graph, op).unwrap().unwrap(),
            "out = a.rgb + f;"
        );
    }

    #[test]
    fn matrix_mult_position_keeps_vec4_input_unwrapped() {
        let mut graph = NodeGraph::new();
        let v = var(&mut graph, GlslType::Vec4, "v");
        let m = var(&mut graph, GlslType::Mat4, "m");
        let out = var(&mut graph, GlslType::Vec4, "out");
        let op = graph.add(NodeKind::MatrixMult {
            position: true,
            inverse: false,
            overwrite_w: true,
        });
        graph.wire_named_inputs(op, &[("vec", v), ("matrix", m)]);
        graph.wire_named_outputs(op, &[("vec", out)]);

        assert_eq!(statement(&graph, op).unwrap().unwrap(), "out = m*v;");
    }

    #[test]
    fn matrix_mult_direction_forces_zero_complement() {
        let mut graph = NodeGraph::new();
        let v = var(&mut graph, GlslType::Vec3, "n");
        let m = var(&mut graph, GlslType::Mat4, "m");
        let out = var(&mut graph, GlslType::Vec3, "out");
        let op = graph.add(NodeKind::MatrixMult {
            position: false,
            inverse: false,
            overwrite_w: true,
        });
        graph.wire_named_inputs(op, &[("vec", v), ("matrix", m)]);
        graph.wire_named_outputs(op, &[("vec", out)]);

        assert_eq!(
            statement(&graph, op).unwrap().unwrap(),
            "out = vec3(m*vec4(n.xyz, 0.));"
        );
    }

    #[test]
    fn inline_code_substitutes_named_ports() {
        let mut graph = NodeGraph::new();
        let input = var(&mut graph, GlslType::Vec4, "uColor");
        let out = var(&mut graph, GlslType::Float, "alpha");
        let op = graph.add(NodeKind::InlineCode {
            code: "%alpha = %color.a;".to_string(),
        });
        graph.wire_named_inputs(op, &[("color", input)]);
        graph.wire_named_outputs(op, &[("alpha", out)]);

        assert_eq!(
            statement(&graph, op).unwrap().unwrap(),
            "alpha = uColor.a;"
        );
    }

    #[test]
    fn inline_code_rejects_unbound_placeholder() {
        let mut graph = NodeGraph::new();
        let out = var(&mut graph, GlslType::Float, "alpha");
        let op = graph.add(NodeKind::InlineCode {
            code: "%alpha = %missing;".to_string(),
        });
        graph.wire_named_outputs(op, &[("alpha", out)]);

        let err = statement(&graph, op).unwrap_err().to_string();
        assert!(err.contains("missing"), "unexpected error: {err}");
    }

    #[test]
    fn morph_function_single_target_uses_mix() {
        let text = morph_function(1);
        assert!(text.contains("mix(vertex, target0, weights[0])"));

        let text = morph_function(3);
        assert!(text.contains("target2 * weights[2]"));
    }
}
