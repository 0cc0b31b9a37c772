//! Vertex-stage graph construction.
//!
//! The position pipeline runs morph, then skinning, then normalization, each
//! stage passing its input through untouched when the matching attribute is
//! absent. A feature that is off contributes zero nodes, not dead branches.
//! Varying population only wires the well-known geometric varyings; anything
//! else in the persisted set is assumed to be fed by an overriding builder.

use anyhow::Result;

use crate::compiler::Compiler;
use crate::compiler::context::StageContext;
use crate::graph::{NodeId, NodeKind};
use crate::types::GlslType;

/// Build the vertex graph and return its roots.
pub fn build(compiler: &Compiler, ctx: &mut StageContext) -> Result<Vec<NodeId>> {
    // gl_Position must be computed before the varyings (iOS driver quirk).
    let point_size = declare_point_size(ctx)?;
    let position = declare_vertex_position(compiler, ctx)?;
    let mut roots = vec![point_size, position];

    declare_vertex_varyings(compiler, ctx, &mut roots)?;

    Ok(roots)
}

fn declare_point_size(ctx: &mut StageContext) -> Result<NodeId> {
    let one = ctx.constant_one(GlslType::Float)?;
    let point_size = ctx.output(GlslType::Float, "gl_PointSize");
    let set = ctx.add_node(NodeKind::Assign);
    ctx.graph.wire_inputs(set, &[one]);
    ctx.graph.wire_output(set, point_size);
    Ok(point_size)
}

fn declare_vertex_position(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    let position = ctx.output(GlslType::Vec4, "gl_Position");
    if compiler.is_billboard() {
        declare_billboard_position(ctx, position)?;
    } else {
        declare_screen_position(compiler, ctx, position)?;
    }
    Ok(position)
}

fn declare_billboard_position(ctx: &mut StageContext, position: NodeId) -> Result<()> {
    let vertex = ctx.get_or_create_attribute(GlslType::Vec3, "Vertex")?;
    let model_view = ctx.get_or_create_uniform(GlslType::Mat4, "uModelViewMatrix")?;
    let projection = ctx.get_or_create_uniform(GlslType::Mat4, "uProjectionMatrix")?;

    let node = ctx.add_node(NodeKind::Billboard);
    ctx.graph.wire_named_inputs(
        node,
        &[
            ("Vertex", vertex),
            ("ModelViewMatrix", model_view),
            ("ProjectionMatrix", projection),
        ],
    );
    ctx.graph.wire_named_outputs(node, &[("vec", position)]);
    Ok(())
}

fn declare_screen_position(
    compiler: &Compiler,
    ctx: &mut StageContext,
    position: NodeId,
) -> Result<()> {
    let projection = ctx.get_or_create_uniform(GlslType::Mat4, "uProjectionMatrix")?;
    let view_vertex = view_vertex(compiler, ctx)?;
    matrix_mult_position(ctx, projection, view_vertex, position, false);
    Ok(())
}

fn declare_vertex_varyings(
    compiler: &Compiler,
    ctx: &mut StageContext,
    roots: &mut Vec<NodeId>,
) -> Result<()> {
    let varyings: Vec<(String, NodeId)> = ctx
        .varying_nodes()
        .map(|(name, id)| (name.to_string(), id))
        .collect();

    for (name, varying) in varyings {
        roots.push(varying);
        match name.as_str() {
            "vModelVertex" => {
                let src = model_vertex(compiler, ctx)?;
                assign(ctx, src, varying);
            }
            "vModelNormal" => {
                let src = model_normal(compiler, ctx)?;
                assign(ctx, src, varying);
            }
            "vModelTangent" => {
                let src = model_tangent(compiler, ctx)?;
                assign(ctx, src, varying);
            }
            "vViewVertex" => {
                let src = view_vertex(compiler, ctx)?;
                assign(ctx, src, varying);
            }
            "vViewNormal" => {
                let src = view_normal(compiler, ctx)?;
                assign(ctx, src, varying);
            }
            "vViewTangent" => {
                let src = view_tangent(compiler, ctx)?;
                assign(ctx, src, varying);
            }
            "vVertexColor" => declare_vertex_color(ctx, varying)?,
            name if name.starts_with("vTexCoord") => {
                // vTexCoordN reads the attribute of the same name minus the v,
                // mirroring the varying's type (vec3 for cube-map coords).
                let ty = ctx.graph.var_type(varying).unwrap_or(GlslType::Vec2);
                let attribute = ctx.get_or_create_attribute(ty, &name[1..])?;
                assign(ctx, attribute, varying);
            }
            // Unknown varyings belong to an overriding builder; leaving them
            // unwired here is not an error.
            _ => {}
        }
    }
    Ok(())
}

fn declare_vertex_color(ctx: &mut StageContext, varying: NodeId) -> Result<()> {
    let enabled = ctx.get_or_create_uniform(GlslType::Float, "uArrayColorEnabled")?;
    let color = ctx.get_or_create_attribute(GlslType::Vec4, "Color")?;
    let node = ctx.add_node(NodeKind::InlineCode {
        code: "%vcolor = %venabled == 1.0 ? %acolor : vec4(1.0, 1.0, 1.0, 1.0);".to_string(),
    });
    ctx.graph
        .wire_named_inputs(node, &[("venabled", enabled), ("acolor", color)]);
    ctx.graph.wire_named_outputs(node, &[("vcolor", varying)]);
    Ok(())
}

fn assign(ctx: &mut StageContext, from: NodeId, to: NodeId) -> NodeId {
    let op = ctx.add_node(NodeKind::Assign);
    ctx.graph.wire_inputs(op, &[from]);
    ctx.graph.wire_output(op, to);
    op
}

fn matrix_mult_position(
    ctx: &mut StageContext,
    matrix: NodeId,
    vec: NodeId,
    out: NodeId,
    inverse: bool,
) -> NodeId {
    let op = ctx.add_node(NodeKind::MatrixMult {
        position: true,
        inverse,
        overwrite_w: true,
    });
    ctx.graph
        .wire_named_inputs(op, &[("vec", vec), ("matrix", matrix)]);
    ctx.graph.wire_named_outputs(op, &[("vec", out)]);
    op
}

fn matrix_mult_direction(
    ctx: &mut StageContext,
    matrix: NodeId,
    vec: NodeId,
    out: NodeId,
    inverse: bool,
    overwrite_w: bool,
) -> NodeId {
    let op = ctx.add_node(NodeKind::MatrixMult {
        position: false,
        inverse,
        overwrite_w,
    });
    ctx.graph
        .wire_named_inputs(op, &[("vec", vec), ("matrix", matrix)]);
    ctx.graph.wire_named_outputs(op, &[("vec", out)]);
    op
}

fn model_vertex(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("modelVertex") {
        return Ok(out);
    }
    let matrix = ctx.get_or_create_uniform(GlslType::Mat4, "uModelMatrix")?;
    let vec = local_vertex(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec3, Some("modelVertex"));
    matrix_mult_position(ctx, matrix, vec, out, false);
    Ok(out)
}

fn model_normal(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("modelNormal") {
        return Ok(out);
    }
    let matrix = ctx.get_or_create_uniform(GlslType::Mat4, "uModelMatrix")?;
    let vec = local_normal(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec3, Some("modelNormal"));
    matrix_mult_direction(ctx, matrix, vec, out, false, true);
    Ok(out)
}

fn model_tangent(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("modelTangent") {
        return Ok(out);
    }
    let matrix = ctx.get_or_create_uniform(GlslType::Mat4, "uModelMatrix")?;
    let vec = local_tangent(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec4, Some("modelTangent"));
    matrix_mult_direction(ctx, matrix, vec, out, false, false);
    Ok(out)
}

fn view_vertex(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("viewVertex") {
        return Ok(out);
    }
    let matrix = ctx.get_or_create_uniform(GlslType::Mat4, "uModelViewMatrix")?;
    let vec = local_vertex(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec4, Some("viewVertex"));
    matrix_mult_position(ctx, matrix, vec, out, false);
    Ok(out)
}

fn view_normal(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("viewNormal") {
        return Ok(out);
    }
    let matrix = ctx.get_or_create_uniform(GlslType::Mat4, "uModelViewNormalMatrix")?;
    let vec = local_normal(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec3, Some("viewNormal"));
    matrix_mult_direction(ctx, matrix, vec, out, false, true);
    Ok(out)
}

fn view_tangent(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("viewTangent") {
        return Ok(out);
    }
    let matrix = ctx.get_or_create_uniform(GlslType::Mat4, "uModelViewNormalMatrix")?;
    let vec = local_tangent(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec4, Some("viewTangent"));
    matrix_mult_direction(ctx, matrix, vec, out, false, false);
    Ok(out)
}

/// Shared bone matrix for vertex, normal and tangent skinning. Scale
/// animations must be uniform scale.
fn bone_matrix(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("boneMatrix") {
        return Ok(out);
    }
    let skinning = compiler
        .skinning()
        .ok_or_else(|| anyhow::anyhow!("bone matrix requested without a skinning attribute"))?;

    let weights = ctx.get_or_create_attribute(GlslType::Vec4, "Weights")?;
    let bones = ctx.get_or_create_attribute(GlslType::Vec4, "Bones")?;
    let palette = ctx.get_or_create_uniform_sized(
        GlslType::Vec4,
        "uBones",
        Some(skinning.bone_uniform_size()),
    )?;

    let out = ctx.create_variable(GlslType::Mat4, Some("boneMatrix"));
    let node = ctx.add_node(NodeKind::Skinning);
    ctx.graph.wire_named_inputs(
        node,
        &[
            ("weights", weights),
            ("bonesIndex", bones),
            ("matrixPalette", palette),
        ],
    );
    ctx.graph.wire_named_outputs(node, &[("mat4", out)]);
    Ok(out)
}

/// Morph target attribute for one stream, `Vertex_0`, `Normal_1`, ...
fn morph_target(ctx: &mut StageContext, stream: &str, index: usize) -> Result<NodeId> {
    let ty = if stream.contains("Tangent") {
        GlslType::Vec4
    } else {
        GlslType::Vec3
    };
    ctx.get_or_create_attribute(ty, &format!("{stream}_{index}"))
}

fn morph_transform(
    compiler: &Compiler,
    ctx: &mut StageContext,
    input: NodeId,
    out: NodeId,
) -> Result<NodeId> {
    let morph = compiler
        .morph()
        .ok_or_else(|| anyhow::anyhow!("morph transform requested without a morph attribute"))?;

    let weights = ctx.get_or_create_uniform(GlslType::Vec4, "uTargetWeights")?;
    let stream = ctx.graph.var_name(input).to_string();

    let mut inputs = vec![("vertex".to_string(), input), ("weights".to_string(), weights)];
    for i in 0..morph.num_targets {
        inputs.push((format!("target{i}"), morph_target(ctx, &stream, i)?));
    }

    let node = ctx.add_node(NodeKind::Morph {
        targets: morph.num_targets,
    });
    for (name, id) in &inputs {
        ctx.graph.wire_named_inputs(node, &[(name.as_str(), *id)]);
    }
    ctx.graph.wire_named_outputs(node, &[("out", out)]);
    Ok(out)
}

fn morph_vertex(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("morphVertex") {
        return Ok(out);
    }
    let input = ctx.get_or_create_attribute(GlslType::Vec3, "Vertex")?;
    match compiler.morph() {
        Some(morph) if morph.has_target("Vertex") => {
            let out = ctx.create_variable(GlslType::Vec3, Some("morphVertex"));
            morph_transform(compiler, ctx, input, out)
        }
        _ => Ok(input),
    }
}

fn morph_normal(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("morphNormal") {
        return Ok(out);
    }
    let input = ctx.get_or_create_attribute(GlslType::Vec3, "Normal")?;
    match compiler.morph() {
        Some(morph) if morph.has_target("Normal") => {
            let out = ctx.create_variable(GlslType::Vec3, Some("morphNormal"));
            morph_transform(compiler, ctx, input, out)
        }
        _ => Ok(input),
    }
}

fn morph_tangent(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("morphTangent") {
        return Ok(out);
    }
    let input = ctx.get_or_create_attribute(GlslType::Vec4, "Tangent")?;
    match compiler.morph() {
        Some(morph) if morph.has_target("Tangent") => {
            let out = ctx.create_variable(GlslType::Vec3, Some("morphTangent"));
            morph_transform(compiler, ctx, input, out)
        }
        _ => Ok(input),
    }
}

fn skin_vertex(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("skinVertex") {
        return Ok(out);
    }
    let input = morph_vertex(compiler, ctx)?;
    if compiler.skinning().is_none() {
        return Ok(input);
    }
    let matrix = bone_matrix(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec3, Some("skinVertex"));
    matrix_mult_position(ctx, matrix, input, out, true);
    Ok(out)
}

fn skin_normal(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("skinNormal") {
        return Ok(out);
    }
    let input = morph_normal(compiler, ctx)?;
    if compiler.skinning().is_none() {
        return Ok(input);
    }
    let matrix = bone_matrix(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec3, Some("skinNormal"));
    matrix_mult_direction(ctx, matrix, input, out, true, true);
    Ok(out)
}

fn skin_tangent(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("skinTangent") {
        return Ok(out);
    }
    let input = morph_tangent(compiler, ctx)?;
    if compiler.skinning().is_none() {
        return Ok(input);
    }
    let matrix = bone_matrix(compiler, ctx)?;
    let out = ctx.create_variable(GlslType::Vec3, Some("skinTangent"));
    matrix_mult_direction(ctx, matrix, input, out, true, true);
    Ok(out)
}

fn local_vertex(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    skin_vertex(compiler, ctx)
}

fn local_normal(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("localNormal") {
        return Ok(out);
    }
    let normal = skin_normal(compiler, ctx)?;
    // Untouched attribute normals are already unit length.
    if normal == ctx.get_or_create_attribute(GlslType::Vec3, "Normal")? {
        return Ok(normal);
    }
    let out = ctx.create_variable(GlslType::Vec3, Some("localNormal"));
    let node = ctx.add_node(NodeKind::Normalize);
    ctx.graph.wire_named_inputs(node, &[("vec", normal)]);
    ctx.graph.wire_named_outputs(node, &[("vec", out)]);
    Ok(out)
}

fn local_tangent(compiler: &Compiler, ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("localTangent") {
        return Ok(out);
    }
    let input = ctx.get_or_create_attribute(GlslType::Vec4, "Tangent")?;
    let tangent = skin_tangent(compiler, ctx)?;
    if tangent == input {
        return Ok(tangent);
    }

    // Renormalize the transformed xyz and restore the handedness sign kept
    // in the original w.
    let normalized = ctx.create_variable(GlslType::Vec3, None);
    let node = ctx.add_node(NodeKind::Normalize);
    ctx.graph.wire_named_inputs(node, &[("vec", tangent)]);
    ctx.graph.wire_named_outputs(node, &[("vec", normalized)]);

    let out = ctx.create_variable(GlslType::Vec4, Some("localTangent"));
    let set_alpha = ctx.add_node(NodeKind::SetAlpha);
    ctx.graph
        .wire_named_inputs(set_alpha, &[("color", normalized), ("alpha", input)]);
    ctx.graph.wire_named_outputs(set_alpha, &[("color", out)]);
    Ok(out)
}
