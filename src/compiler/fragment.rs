//! Fragment-stage graph construction.
//!
//! Runs before the vertex build: every varying the shading chain touches is
//! declared here and handed over as the cross-stage interface. Each active
//! light walks a three-step pipeline (lit, shadow-tested, combined) and the
//! contributions are summed into one color before alpha and premultiply.

use anyhow::Result;

use crate::compiler::Compiler;
use crate::compiler::context::{StageContext, UniformNodes};
use crate::graph::{NodeId, NodeKind};
use crate::state::{Light, LightKind, TextureTarget};
use crate::types::GlslType;

/// Build the fragment graph and return its roots.
pub fn build(compiler: &Compiler, ctx: &mut StageContext) -> Result<Vec<NodeId>> {
    let Some(material) = compiler.material() else {
        return Ok(vec![default_graph(ctx)?]);
    };

    let material_uniforms = ctx.uniforms_from_map(&material.uniforms(), "")?;
    let diffuse_uniform = material_uniforms["diffuse"];

    // diffuse, gated at runtime by the vertex-color uniform
    let diffuse_color = vertex_color(ctx, diffuse_uniform)?;

    let mut final_color = if compiler.lights().is_empty() {
        diffuse_color
    } else {
        create_lighting(compiler, ctx, diffuse_color)?
    };

    if let Some(&emission) = material_uniforms.get("emission") {
        let out = ctx.create_variable(GlslType::Vec3, None);
        ctx.graph.set_value(out, "vec3(0.0)");
        let add = ctx.add_node(NodeKind::Add);
        ctx.graph.wire_inputs(add, &[final_color, emission]);
        ctx.graph.wire_output(add, out);
        final_color = out;
    }

    if let Some(texture_color) = diffuse_color_from_textures(compiler, ctx)? {
        let node = ctx.add_node(NodeKind::InlineCode {
            code: "%color.rgb *= %texture.rgb;".to_string(),
        });
        ctx.graph
            .wire_named_inputs(node, &[("texture", texture_color)]);
        ctx.graph
            .wire_named_outputs(node, &[("color", final_color)]);
    }

    let alpha = compute_alpha(compiler, ctx, diffuse_uniform)?;

    let premult = ctx.create_variable(GlslType::Vec4, None);
    let node = ctx.add_node(NodeKind::PreMultAlpha);
    ctx.graph
        .wire_named_inputs(node, &[("color", final_color), ("alpha", alpha)]);
    ctx.graph.wire_named_outputs(node, &[("color", premult)]);

    let frag_color = ctx.output(GlslType::Vec4, "gl_FragColor");
    let set_alpha = ctx.add_node(NodeKind::SetAlpha);
    ctx.graph
        .wire_named_inputs(set_alpha, &[("color", premult), ("alpha", alpha)]);
    ctx.graph.wire_named_outputs(set_alpha, &[("color", frag_color)]);

    Ok(vec![frag_color])
}

/// Visible degraded mode for a missing material. The broken setup shows up
/// magenta on screen instead of reaching the driver as garbage.
fn default_graph(ctx: &mut StageContext) -> Result<NodeId> {
    let fofd = ctx.get_or_create_constant(GlslType::Vec4, Some("fofd"))?;
    ctx.graph.set_value(fofd, "vec4(1.0, 0.0, 1.0, 0.7)");

    let frag_color = ctx.output(GlslType::Vec4, "gl_FragColor");
    let set = ctx.add_node(NodeKind::Assign);
    ctx.graph.wire_inputs(set, &[fofd]);
    ctx.graph.wire_output(set, frag_color);
    Ok(frag_color)
}

/// `diffuse * vertexColor`, taken only when the host enables the color array
/// at runtime, so one compiled shader serves both mesh flavors.
fn vertex_color(ctx: &mut StageContext, diffuse: NodeId) -> Result<NodeId> {
    let vertex_color = ctx.get_or_create_varying(GlslType::Vec4, "vVertexColor")?;
    let enabled = ctx.get_or_create_uniform(GlslType::Float, "uArrayColorEnabled")?;
    let out = ctx.create_variable(GlslType::Vec4, None);

    let code = "\n%color.rgb = %diffuse.rgb;\nif ( %hasVertexColor == 1.0)\n  %color *= %vertexColor.rgba;";
    let node = ctx.add_node(NodeKind::InlineCode {
        code: code.to_string(),
    });
    ctx.graph.wire_named_inputs(
        node,
        &[
            ("diffuse", diffuse),
            ("hasVertexColor", enabled),
            ("vertexColor", vertex_color),
        ],
    );
    ctx.graph.wire_named_outputs(node, &[("color", out)]);
    ctx.graph
        .set_comment(node, "diffuse color = diffuse color * vertex color");
    Ok(out)
}

fn normalized_normal(ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("normal") {
        return Ok(out);
    }

    let view_normal = ctx.get_or_create_varying(GlslType::Vec3, "vViewNormal")?;
    let front = ctx.create_variable(GlslType::Vec3, Some("frontNormal"));
    let front_node = ctx.add_node(NodeKind::FrontNormal);
    ctx.graph.wire_named_inputs(front_node, &[("normal", view_normal)]);
    ctx.graph.wire_named_outputs(front_node, &[("normal", front)]);

    let out = ctx.create_variable(GlslType::Vec3, Some("normal"));
    let node = ctx.add_node(NodeKind::Normalize);
    ctx.graph.wire_named_inputs(node, &[("vec", front)]);
    ctx.graph.wire_named_outputs(node, &[("vec", out)]);
    Ok(out)
}

/// Unit vector from the fragment toward the eye, derived from the view-space
/// position varying.
fn normalized_eye_vector(ctx: &mut StageContext) -> Result<NodeId> {
    if let Some(out) = ctx.get_variable("eyeVector") {
        return Ok(out);
    }

    let view_vertex = ctx.get_or_create_varying(GlslType::Vec4, "vViewVertex")?;
    let cast = ctx.create_variable(GlslType::Vec3, None);
    let set = ctx.add_node(NodeKind::Assign);
    ctx.graph.wire_inputs(set, &[view_vertex]);
    ctx.graph.wire_output(set, cast);

    let normalized = ctx.create_variable(GlslType::Vec3, None);
    let node = ctx.add_node(NodeKind::Normalize);
    ctx.graph.wire_named_inputs(node, &[("vec", cast)]);
    ctx.graph.wire_named_outputs(node, &[("vec", normalized)]);

    let minus_one = ctx.create_variable(GlslType::Float, None);
    ctx.graph.set_value(minus_one, "-1.0");

    let out = ctx.create_variable(GlslType::Vec3, Some("eyeVector"));
    let mult = ctx.add_node(NodeKind::Mult);
    ctx.graph.wire_inputs(mult, &[normalized, minus_one]);
    ctx.graph.wire_output(mult, out);
    Ok(out)
}

fn light_node_kind(kind: LightKind) -> NodeKind {
    match kind {
        LightKind::Directional => NodeKind::SunLight,
        LightKind::Spot => NodeKind::SpotLight,
        LightKind::Point => NodeKind::PointLight,
        LightKind::Hemisphere => NodeKind::HemiLight,
    }
}

/// Per-light intermediates the paired shadow computation reads back.
struct LightVars {
    lighted: NodeId,
    eye_pos: Option<NodeId>,
    eye_dir: NodeId,
    ndl: NodeId,
}

fn light_and_shadow_vars(ctx: &mut StageContext, light: &Light, index: usize) -> LightVars {
    let eye_pos = match light.kind {
        LightKind::Spot | LightKind::Point => {
            Some(ctx.create_variable(GlslType::Vec3, Some(&format!("lightEyePos{index}"))))
        }
        _ => None,
    };
    LightVars {
        lighted: ctx.create_variable(GlslType::Bool, Some(&format!("lighted{index}"))),
        eye_pos,
        eye_dir: ctx.create_variable(GlslType::Vec3, Some(&format!("lightEyeDir{index}"))),
        ndl: ctx.create_variable(GlslType::Float, Some(&format!("lightNDL{index}"))),
    }
}

/// Per-light lit / shadow-tested / combined pipeline, accumulated into one
/// color. Lights are processed in activation order so recompiling the same
/// state yields byte-identical source.
fn create_lighting(
    compiler: &Compiler,
    ctx: &mut StageContext,
    diffuse: NodeId,
) -> Result<NodeId> {
    let material = compiler
        .material()
        .ok_or_else(|| anyhow::anyhow!("lighting requested without a material"))?;
    let material_uniforms = ctx.uniforms_from_map(&material.uniforms(), "material")?;

    let output = ctx.create_variable(GlslType::Vec3, None);
    let mut contributions: Vec<NodeId> = Vec::new();

    for (index, light) in compiler.lights().iter().enumerate() {
        let light_uniforms = ctx.uniforms_from_map(&light.uniforms(), "light")?;
        let vars = light_and_shadow_vars(ctx, light, index);

        let mut inputs: UniformNodes = light_uniforms.clone();
        inputs.extend(material_uniforms.clone());
        inputs.insert("materialdiffuse".to_string(), diffuse);
        inputs.insert("normal".to_string(), normalized_normal(ctx)?);
        inputs.insert("eyeVector".to_string(), normalized_eye_vector(ctx)?);
        inputs.insert("lighted".to_string(), vars.lighted);
        inputs.insert("lightEyeDir".to_string(), vars.eye_dir);
        inputs.insert("lightNDL".to_string(), vars.ndl);
        if let Some(eye_pos) = vars.eye_pos {
            inputs.insert("lightEyePos".to_string(), eye_pos);
        }

        // The shading functions return vec4; consumers swizzle down to rgb.
        let lighted_output = ctx.create_variable(GlslType::Vec4, None);
        let node = ctx.add_node(light_node_kind(light.kind));
        for (name, &id) in &inputs {
            ctx.graph.wire_named_inputs(node, &[(name.as_str(), id)]);
        }
        ctx.graph.wire_named_outputs(node, &[("color", lighted_output)]);
        ctx.graph.wire_named_outputs(node, &[("lightEyeDir", vars.eye_dir)]);
        ctx.graph.wire_named_outputs(node, &[("ndl", vars.ndl)]);
        ctx.graph.wire_named_outputs(node, &[("lighted", vars.lighted)]);
        if let Some(eye_pos) = vars.eye_pos {
            ctx.graph.wire_named_outputs(node, &[("lightEyePos", eye_pos)]);
        }

        let combined = match shadowed_light(compiler, ctx, light, &inputs, lighted_output)? {
            Some(shadowed) => shadowed,
            None => lighted_output,
        };
        contributions.push(combined);

        // ambient reacts to the light even when the surface is unlit
        let ambient = ctx.create_variable(GlslType::Vec3, Some("lightMatAmbientOutput"));
        let mult = ctx.add_node(NodeKind::Mult);
        ctx.graph.wire_inputs(
            mult,
            &[material_uniforms["materialambient"], light_uniforms["lightambient"]],
        );
        ctx.graph.wire_output(mult, ambient);
        contributions.push(ambient);
    }

    // overriding builders may call in with an empty light list
    if contributions.is_empty() {
        let black = ctx.create_variable(GlslType::Vec3, None);
        ctx.graph.set_value(black, "vec3(0.0)");
        contributions.push(black);
    }

    let add = ctx.add_node(NodeKind::Add);
    ctx.graph.wire_inputs(add, &contributions);
    ctx.graph.wire_output(add, output);
    Ok(output)
}

/// Shadow test for one light: matches the receiver by light number, gathers
/// every shadow map registered for that light, and multiplies the lit color
/// by the scalar attenuation. Returns `None` when the light is unshadowed.
fn shadowed_light(
    compiler: &Compiler,
    ctx: &mut StageContext,
    light: &Light,
    inputs: &UniformNodes,
    lighted_output: NodeId,
) -> Result<Option<NodeId>> {
    let Some(shadow) = compiler
        .shadows()
        .iter()
        .find(|s| s.light_number == light.light_number)
    else {
        return Ok(None);
    };

    let shadow_maps: Vec<usize> = compiler
        .shadow_texture_units(light.light_number)
        .collect();
    if shadow_maps.is_empty() {
        return Ok(None);
    }

    let vertex_world = ctx.get_or_create_varying(GlslType::Vec3, "vModelVertex")?;

    let mut shadow_inputs = inputs.clone();
    shadow_inputs.extend(ctx.uniforms_from_map(&shadow.uniforms(), "shadow")?);

    for unit in shadow_maps {
        let sampler =
            ctx.get_or_create_sampler(GlslType::Sampler2D, &format!("Texture{unit}"))?;
        let texture = compiler
            .shadow_texture(unit)
            .ok_or_else(|| anyhow::anyhow!("no shadow texture on unit {unit}"))?;
        shadow_inputs.extend(ctx.uniforms_from_map(&texture.uniforms(unit), "shadowTexture")?);
        shadow_inputs.insert("shadowTexture".to_string(), sampler);
    }
    shadow_inputs.insert("vertexWorld".to_string(), vertex_world);

    let shadowed = ctx.create_variable(GlslType::Float, None);
    let node = ctx.add_node(NodeKind::ShadowReceive {
        algorithm: shadow.algorithm,
        defines: shadow.defines(),
        extensions: shadow.extensions(),
    });
    for (name, &id) in &shadow_inputs {
        ctx.graph.wire_named_inputs(node, &[(name.as_str(), id)]);
    }
    ctx.graph.wire_named_outputs(node, &[("float", shadowed)]);

    let combined = ctx.create_variable(GlslType::Vec3, Some("lightAndShadowTempOutput"));
    let mult = ctx.add_node(NodeKind::Mult);
    ctx.graph.wire_inputs(mult, &[lighted_output, shadowed]);
    ctx.graph.wire_output(mult, combined);
    Ok(Some(combined))
}

/// Sampled texel for a registered color texture, created once per stage.
/// Cube maps take a samplerCube and a vec3 direction varying.
fn texel_by_name(compiler: &Compiler, ctx: &mut StageContext, name: &str) -> Result<NodeId> {
    if let Some(&texel) = ctx.texture_vars.get(name) {
        return Ok(texel);
    }
    let unit = compiler
        .texture_unit(name)
        .ok_or_else(|| anyhow::anyhow!("no texture registered under `{name}`"))?;

    let (sampler_ty, coord_ty, kind) = match compiler.texture_target(name).unwrap_or_default() {
        TextureTarget::Texture2d => (GlslType::Sampler2D, GlslType::Vec2, NodeKind::TextureRgba),
        TextureTarget::CubeMap => {
            (GlslType::SamplerCube, GlslType::Vec3, NodeKind::TextureCubeRgba)
        }
    };
    let sampler = ctx.get_or_create_sampler(sampler_ty, &format!("Texture{unit}"))?;
    let uv = ctx.get_or_create_varying(coord_ty, &format!("vTexCoord{unit}"))?;

    let texel = ctx.create_variable(GlslType::Vec4, None);
    let node = ctx.add_node(kind);
    ctx.graph
        .wire_named_inputs(node, &[("sampler", sampler), ("uv", uv)]);
    ctx.graph.wire_named_outputs(node, &[("color", texel)]);

    ctx.texture_vars.insert(name.to_string(), texel);
    Ok(texel)
}

/// Product of every bound color texture, or the single texel when only one
/// is bound, or nothing.
fn diffuse_color_from_textures(
    compiler: &Compiler,
    ctx: &mut StageContext,
) -> Result<Option<NodeId>> {
    let mut texels = Vec::new();
    for name in compiler.color_texture_names() {
        texels.push(texel_by_name(compiler, ctx, &name)?);
    }

    match texels.len() {
        0 => Ok(None),
        1 => Ok(Some(texels[0])),
        _ => {
            let accum = ctx.create_variable(GlslType::Vec3, Some("texDiffuseAccum"));
            let mult = ctx.add_node(NodeKind::Mult);
            ctx.graph.wire_inputs(mult, &texels);
            ctx.graph.wire_output(mult, accum);
            Ok(Some(accum))
        }
    }
}

/// Alpha = material alpha, times the first bound texture's alpha when one
/// exists. Billboards discard fully transparent fragments.
fn compute_alpha(
    compiler: &Compiler,
    ctx: &mut StageContext,
    diffuse_uniform: NodeId,
) -> Result<NodeId> {
    let alpha = ctx.create_variable(GlslType::Float, None);

    let texel = match compiler.first_color_texture_name() {
        Some(name) => Some(texel_by_name(compiler, ctx, &name)?),
        None => None,
    };

    let mut code = if texel.is_some() {
        "%alpha = %color.a * %texelAlpha.a;".to_string()
    } else {
        "%alpha = %color.a;".to_string()
    };
    if compiler.is_billboard() {
        code.push_str("if ( %alpha == 0.0) discard;");
    }

    let node = ctx.add_node(NodeKind::InlineCode { code });
    ctx.graph
        .wire_named_inputs(node, &[("color", diffuse_uniform)]);
    if let Some(texel) = texel {
        ctx.graph.wire_named_inputs(node, &[("texelAlpha", texel)]);
    }
    ctx.graph.wire_named_outputs(node, &[("alpha", alpha)]);
    Ok(alpha)
}
