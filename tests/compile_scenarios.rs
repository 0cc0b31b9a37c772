use glslforge::{
    CompiledProgram, Compiler, Light, LightKind, Material, MorphAttribute, ShadowReceiver,
    ShadowTexture, SkinningAttribute, StateAttribute, Texture, TextProcessor, TextureAttribute,
    TextureTarget,
};

fn compile(
    attributes: Vec<StateAttribute>,
    texture_units: Vec<Option<TextureAttribute>>,
) -> CompiledProgram {
    let _ = env_logger::builder().is_test(true).try_init();
    Compiler::new(&attributes, &texture_units)
        .compile(&TextProcessor::new())
        .expect("compilation should succeed")
}

fn material() -> StateAttribute {
    StateAttribute::Material(Material::default())
}

fn sun(light_number: u32) -> StateAttribute {
    StateAttribute::Light(Light::new(light_number, LightKind::Directional))
}

fn shadow_map(light_unit: u32) -> Option<TextureAttribute> {
    Some(TextureAttribute::Shadow(ShadowTexture {
        light_unit,
        name: None,
    }))
}

/// The emitted call sites, excluding the function definitions the include
/// library contributes.
fn call_count(source: &str, func: &str) -> usize {
    source.matches(&format!("= {func}(")).count()
}

#[test]
fn zero_lights_yields_flat_diffuse() {
    let program = compile(vec![material()], vec![]);

    assert!(program.fragment.contains("uniform vec4 uMaterialDiffuse;"));
    assert!(program.fragment.contains("uniform float uArrayColorEnabled;"));
    assert!(program.fragment.contains("gl_FragColor"));

    // no light or shadow machinery at all
    assert!(!program.fragment.contains("uLight0_"));
    assert!(!program.fragment.contains("computeShadow"));
    assert!(!program.fragment.contains("computeSunLightShading"));
}

#[test]
fn directional_light_with_matching_shadow_multiplies_attenuation() {
    let program = compile(
        vec![material(), sun(0), StateAttribute::ShadowReceiver(ShadowReceiver::new(0))],
        vec![shadow_map(0)],
    );

    assert_eq!(call_count(&program.fragment, "computeSunLightShading"), 1);
    assert_eq!(call_count(&program.fragment, "computeShadow"), 1);
    assert!(program.fragment.contains("#define _PCF"));
    assert!(program.fragment.contains("uniform sampler2D Texture0;"));
    assert!(program.fragment.contains("uniform float uShadow0_bias;"));

    // lit color is multiplied by the attenuation factor, never added
    let combine = program
        .fragment
        .lines()
        .find(|line| line.trim_start().starts_with("lightAndShadowTempOutput ="))
        .expect("combined light/shadow statement");
    assert!(combine.contains('*'), "expected a multiply: {combine}");
    assert!(!combine.contains('+'), "unexpected add: {combine}");
}

#[test]
fn mismatched_shadow_light_index_leaves_light_unshadowed() {
    let program = compile(
        vec![
            material(),
            sun(0),
            StateAttribute::Light(Light::new(1, LightKind::Point)),
            StateAttribute::ShadowReceiver(ShadowReceiver::new(1)),
        ],
        vec![shadow_map(1)],
    );

    assert_eq!(call_count(&program.fragment, "computeSunLightShading"), 1);
    assert_eq!(call_count(&program.fragment, "computePointLightShading"), 1);
    assert_eq!(call_count(&program.fragment, "computeShadow"), 1);
}

#[test]
fn shadow_receiver_without_any_light_map_is_inert() {
    let program = compile(
        vec![material(), sun(0), StateAttribute::ShadowReceiver(ShadowReceiver::new(3))],
        vec![],
    );

    assert_eq!(call_count(&program.fragment, "computeSunLightShading"), 1);
    assert_eq!(call_count(&program.fragment, "computeShadow"), 0);
    assert!(!program.fragment.contains("#define _PCF"));
}

#[test]
fn missing_material_compiles_to_magenta_placeholder() {
    let program = compile(vec![sun(0)], vec![]);

    assert!(program.fragment.contains("vec4(1.0, 0.0, 1.0, 0.7)"));
    assert!(program.fragment.contains("#define SHADER_NAME NoMaterialForgeCompiler"));
    // the placeholder ignores the lights entirely
    assert!(!program.fragment.contains("computeSunLightShading"));
}

#[test]
fn varyings_round_trip_between_stages() {
    let program = compile(vec![material(), sun(0)], vec![]);

    for declaration in [
        "varying vec3 vViewNormal;",
        "varying vec4 vViewVertex;",
        "varying vec4 vVertexColor;",
    ] {
        assert!(program.fragment.contains(declaration), "fragment: {declaration}");
        assert!(program.vertex.contains(declaration), "vertex: {declaration}");
    }

    // and the vertex stage assigns every one of them
    assert!(program.vertex.contains("vViewNormal = "));
    assert!(program.vertex.contains("vViewVertex = "));
    assert!(program.vertex.contains("vVertexColor = "));
}

#[test]
fn absent_morph_and_skinning_collapse_to_raw_attribute() {
    let program = compile(vec![material()], vec![]);

    assert!(program.vertex.contains("viewVertex = uModelViewMatrix*vec4(Vertex.xyz, 1.);"));
    assert!(program.vertex.contains("gl_Position = uProjectionMatrix*viewVertex;"));
    assert!(!program.vertex.contains("morphTransform"));
    assert!(!program.vertex.contains("skeletalTransform"));
}

#[test]
fn skinning_adds_bone_palette_and_transform() {
    let program = compile(
        vec![material(), StateAttribute::Skinning(SkinningAttribute { bone_count: 4 })],
        vec![],
    );

    assert!(program.vertex.contains("uniform vec4 uBones[12];"));
    assert!(program.vertex.contains("attribute vec4 Weights;"));
    assert!(program.vertex.contains("attribute vec4 Bones;"));
    assert_eq!(call_count(&program.vertex, "skeletalTransform"), 1);
}

#[test]
fn morph_targets_blend_the_vertex_stream() {
    let program = compile(
        vec![
            material(),
            StateAttribute::Morph(MorphAttribute {
                num_targets: 2,
                morphs_normal: false,
                morphs_tangent: false,
            }),
        ],
        vec![],
    );

    assert!(program.vertex.contains("uniform vec4 uTargetWeights;"));
    assert!(program.vertex.contains("attribute vec3 Vertex_0;"));
    assert!(program.vertex.contains("attribute vec3 Vertex_1;"));
    assert_eq!(call_count(&program.vertex, "morphTransform"), 1);
    // normals are untouched when only the vertex stream morphs
    assert!(!program.vertex.contains("morphNormal"));
}

#[test]
fn billboard_discards_transparent_fragments() {
    let program = compile(vec![material(), StateAttribute::Billboard], vec![]);

    assert!(program.fragment.contains("discard"));
    assert_eq!(call_count(&program.vertex, "billboard"), 1);
    assert!(program.vertex.contains("vec4 billboard("));
    // billboarding bypasses the projection*view composition
    assert!(!program.vertex.contains("gl_Position = uProjectionMatrix*"));
}

#[test]
fn texture_modulates_color_and_alpha() {
    let program = compile(
        vec![material()],
        vec![Some(TextureAttribute::Texture(Texture::default()))],
    );

    assert!(program.fragment.contains("uniform sampler2D Texture0;"));
    assert!(program.fragment.contains("varying vec2 vTexCoord0;"));
    assert_eq!(call_count(&program.fragment, "textureRGBA"), 1);
    assert!(program.fragment.contains(".rgb *= "));
    assert!(program.fragment.contains(".a * "));

    assert!(program.vertex.contains("attribute vec2 TexCoord0;"));
    assert!(program.vertex.contains("vTexCoord0 = TexCoord0.rg;"));
}

#[test]
fn declarations_and_functions_are_deduplicated() {
    let program = compile(vec![material(), sun(0), sun(1)], vec![]);

    // one shading call per light, one function body for both
    assert_eq!(call_count(&program.fragment, "computeSunLightShading"), 2);
    assert_eq!(program.fragment.matches("vec4 computeSunLightShading(").count(), 1);

    for declaration in [
        "uniform vec4 uMaterialDiffuse;",
        "uniform float uArrayColorEnabled;",
        "varying vec3 vViewNormal;",
    ] {
        assert_eq!(
            program.fragment.matches(declaration).count(),
            1,
            "duplicated: {declaration}"
        );
    }
}

#[test]
fn vertex_attribute_declarations_lead_with_position() {
    let program = compile(vec![material(), sun(0)], vec![]);

    let first_attribute = program
        .vertex
        .lines()
        .find(|line| line.starts_with("attribute "))
        .expect("vertex stage declares attributes");
    assert_eq!(first_attribute, "attribute vec3 Vertex;");

    // attribute block precedes the uniform block
    let attr_at = program.vertex.find("attribute ").unwrap();
    let uniform_at = program.vertex.find("uniform ").unwrap();
    assert!(attr_at < uniform_at);
}

#[test]
fn both_stages_carry_version_and_shader_name() {
    let program = compile(vec![material()], vec![]);

    for source in [&program.vertex, &program.fragment] {
        assert!(source.starts_with("#version 100\n"));
        assert!(source.contains("#define SHADER_NAME ForgeCompiler"));
        assert!(source.contains("void main() {"));
    }
    assert!(program.vertex.contains("gl_PointSize"));
}

#[test]
fn mixed_shadow_algorithms_keep_one_comparison_path() {
    let program = compile(
        vec![
            material(),
            sun(0),
            sun(1),
            StateAttribute::ShadowReceiver(ShadowReceiver {
                light_number: 0,
                algorithm: glslforge::ShadowAlgorithm::Vsm,
            }),
            StateAttribute::ShadowReceiver(ShadowReceiver {
                light_number: 1,
                algorithm: glslforge::ShadowAlgorithm::Evsm,
            }),
        ],
        vec![shadow_map(0), shadow_map(1)],
    );

    // the first receiver's algorithm wins for the whole program, so exactly
    // one guarded comparison path is compiled in
    assert!(program.fragment.contains("#define _VSM"));
    assert!(!program.fragment.contains("#define _EVSM"));
    assert_eq!(program.fragment.matches("#define _").count(), 1);
    assert_eq!(call_count(&program.fragment, "computeShadow"), 2);
}

#[test]
fn cube_map_texture_samples_with_direction_coords() {
    let program = compile(
        vec![material()],
        vec![Some(TextureAttribute::Texture(Texture {
            name: None,
            target: TextureTarget::CubeMap,
        }))],
    );

    assert!(program.fragment.contains("uniform samplerCube Texture0;"));
    assert!(program.fragment.contains("varying vec3 vTexCoord0;"));
    assert_eq!(call_count(&program.fragment, "textureCubeRGBA"), 1);

    assert!(program.vertex.contains("attribute vec3 TexCoord0;"));
    assert!(program.vertex.contains("vTexCoord0 = TexCoord0.rgb;"));
}

#[test]
fn invariant_position_directive_lands_in_vertex_stage() {
    let mut compiler = Compiler::new(&[material(), sun(0)], &[]);
    compiler.set_invariant_position(true);
    let program = compiler.compile(&TextProcessor::new()).unwrap();

    assert!(!program.fragment.contains("invariant gl_Position;"));

    // after the declaration block, before the main body
    let at = program
        .vertex
        .find("invariant gl_Position;")
        .expect("directive in vertex stage");
    let last_varying = program.vertex.rfind("varying ").unwrap();
    assert!(last_varying < at);
    assert!(at < program.vertex.find("void main()").unwrap());
}

#[test]
fn vsm_shadow_pulls_derivative_extension_before_code() {
    let program = compile(
        vec![
            material(),
            sun(0),
            StateAttribute::ShadowReceiver(ShadowReceiver {
                light_number: 0,
                algorithm: glslforge::ShadowAlgorithm::Vsm,
            }),
        ],
        vec![shadow_map(0)],
    );

    assert!(program.fragment.contains("#define _VSM"));
    let ext = program
        .fragment
        .find("#extension GL_OES_standard_derivatives : enable")
        .expect("derivative extension");
    let main = program.fragment.find("void main()").unwrap();
    assert!(ext < main);
}

#[test]
fn recompiling_identical_state_is_byte_identical() {
    let attributes = vec![
        material(),
        sun(0),
        StateAttribute::Light(Light::new(1, LightKind::Spot)),
        StateAttribute::ShadowReceiver(ShadowReceiver::new(0)),
    ];
    let units = vec![shadow_map(0), Some(TextureAttribute::Texture(Texture::default()))];

    let first = Compiler::new(&attributes, &units)
        .compile(&TextProcessor::new())
        .unwrap();
    let second = Compiler::new(&attributes, &units)
        .compile(&TextProcessor::new())
        .unwrap();

    assert_eq!(first.vertex, second.vertex);
    assert_eq!(first.fragment, second.fragment);
}
