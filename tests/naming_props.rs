use std::collections::HashSet;

use proptest::prelude::*;

use glslforge::{
    Compiler, GlslType, Light, LightKind, Material, ShadowReceiver, ShadowTexture, StageContext,
    StateAttribute, TextProcessor, Texture, TextureAttribute,
};

fn kind_for(index: u32) -> LightKind {
    match index % 4 {
        0 => LightKind::Directional,
        1 => LightKind::Spot,
        2 => LightKind::Point,
        _ => LightKind::Hemisphere,
    }
}

proptest! {
    #[test]
    fn local_name_collisions_always_disambiguate(count in 1usize..24) {
        let mut ctx = StageContext::fragment();
        let mut names = HashSet::new();
        for _ in 0..count {
            let id = ctx.create_variable(GlslType::Float, Some("tmp"));
            names.insert(ctx.graph.var_name(id).to_string());
        }
        prop_assert_eq!(names.len(), count);
    }

    #[test]
    fn mixed_named_and_anonymous_locals_never_collide(named in 0usize..12, anonymous in 0usize..12) {
        let mut ctx = StageContext::fragment();
        let mut names = HashSet::new();
        for _ in 0..named {
            let id = ctx.create_variable(GlslType::Vec3, Some("color"));
            names.insert(ctx.graph.var_name(id).to_string());
        }
        for _ in 0..anonymous {
            let id = ctx.create_variable(GlslType::Vec3, None);
            names.insert(ctx.graph.var_name(id).to_string());
        }
        prop_assert_eq!(names.len(), named + anonymous);
    }

    #[test]
    fn generated_source_is_deterministic(
        light_bits in 0u32..8,
        shadowed in any::<bool>(),
        textured in any::<bool>(),
    ) {
        let mut attributes = vec![StateAttribute::Material(Material::default())];
        for i in 0..3u32 {
            if light_bits & (1 << i) != 0 {
                attributes.push(StateAttribute::Light(Light::new(i, kind_for(i))));
            }
        }
        if shadowed {
            attributes.push(StateAttribute::ShadowReceiver(ShadowReceiver::new(0)));
        }

        let mut units = Vec::new();
        if shadowed {
            units.push(Some(TextureAttribute::Shadow(ShadowTexture {
                light_unit: 0,
                name: None,
            })));
        }
        if textured {
            units.push(Some(TextureAttribute::Texture(Texture::default())));
        }

        let first = Compiler::new(&attributes, &units)
            .compile(&TextProcessor::new())
            .unwrap();
        let second = Compiler::new(&attributes, &units)
            .compile(&TextProcessor::new())
            .unwrap();

        prop_assert_eq!(&first.vertex, &second.vertex);
        prop_assert_eq!(&first.fragment, &second.fragment);
    }
}
