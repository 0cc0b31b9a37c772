//! Shader text post-processing.
//!
//! The assembler emits a bare program body with `#pragma include` pragmas;
//! the processor turns that into a complete GLSL ES 1.0 compilation unit:
//! `#version` first, extensions before any other token, a default float
//! precision when the source declares none, sorted duplicate-free defines,
//! then the body with every include spliced in exactly once.

use std::collections::{BTreeMap, HashSet};

use crate::shaderlib;
use crate::types::ShaderStage;

/// Final text pass over an assembled shader. Implemented by [`TextProcessor`];
/// hosts with their own include store or header policy can substitute theirs.
pub trait ShaderProcessor {
    fn process_shader(
        &self,
        source: &str,
        defines: &[String],
        extensions: &[String],
        stage: ShaderStage,
    ) -> String;
}

/// Default processor backed by the built-in shader library.
pub struct TextProcessor {
    library: BTreeMap<String, String>,
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextProcessor {
    pub fn new() -> Self {
        let mut processor = Self {
            library: BTreeMap::new(),
        };
        for (name, source) in shaderlib::builtins() {
            processor.register(name, source);
        }
        processor
    }

    /// Add or override an include. Later registrations win, so hosts can
    /// shadow a built-in with their own variant.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.library.insert(name.into(), source.into());
    }

    /// Name inside `#pragma include "name"`, if the line is one.
    fn include_name(line: &str) -> Option<&str> {
        let rest = line.trim().strip_prefix("#pragma include")?;
        let rest = rest.trim();
        rest.strip_prefix('"')?.strip_suffix('"')
    }

    /// Splice includes recursively. `included` spans the whole program so a
    /// library pulled in from two sites lands only once.
    fn resolve_includes(&self, source: &str, included: &mut HashSet<String>) -> String {
        let mut out = String::new();
        for line in source.lines() {
            match Self::include_name(line) {
                Some(name) => {
                    if !included.insert(name.to_string()) {
                        continue;
                    }
                    match self.library.get(name) {
                        Some(body) => {
                            out.push_str(&self.resolve_includes(body, included));
                            out.push('\n');
                        }
                        None => log::warn!("shader include not found, dropped: {name}"),
                    }
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        out
    }
}

impl ShaderProcessor for TextProcessor {
    fn process_shader(
        &self,
        source: &str,
        defines: &[String],
        extensions: &[String],
        stage: ShaderStage,
    ) -> String {
        let mut out = String::from("#version 100\n");

        // Extensions must precede every non-preprocessor token.
        let mut extensions: Vec<&String> = extensions.iter().collect();
        extensions.sort();
        extensions.dedup();
        for extension in extensions {
            out.push_str(extension);
            out.push('\n');
        }

        if !source.contains("precision ") {
            match stage {
                ShaderStage::Vertex => out.push_str("precision highp float;\n"),
                ShaderStage::Fragment => out.push_str(
                    "#ifdef GL_FRAGMENT_PRECISION_HIGH\n\
                     precision highp float;\n\
                     #else\n\
                     precision mediump float;\n\
                     #endif\n",
                ),
            }
        }

        let mut defines: Vec<&String> = defines.iter().collect();
        defines.sort();
        defines.dedup();
        for define in defines {
            out.push_str(define);
            out.push('\n');
        }

        let mut included = HashSet::new();
        out.push_str(&self.resolve_includes(source, &mut included));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_line_comes_first() {
        let processor = TextProcessor::new();
        let out = processor.process_shader("void main() {}", &[], &[], ShaderStage::Fragment);
        assert!(out.starts_with("#version 100\n"));
    }

    #[test]
    fn extensions_precede_precision_and_defines() {
        let processor = TextProcessor::new();
        let out = processor.process_shader(
            "void main() {}",
            &["#define _PCF".to_string()],
            &["#extension GL_OES_standard_derivatives : enable".to_string()],
            ShaderStage::Fragment,
        );
        let ext = out.find("#extension").unwrap();
        let precision = out.find("precision").unwrap();
        let define = out.find("#define").unwrap();
        assert!(ext < precision && precision < define);
    }

    #[test]
    fn defines_are_sorted_and_deduplicated() {
        let processor = TextProcessor::new();
        let out = processor.process_shader(
            "void main() {}",
            &[
                "#define B 2".to_string(),
                "#define A 1".to_string(),
                "#define B 2".to_string(),
            ],
            &[],
            ShaderStage::Vertex,
        );
        assert_eq!(out.matches("#define B 2").count(), 1);
        assert!(out.find("#define A 1").unwrap() < out.find("#define B 2").unwrap());
    }

    #[test]
    fn includes_expand_once_per_program() {
        let mut processor = TextProcessor::new();
        processor.register("leaf.glsl", "float leaf() { return 1.0; }");
        processor.register("branch.glsl", "#pragma include \"leaf.glsl\"\nfloat branch() { return leaf(); }");

        let source = "#pragma include \"branch.glsl\"\n#pragma include \"leaf.glsl\"\nvoid main() {}";
        let out = processor.process_shader(source, &[], &[], ShaderStage::Fragment);
        assert_eq!(out.matches("float leaf()").count(), 1);
        assert!(out.find("float leaf()").unwrap() < out.find("float branch()").unwrap());
    }

    #[test]
    fn unknown_include_is_dropped() {
        let processor = TextProcessor::new();
        let out = processor.process_shader(
            "#pragma include \"nonexistent.glsl\"\nvoid main() {}",
            &[],
            &[],
            ShaderStage::Vertex,
        );
        assert!(!out.contains("#pragma include"));
        assert!(out.contains("void main()"));
    }

    #[test]
    fn existing_precision_is_not_duplicated() {
        let processor = TextProcessor::new();
        let out = processor.process_shader(
            "precision mediump float;\nvoid main() {}",
            &[],
            &[],
            ShaderStage::Fragment,
        );
        assert_eq!(out.matches("precision").count(), 1);
    }
}
