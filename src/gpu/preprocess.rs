//! Text substitution over WGSL sources.
//!
//! Two directives are understood, each on a line of its own:
//!
//! * `//!insert Key` is replaced by the text registered for `Key`.
//! * `//!include name` is replaced by the preprocessed source `name`, at most
//!   once per top level source.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, SimError};

const INSERT_DIRECTIVE: &str = "//!insert";
const INCLUDE_DIRECTIVE: &str = "//!include";

/// Sources shipped with the crate, keyed by file stem.
pub const BUILTIN_SOURCES: &[(&str, &str)] = &[
    ("particle.inc", include_str!("../../shaders/particle.inc.wgsl")),
    ("bukkit.inc", include_str!("../../shaders/bukkit.inc.wgsl")),
    ("shapes.inc", include_str!("../../shaders/shapes.inc.wgsl")),
    ("particleEmit", include_str!("../../shaders/particleEmit.wgsl")),
    ("setIndirectArgs", include_str!("../../shaders/setIndirectArgs.wgsl")),
    ("bukkitCount", include_str!("../../shaders/bukkitCount.wgsl")),
    ("bukkitAllocate", include_str!("../../shaders/bukkitAllocate.wgsl")),
    ("bukkitInsert", include_str!("../../shaders/bukkitInsert.wgsl")),
    ("g2p2g", include_str!("../../shaders/g2p2g.wgsl")),
    ("particleRender", include_str!("../../shaders/particleRender.wgsl")),
];

#[derive(Debug, Default, Clone)]
pub struct ShaderPreprocessor {
    sources: HashMap<String, String>,
    inserts: HashMap<String, String>,
}

impl ShaderPreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_sources() -> Self {
        let mut preprocessor = Self::new();
        for (name, text) in BUILTIN_SOURCES {
            preprocessor.add_source(name, text);
        }
        preprocessor
    }

    pub fn add_source(&mut self, name: &str, text: &str) {
        self.sources.insert(name.to_owned(), text.to_owned());
    }

    pub fn add_insert(&mut self, key: &str, text: impl Into<String>) {
        self.inserts.insert(key.to_owned(), text.into());
    }

    /// Fully expanded text of the source `name`.
    pub fn process(&self, name: &str) -> Result<String> {
        let mut included = HashSet::new();
        included.insert(name.to_owned());
        self.expand(name, &mut included)
    }

    fn expand(&self, name: &str, included: &mut HashSet<String>) -> Result<String> {
        let text = self
            .sources
            .get(name)
            .ok_or_else(|| SimError::Platform(format!("unknown shader source [{name}]")))?;

        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(key) = trimmed.strip_prefix(INSERT_DIRECTIVE) {
                let key = key.trim();
                let insert = self.inserts.get(key).ok_or_else(|| {
                    SimError::Platform(format!("no insert registered for [{key}] in [{name}]"))
                })?;
                out.push_str(insert);
                if !insert.ends_with('\n') {
                    out.push('\n');
                }
            } else if let Some(include) = trimmed.strip_prefix(INCLUDE_DIRECTIVE) {
                let include = include.trim();
                if included.insert(include.to_owned()) {
                    out.push_str(&self.expand(include, included)?);
                }
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(out)
    }
}
