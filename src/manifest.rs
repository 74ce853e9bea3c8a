//! Package manifests and module-kind classification.

use serde::Deserialize;

use crate::paths;
use crate::system::System;

/// The subset of `package.json` the bundler cares about.
#[derive(Debug, Default, Deserialize)]
pub struct PackageManifest {
    /// Package name.
    pub name: Option<String>,
    /// CommonJS entry point.
    pub main: Option<String>,
    /// ECMAScript module entry point, preferred over `main`.
    pub module: Option<String>,
    /// The `type` field: `"module"` marks the package tree as ESM.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Whether a module uses ECMAScript or CommonJS semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// ECMAScript module.
    Esm,
    /// CommonJS module.
    Cjs,
}

/// Read and parse `<dir>/package.json`, if present.
pub fn read_manifest(sys: &dyn System, dir: &str) -> Option<PackageManifest> {
    let manifest_path = paths::join(dir, "package.json");
    if !sys.is_file(&paths::from_posix(&manifest_path)) {
        return None;
    }
    let text = sys.read_text(&paths::from_posix(&manifest_path)).ok()?;
    match serde_json::from_str(&text) {
        Ok(manifest) => Some(manifest),
        Err(error) => {
            log::warn!("{}: ignoring malformed manifest: {}", manifest_path, error);
            None
        }
    }
}

/// Classify a module by walking up from its parent directory to the nearest
/// package manifest.
///
/// A manifest with `type == "module"` or a `module` field marks the tree as
/// ESM; anything else, including the absence of a manifest, is CommonJS.
pub fn detect_module_kind(sys: &dyn System, file: &str) -> ModuleKind {
    let mut dir = paths::dirname(file).to_string();
    loop {
        if let Some(manifest) = read_manifest(sys, &dir) {
            let esm = manifest.kind.as_deref() == Some("module")
                || manifest.module.is_some();
            return if esm { ModuleKind::Esm } else { ModuleKind::Cjs };
        }
        let parent = paths::dirname(&dir).to_string();
        if parent.len() >= dir.len() {
            return ModuleKind::Cjs;
        }
        dir = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MemorySystem;

    #[test]
    fn classifies_from_nearest_manifest() {
        let sys = MemorySystem::new();
        sys.add_file("/p/node_modules/dep/package.json", r#"{"type": "module"}"#);
        sys.add_file("/p/node_modules/dep/index.js", "export default 1;");
        sys.add_file("/p/node_modules/old/package.json", r#"{"main": "index.js"}"#);
        sys.add_file("/p/node_modules/old/index.js", "module.exports = 1;");

        assert_eq!(
            detect_module_kind(&sys, "/p/node_modules/dep/index.js"),
            ModuleKind::Esm
        );
        assert_eq!(
            detect_module_kind(&sys, "/p/node_modules/old/index.js"),
            ModuleKind::Cjs
        );
    }

    #[test]
    fn module_field_implies_esm() {
        let sys = MemorySystem::new();
        sys.add_file(
            "/p/node_modules/dual/package.json",
            r#"{"main": "index.js", "module": "index.esm.js"}"#,
        );
        sys.add_file("/p/node_modules/dual/index.esm.js", "export default 1;");
        assert_eq!(
            detect_module_kind(&sys, "/p/node_modules/dual/index.esm.js"),
            ModuleKind::Esm
        );
    }

    #[test]
    fn missing_manifest_is_cjs() {
        let sys = MemorySystem::new();
        sys.add_file("/p/lib/plain.js", "module.exports = 1;");
        assert_eq!(detect_module_kind(&sys, "/p/lib/plain.js"), ModuleKind::Cjs);
    }
}
