//! Module resolution.
//!
//! Maps a `(reference, referrer)` pair to a concrete file on disk. The
//! resolver prefers a package manifest's `module` field over `main` so that
//! ESM-first packages stay in ESM form and never need a CommonJS
//! conversion downstream.

use crate::catalog::AssetCatalog;
use crate::error::CompilerError;
use crate::manifest;
use crate::paths;
use crate::system::System;

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Absolute POSIX path of the resolved file.
    pub path: String,
    /// Whether the reference string differs from the mechanically derivable
    /// asset name and therefore requires an alias entry in the bundle.
    pub needs_alias: bool,
}

/// Resolves module references against the project, the compiler's shim
/// packages and their dependency roots.
pub struct Resolver<'a> {
    sys: &'a dyn System,
    catalog: &'a AssetCatalog,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over the given system and catalog.
    pub fn new(sys: &'a dyn System, catalog: &'a AssetCatalog) -> Self {
        Resolver { sys, catalog }
    }

    /// Resolve `name` as referenced from the module at `referrer`.
    ///
    /// Fails with [`CompilerError::Unresolvable`] when no file exists at the
    /// end of the search.
    pub fn resolve(
        &self,
        name: &str,
        referrer: &str,
    ) -> Result<Resolution, CompilerError> {
        let (mut current, mut needs_alias, shim_file) = self.initial_path(name, referrer);

        if !shim_file && self.is_dir(&current) {
            match manifest::read_manifest(self.sys, &current) {
                Some(manifest) => {
                    let chosen = manifest
                        .module
                        .or(manifest.main)
                        .unwrap_or_else(|| "index.js".to_string());
                    current = paths::join(&current, &chosen);
                    if self.is_dir(&current) {
                        current = paths::join(&current, "index.js");
                    }
                    needs_alias = true;
                }
                None => {
                    current = paths::join(&current, "index.js");
                }
            }
        }

        if !self.is_file(&current) {
            let retry = format!("{}.js", current);
            if self.is_file(&retry) {
                current = retry;
            } else {
                return Err(CompilerError::Unresolvable(vec![name.to_string()]));
            }
        }

        Ok(Resolution {
            path: current,
            needs_alias,
        })
    }

    /// First-match-wins selection of the starting path.
    ///
    /// The third element marks a shim entry that maps directly to a `.js`
    /// file, which skips directory handling entirely.
    fn initial_path(&self, name: &str, referrer: &str) -> (String, bool, bool) {
        if name.starts_with('/') {
            return (paths::normalize(name), false, false);
        }

        let tokens: Vec<&str> = name.split('/').collect();
        let package_segments = if tokens[0].starts_with('@') && tokens.len() >= 2 {
            2
        } else {
            1
        };
        let package = tokens[..package_segments].join("/");
        let subpath = &tokens[package_segments..];

        if let Some(shim) = self.catalog.shim_root(&package) {
            if shim.ends_with(".js") {
                return (shim, true, true);
            }
            let mut current = shim;
            for segment in subpath {
                current = paths::join(&current, segment);
            }
            return (current, true, false);
        }

        let base = if self.referrer_uses_compiler_packages(referrer) {
            self.catalog.compiler_node_modules()
        } else {
            self.catalog.project_node_modules()
        };
        (paths::join(&base, name), !subpath.is_empty(), false)
    }

    fn referrer_uses_compiler_packages(&self, referrer: &str) -> bool {
        paths::is_inside(referrer, self.catalog.compiler_root())
            || paths::is_inside(referrer, &self.catalog.compiler_node_modules())
            || paths::is_inside(referrer, &self.catalog.project_local_compiler())
    }

    fn is_file(&self, path: &str) -> bool {
        self.sys.is_file(&paths::from_posix(path))
    }

    fn is_dir(&self, path: &str) -> bool {
        self.sys.is_dir(&paths::from_posix(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MemorySystem;

    fn catalog() -> AssetCatalog {
        AssetCatalog::new("/p", "/opt/frida-compile")
    }

    #[test]
    fn absolute_references_resolve_as_is() {
        let sys = MemorySystem::new();
        sys.add_file("/p/agent/util.js", "export {};");
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let hit = resolver.resolve("/p/agent/util.js", "/p/agent/index.js").unwrap();
        assert_eq!(hit.path, "/p/agent/util.js");
        assert!(!hit.needs_alias);
    }

    #[test]
    fn missing_extension_retries_with_js() {
        let sys = MemorySystem::new();
        sys.add_file("/p/agent/util.js", "export {};");
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let hit = resolver.resolve("/p/agent/util", "/p/agent/index.js").unwrap();
        assert_eq!(hit.path, "/p/agent/util.js");
    }

    #[test]
    fn shims_interpose_builtins() {
        let sys = MemorySystem::new();
        sys.add_file(
            "/opt/frida-compile/node_modules/@frida/buffer/package.json",
            r#"{"module": "index.js"}"#,
        );
        sys.add_file(
            "/opt/frida-compile/node_modules/@frida/buffer/index.js",
            "export class Buffer {}",
        );
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        for name in ["buffer", "node:buffer"] {
            let hit = resolver.resolve(name, "/p/agent/index.js").unwrap();
            assert_eq!(
                hit.path,
                "/opt/frida-compile/node_modules/@frida/buffer/index.js"
            );
            assert!(hit.needs_alias);
        }
    }

    #[test]
    fn file_shims_are_final() {
        let sys = MemorySystem::new();
        sys.add_file(
            "/opt/frida-compile/node_modules/punycode/punycode.es6.js",
            "export {};",
        );
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let hit = resolver.resolve("punycode", "/p/agent/index.js").unwrap();
        assert_eq!(
            hit.path,
            "/opt/frida-compile/node_modules/punycode/punycode.es6.js"
        );
        assert!(hit.needs_alias);
    }

    #[test]
    fn package_manifest_prefers_module_over_main() {
        let sys = MemorySystem::new();
        sys.add_file(
            "/p/node_modules/dual/package.json",
            r#"{"main": "lib/index.cjs.js", "module": "lib/index.esm.js"}"#,
        );
        sys.add_file("/p/node_modules/dual/lib/index.esm.js", "export {};");
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let hit = resolver.resolve("dual", "/p/agent/index.js").unwrap();
        assert_eq!(hit.path, "/p/node_modules/dual/lib/index.esm.js");
        assert!(hit.needs_alias);
    }

    #[test]
    fn directory_without_manifest_uses_index_js() {
        let sys = MemorySystem::new();
        sys.add_file("/p/node_modules/plain/lib/index.js", "export {};");
        sys.add_dir("/p/node_modules/plain/lib");
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let hit = resolver.resolve("plain/lib", "/p/agent/index.js").unwrap();
        assert_eq!(hit.path, "/p/node_modules/plain/lib/index.js");
        assert!(hit.needs_alias, "subpath references require an alias");
    }

    #[test]
    fn bare_file_resolved_by_js_retry_needs_no_alias() {
        let sys = MemorySystem::new();
        sys.add_file("/p/node_modules/flat.js", "export {};");
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let hit = resolver.resolve("flat", "/p/agent/index.js").unwrap();
        assert_eq!(hit.path, "/p/node_modules/flat.js");
        assert!(!hit.needs_alias);
    }

    #[test]
    fn scoped_packages_join_two_segments() {
        let sys = MemorySystem::new();
        sys.add_file(
            "/p/node_modules/@acme/kit/package.json",
            r#"{"main": "index.js"}"#,
        );
        sys.add_file("/p/node_modules/@acme/kit/index.js", "export {};");
        sys.add_file("/p/node_modules/@acme/kit/extra.js", "export {};");
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let hit = resolver.resolve("@acme/kit", "/p/agent/index.js").unwrap();
        assert_eq!(hit.path, "/p/node_modules/@acme/kit/index.js");
        assert!(hit.needs_alias);

        let sub = resolver
            .resolve("@acme/kit/extra", "/p/agent/index.js")
            .unwrap();
        assert_eq!(sub.path, "/p/node_modules/@acme/kit/extra.js");
        assert!(sub.needs_alias);
    }

    #[test]
    fn compiler_rooted_referrers_use_compiler_packages() {
        let sys = MemorySystem::new();
        sys.add_file(
            "/opt/frida-compile/node_modules/ieee754/index.js",
            "export {};",
        );
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let referrer = "/opt/frida-compile/node_modules/@frida/buffer/index.js";
        let hit = resolver.resolve("ieee754", referrer).unwrap();
        assert_eq!(hit.path, "/opt/frida-compile/node_modules/ieee754/index.js");
        assert!(!hit.needs_alias);
    }

    #[test]
    fn unknown_references_are_unresolvable() {
        let sys = MemorySystem::new();
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let err = resolver.resolve("left-pad", "/p/agent/index.js").unwrap_err();
        match err {
            CompilerError::Unresolvable(names) => assert_eq!(names, vec!["left-pad"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let sys = MemorySystem::new();
        sys.add_file("/p/node_modules/dep/package.json", r#"{"main": "a.js"}"#);
        sys.add_file("/p/node_modules/dep/a.js", "export {};");
        let catalog = catalog();
        let resolver = Resolver::new(&sys, &catalog);

        let first = resolver.resolve("dep", "/p/agent/index.js").unwrap();
        let second = resolver.resolve("dep", "/p/agent/index.js").unwrap();
        assert_eq!(first, second);
    }
}
